//! Dependency classification: which service group does a check need?

pub mod markers;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vigil_model::{CheckDefinition, CheckId, ServiceGroup};

pub use markers::{DEFAULT_MARKERS, MarkerTable};

/// How a group assignment was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// `services` tags in the check metadata.
    Declared,
    /// Call-pattern markers found in the source text.
    Markers,
    /// Nothing recognisable; the fallback group.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub group: ServiceGroup,
    pub source: ClassificationSource,
    /// Every group the check appeared to need, in precedence order.
    pub matched: Vec<ServiceGroup>,
}

impl Classification {
    pub fn is_ambiguous(&self) -> bool {
        self.matched.len() > 1
    }
}

/// Recorded when a check needs more than one group. The check still lands
/// in exactly one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationWarning {
    pub check_id: CheckId,
    pub matched: Vec<ServiceGroup>,
    pub assigned: ServiceGroup,
}

impl fmt::Display for ClassificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let matched = self
            .matched
            .iter()
            .map(|group| group.label())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "check {} matches multiple service groups ({matched}); assigned to {}",
            self.check_id, self.assigned
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyClassifier {
    markers: MarkerTable,
}

impl DependencyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers(markers: MarkerTable) -> Self {
        Self { markers }
    }

    /// Assign `definition` to exactly one group. Never fails.
    pub fn classify(
        &self,
        definition: &CheckDefinition,
    ) -> (Classification, Option<ClassificationWarning>) {
        let declared = definition.declared_services();
        let (mut matched, source) = if !declared.is_empty() {
            (declared.to_vec(), ClassificationSource::Declared)
        } else {
            (
                self.markers.matches(&definition.source),
                ClassificationSource::Markers,
            )
        };
        matched.sort_by_key(|group| group.rank());
        matched.dedup();

        let Some(&group) = matched.first() else {
            return (
                Classification {
                    group: ServiceGroup::FALLBACK,
                    source: ClassificationSource::Fallback,
                    matched,
                },
                None,
            );
        };

        let classification = Classification {
            group,
            source,
            matched,
        };

        let warning = classification.is_ambiguous().then(|| {
            let warning = ClassificationWarning {
                check_id: definition.id.clone(),
                matched: classification.matched.clone(),
                assigned: group,
            };
            warn!(check = %definition.id, assigned = %group, "{warning}");
            warning
        });

        (classification, warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vigil_model::CheckMetadata;

    fn definition(id: &str, source: &str, services: &[ServiceGroup]) -> CheckDefinition {
        let metadata = (!services.is_empty()).then(|| CheckMetadata {
            services: services.to_vec(),
            ..CheckMetadata::default()
        });
        CheckDefinition {
            id: CheckId::new(id),
            source_path: PathBuf::from(format!("{id}.ps1")),
            relative_path: format!("{id}.ps1"),
            source: source.to_string(),
            metadata,
        }
    }

    #[test]
    fn single_marker_group_is_assigned() {
        let (classification, warning) = DependencyClassifier::new()
            .classify(&definition("a", "Get-TransportRule | Measure", &[]));
        assert_eq!(classification.group, ServiceGroup::Mail);
        assert_eq!(classification.source, ClassificationSource::Markers);
        assert!(warning.is_none());
    }

    #[test]
    fn unmatched_checks_use_the_fallback_group() {
        let (classification, warning) =
            DependencyClassifier::new().classify(&definition("a", "Write-Output 1", &[]));
        assert_eq!(classification.group, ServiceGroup::FALLBACK);
        assert_eq!(classification.source, ClassificationSource::Fallback);
        assert!(warning.is_none());
    }

    #[test]
    fn declared_tags_override_markers() {
        let (classification, _) = DependencyClassifier::new().classify(&definition(
            "a",
            "Get-MgUser",
            &[ServiceGroup::Compliance],
        ));
        assert_eq!(classification.group, ServiceGroup::Compliance);
        assert_eq!(classification.source, ClassificationSource::Declared);
    }

    #[test]
    fn multi_group_checks_follow_precedence_and_warn() {
        let (classification, warning) = DependencyClassifier::new().classify(&definition(
            "both",
            "Get-MgUser; Get-Mailbox",
            &[],
        ));
        assert_eq!(classification.group, ServiceGroup::Mail);
        let warning = warning.expect("ambiguous checks are reported");
        assert_eq!(warning.check_id, CheckId::new("both"));
        assert_eq!(
            warning.matched,
            vec![ServiceGroup::Mail, ServiceGroup::Directory]
        );
    }

    #[test]
    fn custom_marker_tables_are_honoured() {
        let markers = MarkerTable::from_entries([(ServiceGroup::Compliance, ["Invoke-Audit"])]);
        let (classification, _) = DependencyClassifier::with_markers(markers)
            .classify(&definition("a", "Invoke-AuditScan", &[]));
        assert_eq!(classification.group, ServiceGroup::Compliance);
    }
}

//! Partition a check set into one batch per service group.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vigil_model::{
    Batch, BatchCheck, CheckDefinition, CheckId, ScopedCredentials, ServiceGroup, Severity,
    TargetCredentials,
};

use crate::classifier::{ClassificationSource, ClassificationWarning, DependencyClassifier};

/// Reason recorded on checks refused under [`AmbiguityPolicy::Reject`].
pub const UNSUPPORTED_CHECK: &str = "unsupported check: requires more than one service group";

/// What to do with checks that need more than one service group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Run in the precedence group.
    #[default]
    Run,
    /// Keep in the precedence group but record an `Error` without running it.
    Reject,
}

impl fmt::Display for AmbiguityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbiguityPolicy::Run => f.write_str("run"),
            AmbiguityPolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for AmbiguityPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "run" => Ok(Self::Run),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown ambiguity policy `{other}`")),
        }
    }
}

/// Per-check view of a plan, for listings and dry runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedCheck {
    pub check_id: CheckId,
    pub relative_path: String,
    pub title: Option<String>,
    pub severity: Option<Severity>,
    pub group: ServiceGroup,
    pub source: ClassificationSource,
    pub rejected: bool,
}

#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub checks: Vec<PlannedCheck>,
    pub warnings: Vec<ClassificationWarning>,
}

impl BatchPlan {
    pub fn total_checks(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn batch_sizes(&self) -> Vec<(ServiceGroup, usize)> {
        self.batches
            .iter()
            .map(|batch| (batch.group, batch.len()))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    classifier: DependencyClassifier,
    policy: AmbiguityPolicy,
}

impl BatchPlanner {
    pub fn new(classifier: DependencyClassifier, policy: AmbiguityPolicy) -> Self {
        Self { classifier, policy }
    }

    pub fn policy(&self) -> AmbiguityPolicy {
        self.policy
    }

    /// One batch per non-empty group, in [`ServiceGroup::ORDER`]; discovery
    /// order is preserved inside each batch.
    pub fn plan(&self, checks: &[CheckDefinition], credentials: &TargetCredentials) -> BatchPlan {
        let mut grouped: BTreeMap<usize, (ServiceGroup, Vec<BatchCheck>)> = BTreeMap::new();
        let mut planned = Vec::with_capacity(checks.len());
        let mut warnings = Vec::new();

        for definition in checks {
            let (classification, warning) = self.classifier.classify(definition);
            let rejected = warning.is_some() && self.policy == AmbiguityPolicy::Reject;
            if let Some(warning) = warning {
                warnings.push(warning);
            }

            let mut check = BatchCheck::from_definition(definition);
            if rejected {
                check = check.rejected(UNSUPPORTED_CHECK);
            }

            debug!(
                check = %definition.id,
                group = %classification.group,
                source = ?classification.source,
                rejected,
                "check classified"
            );

            planned.push(PlannedCheck {
                check_id: definition.id.clone(),
                relative_path: definition.relative_path.clone(),
                title: definition.title().map(str::to_string),
                severity: definition.severity(),
                group: classification.group,
                source: classification.source,
                rejected,
            });

            grouped
                .entry(classification.group.rank())
                .or_insert_with(|| (classification.group, Vec::new()))
                .1
                .push(check);
        }

        let batches: Vec<Batch> = grouped
            .into_values()
            .map(|(group, checks)| Batch {
                name: group.label().to_string(),
                group,
                checks,
                credentials: ScopedCredentials::for_group(group, credentials),
            })
            .collect();

        info!(
            batches = batches.len(),
            checks = checks.len(),
            ambiguous = warnings.len(),
            policy = %self.policy,
            "batch plan ready"
        );

        BatchPlan {
            batches,
            checks: planned,
            warnings,
        }
    }
}

//! Check discovery and metadata loading.

pub mod metadata;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_model::{CheckDefinition, CheckId, Severity};
use walkdir::WalkDir;

use crate::error::RegistryError;

pub use metadata::{MetadataError, parse_metadata_block};

/// Extensions treated as check units when none are configured.
pub const DEFAULT_UNIT_EXTENSIONS: &[&str] = &["ps1", "py", "sh"];

/// Selector and filters for one registry load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryQuery {
    pub technology: String,
    #[serde(default)]
    pub check_ids: Option<Vec<CheckId>>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

impl RegistryQuery {
    pub fn new(technology: impl Into<String>) -> Self {
        Self {
            technology: technology.into(),
            ..Self::default()
        }
    }

    pub fn with_check_ids(mut self, ids: impl IntoIterator<Item = CheckId>) -> Self {
        self.check_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }
}

/// Non-fatal findings of a registry load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryWarning {
    DuplicateId {
        id: CheckId,
        kept: String,
        replaced: String,
    },
    UnknownCheckId { id: CheckId },
    UnparsableMetadata { path: String, reason: String },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryWarning::DuplicateId { id, kept, replaced } => write!(
                f,
                "duplicate check id {id}: {kept} replaces {replaced}"
            ),
            RegistryWarning::UnknownCheckId { id } => {
                write!(f, "requested check {id} does not exist")
            }
            RegistryWarning::UnparsableMetadata { path, reason } => {
                write!(f, "metadata of {path} ignored: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedChecks {
    pub checks: Vec<CheckDefinition>,
    pub warnings: Vec<RegistryWarning>,
}

/// Read-only view over `<checks_root>/<technology>/` trees.
#[derive(Debug, Clone)]
pub struct CheckRegistry {
    root: PathBuf,
    extensions: Vec<String>,
}

impl CheckRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_UNIT_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Discover, parse and filter the checks of one technology.
    ///
    /// Units are ordered by their `/`-separated path relative to the
    /// technology directory. A missing root or technology directory is fatal.
    pub fn load(&self, query: &RegistryQuery) -> Result<LoadedChecks, RegistryError> {
        let technology_dir = self.technology_dir(&query.technology)?;
        let mut warnings = Vec::new();

        let mut units = Vec::new();
        for entry in WalkDir::new(&technology_dir).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.is_unit(entry.path()) {
                continue;
            }
            let relative = relative_path(&technology_dir, entry.path());
            units.push((relative, entry.into_path()));
        }
        units.sort_by(|a, b| a.0.cmp(&b.0));

        let mut slots: Vec<Option<CheckDefinition>> = Vec::with_capacity(units.len());
        let mut index: HashMap<CheckId, usize> = HashMap::new();

        for (relative_path, path) in units {
            let definition = load_unit(path, relative_path, &mut warnings)?;
            if let Some(previous) = index.insert(definition.id.clone(), slots.len())
                && let Some(replaced) = slots[previous].take()
            {
                warn!(
                    check = %definition.id,
                    kept = %definition.relative_path,
                    replaced = %replaced.relative_path,
                    "duplicate check id; last definition wins"
                );
                warnings.push(RegistryWarning::DuplicateId {
                    id: definition.id.clone(),
                    kept: definition.relative_path.clone(),
                    replaced: replaced.relative_path,
                });
            }
            slots.push(Some(definition));
        }

        let mut checks: Vec<CheckDefinition> = slots.into_iter().flatten().collect();

        if let Some(requested) = &query.check_ids {
            let requested: HashSet<&CheckId> = requested.iter().collect();
            let known: HashSet<&CheckId> = checks.iter().map(|check| &check.id).collect();
            let mut unknown: Vec<&CheckId> = requested
                .iter()
                .copied()
                .filter(|id| !known.contains(id))
                .collect();
            unknown.sort();
            for id in unknown {
                warn!(check = %id, "requested check not found");
                warnings.push(RegistryWarning::UnknownCheckId { id: id.clone() });
            }
            checks.retain(|check| requested.contains(&check.id));
        }

        if let Some(minimum) = query.min_severity {
            // Checks without a severity are kept.
            checks.retain(|check| check.severity().is_none_or(|severity| severity >= minimum));
        }

        info!(
            technology = %query.technology,
            checks = checks.len(),
            warnings = warnings.len(),
            "check registry loaded"
        );

        Ok(LoadedChecks { checks, warnings })
    }

    fn technology_dir(&self, technology: &str) -> Result<PathBuf, RegistryError> {
        let valid = !technology.is_empty()
            && technology != "."
            && technology != ".."
            && !technology.contains(['/', '\\']);
        if !valid {
            return Err(RegistryError::InvalidTechnology(technology.to_string()));
        }

        if !self.root.is_dir() {
            return Err(RegistryError::SourceMissing {
                path: self.root.clone(),
            });
        }
        let dir = self.root.join(technology);
        if !dir.is_dir() {
            return Err(RegistryError::SourceMissing { path: dir });
        }
        Ok(dir)
    }

    fn is_unit(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with('.'));
        if hidden {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

fn load_unit(
    path: PathBuf,
    relative_path: String,
    warnings: &mut Vec<RegistryWarning>,
) -> Result<CheckDefinition, RegistryError> {
    let source = std::fs::read_to_string(&path).map_err(|source| RegistryError::Io {
        path: path.clone(),
        source,
    })?;

    let metadata = match parse_metadata_block(&source) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(unit = %relative_path, error = %err, "ignoring unparsable metadata");
            warnings.push(RegistryWarning::UnparsableMetadata {
                path: relative_path.clone(),
                reason: err.to_string(),
            });
            None
        }
    };
    if metadata.is_none() {
        debug!(unit = %relative_path, "check unit has no metadata");
    }

    let id = metadata
        .as_ref()
        .and_then(|meta| meta.id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(CheckId::from)
        .unwrap_or_else(|| {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative_path.clone());
            CheckId::from(stem)
        });

    Ok(CheckDefinition {
        id,
        source_path: path,
        relative_path,
        source,
        metadata,
    })
}

fn relative_path(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn unit(id: &str, severity: Option<&str>) -> String {
        let severity = severity
            .map(|s| format!(", \"severity\": \"{s}\""))
            .unwrap_or_default();
        format!(
            "# vigil:metadata:begin\n# {{\"id\": \"{id}\"{severity}}}\n# vigil:metadata:end\nGet-MgUser\n"
        )
    }

    #[test]
    fn discovers_units_recursively_in_path_order() {
        let root = TempDir::new().unwrap();
        let tech = root.path().join("m365");
        write(&tech, "b/2.ps1", &unit("b2", None));
        write(&tech, "a.ps1", &unit("a", None));
        write(&tech, "b/1.ps1", &unit("b1", None));
        write(&tech, "notes.txt", "ignored");
        write(&tech, ".hidden.ps1", &unit("hidden", None));

        let loaded = CheckRegistry::new(root.path())
            .load(&RegistryQuery::new("m365"))
            .unwrap();
        let ids: Vec<_> = loaded.checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b1", "b2"]);
        assert_eq!(loaded.checks[1].relative_path, "b/1.ps1");
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn missing_sources_are_fatal() {
        let root = TempDir::new().unwrap();
        let registry = CheckRegistry::new(root.path().join("absent"));
        assert!(matches!(
            registry.load(&RegistryQuery::new("m365")),
            Err(RegistryError::SourceMissing { .. })
        ));

        let registry = CheckRegistry::new(root.path());
        assert!(matches!(
            registry.load(&RegistryQuery::new("m365")),
            Err(RegistryError::SourceMissing { .. })
        ));
        assert!(matches!(
            registry.load(&RegistryQuery::new("../etc")),
            Err(RegistryError::InvalidTechnology(_))
        ));
    }

    #[test]
    fn id_falls_back_to_file_stem_and_bad_metadata_is_non_fatal() {
        let root = TempDir::new().unwrap();
        let tech = root.path().join("m365");
        write(&tech, "plain-check.sh", "echo '{\"status\":\"Pass\"}'\n");
        write(
            &tech,
            "broken.ps1",
            "# vigil:metadata:begin\n# {not json\n# vigil:metadata:end\n",
        );

        let loaded = CheckRegistry::new(root.path())
            .load(&RegistryQuery::new("m365"))
            .unwrap();
        let ids: Vec<_> = loaded.checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["broken", "plain-check"]);
        assert!(loaded.checks.iter().all(|c| c.metadata.is_none()));
        assert!(matches!(
            loaded.warnings.as_slice(),
            [RegistryWarning::UnparsableMetadata { .. }]
        ));
    }

    #[test]
    fn duplicate_ids_keep_the_last_definition() {
        let root = TempDir::new().unwrap();
        let tech = root.path().join("m365");
        write(&tech, "a/first.ps1", &unit("1.1", Some("low")));
        write(&tech, "b/second.ps1", &unit("1.1", Some("high")));
        write(&tech, "c.ps1", &unit("1.2", None));

        let loaded = CheckRegistry::new(root.path())
            .load(&RegistryQuery::new("m365"))
            .unwrap();
        assert_eq!(loaded.checks.len(), 2);
        let dup = loaded.checks.iter().find(|c| c.id.as_str() == "1.1").unwrap();
        assert_eq!(dup.relative_path, "b/second.ps1");
        assert_eq!(dup.severity(), Some(Severity::High));
        assert!(matches!(
            loaded.warnings.as_slice(),
            [RegistryWarning::DuplicateId { .. }]
        ));
    }

    #[test]
    fn filters_by_id_and_minimum_severity() {
        let root = TempDir::new().unwrap();
        let tech = root.path().join("m365");
        write(&tech, "1.ps1", &unit("1", Some("low")));
        write(&tech, "2.ps1", &unit("2", Some("critical")));
        write(&tech, "3.ps1", &unit("3", None));
        write(&tech, "4.ps1", &unit("4", Some("high")));

        let registry = CheckRegistry::new(root.path());

        let by_severity = registry
            .load(&RegistryQuery::new("m365").with_min_severity(Severity::High))
            .unwrap();
        let ids: Vec<_> = by_severity.checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["2", "3", "4"]);

        let by_id = registry
            .load(
                &RegistryQuery::new("m365")
                    .with_check_ids(["4", "1", "missing"].map(CheckId::from)),
            )
            .unwrap();
        let ids: Vec<_> = by_id.checks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["1", "4"]);
        assert_eq!(
            by_id.warnings,
            vec![RegistryWarning::UnknownCheckId {
                id: CheckId::new("missing")
            }]
        );
    }
}

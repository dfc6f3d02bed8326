use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{CheckDefinition, CheckId, CheckMetadata, ScopedCredentials, ServiceGroup};

/// One check as carried inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCheck {
    pub id: CheckId,
    pub source_path: PathBuf,
    pub metadata: Option<CheckMetadata>,
    /// Set when the check must not run in this batch; it is recorded as an
    /// `Error` result carrying this reason instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl BatchCheck {
    pub fn from_definition(definition: &CheckDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            source_path: definition.source_path.clone(),
            metadata: definition.metadata.clone(),
            rejection: None,
        }
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.rejection = Some(reason.into());
        self
    }
}

/// Ephemeral planning artifact: the checks sharing one service group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    pub group: ServiceGroup,
    pub checks: Vec<BatchCheck>,
    pub credentials: ScopedCredentials,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn check_ids(&self) -> impl Iterator<Item = &CheckId> {
        self.checks.iter().map(|check| &check.id)
    }
}

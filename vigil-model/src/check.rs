use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{CheckId, ModelError};

/// Severity tier declared in check metadata. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low", alias = "LOW", alias = "informational")]
    Low,
    #[serde(alias = "Medium", alias = "MEDIUM", alias = "moderate")]
    Medium,
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Critical", alias = "CRITICAL")]
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "informational" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(ModelError::InvalidSeverity(other.to_string())),
        }
    }
}

/// External dependency category a check needs. Client sessions of two
/// different groups are never loaded into the same isolation boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ServiceGroup {
    /// Mail transport and mailbox administration.
    #[serde(rename = "mail-service", alias = "mail")]
    Mail,
    /// Directory / identity graph API.
    #[serde(rename = "directory-service", alias = "directory")]
    Directory,
    /// Compliance / information-protection administration.
    #[serde(rename = "compliance-service", alias = "compliance")]
    Compliance,
    /// Collaboration, sharing and tenant-wide auxiliary settings.
    #[serde(rename = "platform-service", alias = "platform")]
    Platform,
}

impl ServiceGroup {
    /// Fixed batch execution order; also the precedence used when a check
    /// matches more than one group.
    pub const ORDER: [ServiceGroup; 4] = [
        ServiceGroup::Mail,
        ServiceGroup::Directory,
        ServiceGroup::Compliance,
        ServiceGroup::Platform,
    ];

    /// Group that receives checks with no recognisable dependency.
    pub const FALLBACK: ServiceGroup = ServiceGroup::Platform;

    pub const fn label(self) -> &'static str {
        match self {
            ServiceGroup::Directory => "directory-service",
            ServiceGroup::Mail => "mail-service",
            ServiceGroup::Compliance => "compliance-service",
            ServiceGroup::Platform => "platform-service",
        }
    }

    pub fn rank(self) -> usize {
        Self::ORDER
            .iter()
            .position(|group| *group == self)
            .unwrap_or(Self::ORDER.len())
    }
}

impl fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ServiceGroup {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "directory" | "directory-service" => Ok(Self::Directory),
            "mail" | "mail-service" => Ok(Self::Mail),
            "compliance" | "compliance-service" => Ok(Self::Compliance),
            "platform" | "platform-service" => Ok(Self::Platform),
            other => Err(ModelError::InvalidServiceGroup(other.to_string())),
        }
    }
}

/// Structured metadata embedded in a check unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(
        alias = "subsection",
        alias = "sub-section",
        skip_serializing_if = "Option::is_none"
    )]
    pub sub_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// Declared capability tags. When present they override text scanning.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceGroup>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A named, executable check plus its metadata. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: CheckId,
    pub source_path: PathBuf,
    /// Path relative to the technology directory, `/`-separated.
    pub relative_path: String,
    #[serde(skip)]
    pub source: String,
    pub metadata: Option<CheckMetadata>,
}

impl CheckDefinition {
    pub fn severity(&self) -> Option<Severity> {
        self.metadata.as_ref().and_then(|meta| meta.severity)
    }

    pub fn declared_services(&self) -> &[ServiceGroup] {
        self.metadata
            .as_ref()
            .map(|meta| meta.services.as_slice())
            .unwrap_or(&[])
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|meta| meta.title.as_deref())
    }
}

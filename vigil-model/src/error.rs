use std::fmt::{self, Display};

/// Errors produced by model parsers and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidStatus(String),
    InvalidSeverity(String),
    InvalidServiceGroup(String),
    InvalidEventType(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidStatus(value) => {
                write!(f, "invalid scan status: {value}")
            }
            ModelError::InvalidSeverity(value) => {
                write!(f, "invalid severity: {value}")
            }
            ModelError::InvalidServiceGroup(value) => {
                write!(f, "invalid service group: {value}")
            }
            ModelError::InvalidEventType(value) => {
                write!(f, "invalid scan stream event type: {value}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

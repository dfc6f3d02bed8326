//! Embedded metadata block parsing.
//!
//! A check unit carries its metadata as JSON between two marker lines:
//!
//! ```text
//! # vigil:metadata:begin
//! # {"id": "1.1.1", "severity": "high", "services": ["directory"]}
//! # vigil:metadata:end
//! ```
//!
//! Whatever precedes the begin marker on its line is treated as the comment
//! prefix and stripped from every enclosed line.

use thiserror::Error;
use vigil_model::CheckMetadata;

pub const BEGIN_MARKER: &str = "vigil:metadata:begin";
pub const END_MARKER: &str = "vigil:metadata:end";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata block is not terminated by `{END_MARKER}`")]
    Unterminated,

    #[error("metadata block is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Extract and decode the metadata block of `source`.
///
/// Returns `Ok(None)` when the unit has no block at all.
pub fn parse_metadata_block(
    source: &str,
) -> Result<Option<CheckMetadata>, MetadataError> {
    let mut lines = source.lines();
    let prefix = loop {
        let Some(line) = lines.next() else {
            return Ok(None);
        };
        if let Some(idx) = line.find(BEGIN_MARKER) {
            break line[..idx].trim().to_string();
        }
    };

    let mut body = String::new();
    let mut terminated = false;
    for line in lines {
        if line.contains(END_MARKER) {
            terminated = true;
            break;
        }
        body.push_str(strip_prefix(line, &prefix));
        body.push('\n');
    }

    if !terminated {
        return Err(MetadataError::Unterminated);
    }

    let metadata = serde_json::from_str(&body)?;
    Ok(Some(metadata))
}

fn strip_prefix<'a>(line: &'a str, prefix: &str) -> &'a str {
    let trimmed = line.trim_start();
    if prefix.is_empty() {
        return trimmed;
    }
    trimmed.strip_prefix(prefix).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::{ServiceGroup, Severity};

    #[test]
    fn parses_hash_commented_block() {
        let source = r#"
# vigil:metadata:begin
# {
#   "id": "1.1.1",
#   "severity": "high",
#   "title": "Ensure audit log search is enabled",
#   "services": ["mail"]
# }
# vigil:metadata:end
Get-AdminAuditLogConfig
"#;
        let meta = parse_metadata_block(source).unwrap().unwrap();
        assert_eq!(meta.id.as_deref(), Some("1.1.1"));
        assert_eq!(meta.severity, Some(Severity::High));
        assert_eq!(meta.services, vec![ServiceGroup::Mail]);
    }

    #[test]
    fn parses_uncommented_block_inside_block_comment() {
        let source = "<#\nvigil:metadata:begin\n{\"id\": \"x\"}\nvigil:metadata:end\n#>\n";
        let meta = parse_metadata_block(source).unwrap().unwrap();
        assert_eq!(meta.id.as_deref(), Some("x"));
    }

    #[test]
    fn slash_prefix_is_stripped() {
        let source = "// vigil:metadata:begin\n// {\"level\": \"L1\"}\n// vigil:metadata:end\n";
        let meta = parse_metadata_block(source).unwrap().unwrap();
        assert_eq!(meta.level.as_deref(), Some("L1"));
    }

    #[test]
    fn missing_block_is_not_an_error() {
        assert!(parse_metadata_block("Get-MgUser -All").unwrap().is_none());
    }

    #[test]
    fn unterminated_and_invalid_blocks_are_errors() {
        assert!(matches!(
            parse_metadata_block("# vigil:metadata:begin\n# {}\n"),
            Err(MetadataError::Unterminated)
        ));
        assert!(matches!(
            parse_metadata_block("# vigil:metadata:begin\n# {id\n# vigil:metadata:end\n"),
            Err(MetadataError::InvalidJson(_))
        ));
    }
}

//! Inbound frame decoding.

use serde::Deserialize;
use thiserror::Error;

const STATUS_UPDATE: &str = "status_update";

/// Wire form of one push frame.
#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    dataset_id: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// A decoded `status_update` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Resource id echoed by the server, if any.
    pub dataset_id: Option<String>,
    pub status: String,
    pub message: String,
}

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Not JSON, or missing the `type` field.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A `status_update` without a `status`.
    #[error("status update without a status")]
    MissingStatus,
}

/// Decodes one text frame.
///
/// `Ok(None)` for well-formed frames of any other type.
pub fn parse_frame(text: &str) -> Result<Option<StatusUpdate>, FrameError> {
    let frame: PushFrame =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

    if frame.kind != STATUS_UPDATE {
        return Ok(None);
    }

    let status = frame.status.ok_or(FrameError::MissingStatus)?;
    let dataset_id = frame.dataset_id.map(|id| match id {
        serde_json::Value::String(id) => id,
        other => other.to_string(),
    });

    Ok(Some(StatusUpdate {
        dataset_id,
        status,
        message: frame.message.unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update() {
        let update = parse_frame(
            r#"{"type": "status_update", "dataset_id": "42", "status": "processing", "message": "3/10"}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(update.dataset_id.as_deref(), Some("42"));
        assert_eq!(update.status, "processing");
        assert_eq!(update.message, "3/10");
    }

    #[test]
    fn test_message_defaults_to_empty() {
        let update = parse_frame(r#"{"type": "status_update", "dataset_id": 42, "status": "done"}"#)
            .unwrap()
            .unwrap();

        assert_eq!(update.message, "");
        assert_eq!(update.dataset_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_other_types_are_ignored() {
        assert_eq!(parse_frame(r#"{"type": "heartbeat"}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            parse_frame("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"status": "done"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert_eq!(
            parse_frame(r#"{"type": "status_update"}"#),
            Err(FrameError::MissingStatus)
        );
    }

    #[test]
    fn test_frame_error_display() {
        assert_eq!(
            FrameError::Malformed("expected value".to_string()).to_string(),
            "malformed frame: expected value"
        );
        assert_eq!(
            FrameError::MissingStatus.to_string(),
            "status update without a status"
        );
    }
}

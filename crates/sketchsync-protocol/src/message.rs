//! Protocol message types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sketchsync_core::{DocumentEvent, DocumentId, LogSnapshot, Stroke, ViewId};

/// Message sent by a view to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewMessage {
    /// The view was opened for a document
    Open { document: DocumentId },

    /// The view is ready to receive its initial state
    Ready,

    /// A completed, frozen stroke
    SubmitEdit { record: Stroke },

    RequestUndo,

    RequestRedo,

    /// Ask for the folded document bytes
    RequestMaterializedData { correlation_id: String },

    /// Materialize and write; `target` defaults to the document itself
    Save {
        correlation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<DocumentId>,
    },

    /// Drop every edit and reload from storage
    Revert,

    Ping,

    /// The view was closed
    Close,
}

impl ViewMessage {
    /// Short name for logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            ViewMessage::Open { .. } => "open",
            ViewMessage::Ready => "ready",
            ViewMessage::SubmitEdit { .. } => "submit_edit",
            ViewMessage::RequestUndo => "request_undo",
            ViewMessage::RequestRedo => "request_redo",
            ViewMessage::RequestMaterializedData { .. } => "request_materialized_data",
            ViewMessage::Save { .. } => "save",
            ViewMessage::Revert => "revert",
            ViewMessage::Ping => "ping",
            ViewMessage::Close => "close",
        }
    }
}

/// Message sent by the authority to a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Acknowledges `Open`
    Attached { view_id: ViewId, document: DocumentId },

    /// Full state, unicast after `Ready` and after a revert
    InitialState {
        revision: u64,
        #[serde(with = "base64_bytes")]
        initial_content: Bytes,
        log: LogSnapshot,
    },

    /// Full authoritative log, broadcast after every mutation
    LogUpdated { revision: u64, log: LogSnapshot },

    MaterializedDataResponse {
        correlation_id: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },

    Saved {
        correlation_id: String,
        target: DocumentId,
        revision: u64,
    },

    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    Pong,
}

impl HostMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        HostMessage::Error {
            code: code.into(),
            message: message.into(),
            correlation_id: None,
        }
    }

    /// Error reply for a failed core operation
    pub fn error_from(err: &sketchsync_core::Error, correlation_id: Option<String>) -> Self {
        HostMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            correlation_id,
        }
    }

    /// Message a view receives for a document event.
    ///
    /// A reset carries new initial content, so it is delivered as full state.
    pub fn from_event(event: &DocumentEvent) -> Self {
        match &event.initial_content {
            Some(content) => HostMessage::InitialState {
                revision: event.revision,
                initial_content: content.clone(),
                log: event.log.clone(),
            },
            None => HostMessage::LogUpdated {
                revision: event.revision,
                log: event.log.clone(),
            },
        }
    }

    /// Short name for logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            HostMessage::Attached { .. } => "attached",
            HostMessage::InitialState { .. } => "initial_state",
            HostMessage::LogUpdated { .. } => "log_updated",
            HostMessage::MaterializedDataResponse { .. } => "materialized_data_response",
            HostMessage::Saved { .. } => "saved",
            HostMessage::Error { .. } => "error",
            HostMessage::Pong => "pong",
        }
    }
}

/// Serde adapter carrying `Bytes` as a standard base64 string
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchsync_core::{EditKind, Point};

    #[test]
    fn test_view_message_wire_shape() {
        let msg = ViewMessage::SubmitEdit {
            record: Stroke::new("red", vec![Point(0.0, 0.0), Point(1.0, 1.0)]).unwrap(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"submit_edit","record":{"color":"red","points":[[0.0,0.0],[1.0,1.0]]}}"#
        );
    }

    #[test]
    fn test_parse_unit_messages() {
        let msg: ViewMessage = serde_json::from_str(r#"{"type":"request_undo"}"#).unwrap();
        assert_eq!(msg, ViewMessage::RequestUndo);

        let msg: ViewMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(msg, ViewMessage::Ready);
    }

    #[test]
    fn test_save_target_is_optional() {
        let msg: ViewMessage =
            serde_json::from_str(r#"{"type":"save","correlation_id":"c1"}"#).unwrap();
        assert_eq!(
            msg,
            ViewMessage::Save {
                correlation_id: "c1".into(),
                target: None
            }
        );
    }

    #[test]
    fn test_invalid_document_id_rejected() {
        let result = serde_json::from_str::<ViewMessage>(r#"{"type":"open","document":""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_payload_is_base64() {
        let msg = HostMessage::MaterializedDataResponse {
            correlation_id: "42".into(),
            data: Bytes::from_static(b"\x89PNG"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""data":"iVBORw==""#));

        let back: HostMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_error_echoes_correlation_id() {
        let msg = HostMessage::error_from(&sketchsync_core::Error::Render("bad".into()), Some("9".into()));
        match msg {
            HostMessage::Error {
                code,
                correlation_id,
                ..
            } => {
                assert_eq!(code, "RENDER_ERROR");
                assert_eq!(correlation_id.as_deref(), Some("9"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_from_event() {
        let event = DocumentEvent {
            kind: EditKind::Applied,
            revision: 4,
            log: LogSnapshot::default(),
            initial_content: None,
        };
        assert!(matches!(
            HostMessage::from_event(&event),
            HostMessage::LogUpdated { revision: 4, .. }
        ));

        let reset = DocumentEvent {
            kind: EditKind::Reset,
            initial_content: Some(Bytes::from_static(b"x")),
            ..event
        };
        assert!(matches!(
            HostMessage::from_event(&reset),
            HostMessage::InitialState { revision: 4, .. }
        ));
    }
}

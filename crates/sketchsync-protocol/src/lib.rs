//! Sketchsync protocol - the message contract between views and the authority
//!
//! Every frame is one JSON object on its own line, tagged by `type`.
//! Binary payloads travel base64-encoded.
//!
//! ## View -> Authority
//! ```text
//! {"type":"open","document":"cat.png"}
//! {"type":"ready"}
//! {"type":"submit_edit","record":{"color":"red","points":[[0,0],[1,1]]}}
//! {"type":"request_undo"}
//! {"type":"request_materialized_data","correlation_id":"7"}
//! ```
//!
//! ## Authority -> View
//! ```text
//! {"type":"attached","view_id":3,"document":"cat.png"}
//! {"type":"initial_state","revision":0,"initial_content":"iVBORw0...","log":[]}
//! {"type":"log_updated","revision":1,"log":[{"color":"red","points":[[0,0],[1,1]]}]}
//! {"type":"error","code":"NOTHING_TO_UNDO","message":"Nothing to undo"}
//! ```

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{encode, encode_into, FrameConfig, FrameDecoder, DEFAULT_MAX_FRAME_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{HostMessage, ViewMessage};

/// Wire error codes that do not originate in the core
pub mod codes {
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const FRAME_TOO_LARGE: &str = "FRAME_TOO_LARGE";
    pub const NOT_ATTACHED: &str = "NOT_ATTACHED";
    pub const ALREADY_ATTACHED: &str = "ALREADY_ATTACHED";
    pub const NOT_READY: &str = "NOT_READY";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
}

//! AG-UI protocol support: run input types, request decoding, wire events,
//! and server-sent-event encoding.
//!
//! See <https://docs.ag-ui.com/concepts/events> for the event vocabulary.

pub mod convert;
pub mod decode;
pub mod encoder;
pub mod events;
pub mod types;

pub use convert::{ConvertedHistory, convert_messages};
pub use decode::{ErrorDetail, ErrorKind, LocSegment, ValidationError, decode_run_input};
pub use encoder::{EventEncoder, SSE_CONTENT_TYPE, encode_stream};
pub use events::Event;
pub use types::{Context, FunctionCall, Message, Role, RunAgentInput, Tool, ToolCall};

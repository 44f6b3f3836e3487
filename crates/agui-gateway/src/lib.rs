//! HTTP gateway serving the AG-UI protocol.
//!
//! Each `POST /ag-ui` request is decoded, its client state reconciled, and a
//! run of the shared [`agui_agent::Agent`] spawned. The run's events are
//! transcoded to AG-UI events and streamed back as server-sent events.

pub mod handler;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod transcoder;

pub use server::{router, start_gateway};
pub use state::GatewayState;
pub use transcoder::AgUiEventContext;

//! Application Ports (Driven)
//!
//! - **Token source**: where the DXLink URL and feed token come from
//! - **Event sink**: where a connection task delivers its feed events

mod event_sink_port;
mod token_source_port;

pub use event_sink_port::FeedEventSink;
#[cfg(test)]
pub use token_source_port::MockFeedTokenSource;
pub use token_source_port::{ConnectionInfo, FeedTokenSource, StaticTokenSource, TokenSourceError};

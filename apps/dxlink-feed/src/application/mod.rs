//! Application Layer
//!
//! Ports the feed client depends on (token source, event sink) and the
//! services that coordinate them before a connection is opened.

pub mod ports;
pub mod services;

//! Application Services
//!
//! Coordination that runs before a feed connection is opened.

mod connection_resolver;

pub use connection_resolver::resolve_connection;

//! Domain Layer
//!
//! Pure types with no I/O: subscription specs and field schemas, decoded
//! feed records, and historical request/result shaping.

pub mod history;
pub mod streaming;
pub mod subscription;

//! Routes owned by the service itself.
pub mod status;

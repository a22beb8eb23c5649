//! Data transfer objects returned by the HTTP handlers.

pub mod response;

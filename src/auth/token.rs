//! Token-level primitives shared by grants and outbound authorization.

pub mod secret;

//! Extensions around the core flows: outbound request signing and confirmation throttling.

pub mod rate_limit;
pub mod request_signer;

pub use rate_limit::*;
pub use request_signer::*;

//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering HTTPS-only token,
//! authorization and refresh endpoints, enabled grants, client authentication placement, and
//! provider quirks (body encoding, refresh request shape, PKCE, scope delimiter).
//! `strategy` defines [`ProviderStrategy`], which decorates outgoing token requests and maps
//! provider failures onto the recovery table used by the token manager.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;

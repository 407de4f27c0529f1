//! Trust and credential core for integration gateways: signature authentication, prioritized
//! RSA trust keys, OAuth 2.0 grant lifecycles, TTL-backed credential caches, scheduled
//! re-issuing, and output harmonization in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod ext;
pub mod flows;
pub mod harmonize;
pub mod http;
pub mod interactive;
pub mod oauth;
pub mod obs;
pub mod plugin;
pub mod provider;
pub mod schedule;
pub mod signature;
pub mod trust;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::ProductCode,
		cache::CredentialCache,
		flows::{CredentialProfile, TokenManager},
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	};

	/// Token manager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`TokenManager`] backed by a fresh credential cache, the default provider
	/// strategy, and the reqwest transport used across integration tests.
	pub fn build_reqwest_test_manager(
		identity: &str,
		descriptor: ProviderDescriptor,
		profile: CredentialProfile,
	) -> (ReqwestTestManager, Arc<CredentialCache>) {
		let cache = Arc::new(CredentialCache::default());
		let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);
		let identity = ProductCode::new(identity).expect("Test product code should be valid.");
		let manager = TokenManager::with_http_client(
			identity,
			cache.clone(),
			descriptor,
			strategy,
			profile,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		);

		(manager, cache)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		net::IpAddr,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
	pub use serde_json::{Map as JsonMap, Value};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;

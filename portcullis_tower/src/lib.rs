//! Request gating for `tower_http` and other constructs in the ecosystem,
//! including `axum`.
//!
//! A [`TokenGate`] inspects the decoded bearer token that upstream
//! authentication attached to each request as a
//! [`DecodedToken`](portcullis_oauth2::DecodedToken), and refuses requests
//! whose scopes, audience, or organization do not pass the configured
//! policies.
//!
//! ```
//! use axum::{body::Body, routing::get, Router};
//! use portcullis_oauth2::{scope, RestrictionCache, ScopePolicy};
//! use portcullis_tower::{TokenGate, ValidationError};
//!
//! let cache = RestrictionCache::new();
//!
//! let gate = TokenGate::new()
//!     .with_scope_policy(
//!         ScopePolicy::new()
//!             .require(scope!["api.ocm"])
//!             .deny(scope!["offline_access"]),
//!     )
//!     .with_restriction_cache(cache.clone())
//!     .with_json_error_handler::<Body>()
//!     .with_callback(|request: &http::Request<Body>, error: Option<&ValidationError>| {
//!         if let Some(error) = error {
//!             eprintln!("{} {} refused: {error}", request.method(), request.uri());
//!         }
//!     });
//!
//! let app: Router = Router::new()
//!     .route("/clusters", get(list_clusters))
//!     .layer(gate);
//! #
//! # async fn list_clusters() {}
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod claims;
mod gate;
mod handlers;
pub mod util;

pub use claims::{extract_claims, ClaimsError};
pub use gate::{TokenGate, ValidationError};
pub use handlers::{CallbackFn, JsonErrorHandler, OnValidation, TerseErrorHandler};

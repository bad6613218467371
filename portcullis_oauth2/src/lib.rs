//! Bearer-token authorization policies over OAuth2 scopes and
//! organization restrictions
//!
//! This crate holds the request-independent half of an authorization gate:
//!
//! * [`ScopePolicy`] checks the scopes a token asserts against a set of
//!   required and denied scopes.
//! * [`AudiencePolicy`] checks the token audience against an approved list.
//! * [`RestrictionCache`] holds the organizations whose offline-access
//!   tokens are refused, and [`OfflineAccessPolicy`] applies it.
//! * [`RestrictionRefresher`] keeps the cache current from a remote
//!   [`AuthorizationService`](accounts::AuthorizationService).
//!
//! Tokens are decoded and verified upstream. Everything here reads the
//! resulting [`Claims`].
//!
//! # Feature flags
//!
//! The `reqwest` feature enables [`AccountsClient`](accounts::AccountsClient),
//! a client for the remote account management service. This crate does not
//! enable TLS support in `reqwest` itself. If your application already uses
//! `reqwest` with some TLS settings, those settings are used automatically.
//! Otherwise, enable the `default-tls` or `rustls-tls` feature to call out to
//! an HTTPS endpoint.
//!
//! The `tokio` feature enables the background [`RestrictionRefresher`].

#![cfg_attr(docsrs, feature(doc_cfg))]
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

pub mod accounts;
mod audience;
mod claims;
mod config;
mod policy;
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
mod refresh;
mod restriction;
pub mod scope;

pub use audience::{AudiencePolicy, InvalidAudience, DEFAULT_APPROVED_AUDIENCES};
pub use claims::{
    Claims, DecodedToken, InvalidToken, OrganizationId, OrganizationIdRef, AUDIENCE_CLAIM,
    MACHINE_IDENTITY_CLAIMS, ORGANIZATION_ID_CLAIMS, SCOPE_CLAIM,
};
pub use config::{
    GateConfig, DEFAULT_ENFORCEMENT_FLAG, DEFAULT_OFFLINE_ACCESS_CAPABILITY,
    DEFAULT_REFRESH_INTERVAL,
};
pub use policy::{ScopeDenial, ScopePolicy};
#[cfg(feature = "tokio")]
pub use refresh::{RefreshError, RefreshHandle, RefreshState, RestrictionRefresher};
pub use restriction::{
    OfflineAccessPolicy, OrganizationRestricted, RestrictedOrganizations, RestrictionCache,
    OFFLINE_ACCESS_SCOPE,
};
pub use scope::{InvalidScopeToken, Scope, ScopeToken, ScopeTokenRef};

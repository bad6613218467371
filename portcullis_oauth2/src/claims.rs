//! Claims carried by an already-decoded bearer token
//!
//! Token decoding and signature verification happen upstream. The decoder
//! leaves a [`DecodedToken`] in the request-scoped value bag, and everything
//! in this crate reads from the [`Claims`] view over its payload.

use aliri_braid::braid;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::Scope;

/// Claim keys that identify a machine (service account) identity
///
/// Both spellings have been issued historically and both must be checked.
pub const MACHINE_IDENTITY_CLAIMS: [&str; 2] = ["client_id", "clientId"];

/// Claim holding the space-delimited scope list
pub const SCOPE_CLAIM: &str = "scope";

/// Claim holding the audience, either a string or an array of strings
pub const AUDIENCE_CLAIM: &str = "aud";

/// Candidate lookups for the organization identifier, in priority order
///
/// Each entry is a path of nested object keys; the first path that resolves
/// to a string wins.
pub const ORGANIZATION_ID_CLAIMS: [&[&str]; 2] = [&["org_id"], &["organization", "id"]];

/// An organization's external identifier, as carried in token claims
#[braid(serde, ref_doc = "A borrowed reference to an [`OrganizationId`]")]
pub struct OrganizationId;

/// The token payload could not be interpreted as a set of claims
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("token payload is not a claim set")]
pub struct InvalidToken;

/// A decoded token as placed in the request-scoped value bag
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedToken {
    payload: Value,
}

impl DecodedToken {
    /// Wraps a decoded token payload
    #[inline]
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The raw decoded payload
    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Interprets the payload as a claim set
    ///
    /// # Errors
    ///
    /// Returns [`InvalidToken`] if the payload is not a JSON object.
    pub fn claims(&self) -> Result<Claims, InvalidToken> {
        match &self.payload {
            Value::Object(map) => Ok(Claims { map: map.clone() }),
            _ => Err(InvalidToken),
        }
    }
}

impl From<Value> for DecodedToken {
    #[inline]
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

/// A read-only mapping from claim name to value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claims {
    map: Map<String, Value>,
}

impl Claims {
    /// Wraps an existing claim map
    #[inline]
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    /// Looks up a raw claim value
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// The scopes asserted by the token
    ///
    /// An absent or non-string `scope` claim asserts no scopes. An array of
    /// strings is also accepted.
    pub fn scope(&self) -> Scope {
        match self.map.get(SCOPE_CLAIM) {
            Some(Value::String(s)) => Scope::from_claim_lossy(s),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(Scope::from_claim_lossy)
                .collect(),
            _ => Scope::empty(),
        }
    }

    /// Whether the token belongs to a machine identity
    ///
    /// True if any of [`MACHINE_IDENTITY_CLAIMS`] is present, whatever its
    /// value.
    pub fn is_machine_identity(&self) -> bool {
        MACHINE_IDENTITY_CLAIMS
            .iter()
            .any(|key| self.map.contains_key(*key))
    }

    /// The external identifier of the token's organization
    ///
    /// Checks each of [`ORGANIZATION_ID_CLAIMS`] in order.
    pub fn organization_id(&self) -> Option<&OrganizationIdRef> {
        ORGANIZATION_ID_CLAIMS
            .iter()
            .find_map(|path| self.lookup_str(path))
            .map(OrganizationIdRef::from_str)
    }

    /// The audiences the token was issued for
    pub fn audiences(&self) -> Vec<&str> {
        match self.map.get(AUDIENCE_CLAIM) {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    fn lookup_str(&self, path: &[&str]) -> Option<&str> {
        let (first, rest) = path.split_first()?;
        let mut value = self.map.get(*first)?;
        for key in rest {
            value = value.as_object()?.get(*key)?;
        }
        value.as_str()
    }
}

impl From<Map<String, Value>> for Claims {
    #[inline]
    fn from(map: Map<String, Value>) -> Self {
        Self::new(map)
    }
}

use std::fmt;

use portcullis_traits::Policy;
use thiserror::Error;

use crate::{Claims, Scope, ScopeToken};

/// Indicates the token's asserted scopes do not satisfy a [`ScopePolicy`]
#[derive(Clone, Debug, Hash, Eq, PartialEq, Error)]
pub enum ScopeDenial {
    /// The token is missing one or more required scopes
    #[error("token is missing required scopes: {}", DisplayTokens(.0))]
    MissingRequiredScopes(Vec<ScopeToken>),
    /// The token asserts one or more denied scopes
    #[error("token contains unauthorized scopes: {}", DisplayTokens(.0))]
    UnauthorizedScopes(Vec<ScopeToken>),
}

impl ScopeDenial {
    /// The scope tokens that caused the denial
    pub fn scopes(&self) -> &[ScopeToken] {
        match self {
            Self::MissingRequiredScopes(s) | Self::UnauthorizedScopes(s) => s,
        }
    }
}

struct DisplayTokens<'a>(&'a [ScopeToken]);

impl fmt::Display for DisplayTokens<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("[")?;
        for (idx, token) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            f.write_str(token.as_str())?;
        }
        f.write_str("]")
    }
}

/// An access policy over the scopes asserted by a token
///
/// The policy holds a set of required scopes, all of which must be asserted,
/// and a set of denied scopes, none of which may be asserted. When both sets
/// are empty the policy allows every request without looking at the claims.
///
/// Machine identities are exempt unless
/// [`enforce_on_machine_identities`](ScopePolicy::enforce_on_machine_identities)
/// is set.
///
/// # Examples
///
/// ```
/// use portcullis_traits::Policy;
/// use portcullis_oauth2::{scope, Claims, ScopeDenial, ScopePolicy};
/// use serde_json::json;
///
/// let policy = ScopePolicy::new()
///     .require(scope!["api.ocm"])
///     .deny(scope!["offline_access"]);
///
/// let claims = Claims::from(json!({ "scope": "openid api.ocm" }).as_object().unwrap().clone());
/// assert!(policy.evaluate(&claims).is_ok());
///
/// let claims = Claims::from(json!({ "scope": "openid" }).as_object().unwrap().clone());
/// assert!(matches!(
///     policy.evaluate(&claims),
///     Err(ScopeDenial::MissingRequiredScopes(_))
/// ));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct ScopePolicy {
    required: Scope,
    denied: Scope,
    enforce_on_machine_identities: bool,
}

impl ScopePolicy {
    /// Constructs a policy with nothing to check
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds scopes that every token must assert
    #[inline]
    pub fn require(mut self, scope: Scope) -> Self {
        self.required.extend(scope);
        self
    }

    /// Adds scopes that no token may assert
    #[inline]
    pub fn deny(mut self, scope: Scope) -> Self {
        self.denied.extend(scope);
        self
    }

    /// Applies the policy to machine identities as well
    #[inline]
    pub fn enforce_on_machine_identities(mut self, enforce: bool) -> Self {
        self.enforce_on_machine_identities = enforce;
        self
    }

    /// The scopes that every token must assert
    #[inline]
    pub fn required(&self) -> &Scope {
        &self.required
    }

    /// The scopes that no token may assert
    #[inline]
    pub fn denied(&self) -> &Scope {
        &self.denied
    }

    /// Whether machine identities are subject to the policy
    #[inline]
    pub fn enforces_on_machine_identities(&self) -> bool {
        self.enforce_on_machine_identities
    }

    /// Whether the policy has nothing configured to check
    ///
    /// Callers check this before extracting claims so that routes without a
    /// policy never fail on a missing token.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.denied.is_empty()
    }

    /// Evaluates the scopes held by a token against this policy
    ///
    /// Required scopes are checked before denied scopes, and a missing
    /// required scope takes priority when both checks would fail.
    pub fn evaluate_scope(&self, held: &Scope) -> Result<(), ScopeDenial> {
        if !held.contains_all(&self.required) {
            return Err(ScopeDenial::MissingRequiredScopes(
                self.required.missing_from(held),
            ));
        }

        let unauthorized = self.denied.present_in(held);
        if unauthorized.is_empty() {
            Ok(())
        } else {
            Err(ScopeDenial::UnauthorizedScopes(unauthorized))
        }
    }
}

impl Policy for ScopePolicy {
    type Request = Claims;
    type Denial = ScopeDenial;

    fn evaluate(&self, claims: &Self::Request) -> Result<(), Self::Denial> {
        if self.is_empty() {
            return Ok(());
        }

        if !self.enforce_on_machine_identities && claims.is_machine_identity() {
            tracing::trace!("machine identity exempt from scope policy");
            return Ok(());
        }

        let held = claims.scope();
        tracing::trace!(scope = %held.to_claim_string(), policy = ?self, "evaluating scope policy");
        self.evaluate_scope(&held)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
    use serde_json::{json, Value};

    use super::*;
    use crate::scope;

    fn claims(value: Value) -> Claims {
        Claims::from(value.as_object().unwrap().clone())
    }

    fn user_token(scope: &str) -> Claims {
        claims(json!({ "scope": scope, "org_id": "123456" }))
    }

    fn machine_token(client_id_key: &str, scope: &str) -> Claims {
        claims(json!({ client_id_key: "1234", "scope": scope }))
    }

    #[test]
    fn empty_policy_allows_anything() {
        let policy = ScopePolicy::new();
        assert!(policy.is_empty());
        assert!(policy.evaluate(&Claims::default()).is_ok());
        assert!(policy.evaluate(&user_token("offline_access")).is_ok());
        assert!(policy.evaluate(&machine_token("client_id", "")).is_ok());
    }

    #[test]
    fn valid_required_scopes() {
        let policy = ScopePolicy::new().require(scope!["api.ocm"]);
        assert!(policy.evaluate(&user_token("openid api.ocm")).is_ok());
    }

    #[test]
    fn invalid_required_scopes() {
        let policy = ScopePolicy::new().require(scope!["api.ocm"]);
        let err = policy.evaluate(&user_token("openid")).unwrap_err();
        assert_eq!(
            err,
            ScopeDenial::MissingRequiredScopes(vec![ScopeToken::from_static("api.ocm")])
        );
        assert_eq!(err.to_string(), "token is missing required scopes: [api.ocm]");
    }

    #[test]
    fn absent_scope_claim_fails_required_scopes() {
        let policy = ScopePolicy::new().require(scope!["api.ocm"]);
        let err = policy.evaluate(&claims(json!({ "org_id": "1" }))).unwrap_err();
        assert!(matches!(err, ScopeDenial::MissingRequiredScopes(_)));
    }

    #[test]
    fn valid_deny_scopes() {
        let policy = ScopePolicy::new().deny(scope!["offline_access"]);
        assert!(policy.evaluate(&user_token("openid api.ocm")).is_ok());
    }

    #[test]
    fn invalid_deny_scopes() {
        let policy = ScopePolicy::new().deny(scope!["offline_access"]);
        let err = policy
            .evaluate(&user_token("openid api.ocm offline_access"))
            .unwrap_err();
        assert_eq!(
            err,
            ScopeDenial::UnauthorizedScopes(vec![ScopeToken::from_static("offline_access")])
        );
    }

    #[test]
    fn required_failure_takes_priority_over_denied() {
        let policy = ScopePolicy::new()
            .require(scope!["api.ocm"])
            .deny(scope!["offline_access"]);
        let err = policy
            .evaluate(&user_token("openid offline_access"))
            .unwrap_err();
        assert!(matches!(err, ScopeDenial::MissingRequiredScopes(_)));
    }

    #[test]
    fn machine_identities_are_exempt_by_default() {
        let policy = ScopePolicy::new().deny(scope!["offline_access"]);
        for key in ["client_id", "clientId"] {
            assert!(policy
                .evaluate(&machine_token(key, "openid offline_access"))
                .is_ok());
        }
    }

    #[test]
    fn machine_identities_are_checked_when_enforced() {
        let policy = ScopePolicy::new()
            .require(scope!["api.ocm"])
            .enforce_on_machine_identities(true);
        for key in ["client_id", "clientId"] {
            assert!(policy.evaluate(&machine_token(key, "openid api.ocm")).is_ok());
            assert!(matches!(
                policy.evaluate(&machine_token(key, "openid")),
                Err(ScopeDenial::MissingRequiredScopes(_))
            ));
        }
    }

    #[test]
    fn superset_of_required_and_disjoint_from_denied_always_passes() {
        const UNIVERSE: [&str; 12] = [
            "openid",
            "api.ocm",
            "api.iam",
            "offline_access",
            "profile",
            "email",
            "roles",
            "web-origins",
            "api.console",
            "api.billing",
            "rhfull",
            "id.idp",
        ];

        let mut rng = StdRng::seed_from_u64(0x5C09E);

        for _ in 0..500 {
            let mut universe = UNIVERSE.to_vec();
            universe.shuffle(&mut rng);

            let denied_len = rng.gen_range(0..4);
            let (denied, allowed) = universe.split_at(denied_len);

            let required_len = rng.gen_range(0..=allowed.len().min(5));
            let required = &allowed[..required_len];

            let extra: Vec<_> = allowed[required_len..]
                .iter()
                .filter(|_| rng.gen_bool(0.5))
                .copied()
                .collect();

            let policy = ScopePolicy::new()
                .require(required.iter().copied().map(ScopeToken::from_static).collect())
                .deny(denied.iter().copied().map(ScopeToken::from_static).collect());

            let mut asserted: Vec<_> = required.iter().chain(&extra).copied().collect();
            asserted.shuffle(&mut rng);
            let token = user_token(&asserted.join(" "));

            assert!(
                policy.evaluate(&token).is_ok(),
                "policy {policy:?} rejected {asserted:?}"
            );
        }
    }
}

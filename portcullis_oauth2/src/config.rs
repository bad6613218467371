use std::time::Duration;

use serde::Deserialize;

use crate::{AudiencePolicy, Scope, ScopePolicy};

/// How often restricted organizations are refreshed by default
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// The label key marking an organization's offline access as restricted
pub const DEFAULT_OFFLINE_ACCESS_CAPABILITY: &str =
    "capability.organization.restrict_offline_access";

/// The feature toggle that turns restriction enforcement on
pub const DEFAULT_ENFORCEMENT_FLAG: &str = "ocm-enforce-offline-token-restrictions";

/// Declarative configuration for an authorization gate
///
/// Every field has a default, so an empty document yields a gate that lets
/// every request through while restrictions stay unenforced.
///
/// ```
/// use portcullis_oauth2::GateConfig;
///
/// let config: GateConfig = serde_json::from_str(r#"{
///     "required_scopes": "api.ocm",
///     "denied_scopes": ["offline_access"],
///     "refresh_interval_secs": 60
/// }"#).unwrap();
///
/// assert!(!config.scope_policy().is_empty());
/// assert_eq!(config.refresh_interval().as_secs(), 60);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Scopes that every token must assert
    pub required_scopes: Scope,
    /// Scopes that no token may assert
    pub denied_scopes: Scope,
    /// Audiences accepted by the gate; empty disables the audience check
    pub approved_audiences: Vec<String>,
    /// Whether machine identities are subject to the scope policy
    pub enforce_on_machine_identities: bool,
    /// Whether a request without a decoded token is rejected
    pub error_on_missing_token: bool,
    /// Whether every check is skipped
    pub disable_validation: bool,
    /// Seconds between restriction refreshes
    pub refresh_interval_secs: u64,
    /// The label key marking restricted organizations
    pub offline_access_capability_key: String,
    /// The feature toggle that turns enforcement on
    pub enforcement_feature_flag: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            required_scopes: Scope::empty(),
            denied_scopes: Scope::empty(),
            approved_audiences: Vec::new(),
            enforce_on_machine_identities: false,
            error_on_missing_token: false,
            disable_validation: false,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            offline_access_capability_key: DEFAULT_OFFLINE_ACCESS_CAPABILITY.to_owned(),
            enforcement_feature_flag: DEFAULT_ENFORCEMENT_FLAG.to_owned(),
        }
    }
}

impl GateConfig {
    /// The scope policy described by this configuration
    pub fn scope_policy(&self) -> ScopePolicy {
        ScopePolicy::new()
            .require(self.required_scopes.clone())
            .deny(self.denied_scopes.clone())
            .enforce_on_machine_identities(self.enforce_on_machine_identities)
    }

    /// The audience policy described by this configuration
    pub fn audience_policy(&self) -> AudiencePolicy {
        self.approved_audiences.iter().cloned().collect()
    }

    /// The interval between restriction refreshes
    ///
    /// A zero interval falls back to [`DEFAULT_REFRESH_INTERVAL`].
    pub fn refresh_interval(&self) -> Duration {
        match self.refresh_interval_secs {
            0 => DEFAULT_REFRESH_INTERVAL,
            secs => Duration::from_secs(secs),
        }
    }

    /// A refresher over `cache` using this configuration's interval, label
    /// key, and feature toggle
    ///
    /// No service is attached; add one with
    /// [`with_service`](crate::RestrictionRefresher::with_service).
    #[cfg(feature = "tokio")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    pub fn refresher(&self, cache: crate::RestrictionCache) -> crate::RestrictionRefresher {
        crate::RestrictionRefresher::new(cache)
            .with_interval(self.refresh_interval())
            .with_capability_key(self.offline_access_capability_key.clone())
            .with_enforcement_flag(self.enforcement_feature_flag.clone())
    }
}

#[cfg(test)]
mod tests {
    use portcullis_traits::Policy;
    use serde_json::json;

    use super::*;
    use crate::{scope, Claims};

    #[test]
    fn empty_document_yields_defaults() {
        let config: GateConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, GateConfig::default());
        assert!(config.scope_policy().is_empty());
        assert!(config.audience_policy().is_empty());
        assert_eq!(config.refresh_interval(), DEFAULT_REFRESH_INTERVAL);
        assert_eq!(
            config.offline_access_capability_key,
            DEFAULT_OFFLINE_ACCESS_CAPABILITY
        );
        assert_eq!(config.enforcement_feature_flag, DEFAULT_ENFORCEMENT_FLAG);
    }

    #[test]
    fn policies_follow_configuration() {
        let config: GateConfig = serde_json::from_value(json!({
            "required_scopes": "api.ocm",
            "denied_scopes": "offline_access",
            "approved_audiences": ["ocm-cli"],
            "enforce_on_machine_identities": true,
        }))
        .unwrap();

        let policy = config.scope_policy();
        assert_eq!(policy.required(), &scope!["api.ocm"]);
        assert_eq!(policy.denied(), &scope!["offline_access"]);
        assert!(policy.enforces_on_machine_identities());

        let claims = Claims::from(
            json!({ "aud": "ocm-cli" })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        assert!(config.audience_policy().evaluate(&claims).is_ok());
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        let config = GateConfig {
            refresh_interval_secs: 0,
            ..GateConfig::default()
        };
        assert_eq!(config.refresh_interval(), DEFAULT_REFRESH_INTERVAL);
    }

    #[test]
    fn malformed_scope_is_rejected() {
        let result: Result<GateConfig, _> =
            serde_json::from_value(json!({ "required_scopes": "api.\"ocm\"" }));
        assert!(result.is_err());
    }
}

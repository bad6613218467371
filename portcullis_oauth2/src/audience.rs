use portcullis_traits::Policy;
use thiserror::Error;

use crate::Claims;

/// Audiences that are allowed to reach resource servers by default
///
/// * `cloud-services`: default UI and offline token client
/// * `ocm-cli`: command-line tool authorizations
/// * `customer-portal`: support case management
/// * `console-dot`: default FedRAMP client
pub const DEFAULT_APPROVED_AUDIENCES: [&str; 4] =
    ["cloud-services", "ocm-cli", "customer-portal", "console-dot"];

/// The token audience does not match any approved audience
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("token audience does not match any approved audience")]
pub struct InvalidAudience;

/// An access policy over the `aud` claim
///
/// An empty policy performs no check. Machine identities carry no audience
/// and are always allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct AudiencePolicy {
    approved: Vec<String>,
}

impl AudiencePolicy {
    /// Constructs a policy that performs no audience check
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a policy approving [`DEFAULT_APPROVED_AUDIENCES`]
    pub fn default_approved() -> Self {
        DEFAULT_APPROVED_AUDIENCES.iter().copied().collect()
    }

    /// Adds an approved audience
    #[inline]
    pub fn approve(mut self, audience: impl Into<String>) -> Self {
        self.approved.push(audience.into());
        self
    }

    /// The approved audiences
    #[inline]
    pub fn approved(&self) -> &[String] {
        &self.approved
    }

    /// Whether the policy has nothing configured to check
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.approved.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AudiencePolicy {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            approved: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Policy for AudiencePolicy {
    type Request = Claims;
    type Denial = InvalidAudience;

    fn evaluate(&self, claims: &Self::Request) -> Result<(), Self::Denial> {
        if self.is_empty() || claims.is_machine_identity() {
            return Ok(());
        }

        let audiences = claims.audiences();
        if self
            .approved
            .iter()
            .any(|approved| audiences.contains(&approved.as_str()))
        {
            Ok(())
        } else {
            tracing::trace!(?audiences, approved = ?self.approved, "no approved audience");
            Err(InvalidAudience)
        }
    }
}

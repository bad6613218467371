//! The remote account management and feature-toggle service
//!
//! Organizations are restricted by attaching an internal capability label
//! to them in account management. Labels are keyed by the organization's
//! internal identifier, while tokens carry the external identifier, so the
//! restricted set is resolved in two hops: labels, then organizations.

use std::{error, fmt};

use aliri_braid::braid;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::OrganizationId;

#[cfg(feature = "reqwest")]
mod remote;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use remote::{AccessToken, AccessTokenRef, AccountsClient, DEFAULT_PAGE_SIZE, MAX_PAGES};

/// An organization's internal identifier within account management
#[braid(serde, ref_doc = "A borrowed reference to an [`InternalOrganizationId`]")]
pub struct InternalOrganizationId;

/// The name of a feature toggle
#[braid(serde, ref_doc = "A borrowed reference to a [`Feature`]")]
pub struct Feature;

/// A label attached to a resource in account management
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// The internal identifier of the labeled organization, if the label is
    /// attached to one
    #[serde(default)]
    pub organization_id: Option<InternalOrganizationId>,
    /// The label key
    pub key: String,
    /// The label value
    #[serde(default)]
    pub value: String,
    /// Whether the label is internal-only
    #[serde(default)]
    pub internal: bool,
}

/// An organization in account management
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// The internal identifier
    pub id: InternalOrganizationId,
    /// The external identifier, as carried in token claims
    #[serde(default)]
    pub external_id: Option<OrganizationId>,
}

/// A search for labels by key, value, and visibility
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelQuery {
    key: String,
    value: String,
    internal: bool,
}

impl LabelQuery {
    /// Searches for internal labels with the given key set to `"true"`
    pub fn capability(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::from("true"),
            internal: true,
        }
    }

    /// The label key searched for
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The label value searched for
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether only internal labels are searched
    #[inline]
    pub fn internal(&self) -> bool {
        self.internal
    }

    /// Renders the query in the account management search syntax
    pub fn to_search(&self) -> String {
        format!(
            "key = '{}' and internal = '{}' and value = '{}'",
            self.key, self.internal, self.value
        )
    }

    /// Whether a label satisfies this query
    pub fn matches(&self, label: &Label) -> bool {
        label.key == self.key && label.value == self.value && label.internal == self.internal
    }
}

type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error communicating with the authorization service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request could not be sent or the response could not be read
    #[error("request to authorization service failed")]
    Transport(#[source] BoxError),
    /// The service answered with an unexpected status
    #[error("authorization service returned unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status code
        status: u16,
        /// The response body, as far as it could be read
        body: String,
    },
    /// The response body was not in the expected shape
    #[error("unable to decode authorization service response")]
    Decode(#[source] BoxError),
    /// A paginated listing did not advance or did not end
    #[error("authorization service pagination stalled at page {page}")]
    Pagination {
        /// The page being requested when the listing was abandoned
        page: usize,
    },
}

impl ServiceError {
    /// Wraps a transport failure
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// Wraps a decoding failure
    pub fn decode(err: impl Into<BoxError>) -> Self {
        Self::Decode(err.into())
    }
}

/// The queries the restriction refresher needs from the remote service
#[async_trait]
pub trait AuthorizationService: fmt::Debug + Send + Sync {
    /// Lists every label matching the query
    async fn list_labels(&self, query: &LabelQuery) -> Result<Vec<Label>, ServiceError>;

    /// Resolves internal organization identifiers into organizations
    ///
    /// Identifiers that do not resolve are omitted from the result.
    async fn list_organizations(
        &self,
        ids: &[InternalOrganizationId],
    ) -> Result<Vec<Organization>, ServiceError>;

    /// Whether the named feature toggle is enabled
    async fn feature_enabled(&self, feature: &FeatureRef) -> Result<bool, ServiceError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn capability_query_renders_search() {
        let query = LabelQuery::capability("capability.organization.restrict_offline_access");
        assert_eq!(
            query.to_search(),
            "key = 'capability.organization.restrict_offline_access' and internal = 'true' and value = 'true'"
        );
    }

    #[test]
    fn capability_query_matches_only_internal_true_labels() {
        let query = LabelQuery::capability("k");
        let label = |value: &str, internal: bool| Label {
            organization_id: None,
            key: "k".into(),
            value: value.into(),
            internal,
        };
        assert!(query.matches(&label("true", true)));
        assert!(!query.matches(&label("false", true)));
        assert!(!query.matches(&label("true", false)));
    }

    #[test]
    fn label_decodes_with_missing_optional_fields() {
        let label: Label = serde_json::from_value(json!({
            "key": "k",
            "organization_id": "1a2b",
        }))
        .unwrap();
        assert_eq!(
            label.organization_id.as_ref().map(|id| id.as_str()),
            Some("1a2b")
        );
        assert!(!label.internal);
    }

    #[test]
    fn organization_decodes_external_id() {
        let org: Organization = serde_json::from_value(json!({
            "kind": "Organization",
            "id": "1a2b",
            "external_id": "123456",
            "name": "acme",
        }))
        .unwrap();
        assert_eq!(org.external_id.unwrap().as_str(), "123456");
    }
}

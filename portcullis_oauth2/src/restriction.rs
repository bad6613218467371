//! Organizations whose offline access is restricted
//!
//! The [`RestrictionCache`] is written by a single background refresher and
//! read on every request. Reads never block: the restricted set is published
//! as a whole new value through an [`ArcSwap`], and the enforcement flag is a
//! separate atomic cell. The two cells may briefly disagree about which
//! refresh they came from; the next refresh reconciles them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ahash::AHashMap;
use arc_swap::ArcSwap;
use portcullis_traits::Policy;
use thiserror::Error;

use crate::{Claims, OrganizationId, OrganizationIdRef};

/// The scope that marks a token as granting offline access
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// An immutable snapshot of restricted organizations
///
/// Organizations absent from the snapshot are not restricted, and neither
/// are those explicitly marked unrestricted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestrictedOrganizations {
    orgs: AHashMap<OrganizationId, bool>,
    restricted: usize,
}

impl RestrictedOrganizations {
    /// An empty snapshot: no organization is restricted
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the organization is marked restricted
    #[inline]
    pub fn is_restricted(&self, org: &OrganizationIdRef) -> bool {
        self.orgs.get(org).copied().unwrap_or(false)
    }

    /// The number of organizations marked restricted
    #[inline]
    pub fn len(&self) -> usize {
        self.restricted
    }

    /// Whether no organization is marked restricted
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.restricted == 0
    }

    /// Iterates over the organizations marked restricted
    pub fn iter(&self) -> impl Iterator<Item = &OrganizationIdRef> {
        self.orgs
            .iter()
            .filter(|(_, restricted)| **restricted)
            .map(|(org, _)| org.as_ref())
    }
}

impl FromIterator<OrganizationId> for RestrictedOrganizations {
    fn from_iter<I: IntoIterator<Item = OrganizationId>>(iter: I) -> Self {
        iter.into_iter().map(|org| (org, true)).collect()
    }
}

impl FromIterator<(OrganizationId, bool)> for RestrictedOrganizations {
    fn from_iter<I: IntoIterator<Item = (OrganizationId, bool)>>(iter: I) -> Self {
        let orgs: AHashMap<_, _> = iter.into_iter().collect();
        let restricted = orgs.values().filter(|restricted| **restricted).count();
        Self { orgs, restricted }
    }
}

#[derive(Debug, Default)]
struct Inner {
    restricted: ArcSwap<RestrictedOrganizations>,
    enforced: AtomicBool,
}

/// Shared, concurrently readable state of offline-access restrictions
///
/// Starts empty with enforcement disabled. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct RestrictionCache {
    inner: Arc<Inner>,
}

impl RestrictionCache {
    /// Constructs an empty cache with enforcement disabled
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the organization is currently marked restricted
    ///
    /// Organizations never written to the cache are not restricted.
    #[inline]
    pub fn is_restricted(&self, org: &str) -> bool {
        self.inner
            .restricted
            .load()
            .is_restricted(OrganizationIdRef::from_str(org))
    }

    /// The number of organizations currently marked restricted
    #[inline]
    pub fn count(&self) -> usize {
        self.inner.restricted.load().len()
    }

    /// Whether restriction checking is currently active
    #[inline]
    pub fn is_enforced(&self) -> bool {
        self.inner.enforced.load(Ordering::Acquire)
    }

    /// The current snapshot of restricted organizations
    #[inline]
    pub fn snapshot(&self) -> Arc<RestrictedOrganizations> {
        self.inner.restricted.load_full()
    }

    /// Replaces the restricted organizations with a new snapshot
    ///
    /// This is a total replacement: organizations missing from `orgs` are
    /// no longer restricted.
    pub fn set_restricted_orgs(&self, orgs: RestrictedOrganizations) {
        self.inner.restricted.store(Arc::new(orgs));
    }

    /// Turns restriction checking on or off
    pub fn set_enforcement_enabled(&self, enabled: bool) {
        self.inner.enforced.store(enabled, Ordering::Release);
    }
}

/// Offline access is restricted for the token's organization
#[derive(Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("offline access is restricted for organization {organization}")]
pub struct OrganizationRestricted {
    /// The external identifier of the restricted organization
    pub organization: OrganizationId,
}

/// An access policy denying offline-access tokens from restricted
/// organizations
///
/// Reads the shared [`RestrictionCache`] and never blocks on its refresh.
#[derive(Clone, Debug)]
pub struct OfflineAccessPolicy {
    cache: RestrictionCache,
}

impl OfflineAccessPolicy {
    /// Constructs a policy over the given cache
    #[inline]
    pub fn new(cache: RestrictionCache) -> Self {
        Self { cache }
    }

    /// The cache this policy reads
    #[inline]
    pub fn cache(&self) -> &RestrictionCache {
        &self.cache
    }

    /// Whether the policy can deny anything at the moment
    ///
    /// False when enforcement is disabled or no organization is restricted,
    /// in which case callers can skip claim extraction entirely.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.cache.is_enforced() && self.cache.count() > 0
    }
}

impl Policy for OfflineAccessPolicy {
    type Request = Claims;
    type Denial = OrganizationRestricted;

    fn evaluate(&self, claims: &Self::Request) -> Result<(), Self::Denial> {
        if !self.is_active() {
            return Ok(());
        }

        if claims.is_machine_identity() {
            return Ok(());
        }

        if !claims
            .scope()
            .iter()
            .any(|token| token.as_str() == OFFLINE_ACCESS_SCOPE)
        {
            return Ok(());
        }

        match claims.organization_id() {
            Some(org) if self.cache.is_restricted(org.as_str()) => {
                tracing::debug!(organization = %org, "offline access restricted for organization");
                Err(OrganizationRestricted {
                    organization: org.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }
}

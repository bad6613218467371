//! Background refresh of the restriction cache
//!
//! The refresher runs both fetch operations once before the periodic loop
//! starts and then once per interval. A failed operation leaves the cache
//! as it was and is retried on the next tick.

use std::{error, sync::Arc, time::Duration};

use ahash::AHashSet;
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    accounts::{AuthorizationService, Feature, InternalOrganizationId, LabelQuery, ServiceError},
    RestrictedOrganizations, RestrictionCache, DEFAULT_ENFORCEMENT_FLAG,
    DEFAULT_OFFLINE_ACCESS_CAPABILITY, DEFAULT_REFRESH_INTERVAL,
};

/// An error refreshing the restriction cache
#[derive(Debug, Error)]
pub enum RefreshError {
    /// No authorization service is attached, so there is nothing to fetch
    #[error("no authorization service configured")]
    Unconfigured,
    /// Listing the capability labels failed
    #[error("unable to list capability labels")]
    Labels(#[source] ServiceError),
    /// Resolving internal organization identifiers failed
    #[error("unable to resolve organization identifiers")]
    Organizations(#[source] ServiceError),
    /// Checking the enforcement feature toggle failed
    #[error("unable to check feature toggle {flag}")]
    FeatureFlag {
        /// The feature toggle that was checked
        flag: Feature,
        /// The underlying failure
        #[source]
        source: ServiceError,
    },
}

/// The lifecycle of a spawned refresher
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RefreshState {
    /// Nothing has been fetched yet
    Uninitialized,
    /// A refresh is in progress
    Populating,
    /// Waiting for the next tick
    Steady,
    /// The refresher has stopped and will not write to the cache again
    Cancelled,
}

/// Keeps a [`RestrictionCache`] current from an [`AuthorizationService`]
///
/// Without a service every operation reports [`RefreshError::Unconfigured`]
/// and the cache keeps its initial empty, unenforced state.
#[derive(Clone, Debug)]
#[must_use]
pub struct RestrictionRefresher {
    cache: RestrictionCache,
    service: Option<Arc<dyn AuthorizationService>>,
    interval: Duration,
    capability_key: String,
    enforcement_flag: Feature,
}

impl RestrictionRefresher {
    /// Constructs a refresher over `cache` with no service attached
    pub fn new(cache: RestrictionCache) -> Self {
        Self {
            cache,
            service: None,
            interval: DEFAULT_REFRESH_INTERVAL,
            capability_key: DEFAULT_OFFLINE_ACCESS_CAPABILITY.to_owned(),
            enforcement_flag: Feature::from(DEFAULT_ENFORCEMENT_FLAG),
        }
    }

    /// Attaches the service to fetch from
    pub fn with_service<S>(self, service: S) -> Self
    where
        S: AuthorizationService + 'static,
    {
        self.with_shared_service(Arc::new(service))
    }

    /// Attaches a service shared with other components
    pub fn with_shared_service(mut self, service: Arc<dyn AuthorizationService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the time between periodic refreshes
    ///
    /// A zero interval falls back to [`DEFAULT_REFRESH_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            interval
        };
        self
    }

    /// Sets the label key marking restricted organizations
    pub fn with_capability_key(mut self, key: impl Into<String>) -> Self {
        self.capability_key = key.into();
        self
    }

    /// Sets the feature toggle that turns enforcement on
    pub fn with_enforcement_flag(mut self, flag: impl Into<Feature>) -> Self {
        self.enforcement_flag = flag.into();
        self
    }

    /// The cache being refreshed
    #[inline]
    pub fn cache(&self) -> &RestrictionCache {
        &self.cache
    }

    /// The time between periodic refreshes
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn service(&self) -> Result<&dyn AuthorizationService, RefreshError> {
        self.service.as_deref().ok_or(RefreshError::Unconfigured)
    }

    /// Replaces the restricted organizations with a freshly fetched set
    ///
    /// Returns the number of organizations now restricted. On error the
    /// cache is left untouched.
    #[tracing::instrument(skip(self), fields(capability = %self.capability_key))]
    pub async fn populate_restricted_orgs(&self) -> Result<usize, RefreshError> {
        let service = self.service()?;

        let query = LabelQuery::capability(self.capability_key.as_str());
        let labels = service
            .list_labels(&query)
            .await
            .map_err(RefreshError::Labels)?;

        let internal: AHashSet<InternalOrganizationId> = labels
            .into_iter()
            .filter(|label| query.matches(label))
            .filter_map(|label| label.organization_id)
            .collect();

        if internal.is_empty() {
            self.cache.set_restricted_orgs(RestrictedOrganizations::new());
            tracing::info!("no organizations restricted");
            return Ok(0);
        }

        let mut internal: Vec<_> = internal.into_iter().collect();
        internal.sort_unstable();

        let organizations = service
            .list_organizations(&internal)
            .await
            .map_err(RefreshError::Organizations)?;

        let restricted: RestrictedOrganizations = organizations
            .into_iter()
            .filter_map(|org| org.external_id)
            .collect();

        let count = restricted.len();
        if count < internal.len() {
            tracing::debug!(
                labeled = internal.len(),
                resolved = count,
                "some labeled organizations did not resolve"
            );
        }

        self.cache.set_restricted_orgs(restricted);
        tracing::info!(count, "restricted organizations refreshed");
        Ok(count)
    }

    /// Updates whether restrictions are enforced from the feature toggle
    ///
    /// Returns the new enforcement state. On error the previous state is
    /// kept.
    #[tracing::instrument(skip(self), fields(flag = %self.enforcement_flag))]
    pub async fn check_enforcement_flag(&self) -> Result<bool, RefreshError> {
        let service = self.service()?;

        let enabled = service
            .feature_enabled(&self.enforcement_flag)
            .await
            .map_err(|source| RefreshError::FeatureFlag {
                flag: self.enforcement_flag.clone(),
                source,
            })?;

        self.cache.set_enforcement_enabled(enabled);
        tracing::info!(enabled, "restriction enforcement refreshed");
        Ok(enabled)
    }

    /// Runs both fetch operations, logging rather than returning failures
    ///
    /// A failure in one operation does not prevent the other from running.
    pub async fn refresh(&self) {
        if let Err(err) = self.populate_restricted_orgs().await {
            log_failure(&err, "populate restricted organizations");
        }

        if let Err(err) = self.check_enforcement_flag().await {
            log_failure(&err, "check enforcement flag");
        }
    }

    /// Refreshes once, then keeps refreshing in the background
    ///
    /// Returns after the initial refresh completes, whether or not it
    /// succeeded. Dropping the returned handle detaches the background task;
    /// use [`RefreshHandle::shutdown`] to stop it.
    pub async fn spawn(self) -> RefreshHandle {
        self.spawn_with_cancellation(CancellationToken::new()).await
    }

    /// Like [`spawn`](Self::spawn), stopping when `token` is cancelled
    ///
    /// Passing a child of an application-wide token ties the refresher to
    /// the application's shutdown.
    pub async fn spawn_with_cancellation(self, token: CancellationToken) -> RefreshHandle {
        let (state, receiver) = watch::channel(RefreshState::Uninitialized);

        state.send_replace(RefreshState::Populating);
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("cancelled before initial refresh completed");
            }
            _ = self.refresh() => {}
        }
        state.send_replace(RefreshState::Steady);

        let join = tokio::spawn(refresh_until_cancelled(self, state, token.clone()));

        RefreshHandle {
            state: receiver,
            token,
            join,
        }
    }
}

fn log_failure(err: &RefreshError, operation: &'static str) {
    match err {
        RefreshError::Unconfigured => {
            tracing::debug!(operation, "authorization service not configured; skipping");
        }
        _ => {
            let error: &dyn error::Error = err;
            tracing::warn!(
                error,
                operation,
                "restriction refresh failed; keeping previous values"
            );
        }
    }
}

async fn refresh_until_cancelled(
    refresher: RestrictionRefresher,
    state: watch::Sender<RefreshState>,
    token: CancellationToken,
) {
    let mut timer = time::interval(refresher.interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }

        state.send_replace(RefreshState::Populating);
        tracing::debug!("refreshing restricted organizations");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("abandoning in-flight refresh");
                break;
            }
            _ = refresher.refresh() => {}
        }

        state.send_replace(RefreshState::Steady);
    }

    state.send_replace(RefreshState::Cancelled);
    tracing::info!("restriction refresher stopped");
}

/// A handle on a spawned [`RestrictionRefresher`]
#[derive(Debug)]
pub struct RefreshHandle {
    state: watch::Receiver<RefreshState>,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl RefreshHandle {
    /// The refresher's current state
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    /// A receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.clone()
    }

    /// Signals the refresher to stop without waiting for it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The token that stops the refresher when cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the background task has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the refresher and waits for it to exit
    ///
    /// Once this returns the cache is no longer written to.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.join.await {
            if err.is_panic() {
                tracing::error!("restriction refresher panicked");
            }
        }
    }
}

use bytes::Bytes;
use http::{Extensions, Request, Response};
use portcullis_oauth2::{
    AudiencePolicy, Claims, GateConfig, InvalidAudience, OfflineAccessPolicy,
    OrganizationRestricted, RestrictionCache, ScopeDenial, ScopePolicy,
};
use portcullis_traits::Policy;
use thiserror::Error;
use tower_http::validate_request::{
    ValidateRequest, ValidateRequestHeader, ValidateRequestHeaderLayer,
};
use tower_layer::Layer;

use crate::{
    extract_claims,
    util::{unauthorized, BearerError},
    CallbackFn, ClaimsError, JsonErrorHandler, OnValidation, TerseErrorHandler,
};

/// The reason a request was refused
#[derive(Clone, Debug, Hash, Eq, PartialEq, Error)]
pub enum ValidationError {
    /// The token could not be read
    #[error(transparent)]
    Claims(#[from] ClaimsError),
    /// The token's scopes do not satisfy the scope policy
    #[error(transparent)]
    Scope(#[from] ScopeDenial),
    /// The token was issued for an audience that is not approved
    #[error(transparent)]
    Audience(#[from] InvalidAudience),
    /// The token grants offline access within a restricted organization
    #[error(transparent)]
    Restricted(#[from] OrganizationRestricted),
}

impl ValidationError {
    /// A stable, machine-readable identifier for the kind of failure
    pub fn code(&self) -> &'static str {
        match self {
            Self::Claims(ClaimsError::MissingToken) => "missing-token",
            Self::Claims(ClaimsError::InvalidToken(_)) => "invalid-token",
            Self::Scope(ScopeDenial::MissingRequiredScopes(_)) => "missing-required-scopes",
            Self::Scope(ScopeDenial::UnauthorizedScopes(_)) => "unauthorized-scopes",
            Self::Audience(_) => "invalid-audience",
            Self::Restricted(_) => "organization-restricted",
        }
    }

    fn bearer_error(&self) -> BearerError {
        match self {
            Self::Scope(_) => BearerError::InsufficientScope,
            _ => BearerError::InvalidToken,
        }
    }
}

/// Claims read from the request at most once, and only when some check
/// needs them
struct LazyClaims<'a> {
    extensions: &'a Extensions,
    error_on_missing_token: bool,
    claims: Option<Option<Claims>>,
}

impl<'a> LazyClaims<'a> {
    fn new(extensions: &'a Extensions, error_on_missing_token: bool) -> Self {
        Self {
            extensions,
            error_on_missing_token,
            claims: None,
        }
    }

    /// `None` when no token is attached and missing tokens are tolerated
    fn get(&mut self) -> Result<Option<&Claims>, ClaimsError> {
        if self.claims.is_none() {
            let claims = match extract_claims(self.extensions) {
                Ok(claims) => Some(claims),
                Err(ClaimsError::MissingToken) if !self.error_on_missing_token => {
                    tracing::trace!("no token attached; nothing to validate");
                    None
                }
                Err(err) => return Err(err),
            };
            self.claims = Some(claims);
        }

        Ok(self.claims.as_ref().and_then(Option::as_ref))
    }

    fn into_inner(self) -> Option<Claims> {
        self.claims.flatten()
    }
}

/// A request validator enforcing scope, audience, and organization
/// restriction policies over the decoded token attached to each request
///
/// Checks run in order:
///
/// 1. If validation is disabled, the request passes without further checks.
/// 2. Offline access from restricted organizations, skipped while
///    enforcement is off or nothing is restricted.
/// 3. The audience policy.
/// 4. The scope policy.
///
/// The first failing check decides the error. The handler's
/// [`on_complete`](OnValidation::on_complete) then observes the outcome, and
/// a denied request is answered with `401 Unauthorized` and a body from the
/// handler. Requests that pass carry the extracted [`Claims`] in their
/// extensions, if any check needed them.
///
/// A request without a token passes unless
/// [`error_on_missing_token`](TokenGate::error_on_missing_token) is set,
/// which lets the same gate guard a router that also serves anonymous
/// routes.
#[derive(Clone, Debug)]
#[must_use]
pub struct TokenGate<H> {
    scope_policy: ScopePolicy,
    audience_policy: AudiencePolicy,
    offline_access: Option<OfflineAccessPolicy>,
    error_on_missing_token: bool,
    disable_validation: bool,
    on_validation: H,
}

impl TokenGate<()> {
    /// Constructs a gate that allows every request
    pub fn new() -> Self {
        Self {
            scope_policy: ScopePolicy::new(),
            audience_policy: AudiencePolicy::new(),
            offline_access: None,
            error_on_missing_token: false,
            disable_validation: false,
            on_validation: (),
        }
    }

    /// Constructs a gate from declarative configuration
    ///
    /// Organization restrictions are read from `cache`, which is expected to
    /// be kept current by a refresher built from the same configuration.
    pub fn from_config(config: &GateConfig, cache: RestrictionCache) -> Self {
        Self::new()
            .with_scope_policy(config.scope_policy())
            .with_audience_policy(config.audience_policy())
            .with_restriction_cache(cache)
            .error_on_missing_token(config.error_on_missing_token)
            .disable_validation(config.disable_validation)
    }

    /// Attaches a custom handler for validation outcomes
    #[inline]
    pub fn with_handler<H>(self, on_validation: H) -> TokenGate<H> {
        TokenGate {
            scope_policy: self.scope_policy,
            audience_policy: self.audience_policy,
            offline_access: self.offline_access,
            error_on_missing_token: self.error_on_missing_token,
            disable_validation: self.disable_validation,
            on_validation,
        }
    }

    /// Attaches the [`TerseErrorHandler`], which denies with an empty body
    #[inline]
    pub fn with_terse_error_handler<ResBody: Default>(
        self,
    ) -> TokenGate<TerseErrorHandler<ResBody>> {
        self.with_handler(TerseErrorHandler::new())
    }

    /// Attaches the [`JsonErrorHandler`], which denies with a JSON error
    /// document
    #[inline]
    pub fn with_json_error_handler<ResBody: From<Bytes>>(
        self,
    ) -> TokenGate<JsonErrorHandler<ResBody>> {
        self.with_handler(JsonErrorHandler::new())
    }
}

impl Default for TokenGate<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> TokenGate<H> {
    /// Replaces the scope policy
    #[inline]
    pub fn with_scope_policy(mut self, policy: ScopePolicy) -> Self {
        self.scope_policy = policy;
        self
    }

    /// Replaces the audience policy
    #[inline]
    pub fn with_audience_policy(mut self, policy: AudiencePolicy) -> Self {
        self.audience_policy = policy;
        self
    }

    /// Refuses offline-access tokens from organizations restricted in `cache`
    #[inline]
    pub fn with_restriction_cache(mut self, cache: RestrictionCache) -> Self {
        self.offline_access = Some(OfflineAccessPolicy::new(cache));
        self
    }

    /// Whether a request without a token is refused
    #[inline]
    pub fn error_on_missing_token(mut self, error_on_missing_token: bool) -> Self {
        self.error_on_missing_token = error_on_missing_token;
        self
    }

    /// Whether every check is skipped
    #[inline]
    pub fn disable_validation(mut self, disable_validation: bool) -> Self {
        self.disable_validation = disable_validation;
        self
    }

    /// Runs `callback` on every validation outcome, before the current
    /// handler
    ///
    /// The callback receives the request and the error, if any. A handler
    /// that produces denial bodies must be attached first:
    ///
    /// ```
    /// use http::Request;
    /// use portcullis_tower::{TokenGate, ValidationError};
    ///
    /// let gate = TokenGate::new()
    ///     .with_terse_error_handler::<String>()
    ///     .with_callback(|_: &Request<()>, error: Option<&ValidationError>| {
    ///         assert!(error.is_none());
    ///     });
    /// # let _ = gate;
    /// ```
    ///
    /// ```compile_fail
    /// use http::Request;
    /// use portcullis_tower::{TokenGate, ValidationError};
    ///
    /// let gate = TokenGate::new()
    ///     .with_callback(|_: &Request<()>, _: Option<&ValidationError>| {});
    /// ```
    #[inline]
    pub fn with_callback<F, ReqBody>(self, callback: F) -> TokenGate<CallbackFn<F, H>>
    where
        F: Fn(&Request<ReqBody>, Option<&ValidationError>),
        H: OnValidation<ReqBody>,
    {
        TokenGate {
            scope_policy: self.scope_policy,
            audience_policy: self.audience_policy,
            offline_access: self.offline_access,
            error_on_missing_token: self.error_on_missing_token,
            disable_validation: self.disable_validation,
            on_validation: CallbackFn::new(callback, self.on_validation),
        }
    }

    /// The scope policy
    #[inline]
    pub fn scope_policy(&self) -> &ScopePolicy {
        &self.scope_policy
    }

    /// The audience policy
    #[inline]
    pub fn audience_policy(&self) -> &AudiencePolicy {
        &self.audience_policy
    }

    /// The handler for validation outcomes
    #[inline]
    pub fn handler(&self) -> &H {
        &self.on_validation
    }

    /// Wraps the gate in a layer for use with `tower` and `axum`
    #[inline]
    pub fn into_layer(self) -> ValidateRequestHeaderLayer<Self> {
        ValidateRequestHeaderLayer::custom(self)
    }

    /// Evaluates every configured check against the request's token
    ///
    /// Returns the claims if any check needed them.
    pub fn check(&self, extensions: &Extensions) -> Result<Option<Claims>, ValidationError> {
        let mut lazy = LazyClaims::new(extensions, self.error_on_missing_token);

        if let Some(policy) = self.offline_access.as_ref().filter(|p| p.is_active()) {
            if let Some(claims) = lazy.get()? {
                policy.evaluate(claims)?;
            }
        }

        if !self.audience_policy.is_empty() {
            if let Some(claims) = lazy.get()? {
                self.audience_policy.evaluate(claims)?;
            }
        }

        if !self.scope_policy.is_empty() {
            if let Some(claims) = lazy.get()? {
                self.scope_policy.evaluate(claims)?;
            }
        }

        Ok(lazy.into_inner())
    }
}

impl<H, ReqBody> ValidateRequest<ReqBody> for TokenGate<H>
where
    H: OnValidation<ReqBody>,
{
    type ResponseBody = H::Body;

    fn validate(
        &mut self,
        request: &mut Request<ReqBody>,
    ) -> Result<(), Response<Self::ResponseBody>> {
        if self.disable_validation {
            tracing::trace!("token validation disabled");
            return Ok(());
        }

        match self.check(request.extensions()) {
            Ok(claims) => {
                self.on_validation.on_complete(request, None);
                if let Some(claims) = claims {
                    request.extensions_mut().insert(claims);
                }
                Ok(())
            }
            Err(error) => {
                tracing::debug!(code = error.code(), %error, "request denied");
                self.on_validation.on_complete(request, Some(&error));
                Err(unauthorized(
                    error.bearer_error(),
                    self.on_validation.unauthorized_body(&error),
                ))
            }
        }
    }
}

impl<S, H> Layer<S> for TokenGate<H>
where
    H: Clone,
{
    type Service = ValidateRequestHeader<S, Self>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidateRequestHeader::custom(inner, self.clone())
    }
}

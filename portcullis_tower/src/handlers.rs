use std::{fmt, marker::PhantomData};

use bytes::Bytes;
use http::Request;
use serde::Serialize;

use crate::ValidationError;

/// Observes every validation outcome and shapes the body of denials
///
/// [`on_complete`](OnValidation::on_complete) runs once per validated
/// request, whether the request was allowed or denied, before the response
/// is decided. It is the place for audit logging and metrics.
pub trait OnValidation<ReqBody> {
    /// The body type returned on a denial
    type Body;

    /// Called with the outcome of validating `request`
    fn on_complete(&self, request: &Request<ReqBody>, error: Option<&ValidationError>) {
        let _ = (request, error);
    }

    /// The body of the `401 Unauthorized` response for `error`
    fn unauthorized_body(&self, error: &ValidationError) -> Self::Body;
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T, ReqBody> OnValidation<ReqBody> for $ty
            where
                T: OnValidation<ReqBody> + ?Sized,
            {
                type Body = T::Body;

                #[inline]
                fn on_complete(&self, request: &Request<ReqBody>, error: Option<&ValidationError>) {
                    T::on_complete(self, request, error)
                }

                #[inline]
                fn unauthorized_body(&self, error: &ValidationError) -> Self::Body {
                    T::unauthorized_body(self, error)
                }
            }
        )*
    }
}

delegate_impls!(
    &'_ T
    Box<T>
    std::rc::Rc<T>
    std::sync::Arc<T>
);

/// Responds to denials with an empty body
pub struct TerseErrorHandler<ResBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> TerseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for TerseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TerseErrorHandler")
    }
}

impl<ResBody> Default for TerseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<ResBody> Clone for TerseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<ResBody> Copy for TerseErrorHandler<ResBody> {}

impl<ResBody, ReqBody> OnValidation<ReqBody> for TerseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn unauthorized_body(&self, _: &ValidationError) -> Self::Body {
        ResBody::default()
    }
}

/// Responds to denials with a JSON error document
///
/// The document has the form:
///
/// ```json
/// {
///   "kind": "Error",
///   "id": "401",
///   "code": "organization-restricted",
///   "reason": "offline access is restricted for organization 123456"
/// }
/// ```
pub struct JsonErrorHandler<ResBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> JsonErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for JsonErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("JsonErrorHandler")
    }
}

impl<ResBody> Default for JsonErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<ResBody> Clone for JsonErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<ResBody> Copy for JsonErrorHandler<ResBody> {}

#[derive(Debug, Serialize)]
struct ErrorDocument<'a> {
    kind: &'static str,
    id: &'static str,
    code: &'static str,
    reason: &'a str,
}

impl<ResBody, ReqBody> OnValidation<ReqBody> for JsonErrorHandler<ResBody>
where
    ResBody: From<Bytes>,
{
    type Body = ResBody;

    fn unauthorized_body(&self, error: &ValidationError) -> Self::Body {
        let reason = error.to_string();
        let document = ErrorDocument {
            kind: "Error",
            id: "401",
            code: error.code(),
            reason: &reason,
        };

        match serde_json::to_vec(&document) {
            Ok(body) => ResBody::from(Bytes::from(body)),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "unable to serialize error document");
                ResBody::from(Bytes::new())
            }
        }
    }
}

/// Runs a closure on every validation outcome before delegating to an inner
/// handler
///
/// Built by [`TokenGate::with_callback`](crate::TokenGate::with_callback).
#[derive(Clone)]
pub struct CallbackFn<F, H> {
    callback: F,
    inner: H,
}

impl<F, H> CallbackFn<F, H> {
    /// Wraps `inner`, calling `callback` first on every outcome
    #[inline]
    pub fn new(callback: F, inner: H) -> Self {
        Self { callback, inner }
    }

    /// The wrapped handler
    #[inline]
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<F, H> fmt::Debug for CallbackFn<F, H>
where
    H: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CallbackFn")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<F, H, ReqBody> OnValidation<ReqBody> for CallbackFn<F, H>
where
    F: Fn(&Request<ReqBody>, Option<&ValidationError>),
    H: OnValidation<ReqBody>,
{
    type Body = H::Body;

    fn on_complete(&self, request: &Request<ReqBody>, error: Option<&ValidationError>) {
        (self.callback)(request, error);
        self.inner.on_complete(request, error);
    }

    #[inline]
    fn unauthorized_body(&self, error: &ValidationError) -> Self::Body {
        self.inner.unauthorized_body(error)
    }
}

use std::fmt;

/// A policy against which a request will be evaluated
///
/// Policies are constructed once and then shared read-only, so evaluation
/// takes `&self` and must not depend on mutable state held by the policy
/// itself. Policies that consult shared state (such as a background-refreshed
/// cache) must only perform non-blocking reads of that state.
pub trait Policy {
    /// The request type evaluated by this policy
    type Request: ?Sized;

    /// The error returned when this policy denies a request
    type Denial: fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Evaluates the request, producing an effect
    fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial>;
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T> Policy for $ty
            where
                T: Policy + ?Sized,
            {
                type Request = T::Request;
                type Denial = T::Denial;

                #[inline]
                fn evaluate(&self, request: &Self::Request) -> Result<(), Self::Denial> {
                    T::evaluate(self, request)
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

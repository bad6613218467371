use http::Extensions;
use portcullis_oauth2::{Claims, DecodedToken, InvalidToken};
use thiserror::Error;

/// An error obtaining claims from a request
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
pub enum ClaimsError {
    /// No decoded token was attached to the request
    #[error("cannot get token from request")]
    MissingToken,
    /// A token was attached but its payload is not a claim set
    #[error("cannot convert token to claims")]
    InvalidToken(#[from] InvalidToken),
}

/// Reads the claims of the decoded token attached to a request
///
/// Upstream authentication is expected to insert a [`DecodedToken`] into the
/// request extensions. This function only reads; it never fails on a token
/// that was decoded upstream, however unusual its claims are.
///
/// ```
/// use http::Request;
/// use portcullis_oauth2::DecodedToken;
/// use portcullis_tower::{extract_claims, ClaimsError};
/// use serde_json::json;
///
/// let request = Request::builder()
///     .extension(DecodedToken::new(json!({ "scope": "openid" })))
///     .body(())
///     .unwrap();
/// let claims = extract_claims(request.extensions()).unwrap();
/// assert!(!claims.scope().is_empty());
///
/// let anonymous = Request::new(());
/// assert_eq!(extract_claims(anonymous.extensions()), Err(ClaimsError::MissingToken));
/// ```
pub fn extract_claims(extensions: &Extensions) -> Result<Claims, ClaimsError> {
    let token = extensions
        .get::<DecodedToken>()
        .ok_or(ClaimsError::MissingToken)?;

    Ok(token.claims()?)
}

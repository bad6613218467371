//! Utilities for generating HTTP responses on authorization failures

use http::{header, HeaderValue, Response, StatusCode};

/// The bearer token error reported in the `www-authenticate` header
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum BearerError {
    /// The token is missing, malformed, or refused for its origin
    InvalidToken,
    /// The token does not assert the scopes the resource requires
    InsufficientScope,
}

impl BearerError {
    fn header_value(self) -> HeaderValue {
        match self {
            Self::InvalidToken => HeaderValue::from_static(r#"Bearer error="invalid_token""#),
            Self::InsufficientScope => {
                HeaderValue::from_static(r#"Bearer error="insufficient_scope""#)
            }
        }
    }
}

/// Build a `401 Unauthorized` response carrying a JSON body
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// content-type: application/json
/// www-authenticate: Bearer error="{error}"
///
/// {body}
/// ```
pub fn unauthorized<Body>(error: BearerError, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, error.header_value());
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_json_with_bearer_challenge() {
        let resp = unauthorized(BearerError::InvalidToken, "{}");

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="invalid_token""#
        );
        assert_eq!(*resp.body(), "{}");
    }

    #[test]
    fn insufficient_scope_is_reported() {
        let resp = unauthorized(BearerError::InsufficientScope, ());

        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer error="insufficient_scope""#
        );
    }
}

use std::fmt;

use aliri_braid::braid;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    AuthorizationService, FeatureRef, InternalOrganizationId, Label, LabelQuery, Organization,
    ServiceError,
};

/// The default number of items requested per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// The most pages fetched for a single listing
pub const MAX_PAGES: usize = 1_000;

const LABELS_PATH: &str = "/api/accounts_mgmt/v1/labels";
const ORGANIZATIONS_PATH: &str = "/api/accounts_mgmt/v1/organizations";
const FEATURE_REVIEW_PATH: &str = "/api/authorizations/v1/feature_review";

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A bearer access token presented to the account management service
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Serialize)]
struct FeatureReviewRequest<'a> {
    feature: &'a str,
}

#[derive(Debug, Deserialize)]
struct FeatureReviewResponse {
    enabled: bool,
}

/// A client for the account management and authorization endpoints
///
/// List endpoints are paginated; every page is fetched before returning.
#[derive(Clone, Debug)]
pub struct AccountsClient {
    client: Client,
    base_url: String,
    access_token: Option<AccessToken>,
    page_size: usize,
}

impl AccountsClient {
    /// Constructs a client against the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("portcullis_oauth2/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    /// Constructs a client reusing an existing HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            client,
            base_url,
            access_token: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Presents the access token as a bearer credential on every request
    #[must_use]
    pub fn with_access_token(mut self, access_token: AccessToken) -> Self {
        self.access_token = Some(access_token);
        self
    }

    /// Sets the number of items requested per page
    ///
    /// Also bounds the number of identifiers resolved per organization
    /// query. A page size of zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The base URL of the service
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The number of items requested per page
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(ServiceError::transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                http.status_code = status.as_u16(),
                %body,
                "unexpected response from authorization service"
            );
            return Err(ServiceError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let bytes = response.bytes().await.map_err(ServiceError::transport)?;
        serde_json::from_slice(&bytes).map_err(ServiceError::decode)
    }

    #[tracing::instrument(skip(self), fields(size = self.page_size))]
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        search: &str,
    ) -> Result<Vec<T>, ServiceError> {
        let url = self.url(path);
        let size = self.page_size.to_string();
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_number = page.to_string();
            let request = self.client.get(&url).query(&[
                ("search", search),
                ("page", page_number.as_str()),
                ("size", size.as_str()),
            ]);

            let response: Page<T> = Self::decode(self.send(request).await?).await?;
            if response.page.map_or(false, |echoed| echoed != page) {
                return Err(ServiceError::Pagination { page });
            }

            let fetched = response.items.len();
            items.extend(response.items);

            tracing::trace!(page, fetched, total = response.total, "fetched page");

            let exhausted = response.total.map_or(false, |total| items.len() >= total);
            if fetched == 0 || fetched < self.page_size || exhausted {
                return Ok(items);
            }
        }

        Err(ServiceError::Pagination { page: MAX_PAGES })
    }
}

fn organization_search(ids: &[InternalOrganizationId]) -> String {
    let quoted: Vec<_> = ids.iter().map(|id| format!("'{id}'")).collect();
    format!("id in ({})", quoted.join(","))
}

#[async_trait]
impl AuthorizationService for AccountsClient {
    async fn list_labels(&self, query: &LabelQuery) -> Result<Vec<Label>, ServiceError> {
        self.list_all(LABELS_PATH, &query.to_search()).await
    }

    async fn list_organizations(
        &self,
        ids: &[InternalOrganizationId],
    ) -> Result<Vec<Organization>, ServiceError> {
        let mut organizations = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.page_size) {
            let found: Vec<Organization> = self
                .list_all(ORGANIZATIONS_PATH, &organization_search(chunk))
                .await?;
            organizations.extend(found);
        }
        Ok(organizations)
    }

    #[tracing::instrument(skip(self))]
    async fn feature_enabled(&self, feature: &FeatureRef) -> Result<bool, ServiceError> {
        let request = self
            .client
            .post(self.url(FEATURE_REVIEW_PATH))
            .json(&FeatureReviewRequest {
                feature: feature.as_str(),
            });

        let review: FeatureReviewResponse = Self::decode(self.send(request).await?).await?;
        Ok(review.enabled)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::accounts::Feature;

    const CAPABILITY: &str = "capability.organization.restrict_offline_access";

    fn label(org: &str) -> serde_json::Value {
        json!({
            "kind": "Label",
            "key": CAPABILITY,
            "value": "true",
            "internal": true,
            "organization_id": org,
        })
    }

    #[tokio::test]
    async fn lists_labels_with_capability_search() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .and(query_param(
                "search",
                format!("key = '{CAPABILITY}' and internal = 'true' and value = 'true'"),
            ))
            .and(query_param("page", "1"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "LabelList",
                "page": 1,
                "size": 2,
                "total": 2,
                "items": [label("a1"), label("b2")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            AccountsClient::new(server.uri())?.with_access_token(AccessToken::from("secret-token"));
        let labels = client.list_labels(&LabelQuery::capability(CAPABILITY)).await?;

        let ids: Vec<_> = labels
            .iter()
            .filter_map(|l| l.organization_id.as_ref())
            .map(|id| id.as_str())
            .collect();
        assert_eq!(ids, ["a1", "b2"]);
        Ok(())
    }

    #[tokio::test]
    async fn follows_pages_until_short_page() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .and(query_param("page", "1"))
            .and(query_param("size", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1, "size": 2, "items": [label("a1"), label("b2")],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 2, "size": 1, "items": [label("c3")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?.with_page_size(2);
        let labels = client.list_labels(&LabelQuery::capability(CAPABILITY)).await?;
        assert_eq!(labels.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn stops_when_total_is_reached() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1, "size": 2, "total": 2, "items": [label("a1"), label("b2")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?.with_page_size(2);
        let labels = client.list_labels(&LabelQuery::capability(CAPABILITY)).await?;
        assert_eq!(labels.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn stalled_pagination_is_an_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 1, "size": 2, "items": [label("a1"), label("b2")],
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?.with_page_size(2);
        let err = client
            .list_labels(&LabelQuery::capability(CAPABILITY))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Pagination { page: 2 }));
        Ok(())
    }

    #[tokio::test]
    async fn resolves_organizations_in_chunks() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ORGANIZATIONS_PATH))
            .and(query_param("search", "id in ('a1','b2')"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    { "id": "a1", "external_id": "111" },
                    { "id": "b2", "external_id": "222" },
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ORGANIZATIONS_PATH))
            .and(query_param("search", "id in ('a1','b2')"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ORGANIZATIONS_PATH))
            .and(query_param("search", "id in ('c3')"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AccountsClient::new(format!("{}/", server.uri()))?.with_page_size(2);
        let ids: Vec<_> = ["a1", "b2", "c3"]
            .into_iter()
            .map(InternalOrganizationId::from)
            .collect();
        let orgs = client.list_organizations(&ids).await?;

        let external: Vec<_> = orgs
            .iter()
            .filter_map(|o| o.external_id.as_ref())
            .map(|id| id.as_str())
            .collect();
        assert_eq!(external, ["111", "222"]);
        Ok(())
    }

    #[tokio::test]
    async fn feature_review_posts_feature_name() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(FEATURE_REVIEW_PATH))
            .and(body_json(json!({ "feature": "ocm-enforce-offline-token-restrictions" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "enabled": true,
                "feature_id": "ocm-enforce-offline-token-restrictions",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?;
        let feature = Feature::from("ocm-enforce-offline-token-restrictions");
        assert!(client.feature_enabled(&feature).await?);
        Ok(())
    }

    #[tokio::test]
    async fn non_ok_status_is_reported_with_body() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(FEATURE_REVIEW_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?;
        let err = client
            .feature_enabled(&Feature::from("flag"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnexpectedStatus { status: 503, ref body } if body == "unavailable"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LABELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = AccountsClient::new(server.uri())?;
        let err = client
            .list_labels(&LabelQuery::capability(CAPABILITY))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
        Ok(())
    }

    #[test]
    fn access_token_is_redacted() {
        let token = AccessToken::from("eyJhbGciOiJSUzI1NiJ9.payload.signature");
        assert_eq!(format!("{token:?}"), "***ACCESS TOKEN***");
        assert_eq!(format!("{token}"), "***ACCESS TOKEN***");
        assert_eq!(format!("{token:#?}"), "\"eyJhbGciOiJSUz…\"");
    }
}

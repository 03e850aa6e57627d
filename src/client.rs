//! Composed request surface.
//!
//! [`ApiClient`] wires the response cache, credential state and request
//! pipeline together. Reads go through the cache and are deduplicated; every
//! call, read or write, goes through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{
    AntiForgeryStore, CredentialRenewer, CredentialStore, NavigationSignal, Navigator,
    RefreshCoordinator, SignOutPolicy, TokenGrant,
};
use crate::cache::{CacheConfig, CacheCoordinator, CacheKey, CacheSweeper, QueryParams};
use crate::config::{ApiSettings, AuthSettings, Settings};
use crate::error::ApiError;
use crate::pipeline::{
    ApiRequest, CallKind, DefaultHeaders, HttpRenewer, RequestPipeline, ReqwestTransport,
    Transport,
};

/// Everything an [`ApiClient`] needs from configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api: ApiSettings,
    pub auth: AuthSettings,
    pub cache: CacheConfig,
}

impl ClientConfig {
    /// Defaults for a backend at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            api: ApiSettings::new(base_url),
            auth: AuthSettings::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl From<&Settings> for ClientConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            api: settings.api.clone(),
            auth: settings.auth.clone(),
            cache: CacheConfig::from(&settings.cache),
        }
    }
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    renewer: Option<Arc<dyn CredentialRenewer>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ApiClientBuilder {
    /// Replace the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the renewal exchange.
    pub fn renewer(mut self, renewer: Arc<dyn CredentialRenewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let ClientConfig { api, auth, cache } = self.config;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&api)?),
        };
        let renewer: Arc<dyn CredentialRenewer> = match self.renewer {
            Some(renewer) => renewer,
            None => Arc::new(HttpRenewer::new(
                Arc::clone(&transport),
                auth.renewal_path.clone(),
            )),
        };
        let navigator: Arc<dyn Navigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(NavigationSignal::new()),
        };

        let defaults = DefaultHeaders::new();
        let credentials = Arc::new(match &auth.credentials_file {
            Some(path) => CredentialStore::with_file(defaults.clone(), path.clone()),
            None => CredentialStore::new(defaults.clone()),
        });
        let anti_forgery = Arc::new(AntiForgeryStore::new());
        let refresh = RefreshCoordinator::new(
            Arc::clone(&credentials),
            renewer,
            navigator,
            SignOutPolicy::from(&auth),
        );
        let responses = CacheCoordinator::new(&cache);
        let session_cache = Arc::clone(responses.cache());
        refresh.on_session_end(move || session_cache.invalidate(None));
        let pipeline = RequestPipeline::new(transport, defaults, Arc::clone(&anti_forgery), refresh);

        Ok(ApiClient {
            pipeline: Arc::new(pipeline),
            responses,
            credentials,
            anti_forgery,
            auth,
            cache,
        })
    }
}

/// Cached, session-aware client for one backend.
pub struct ApiClient {
    pipeline: Arc<RequestPipeline>,
    responses: CacheCoordinator<Value>,
    credentials: Arc<CredentialStore>,
    anti_forgery: Arc<AntiForgeryStore>,
    auth: AuthSettings,
    cache: CacheConfig,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: None,
            renewer: None,
            navigator: None,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn anti_forgery(&self) -> &AntiForgeryStore {
        &self.anti_forgery
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        self.pipeline.refresh()
    }

    pub fn responses(&self) -> &CacheCoordinator<Value> {
        &self.responses
    }

    /// Cached read with the default lifetime.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: QueryParams,
    ) -> Result<T, ApiError> {
        self.get_with_ttl(endpoint, params, self.cache.default_ttl)
            .await
    }

    /// Cached read of slow-changing reference data.
    pub async fn get_metadata<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: QueryParams,
    ) -> Result<T, ApiError> {
        self.get_with_ttl(endpoint, params, self.cache.metadata_ttl)
            .await
    }

    pub async fn get_with_ttl<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: QueryParams,
        ttl: Duration,
    ) -> Result<T, ApiError> {
        let value = self.get_value(endpoint, params, ttl).await?;
        decode(value)
    }

    /// Cached read returning the raw JSON value.
    ///
    /// Identical concurrent reads share one underlying call.
    pub async fn get_value(
        &self,
        endpoint: &str,
        params: QueryParams,
        ttl: Duration,
    ) -> Result<Value, ApiError> {
        let key = CacheKey::new(endpoint, &params);
        let request = ApiRequest::get(endpoint).with_query(params);
        let pipeline = Arc::clone(&self.pipeline);
        self.responses
            .get_or_fetch(key, ttl, move || async move {
                pipeline.execute(&request).await
            })
            .await
    }

    /// Read that bypasses the response cache.
    pub async fn get_uncached<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: QueryParams,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::get(endpoint).with_query(params);
        decode(self.pipeline.execute(&request).await?)
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.send(ApiRequest::put(path, body)).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.send(ApiRequest::patch(path, body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Send any request through the pipeline, uncached.
    ///
    /// Writes to a configured sign-in endpoint are treated as sign-in calls.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let request = self.classify(request);
        decode(self.pipeline.execute(&request).await?)
    }

    /// Sign in (or sign up) and store the returned credentials.
    ///
    /// No credential is attached and a rejection is returned unchanged. A
    /// successful response replaces the previous session: cached responses
    /// are dropped, and a response without an access token leaves the client
    /// signed out.
    pub async fn sign_in(&self, path: &str, body: Value) -> Result<Value, ApiError> {
        let request = ApiRequest::sign_in(path, body);
        let value = self.pipeline.execute(&request).await?;

        let grant: TokenGrant = serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!(path, error = %err, "sign-in response is not a token grant");
            TokenGrant::default()
        });
        self.responses.invalidate(None);
        self.credentials.clear();
        match grant.access() {
            Some(access) => {
                self.credentials.set_access(access);
                info!(path, "signed in");
            }
            None => warn!(path, "sign-in response carried no access token; signed out"),
        }
        if let Some(refresh) = grant.refresh() {
            self.credentials.set_refresh(refresh);
        }
        Ok(value)
    }

    /// Forget credentials and every cached response.
    pub fn sign_out(&self) {
        self.credentials.clear();
        self.responses.invalidate(None);
        info!("signed out");
    }

    /// Fetch a fresh anti-forgery token. Failures clear the stored token.
    pub async fn refresh_anti_forgery_token(&self) -> Option<String> {
        let request = ApiRequest::get(self.auth.anti_forgery_path.clone());
        let token = match self.pipeline.execute(&request).await {
            Ok(value) => value
                .get("csrf_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(err) => {
                warn!(error = %err, "failed to fetch anti-forgery token");
                None
            }
        };
        self.anti_forgery.set(token);
        self.anti_forgery.get()
    }

    pub fn invalidate(&self, endpoint: &str, params: &QueryParams) {
        self.responses
            .invalidate(Some(&CacheKey::new(endpoint, params)));
    }

    /// Drop every cached read of `endpoint`, whatever its parameters.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let removed = self.responses.cache().invalidate_endpoint(endpoint);
        debug!(endpoint, removed, "invalidated endpoint");
        removed
    }

    pub fn invalidate_all(&self) {
        self.responses.invalidate(None);
    }

    /// Start the periodic expiry sweep. Must be called within a Tokio runtime.
    pub fn spawn_sweeper(&self) -> CacheSweeper {
        CacheSweeper::spawn(Arc::clone(self.responses.cache()), self.cache.sweep_interval)
    }

    fn classify(&self, request: ApiRequest) -> ApiRequest {
        if request.kind != CallKind::Write {
            return request;
        }
        let path = request.path.split('?').next().unwrap_or_default();
        if path == self.auth.renewal_path {
            return request.with_kind(CallKind::Renewal);
        }
        if self.auth.sign_in_endpoints.iter().any(|endpoint| endpoint == path) {
            return request.with_kind(CallKind::SignIn);
        }
        request
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::future::join_all;
    use reqwest::header::{AUTHORIZATION, HeaderMap};
    use serde_json::json;

    use super::*;
    use crate::auth::{ANTI_FORGERY_HEADER, AccessToken, RefreshToken};
    use crate::pipeline::TransportResponse;

    /// Routes by path and records every call.
    #[derive(Default)]
    struct Router {
        calls: AtomicUsize,
        seen: Mutex<Vec<(ApiRequest, HeaderMap)>>,
    }

    impl Router {
        fn calls_to(&self, path: &str) -> usize {
            self.seen
                .lock()
                .expect("seen lock")
                .iter()
                .filter(|(request, _)| request.path == path)
                .count()
        }

        fn last_headers(&self) -> HeaderMap {
            self.seen
                .lock()
                .expect("seen lock")
                .last()
                .map(|(_, headers)| headers.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for Router {
        async fn send(
            &self,
            request: &ApiRequest,
            headers: HeaderMap,
        ) -> Result<TransportResponse, ApiError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("seen lock")
                .push((request.clone(), headers));
            tokio::task::yield_now().await;

            let response = match request.path.as_str() {
                "/api/cars/makes" => TransportResponse::new(200, format!(r#"["Kia","call-{call}"]"#)),
                "/api/auth/login" => TransportResponse::new(
                    200,
                    r#"{"access_token":"T1","refresh_token":"R1","token_type":"bearer"}"#,
                ),
                "/api/auth/register" => TransportResponse::new(200, r#"{"id":42,"email":"new@b.c"}"#),
                "/api/auth/broken" => TransportResponse::new(200, r#"["not","a","grant"]"#),
                "/api/csrf-token" => TransportResponse::new(200, r#"{"csrf_token":" tok-1 "}"#),
                "/api/cars" => TransportResponse::new(201, r#"{"id":7}"#),
                "/api/cars/7" => TransportResponse::new(204, ""),
                _ => TransportResponse::new(404, r#"{"detail":"Not found"}"#),
            };
            Ok(response)
        }
    }

    fn client() -> (ApiClient, Arc<Router>) {
        let router = Arc::new(Router::default());
        let config = ClientConfig::new(Url::parse("http://backend.test").expect("url"));
        let client = ApiClient::builder(config)
            .transport(router.clone())
            .build()
            .expect("client");
        (client, router)
    }

    #[tokio::test]
    async fn concurrent_identical_reads_issue_one_call() {
        let (client, router) = client();

        let reads = (0..3).map(|_| client.get::<Vec<String>>("/api/cars/makes", QueryParams::new()));
        let results = join_all(reads).await;

        assert_eq!(router.calls_to("/api/cars/makes"), 1);
        for result in results {
            assert_eq!(result.expect("makes"), vec!["Kia", "call-0"]);
        }

        // served from cache afterwards
        let again: Vec<String> = client
            .get("/api/cars/makes", QueryParams::new())
            .await
            .expect("cached");
        assert_eq!(again, vec!["Kia", "call-0"]);
        assert_eq!(router.calls_to("/api/cars/makes"), 1);
    }

    #[tokio::test]
    async fn different_params_are_separate_entries() {
        let (client, router) = client();
        let kia = QueryParams::new().with("make", "Kia");
        let bmw = QueryParams::new().with("make", "BMW");

        let _: Vec<String> = client.get("/api/cars/makes", kia.clone()).await.expect("kia");
        let _: Vec<String> = client.get("/api/cars/makes", bmw).await.expect("bmw");
        assert_eq!(router.calls_to("/api/cars/makes"), 2);

        client.invalidate("/api/cars/makes", &kia);
        let _: Vec<String> = client.get("/api/cars/makes", kia).await.expect("kia again");
        assert_eq!(router.calls_to("/api/cars/makes"), 3);

        assert_eq!(client.invalidate_endpoint("/api/cars/makes"), 2);
    }

    #[tokio::test]
    async fn uncached_reads_always_hit_the_transport() {
        let (client, router) = client();
        for _ in 0..2 {
            let _: Vec<String> = client
                .get_uncached("/api/cars/makes", QueryParams::new())
                .await
                .expect("makes");
        }
        assert_eq!(router.calls_to("/api/cars/makes"), 2);
        assert!(client.responses().cache().is_empty());
    }

    #[tokio::test]
    async fn sign_in_stores_credentials_and_sign_out_clears_everything() {
        let (client, router) = client();
        let body = client
            .sign_in("/api/auth/login", json!({"email": "a@b.c", "password": "pw"}))
            .await
            .expect("signed in");
        assert_eq!(body["token_type"], "bearer");
        assert!(router.last_headers().get(AUTHORIZATION).is_none());
        assert_eq!(client.credentials().access(), Some(AccessToken::new("T1")));
        assert_eq!(client.credentials().refresh(), Some(RefreshToken::new("R1")));

        let _: Vec<String> = client
            .get("/api/cars/makes", QueryParams::new())
            .await
            .expect("makes");
        assert_eq!(
            router.last_headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer T1")
        );

        client.sign_out();
        assert!(!client.credentials().is_signed_in());
        assert!(client.responses().cache().is_empty());
    }

    #[tokio::test]
    async fn sign_in_drops_responses_cached_by_the_previous_session() {
        let (client, router) = client();
        client.credentials().set_access(AccessToken::new("OLD"));
        let _: Vec<String> = client
            .get("/api/cars/makes", QueryParams::new())
            .await
            .expect("makes");
        assert_eq!(client.responses().cache().len(), 1);

        client
            .sign_in("/api/auth/login", json!({"email": "b@b.c", "password": "pw"}))
            .await
            .expect("signed in");
        assert!(client.responses().cache().is_empty());

        let _: Vec<String> = client
            .get("/api/cars/makes", QueryParams::new())
            .await
            .expect("makes");
        assert_eq!(router.calls_to("/api/cars/makes"), 2);
    }

    #[tokio::test]
    async fn sign_in_without_access_token_ends_the_previous_session() {
        let (client, _) = client();
        client.credentials().set_access(AccessToken::new("OLD"));
        client.credentials().set_refresh(RefreshToken::new("OLD-R"));

        let body = client
            .sign_in("/api/auth/register", json!({"email": "new@b.c", "password": "pw"}))
            .await
            .expect("registered");

        assert_eq!(body["id"], 42);
        assert!(!client.credentials().is_signed_in());
        assert!(client.credentials().refresh().is_none());
    }

    #[tokio::test]
    async fn sign_in_tolerates_a_body_that_is_not_a_grant() {
        let (client, _) = client();
        client.credentials().set_access(AccessToken::new("OLD"));

        let body = client
            .sign_in("/api/auth/broken", json!({}))
            .await
            .expect("response still returned");

        assert_eq!(body, json!(["not", "a", "grant"]));
        assert!(!client.credentials().is_signed_in());
    }

    #[tokio::test]
    async fn writes_carry_the_anti_forgery_token() {
        let (client, router) = client();
        assert_eq!(client.refresh_anti_forgery_token().await.as_deref(), Some("tok-1"));

        let created: Value = client
            .post("/api/cars", json!({"make": "Kia"}))
            .await
            .expect("created");
        assert_eq!(created, json!({"id": 7}));
        assert_eq!(
            router
                .last_headers()
                .get(ANTI_FORGERY_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("tok-1")
        );

        let deleted: Value = client.delete("/api/cars/7").await.expect("deleted");
        assert_eq!(deleted, Value::Null);
    }

    #[tokio::test]
    async fn failed_anti_forgery_fetch_clears_the_token() {
        let mut config = ClientConfig::new(Url::parse("http://backend.test").expect("url"));
        config.auth.anti_forgery_path = "/api/missing".into();
        let client = ApiClient::builder(config)
            .transport(Arc::new(Router::default()))
            .build()
            .expect("client");
        client.anti_forgery().set(Some("stale".into()));

        assert!(client.refresh_anti_forgery_token().await.is_none());
        assert!(client.anti_forgery().get().is_none());
    }

    #[tokio::test]
    async fn writes_to_sign_in_endpoints_are_classified() {
        let (client, router) = client();
        client.credentials().set_access(AccessToken::new("OLD"));

        let _: Value = client
            .send(ApiRequest::post("/api/auth/login", json!({})))
            .await
            .expect("login");
        assert!(router.last_headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn upstream_errors_expose_user_messages() {
        let (client, _) = client();
        let err = client
            .get::<Value>("/api/unknown", QueryParams::new())
            .await
            .expect_err("404");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.user_message(), "Not found");
    }

    #[tokio::test]
    async fn decode_mismatch_is_reported() {
        let (client, _) = client();
        let err = client
            .get::<u32>("/api/cars/makes", QueryParams::new())
            .await
            .expect_err("shape mismatch");
        assert!(matches!(err, ApiError::Decode(_)));
    }
}

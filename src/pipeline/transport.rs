use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use tracing::debug;

use super::request::ApiRequest;
use crate::config::ApiSettings;
use crate::error::ApiError;

/// Raw response handed back to the pipeline for classification.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends a fully prepared request. Implementations do not interpret statuses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        headers: HeaderMap,
    ) -> Result<TransportResponse, ApiError>;
}

/// HTTP transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    api_base: Url,
    auth_base: Url,
    long_running_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: root(&settings.base_url)?,
            auth_base: root(&settings.auth_base_url)?,
            long_running_timeout: settings.long_running_timeout,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("fetchwell/", env!("CARGO_PKG_VERSION"))
    }

    fn url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let base = if request.kind.targets_auth() {
            &self.auth_base
        } else {
            &self.api_base
        };
        let mut url = base
            .join(request.path.trim_start_matches('/'))
            .map_err(|err| ApiError::invalid_request(format!("invalid path {}: {err}", request.path)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in request.query.to_query_pairs() {
                pairs.append_pair(&name, &value);
            }
        }
        Ok(url)
    }
}

/// Normalise a base URL so request paths are appended below its path.
fn root(base: &Url) -> Result<Url, ApiError> {
    if base.cannot_be_a_base() {
        return Err(ApiError::invalid_request(format!(
            "invalid base URL {base}: cannot carry a path"
        )));
    }
    let mut root = base.clone();
    root.set_query(None);
    root.set_fragment(None);
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    Ok(root)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        headers: HeaderMap,
    ) -> Result<TransportResponse, ApiError> {
        let url = self.url(request)?;
        debug!(method = %request.method, url = %url, "sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if request.long_running {
            builder = builder.timeout(self.long_running_timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryParams;
    use crate::pipeline::request::CallKind;

    fn transport() -> ReqwestTransport {
        let api = Url::parse("http://api.local:8000").expect("url");
        let auth = Url::parse("http://auth.local:9000").expect("url");
        ReqwestTransport::new(&ApiSettings {
            base_url: api,
            auth_base_url: auth,
            request_timeout: Duration::from_secs(10),
            long_running_timeout: Duration::from_secs(120),
        })
        .expect("transport")
    }

    #[test]
    fn auth_calls_use_the_auth_base() {
        let transport = transport();
        let renewal = ApiRequest::get("/api/auth/refresh").with_kind(CallKind::Renewal);
        assert_eq!(
            transport.url(&renewal).expect("url").as_str(),
            "http://auth.local:9000/api/auth/refresh"
        );

        let read = ApiRequest::get("/api/cars");
        assert_eq!(
            transport.url(&read).expect("url").as_str(),
            "http://api.local:8000/api/cars"
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        for base in ["http://proxy.local/backend", "http://proxy.local/backend/"] {
            let prefixed = Url::parse(base).expect("url");
            let transport = ReqwestTransport::new(&ApiSettings::new(prefixed)).expect("transport");

            let read = ApiRequest::get("/api/cars");
            assert_eq!(
                transport.url(&read).expect("url").as_str(),
                "http://proxy.local/backend/api/cars"
            );
            let relative = ApiRequest::get("api/cars/makes");
            assert_eq!(
                transport.url(&relative).expect("url").as_str(),
                "http://proxy.local/backend/api/cars/makes"
            );
        }
    }

    #[test]
    fn query_parameters_are_encoded() {
        let transport = transport();
        let request = ApiRequest::get("/api/cars/models").with_query(
            QueryParams::new()
                .with("make", "Rolls Royce")
                .with("year", 2020)
                .with("skip", serde_json::Value::Null),
        );
        let url = transport.url(&request).expect("url");
        assert_eq!(url.query(), Some("make=Rolls+Royce&year=2020"));
    }
}

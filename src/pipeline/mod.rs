//! Outbound request pipeline.
//!
//! Every call passes through [`RequestPipeline::execute`], which prepares the
//! headers, hands the request to a [`Transport`] and classifies the response.
//! An authenticated call rejected with 401 waits for a credential renewal and
//! is replayed once with the renewed credential.

mod defaults;
mod renewal;
mod request;
mod transport;

use std::sync::Arc;

use metrics::counter;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

pub use defaults::DefaultHeaders;
pub use renewal::HttpRenewer;
pub use request::{ApiRequest, CallKind};
pub use transport::{ReqwestTransport, Transport, TransportResponse};

use crate::auth::{ANTI_FORGERY_HEADER, AccessToken, AntiForgeryStore, RefreshCoordinator};
use crate::error::ApiError;

pub(crate) const METRIC_REQUEST_RETRIED: &str = "fetchwell_request_retried_total";

pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    defaults: DefaultHeaders,
    anti_forgery: Arc<AntiForgeryStore>,
    refresh: RefreshCoordinator,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        defaults: DefaultHeaders,
        anti_forgery: Arc<AntiForgeryStore>,
        refresh: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            defaults,
            anti_forgery,
            refresh,
        }
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Send `request` and decode a successful body as JSON.
    ///
    /// An empty success body decodes to `Value::Null`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let mut renewed: Option<AccessToken> = None;
        loop {
            let headers = self.prepare(request, renewed.as_ref())?;
            let response = self.transport.send(request, headers).await?;

            if response.is_success() {
                return decode(&response.body);
            }
            if response.status != 401 || !request.kind.is_authenticated() {
                return Err(ApiError::Upstream {
                    status: response.status,
                    body: response.body_text(),
                });
            }
            if renewed.is_some() {
                warn!(path = %request.path, "credential rejected after renewal");
                return Err(ApiError::AuthenticationExpired);
            }

            debug!(path = %request.path, "credential rejected; waiting for renewal");
            renewed = Some(self.refresh.renew().await?);
            counter!(METRIC_REQUEST_RETRIED).increment(1);
        }
    }

    fn prepare(
        &self,
        request: &ApiRequest,
        renewed: Option<&AccessToken>,
    ) -> Result<HeaderMap, ApiError> {
        let mut headers = self.defaults.snapshot();
        if !request.kind.is_authenticated() {
            headers.remove(AUTHORIZATION);
            return Ok(headers);
        }

        if let Some(token) = renewed {
            headers.insert(AUTHORIZATION, token.bearer()?);
        }
        if request.is_state_changing() {
            if let Some(token) = self.anti_forgery.get() {
                let value = HeaderValue::from_str(&token).map_err(|err| {
                    ApiError::invalid_request(format!("anti-forgery token is not a header: {err}"))
                })?;
                headers.insert(ANTI_FORGERY_HEADER, value);
            }
        }
        Ok(headers)
    }
}

fn decode(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

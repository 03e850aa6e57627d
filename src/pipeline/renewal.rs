use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::json;
use tracing::debug;

use super::request::ApiRequest;
use super::transport::Transport;
use crate::auth::{CredentialRenewer, RefreshToken, RenewedCredentials, TokenGrant};
use crate::error::ApiError;

/// Renews credentials by posting the refresh credential to the renewal endpoint.
///
/// The exchange goes straight to the transport: it carries no access
/// credential and a rejection is never itself renewed.
pub struct HttpRenewer {
    transport: Arc<dyn Transport>,
    path: String,
}

impl HttpRenewer {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl CredentialRenewer for HttpRenewer {
    async fn renew(&self, refresh: &RefreshToken) -> Result<RenewedCredentials, ApiError> {
        let request = ApiRequest::renewal(
            self.path.clone(),
            json!({ "refresh_token": refresh.as_str() }),
        );
        debug!(path = %self.path, "exchanging refresh credential");

        let response = self.transport.send(&request, HeaderMap::new()).await?;
        if !response.is_success() {
            return Err(ApiError::renewal_failed(format!(
                "renewal endpoint returned status {}",
                response.status
            )));
        }

        let grant: TokenGrant = serde_json::from_slice(&response.body)
            .map_err(|err| ApiError::renewal_failed(format!("malformed renewal response: {err}")))?;
        let access = grant
            .access()
            .ok_or_else(|| ApiError::renewal_failed("renewal response carried no access token"))?;
        Ok(RenewedCredentials {
            access,
            refresh: grant.refresh(),
        })
    }
}

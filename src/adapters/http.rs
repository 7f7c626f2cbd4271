use crate::utils::error::{Result, TrackerError};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const USER_AGENT_VALUE: &str = concat!("OpenCorps/", env!("CARGO_PKG_VERSION"));

/// JSON REST endpoint with token authentication.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    client: Client,
    base_url: String,
    accept: &'static str,
    token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub label: String,
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Errors unless the status is one of `codes`.
    pub fn expect(self, codes: &[u16]) -> Result<Self> {
        if codes.contains(&self.status) {
            Ok(self)
        } else {
            Err(TrackerError::HttpStatusError {
                endpoint: self.label,
                status: self.status,
                body: self.body,
            })
        }
    }
}

impl ApiEndpoint {
    pub fn new(base_url: &str, accept: &'static str, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            accept,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub async fn request(
        &self,
        method: Method,
        resource: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, resource);
        let label = format!("{} {}", method, resource);

        let mut builder = self
            .client
            .request(method, &url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, self.accept);
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("token {}", token));
        }
        if let Some(payload) = payload {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(payload.to_string());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if (200..300).contains(&status) {
            tracing::info!("{} {} (returned {} bytes)", label, status, body.len());
            tracing::debug!("payload: {:?}", payload);
            tracing::debug!("got: {}", body);
        } else {
            tracing::warn!("{} {} (returned {} bytes)", label, status, body.len());
            tracing::debug!("payload: {:?}", payload);
            tracing::info!("{}", body);
        }

        Ok(ApiResponse {
            label,
            status,
            body,
        })
    }

    pub async fn get(&self, resource: &str) -> Result<ApiResponse> {
        self.request(Method::GET, resource, None).await
    }

    pub async fn post(&self, resource: &str, payload: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::POST, resource, Some(payload)).await
    }

    pub async fn put(&self, resource: &str, payload: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PUT, resource, Some(payload)).await
    }

    pub async fn patch(&self, resource: &str, payload: &serde_json::Value) -> Result<ApiResponse> {
        self.request(Method::PATCH, resource, Some(payload)).await
    }
}

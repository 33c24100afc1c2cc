//! # HTTP API Plumbing
//!
//! Thin JSON-over-HTTP client shared by the backend and orchestrator clients. Each
//! service authenticates with a bearer-style token sent in a service-specific header;
//! the token can be replaced after construction (the orchestrator's root token only
//! exists once its ACL system has been bootstrapped).

use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{CompatError, Result};

pub struct HttpApi {
    service: &'static str,
    client: Client,
    base_url: Url,
    token_header: &'static str,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("token_set", &self.token.read().is_some())
            .finish()
    }
}

impl HttpApi {
    pub fn new(
        service: &'static str,
        base_url: &str,
        token_header: &'static str,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            CompatError::Configuration(format!("Invalid {service} base URL '{base_url}': {e}"))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("compat-matrix/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CompatError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            service,
            client,
            base_url,
            token_header,
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(token);
        self
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            CompatError::Configuration(format!("Failed to construct URL for {path}: {e}"))
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.url(path)?;
        debug!(service = self.service, %method, url = %url, "API request");
        let mut builder = self.client.request(method, url);
        if let Some(token) = self.token.read().as_deref() {
            builder = builder.header(self.token_header, token);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| CompatError::api(self.service, format!("{path}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(CompatError::api(
            self.service,
            format!("{path}: HTTP {status}: {}", body.trim()),
        ))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)?, path).await?;
        self.decode(response, path).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .send(self.request(Method::POST, path)?.json(body), path)
            .await?;
        self.decode(response, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)?, path).await?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response, path: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            CompatError::api(self.service, format!("{path}: invalid response body: {e}"))
        })
    }
}

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 12;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("snt-planner/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
});

/// Base URL plus optional bearer token shared by the HTTP source and sink.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub token: Option<String>,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .authorize(HTTP_CLIENT.get(&url))
            .send()
            .await
            .with_context(|| format!("failed GET request: {url}"))?;
        read_json(&url, "GET", response).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        let response = self
            .authorize(HTTP_CLIENT.post(&url).json(body))
            .send()
            .await
            .with_context(|| format!("failed POST request: {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(180).collect();
            return Err(anyhow!("POST {url} returned {status}: {preview}"));
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(
    url: &str,
    method: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed reading response body: {url}"))?;
    if !status.is_success() {
        let preview: String = body.chars().take(180).collect();
        return Err(anyhow!("{method} {url} returned {status}: {preview}"));
    }
    serde_json::from_str(&body).with_context(|| format!("invalid JSON response: {url}"))
}

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::{join_url, Endpoint};

    #[test]
    fn joins_without_doubling_slashes() {
        assert_eq!(
            join_url("https://iaso.example.org/", "/api/snt_malaria/scenarios/"),
            "https://iaso.example.org/api/snt_malaria/scenarios/"
        );
        assert_eq!(join_url("http://localhost:8081", "health"), "http://localhost:8081/health");
    }

    #[test]
    fn blank_token_is_dropped() {
        let endpoint = Endpoint::new("http://localhost", Some("  ".to_string()));
        assert!(endpoint.token.is_none());
    }
}

//! Common HTTP plumbing for the registry client
//!
//! Wraps `reqwest` with the registry's anonymous bearer-token handshake:
//! a request answered with `401` and a `WWW-Authenticate: Bearer ...`
//! challenge is retried once with a token fetched from the challenge realm.
//! Tokens are kept per repository and reused until the registry rejects
//! them again.

pub mod challenge;

use crate::error::RegistryError;
use crate::models::TokenResponse;
use challenge::BearerChallenge;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Longest response body echoed back inside an error
const ERROR_BODY_LIMIT: usize = 500;

/// HTTP client wrapper with anonymous registry authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    /// Bearer tokens keyed by repository URL
    tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tokens: Arc::default(),
        }
    }

    /// Get the underlying HTTP client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request, answering a bearer challenge once if the registry asks for one.
    ///
    /// Non-success statuses other than `404` are turned into [`RegistryError::Api`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        accept: &[&str],
    ) -> Result<Response, RegistryError> {
        debug!("{} {}", method, url);
        let key = repository_key(url);
        let cached = self.cached_token(key);
        let response = self
            .request(method.clone(), url, accept, cached.as_deref())
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            match Self::challenge_of(&response) {
                Some(challenge) => {
                    let token = self.fetch_token(&challenge).await?;
                    self.store_token(key, &token);
                    debug!("Retrying {} {} with bearer token", method, url);
                    self.request(method, url, accept, Some(&token)).await?
                }
                None => response,
            }
        } else {
            response
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Api {
                status: status.as_u16(),
                url: url.to_string(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }
        Ok(response)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        accept: &[&str],
        token: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut request = self.client.request(method, url);
        if !accept.is_empty() {
            request = request.header(ACCEPT, accept.join(", "));
        }
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        request.send().await.map_err(RegistryError::Http)
    }

    fn cached_token(&self, key: &str) -> Option<String> {
        self.tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(key).cloned())
    }

    fn store_token(&self, key: &str, token: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(key.to_string(), token.to_string());
        }
    }

    fn challenge_of(response: &Response) -> Option<BearerChallenge> {
        response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value: &HeaderValue| value.to_str().ok())
            .find_map(BearerChallenge::parse)
    }

    /// Exchange a bearer challenge for an anonymous pull token.
    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, RegistryError> {
        let url = challenge.token_url();
        debug!("Requesting anonymous registry token from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(RegistryError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Authentication(format!(
                "token request to {} failed: {} - {}",
                challenge.realm,
                status,
                body.chars().take(ERROR_BODY_LIMIT).collect::<String>()
            )));
        }

        let text = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&text)?;
        token.into_token().ok_or_else(|| {
            RegistryError::Authentication(format!(
                "token response from {} carried no token",
                challenge.realm
            ))
        })
    }
}

/// Repository part of a v2 API URL, shared by its manifests and blobs.
fn repository_key(url: &str) -> &str {
    ["/manifests/", "/blobs/"]
        .iter()
        .find_map(|marker| url.find(marker).map(|end| &url[..end]))
        .unwrap_or(url)
}

/// Read a response header as a string, if present and valid UTF-8.
#[must_use]
pub fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

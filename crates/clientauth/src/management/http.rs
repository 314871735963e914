//! HTTP binding of the management API.
//!
//! Requests are authenticated with a bearer token and sent as JSON. A 404
//! maps to `NotFound`; every other non-success status maps to an `Api` error
//! carrying the message from the response body. Nothing is retried.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::ManagementApi;
use crate::CredResult;
use crate::config::ManagementConfig;
use crate::error::CredentialsError;
use crate::types::{Client, ClientUpdate, Credential, CredentialUpdate, NewCredential};

/// Management API client over HTTPS.
pub struct HttpManagementApi {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpManagementApi {
    /// Creates a client from the management configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL cannot carry path
    /// segments or the HTTP client cannot be built.
    pub fn new(config: &ManagementConfig) -> CredResult<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            CredentialsError::configuration(format!("invalid base_url {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CredentialsError::configuration(format!(
                "base_url {base_url} cannot be used as a base"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                CredentialsError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone().unwrap_or_default(),
        })
    }

    /// Builds the URL for the given path segments below the base URL.
    fn endpoint(&self, segments: &[&str]) -> CredResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                CredentialsError::configuration(format!(
                    "base_url {} cannot be used as a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        let req = if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        };
        req.header("Accept", "application/json")
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> CredResult<Response> {
        req.send().await.map_err(|e| {
            tracing::warn!(error = %e, "management API request failed: {what}");
            if e.is_timeout() {
                CredentialsError::network(format!("{what}: request timed out"))
            } else {
                CredentialsError::network(format!("{what}: {e}"))
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> CredResult<T> {
        tracing::debug!(%url, "GET {what}");
        let resp = self.send(self.request(Method::GET, url), what).await?;
        handle_response(resp, what).await
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: &B, what: &str) -> CredResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!(%url, %method, "{what}");
        let req = self.request(method, url).json(body);
        let resp = self.send(req, what).await?;
        handle_response(resp, what).await
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn read_client(&self, client_id: &str) -> CredResult<Client> {
        let url = self.endpoint(&["clients", client_id])?;
        self.get_json(url, &format!("read client {client_id}")).await
    }

    async fn update_client(&self, client_id: &str, update: &ClientUpdate) -> CredResult<Client> {
        let url = self.endpoint(&["clients", client_id])?;
        self.send_json(
            Method::PATCH,
            url,
            update,
            &format!("update client {client_id}"),
        )
        .await
    }

    async fn create_credential(
        &self,
        client_id: &str,
        credential: &NewCredential,
    ) -> CredResult<Credential> {
        let url = self.endpoint(&["clients", client_id, "credentials"])?;
        self.send_json(
            Method::POST,
            url,
            credential,
            &format!("create credential on {client_id}"),
        )
        .await
    }

    async fn update_credential(
        &self,
        client_id: &str,
        credential_id: &str,
        update: &CredentialUpdate,
    ) -> CredResult<Credential> {
        let url = self.endpoint(&["clients", client_id, "credentials", credential_id])?;
        self.send_json(
            Method::PATCH,
            url,
            update,
            &format!("update credential {credential_id}"),
        )
        .await
    }

    async fn delete_credential(&self, client_id: &str, credential_id: &str) -> CredResult<()> {
        let url = self.endpoint(&["clients", client_id, "credentials", credential_id])?;
        let what = format!("delete credential {credential_id}");
        tracing::debug!(%url, "DELETE {what}");
        let resp = self.send(self.request(Method::DELETE, url), &what).await?;
        check_status(resp, &what).await.map(|_| ())
    }

    async fn list_credentials(&self, client_id: &str) -> CredResult<Vec<Credential>> {
        let url = self.endpoint(&["clients", client_id, "credentials"])?;
        self.get_json(url, &format!("list credentials of {client_id}"))
            .await
    }
}

/// Maps non-success statuses to errors, returning the body text otherwise.
async fn check_status(resp: Response, what: &str) -> CredResult<String> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if status.is_success() {
        return Ok(body);
    }

    let message = error_message(&body).unwrap_or_else(|| {
        if body.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.clone()
        }
    });

    if status == StatusCode::NOT_FOUND {
        return Err(CredentialsError::not_found(format!("{what}: {message}")));
    }
    Err(CredentialsError::api(status.as_u16(), format!("{what}: {message}")))
}

async fn handle_response<T: DeserializeOwned>(resp: Response, what: &str) -> CredResult<T> {
    let body = check_status(resp, what).await?;
    serde_json::from_str(&body).map_err(|e| {
        CredentialsError::internal(format!("{what}: failed to parse response JSON: {e}"))
    })
}

/// Extracts the error message from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("message")
        .or_else(|| json.get("error_description"))
        .or_else(|| json.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

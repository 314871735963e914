//! In-memory management API.
//!
//! Keeps clients and credentials in process and enforces the rules the
//! remote API applies:
//!
//! - `token_endpoint_auth_method` and a credential binding are never both set
//! - bindings only reference existing credentials of the method's type
//! - a credential referenced by a binding cannot be deleted
//! - only `expires_at` of a credential can be updated
//! - `parse_expiry_from_cert` derives the expiry unless one is given
//!
//! Every call is journaled so tests can assert on the exact remote traffic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::ManagementApi;
use crate::CredResult;
use crate::cert;
use crate::error::CredentialsError;
use crate::types::credential::normalize_pem;
use crate::types::{
    AuthenticationMethod, Client, ClientUpdate, Credential, CredentialRef, CredentialType,
    CredentialUpdate, NewCredential, SignedRequestObjectBinding,
};

// =============================================================================
// Call Journal
// =============================================================================

/// A call received by the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `read_client`
    ReadClient {
        /// Target client.
        client_id: String,
    },
    /// `update_client`
    UpdateClient {
        /// Target client.
        client_id: String,
        /// Submitted payload.
        update: ClientUpdate,
    },
    /// `create_credential`
    CreateCredential {
        /// Target client.
        client_id: String,
        /// Submitted payload.
        credential: NewCredential,
    },
    /// `update_credential`
    UpdateCredential {
        /// Target client.
        client_id: String,
        /// Target credential.
        credential_id: String,
    },
    /// `delete_credential`
    DeleteCredential {
        /// Target client.
        client_id: String,
        /// Target credential.
        credential_id: String,
    },
    /// `list_credentials`
    ListCredentials {
        /// Target client.
        client_id: String,
    },
}

impl ApiCall {
    /// Returns the kind of call.
    #[must_use]
    pub fn kind(&self) -> CallKind {
        match self {
            Self::ReadClient { .. } => CallKind::ReadClient,
            Self::UpdateClient { .. } => CallKind::UpdateClient,
            Self::CreateCredential { .. } => CallKind::CreateCredential,
            Self::UpdateCredential { .. } => CallKind::UpdateCredential,
            Self::DeleteCredential { .. } => CallKind::DeleteCredential,
            Self::ListCredentials { .. } => CallKind::ListCredentials,
        }
    }

    /// Returns `true` for credential create/update/delete calls.
    #[must_use]
    pub fn is_credential_mutation(&self) -> bool {
        matches!(
            self.kind(),
            CallKind::CreateCredential | CallKind::UpdateCredential | CallKind::DeleteCredential
        )
    }

    /// Returns `true` for any call that changes remote state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.is_credential_mutation() || self.kind() == CallKind::UpdateClient
    }
}

/// Kind of management API call, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `read_client`
    ReadClient,
    /// `update_client`
    UpdateClient,
    /// `create_credential`
    CreateCredential,
    /// `update_credential`
    UpdateCredential,
    /// `delete_credential`
    DeleteCredential,
    /// `list_credentials`
    ListCredentials,
}

// =============================================================================
// Memory Backend
// =============================================================================

struct StoredClient {
    client: Client,
    /// Credentials in creation order.
    credentials: Vec<Credential>,
}

struct InjectedFailure {
    kind: CallKind,
    status: u16,
    message: String,
}

struct State {
    clients: HashMap<String, StoredClient>,
    calls: Vec<ApiCall>,
    failures: Vec<InjectedFailure>,
    clock: OffsetDateTime,
    next_id: u64,
}

impl State {
    /// Advances the logical clock; timestamps are strictly increasing.
    fn tick(&mut self) -> OffsetDateTime {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn next_credential_id(&mut self) -> String {
        self.next_id += 1;
        format!("cred_{:06}", self.next_id)
    }

    fn take_failure(&mut self, kind: CallKind) -> Option<CredentialsError> {
        let index = self.failures.iter().position(|f| f.kind == kind)?;
        let failure = self.failures.remove(index);
        Some(CredentialsError::api(failure.status, failure.message))
    }

    fn client_mut(&mut self, client_id: &str) -> CredResult<&mut StoredClient> {
        self.clients
            .get_mut(client_id)
            .ok_or_else(|| CredentialsError::not_found(format!("client {client_id}")))
    }
}

/// In-process implementation of [`ManagementApi`].
pub struct MemoryManagementApi {
    state: Mutex<State>,
}

impl Default for MemoryManagementApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManagementApi {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                clients: HashMap::new(),
                calls: Vec::new(),
                failures: Vec::new(),
                clock: OffsetDateTime::now_utc()
                    .replace_nanosecond(0)
                    .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a client. Bindings on `client` are stored as given.
    pub fn insert_client(&self, client: Client) {
        let mut state = self.lock();
        state.clients.insert(
            client.client_id.clone(),
            StoredClient {
                client,
                credentials: Vec::new(),
            },
        );
    }

    /// Removes a client and its credentials, as if deleted out of band.
    pub fn remove_client(&self, client_id: &str) -> bool {
        self.lock().clients.remove(client_id).is_some()
    }

    /// Returns a snapshot of a client without journaling a call.
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<Client> {
        self.lock()
            .clients
            .get(client_id)
            .map(|stored| stored.client.clone())
    }

    /// Returns the credentials of a client, as the API lists them, without
    /// journaling a call.
    #[must_use]
    pub fn credentials(&self, client_id: &str) -> Vec<Credential> {
        self.lock()
            .clients
            .get(client_id)
            .map(|stored| stored.credentials.iter().map(api_view).collect())
            .unwrap_or_default()
    }

    /// Returns every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Returns the calls that changed remote state.
    #[must_use]
    pub fn mutations(&self) -> Vec<ApiCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Clears the call journal.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Makes the next call of `kind` fail with the given status.
    pub fn fail_next(&self, kind: CallKind, status: u16, message: impl Into<String>) {
        self.lock().failures.push(InjectedFailure {
            kind,
            status,
            message: message.into(),
        });
    }
}

#[async_trait]
impl ManagementApi for MemoryManagementApi {
    async fn read_client(&self, client_id: &str) -> CredResult<Client> {
        let mut state = self.lock();
        state.calls.push(ApiCall::ReadClient {
            client_id: client_id.to_string(),
        });
        if let Some(err) = state.take_failure(CallKind::ReadClient) {
            return Err(err);
        }
        Ok(state.client_mut(client_id)?.client.clone())
    }

    async fn update_client(&self, client_id: &str, update: &ClientUpdate) -> CredResult<Client> {
        let mut state = self.lock();
        state.calls.push(ApiCall::UpdateClient {
            client_id: client_id.to_string(),
            update: update.clone(),
        });
        if let Some(err) = state.take_failure(CallKind::UpdateClient) {
            return Err(err);
        }

        let stored = state.client_mut(client_id)?;
        let mut next = stored.client.clone();

        if let Some(method) = update.token_endpoint_auth_method {
            next.token_endpoint_auth_method = method;
        }
        if let Some(binding) = &update.client_authentication_methods {
            next.client_authentication_methods = binding.as_ref().map(|b| b.to_bindings());
        }
        if let Some(secret) = &update.client_secret {
            next.client_secret = Some(secret.clone());
        }
        if let Some(sro) = &update.signed_request_object {
            next.signed_request_object = sro.clone();
        }

        validate_client(&next, &stored.credentials)?;
        stored.client = next;
        Ok(stored.client.clone())
    }

    async fn create_credential(
        &self,
        client_id: &str,
        credential: &NewCredential,
    ) -> CredResult<Credential> {
        let mut state = self.lock();
        state.calls.push(ApiCall::CreateCredential {
            client_id: client_id.to_string(),
            credential: credential.clone(),
        });
        if let Some(err) = state.take_failure(CallKind::CreateCredential) {
            return Err(err);
        }
        if !state.clients.contains_key(client_id) {
            return Err(CredentialsError::not_found(format!("client {client_id}")));
        }

        let mut created = materialize(credential)?;
        let now = state.tick();
        created.id = Some(state.next_credential_id());
        created.created_at = Some(now);
        created.updated_at = Some(now);

        let view = api_view(&created);
        state.client_mut(client_id)?.credentials.push(created);
        Ok(view)
    }

    async fn update_credential(
        &self,
        client_id: &str,
        credential_id: &str,
        update: &CredentialUpdate,
    ) -> CredResult<Credential> {
        let mut state = self.lock();
        state.calls.push(ApiCall::UpdateCredential {
            client_id: client_id.to_string(),
            credential_id: credential_id.to_string(),
        });
        if let Some(err) = state.take_failure(CallKind::UpdateCredential) {
            return Err(err);
        }

        let now = state.tick();
        let stored = state.client_mut(client_id)?;
        let credential = stored
            .credentials
            .iter_mut()
            .find(|c| c.id.as_deref() == Some(credential_id))
            .ok_or_else(|| CredentialsError::not_found(format!("credential {credential_id}")))?;
        credential.expires_at = Some(update.expires_at);
        credential.updated_at = Some(now);
        Ok(api_view(credential))
    }

    async fn delete_credential(&self, client_id: &str, credential_id: &str) -> CredResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DeleteCredential {
            client_id: client_id.to_string(),
            credential_id: credential_id.to_string(),
        });
        if let Some(err) = state.take_failure(CallKind::DeleteCredential) {
            return Err(err);
        }

        let stored = state.client_mut(client_id)?;
        if referenced_ids(&stored.client).contains(&credential_id) {
            return Err(CredentialsError::api(
                409,
                format!("credential {credential_id} is referenced by an active binding"),
            ));
        }
        let before = stored.credentials.len();
        stored
            .credentials
            .retain(|c| c.id.as_deref() != Some(credential_id));
        if stored.credentials.len() == before {
            return Err(CredentialsError::not_found(format!(
                "credential {credential_id}"
            )));
        }
        Ok(())
    }

    async fn list_credentials(&self, client_id: &str) -> CredResult<Vec<Credential>> {
        let mut state = self.lock();
        state.calls.push(ApiCall::ListCredentials {
            client_id: client_id.to_string(),
        });
        if let Some(err) = state.take_failure(CallKind::ListCredentials) {
            return Err(err);
        }
        Ok(state
            .client_mut(client_id)?
            .credentials
            .iter()
            .map(api_view)
            .collect())
    }
}

// =============================================================================
// Remote Rules
// =============================================================================

/// Ids referenced by any binding of the client.
fn referenced_ids(client: &Client) -> Vec<&str> {
    let mut ids = Vec::new();
    if let Some(bindings) = &client.client_authentication_methods {
        for (_, refs) in bindings.populated() {
            ids.extend(refs.ids());
        }
    }
    if let Some(sro) = &client.signed_request_object {
        ids.extend(sro.credentials.iter().map(|c| c.id.as_str()));
    }
    ids
}

fn bad_request(message: impl Into<String>) -> CredentialsError {
    CredentialsError::api(400, message)
}

fn validate_client(client: &Client, credentials: &[Credential]) -> CredResult<()> {
    let binding = client
        .credential_binding()
        .map_err(|e| bad_request(e.to_string()))?;

    if let Some((method, refs)) = binding {
        if client.token_endpoint_auth_method.is_some() {
            return Err(bad_request(
                "token_endpoint_auth_method must be null when client_authentication_methods is set",
            ));
        }
        if refs.credentials.is_empty() {
            return Err(bad_request(format!("{method} requires at least one credential")));
        }
        if let Some(max) = method.max_credentials()
            && refs.credentials.len() > max
        {
            return Err(bad_request(format!(
                "{method} accepts at most {max} credentials"
            )));
        }
        let expected = method.credential_type();
        check_references(&refs.credentials, credentials, expected, method.as_str())?;
    } else if client
        .token_endpoint_auth_method
        .is_some_and(|m| m.uses_credentials())
    {
        return Err(bad_request(
            "credential-based methods must be set through client_authentication_methods",
        ));
    }

    if let Some(SignedRequestObjectBinding { credentials: refs, .. }) = &client.signed_request_object {
        check_references(
            refs,
            credentials,
            Some(CredentialType::PublicKey),
            "signed_request_object",
        )?;
    }
    Ok(())
}

fn check_references(
    refs: &[CredentialRef],
    credentials: &[Credential],
    expected: Option<CredentialType>,
    context: &str,
) -> CredResult<()> {
    for reference in refs {
        let credential = credentials
            .iter()
            .find(|c| c.id.as_deref() == Some(reference.id.as_str()))
            .ok_or_else(|| {
                bad_request(format!("{context}: unknown credential {}", reference.id))
            })?;
        if expected.is_some_and(|t| t != credential.credential_type) {
            return Err(bad_request(format!(
                "{context}: credential {} has type {}",
                reference.id, credential.credential_type
            )));
        }
    }
    Ok(())
}

/// Turns a creation payload into the stored credential, deriving the
/// remote-assigned fields.
fn materialize(new: &NewCredential) -> CredResult<Credential> {
    let mut credential = Credential::new(new.credential_type);
    credential.name = new.name.clone();
    credential.pem = new.pem.clone();
    credential.subject_dn = new.subject_dn.clone();
    credential.parse_expiry_from_cert = new.parse_expiry_from_cert;
    credential.expires_at = new.expires_at;

    match new.credential_type {
        CredentialType::PublicKey => {
            let pem = new
                .pem
                .as_deref()
                .ok_or_else(|| bad_request("public_key credentials require pem"))?;
            credential.algorithm = Some(new.algorithm.unwrap_or_default());
            credential.key_id = Some(key_id(pem));
            if new.parse_expiry_from_cert && new.expires_at.is_none() {
                let not_after =
                    cert::certificate_not_after(pem).map_err(|e| bad_request(e.to_string()))?;
                credential.expires_at = Some(not_after);
            }
        }
        CredentialType::CertSubjectDn => {
            if new.pem.is_some() == new.subject_dn.is_some() {
                return Err(bad_request(
                    "cert_subject_dn credentials require exactly one of pem or subject_dn",
                ));
            }
        }
        CredentialType::X509Cert => {
            let pem = new
                .pem
                .as_deref()
                .ok_or_else(|| bad_request("x509_cert credentials require pem"))?;
            credential.thumbprint_sha256 =
                Some(cert::certificate_thumbprint(pem).map_err(|e| bad_request(e.to_string()))?);
            credential.key_id = Some(key_id(pem));
        }
    }
    Ok(credential)
}

/// The credential as the API returns it: submitted PEM material is kept
/// for derivations but never echoed back.
fn api_view(credential: &Credential) -> Credential {
    Credential {
        pem: None,
        ..credential.clone()
    }
}

/// Deterministic key id derived from the PEM material.
fn key_id(pem: &str) -> String {
    let digest = Sha256::digest(normalize_pem(pem).as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppType, BindingPayload, CredentialReferences};
    use time::macros::datetime;

    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/public_key.pem");
    const SIGNING_CERT: &str = include_str!("../../tests/fixtures/signing_cert.pem");

    fn api_with_client() -> MemoryManagementApi {
        let api = MemoryManagementApi::new();
        api.insert_client(
            Client::new("app_1")
                .with_app_type(AppType::NonInteractive)
                .with_token_endpoint_auth_method(AuthenticationMethod::ClientSecretPost),
        );
        api
    }

    fn public_key(pem: &str) -> NewCredential {
        Credential::new(CredentialType::PublicKey)
            .with_pem(pem)
            .to_new_credential()
    }

    fn bind(method: AuthenticationMethod, ids: &[&str]) -> ClientUpdate {
        ClientUpdate::credential_method(
            BindingPayload::new(method, CredentialReferences::from_ids(ids.iter().copied()))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_assigns_remote_fields() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();

        assert_eq!(created.id.as_deref(), Some("cred_000001"));
        assert_eq!(created.algorithm, Some(crate::types::SigningAlgorithm::RS256));
        assert!(created.key_id.is_some());
        assert!(created.created_at.is_some());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(created.expires_at, None);
    }

    #[tokio::test]
    async fn test_pem_is_not_echoed_back() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();
        assert!(created.pem.is_none());

        let listed = api.list_credentials("app_1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].pem.is_none());
        assert_eq!(listed[0].key_id, created.key_id);
    }

    #[tokio::test]
    async fn test_parse_expiry_and_explicit_expiry_wins() {
        let api = api_with_client();
        let mut payload = public_key(SIGNING_CERT);
        payload.parse_expiry_from_cert = true;

        let derived = api.create_credential("app_1", &payload).await.unwrap();
        assert_eq!(derived.expires_at, Some(datetime!(2036-10-13 13:23:44 UTC)));

        payload.expires_at = Some(datetime!(2030-01-01 0:00 UTC));
        let explicit = api.create_credential("app_1", &payload).await.unwrap();
        assert_eq!(explicit.expires_at, Some(datetime!(2030-01-01 0:00 UTC)));
    }

    #[tokio::test]
    async fn test_referenced_credential_cannot_be_deleted() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();
        let id = created.id.unwrap();

        api.update_client("app_1", &bind(AuthenticationMethod::PrivateKeyJwt, &[&id]))
            .await
            .unwrap();

        let err = api.delete_credential("app_1", &id).await.unwrap_err();
        assert!(matches!(err, CredentialsError::Api { status: 409, .. }));

        api.update_client(
            "app_1",
            &ClientUpdate::secret_method(AuthenticationMethod::ClientSecretPost),
        )
        .await
        .unwrap();
        api.delete_credential("app_1", &id).await.unwrap();
        assert!(api.credentials("app_1").is_empty());
    }

    #[tokio::test]
    async fn test_binding_with_secret_method_is_rejected() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();
        let mut update = bind(
            AuthenticationMethod::PrivateKeyJwt,
            &[created.id.as_deref().unwrap()],
        );
        update.token_endpoint_auth_method = None;

        let err = api.update_client("app_1", &update).await.unwrap_err();
        assert!(matches!(err, CredentialsError::Api { status: 400, .. }));
        // Rejected updates leave the client untouched.
        assert_eq!(
            api.client("app_1").unwrap().token_endpoint_auth_method,
            Some(AuthenticationMethod::ClientSecretPost)
        );
    }

    #[tokio::test]
    async fn test_binding_type_mismatch_is_rejected() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();
        let err = api
            .update_client(
                "app_1",
                &bind(
                    AuthenticationMethod::TlsClientAuth,
                    &[created.id.as_deref().unwrap()],
                ),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has type public_key"));
    }

    #[tokio::test]
    async fn test_update_credential_bumps_updated_at() {
        let api = api_with_client();
        let created = api
            .create_credential("app_1", &public_key(PUBLIC_KEY))
            .await
            .unwrap();
        let updated = api
            .update_credential(
                "app_1",
                created.id.as_deref().unwrap(),
                &CredentialUpdate {
                    expires_at: datetime!(2031-05-01 0:00 UTC),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.expires_at, Some(datetime!(2031-05-01 0:00 UTC)));
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let api = MemoryManagementApi::new();
        assert!(api.read_client("missing").await.unwrap_err().is_not_found());
        assert!(
            api.list_credentials("missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let api = api_with_client();
        api.fail_next(CallKind::ListCredentials, 503, "unavailable");

        let err = api.list_credentials("app_1").await.unwrap_err();
        assert!(matches!(err, CredentialsError::Api { status: 503, .. }));
        assert!(api.list_credentials("app_1").await.is_ok());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_subject_dn_requires_exactly_one_source() {
        let api = api_with_client();
        let both = NewCredential {
            pem: Some(SIGNING_CERT.to_string()),
            ..Credential::new(CredentialType::CertSubjectDn)
                .with_subject_dn("CN=svc")
                .to_new_credential()
        };
        assert!(api.create_credential("app_1", &both).await.is_err());
    }
}

//! Management API seam.
//!
//! [`ManagementApi`] is the set of remote operations the reconciler consumes.
//! Two backends implement it:
//!
//! - [`HttpManagementApi`] talks to a live management API over HTTPS
//! - [`MemoryManagementApi`] keeps clients in process and enforces the same
//!   remote rules, for tests and dry runs

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::CredResult;
use crate::types::{Client, ClientUpdate, Credential, CredentialUpdate, NewCredential};

pub use http::HttpManagementApi;
pub use memory::{ApiCall, CallKind, MemoryManagementApi};

// =============================================================================
// Management API Trait
// =============================================================================

/// Remote operations on clients and their credentials.
///
/// Every method is a single remote request. Implementations must not retry;
/// failures propagate to the caller unchanged.
///
/// # Example
///
/// ```ignore
/// use clientauth::management::ManagementApi;
///
/// async fn example(api: &impl ManagementApi) -> clientauth::CredResult<()> {
///     let client = api.read_client("app_123").await?;
///     for credential in api.list_credentials(&client.client_id).await? {
///         println!("{}", credential.label());
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Fetch a client with its bindings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist, or a remote error.
    async fn read_client(&self, client_id: &str) -> CredResult<Client>;

    /// Apply a sparse update to a client and return the updated client.
    ///
    /// Only fields present in `update` change; explicit nulls clear.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist, or the remote error
    /// that rejected the payload.
    async fn update_client(&self, client_id: &str, update: &ClientUpdate) -> CredResult<Client>;

    /// Create a credential on a client.
    ///
    /// # Errors
    ///
    /// Returns a remote error if the credential is rejected.
    async fn create_credential(
        &self,
        client_id: &str,
        credential: &NewCredential,
    ) -> CredResult<Credential>;

    /// Update the expiry of a credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the credential does not exist, or a remote error.
    async fn update_credential(
        &self,
        client_id: &str,
        credential_id: &str,
        update: &CredentialUpdate,
    ) -> CredResult<Credential>;

    /// Delete a credential.
    ///
    /// # Errors
    ///
    /// Returns a remote error if the credential is still referenced by a
    /// binding, or `NotFound` if it does not exist.
    async fn delete_credential(&self, client_id: &str, credential_id: &str) -> CredResult<()>;

    /// List every credential of a client, attached or not.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the client does not exist, or a remote error.
    async fn list_credentials(&self, client_id: &str) -> CredResult<Vec<Credential>>;
}

#[async_trait]
impl<T: ManagementApi + ?Sized> ManagementApi for std::sync::Arc<T> {
    async fn read_client(&self, client_id: &str) -> CredResult<Client> {
        (**self).read_client(client_id).await
    }

    async fn update_client(&self, client_id: &str, update: &ClientUpdate) -> CredResult<Client> {
        (**self).update_client(client_id, update).await
    }

    async fn create_credential(
        &self,
        client_id: &str,
        credential: &NewCredential,
    ) -> CredResult<Credential> {
        (**self).create_credential(client_id, credential).await
    }

    async fn update_credential(
        &self,
        client_id: &str,
        credential_id: &str,
        update: &CredentialUpdate,
    ) -> CredResult<Credential> {
        (**self)
            .update_credential(client_id, credential_id, update)
            .await
    }

    async fn delete_credential(&self, client_id: &str, credential_id: &str) -> CredResult<()> {
        (**self).delete_credential(client_id, credential_id).await
    }

    async fn list_credentials(&self, client_id: &str) -> CredResult<Vec<Credential>> {
        (**self).list_credentials(client_id).await
    }
}

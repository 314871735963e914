//! Remote state reader.
//!
//! Reads a client and its credentials and normalizes them into the same
//! [`CredentialsState`] shape the expander produces. A client that no longer
//! exists yields `None` so callers can drop their local state.

use std::collections::HashSet;

use crate::CredResult;
use crate::context::ReconcileContext;
use crate::management::ManagementApi;
use crate::types::{
    Client, Credential, CredentialRef, CredentialType, CredentialsState, MethodBinding,
    SignedRequestObject,
};

/// Everything read from the remote side for one client.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// The client as returned by the management API.
    pub client: Client,
    /// Every credential of the client, attached or not, in remote order.
    pub credentials: Vec<Credential>,
    /// Normalized view of the bindings.
    pub state: CredentialsState,
}

impl RemoteSnapshot {
    /// Credentials of `credential_type` referenced by no binding.
    ///
    /// These are left over from earlier method switches and can be
    /// re-attached instead of creating duplicates.
    #[must_use]
    pub fn unattached(&self, credential_type: CredentialType) -> Vec<Credential> {
        let attached = self.attached_ids();
        self.credentials
            .iter()
            .filter(|c| c.credential_type == credential_type)
            .filter(|c| c.id.as_deref().is_some_and(|id| !attached.contains(id)))
            .cloned()
            .collect()
    }

    /// Ids referenced by the method binding or the signed request object.
    #[must_use]
    pub fn attached_ids(&self) -> HashSet<&str> {
        let mut ids: HashSet<&str> = HashSet::new();
        if let Some(binding) = &self.state.authentication_method {
            ids.extend(binding.credential_ids());
        }
        if let Some(sro) = &self.state.signed_request_object {
            ids.extend(sro.credential_ids());
        }
        ids
    }
}

/// Reads the normalized credential state of a client.
///
/// # Errors
///
/// Returns a remote error if a call fails for any reason other than the
/// client being gone, or a conflict if the client has more than one
/// credential binding populated.
pub async fn read_state<A>(
    api: &A,
    ctx: &ReconcileContext,
    client_id: &str,
) -> CredResult<Option<CredentialsState>>
where
    A: ManagementApi + ?Sized,
{
    Ok(read_snapshot(api, ctx, client_id)
        .await?
        .map(|snapshot| snapshot.state))
}

/// Reads a client, all of its credentials and the normalized state.
///
/// # Errors
///
/// See [`read_state`].
#[tracing::instrument(skip(api, ctx))]
pub async fn read_snapshot<A>(
    api: &A,
    ctx: &ReconcileContext,
    client_id: &str,
) -> CredResult<Option<RemoteSnapshot>>
where
    A: ManagementApi + ?Sized,
{
    ctx.checkpoint("read client")?;
    let client = match api.read_client(client_id).await {
        Ok(client) => client,
        Err(e) if e.is_not_found() => {
            tracing::info!("client no longer exists");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    ctx.checkpoint("list credentials")?;
    let credentials = match api.list_credentials(client_id).await {
        Ok(credentials) => credentials,
        Err(e) if e.is_not_found() => {
            tracing::info!("client disappeared while listing credentials");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let state = normalize(&client, &credentials)?;
    tracing::debug!(
        method = ?state.method(),
        credentials = credentials.len(),
        "read remote state"
    );

    Ok(Some(RemoteSnapshot {
        client,
        credentials,
        state,
    }))
}

/// Builds the normalized state from a client and its credentials.
fn normalize(client: &Client, credentials: &[Credential]) -> CredResult<CredentialsState> {
    let binding = match client.credential_binding()? {
        Some((method, refs)) => Some(MethodBinding::new(
            method,
            resolve(&refs.credentials, credentials),
        )),
        None => client
            .token_endpoint_auth_method
            .map(|method| MethodBinding::new(method, Vec::new())),
    };

    let signed_request_object = client
        .signed_request_object
        .as_ref()
        .map(|sro| SignedRequestObject {
            required: sro.required,
            credentials: resolve(&sro.credentials, credentials),
        });

    Ok(CredentialsState {
        client_id: client.client_id.clone(),
        authentication_method: binding,
        client_secret: client.client_secret.clone(),
        signed_request_object,
    })
}

/// Resolves references in binding order, skipping dangling ones.
fn resolve(refs: &[CredentialRef], credentials: &[Credential]) -> Vec<Credential> {
    refs.iter()
        .filter_map(|r| {
            let found = credentials
                .iter()
                .find(|c| c.id.as_deref() == Some(r.id.as_str()));
            if found.is_none() {
                tracing::warn!(credential_id = %r.id, "binding references an unknown credential");
            }
            found.cloned()
        })
        .collect()
}

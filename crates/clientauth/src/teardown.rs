//! Credential teardown.
//!
//! Returns a client to the default method of its application type and
//! removes every credential. Bindings are rewritten first because the remote
//! side refuses to delete a credential that is still referenced.

use serde::Serialize;

use crate::CredResult;
use crate::context::ReconcileContext;
use crate::management::ManagementApi;
use crate::reconcile::apply_deletes;
use crate::types::{AuthenticationMethod, Client, ClientUpdate, default_method_for};

/// Result of a teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// The client no longer exists.
    AlreadyGone,
    /// The client was reset.
    Reset {
        /// Method the client fell back to.
        method: AuthenticationMethod,
        /// Ids of the deleted credentials.
        deleted: Vec<String>,
    },
}

/// Tears down the credential configuration of a client.
///
/// # Errors
///
/// Returns the first remote error. Calls already made stay applied, so a
/// later teardown resumes where this one stopped.
#[tracing::instrument(skip(api, ctx))]
pub async fn teardown<A>(
    api: &A,
    ctx: &ReconcileContext,
    client_id: &str,
) -> CredResult<TeardownOutcome>
where
    A: ManagementApi + ?Sized,
{
    ctx.checkpoint("read client")?;
    let client = match api.read_client(client_id).await {
        Ok(client) => client,
        Err(e) if e.is_not_found() => {
            tracing::info!("client already gone, nothing to tear down");
            return Ok(TeardownOutcome::AlreadyGone);
        }
        Err(e) => return Err(e),
    };
    let method = default_method_for(client.app_type);

    ctx.checkpoint("list credentials")?;
    let credentials = match api.list_credentials(client_id).await {
        Ok(credentials) => credentials,
        Err(e) if e.is_not_found() => return Ok(TeardownOutcome::AlreadyGone),
        Err(e) => return Err(e),
    };
    let ids: Vec<String> = credentials.iter().filter_map(|c| c.id.clone()).collect();

    if let Some(update) = reset_update(&client, method, !ids.is_empty()) {
        ctx.checkpoint("reset authentication method")?;
        api.update_client(client_id, &update).await?;
        tracing::info!(%method, "reset authentication method");
    }

    apply_deletes(api, ctx, client_id, &ids).await?;

    tracing::info!(%method, deleted = ids.len(), "credential teardown complete");
    Ok(TeardownOutcome::Reset {
        method,
        deleted: ids,
    })
}

/// Update that detaches everything and activates `method`, or `None` if the
/// client is already in that state.
fn reset_update(client: &Client, method: AuthenticationMethod, has_credentials: bool) -> Option<ClientUpdate> {
    let binding_populated = client
        .client_authentication_methods
        .as_ref()
        .is_some_and(|b| !b.populated().is_empty());
    let at_default =
        !binding_populated && client.token_endpoint_auth_method == Some(method);

    let mut update = ClientUpdate::default();
    if !at_default || has_credentials {
        update = ClientUpdate::secret_method(method);
    }
    if client.signed_request_object.is_some() {
        update.signed_request_object = Some(None);
    }
    (!update.is_empty()).then_some(update)
}

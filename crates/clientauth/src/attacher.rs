//! Authentication-method attachment.
//!
//! Rewrites the client's active method and credential binding in a single
//! update. The payload always names every credential-bearing slot so that
//! only the active one is populated, and `token_endpoint_auth_method` is
//! nulled whenever a credential binding is active. Switching away from a
//! credential method detaches its credentials; it never deletes them.
//!
//! The signed request object binding is attached independently of the
//! method.

use std::fmt;

use serde::Serialize;

use crate::CredResult;
use crate::context::ReconcileContext;
use crate::error::CredentialsError;
use crate::management::ManagementApi;
use crate::types::{
    AuthenticationMethod, BindingPayload, Client, ClientUpdate, CredentialRef,
    CredentialReferences, SignedRequestObjectBinding,
};

// =============================================================================
// Transitions
// =============================================================================

/// Kind of method change between the observed and desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Same method on both sides; credentials may still be rebound.
    Unchanged {
        /// The method.
        method: AuthenticationMethod,
    },
    /// Between `none` and the shared-secret methods.
    SecretToSecret {
        /// Observed method, if any.
        from: Option<AuthenticationMethod>,
        /// Desired method.
        to: AuthenticationMethod,
    },
    /// From a secret/none method to a credential binding.
    SecretToCredentials {
        /// Observed method, if any.
        from: Option<AuthenticationMethod>,
        /// Desired method.
        to: AuthenticationMethod,
    },
    /// From a credential binding to a secret/none method; detaches.
    CredentialsToSecret {
        /// Observed method.
        from: AuthenticationMethod,
        /// Desired method.
        to: AuthenticationMethod,
    },
    /// From one credential binding to another; detaches the old one.
    CredentialsToCredentials {
        /// Observed method.
        from: AuthenticationMethod,
        /// Desired method.
        to: AuthenticationMethod,
    },
}

impl Transition {
    /// Classifies the change from `from` to `to`.
    #[must_use]
    pub fn classify(from: Option<AuthenticationMethod>, to: AuthenticationMethod) -> Self {
        match from {
            Some(from) if from == to => Self::Unchanged { method: to },
            Some(from) if from.uses_credentials() => {
                if to.uses_credentials() {
                    Self::CredentialsToCredentials { from, to }
                } else {
                    Self::CredentialsToSecret { from, to }
                }
            }
            _ if to.uses_credentials() => Self::SecretToCredentials { from, to },
            _ => Self::SecretToSecret { from, to },
        }
    }

    /// Returns `true` if the observed credential binding is detached.
    #[must_use]
    pub fn detaches(&self) -> bool {
        matches!(
            self,
            Self::CredentialsToSecret { .. } | Self::CredentialsToCredentials { .. }
        )
    }

    /// Desired method.
    #[must_use]
    pub fn target(&self) -> AuthenticationMethod {
        match *self {
            Self::Unchanged { method } => method,
            Self::SecretToSecret { to, .. }
            | Self::SecretToCredentials { to, .. }
            | Self::CredentialsToSecret { to, .. }
            | Self::CredentialsToCredentials { to, .. } => to,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged { method } => write!(f, "{method} (unchanged)"),
            Self::SecretToSecret { from, to } | Self::SecretToCredentials { from, to } => {
                match from {
                    Some(from) => write!(f, "{from} -> {to}"),
                    None => write!(f, "unset -> {to}"),
                }
            }
            Self::CredentialsToSecret { from, to } | Self::CredentialsToCredentials { from, to } => {
                write!(f, "{from} -> {to} (detach)")
            }
        }
    }
}

// =============================================================================
// Method Attachment
// =============================================================================

/// Desired method together with what it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredMethod<'a> {
    /// Method to activate.
    pub method: AuthenticationMethod,
    /// Ids of the reconciled credentials, in binding order.
    pub credential_ids: &'a [String],
    /// Shared secret to set, for the secret methods.
    pub client_secret: Option<&'a str>,
}

/// Result of attaching a method.
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    /// The client after the update (the observed client if skipped).
    pub client: Client,
    /// Whether an update was sent.
    pub updated: bool,
    /// Ids that were bound before and are not bound any more.
    pub detached: Vec<String>,
}

/// Builds the update turning `observed` into `desired`, or `None` if the
/// client already matches.
///
/// # Errors
///
/// Returns a validation error if the credential ids violate the method's
/// cardinality, or a conflict if the observed client is inconsistent.
pub fn method_update(observed: &Client, desired: &DesiredMethod<'_>) -> CredResult<Option<ClientUpdate>> {
    let method = desired.method;
    let current = observed.credential_binding()?;

    if !method.uses_credentials() {
        let rotate = desired.client_secret.is_some()
            && method.uses_shared_secret()
            && desired.client_secret != observed.client_secret.as_deref();
        let in_place = current.is_none() && observed.token_endpoint_auth_method == Some(method);

        if in_place && !rotate {
            return Ok(None);
        }
        let mut update = ClientUpdate::secret_method(method);
        if rotate {
            update.client_secret = desired.client_secret.map(str::to_string);
        }
        return Ok(Some(update));
    }

    check_cardinality(method, desired.credential_ids)?;

    if let Some((bound_method, refs)) = current
        && bound_method == method
        && observed.token_endpoint_auth_method.is_none()
        && refs.ids() == desired.credential_ids
    {
        return Ok(None);
    }

    let binding = BindingPayload::new(
        method,
        CredentialReferences::from_ids(desired.credential_ids.iter().cloned()),
    )?;
    Ok(Some(ClientUpdate::credential_method(binding)))
}

fn check_cardinality(method: AuthenticationMethod, ids: &[String]) -> CredResult<()> {
    if ids.is_empty() {
        return Err(CredentialsError::missing(
            "credentials",
            format!("{method} requires at least one credential"),
        ));
    }
    if let Some(max) = method.max_credentials()
        && ids.len() > max
    {
        return Err(CredentialsError::invalid(
            "credentials",
            format!("{method} accepts at most {max} credentials, got {}", ids.len()),
        ));
    }
    if ids.iter().any(String::is_empty) {
        return Err(CredentialsError::internal(format!(
            "{method}: cannot bind a credential without an id"
        )));
    }
    Ok(())
}

/// Activates the desired method on the client.
///
/// # Errors
///
/// Returns a precondition error before any call, the remote error that
/// rejected the update, or a conflict if the returned client does not show
/// exactly the desired binding.
#[tracing::instrument(skip_all, fields(client_id = %observed.client_id, method = %desired.method))]
pub async fn attach_method<A>(
    api: &A,
    ctx: &ReconcileContext,
    observed: &Client,
    desired: &DesiredMethod<'_>,
) -> CredResult<AttachOutcome>
where
    A: ManagementApi + ?Sized,
{
    let previous: Vec<String> = match observed.credential_binding()? {
        Some((_, refs)) => refs.ids().into_iter().map(str::to_string).collect(),
        None => Vec::new(),
    };

    let Some(update) = method_update(observed, desired)? else {
        tracing::debug!("method binding already up to date");
        return Ok(AttachOutcome {
            client: observed.clone(),
            updated: false,
            detached: Vec::new(),
        });
    };

    ctx.checkpoint("update client authentication method")?;
    let client = api.update_client(&observed.client_id, &update).await?;
    verify_method(&client, desired)?;

    let detached: Vec<String> = previous
        .into_iter()
        .filter(|id| !desired.credential_ids.contains(id))
        .collect();

    tracing::info!(
        transition = %Transition::classify(observed.active_method()?, desired.method),
        detached = detached.len(),
        "attached authentication method"
    );

    Ok(AttachOutcome {
        client,
        updated: true,
        detached,
    })
}

/// Checks that exactly the desired binding is active on `client`.
fn verify_method(client: &Client, desired: &DesiredMethod<'_>) -> CredResult<()> {
    let binding = client.credential_binding()?;
    let ok = match binding {
        Some((method, refs)) => {
            method == desired.method
                && client.token_endpoint_auth_method.is_none()
                && refs.ids() == desired.credential_ids
        }
        None => {
            !desired.method.uses_credentials()
                && client.token_endpoint_auth_method == Some(desired.method)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(CredentialsError::conflict(format!(
            "client {} does not show {} as the only active method after update",
            client.client_id, desired.method
        )))
    }
}

// =============================================================================
// Signed Request Object
// =============================================================================

/// Attaches the signed request object binding.
///
/// Toggling `required` with unchanged keys only rewrites the flag.
///
/// # Errors
///
/// Returns the remote error that rejected the update.
#[tracing::instrument(skip_all, fields(client_id = %observed.client_id))]
pub async fn attach_signed_request_object<A>(
    api: &A,
    ctx: &ReconcileContext,
    observed: &Client,
    required: bool,
    credential_ids: &[String],
) -> CredResult<AttachOutcome>
where
    A: ManagementApi + ?Sized,
{
    if credential_ids.is_empty() {
        return Err(CredentialsError::missing(
            "signed_request_object.credentials",
            "signed request object requires at least one credential",
        ));
    }

    let desired = SignedRequestObjectBinding {
        required,
        credentials: credential_ids.iter().map(CredentialRef::new).collect(),
    };
    let previous: Vec<String> = observed
        .signed_request_object
        .as_ref()
        .map(|sro| sro.credentials.iter().map(|c| c.id.clone()).collect())
        .unwrap_or_default();

    if observed.signed_request_object.as_ref() == Some(&desired) {
        tracing::debug!("signed request object already up to date");
        return Ok(AttachOutcome {
            client: observed.clone(),
            updated: false,
            detached: Vec::new(),
        });
    }

    ctx.checkpoint("update signed request object")?;
    let client = api
        .update_client(
            &observed.client_id,
            &ClientUpdate::signed_request_object(Some(desired.clone())),
        )
        .await?;
    if client.signed_request_object.as_ref() != Some(&desired) {
        return Err(CredentialsError::conflict(format!(
            "client {} does not show the desired signed request object after update",
            client.client_id
        )));
    }

    let detached: Vec<String> = previous
        .into_iter()
        .filter(|id| !credential_ids.contains(id))
        .collect();
    tracing::info!(required, keys = credential_ids.len(), "attached signed request object");

    Ok(AttachOutcome {
        client,
        updated: true,
        detached,
    })
}

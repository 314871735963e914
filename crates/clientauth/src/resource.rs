//! Client credentials resource.
//!
//! The CRUD surface consumed by callers. Create and update run the full
//! pipeline:
//!
//! 1. expand and validate the desired configuration (no remote calls)
//! 2. read the observed state
//! 3. create credentials and update expiries
//! 4. attach the method binding, then the signed request object
//! 5. delete credentials that are no longer bound
//! 6. read back and return the normalized state
//!
//! Nothing is rolled back on failure; re-running converges.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::CredResult;
use crate::attacher::{self, DesiredMethod, Transition};
use crate::context::ReconcileContext;
use crate::expander::{ClientCredentialsConfig, expand};
use crate::management::ManagementApi;
use crate::reader::{self, RemoteSnapshot};
use crate::reconcile::{self, CredentialAction, CredentialPlan, plan_credentials};
use crate::teardown::{self, TeardownOutcome};
use crate::types::{Credential, CredentialType, CredentialsState};

// =============================================================================
// Plan
// =============================================================================

/// Planned changes to the signed request object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedRequestObjectPlan {
    /// Desired `required` flag.
    pub required: bool,
    /// Credential actions for the verification keys.
    pub credentials: CredentialPlan,
    /// Whether the binding itself is rewritten.
    pub rebind: bool,
}

/// Everything one reconciliation pass would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Client identifier.
    pub client_id: String,
    /// Method change, `None` if the method is unmanaged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    /// Credential actions for the method binding.
    pub credentials: CredentialPlan,
    /// Whether the method binding is rewritten.
    pub rebind: bool,
    /// Signed request object changes, `None` if unmanaged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_request_object: Option<SignedRequestObjectPlan>,
    /// Credentials a method switch detaches.
    pub detached: Vec<String>,
    /// Whether detached credentials are deleted.
    pub prune_detached: bool,
}

impl ReconcilePlan {
    /// Returns `true` if applying the plan issues no mutating call.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.rebind
            && self.credentials.is_noop()
            && self
                .signed_request_object
                .as_ref()
                .is_none_or(|sro| !sro.rebind && sro.credentials.is_noop())
    }

    /// Every planned credential action, labelled by the binding it serves.
    #[must_use]
    pub fn actions(&self) -> Vec<(&'static str, &CredentialAction)> {
        let mut actions: Vec<_> = self
            .credentials
            .actions
            .iter()
            .map(|a| ("method", a))
            .collect();
        if let Some(sro) = &self.signed_request_object {
            actions.extend(sro.credentials.actions.iter().map(|a| ("signed_request_object", a)));
        }
        actions
    }

    /// Ids deleted after the bindings are rewritten.
    #[must_use]
    pub fn deletions(&self) -> Vec<String> {
        let mut ids = self.credentials.delete_ids();
        if let Some(sro) = &self.signed_request_object {
            ids.extend(sro.credentials.delete_ids());
        }
        if self.prune_detached {
            ids.extend(self.detached.iter().cloned());
        }
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        ids
    }
}

impl fmt::Display for ReconcilePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "client {}", self.client_id)?;
        match &self.transition {
            Some(t) if self.rebind => writeln!(f, "  method: {t}")?,
            Some(t) => writeln!(f, "  method: {} (no change)", t.target())?,
            None => writeln!(f, "  method: unmanaged")?,
        }
        for (binding, action) in self.actions() {
            if action.is_change() {
                writeln!(f, "  {binding}: {action}")?;
            }
        }
        if let Some(sro) = &self.signed_request_object
            && sro.rebind
        {
            writeln!(f, "  signed_request_object: rebind (required = {})", sro.required)?;
        }
        for id in &self.detached {
            let verb = if self.prune_detached { "detach and delete" } else { "detach" };
            writeln!(f, "  {verb} {id}")?;
        }
        for id in self.credentials.delete_ids() {
            writeln!(f, "  delete {id}")?;
        }
        if let Some(sro) = &self.signed_request_object {
            for id in sro.credentials.delete_ids() {
                writeln!(f, "  delete {id}")?;
            }
        }
        if self.is_noop() {
            writeln!(f, "  no changes")?;
        }
        Ok(())
    }
}

/// Plans the pass turning `snapshot` into `desired`.
///
/// # Errors
///
/// Returns a conflict if the observed client is inconsistent, or a
/// precondition error from the attacher.
pub fn build_plan(
    desired: &CredentialsState,
    snapshot: &RemoteSnapshot,
    prune_detached: bool,
) -> CredResult<ReconcilePlan> {
    let observed_method = snapshot.client.active_method()?;

    let mut plan = ReconcilePlan {
        client_id: desired.client_id.clone(),
        transition: None,
        credentials: CredentialPlan::default(),
        rebind: false,
        signed_request_object: None,
        detached: Vec::new(),
        prune_detached,
    };

    if let Some(binding) = &desired.authentication_method {
        let method = binding.method();
        let transition = Transition::classify(observed_method, method);

        if let Some(credential_type) = method.credential_type() {
            let attached: &[Credential] = match (&snapshot.state.authentication_method, transition) {
                (Some(observed), Transition::Unchanged { .. }) => observed.credentials(),
                _ => &[],
            };
            plan.credentials = plan_credentials(
                binding.credentials(),
                attached,
                &snapshot.unattached(credential_type),
            );
        }

        plan.rebind = match kept_ids(&plan.credentials) {
            Some(ids) => attacher::method_update(
                &snapshot.client,
                &DesiredMethod {
                    method,
                    credential_ids: &ids,
                    client_secret: desired.client_secret.as_deref(),
                },
            )?
            .is_some(),
            None => true,
        };

        if transition.detaches() {
            plan.detached = snapshot
                .state
                .authentication_method
                .as_ref()
                .map(|b| b.credential_ids().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
        }
        plan.transition = Some(transition);
    }

    if let Some(sro) = &desired.signed_request_object {
        let attached = snapshot
            .state
            .signed_request_object
            .as_ref()
            .map(|o| o.credentials.as_slice())
            .unwrap_or_default();
        let credentials = plan_credentials(
            &sro.credentials,
            attached,
            &snapshot.unattached(CredentialType::PublicKey),
        );
        let rebind = match kept_ids(&credentials) {
            Some(ids) => {
                snapshot.client.signed_request_object.as_ref().is_none_or(|o| {
                    o.required != sro.required
                        || o.credentials.iter().map(|c| c.id.as_str()).ne(ids.iter().map(String::as_str))
                })
            }
            None => true,
        };
        plan.signed_request_object = Some(SignedRequestObjectPlan {
            required: sro.required,
            credentials,
            rebind,
        });
    }

    Ok(plan)
}

/// Ids of the planned credentials if none has to be created first.
fn kept_ids(plan: &CredentialPlan) -> Option<Vec<String>> {
    plan.actions
        .iter()
        .map(|action| match action {
            CredentialAction::Keep { observed } | CredentialAction::UpdateExpiry { observed, .. } => {
                observed.id.clone()
            }
            CredentialAction::Create { .. } => None,
        })
        .collect()
}

// =============================================================================
// Resource
// =============================================================================

/// Credential configuration of clients, managed through a [`ManagementApi`].
///
/// # Example
///
/// ```ignore
/// use clientauth::{ClientCredentialsResource, MemoryManagementApi, ReconcileContext};
///
/// let resource = ClientCredentialsResource::new(MemoryManagementApi::new());
/// let state = resource.update(&ReconcileContext::new(), &config).await?;
/// ```
pub struct ClientCredentialsResource<A> {
    api: A,
}

impl<A: ManagementApi> ClientCredentialsResource<A> {
    /// Creates a resource backed by `api`.
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Returns the underlying API.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Applies `config` to a client that has no managed configuration yet.
    ///
    /// Returns `None` if the client does not exist.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any remote call, or the first
    /// remote error.
    pub async fn create(
        &self,
        ctx: &ReconcileContext,
        config: &ClientCredentialsConfig,
    ) -> CredResult<Option<CredentialsState>> {
        self.apply(ctx, config).await
    }

    /// Reads the normalized state of a client; `None` if it is gone.
    ///
    /// # Errors
    ///
    /// Returns the first remote error.
    pub async fn read(
        &self,
        ctx: &ReconcileContext,
        client_id: &str,
    ) -> CredResult<Option<CredentialsState>> {
        reader::read_state(&self.api, ctx, client_id).await
    }

    /// Converges a client onto `config`.
    ///
    /// Returns `None` if the client does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub async fn update(
        &self,
        ctx: &ReconcileContext,
        config: &ClientCredentialsConfig,
    ) -> CredResult<Option<CredentialsState>> {
        self.apply(ctx, config).await
    }

    /// Tears down the credential configuration of a client.
    ///
    /// # Errors
    ///
    /// Returns the first remote error.
    pub async fn delete(
        &self,
        ctx: &ReconcileContext,
        client_id: &str,
    ) -> CredResult<TeardownOutcome> {
        teardown::teardown(&self.api, ctx, client_id).await
    }

    /// Computes what [`update`](Self::update) would do, without changing
    /// anything. Returns `None` if the client does not exist.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or a remote error from reading.
    pub async fn plan(
        &self,
        ctx: &ReconcileContext,
        config: &ClientCredentialsConfig,
    ) -> CredResult<Option<ReconcilePlan>> {
        let desired = expand(config)?;
        let Some(snapshot) = reader::read_snapshot(&self.api, ctx, &desired.client_id).await?
        else {
            return Ok(None);
        };
        build_plan(&desired, &snapshot, ctx.options().prune_detached_credentials).map(Some)
    }

    #[tracing::instrument(skip_all, fields(client_id = %config.client_id))]
    async fn apply(
        &self,
        ctx: &ReconcileContext,
        config: &ClientCredentialsConfig,
    ) -> CredResult<Option<CredentialsState>> {
        let desired = expand(config)?;
        let client_id = desired.client_id.as_str();

        let Some(snapshot) = reader::read_snapshot(&self.api, ctx, client_id).await? else {
            return Ok(None);
        };
        let plan = build_plan(&desired, &snapshot, ctx.options().prune_detached_credentials)?;
        if plan.is_noop() {
            tracing::info!("credentials already up to date");
            return Ok(Some(snapshot.state));
        }

        let mut client = snapshot.client.clone();
        let mut bound: Vec<String> = Vec::new();

        if let Some(binding) = &desired.authentication_method {
            let reconciled = reconcile::apply_upserts(&self.api, ctx, client_id, &plan.credentials).await?;
            let ids = credential_ids(&reconciled);
            let outcome = attacher::attach_method(
                &self.api,
                ctx,
                &client,
                &DesiredMethod {
                    method: binding.method(),
                    credential_ids: &ids,
                    client_secret: desired.client_secret.as_deref(),
                },
            )
            .await?;
            if outcome.updated {
                tracing::debug!(
                    method = %binding.method(),
                    detached = ?outcome.detached,
                    "authentication method rebound"
                );
            }
            client = outcome.client;
            bound.extend(ids);
        } else if let Some(observed) = &snapshot.state.authentication_method {
            bound.extend(observed.credential_ids().into_iter().map(str::to_string));
        }

        if let (Some(sro), Some(sro_plan)) = (&desired.signed_request_object, &plan.signed_request_object) {
            let reconciled =
                reconcile::apply_upserts(&self.api, ctx, client_id, &sro_plan.credentials).await?;
            let ids = credential_ids(&reconciled);
            let outcome =
                attacher::attach_signed_request_object(&self.api, ctx, &client, sro.required, &ids)
                    .await?;
            if outcome.updated {
                tracing::debug!(
                    required = sro.required,
                    detached = ?outcome.detached,
                    "signed request object rebound"
                );
            }
            client = outcome.client;
            bound.extend(ids);
        } else if let Some(observed) = &snapshot.state.signed_request_object {
            bound.extend(observed.credential_ids().into_iter().map(str::to_string));
        }
        tracing::debug!(client_id = %client.client_id, bound = bound.len(), "bindings attached");

        let deletions: Vec<String> = plan
            .deletions()
            .into_iter()
            .filter(|id| {
                let still_bound = bound.contains(id);
                if still_bound {
                    tracing::debug!(credential_id = %id, "credential still bound, not deleting");
                }
                !still_bound
            })
            .collect();
        reconcile::apply_deletes(&self.api, ctx, client_id, &deletions).await?;

        if !plan.detached.is_empty() && !plan.prune_detached {
            tracing::info!(
                detached = plan.detached.len(),
                "kept credentials detached by the method switch"
            );
        }

        reader::read_state(&self.api, ctx, client_id).await
    }
}

fn credential_ids(credentials: &[Credential]) -> Vec<String> {
    credentials.iter().filter_map(|c| c.id.clone()).collect()
}

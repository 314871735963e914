//! Credential reconciliation.
//!
//! Planning is pure: [`plan_credentials`] matches desired entries against the
//! observed ones and yields a [`CredentialPlan`]. Application is split in two
//! because the remote side refuses to delete a credential that is still
//! bound: [`apply_upserts`] runs before the binding is rewritten and
//! [`apply_deletes`] after it.
//!
//! Matching is by stable key, never by position:
//!
//! 1. a desired entry carrying an `id` matches the observed entry with that id
//! 2. otherwise it matches the first remaining entry with the same immutable
//!    fields (type, name, material, algorithm)
//!
//! The remote side does not return `pem`. When the material cannot be
//! compared, only a matching `name` (or an explicit `id`) pairs the entries;
//! an unnamed entry is recreated instead of silently kept.
//!
//! Entries are first matched against the attached credentials, then against
//! the reusable pool (unattached leftovers of the same type). Unmatched
//! attached credentials are deleted; unmatched reusable ones are left alone.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::CredResult;
use crate::context::ReconcileContext;
use crate::management::ManagementApi;
use crate::types::{Credential, CredentialUpdate, IdentityMatch};

// =============================================================================
// Plan
// =============================================================================

/// What happens to one desired credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CredentialAction {
    /// Already in the desired state.
    Keep {
        /// The matching remote credential.
        observed: Credential,
    },
    /// Change the expiry of an existing credential in place.
    UpdateExpiry {
        /// The matching remote credential.
        observed: Credential,
        /// New expiry.
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    /// Create a new credential.
    Create {
        /// The desired credential.
        desired: Credential,
        /// Id of the credential this one replaces, if its immutable fields
        /// changed.
        #[serde(skip_serializing_if = "Option::is_none")]
        replaces: Option<String>,
    },
}

impl CredentialAction {
    /// Returns `true` if the action issues a remote call.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Keep { .. })
    }
}

impl fmt::Display for CredentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep { observed } => write!(f, "keep {}", observed.label()),
            Self::UpdateExpiry {
                observed,
                expires_at,
            } => write!(f, "update expiry of {} to {expires_at}", observed.label()),
            Self::Create {
                desired,
                replaces: Some(old),
            } => write!(f, "create {} replacing {old}", desired.label()),
            Self::Create { desired, .. } => write!(f, "create {}", desired.label()),
        }
    }
}

/// Ordered actions for one credential list plus the deletions that follow
/// the binding update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CredentialPlan {
    /// One action per desired credential, in desired order.
    pub actions: Vec<CredentialAction>,
    /// Attached credentials no desired entry matched.
    pub deletes: Vec<Credential>,
}

impl CredentialPlan {
    /// Returns `true` if applying the plan issues no credential calls.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.deletes.is_empty() && self.actions.iter().all(|a| !a.is_change())
    }

    /// Ids scheduled for deletion.
    #[must_use]
    pub fn delete_ids(&self) -> Vec<String> {
        self.deletes.iter().filter_map(|c| c.id.clone()).collect()
    }
}

/// Plans the credential changes turning `attached` into `desired`.
///
/// `reusable` holds unattached remote credentials that may be matched
/// instead of creating duplicates; they are never deleted.
#[must_use]
pub fn plan_credentials(
    desired: &[Credential],
    attached: &[Credential],
    reusable: &[Credential],
) -> CredentialPlan {
    let mut remaining_attached: Vec<&Credential> = attached.iter().collect();
    let mut remaining_reusable: Vec<&Credential> = reusable.iter().collect();
    let mut deletes = Vec::new();

    let actions = desired
        .iter()
        .map(|wanted| {
            let matched = take_by_id(wanted, &mut remaining_attached)
                .or_else(|| take_by_id(wanted, &mut remaining_reusable))
                .or_else(|| take_by_identity(wanted, &mut remaining_attached))
                .or_else(|| take_by_identity(wanted, &mut remaining_reusable));

            let Some(observed) = matched else {
                if let Some(id) = &wanted.id {
                    tracing::warn!(credential_id = %id, "pinned credential not found remotely, creating a new one");
                }
                return CredentialAction::Create {
                    desired: without_id(wanted),
                    replaces: None,
                };
            };

            if wanted.compare_identity(observed) == IdentityMatch::Different {
                // Only reachable through an id match; immutable fields changed.
                deletes.push(observed.clone());
                return CredentialAction::Create {
                    desired: without_id(wanted),
                    replaces: observed.id.clone(),
                };
            }

            plan_expiry(wanted, observed)
        })
        .collect();

    deletes.extend(remaining_attached.into_iter().cloned());
    CredentialPlan { actions, deletes }
}

fn plan_expiry(wanted: &Credential, observed: &Credential) -> CredentialAction {
    match (wanted.expires_at, observed.expires_at) {
        (Some(want), have) if have != Some(want) => CredentialAction::UpdateExpiry {
            observed: observed.clone(),
            expires_at: want,
        },
        (None, Some(_)) if !wanted.parse_expiry_from_cert => {
            tracing::warn!(
                credential = %observed.label(),
                "expiry cannot be cleared once set, keeping the remote value"
            );
            CredentialAction::Keep {
                observed: observed.clone(),
            }
        }
        _ => CredentialAction::Keep {
            observed: observed.clone(),
        },
    }
}

fn take_by_id<'a>(wanted: &Credential, pool: &mut Vec<&'a Credential>) -> Option<&'a Credential> {
    let id = wanted.id.as_deref()?;
    let index = pool.iter().position(|c| c.id.as_deref() == Some(id))?;
    Some(pool.remove(index))
}

fn take_by_identity<'a>(
    wanted: &Credential,
    pool: &mut Vec<&'a Credential>,
) -> Option<&'a Credential> {
    if wanted.id.is_some() {
        return None;
    }
    let mut unverifiable = false;
    let index = pool.iter().position(|c| match wanted.compare_identity(c) {
        IdentityMatch::Same => true,
        // A matching name stands in for key material the remote hides.
        IdentityMatch::Unverifiable if wanted.name.is_some() => true,
        IdentityMatch::Unverifiable => {
            unverifiable = true;
            false
        }
        IdentityMatch::Different => false,
    });
    let Some(index) = index else {
        if unverifiable {
            tracing::warn!(
                credential = %wanted.label(),
                "remote does not return key material; set a name or pin an id to match this credential"
            );
        }
        return None;
    };
    Some(pool.remove(index))
}

fn without_id(credential: &Credential) -> Credential {
    Credential {
        id: None,
        ..credential.clone()
    }
}

// =============================================================================
// Application
// =============================================================================

/// Runs the creates and expiry updates of `plan`, in desired order.
///
/// Returns the reconciled credentials in desired order, each carrying its
/// remote id. Stops at the first failure; calls already made stay applied.
///
/// # Errors
///
/// Returns the first remote error, or `Cancelled` if the context was
/// cancelled between calls.
pub async fn apply_upserts<A>(
    api: &A,
    ctx: &ReconcileContext,
    client_id: &str,
    plan: &CredentialPlan,
) -> CredResult<Vec<Credential>>
where
    A: ManagementApi + ?Sized,
{
    let mut reconciled = Vec::with_capacity(plan.actions.len());

    for action in &plan.actions {
        let credential = match action {
            CredentialAction::Keep { observed } => observed.clone(),
            CredentialAction::UpdateExpiry {
                observed,
                expires_at,
            } => {
                let id = observed.id.as_deref().unwrap_or_default();
                ctx.checkpoint("update credential")?;
                let updated = api
                    .update_credential(
                        client_id,
                        id,
                        &CredentialUpdate {
                            expires_at: *expires_at,
                        },
                    )
                    .await?;
                tracing::info!(credential = %updated.label(), %expires_at, "updated credential expiry");
                updated
            }
            CredentialAction::Create { desired, replaces } => {
                ctx.checkpoint("create credential")?;
                let created = api
                    .create_credential(client_id, &desired.to_new_credential())
                    .await?;
                tracing::info!(
                    credential = %created.label(),
                    replaces = replaces.as_deref(),
                    "created credential"
                );
                created
            }
        };
        reconciled.push(credential);
    }

    Ok(reconciled)
}

/// Deletes the given credentials, in order.
///
/// # Errors
///
/// Returns the first remote error. A credential that is already gone is
/// not an error.
pub async fn apply_deletes<A>(
    api: &A,
    ctx: &ReconcileContext,
    client_id: &str,
    credential_ids: &[String],
) -> CredResult<()>
where
    A: ManagementApi + ?Sized,
{
    for id in credential_ids {
        ctx.checkpoint("delete credential")?;
        match api.delete_credential(client_id, id).await {
            Ok(()) => tracing::info!(credential_id = %id, "deleted credential"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(credential_id = %id, "credential already deleted");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CredentialType, SigningAlgorithm};
    use time::macros::datetime;

    fn key(pem: &str) -> Credential {
        Credential::new(CredentialType::PublicKey).with_pem(pem)
    }

    fn remote(id: &str, pem: &str) -> Credential {
        key(pem)
            .with_id(id)
            .with_algorithm(SigningAlgorithm::RS256)
    }

    #[test]
    fn test_unnamed_key_rotation_without_echoed_pem_is_recreated() {
        let observed = [Credential::new(CredentialType::PublicKey).with_id("cred_1")];
        let plan = plan_credentials(&[key("NEWKEY")], &observed, &[]);

        assert!(!plan.is_noop());
        assert!(matches!(
            &plan.actions[0],
            CredentialAction::Create { replaces: None, .. }
        ));
        assert_eq!(plan.delete_ids(), vec!["cred_1".to_string()]);
    }

    #[test]
    fn test_named_key_without_echoed_pem_matches_by_name() {
        let observed = [Credential::new(CredentialType::PublicKey)
            .with_id("cred_1")
            .with_name("signing")];
        let plan = plan_credentials(&[key("KEY").with_name("signing")], &observed, &[]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_pinned_id_without_echoed_pem_is_kept() {
        let observed = [Credential::new(CredentialType::PublicKey).with_id("cred_1")];
        let plan = plan_credentials(&[key("KEY").with_id("cred_1")], &observed, &[]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_empty_observed_creates_everything() {
        let plan = plan_credentials(&[key("a"), key("b")], &[], &[]);
        assert_eq!(plan.actions.len(), 2);
        assert!(
            plan.actions
                .iter()
                .all(|a| matches!(a, CredentialAction::Create { replaces: None, .. }))
        );
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_identical_state_is_noop() {
        let observed = [remote("cred_1", "a"), remote("cred_2", "b")];
        let plan = plan_credentials(&[key("a"), key("b")], &observed, &[]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_reorder_does_not_recreate() {
        let observed = [remote("cred_1", "a"), remote("cred_2", "b")];
        let plan = plan_credentials(&[key("b"), key("a")], &observed, &[]);
        assert!(plan.is_noop());
        let ids: Vec<_> = plan
            .actions
            .iter()
            .map(|a| match a {
                CredentialAction::Keep { observed } => observed.id.clone().unwrap(),
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(ids, vec!["cred_2", "cred_1"]);
    }

    #[test]
    fn test_grow_keeps_existing() {
        let observed = [remote("cred_1", "a")];
        let plan = plan_credentials(&[key("a"), key("b")], &observed, &[]);
        assert!(matches!(&plan.actions[0], CredentialAction::Keep { observed } if observed.id.as_deref() == Some("cred_1")));
        assert!(matches!(&plan.actions[1], CredentialAction::Create { .. }));
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_unmatched_attached_is_deleted() {
        let observed = [remote("cred_1", "a"), remote("cred_2", "b")];
        let plan = plan_credentials(&[key("b")], &observed, &[]);
        assert_eq!(plan.delete_ids(), vec!["cred_1"]);
    }

    #[test]
    fn test_expiry_change_is_update() {
        let observed = [remote("cred_1", "a")];
        let desired = [key("a").with_expires_at(datetime!(2031-01-01 0:00 UTC))];
        let plan = plan_credentials(&desired, &observed, &[]);
        assert!(matches!(
            plan.actions[0],
            CredentialAction::UpdateExpiry { expires_at, .. } if expires_at == datetime!(2031-01-01 0:00 UTC)
        ));
    }

    #[test]
    fn test_expiry_is_never_cleared() {
        let observed = [remote("cred_1", "a").with_expires_at(datetime!(2031-01-01 0:00 UTC))];
        let plan = plan_credentials(&[key("a")], &observed, &[]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_pinned_id_with_changed_material_is_replaced() {
        let observed = [remote("cred_1", "a")];
        let desired = [key("z").with_id("cred_1")];
        let plan = plan_credentials(&desired, &observed, &[]);

        assert!(matches!(
            &plan.actions[0],
            CredentialAction::Create { desired, replaces: Some(old) } if old == "cred_1" && desired.id.is_none()
        ));
        assert_eq!(plan.delete_ids(), vec!["cred_1"]);
    }

    #[test]
    fn test_pinned_id_missing_remotely_is_created() {
        let desired = [key("a").with_id("cred_gone")];
        let plan = plan_credentials(&desired, &[], &[]);
        assert!(matches!(&plan.actions[0], CredentialAction::Create { replaces: None, .. }));
    }

    #[test]
    fn test_reusable_pool_is_matched_but_never_deleted() {
        let reusable = [remote("cred_9", "a"), remote("cred_8", "x")];
        let plan = plan_credentials(&[key("a")], &[], &reusable);
        assert!(matches!(&plan.actions[0], CredentialAction::Keep { observed } if observed.id.as_deref() == Some("cred_9")));
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_action_display() {
        let action = CredentialAction::Create {
            desired: key("a").with_name("primary"),
            replaces: Some("cred_1".to_string()),
        };
        assert_eq!(action.to_string(), "create primary replacing cred_1");
    }
}

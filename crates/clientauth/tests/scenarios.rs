//! End-to-end reconciliation scenarios against the in-memory backend.

use std::sync::Arc;

use clientauth::management::CallKind;
use clientauth::prelude::*;
use clientauth::types::Client;
use clientauth::{ApiCall, SignedRequestObjectDescriptor};
use time::macros::datetime;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const PUBLIC_KEY: &str = include_str!("fixtures/public_key.pem");
const SECOND_PUBLIC_KEY: &str = include_str!("fixtures/second_public_key.pem");
const SIGNING_CERT: &str = include_str!("fixtures/signing_cert.pem");
const SHORT_LIVED_CERT: &str = include_str!("fixtures/short_lived_cert.pem");

// =============================================================================
// Helpers
// =============================================================================

fn setup(app_type: AppType) -> (Arc<MemoryManagementApi>, ClientCredentialsResource<Arc<MemoryManagementApi>>) {
    let api = Arc::new(MemoryManagementApi::new());
    api.insert_client(
        Client::new("app_1")
            .with_app_type(app_type)
            .with_token_endpoint_auth_method(app_type.default_authentication_method()),
    );
    let resource = ClientCredentialsResource::new(Arc::clone(&api));
    (api, resource)
}

fn config(method: AuthenticationMethod, credentials: Vec<CredentialDescriptor>) -> ClientCredentialsConfig {
    ClientCredentialsConfig {
        client_id: "app_1".to_string(),
        authentication_method: Some(method),
        credentials,
        ..ClientCredentialsConfig::default()
    }
}

fn pem(pem: &str) -> CredentialDescriptor {
    CredentialDescriptor {
        pem: Some(pem.to_string()),
        ..CredentialDescriptor::default()
    }
}

fn named(name: &str, material: &str) -> CredentialDescriptor {
    CredentialDescriptor {
        name: Some(name.to_string()),
        ..pem(material)
    }
}

fn subject(dn: &str) -> CredentialDescriptor {
    CredentialDescriptor {
        subject_dn: Some(dn.to_string()),
        ..CredentialDescriptor::default()
    }
}

fn ids(state: &CredentialsState) -> Vec<String> {
    state
        .authentication_method
        .as_ref()
        .map(|b| b.credential_ids().into_iter().map(str::to_string).collect())
        .unwrap_or_default()
}

fn credential_mutations(api: &MemoryManagementApi) -> Vec<ApiCall> {
    api.calls()
        .into_iter()
        .filter(ApiCall::is_credential_mutation)
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_missing_credentials_issue_no_remote_calls() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    for method in AuthenticationMethod::CREDENTIAL_BEARING {
        let err = resource.update(&ctx, &config(method, Vec::new())).await.unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialsMissing { .. }));
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_tls_client_auth_exactly_one_of_pem_and_subject_dn() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let both = CredentialDescriptor {
        subject_dn: Some("CN=gateway".to_string()),
        ..pem(SIGNING_CERT)
    };
    for descriptor in [both, CredentialDescriptor::default()] {
        let err = resource
            .update(&ctx, &config(AuthenticationMethod::TlsClientAuth, vec![descriptor]))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::CredentialsInvalid { .. }));
    }
    assert!(api.calls().is_empty());

    for descriptor in [subject("CN=gateway"), pem(SIGNING_CERT)] {
        let state = resource
            .update(&ctx, &config(AuthenticationMethod::TlsClientAuth, vec![descriptor]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.method(), Some(AuthenticationMethod::TlsClientAuth));
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();
    let desired = ClientCredentialsConfig {
        signed_request_object: Some(SignedRequestObjectDescriptor {
            required: true,
            credentials: vec![named("request-signing", SECOND_PUBLIC_KEY)],
        }),
        ..config(
            AuthenticationMethod::PrivateKeyJwt,
            vec![
                CredentialDescriptor {
                    name: Some("primary".to_string()),
                    parse_expiry_from_cert: Some(true),
                    ..pem(SIGNING_CERT)
                },
                CredentialDescriptor {
                    expires_at: Some("2030-06-01T00:00:00Z".to_string()),
                    ..named("secondary", PUBLIC_KEY)
                },
            ],
        )
    };

    let first = resource.update(&ctx, &desired).await.unwrap().unwrap();
    assert_eq!(ids(&first).len(), 2);
    assert!(!api.mutations().is_empty());

    api.clear_calls();
    let second = resource.update(&ctx, &desired).await.unwrap().unwrap();
    assert!(api.mutations().is_empty(), "{:?}", api.mutations());
    assert_eq!(first, second);

    let plan = resource.plan(&ctx, &desired).await.unwrap().unwrap();
    assert!(plan.is_noop(), "{plan}");
}

#[tokio::test]
async fn test_parse_expiry_from_cert_and_explicit_expiry_wins() {
    let (_api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let state = resource
        .update(
            &ctx,
            &config(
                AuthenticationMethod::PrivateKeyJwt,
                vec![
                    CredentialDescriptor {
                        parse_expiry_from_cert: Some(true),
                        ..pem(SIGNING_CERT)
                    },
                    CredentialDescriptor {
                        parse_expiry_from_cert: Some(true),
                        expires_at: Some("2027-01-01T00:00:00Z".to_string()),
                        ..pem(SHORT_LIVED_CERT)
                    },
                ],
            ),
        )
        .await
        .unwrap()
        .unwrap();

    let credentials = state.authentication_method.unwrap().credentials().to_vec();
    assert_eq!(credentials[0].expires_at, Some(datetime!(2036-10-13 13:23:44 UTC)));
    // The certificate expires in October 2027; the explicit value wins.
    assert_eq!(credentials[1].expires_at, Some(datetime!(2027-01-01 0:00 UTC)));
}

#[tokio::test]
async fn test_add_then_grow_keeps_first_credential_id() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let one = resource
        .update(
            &ctx,
            &config(AuthenticationMethod::PrivateKeyJwt, vec![named("first", PUBLIC_KEY)]),
        )
        .await
        .unwrap()
        .unwrap();
    let first_id = ids(&one)[0].clone();

    api.clear_calls();
    let two = resource
        .update(
            &ctx,
            &config(
                AuthenticationMethod::PrivateKeyJwt,
                vec![named("first", PUBLIC_KEY), named("second", SECOND_PUBLIC_KEY)],
            ),
        )
        .await
        .unwrap()
        .unwrap();

    let grown = ids(&two);
    assert_eq!(grown.len(), 2);
    assert_eq!(grown[0], first_id);
    assert_ne!(grown[1], first_id);

    let mutations = credential_mutations(&api);
    assert_eq!(mutations.len(), 1);
    assert!(matches!(mutations[0], ApiCall::CreateCredential { .. }));
}

#[tokio::test]
async fn test_shrink_deletes_after_detaching() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let two = resource
        .update(
            &ctx,
            &config(
                AuthenticationMethod::PrivateKeyJwt,
                vec![named("first", PUBLIC_KEY), named("second", SECOND_PUBLIC_KEY)],
            ),
        )
        .await
        .unwrap()
        .unwrap();
    let removed = ids(&two)[0].clone();

    api.clear_calls();
    let one = resource
        .update(
            &ctx,
            &config(AuthenticationMethod::PrivateKeyJwt, vec![named("second", SECOND_PUBLIC_KEY)]),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(ids(&one), vec![ids(&two)[1].clone()]);
    let kinds: Vec<_> = api.mutations().iter().map(ApiCall::kind).collect();
    assert_eq!(kinds, vec![CallKind::UpdateClient, CallKind::DeleteCredential]);
    assert!(api.credentials("app_1").iter().all(|c| c.id.as_deref() != Some(removed.as_str())));
}

#[tokio::test]
async fn test_expiry_only_update_keeps_id_and_bumps_updated_at() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let before = resource
        .update(
            &ctx,
            &config(AuthenticationMethod::PrivateKeyJwt, vec![named("signing", PUBLIC_KEY)]),
        )
        .await
        .unwrap()
        .unwrap();
    let original = before.authentication_method.unwrap().credentials()[0].clone();

    api.clear_calls();
    let after = resource
        .update(
            &ctx,
            &config(
                AuthenticationMethod::PrivateKeyJwt,
                vec![CredentialDescriptor {
                    expires_at: Some("2031-03-01T00:00:00Z".to_string()),
                    ..named("signing", PUBLIC_KEY)
                }],
            ),
        )
        .await
        .unwrap()
        .unwrap();
    let updated = after.authentication_method.unwrap().credentials()[0].clone();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.expires_at, Some(datetime!(2031-03-01 0:00 UTC)));
    assert!(updated.updated_at > original.updated_at);
    assert_eq!(updated.created_at, original.created_at);

    let kinds: Vec<_> = api.mutations().iter().map(ApiCall::kind).collect();
    assert_eq!(kinds, vec![CallKind::UpdateCredential]);
}

#[tokio::test]
async fn test_rotating_unnamed_key_recreates_it() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let before = resource
        .update(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap()
        .unwrap();
    let old_id = ids(&before)[0].clone();

    api.clear_calls();
    let rotated = config(AuthenticationMethod::PrivateKeyJwt, vec![pem(SECOND_PUBLIC_KEY)]);
    let plan = resource.plan(&ctx, &rotated).await.unwrap().unwrap();
    assert!(!plan.is_noop(), "{plan}");

    let after = resource.update(&ctx, &rotated).await.unwrap().unwrap();
    let new_ids = ids(&after);
    assert_eq!(new_ids.len(), 1);
    assert_ne!(new_ids[0], old_id);

    let kinds: Vec<_> = api.mutations().iter().map(ApiCall::kind).collect();
    assert_eq!(
        kinds,
        vec![
            CallKind::CreateCredential,
            CallKind::UpdateClient,
            CallKind::DeleteCredential
        ]
    );
    assert!(api.credentials("app_1").iter().all(|c| c.id.as_deref() != Some(old_id.as_str())));
}

// =============================================================================
// Method Switching
// =============================================================================

#[tokio::test]
async fn test_switching_method_detaches_without_deleting() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();

    let jwt = resource
        .update(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap()
        .unwrap();
    let key_id = ids(&jwt)[0].clone();

    api.clear_calls();
    let tls = resource
        .update(&ctx, &config(AuthenticationMethod::TlsClientAuth, vec![subject("CN=gateway")]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(tls.method(), Some(AuthenticationMethod::TlsClientAuth));
    assert!(
        !api.calls()
            .iter()
            .any(|c| matches!(c, ApiCall::DeleteCredential { .. }))
    );
    // The detached key still exists remotely but is no longer bound.
    let remaining = api.credentials("app_1");
    assert!(remaining.iter().any(|c| c.id.as_deref() == Some(key_id.as_str())));
    let client = api.client("app_1").unwrap();
    let bindings = client.client_authentication_methods.unwrap();
    assert!(bindings.private_key_jwt.is_none());
    assert!(bindings.tls_client_auth.is_some());
    assert_eq!(client.token_endpoint_auth_method, None);
}

#[tokio::test]
async fn test_switch_back_reuses_detached_credential() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();
    let jwt = config(AuthenticationMethod::PrivateKeyJwt, vec![named("signing", PUBLIC_KEY)]);

    let first = resource.update(&ctx, &jwt).await.unwrap().unwrap();
    resource
        .update(&ctx, &config(AuthenticationMethod::ClientSecretPost, Vec::new()))
        .await
        .unwrap();

    api.clear_calls();
    let back = resource.update(&ctx, &jwt).await.unwrap().unwrap();
    assert_eq!(ids(&back), ids(&first));
    assert!(credential_mutations(&api).is_empty());
}

#[tokio::test]
async fn test_prune_deletes_detached_credentials() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new().with_options(ReconcileOptions {
        prune_detached_credentials: true,
    });

    resource
        .update(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap();
    let state = resource
        .update(&ctx, &config(AuthenticationMethod::ClientSecretBasic, Vec::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.method(), Some(AuthenticationMethod::ClientSecretBasic));
    assert!(api.credentials("app_1").is_empty());
}

#[tokio::test]
async fn test_secret_rotation() {
    let (api, resource) = setup(AppType::RegularWeb);
    let ctx = ReconcileContext::new();
    let mut desired = config(AuthenticationMethod::ClientSecretBasic, Vec::new());
    desired.client_secret = Some("first".to_string());

    resource.update(&ctx, &desired).await.unwrap();
    assert_eq!(api.client("app_1").unwrap().client_secret.as_deref(), Some("first"));

    api.clear_calls();
    resource.update(&ctx, &desired).await.unwrap();
    assert!(api.mutations().is_empty());

    desired.client_secret = Some("second".to_string());
    resource.update(&ctx, &desired).await.unwrap();
    let client = api.client("app_1").unwrap();
    assert_eq!(client.client_secret.as_deref(), Some("second"));
    assert_eq!(
        client.token_endpoint_auth_method,
        Some(AuthenticationMethod::ClientSecretBasic)
    );
}

// =============================================================================
// Signed Request Object
// =============================================================================

#[tokio::test]
async fn test_signed_request_object_is_independent_of_method() {
    let (api, resource) = setup(AppType::Spa);
    let ctx = ReconcileContext::new();
    let mut desired = ClientCredentialsConfig {
        client_id: "app_1".to_string(),
        signed_request_object: Some(SignedRequestObjectDescriptor {
            required: false,
            credentials: vec![named("request-signing", PUBLIC_KEY)],
        }),
        ..ClientCredentialsConfig::default()
    };

    let state = resource.update(&ctx, &desired).await.unwrap().unwrap();
    assert_eq!(state.method(), Some(AuthenticationMethod::None));
    let sro = state.signed_request_object.unwrap();
    assert!(!sro.required);
    assert_eq!(sro.credentials.len(), 1);

    api.clear_calls();
    if let Some(sro) = desired.signed_request_object.as_mut() {
        sro.required = true;
    }
    let toggled = resource.update(&ctx, &desired).await.unwrap().unwrap();
    let toggled_sro = toggled.signed_request_object.unwrap();
    assert!(toggled_sro.required);
    assert_eq!(toggled_sro.credential_ids(), sro.credential_ids());
    assert!(credential_mutations(&api).is_empty());
    assert_eq!(api.mutations().len(), 1);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_teardown_spa_ends_on_none_without_credentials() {
    let (api, resource) = setup(AppType::Spa);
    let ctx = ReconcileContext::new();

    resource
        .update(
            &ctx,
            &config(
                AuthenticationMethod::PrivateKeyJwt,
                vec![pem(PUBLIC_KEY), pem(SECOND_PUBLIC_KEY)],
            ),
        )
        .await
        .unwrap();
    assert_eq!(api.credentials("app_1").len(), 2);

    let outcome = resource.delete(&ctx, "app_1").await.unwrap();
    let TeardownOutcome::Reset { method, deleted } = outcome else {
        panic!("expected a reset");
    };
    assert_eq!(method, AuthenticationMethod::None);
    assert_eq!(deleted.len(), 2);

    let state = resource.read(&ctx, "app_1").await.unwrap().unwrap();
    assert_eq!(state.method(), Some(AuthenticationMethod::None));
    assert!(api.credentials("app_1").is_empty());
}

#[tokio::test]
async fn test_teardown_defaults_by_app_type() {
    for (app_type, expected) in [
        (AppType::Native, AuthenticationMethod::None),
        (AppType::RegularWeb, AuthenticationMethod::ClientSecretPost),
        (AppType::NonInteractive, AuthenticationMethod::ClientSecretPost),
        (AppType::Other, AuthenticationMethod::ClientSecretBasic),
    ] {
        let (api, resource) = setup(app_type);
        let ctx = ReconcileContext::new();
        resource
            .update(&ctx, &config(AuthenticationMethod::SelfSignedTlsClientAuth, vec![pem(SIGNING_CERT)]))
            .await
            .unwrap();

        resource.delete(&ctx, "app_1").await.unwrap();
        let client = api.client("app_1").unwrap();
        assert_eq!(client.token_endpoint_auth_method, Some(expected), "{app_type:?}");
        assert!(api.credentials("app_1").is_empty());
    }
}

#[tokio::test]
async fn test_teardown_of_missing_client() {
    let (api, resource) = setup(AppType::Spa);
    api.remove_client("app_1");
    let outcome = resource.delete(&ReconcileContext::new(), "app_1").await.unwrap();
    assert_eq!(outcome, TeardownOutcome::AlreadyGone);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_missing_client_signals_state_removal() {
    let (api, resource) = setup(AppType::Spa);
    api.remove_client("app_1");
    let ctx = ReconcileContext::new();

    assert!(resource.read(&ctx, "app_1").await.unwrap().is_none());
    let state = resource
        .update(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap();
    assert!(state.is_none());
}

#[tokio::test]
async fn test_partial_failure_converges_on_rerun() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();
    let desired = config(
        AuthenticationMethod::PrivateKeyJwt,
        vec![named("first", PUBLIC_KEY), named("second", SECOND_PUBLIC_KEY)],
    );

    api.fail_next(CallKind::UpdateClient, 503, "service unavailable");
    let err = assert_err!(resource.update(&ctx, &desired).await);
    assert!(matches!(err, CredentialsError::Api { status: 503, .. }));
    assert!(err.is_remote_error());
    // Both credentials were created before the binding failed.
    assert_eq!(api.credentials("app_1").len(), 2);

    api.clear_calls();
    let state = assert_ok!(resource.update(&ctx, &desired).await).unwrap();
    assert_eq!(ids(&state).len(), 2);
    assert!(credential_mutations(&api).is_empty());
    assert_eq!(api.credentials("app_1").len(), 2);
}

#[tokio::test]
async fn test_remote_error_is_propagated_verbatim() {
    let (api, resource) = setup(AppType::NonInteractive);
    api.fail_next(CallKind::CreateCredential, 429, "Too Many Requests");

    let err = resource
        .update(
            &ReconcileContext::new(),
            &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Management API error (status 429): Too Many Requests"
    );
}

#[tokio::test]
async fn test_cancelled_context_issues_no_calls() {
    let (api, resource) = setup(AppType::NonInteractive);
    let token = CancellationToken::new();
    token.cancel();
    let ctx = ReconcileContext::new().with_cancellation(token);

    let err = resource
        .update(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialsError::Cancelled { .. }));
    assert_eq!(err.category(), ErrorCategory::Cancelled);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_plan_does_not_mutate() {
    let (api, resource) = setup(AppType::NonInteractive);
    let ctx = ReconcileContext::new();
    let plan = resource
        .plan(&ctx, &config(AuthenticationMethod::PrivateKeyJwt, vec![pem(PUBLIC_KEY)]))
        .await
        .unwrap()
        .unwrap();

    assert!(!plan.is_noop());
    assert!(plan.rebind);
    assert_eq!(plan.credentials.actions.len(), 1);
    assert!(plan.to_string().contains("client_secret_post -> private_key_jwt"));
    assert!(api.mutations().is_empty());
}

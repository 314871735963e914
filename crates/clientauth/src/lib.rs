//! # clientauth
//!
//! Reconciles the authentication-credential configuration of identity
//! provider clients against a remote management API.
//!
//! This crate provides:
//! - Validation of desired credential configuration per authentication method
//! - A normalized view of the remote credential state
//! - Minimal create/update/delete of remote credential records
//! - Switching the active authentication method and its bindings
//! - Teardown back to the application type's default method
//!
//! ## Modules
//!
//! - [`types`] - Credentials, methods, clients and the normalized state
//! - [`expander`] - Desired-configuration validation
//! - [`reader`] - Remote state reader
//! - [`reconcile`] - Credential planning and application
//! - [`attacher`] - Authentication-method and signed request object binding
//! - [`teardown`] - Reset to the default method and credential removal
//! - [`resource`] - CRUD surface running the full pipeline
//! - [`management`] - Management API trait with HTTP and in-memory backends
//! - [`config`] - Connection and reconciliation settings
//! - [`context`] - Cancellation, deadline and options of one pass

pub mod attacher;
pub mod cert;
pub mod config;
pub mod context;
pub mod error;
pub mod expander;
pub mod management;
pub mod reader;
pub mod reconcile;
pub mod resource;
pub mod teardown;
pub mod types;

pub use config::{ClientAuthConfig, ManagementConfig, ReconcileSettings};
pub use context::{ReconcileContext, ReconcileOptions};
pub use error::{CredentialsError, ErrorCategory};
pub use expander::{
    ClientCredentialsConfig, CredentialDescriptor, SignedRequestObjectDescriptor, expand,
};
pub use management::{ApiCall, CallKind, HttpManagementApi, ManagementApi, MemoryManagementApi};
pub use reader::{RemoteSnapshot, read_snapshot, read_state};
pub use reconcile::{CredentialAction, CredentialPlan, plan_credentials};
pub use resource::{ClientCredentialsResource, ReconcilePlan, SignedRequestObjectPlan};
pub use teardown::{TeardownOutcome, teardown};
pub use types::{
    AppType, AuthenticationMethod, Client, Credential, CredentialType, CredentialsState,
    MethodBinding, SignedRequestObject, SigningAlgorithm,
};

/// Type alias for credential reconciliation results.
pub type CredResult<T> = Result<T, CredentialsError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use clientauth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::CredResult;
    pub use crate::attacher::Transition;
    pub use crate::context::{ReconcileContext, ReconcileOptions};
    pub use crate::error::{CredentialsError, ErrorCategory};
    pub use crate::expander::{ClientCredentialsConfig, CredentialDescriptor};
    pub use crate::management::{HttpManagementApi, ManagementApi, MemoryManagementApi};
    pub use crate::resource::{ClientCredentialsResource, ReconcilePlan};
    pub use crate::teardown::TeardownOutcome;
    pub use crate::types::{
        AppType, AuthenticationMethod, Credential, CredentialType, CredentialsState,
        MethodBinding,
    };
}

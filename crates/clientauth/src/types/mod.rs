//! Domain types for client credential management.

pub mod client;
pub mod credential;
pub mod method;
pub mod state;

pub use client::{
    BindingPayload, Client, ClientAuthenticationMethods, ClientUpdate, CredentialRef,
    CredentialReferences, SignedRequestObjectBinding,
};
pub use credential::{
    Credential, CredentialType, CredentialUpdate, IdentityMatch, NewCredential, SigningAlgorithm,
};
pub use method::{AppType, AuthenticationMethod, default_method_for};
pub use state::{CredentialsState, MethodBinding, SignedRequestObject};

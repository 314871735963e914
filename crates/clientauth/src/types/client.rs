//! Client resource as exposed by the management API.
//!
//! Only the fields this crate reads or writes are modelled. The client is the
//! aggregate root; its credential bindings are referenced by credential id.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::method::{AppType, AuthenticationMethod};
use crate::CredResult;
use crate::error::CredentialsError;

// =============================================================================
// Credential References
// =============================================================================

/// Reference to an existing credential by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    /// Credential identifier.
    pub id: String,
}

impl CredentialRef {
    /// Creates a reference to the given credential id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Ordered list of credential references attached to one method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialReferences {
    /// Referenced credentials, in binding order.
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
}

impl CredentialReferences {
    /// Builds references from credential ids.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            credentials: ids.into_iter().map(CredentialRef::new).collect(),
        }
    }

    /// Returns the referenced ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.credentials.iter().map(|c| c.id.as_str()).collect()
    }
}

// =============================================================================
// Bindings (read shape)
// =============================================================================

/// Credential bindings of a client, one slot per credential-bearing method.
///
/// A consistent client has at most one populated slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAuthenticationMethods {
    /// `private_key_jwt` binding.
    #[serde(default)]
    pub private_key_jwt: Option<CredentialReferences>,
    /// `tls_client_auth` binding.
    #[serde(default)]
    pub tls_client_auth: Option<CredentialReferences>,
    /// `self_signed_tls_client_auth` binding.
    #[serde(default)]
    pub self_signed_tls_client_auth: Option<CredentialReferences>,
}

impl ClientAuthenticationMethods {
    /// Returns the slot for a credential-bearing method.
    #[must_use]
    pub fn slot(&self, method: AuthenticationMethod) -> Option<&CredentialReferences> {
        match method {
            AuthenticationMethod::PrivateKeyJwt => self.private_key_jwt.as_ref(),
            AuthenticationMethod::TlsClientAuth => self.tls_client_auth.as_ref(),
            AuthenticationMethod::SelfSignedTlsClientAuth => {
                self.self_signed_tls_client_auth.as_ref()
            }
            _ => None,
        }
    }

    /// Returns all populated slots.
    #[must_use]
    pub fn populated(&self) -> Vec<(AuthenticationMethod, &CredentialReferences)> {
        AuthenticationMethod::CREDENTIAL_BEARING
            .into_iter()
            .filter_map(|method| self.slot(method).map(|refs| (method, refs)))
            .collect()
    }

    /// Builds a binding with a single populated slot.
    #[must_use]
    pub fn single(method: AuthenticationMethod, refs: CredentialReferences) -> Self {
        let mut bindings = Self::default();
        match method {
            AuthenticationMethod::PrivateKeyJwt => bindings.private_key_jwt = Some(refs),
            AuthenticationMethod::TlsClientAuth => bindings.tls_client_auth = Some(refs),
            AuthenticationMethod::SelfSignedTlsClientAuth => {
                bindings.self_signed_tls_client_auth = Some(refs)
            }
            _ => {}
        }
        bindings
    }
}

/// Signed request object binding of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequestObjectBinding {
    /// Whether authorization requests must be signed.
    #[serde(default)]
    pub required: bool,
    /// Credentials used to verify signed requests.
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
}

// =============================================================================
// Client
// =============================================================================

/// Client resource (subset relevant to credential management).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier.
    pub client_id: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Application type; drives the teardown default method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_type: Option<AppType>,

    /// Active shared-secret/none method. `None` while a credential binding is active.
    #[serde(default)]
    pub token_endpoint_auth_method: Option<AuthenticationMethod>,

    /// Current shared secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Credential bindings.
    #[serde(default)]
    pub client_authentication_methods: Option<ClientAuthenticationMethods>,

    /// Signed request object binding.
    #[serde(default)]
    pub signed_request_object: Option<SignedRequestObjectBinding>,
}

impl Client {
    /// Creates a client with no bindings.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: None,
            app_type: None,
            token_endpoint_auth_method: None,
            client_secret: None,
            client_authentication_methods: None,
            signed_request_object: None,
        }
    }

    /// Sets the application type.
    #[must_use]
    pub fn with_app_type(mut self, app_type: AppType) -> Self {
        self.app_type = Some(app_type);
        self
    }

    /// Sets the shared-secret/none method.
    #[must_use]
    pub fn with_token_endpoint_auth_method(mut self, method: AuthenticationMethod) -> Self {
        self.token_endpoint_auth_method = Some(method);
        self
    }

    /// Sets the shared secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Returns the populated credential binding, if any.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if more than one binding slot is populated.
    pub fn credential_binding(
        &self,
    ) -> CredResult<Option<(AuthenticationMethod, &CredentialReferences)>> {
        let Some(bindings) = &self.client_authentication_methods else {
            return Ok(None);
        };
        let populated = bindings.populated();
        match populated.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => Err(CredentialsError::conflict(format!(
                "client {} has {} credential bindings populated ({})",
                self.client_id,
                many.len(),
                many.iter()
                    .map(|(m, _)| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Returns the active authentication method.
    ///
    /// A populated credential binding wins over `token_endpoint_auth_method`.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if more than one binding slot is populated.
    pub fn active_method(&self) -> CredResult<Option<AuthenticationMethod>> {
        Ok(self
            .credential_binding()?
            .map(|(method, _)| method)
            .or(self.token_endpoint_auth_method))
    }
}

// =============================================================================
// Client Update (write shape)
// =============================================================================

/// Credential binding submitted in a client update.
///
/// Serializes every credential-bearing slot: the active one with its
/// references, the others as explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPayload {
    method: AuthenticationMethod,
    references: CredentialReferences,
}

impl BindingPayload {
    /// Creates a binding payload for a credential-bearing method.
    ///
    /// # Errors
    ///
    /// Returns an internal error if `method` does not use credentials.
    pub fn new(method: AuthenticationMethod, references: CredentialReferences) -> CredResult<Self> {
        if !method.uses_credentials() {
            return Err(CredentialsError::internal(format!(
                "{method} cannot carry credential references"
            )));
        }
        Ok(Self { method, references })
    }

    /// Returns the bound method.
    #[must_use]
    pub fn method(&self) -> AuthenticationMethod {
        self.method
    }

    /// Converts the payload into the read shape.
    #[must_use]
    pub fn to_bindings(&self) -> ClientAuthenticationMethods {
        ClientAuthenticationMethods::single(self.method, self.references.clone())
    }
}

impl Serialize for BindingPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(AuthenticationMethod::CREDENTIAL_BEARING.len()))?;
        for method in AuthenticationMethod::CREDENTIAL_BEARING {
            if method == self.method {
                map.serialize_entry(method.as_str(), &self.references)?;
            } else {
                map.serialize_entry(method.as_str(), &Option::<CredentialReferences>::None)?;
            }
        }
        map.end()
    }
}

/// Sparse client update.
///
/// Outer `None` leaves a field untouched; `Some(None)` sends an explicit
/// `null` that clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientUpdate {
    /// Shared-secret/none method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<Option<AuthenticationMethod>>,

    /// Credential binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_authentication_methods: Option<Option<BindingPayload>>,

    /// New shared secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Signed request object binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_request_object: Option<Option<SignedRequestObjectBinding>>,
}

impl ClientUpdate {
    /// Update that activates a shared-secret/none method and clears every
    /// credential binding.
    #[must_use]
    pub fn secret_method(method: AuthenticationMethod) -> Self {
        Self {
            token_endpoint_auth_method: Some(Some(method)),
            client_authentication_methods: Some(None),
            ..Self::default()
        }
    }

    /// Update that activates a credential binding and clears
    /// `token_endpoint_auth_method`.
    #[must_use]
    pub fn credential_method(binding: BindingPayload) -> Self {
        Self {
            token_endpoint_auth_method: Some(None),
            client_authentication_methods: Some(Some(binding)),
            ..Self::default()
        }
    }

    /// Update that only replaces the signed request object binding.
    #[must_use]
    pub fn signed_request_object(binding: Option<SignedRequestObjectBinding>) -> Self {
        Self {
            signed_request_object: Some(binding),
            ..Self::default()
        }
    }

    /// Returns `true` if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_binding_payload_nulls_inactive_slots() {
        let binding = BindingPayload::new(
            AuthenticationMethod::TlsClientAuth,
            CredentialReferences::from_ids(["cred_1", "cred_2"]),
        )
        .unwrap();
        let update = ClientUpdate::credential_method(binding);

        assert_json_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "token_endpoint_auth_method": null,
                "client_authentication_methods": {
                    "private_key_jwt": null,
                    "tls_client_auth": {"credentials": [{"id": "cred_1"}, {"id": "cred_2"}]},
                    "self_signed_tls_client_auth": null
                }
            })
        );
    }

    #[test]
    fn test_secret_method_clears_bindings() {
        let update = ClientUpdate::secret_method(AuthenticationMethod::ClientSecretBasic);
        assert_json_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "token_endpoint_auth_method": "client_secret_basic",
                "client_authentication_methods": null
            })
        );
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let update = ClientUpdate::signed_request_object(Some(SignedRequestObjectBinding {
            required: true,
            credentials: vec![CredentialRef::new("cred_9")],
        }));
        assert_json_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({
                "signed_request_object": {"required": true, "credentials": [{"id": "cred_9"}]}
            })
        );
        assert!(ClientUpdate::default().is_empty());
        assert!(!update.is_empty());
    }

    #[test]
    fn test_binding_payload_rejects_secret_methods() {
        let err = BindingPayload::new(
            AuthenticationMethod::ClientSecretPost,
            CredentialReferences::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CredentialsError::Internal { .. }));
    }

    #[test]
    fn test_active_method_prefers_binding() {
        let mut client = Client::new("app_1")
            .with_token_endpoint_auth_method(AuthenticationMethod::ClientSecretPost);
        assert_eq!(
            client.active_method().unwrap(),
            Some(AuthenticationMethod::ClientSecretPost)
        );

        client.client_authentication_methods = Some(ClientAuthenticationMethods::single(
            AuthenticationMethod::PrivateKeyJwt,
            CredentialReferences::from_ids(["cred_1"]),
        ));
        assert_eq!(
            client.active_method().unwrap(),
            Some(AuthenticationMethod::PrivateKeyJwt)
        );
    }

    #[test]
    fn test_multiple_bindings_is_conflict() {
        let mut client = Client::new("app_1");
        client.client_authentication_methods = Some(ClientAuthenticationMethods {
            private_key_jwt: Some(CredentialReferences::from_ids(["a"])),
            tls_client_auth: Some(CredentialReferences::from_ids(["b"])),
            self_signed_tls_client_auth: None,
        });
        let err = client.active_method().unwrap_err();
        assert!(err.is_remote_error());
        assert!(err.to_string().contains("private_key_jwt, tls_client_auth"));
    }

    #[test]
    fn test_client_deserializes_from_api_shape() {
        let client: Client = serde_json::from_value(json!({
            "client_id": "app_1",
            "app_type": "spa",
            "token_endpoint_auth_method": null,
            "client_authentication_methods": {
                "private_key_jwt": {"credentials": [{"id": "cred_1"}]}
            },
            "signed_request_object": {"required": false, "credentials": []},
            "callbacks": ["https://example.com"]
        }))
        .unwrap();

        assert_eq!(client.app_type, Some(AppType::Spa));
        let (method, refs) = client.credential_binding().unwrap().unwrap();
        assert_eq!(method, AuthenticationMethod::PrivateKeyJwt);
        assert_eq!(refs.ids(), vec!["cred_1"]);
    }
}

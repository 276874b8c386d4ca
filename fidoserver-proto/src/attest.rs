//! Types related to attestation (Registration)

use serde::{Deserialize, Serialize};

use crate::options::*;

/// <https://w3c.github.io/webauthn/#authenticatorattestationresponse>
///
/// The binary members are kept in their transmitted text form so that the relying party
/// can insist on canonical base64url before decoding them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticatorAttestationResponseRaw {
    /// <https://w3c.github.io/webauthn/#dom-authenticatorattestationresponse-attestationobject>
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,

    /// <https://w3c.github.io/webauthn/#dom-authenticatorresponse-clientdatajson>
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,

    /// <https://w3c.github.io/webauthn/#dom-authenticatorattestationresponse-gettransports>
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

/// A client encoded registration response. This is the payload a browser or client
/// forwards after `navigator.credentials.create()` completes.
/// <https://w3c.github.io/webauthn/#iface-pkcredential>
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterPublicKeyCredential {
    /// The id of the PublicKey credential, base64url.
    pub id: String,
    /// The id of the credential, base64url. Must be identical to `id`.
    #[serde(rename = "rawId")]
    pub raw_id: String,
    /// <https://w3c.github.io/webauthn/#dom-publickeycredential-response>
    pub response: AuthenticatorAttestationResponseRaw,
    /// The type of credential.
    #[serde(rename = "type")]
    pub type_: String,
}

/// Relying party supplied context that travels out of band alongside a registration
/// response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegistrationMetadata {
    /// The origin the relying party believes this ceremony was served from.
    pub origin: String,
    /// The username that started this ceremony.
    pub username: String,
    /// Where the registration happened, recorded against the credential.
    #[serde(rename = "createLocation")]
    pub create_location: String,
}

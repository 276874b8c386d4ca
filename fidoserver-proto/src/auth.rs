//! Types related to authentication (Assertion)

use serde::{Deserialize, Serialize};

/// An assertion as relayed by a client. Every member is base64url.
///
/// `signatureData` carries the authenticator data suffix that follows the rpIdHash,
/// namely `userPresence(1) · counter(4, BE)`, followed by the DER signature.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthenticationRequest {
    /// The credential id that produced this assertion.
    #[serde(rename = "keyHandle")]
    pub key_handle: String,
    /// The client data that was signed.
    #[serde(rename = "clientDataJSON", alias = "clientData")]
    pub client_data_json: String,
    /// Presence byte, counter and signature.
    #[serde(rename = "signatureData")]
    pub signature_data: String,
}

/// Relying party supplied context that travels out of band alongside an assertion.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthenticationMetadata {
    /// The origin the relying party believes this ceremony was served from.
    pub origin: String,
    /// The username that started this ceremony.
    pub username: String,
    /// Where the authentication happened, recorded against the credential.
    #[serde(rename = "lastUsedLocation")]
    pub last_used_location: String,
}

//! Extended Structs and representations for verification operations. The decoded
//! structures are transient; the credential records are designed to be handed to a
//! persistence layer and should not change.

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Representation of an AAGUID
/// <https://www.w3.org/TR/webauthn/#aaguid>
pub type Aaguid = [u8; 16];

/// A credential ID type.
pub type CredentialID = Vec<u8>;

/// The attested credential block that follows the fixed authenticator data header when
/// the AT flag is set.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    /// The guid of the authenticator. May indicate manufacturer.
    pub aaguid: Aaguid,
    /// The credential ID.
    pub credential_id: CredentialID,
    /// The credentials public Key, as the raw CBOR map.
    pub credential_pk: serde_cbor_2::Value,
}

/// Data returned by this authenticator during registration or authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    /// Hash of the relying party id.
    pub rp_id_hash: [u8; 32],
    /// The raw flags byte.
    pub flags: u8,
    /// The signature counter. Zero means the authenticator has no counter.
    pub counter: u32,
    /// The optional attested credential data.
    pub acd: Option<AttestedCredentialData>,
    /// Extensions supplied by the device, as the raw CBOR map.
    pub extensions: Option<serde_cbor_2::Value>,
}

impl AuthenticatorData {
    /// The user present (UP) bit.
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    /// The user verified (UV) bit.
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }
}

/// A decoded attestation object. `auth_data_bytes` is kept verbatim because every
/// attestation signature covers the exact transmitted bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    /// The attestation statement format tag.
    pub fmt: String,
    /// The format specific statement, as the raw CBOR value.
    pub att_stmt: serde_cbor_2::Value,
    /// The authenticator data as transmitted.
    pub auth_data_bytes: Vec<u8>,
    /// The decoded authenticator data.
    pub auth_data: AuthenticatorData,
}

/// The level of trust an attestation statement reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationType {
    /// Signed by an attestation key whose certificate chains to a vendor root.
    Basic,
    /// Signed by the credential key itself.
    Self_,
    /// Signed by an attestation identity key certified by an attestation CA.
    AttCa,
    /// No attestation was provided.
    None,
}

/// An opaque key of a stored certificate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CertRef {
    /// The domain this certificate was stored under.
    pub did: u64,
    /// The store assigned sequence number.
    pub id: u64,
}

/// One node of a stored attestation chain. The parent is a lookup key into the same
/// store, never an owning reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// This record's key.
    pub cert_ref: CertRef,
    /// The issuer distinguished name, as comma separated `short=value` pairs.
    pub issuer_dn: String,
    /// The serial number, as upper case hex.
    pub serial: String,
    /// The subject distinguished name, as comma separated `short=value` pairs.
    pub subject_dn: String,
    /// The DER certificate.
    pub der: Vec<u8>,
    /// The issuing certificate's record, when it was presented in the same chain.
    pub parent: Option<CertRef>,
}

/// Whether a stored credential may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    /// The credential may authenticate.
    Active,
    /// The credential was deactivated and must be refused.
    Inactive,
}

/// The flags recorded with a registration, serialised into
/// [`VerifiedCredential::registration_flags`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationFlags {
    /// User present during registration.
    #[serde(rename = "UP")]
    pub user_present: bool,
    /// User verified during registration.
    #[serde(rename = "UV")]
    pub user_verified: bool,
    /// The COSE key type of the credential.
    pub kty: i128,
    /// The COSE algorithm of the credential.
    pub alg: i128,
    /// The display name of the user at registration.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// The user icon at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// The output of a successful registration ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedCredential {
    /// The user handle from the pending session.
    pub user_id: String,
    /// The username from the pending session.
    pub username: String,
    /// The credential id, base64url.
    pub credential_id: String,
    /// The credential public key as DER SubjectPublicKeyInfo, base64url.
    pub public_key: String,
    /// The origin the ceremony was completed at.
    pub origin: String,
    /// Which transports the credential is expected to be reachable over.
    pub transport_hint: String,
    /// The stored leaf attestation certificate, when a chain was presented.
    pub attestation_cert_ref: Option<CertRef>,
    /// How the attestation was classified.
    pub attestation_type: AttestationType,
    /// The initial signature counter.
    pub counter: u32,
    /// The authenticator AAGUID in UUID form.
    pub aaguid: String,
    /// base64url of the JSON [`RegistrationFlags`].
    pub registration_flags: String,
    /// Where the registration took place.
    pub create_location: String,
    /// The protocol version this credential was registered with.
    pub fido_protocol: String,
    /// Initial status.
    pub status: CredentialStatus,
}

/// What authentication reads back from the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// The credential id, base64url.
    pub credential_id: String,
    /// The owning username.
    pub username: String,
    /// The credential public key as DER SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
    /// The last accepted signature counter.
    pub counter: u32,
    /// Whether this credential may authenticate.
    pub status: CredentialStatus,
}

/// The output of a successful authentication ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationOutcome {
    /// The credential that authenticated, base64url.
    pub credential_id: String,
    /// The counter now persisted for this credential.
    pub counter: u32,
    /// Whether the authenticator asserted user presence.
    pub user_present: bool,
    /// Whether the authenticator asserted user verification.
    pub user_verified: bool,
}

//! Types that are shared between registration and authentication ceremonies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The data collected and hashed in the operation.
/// <https://www.w3.org/TR/webauthn-2/#dictdef-collectedclientdata>
///
/// Legacy U2F clients send the ceremony type as `typ`, which is accepted as an alias.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectedClientData {
    /// The credential type
    #[serde(rename = "type", alias = "typ")]
    pub type_: String,
    /// The challenge, exactly as the client encoded it.
    pub challenge: String,
    /// The rp origin as the browser understood it.
    pub origin: String,
    /// The inverse of the sameOriginWithAncestors argument value that was
    /// passed into the internal method.
    #[serde(rename = "crossOrigin", skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
    /// tokenBinding.
    #[serde(rename = "tokenBinding", skip_serializing_if = "Option::is_none")]
    pub token_binding: Option<TokenBinding>,
    /// This struct be extended, so it's important to be tolerant of unknown
    /// keys.
    #[serde(flatten)]
    pub unknown_keys: BTreeMap<String, serde_json::value::Value>,
}

/// Token binding
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenBinding {
    /// status
    pub status: TokenBindingStatus,
    /// id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The token binding states a client may report. Anything else is rejected while
/// parsing.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TokenBindingStatus {
    /// Token binding was used when communicating with the relying party.
    Present,
    /// The client supports token binding but it was not negotiated.
    Supported,
    /// The client does not support token binding.
    NotSupported,
}

/// <https://www.w3.org/TR/webauthn/#enumdef-authenticatortransport>
#[derive(Debug, Serialize, Clone, Copy, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorTransport {
    /// <https://www.w3.org/TR/webauthn/#dom-authenticatortransport-usb>
    Usb,
    /// <https://www.w3.org/TR/webauthn/#dom-authenticatortransport-nfc>
    Nfc,
    /// <https://www.w3.org/TR/webauthn/#dom-authenticatortransport-ble>
    Ble,
    /// <https://www.w3.org/TR/webauthn/#dom-authenticatortransport-internal>
    Internal,
    /// Cross device transport, formerly caBLE.
    Hybrid,
}

impl AuthenticatorTransport {
    /// The upper case token used when a transport is recorded in a transport hint.
    pub fn hint_token(self) -> &'static str {
        match self {
            AuthenticatorTransport::Usb => "USB",
            AuthenticatorTransport::Nfc => "NFC",
            AuthenticatorTransport::Ble => "BLE",
            AuthenticatorTransport::Internal => "INTERNAL",
            AuthenticatorTransport::Hybrid => "HYBRID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_data_accepts_u2f_typ() {
        let cd: CollectedClientData = serde_json::from_str(
            r#"{"typ":"navigator.id.getAssertion","challenge":"abc","origin":"https://example.com","cid_pubkey":"unused"}"#,
        )
        .expect("failed to parse client data");
        assert_eq!(cd.type_, "navigator.id.getAssertion");
        assert!(cd.unknown_keys.contains_key("cid_pubkey"));
        assert!(cd.token_binding.is_none());
    }

    #[test]
    fn token_binding_status_is_closed() {
        let cd: CollectedClientData = serde_json::from_str(
            r#"{"type":"webauthn.create","challenge":"abc","origin":"https://example.com","tokenBinding":{"status":"not-supported"}}"#,
        )
        .expect("failed to parse client data");
        assert_eq!(
            cd.token_binding.map(|tb| tb.status),
            Some(TokenBindingStatus::NotSupported)
        );

        let bad: Result<CollectedClientData, _> = serde_json::from_str(
            r#"{"type":"webauthn.create","challenge":"abc","origin":"https://example.com","tokenBinding":{"status":"maybe"}}"#,
        );
        assert!(bad.is_err());
    }
}

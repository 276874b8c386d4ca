//! Possible errors that may occur during verification operations

use serde::{Deserialize, Serialize};

use crate::safetynet::SafetyNetError;

/// A wrapper type for results from this crate.
pub type FidoResult<T> = core::result::Result<T, FidoError>;

/// The machine readable class of a failure. Every ceremony failure maps onto exactly one
/// kind. All kinds are terminal: the ceremony is aborted and nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A required field is missing or invalid, base64url is not canonical, or JSON did
    /// not parse.
    MalformedInput,
    /// Authenticator data or an attestation object is structurally invalid or truncated.
    DecodeError,
    /// The challenge digest is unknown: expired, already consumed, or forged.
    ChallengeNotFound,
    /// The client reported origin disagrees with the relying party origin.
    OriginMismatch,
    /// The ceremony username disagrees with the session username.
    UsernameMismatch,
    /// A cryptographic proof did not verify.
    SignatureInvalid,
    /// A certificate chain was present but did not reach an accepted anchor.
    UntrustedChain,
    /// The relying party policy rejected this ceremony.
    PolicyDenied,
    /// The signature counter did not advance. This may indicate a cloned authenticator.
    CounterRegression,
    /// A collaborator or the crypto provider failed.
    Internal,
}

/// Possible errors that may occur during verification operations.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum FidoError {
    #[error("The JSON from the client did not parse")]
    ParseJSONFailure(#[from] serde_json::Error),

    #[error("The base64 value could not be decoded")]
    ParseBase64Failure(#[from] base64::DecodeError),

    #[error("The field {0} is not canonical base64url")]
    ParseBase64NotCanonical(&'static str),

    #[error("The required field {0} is missing or empty")]
    MissingField(&'static str),

    #[error("The credential id and raw id do not match")]
    CredentialIdMismatch,

    #[error("The credential type is not public-key")]
    InvalidCredentialType,

    #[error("The clientData type does not match the ceremony")]
    InvalidClientDataType,

    #[error("The origin could not be parsed as a URL")]
    InvalidOriginUrl,

    #[error("The signature data is too short")]
    SignatureDataInvalid,

    #[error("The CBOR structure could not be decoded")]
    ParseCBORFailure(#[from] serde_cbor_2::Error),

    #[error("The binary structure was truncated or invalid")]
    ParseNOMFailure,

    #[error("The authenticator data is shorter than its fixed header")]
    ParseInsufficentBytesAvailable,

    #[error("The authenticator data has bytes that no flag accounts for")]
    AuthenticatorDataTrailingBytes,

    #[error("The attested credential data is missing from a registration")]
    MissingAttestationCredentialData,

    #[error("The attestation object member {0} is missing or the wrong type")]
    AttestationObjectInvalid(&'static str),

    #[error("The CBOR value is not the expected type")]
    COSEKeyInvalidCBORValue,

    #[error("The COSE key type is not supported")]
    COSEKeyInvalidType,

    #[error("The COSE key is not a valid public key")]
    COSEKeyInvalid,

    #[error("The COSE algorithm is not supported")]
    COSEKeyInvalidAlgorithm,

    #[error("The ECDSA curve is not supported")]
    COSEKeyECDSAInvalidCurve,

    #[error("The ECDSA X or Y coordinate is the wrong length")]
    COSEKeyECDSAXYInvalid,

    #[error("The RSA modulus or exponent is invalid")]
    COSEKeyRSANEInvalid,

    #[error("The EDDSA curve is not supported")]
    COSEKeyEDDSAInvalidCurve,

    #[error("The EDDSA X coordinate is the wrong length")]
    COSEKeyEDDSAXInvalid,

    #[error("The attestation format is not supported")]
    AttestationNotSupported,

    #[error("The attestation statement is not a map")]
    AttestationStatementMapInvalid,

    #[error("The attestation statement sig is missing")]
    AttestationStatementSigMissing,

    #[error("The attestation statement alg is missing")]
    AttestationStatementAlgMissing,

    #[error("The attestation statement alg is invalid")]
    AttestationStatementAlgInvalid,

    #[error("The attestation statement x5c is missing")]
    AttestationStatementX5CMissing,

    #[error("The attestation statement x5c is invalid")]
    AttestationStatementX5CInvalid,

    #[error("The attestation statement ver is missing")]
    AttestationStatementVerMissing,

    #[error("The attestation statement ver is invalid")]
    AttestationStatementVerInvalid,

    #[error("The attestation statement ver is not supported")]
    AttestationStatementVerUnsupported,

    #[error("The attestation statement certInfo is missing")]
    AttestationStatementCertInfoMissing,

    #[error("The attestation statement pubArea is missing")]
    AttestationStatementPubAreaMissing,

    #[error("The attestation statement response is missing")]
    AttestationStatementResponseMissing,

    #[error("The ECDAA attestation type is not supported")]
    AttestationEcdaaNotSupported,

    #[error("The attestation signature is invalid")]
    AttestationStatementSigInvalid,

    #[error("The attestation alg does not match the credential key")]
    AttestationStatementAlgMismatch,

    #[error("The attestation certificate does not meet the format requirements")]
    AttestationCertificateRequirementsNotMet,

    #[error("The attestation certificate AAGUID does not match the authenticator data")]
    AttestationCertificateAAGUIDMismatch,

    #[error("The attestation certificate challenge does not match the client data hash")]
    AttestationCertificateNonceMismatch,

    #[error("The attestation certificate is missing a required extension")]
    AttestationStatementMissingExtension,

    #[error("The attestation certificate key does not match the credential key")]
    AttestationCredentialSubjectKeyMismatch,

    #[error("The TPM certInfo type is not attest certify")]
    AttestationTpmStInvalid,

    #[error("The TPM certInfo extraData does not match")]
    AttestationTpmExtraDataMismatch,

    #[error("The TPM pubArea does not match the credential key")]
    AttestationTpmPubAreaMismatch,

    #[error("The TPM attested name does not match the pubArea")]
    AttestationTpmPubAreaHashInvalid,

    #[error("The TPM name algorithm is not supported")]
    AttestationTpmPubAreaHashUnknown,

    #[error("The TPM structure is invalid")]
    AttestationTpmStructureInvalid,

    #[error("The android-safetynet attestation failed: {0}")]
    SafetyNet(#[from] SafetyNetError),

    #[error("Insecure cryptography was used outside of a permitted attestation")]
    CredentialInsecureCryptography,

    #[error("The assertion signature is invalid")]
    AuthenticationSignatureInvalid,

    #[error("The attestation chain did not validate to a trust anchor")]
    AttestationTrustFailure,

    #[error("The challenge was not found")]
    ChallengeNotFound,

    #[error("The client data origin does not match the relying party origin")]
    InvalidRPOrigin,

    #[error("The authenticator data rpIdHash does not match the relying party id")]
    InvalidRPIDHash,

    #[error("The username does not match the ceremony")]
    UsernameMismatch,

    #[error("The user was not present")]
    UserNotPresent,

    #[error("The registration policy denied this ceremony: {0}")]
    PolicyDenied(String),

    #[error("The authenticator AAGUID is not trusted by the matching anchor")]
    AttestationAaguidNotTrusted,

    #[error("The credential is not known")]
    CredentialNotFound,

    #[error("The credential is not active")]
    CredentialInactive,

    #[error("The signature counter did not advance (stored {stored}, received {received})")]
    CounterRegression { stored: u32, received: u32 },

    #[error("An OpenSSL Error occurred")]
    OpenSSLError(#[from] openssl::error::ErrorStack),

    #[error("A collaborator failed: {0}")]
    Collaborator(String),
}

impl FidoError {
    /// The machine readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        use FidoError::*;
        match self {
            ParseJSONFailure(_)
            | ParseBase64Failure(_)
            | ParseBase64NotCanonical(_)
            | MissingField(_)
            | CredentialIdMismatch
            | InvalidCredentialType
            | InvalidClientDataType
            | InvalidOriginUrl
            | SignatureDataInvalid => ErrorKind::MalformedInput,

            ParseCBORFailure(_)
            | ParseNOMFailure
            | ParseInsufficentBytesAvailable
            | AuthenticatorDataTrailingBytes
            | MissingAttestationCredentialData
            | AttestationObjectInvalid(_)
            | COSEKeyInvalidCBORValue
            | COSEKeyInvalidType
            | COSEKeyInvalid
            | COSEKeyInvalidAlgorithm
            | COSEKeyECDSAInvalidCurve
            | COSEKeyECDSAXYInvalid
            | COSEKeyRSANEInvalid
            | COSEKeyEDDSAInvalidCurve
            | COSEKeyEDDSAXInvalid
            | AttestationNotSupported
            | AttestationStatementMapInvalid
            | AttestationStatementSigMissing
            | AttestationStatementAlgMissing
            | AttestationStatementAlgInvalid
            | AttestationStatementX5CMissing
            | AttestationStatementX5CInvalid
            | AttestationStatementVerMissing
            | AttestationStatementVerInvalid
            | AttestationStatementCertInfoMissing
            | AttestationStatementPubAreaMissing
            | AttestationStatementResponseMissing
            | AttestationTpmStructureInvalid => ErrorKind::DecodeError,

            ChallengeNotFound => ErrorKind::ChallengeNotFound,

            InvalidRPOrigin | InvalidRPIDHash => ErrorKind::OriginMismatch,

            UsernameMismatch => ErrorKind::UsernameMismatch,

            AttestationStatementVerUnsupported
            | AttestationEcdaaNotSupported
            | AttestationStatementSigInvalid
            | AttestationStatementAlgMismatch
            | AttestationCertificateRequirementsNotMet
            | AttestationCertificateAAGUIDMismatch
            | AttestationCertificateNonceMismatch
            | AttestationStatementMissingExtension
            | AttestationCredentialSubjectKeyMismatch
            | AttestationTpmStInvalid
            | AttestationTpmExtraDataMismatch
            | AttestationTpmPubAreaMismatch
            | AttestationTpmPubAreaHashInvalid
            | AttestationTpmPubAreaHashUnknown
            | CredentialInsecureCryptography
            | AuthenticationSignatureInvalid => ErrorKind::SignatureInvalid,

            SafetyNet(sn) => sn.kind(),

            AttestationTrustFailure => ErrorKind::UntrustedChain,

            UserNotPresent
            | PolicyDenied(_)
            | AttestationAaguidNotTrusted
            | CredentialNotFound
            | CredentialInactive => ErrorKind::PolicyDenied,

            CounterRegression { .. } => ErrorKind::CounterRegression,

            OpenSSLError(_) | Collaborator(_) => ErrorKind::Internal,
        }
    }
}

//! Attestation statement formats and their verification procedures.
//!
//! A statement is parsed once from its `(fmt, attStmt)` pair into an
//! [`AttestationStatement`], and then verified against the authenticator data it was
//! delivered with. Chain trust is decided separately by the ceremony, using
//! [`AttestationStatement::certificate_chain`].

use std::collections::BTreeMap;

use openssl::{nid, x509};
use serde_cbor_2::Value;
use x509_parser::oid_registry::Oid;

use crate::config::CoreConfig;
use crate::crypto::{
    assert_packed_attest_req, verify_signature, COSEKey, COSEKeyType, ECDSACurve,
};
use crate::error::{FidoError, FidoResult};
use crate::interface::*;
use crate::proto::COSEAlgorithm;
use crate::safetynet::SafetyNetStatement;
use crate::time::Clock;
use crate::tpm::TpmStatement;
use crate::trust::TrustChainValidator;

/// x509 certificate extensions are validated by checking that the value of the extension
/// is equal to some other value.
pub trait AttestationX509Extension {
    /// the type of the value in the certificate extension
    type Output: Eq;

    /// the oid of the extension
    const OID: Oid<'static>;

    /// how to parse the value out of the certificate extension
    fn parse(i: &[u8]) -> der_parser::error::BerResult<Self::Output>;

    /// if `true`, then validating this certificate fails if this extension is missing
    const IS_REQUIRED: bool;

    /// what error to return if the extension value is not equal to the expected value
    const VALIDATION_ERROR: FidoError;
}

/// The FIDO AAGUID x509 extension, id-fido-gen-ce-aaguid.
pub struct FidoGenCeAaguid;

pub(crate) struct AndroidKeyAttestationExtensionData;

impl AttestationX509Extension for FidoGenCeAaguid {
    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .45724 .1 .1 .4);

    type Output = Aaguid;

    fn parse(i: &[u8]) -> der_parser::error::BerResult<Self::Output> {
        let (rem, aaguid) = der_parser::der::parse_der_octetstring(i)?;
        let aaguid: Aaguid = aaguid
            .as_slice()
            .map_err(nom::Err::Error)?
            .try_into()
            .map_err(|_| nom::Err::Error(der_parser::error::BerError::InvalidLength))?;

        Ok((rem, aaguid))
    }

    const IS_REQUIRED: bool = false;

    const VALIDATION_ERROR: FidoError = FidoError::AttestationCertificateAAGUIDMismatch;
}

pub(crate) mod android_key_attestation {
    use der_parser::ber::BerObjectContent;
    use der_parser::{der::*, error::BerError};

    pub const KM_ORIGIN_GENERATED: u32 = 0;
    pub const KM_PURPOSE_SIGN: u32 = 2;

    /// The parts of a keymaster AuthorizationList that bind a key to an application.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthorizationList {
        pub all_applications: bool,
        pub origin: Option<u32>,
        pub purpose: Option<u32>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SecurityLevel {
        Software,
        TrustedEnvironment,
        StrongBox,
    }

    impl SecurityLevel {
        fn from_der(level: u32) -> Result<Self, nom::Err<BerError>> {
            match level {
                0 => Ok(SecurityLevel::Software),
                1 => Ok(SecurityLevel::TrustedEnvironment),
                2 => Ok(SecurityLevel::StrongBox),
                _ => Err(nom::Err::Error(BerError::InvalidTag)),
            }
        }
    }

    fn invalid(tag: u32, msg: &str) -> nom::Err<BerError> {
        nom::Err::Error(BerError::InvalidValue {
            tag: Tag(tag),
            msg: msg.to_string(),
        })
    }

    impl AuthorizationList {
        pub fn parse(i: &[u8]) -> der_parser::error::BerResult<Self> {
            parse_der_container(|i: &[u8], hdr: Header| {
                if hdr.tag() != Tag::Sequence {
                    return Err(nom::Err::Error(BerError::BerTypeError));
                }

                let mut list = AuthorizationList {
                    all_applications: false,
                    origin: None,
                    purpose: None,
                };

                let mut i = i;
                while let Ok((k, obj)) = parse_der(i) {
                    i = k;
                    if obj.content == BerObjectContent::Optional(None) {
                        continue;
                    }

                    match obj.tag() {
                        Tag(600) => {
                            list.all_applications = true;
                        }
                        Tag(702) => {
                            if let BerObjectContent::Unknown(o) = obj.content {
                                let (_, val) = parse_der_integer(o.data)?;
                                list.origin = Some(val.as_u32().map_err(nom::Err::Error)?);
                            }
                        }
                        Tag(1) => {
                            if let BerObjectContent::Unknown(o) = obj.content {
                                let (_, val) =
                                    parse_der_container(|i, _| parse_der_integer(i))(o.data)?;
                                list.purpose = Some(val.as_u32().map_err(nom::Err::Error)?);
                            }
                        }
                        _ => continue,
                    };
                }

                Ok((i, list))
            })(i)
        }

        /// Whether this list marks a generated signing key. A list that says nothing
        /// about either is `Ok(false)`; a list that says something else is an error.
        fn generated_for_signing(&self, which: &str) -> Result<bool, nom::Err<BerError>> {
            match (self.origin, self.purpose) {
                (Some(KM_ORIGIN_GENERATED), Some(KM_PURPOSE_SIGN)) => Ok(true),
                (None, None) => Ok(false),
                _ => {
                    debug!(
                        list = which,
                        origin = ?self.origin,
                        purpose = ?self.purpose,
                        "unexpected keymaster values"
                    );
                    Err(invalid(702, "key is not a generated signing key"))
                }
            }
        }
    }

    /// Parse a KeyDescription, returning its attestation challenge once the key has been
    /// shown to be a generated signing key bound to one application.
    pub fn parse_key_description(i: &[u8]) -> der_parser::error::BerResult<Vec<u8>> {
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }
            let (i, _attestation_version) = parse_der_integer(i)?;
            let (i, attest_level) = parse_der_enum(i)?;
            let attest_level =
                SecurityLevel::from_der(attest_level.as_u32().map_err(nom::Err::Error)?)?;
            let (i, _keymaster_version) = parse_der_integer(i)?;
            let (i, km_level) = parse_der_enum(i)?;
            let km_level =
                SecurityLevel::from_der(km_level.as_u32().map_err(nom::Err::Error)?)?;

            let (i, challenge) = parse_der_octetstring(i)?;
            let challenge = challenge.as_slice().map_err(nom::Err::Error)?.to_vec();

            let (i, _unique_id) = parse_der_octetstring(i)?;

            let (i, software_enforced) = AuthorizationList::parse(i)?;
            let (i, tee_enforced) = AuthorizationList::parse(i)?;

            // The key must be scoped to the relying party.
            if software_enforced.all_applications || tee_enforced.all_applications {
                return Err(invalid(600, "all_applications must not be set"));
            }

            let software_set = software_enforced.generated_for_signing("software")?;
            let tee_set = tee_enforced.generated_for_signing("tee")?;

            if !software_set && !tee_set {
                return Err(invalid(702, "neither list describes the key"));
            }

            trace!(?attest_level, ?km_level, "android key description");

            Ok((i, challenge))
        })(i)
    }
}

impl AttestationX509Extension for AndroidKeyAttestationExtensionData {
    const OID: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .11129 .2 .1 .17);

    // The attestation challenge, which must equal the client data hash.
    type Output = Vec<u8>;

    fn parse(i: &[u8]) -> der_parser::error::BerResult<Self::Output> {
        android_key_attestation::parse_key_description(i)
    }

    const IS_REQUIRED: bool = true;

    const VALIDATION_ERROR: FidoError = FidoError::AttestationCertificateNonceMismatch;
}

/// Validate an x509 extension is present in an x509 certificate
pub fn validate_extension<T>(
    x509: &x509::X509,
    data: &<T as AttestationX509Extension>::Output,
) -> FidoResult<()>
where
    T: AttestationX509Extension,
{
    let der_bytes = x509.to_der()?;
    x509_parser::parse_x509_certificate(&der_bytes)
        .map_err(|_| FidoError::AttestationStatementX5CInvalid)?
        .1
        .extensions()
        .iter()
        .find_map(|extension| {
            (extension.oid == T::OID).then(|| {
                T::parse(extension.value)
                    .map_err(|e| {
                        debug!(?e, "certificate extension did not parse");
                        FidoError::AttestationStatementX5CInvalid
                    })
                    .and_then(|(_, output)| {
                        if &output == data {
                            Ok(())
                        } else {
                            Err(T::VALIDATION_ERROR)
                        }
                    })
            })
        })
        .unwrap_or({
            if T::IS_REQUIRED {
                Err(FidoError::AttestationStatementMissingExtension)
            } else {
                Ok(())
            }
        })
}

/// The attestation statement format named by `fmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Hash)]
pub enum AttestationFormat {
    /// Packed attestation
    Packed,
    /// TPM attestation (like Microsoft)
    Tpm,
    /// Android hardware attestation
    AndroidKey,
    /// Older Android Safety Net
    AndroidSafetyNet,
    /// Old U2F attestation type
    FIDOU2F,
    /// No attestation
    None,
}

impl TryFrom<&str> for AttestationFormat {
    type Error = FidoError;

    fn try_from(a: &str) -> Result<AttestationFormat, Self::Error> {
        match a {
            "packed" => Ok(AttestationFormat::Packed),
            "tpm" => Ok(AttestationFormat::Tpm),
            "android-key" => Ok(AttestationFormat::AndroidKey),
            "android-safetynet" => Ok(AttestationFormat::AndroidSafetyNet),
            "fido-u2f" => Ok(AttestationFormat::FIDOU2F),
            "none" => Ok(AttestationFormat::None),
            _ => {
                debug!(fmt = %a, "unsupported attestation format");
                Err(FidoError::AttestationNotSupported)
            }
        }
    }
}

/// What a statement needs from its surroundings to verify.
#[derive(Clone, Copy)]
pub struct VerificationContext<'a> {
    /// The active configuration.
    pub config: &'a CoreConfig,
    /// The time source for freshness rules.
    pub clock: &'a dyn Clock,
    /// The validator for chains the statement anchors itself.
    pub validator: &'a TrustChainValidator,
}

/// The result of a statement that verified.
#[derive(Debug, Clone)]
pub struct VerifiedAttestation {
    /// How the statement was classified.
    pub attestation_type: AttestationType,
    /// The attestation chain, leaf first. Empty for none and self attestation.
    pub chain: Vec<x509::X509>,
    /// The decoded credential public key.
    pub credential_key: COSEKey,
}

/// A parsed attestation statement, one variant per supported format.
#[derive(Debug, Clone)]
pub enum AttestationStatement {
    /// No attestation.
    None,
    /// A U2F attestation: one certificate and a signature over the U2F registration data.
    FidoU2f {
        /// The signature.
        sig: Vec<u8>,
        /// The attestation certificate.
        x5c: Vec<x509::X509>,
    },
    /// A packed attestation, either with a certificate chain or self signed.
    Packed {
        /// The signing algorithm.
        alg: COSEAlgorithm,
        /// The signature.
        sig: Vec<u8>,
        /// The chain, empty for self attestation.
        x5c: Vec<x509::X509>,
    },
    /// A TPM attestation.
    Tpm(Box<TpmStatement>),
    /// An Android keystore attestation.
    AndroidKey {
        /// The signing algorithm.
        alg: COSEAlgorithm,
        /// The signature.
        sig: Vec<u8>,
        /// The chain.
        x5c: Vec<x509::X509>,
    },
    /// An Android SafetyNet attestation.
    AndroidSafetyNet(Box<SafetyNetStatement>),
}

pub(crate) type StatementMap = BTreeMap<Value, Value>;

pub(crate) fn stmt_field<'a>(map: &'a StatementMap, key: &str) -> Option<&'a Value> {
    map.get(&Value::Text(key.to_string()))
}

pub(crate) fn stmt_alg(map: &StatementMap) -> FidoResult<COSEAlgorithm> {
    let alg_value = stmt_field(map, "alg").ok_or(FidoError::AttestationStatementAlgMissing)?;

    cbor_try!(alg_value, Integer)
        .map_err(|_| FidoError::AttestationStatementAlgInvalid)
        .and_then(|v| COSEAlgorithm::try_from(v).map_err(|_| FidoError::COSEKeyInvalidAlgorithm))
}

pub(crate) fn stmt_bytes(
    map: &StatementMap,
    key: &str,
    missing: FidoError,
) -> FidoResult<Vec<u8>> {
    match stmt_field(map, key) {
        Some(Value::Bytes(b)) => Ok(b.clone()),
        _ => Err(missing),
    }
}

/// Parse an `x5c` array into certificates, leaf first. The array may not be empty.
pub(crate) fn stmt_x5c(value: &Value) -> FidoResult<Vec<x509::X509>> {
    let x5c_array_ref =
        cbor_try!(value, Array).map_err(|_| FidoError::AttestationStatementX5CInvalid)?;

    let arr_x509 = x5c_array_ref
        .iter()
        .map(|values| {
            cbor_try!(values, Bytes)
                .map_err(|_| FidoError::AttestationStatementX5CInvalid)
                .and_then(|b| {
                    x509::X509::from_der(b).map_err(|e| {
                        debug!(?e, "x5c certificate did not parse");
                        FidoError::AttestationStatementX5CInvalid
                    })
                })
        })
        .collect::<FidoResult<Vec<_>>>()?;

    if arr_x509.is_empty() {
        return Err(FidoError::AttestationStatementX5CInvalid);
    }
    Ok(arr_x509)
}

fn required_x5c(map: &StatementMap) -> FidoResult<Vec<x509::X509>> {
    stmt_field(map, "x5c")
        .ok_or(FidoError::AttestationStatementX5CMissing)
        .and_then(stmt_x5c)
}

fn signed_data(auth_data_bytes: &[u8], client_data_hash: &[u8]) -> Vec<u8> {
    auth_data_bytes
        .iter()
        .chain(client_data_hash.iter())
        .copied()
        .collect()
}

impl AttestationStatement {
    /// Parse the statement for the format `fmt`.
    pub fn parse(fmt: &str, att_stmt: &Value) -> FidoResult<Self> {
        let format = AttestationFormat::try_from(fmt)?;
        let map = cbor_try!(att_stmt, Map).map_err(|_| FidoError::AttestationStatementMapInvalid)?;

        let stmt = match format {
            AttestationFormat::None => AttestationStatement::None,
            AttestationFormat::FIDOU2F => {
                let sig = stmt_bytes(map, "sig", FidoError::AttestationStatementSigMissing)?;
                let x5c = required_x5c(map)?;
                // Check that x5c has exactly one element.
                if x5c.len() != 1 {
                    debug!(len = x5c.len(), "fido-u2f x5c must hold exactly one certificate");
                    return Err(FidoError::AttestationStatementX5CInvalid);
                }
                AttestationStatement::FidoU2f { sig, x5c }
            }
            AttestationFormat::Packed => {
                let alg = stmt_alg(map)?;
                let sig = stmt_bytes(map, "sig", FidoError::AttestationStatementSigMissing)?;
                if stmt_field(map, "ecdaaKeyId").is_some() {
                    debug!("ecdaa attestation is not supported");
                    return Err(FidoError::AttestationEcdaaNotSupported);
                }
                let x5c = match stmt_field(map, "x5c") {
                    Some(v) => stmt_x5c(v)?,
                    None => Vec::new(),
                };
                AttestationStatement::Packed { alg, sig, x5c }
            }
            AttestationFormat::Tpm => {
                AttestationStatement::Tpm(Box::new(TpmStatement::try_from(map)?))
            }
            AttestationFormat::AndroidKey => {
                let alg = stmt_alg(map)?;
                let sig = stmt_bytes(map, "sig", FidoError::AttestationStatementSigMissing)?;
                let x5c = required_x5c(map)?;
                AttestationStatement::AndroidKey { alg, sig, x5c }
            }
            AttestationFormat::AndroidSafetyNet => {
                AttestationStatement::AndroidSafetyNet(Box::new(SafetyNetStatement::try_from(map)?))
            }
        };

        trace!(format = ?stmt.format(), "parsed attestation statement");
        Ok(stmt)
    }

    /// The format of this statement.
    pub fn format(&self) -> AttestationFormat {
        match self {
            AttestationStatement::None => AttestationFormat::None,
            AttestationStatement::FidoU2f { .. } => AttestationFormat::FIDOU2F,
            AttestationStatement::Packed { .. } => AttestationFormat::Packed,
            AttestationStatement::Tpm(_) => AttestationFormat::Tpm,
            AttestationStatement::AndroidKey { .. } => AttestationFormat::AndroidKey,
            AttestationStatement::AndroidSafetyNet(_) => AttestationFormat::AndroidSafetyNet,
        }
    }

    /// The attestation chain, leaf first. Empty for none and self attestation.
    pub fn certificate_chain(&self) -> Vec<x509::X509> {
        match self {
            AttestationStatement::None => Vec::new(),
            AttestationStatement::FidoU2f { x5c, .. }
            | AttestationStatement::Packed { x5c, .. }
            | AttestationStatement::AndroidKey { x5c, .. } => x5c.clone(),
            AttestationStatement::Tpm(tpm) => tpm.x5c.clone(),
            AttestationStatement::AndroidSafetyNet(sn) => sn.x5c.clone(),
        }
    }

    /// How this statement classifies the attestation.
    pub fn attestation_type(&self) -> AttestationType {
        match self {
            AttestationStatement::None => AttestationType::None,
            AttestationStatement::Packed { x5c, .. } if x5c.is_empty() => AttestationType::Self_,
            AttestationStatement::Tpm(_) => AttestationType::AttCa,
            AttestationStatement::FidoU2f { .. }
            | AttestationStatement::Packed { .. }
            | AttestationStatement::AndroidKey { .. }
            | AttestationStatement::AndroidSafetyNet(_) => AttestationType::Basic,
        }
    }

    /// Verify this statement over the authenticator data it arrived with.
    pub fn verify(
        &self,
        auth_data: &AuthenticatorData,
        auth_data_bytes: &[u8],
        client_data_hash: &[u8],
        ctx: &VerificationContext<'_>,
    ) -> FidoResult<VerifiedAttestation> {
        let acd = auth_data
            .acd
            .as_ref()
            .ok_or(FidoError::MissingAttestationCredentialData)?;
        let credential_key = COSEKey::try_from(&acd.credential_pk)?;

        match self {
            AttestationStatement::None => {
                trace!("none attestation");
            }
            AttestationStatement::FidoU2f { sig, x5c } => verify_fido_u2f(
                auth_data,
                acd,
                &credential_key,
                client_data_hash,
                sig,
                x5c,
            )?,
            AttestationStatement::Packed { alg, sig, x5c } => verify_packed(
                acd,
                &credential_key,
                auth_data_bytes,
                client_data_hash,
                *alg,
                sig,
                x5c,
            )?,
            AttestationStatement::Tpm(tpm) => {
                tpm.verify(acd, &credential_key, auth_data_bytes, client_data_hash)?
            }
            AttestationStatement::AndroidKey { alg, sig, x5c } => verify_android_key(
                &credential_key,
                auth_data_bytes,
                client_data_hash,
                *alg,
                sig,
                x5c,
            )?,
            AttestationStatement::AndroidSafetyNet(sn) => {
                sn.verify(auth_data_bytes, client_data_hash, ctx)?;
            }
        }

        Ok(VerifiedAttestation {
            attestation_type: self.attestation_type(),
            chain: self.certificate_chain(),
            credential_key,
        })
    }
}

// https://w3c.github.io/webauthn/#sctn-fido-u2f-attestation
fn verify_fido_u2f(
    auth_data: &AuthenticatorData,
    acd: &AttestedCredentialData,
    credential_key: &COSEKey,
    client_data_hash: &[u8],
    sig: &[u8],
    x5c: &[x509::X509],
) -> FidoResult<()> {
    let att_cert = x5c.first().ok_or(FidoError::AttestationStatementX5CInvalid)?;

    // The certificate public key must be an EC public key over the P-256 curve.
    let is_p256 = att_cert
        .public_key()?
        .ec_key()
        .ok()
        .and_then(|ec| ec.group().curve_name())
        == Some(nid::Nid::X9_62_PRIME256V1);
    if !is_p256 {
        debug!("fido-u2f attestation key is not P-256");
        return Err(FidoError::AttestationCertificateRequirementsNotMet);
    }

    // The credential key as a raw ANSI X9.62 point.
    let public_key_u2f = match &credential_key.key {
        COSEKeyType::EC_EC2(ec2) if ec2.curve == ECDSACurve::SECP256R1 => {
            credential_key.get_alg_key_ecc_x962_raw()?
        }
        _ => {
            debug!("fido-u2f credential key is not P-256");
            return Err(FidoError::COSEKeyInvalidType);
        }
    };

    // 0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F
    let verification_data: Vec<u8> = std::iter::once(0x00)
        .chain(auth_data.rp_id_hash.iter().copied())
        .chain(client_data_hash.iter().copied())
        .chain(acd.credential_id.iter().copied())
        .chain(public_key_u2f.iter().copied())
        .collect();

    if !verify_signature(COSEAlgorithm::ES256, att_cert, sig, &verification_data)? {
        error!("fido-u2f signature verification failed");
        return Err(FidoError::AttestationStatementSigInvalid);
    }

    Ok(())
}

// https://w3c.github.io/webauthn/#sctn-packed-attestation
fn verify_packed(
    acd: &AttestedCredentialData,
    credential_key: &COSEKey,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8],
    alg: COSEAlgorithm,
    sig: &[u8],
    x5c: &[x509::X509],
) -> FidoResult<()> {
    let verification_data = signed_data(auth_data_bytes, client_data_hash);

    match x5c.first() {
        Some(attestn_cert) => {
            trace!(subject = ?attestn_cert.subject_name(), "packed with x5c");

            if !verify_signature(alg, attestn_cert, sig, &verification_data)? {
                debug!("packed x509 signature invalid");
                return Err(FidoError::AttestationStatementSigInvalid);
            }

            assert_packed_attest_req(attestn_cert)?;

            validate_extension::<FidoGenCeAaguid>(attestn_cert, &acd.aaguid)
        }
        None => {
            // Self attestation: alg must be the credential key's algorithm.
            if alg != credential_key.type_ {
                debug!(?alg, key_alg = ?credential_key.type_, "self attestation alg mismatch");
                return Err(FidoError::AttestationStatementAlgMismatch);
            }

            if !credential_key.verify_signature(sig, &verification_data)? {
                debug!("self attestation signature invalid");
                return Err(FidoError::AttestationStatementSigInvalid);
            }
            Ok(())
        }
    }
}

// https://w3c.github.io/webauthn/#sctn-android-key-attestation
fn verify_android_key(
    credential_key: &COSEKey,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8],
    alg: COSEAlgorithm,
    sig: &[u8],
    x5c: &[x509::X509],
) -> FidoResult<()> {
    let attestn_cert = x5c.first().ok_or(FidoError::AttestationStatementX5CInvalid)?;

    let verification_data = signed_data(auth_data_bytes, client_data_hash);

    if !verify_signature(alg, attestn_cert, sig, &verification_data)? {
        error!("android-key signature verification failed");
        return Err(FidoError::AttestationStatementSigInvalid);
    }

    // The leaf public key must be the credential key.
    let subject_public_key = COSEKey::try_from((credential_key.type_, attestn_cert))?;
    if *credential_key != subject_public_key {
        debug!("android-key leaf key is not the credential key");
        return Err(FidoError::AttestationCredentialSubjectKeyMismatch);
    }

    validate_extension::<AndroidKeyAttestationExtensionData>(
        attestn_cert,
        &client_data_hash.to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::crypto::compute_sha256;
    use crate::test_support::*;
    use crate::time::SystemClock;
    use openssl::x509::X509Extension;

    fn ctx_parts() -> (CoreConfig, SystemClock, TrustChainValidator) {
        (
            CoreConfig::default(),
            SystemClock,
            TrustChainValidator::default(),
        )
    }

    fn statement(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.to_string()), v))
                .collect(),
        )
    }

    fn x5c(certs: &[&x509::X509]) -> Value {
        Value::Array(
            certs
                .iter()
                .map(|c| Value::Bytes(c.to_der().unwrap()))
                .collect(),
        )
    }

    fn es256() -> Value {
        Value::Integer(i128::from(COSEAlgorithm::ES256))
    }

    fn run(
        fmt: &str,
        stmt: &Value,
        auth: &RegistrationData,
        cdh: &[u8],
    ) -> FidoResult<VerifiedAttestation> {
        let (config, clock, validator) = ctx_parts();
        let ctx = VerificationContext {
            config: &config,
            clock: &clock,
            validator: &validator,
        };
        AttestationStatement::parse(fmt, stmt)?.verify(&auth.auth_data, &auth.bytes, cdh, &ctx)
    }

    #[test]
    fn format_names() {
        assert_eq!(
            AttestationFormat::try_from("android-safetynet").unwrap(),
            AttestationFormat::AndroidSafetyNet
        );
        assert!(matches!(
            AttestationFormat::try_from("apple"),
            Err(FidoError::AttestationNotSupported)
        ));
        assert!(matches!(
            AttestationStatement::parse("none", &Value::Integer(1)),
            Err(FidoError::AttestationStatementMapInvalid)
        ));
    }

    #[test]
    fn none_always_verifies() {
        let key = ec_key();
        let auth = registration_data(&key, [0; 16]);
        let verified = run("none", &statement(vec![]), &auth, &[0; 32]).unwrap();
        assert_eq!(verified.attestation_type, AttestationType::None);
        assert!(verified.chain.is_empty());
    }

    #[test]
    fn packed_self_attestation() {
        let _ = tracing_subscriber::fmt::try_init();
        let key = ec_key();
        let auth = registration_data(&key, [0; 16]);
        let cdh = compute_sha256(b"client data");

        let sig = sign_es256(&key, &[auth.bytes.as_slice(), &cdh].concat());
        let stmt = statement(vec![("alg", es256()), ("sig", Value::Bytes(sig.clone()))]);
        let verified = run("packed", &stmt, &auth, &cdh).unwrap();
        assert_eq!(verified.attestation_type, AttestationType::Self_);

        // Signature over different client data.
        let other = compute_sha256(b"other client data");
        assert!(matches!(
            run("packed", &stmt, &auth, &other),
            Err(FidoError::AttestationStatementSigInvalid)
        ));

        // Algorithm that is not the credential's.
        let rs256 = statement(vec![
            ("alg", Value::Integer(i128::from(COSEAlgorithm::RS256))),
            ("sig", Value::Bytes(sig)),
        ]);
        assert!(matches!(
            run("packed", &rs256, &auth, &cdh),
            Err(FidoError::AttestationStatementAlgMismatch)
        ));
    }

    #[test]
    fn packed_with_certificate() {
        let aaguid = [0x42; 16];
        let root = make_ca("Packed Root", None);
        let attest_key = ec_key();
        let leaf = make_leaf(
            &attest_key,
            &attestation_subject("Packed Leaf"),
            &root,
            vec![aaguid_extension(aaguid)],
        );

        let cred_key = ec_key();
        let auth = registration_data(&cred_key, aaguid);
        let cdh = compute_sha256(b"client data");
        let sig = sign_es256(&attest_key, &[auth.bytes.as_slice(), &cdh].concat());

        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig.clone())),
            ("x5c", x5c(&[&leaf])),
        ]);
        let verified = run("packed", &stmt, &auth, &cdh).unwrap();
        assert_eq!(verified.attestation_type, AttestationType::Basic);
        assert_eq!(verified.chain.len(), 1);

        // The certificate vouches for a different authenticator model.
        let other_model = registration_data(&cred_key, [0x43; 16]);
        let sig = sign_es256(&attest_key, &[other_model.bytes.as_slice(), &cdh].concat());
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig)),
            ("x5c", x5c(&[&leaf])),
        ]);
        assert!(matches!(
            run("packed", &stmt, &other_model, &cdh),
            Err(FidoError::AttestationCertificateAAGUIDMismatch)
        ));

        // A leaf without the attestation OU.
        let plain = make_leaf(&attest_key, &cn_subject("Plain"), &root, vec![]);
        let sig = sign_es256(&attest_key, &[auth.bytes.as_slice(), &cdh].concat());
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig)),
            ("x5c", x5c(&[&plain])),
        ]);
        assert!(matches!(
            run("packed", &stmt, &auth, &cdh),
            Err(FidoError::AttestationCertificateRequirementsNotMet)
        ));
    }

    #[test]
    fn packed_ecdaa_is_refused() {
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(vec![0; 8])),
            ("ecdaaKeyId", Value::Bytes(vec![1; 8])),
        ]);
        assert!(matches!(
            AttestationStatement::parse("packed", &stmt),
            Err(FidoError::AttestationEcdaaNotSupported)
        ));

        let no_sig = statement(vec![("alg", es256())]);
        assert!(matches!(
            AttestationStatement::parse("packed", &no_sig),
            Err(FidoError::AttestationStatementSigMissing)
        ));
    }

    #[test]
    fn fido_u2f() {
        let root = make_ca("U2F Root", None);
        let attest_key = ec_key();
        let leaf = make_leaf(&attest_key, &cn_subject("U2F Leaf"), &root, vec![]);

        let cred_key = ec_key();
        let auth = registration_data(&cred_key, [0; 16]);
        let acd = auth.auth_data.acd.as_ref().unwrap();
        let cose = COSEKey::try_from(&acd.credential_pk).unwrap();
        let cdh = compute_sha256(b"u2f client data");

        let mut tbs = vec![0x00];
        tbs.extend_from_slice(&auth.auth_data.rp_id_hash);
        tbs.extend_from_slice(&cdh);
        tbs.extend_from_slice(&acd.credential_id);
        tbs.extend(cose.get_alg_key_ecc_x962_raw().unwrap());
        let sig = sign_es256(&attest_key, &tbs);

        let stmt = statement(vec![
            ("sig", Value::Bytes(sig.clone())),
            ("x5c", x5c(&[&leaf])),
        ]);
        let verified = run("fido-u2f", &stmt, &auth, &cdh).unwrap();
        assert_eq!(verified.attestation_type, AttestationType::Basic);

        // Exactly one certificate.
        let two = statement(vec![
            ("sig", Value::Bytes(sig)),
            ("x5c", x5c(&[&leaf, &root.cert])),
        ]);
        assert!(matches!(
            AttestationStatement::parse("fido-u2f", &two),
            Err(FidoError::AttestationStatementX5CInvalid)
        ));

        // Signed by a key that is not the certificate's.
        let stmt = statement(vec![
            ("sig", Value::Bytes(sign_es256(&cred_key, &tbs))),
            ("x5c", x5c(&[&leaf])),
        ]);
        assert!(matches!(
            run("fido-u2f", &stmt, &auth, &cdh),
            Err(FidoError::AttestationStatementSigInvalid)
        ));
    }

    fn android_leaf(
        key: &openssl::pkey::PKey<openssl::pkey::Private>,
        ext: Option<X509Extension>,
    ) -> x509::X509 {
        let root = make_ca("Android Root", None);
        make_leaf(
            key,
            &cn_subject("Android Keystore Key"),
            &root,
            ext.into_iter().collect(),
        )
    }

    #[test]
    fn android_key() {
        let cred_key = ec_key();
        let auth = registration_data(&cred_key, [0; 16]);
        let cdh = compute_sha256(b"android client data");
        let sig = sign_es256(&cred_key, &[auth.bytes.as_slice(), &cdh].concat());

        let leaf = android_leaf(&cred_key, Some(android_key_extension(&cdh, false)));
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig.clone())),
            ("x5c", x5c(&[&leaf])),
        ]);
        let verified = run("android-key", &stmt, &auth, &cdh).unwrap();
        assert_eq!(verified.attestation_type, AttestationType::Basic);

        // The challenge in the certificate is for another ceremony.
        let stale = android_leaf(
            &cred_key,
            Some(android_key_extension(&compute_sha256(b"old"), false)),
        );
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig.clone())),
            ("x5c", x5c(&[&stale])),
        ]);
        assert!(matches!(
            run("android-key", &stmt, &auth, &cdh),
            Err(FidoError::AttestationCertificateNonceMismatch)
        ));

        // No key description at all.
        let bare = android_leaf(&cred_key, None);
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig.clone())),
            ("x5c", x5c(&[&bare])),
        ]);
        assert!(matches!(
            run("android-key", &stmt, &auth, &cdh),
            Err(FidoError::AttestationStatementMissingExtension)
        ));

        // A key usable by every application.
        let unscoped = android_leaf(&cred_key, Some(android_key_extension(&cdh, true)));
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig)),
            ("x5c", x5c(&[&unscoped])),
        ]);
        assert!(matches!(
            run("android-key", &stmt, &auth, &cdh),
            Err(FidoError::AttestationStatementX5CInvalid)
        ));
    }

    #[test]
    fn android_key_leaf_must_be_credential_key() {
        let cred_key = ec_key();
        let other_key = ec_key();
        let auth = registration_data(&cred_key, [0; 16]);
        let cdh = compute_sha256(b"android client data");
        let sig = sign_es256(&other_key, &[auth.bytes.as_slice(), &cdh].concat());

        let leaf = android_leaf(&other_key, Some(android_key_extension(&cdh, false)));
        let stmt = statement(vec![
            ("alg", es256()),
            ("sig", Value::Bytes(sig)),
            ("x5c", x5c(&[&leaf])),
        ]);
        assert!(matches!(
            run("android-key", &stmt, &auth, &cdh),
            Err(FidoError::AttestationCredentialSubjectKeyMismatch)
        ));
    }

    #[test]
    fn key_description_parser() {
        let cdh = [7u8; 32];
        let der = android_key_description(&cdh, false);
        let (rem, challenge) = android_key_attestation::parse_key_description(&der).unwrap();
        assert!(rem.is_empty());
        assert_eq!(challenge, cdh.to_vec());

        let der = android_key_description(&cdh, true);
        assert!(android_key_attestation::parse_key_description(&der).is_err());
    }

    #[test]
    fn verify_requires_attested_credential() {
        let (config, clock, validator) = ctx_parts();
        let ctx = VerificationContext {
            config: &config,
            clock: &clock,
            validator: &validator,
        };
        let auth_data = AuthenticatorData {
            rp_id_hash: [0; 32],
            flags: FLAG_USER_PRESENT,
            counter: 0,
            acd: None,
            extensions: None,
        };
        assert!(matches!(
            AttestationStatement::None.verify(&auth_data, &[], &[0; 32], &ctx),
            Err(FidoError::MissingAttestationCredentialData)
        ));
    }
}

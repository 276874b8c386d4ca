//! Cryptographic operation wrapper for the verification core. This module exists to
//! allow ease of auditing, safe operation wrappers, and cryptographic provider
//! abstraction. This module currently uses OpenSSL as the cryptographic primitive
//! provider.

#![allow(non_camel_case_types)]

use openssl::{bn, ec, hash, nid, pkey, rsa, sha, sign, x509};
use serde::{Deserialize, Serialize};
use x509_parser::oid_registry::Oid;

use crate::error::*;
use crate::proto::*;

/// The extended key usage a TPM attestation identity key certificate must carry.
const TCG_KP_AIK_CERTIFICATE: Oid<'static> = der_parser::oid!(2.23.133 .8 .3);

/// The COSE `crv` values an EC2 credential key may name (RFC 8152 table 22).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ECDSACurve {
    /// NIST P-256, `X9_62_PRIME256V1` to OpenSSL.
    SECP256R1 = 1,
    /// NIST P-384.
    SECP384R1 = 2,
    /// NIST P-521.
    SECP521R1 = 3,
}

impl TryFrom<i128> for ECDSACurve {
    type Error = FidoError;
    fn try_from(u: i128) -> Result<Self, Self::Error> {
        match u {
            1 => Ok(ECDSACurve::SECP256R1),
            2 => Ok(ECDSACurve::SECP384R1),
            3 => Ok(ECDSACurve::SECP521R1),
            _ => Err(FidoError::COSEKeyECDSAInvalidCurve),
        }
    }
}

impl TryFrom<nid::Nid> for ECDSACurve {
    type Error = FidoError;
    fn try_from(nid: nid::Nid) -> Result<Self, Self::Error> {
        match nid {
            nid::Nid::X9_62_PRIME256V1 => Ok(ECDSACurve::SECP256R1),
            nid::Nid::SECP384R1 => Ok(ECDSACurve::SECP384R1),
            nid::Nid::SECP521R1 => Ok(ECDSACurve::SECP521R1),
            _ => Err(FidoError::COSEKeyECDSAInvalidCurve),
        }
    }
}

impl ECDSACurve {
    pub(crate) fn to_openssl_nid(self) -> nid::Nid {
        match self {
            ECDSACurve::SECP256R1 => nid::Nid::X9_62_PRIME256V1,
            ECDSACurve::SECP384R1 => nid::Nid::SECP384R1,
            ECDSACurve::SECP521R1 => nid::Nid::SECP521R1,
        }
    }

    /// The size of one affine coordinate in bytes.
    pub(crate) fn coordinate_size(self) -> usize {
        match self {
            ECDSACurve::SECP256R1 => 32,
            ECDSACurve::SECP384R1 => 48,
            ECDSACurve::SECP521R1 => 66,
        }
    }
}

/// An EDDSACurve identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EDDSACurve {
    /// Identifies this OKP as ED25519
    ED25519 = 6,
    /// Identifies this OKP as ED448
    ED448 = 7,
}

impl TryFrom<i128> for EDDSACurve {
    type Error = FidoError;
    fn try_from(u: i128) -> Result<Self, Self::Error> {
        match u {
            6 => Ok(EDDSACurve::ED25519),
            7 => Ok(EDDSACurve::ED448),
            _ => Err(FidoError::COSEKeyEDDSAInvalidCurve),
        }
    }
}

impl EDDSACurve {
    pub(crate) fn coordinate_size(self) -> usize {
        match self {
            EDDSACurve::ED25519 => 32,
            EDDSACurve::ED448 => 57,
        }
    }

    fn to_openssl_id(self) -> pkey::Id {
        match self {
            EDDSACurve::ED25519 => pkey::Id::ED25519,
            EDDSACurve::ED448 => pkey::Id::ED448,
        }
    }
}

/// An EC2 public key as affine coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEEC2Key {
    /// Curve of the point.
    pub curve: ECDSACurve,
    /// X, big-endian, padded to the curve's coordinate size.
    pub x: Vec<u8>,
    /// Y, big-endian, padded to the curve's coordinate size.
    pub y: Vec<u8>,
}

/// A COSE RSA PublicKey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSERSAKey {
    /// An RSA modulus
    pub n: Vec<u8>,
    /// An RSA exponent
    pub e: Vec<u8>,
}

/// An OKP (Edwards curve) public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEOKPKey {
    /// Edwards curve of the key.
    pub curve: EDDSACurve,
    /// The encoded public point.
    pub x: Vec<u8>,
}

/// The type of Key contained within a COSE value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum COSEKeyType {
    /// `kty` 2.
    EC_EC2(COSEEC2Key),
    /// `kty` 1.
    EC_OKP(COSEOKPKey),
    /// `kty` 3.
    RSA(COSERSAKey),
}

/// A COSE Key as provided by the Authenticator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEKey {
    /// The signature algorithm the key is bound to.
    pub type_: COSEAlgorithm,
    /// The public key
    pub key: COSEKeyType,
}

impl TryFrom<&serde_cbor_2::Value> for COSEKey {
    type Error = FidoError;
    fn try_from(d: &serde_cbor_2::Value) -> Result<COSEKey, Self::Error> {
        let m = cbor_try!(d, Map)?;

        // See also https://tools.ietf.org/html/rfc8152#section-3.1
        // Label 1 is the key type, label 3 the algorithm, and the negative labels are
        // specific to the key type.
        let key_type_value = m
            .get(&serde_cbor_2::Value::Integer(1))
            .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
        let key_type = cbor_try!(key_type_value, Integer)?;

        let content_type_value = m
            .get(&serde_cbor_2::Value::Integer(3))
            .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
        let content_type = cbor_try!(content_type_value, Integer)?;

        let type_ = COSEAlgorithm::try_from(content_type)
            .map_err(|_| FidoError::COSEKeyInvalidAlgorithm)?;

        if key_type == (COSEKeyTypeId::EC_EC2 as i128)
            && matches!(
                type_,
                COSEAlgorithm::ES256 | COSEAlgorithm::ES384 | COSEAlgorithm::ES512
            )
        {
            // crv (-1), x (-2) and y (-3)
            let curve_type_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let curve = cbor_try!(curve_type_value, Integer).and_then(ECDSACurve::try_from)?;

            let x_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let x = cbor_try!(x_value, Bytes)?;

            let y_value = m
                .get(&serde_cbor_2::Value::Integer(-3))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let y = cbor_try!(y_value, Bytes)?;

            let coord_len = curve.coordinate_size();
            if x.len() != coord_len || y.len() != coord_len {
                return Err(FidoError::COSEKeyECDSAXYInvalid);
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: x.clone(),
                    y: y.clone(),
                }),
            };

            // "Applications MUST check that the curve and the key type are consistent and
            // reject a key if they are not." OpenSSL checks the point is on the curve.
            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == (COSEKeyTypeId::EC_RSA as i128)
            && matches!(
                type_,
                COSEAlgorithm::RS256
                    | COSEAlgorithm::RS384
                    | COSEAlgorithm::RS512
                    | COSEAlgorithm::PS256
                    | COSEAlgorithm::PS384
                    | COSEAlgorithm::PS512
                    | COSEAlgorithm::INSECURE_RS1
            )
        {
            // n (-1), e (-2)
            let n_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let n = cbor_try!(n_value, Bytes)?;

            let e_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let e = cbor_try!(e_value, Bytes)?;

            if n.len() < 256 || e.is_empty() || e.len() > 4 {
                return Err(FidoError::COSEKeyRSANEInvalid);
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::RSA(COSERSAKey {
                    n: n.clone(),
                    e: e.clone(),
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == (COSEKeyTypeId::EC_OKP as i128) && type_ == COSEAlgorithm::EDDSA {
            // https://datatracker.ietf.org/doc/html/rfc8152#section-13.2
            let curve_type_value = m
                .get(&serde_cbor_2::Value::Integer(-1))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let curve = cbor_try!(curve_type_value, Integer).and_then(EDDSACurve::try_from)?;

            let x_value = m
                .get(&serde_cbor_2::Value::Integer(-2))
                .ok_or(FidoError::COSEKeyInvalidCBORValue)?;
            let x = cbor_try!(x_value, Bytes)?;

            if x.len() != curve.coordinate_size() {
                return Err(FidoError::COSEKeyEDDSAXInvalid);
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_OKP(COSEOKPKey {
                    curve,
                    x: x.clone(),
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else {
            debug!(?key_type, ?type_, "unsupported cose key type");
            Err(FidoError::COSEKeyInvalidType)
        }
    }
}

/// Rebuild the public key of a certificate as a COSE key with the given algorithm, so that
/// it can be compared to a credential key.
impl TryFrom<(COSEAlgorithm, &x509::X509)> for COSEKey {
    type Error = FidoError;
    fn try_from((alg, certificate): (COSEAlgorithm, &x509::X509)) -> Result<COSEKey, Self::Error> {
        let pkey = certificate.public_key()?;

        let key = match pkey.id() {
            pkey::Id::EC => {
                let ec_key = pkey.ec_key()?;
                let curve = ec_key
                    .group()
                    .curve_name()
                    .ok_or(FidoError::COSEKeyECDSAInvalidCurve)
                    .and_then(ECDSACurve::try_from)?;

                let mut ctx = bn::BigNumContext::new()?;
                let mut xbn = bn::BigNum::new()?;
                let mut ybn = bn::BigNum::new()?;
                ec_key.public_key().affine_coordinates(
                    ec_key.group(),
                    &mut xbn,
                    &mut ybn,
                    &mut ctx,
                )?;

                let coord_len = curve.coordinate_size() as i32;
                COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: xbn.to_vec_padded(coord_len)?,
                    y: ybn.to_vec_padded(coord_len)?,
                })
            }
            pkey::Id::RSA => {
                let rsa_key = pkey.rsa()?;
                COSEKeyType::RSA(COSERSAKey {
                    n: rsa_key.n().to_vec(),
                    e: rsa_key.e().to_vec(),
                })
            }
            id => {
                debug!(?id, "unsupported certificate key type");
                return Err(FidoError::COSEKeyInvalidType);
            }
        };

        Ok(COSEKey { type_: alg, key })
    }
}

impl COSEKey {
    /// The uncompressed ANSI X9.62 point `0x04 || x || y`, as used in U2F.
    pub(crate) fn get_alg_key_ecc_x962_raw(&self) -> Result<Vec<u8>, FidoError> {
        match &self.key {
            COSEKeyType::EC_EC2(ecpk) => {
                let r: [u8; 1] = [0x04];
                Ok(r.iter()
                    .chain(ecpk.x.iter())
                    .chain(ecpk.y.iter())
                    .copied()
                    .collect())
            }
            _ => {
                debug!("get_alg_key_ecc_x962_raw");
                Err(FidoError::COSEKeyInvalidType)
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), FidoError> {
        self.get_openssl_pkey().map(|_| ()).map_err(|e| {
            debug!(?e, "cose key rejected by openssl");
            FidoError::COSEKeyInvalid
        })
    }

    /// The key as an OpenSSL public key.
    pub fn get_openssl_pkey(&self) -> Result<pkey::PKey<pkey::Public>, FidoError> {
        match &self.key {
            COSEKeyType::EC_EC2(ec2k) => {
                let curve = ec2k.curve.to_openssl_nid();
                let ec_group = ec::EcGroup::from_curve_name(curve)?;

                let xbn = bn::BigNum::from_slice(&ec2k.x)?;
                let ybn = bn::BigNum::from_slice(&ec2k.y)?;

                let ec_key = ec::EcKey::from_public_key_affine_coordinates(&ec_group, &xbn, &ybn)?;

                // Validate the key is sound. This checks the values are correctly on the
                // curve as specified
                ec_key.check_key()?;

                Ok(pkey::PKey::from_ec_key(ec_key)?)
            }
            COSEKeyType::RSA(rsak) => {
                let nbn = bn::BigNum::from_slice(&rsak.n)?;
                let ebn = bn::BigNum::from_slice(&rsak.e)?;

                let rsa_key = rsa::Rsa::from_public_components(nbn, ebn)?;

                Ok(pkey::PKey::from_rsa(rsa_key)?)
            }
            COSEKeyType::EC_OKP(okpk) => Ok(pkey::PKey::public_key_from_raw_bytes(
                &okpk.x,
                okpk.curve.to_openssl_id(),
            )?),
        }
    }

    /// The key as a DER encoded SubjectPublicKeyInfo.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, FidoError> {
        Ok(self.get_openssl_pkey()?.public_key_to_der()?)
    }

    /// Verify a signature made by this key with its own algorithm.
    pub(crate) fn verify_signature(
        &self,
        signature: &[u8],
        verification_data: &[u8],
    ) -> Result<bool, FidoError> {
        let pkey = self.get_openssl_pkey()?;
        verify_with_pkey(self.type_, &pkey, signature, verification_data, false)
    }

    /// The COSE key type identifier, as recorded in registration flags.
    pub fn key_type_id(&self) -> i128 {
        match &self.key {
            COSEKeyType::EC_EC2(_) => COSEKeyTypeId::EC_EC2 as i128,
            COSEKeyType::EC_OKP(_) => COSEKeyTypeId::EC_OKP as i128,
            COSEKeyType::RSA(_) => COSEKeyTypeId::EC_RSA as i128,
        }
    }
}

fn digest_from_type(alg: COSEAlgorithm) -> Option<hash::MessageDigest> {
    match alg {
        COSEAlgorithm::ES256 | COSEAlgorithm::RS256 | COSEAlgorithm::PS256 => {
            Some(hash::MessageDigest::sha256())
        }
        COSEAlgorithm::ES384 | COSEAlgorithm::RS384 | COSEAlgorithm::PS384 => {
            Some(hash::MessageDigest::sha384())
        }
        COSEAlgorithm::ES512 | COSEAlgorithm::RS512 | COSEAlgorithm::PS512 => {
            Some(hash::MessageDigest::sha512())
        }
        COSEAlgorithm::INSECURE_RS1 => Some(hash::MessageDigest::sha1()),
        COSEAlgorithm::EDDSA => None,
    }
}

fn verify_with_pkey(
    alg: COSEAlgorithm,
    pkey: &pkey::PKeyRef<pkey::Public>,
    signature: &[u8],
    verification_data: &[u8],
    permit_insecure_rs1: bool,
) -> Result<bool, FidoError> {
    if alg == COSEAlgorithm::INSECURE_RS1 {
        if !permit_insecure_rs1 {
            error!("INSECURE SHA1 USAGE DETECTED, REJECTING");
            return Err(FidoError::CredentialInsecureCryptography);
        }
        warn!("INSECURE SHA1 USAGE DETECTED");
    }

    let mut verifier = match digest_from_type(alg) {
        Some(digest) => sign::Verifier::new(digest, pkey)?,
        None => sign::Verifier::new_without_digest(pkey)?,
    };

    if matches!(
        alg,
        COSEAlgorithm::PS256 | COSEAlgorithm::PS384 | COSEAlgorithm::PS512
    ) {
        verifier.set_rsa_padding(rsa::Padding::PKCS1_PSS)?;
        verifier.set_rsa_pss_saltlen(sign::RsaPssSaltlen::DIGEST_LENGTH)?;
    }

    // A malformed signature is a failed verification, not a provider error.
    Ok(verifier
        .verify_oneshot(signature, verification_data)
        .unwrap_or_else(|e| {
            debug!(?e, "signature verification error");
            false
        }))
}

/// Validate an x509 signature is valid for the supplied data
pub fn verify_signature(
    alg: COSEAlgorithm,
    certificate: &x509::X509,
    signature: &[u8],
    verification_data: &[u8],
) -> Result<bool, FidoError> {
    let pkey = certificate.public_key()?;
    verify_with_pkey(alg, &pkey, signature, verification_data, false)
}

/// As [`verify_signature`], additionally permitting RSASSA-PKCS1-v1_5 with SHA-1. Only TPM
/// attestation from older Windows Hello devices needs this.
pub(crate) fn verify_signature_permit_rs1(
    alg: COSEAlgorithm,
    certificate: &x509::X509,
    signature: &[u8],
    verification_data: &[u8],
) -> Result<bool, FidoError> {
    let pkey = certificate.public_key()?;
    verify_with_pkey(alg, &pkey, signature, verification_data, true)
}

/// Verify an assertion signature against a stored DER SubjectPublicKeyInfo with SHA-256.
pub fn verify_spki_signature(
    spki_der: &[u8],
    signature: &[u8],
    verification_data: &[u8],
) -> Result<bool, FidoError> {
    let pkey = pkey::PKey::public_key_from_der(spki_der)?;
    let alg = match pkey.id() {
        pkey::Id::EC => COSEAlgorithm::ES256,
        pkey::Id::RSA => COSEAlgorithm::RS256,
        pkey::Id::ED25519 | pkey::Id::ED448 => COSEAlgorithm::EDDSA,
        id => {
            debug!(?id, "unsupported stored key type");
            return Err(FidoError::COSEKeyInvalidType);
        }
    };
    verify_with_pkey(alg, &pkey, signature, verification_data, false)
}

/// Hash `input` with the digest that `alg` signs with.
pub(crate) fn only_hash_from_type(alg: COSEAlgorithm, input: &[u8]) -> Result<Vec<u8>, FidoError> {
    match digest_from_type(alg) {
        Some(digest) => {
            if alg == COSEAlgorithm::INSECURE_RS1 {
                warn!("INSECURE SHA1 USAGE DETECTED");
            }
            Ok(hash::hash(digest, input)?.to_vec())
        }
        None => {
            debug!(?alg, "FidoError::COSEKeyInvalidType");
            Err(FidoError::COSEKeyInvalidType)
        }
    }
}

/// Compute the sha256 of a slice of data.
pub fn compute_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha::Sha256::new();
    hasher.update(data);
    hasher.finish()
}

fn first_utf8_entry(name: &x509::X509NameRef, nid: nid::Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
}

/// The subject common name of a certificate.
pub(crate) fn subject_common_name(cert: &x509::X509Ref) -> Option<String> {
    first_utf8_entry(cert.subject_name(), nid::Nid::COMMONNAME)
}

fn parse_x509<T>(
    cert: &x509::X509Ref,
    f: impl FnOnce(&x509_parser::certificate::X509Certificate<'_>) -> Result<T, FidoError>,
) -> Result<T, FidoError> {
    let der_bytes = cert.to_der()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der_bytes)
        .map_err(|_| FidoError::AttestationStatementX5CInvalid)?;
    f(&parsed)
}

fn is_ca(parsed: &x509_parser::certificate::X509Certificate<'_>) -> Result<bool, FidoError> {
    Ok(parsed
        .basic_constraints()
        .map_err(|_| FidoError::AttestationStatementX5CInvalid)?
        .map(|bc| bc.value.ca)
        .unwrap_or(false))
}

/// Packed attestation certificate requirements.
/// <https://w3c.github.io/webauthn/#sctn-packed-attestation-cert-requirements>
pub(crate) fn assert_packed_attest_req(pubk: &x509::X509) -> Result<(), FidoError> {
    // Subject-C, Subject-O and Subject-CN must be present, Subject-OU must be the literal
    // "Authenticator Attestation".
    let subject_name_ref = pubk.subject_name();

    let subject_c = first_utf8_entry(subject_name_ref, nid::Nid::COUNTRYNAME);
    let subject_o = first_utf8_entry(subject_name_ref, nid::Nid::ORGANIZATIONNAME);
    let subject_ou = first_utf8_entry(subject_name_ref, nid::Nid::ORGANIZATIONALUNITNAME);
    let subject_cn = first_utf8_entry(subject_name_ref, nid::Nid::COMMONNAME);

    if subject_c.is_none() || subject_o.is_none() || subject_cn.is_none() {
        debug!("packed attestation certificate subject is incomplete");
        return Err(FidoError::AttestationCertificateRequirementsNotMet);
    }

    if subject_ou.as_deref() != Some("Authenticator Attestation") {
        debug!(?subject_ou, "packed attestation certificate OU is invalid");
        return Err(FidoError::AttestationCertificateRequirementsNotMet);
    }

    parse_x509(pubk, |parsed| {
        if parsed.version() != x509_parser::x509::X509Version::V3 {
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }
        // The Basic Constraints extension MUST have the CA component set to false.
        if is_ca(parsed)? {
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }
        Ok(())
    })
}

/// TPM attestation identity key certificate requirements.
/// <https://w3c.github.io/webauthn/#sctn-tpm-cert-requirements>
pub(crate) fn assert_tpm_attest_req(aik_cert: &x509::X509) -> Result<(), FidoError> {
    parse_x509(aik_cert, |parsed| {
        // Version MUST be set to 3.
        if parsed.version() != x509_parser::x509::X509Version::V3 {
            debug!("aik certificate is not version 3");
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }

        // Subject field MUST be set to empty.
        if parsed.subject().iter().next().is_some() {
            debug!("aik certificate subject is not empty");
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }

        // The Extended Key Usage extension MUST contain the tcg-kp-AIKCertificate OID.
        let has_aik_eku = parsed
            .extended_key_usage()
            .map_err(|_| FidoError::AttestationStatementX5CInvalid)?
            .map(|eku| eku.value.other.iter().any(|oid| *oid == TCG_KP_AIK_CERTIFICATE))
            .unwrap_or(false);
        if !has_aik_eku {
            debug!("aik certificate is missing tcg-kp-AIKCertificate");
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }

        // The Basic Constraints extension MUST have the CA component set to false.
        if is_ca(parsed)? {
            debug!("aik certificate is a CA");
            return Err(FidoError::AttestationCertificateRequirementsNotMet);
        }

        Ok(())
    })
}

//! TPM 2.0 attestation structures.
//!
//! All integers are big endian. A `TPM2B_*` is a `u16` length followed by that many
//! bytes.

use nom::bytes::complete::take;
use nom::combinator::all_consuming;
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u32, be_u64};
use openssl::{bn, ecdsa, hash, x509};

use crate::attestation::{
    stmt_alg, stmt_bytes, stmt_field, stmt_x5c, validate_extension, FidoGenCeAaguid,
    StatementMap,
};
use crate::crypto::{
    assert_tpm_attest_req, only_hash_from_type, verify_signature_permit_rs1, COSEEC2Key,
    COSEKey, COSEKeyType, ECDSACurve,
};
use crate::error::{FidoError, FidoResult};
use crate::interface::AttestedCredentialData;
use crate::proto::COSEAlgorithm;

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_SHA384: u16 = 0x000c;
const TPM_ALG_SHA512: u16 = 0x000d;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_RSASSA: u16 = 0x0014;
const TPM_ALG_RSAPSS: u16 = 0x0016;
const TPM_ALG_ECDSA: u16 = 0x0018;
const TPM_ALG_ECC: u16 = 0x0023;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

const CLOCK_INFO_LEN: usize = 17;

type TpmResult<'a, T> = nom::IResult<&'a [u8], T>;

fn tpm2b(i: &[u8]) -> TpmResult<'_, &[u8]> {
    length_data(be_u16)(i)
}

/// TPMS_ATTEST carrying a TPMS_CERTIFY_INFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsAttest {
    /// Qualified name of the signing key.
    pub qualified_signer: Vec<u8>,
    /// The caller supplied data, here the hash of the attested data.
    pub extra_data: Vec<u8>,
    /// TPMS_CLOCK_INFO, not interpreted.
    pub clock_info: Vec<u8>,
    /// The TPM firmware version.
    pub firmware_version: u64,
    /// The name of the certified object.
    pub attested_name: Vec<u8>,
    /// The qualified name of the certified object.
    pub attested_qualified_name: Vec<u8>,
}

fn certify_body_parser(i: &[u8]) -> TpmResult<'_, TpmsAttest> {
    let (i, qualified_signer) = tpm2b(i)?;
    let (i, extra_data) = tpm2b(i)?;
    let (i, clock_info) = take(CLOCK_INFO_LEN)(i)?;
    let (i, firmware_version) = be_u64(i)?;
    let (i, attested_name) = tpm2b(i)?;
    let (i, attested_qualified_name) = tpm2b(i)?;

    Ok((
        i,
        TpmsAttest {
            qualified_signer: qualified_signer.to_vec(),
            extra_data: extra_data.to_vec(),
            clock_info: clock_info.to_vec(),
            firmware_version,
            attested_name: attested_name.to_vec(),
            attested_qualified_name: attested_qualified_name.to_vec(),
        },
    ))
}

impl TryFrom<&[u8]> for TpmsAttest {
    type Error = FidoError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let (rest, (magic, st)) = nom::sequence::tuple((be_u32, be_u16))(data)
            .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                FidoError::AttestationTpmStructureInvalid
            })?;

        if magic != TPM_GENERATED_VALUE {
            debug!(magic, "certInfo magic is not TPM_GENERATED_VALUE");
            return Err(FidoError::AttestationTpmStInvalid);
        }
        if st != TPM_ST_ATTEST_CERTIFY {
            debug!(st, "certInfo is not TPM_ST_ATTEST_CERTIFY");
            return Err(FidoError::AttestationTpmStInvalid);
        }

        all_consuming(certify_body_parser)(rest)
            .map(|(_, attest)| attest)
            .map_err(|e| {
                debug!(?e, "certInfo did not parse");
                FidoError::AttestationTpmStructureInvalid
            })
    }
}

/// The algorithm parameters of a TPMT_PUBLIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuPublicParms {
    /// TPMS_RSA_PARMS
    Rsa {
        /// Key size in bits.
        key_bits: u16,
        /// The public exponent, zero meaning 65537.
        exponent: u32,
    },
    /// TPMS_ECC_PARMS
    Ecc {
        /// TPMI_ECC_CURVE
        curve_id: u16,
    },
}

/// The public key of a TPMT_PUBLIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuPublicId {
    /// The RSA modulus.
    Rsa(Vec<u8>),
    /// The ECC point.
    Ecc {
        /// X coordinate.
        x: Vec<u8>,
        /// Y coordinate.
        y: Vec<u8>,
    },
}

/// TPMT_PUBLIC, the TPM's description of the credential key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtPublic {
    /// The algorithm used to compute the object's name.
    pub name_alg: u16,
    /// TPMA_OBJECT
    pub object_attributes: u32,
    /// The key parameters.
    pub parameters: TpmuPublicParms,
    /// The public key.
    pub unique: TpmuPublicId,
}

// A scheme or symmetric definition is an algorithm id followed by details unless NULL.
fn alg_with_details(i: &[u8], details: usize) -> TpmResult<'_, u16> {
    let (i, alg) = be_u16(i)?;
    if alg == TPM_ALG_NULL {
        return Ok((i, alg));
    }
    let (i, _) = take(details)(i)?;
    Ok((i, alg))
}

fn tpmt_public_parser(i: &[u8]) -> TpmResult<'_, TpmtPublic> {
    let (i, type_) = be_u16(i)?;
    let (i, name_alg) = be_u16(i)?;
    let (i, object_attributes) = be_u32(i)?;
    let (i, _auth_policy) = tpm2b(i)?;
    // TPMT_SYM_DEF_OBJECT: keyBits and mode follow a non NULL algorithm.
    let (i, _symmetric) = alg_with_details(i, 4)?;

    let (i, parameters, unique) = match type_ {
        TPM_ALG_RSA => {
            let (i, _scheme) = alg_with_details(i, 2)?;
            let (i, key_bits) = be_u16(i)?;
            let (i, exponent) = be_u32(i)?;
            let (i, modulus) = tpm2b(i)?;
            (
                i,
                TpmuPublicParms::Rsa { key_bits, exponent },
                TpmuPublicId::Rsa(modulus.to_vec()),
            )
        }
        TPM_ALG_ECC => {
            let (i, _scheme) = alg_with_details(i, 2)?;
            let (i, curve_id) = be_u16(i)?;
            let (i, _kdf) = alg_with_details(i, 2)?;
            let (i, x) = tpm2b(i)?;
            let (i, y) = tpm2b(i)?;
            (
                i,
                TpmuPublicParms::Ecc { curve_id },
                TpmuPublicId::Ecc {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        }
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Switch,
            )))
        }
    };

    Ok((
        i,
        TpmtPublic {
            name_alg,
            object_attributes,
            parameters,
            unique,
        },
    ))
}

impl TryFrom<&[u8]> for TpmtPublic {
    type Error = FidoError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        all_consuming(tpmt_public_parser)(data)
            .map(|(_, public)| public)
            .map_err(|e| {
                debug!(?e, "pubArea did not parse");
                FidoError::AttestationTpmStructureInvalid
            })
    }
}

/// The attestation signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtSignature {
    /// An RSASSA or RSAPSS TPMT_SIGNATURE.
    Rsa {
        /// The signature bytes.
        signature: Vec<u8>,
    },
    /// An ECDSA TPMT_SIGNATURE.
    Ecdsa {
        /// R
        r: Vec<u8>,
        /// S
        s: Vec<u8>,
    },
    /// A bare signature, as some Windows Hello devices send.
    Raw(Vec<u8>),
}

fn tpmt_signature_parser(i: &[u8]) -> TpmResult<'_, TpmtSignature> {
    let (i, sig_alg) = be_u16(i)?;
    let (i, _hash) = be_u16(i)?;
    match sig_alg {
        TPM_ALG_RSASSA | TPM_ALG_RSAPSS => {
            let (i, signature) = tpm2b(i)?;
            Ok((
                i,
                TpmtSignature::Rsa {
                    signature: signature.to_vec(),
                },
            ))
        }
        TPM_ALG_ECDSA => {
            let (i, r) = tpm2b(i)?;
            let (i, s) = tpm2b(i)?;
            Ok((
                i,
                TpmtSignature::Ecdsa {
                    r: r.to_vec(),
                    s: s.to_vec(),
                },
            ))
        }
        _ => Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Switch,
        ))),
    }
}

impl From<&[u8]> for TpmtSignature {
    fn from(data: &[u8]) -> Self {
        all_consuming(tpmt_signature_parser)(data)
            .map(|(_, sig)| sig)
            .unwrap_or_else(|_: nom::Err<nom::error::Error<&[u8]>>| {
                TpmtSignature::Raw(data.to_vec())
            })
    }
}

impl TpmtSignature {
    /// The signature in the form OpenSSL verifies.
    fn to_openssl(&self) -> FidoResult<Vec<u8>> {
        match self {
            TpmtSignature::Rsa { signature } | TpmtSignature::Raw(signature) => {
                Ok(signature.clone())
            }
            TpmtSignature::Ecdsa { r, s } => {
                let sig = ecdsa::EcdsaSig::from_private_components(
                    bn::BigNum::from_slice(r)?,
                    bn::BigNum::from_slice(s)?,
                )?;
                Ok(sig.to_der()?)
            }
        }
    }
}

/// A parsed `tpm` attestation statement.
#[derive(Debug, Clone)]
pub struct TpmStatement {
    /// The attestation signature algorithm.
    pub alg: COSEAlgorithm,
    /// The attestation signature.
    pub sig: TpmtSignature,
    /// certInfo as transmitted, which is what the signature covers.
    pub cert_info_bytes: Vec<u8>,
    /// The decoded certInfo.
    pub cert_info: TpmsAttest,
    /// pubArea as transmitted, which is what the attested name covers.
    pub pub_area_bytes: Vec<u8>,
    /// The decoded pubArea.
    pub pub_area: TpmtPublic,
    /// The attestation identity key certificate followed by its chain.
    pub x5c: Vec<x509::X509>,
}

impl TryFrom<&StatementMap> for TpmStatement {
    type Error = FidoError;

    fn try_from(map: &StatementMap) -> Result<Self, Self::Error> {
        let ver_value =
            stmt_field(map, "ver").ok_or(FidoError::AttestationStatementVerMissing)?;
        let ver =
            cbor_try!(ver_value, Text).map_err(|_| FidoError::AttestationStatementVerInvalid)?;
        if ver != "2.0" {
            debug!(%ver, "unsupported tpm version");
            return Err(FidoError::AttestationStatementVerUnsupported);
        }

        let alg = stmt_alg(map)?;
        let sig = stmt_bytes(map, "sig", FidoError::AttestationStatementSigMissing)?;
        let cert_info_bytes =
            stmt_bytes(map, "certInfo", FidoError::AttestationStatementCertInfoMissing)?;
        let pub_area_bytes =
            stmt_bytes(map, "pubArea", FidoError::AttestationStatementPubAreaMissing)?;
        let x5c = stmt_field(map, "x5c")
            .ok_or(FidoError::AttestationStatementX5CMissing)
            .and_then(stmt_x5c)?;

        let cert_info = TpmsAttest::try_from(cert_info_bytes.as_slice())?;
        let pub_area = TpmtPublic::try_from(pub_area_bytes.as_slice())?;
        trace!(?cert_info, ?pub_area, "parsed tpm statement");

        Ok(TpmStatement {
            alg,
            sig: TpmtSignature::from(sig.as_slice()),
            cert_info_bytes,
            cert_info,
            pub_area_bytes,
            pub_area,
            x5c,
        })
    }
}

fn name_digest(name_alg: u16) -> FidoResult<hash::MessageDigest> {
    match name_alg {
        TPM_ALG_SHA1 => Ok(hash::MessageDigest::sha1()),
        TPM_ALG_SHA256 => Ok(hash::MessageDigest::sha256()),
        TPM_ALG_SHA384 => Ok(hash::MessageDigest::sha384()),
        TPM_ALG_SHA512 => Ok(hash::MessageDigest::sha512()),
        _ => {
            debug!(name_alg, "unknown tpm name algorithm");
            Err(FidoError::AttestationTpmPubAreaHashUnknown)
        }
    }
}

impl TpmStatement {
    /// The name of pubArea, `nameAlg || H(pubArea)`.
    pub fn pub_area_name(&self) -> FidoResult<Vec<u8>> {
        let digest = name_digest(self.pub_area.name_alg)?;
        let mut name = self.pub_area.name_alg.to_be_bytes().to_vec();
        name.extend_from_slice(&hash::hash(digest, &self.pub_area_bytes)?);
        Ok(name)
    }

    fn assert_pub_area_matches(&self, credential_key: &COSEKey) -> FidoResult<()> {
        let matches = match (
            &credential_key.key,
            &self.pub_area.parameters,
            &self.pub_area.unique,
        ) {
            (COSEKeyType::RSA(cose_rsa), TpmuPublicParms::Rsa { .. }, TpmuPublicId::Rsa(n)) => {
                cose_rsa.n == *n
            }
            (
                COSEKeyType::EC_EC2(COSEEC2Key { curve, x, y }),
                TpmuPublicParms::Ecc { curve_id },
                TpmuPublicId::Ecc { x: tx, y: ty },
            ) => {
                let same_curve = matches!(
                    (curve, *curve_id),
                    (ECDSACurve::SECP256R1, TPM_ECC_NIST_P256)
                        | (ECDSACurve::SECP384R1, TPM_ECC_NIST_P384)
                        | (ECDSACurve::SECP521R1, TPM_ECC_NIST_P521)
                );
                same_curve && x == tx && y == ty
            }
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            debug!("pubArea does not describe the credential key");
            Err(FidoError::AttestationTpmPubAreaMismatch)
        }
    }

    // https://w3c.github.io/webauthn/#sctn-tpm-attestation
    pub(crate) fn verify(
        &self,
        acd: &AttestedCredentialData,
        credential_key: &COSEKey,
        auth_data_bytes: &[u8],
        client_data_hash: &[u8],
    ) -> FidoResult<()> {
        let aik_cert = self
            .x5c
            .first()
            .ok_or(FidoError::AttestationStatementX5CInvalid)?;

        self.assert_pub_area_matches(credential_key)?;

        // extraData is the hash of attToBeSigned with the digest of alg.
        let att_to_be_signed: Vec<u8> = auth_data_bytes
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();
        if only_hash_from_type(self.alg, &att_to_be_signed)? != self.cert_info.extra_data {
            debug!("certInfo extraData mismatch");
            return Err(FidoError::AttestationTpmExtraDataMismatch);
        }

        if self.pub_area_name()? != self.cert_info.attested_name {
            debug!("certInfo does not certify pubArea");
            return Err(FidoError::AttestationTpmPubAreaHashInvalid);
        }

        let signature = self.sig.to_openssl()?;
        if !verify_signature_permit_rs1(self.alg, aik_cert, &signature, &self.cert_info_bytes)? {
            debug!("tpm signature invalid");
            return Err(FidoError::AttestationStatementSigInvalid);
        }

        assert_tpm_attest_req(aik_cert)?;

        validate_extension::<FidoGenCeAaguid>(aik_cert, &acd.aaguid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // A Windows Hello certInfo.
    const CERT_INFO: [u8; 161] = hex!(
        "ff544347"
        "8017"
        "0022 000bae4a98460157bf9c604ab1dd2584060865237cd855ad55c37389c2f7913d5228"
        "0014 ea6290319227632f2c527330402898e0e32a3f85"
        "00000002dbd78926bb6ab70864916ac801"
        "5605dc5176ea838d"
        "0022 000bef3570fffd0cbda810fd0a956c071fd48f15990707996349cd615a6eb67804fa"
        "0022 000bf948e054106093c5a7c36eb54dcf931022408bb978bec4d1d51d01884cebdff7"
    );

    #[test]
    fn cert_info_parses() {
        let attest = TpmsAttest::try_from(CERT_INFO.as_slice()).unwrap();
        assert_eq!(attest.extra_data.len(), 20);
        assert_eq!(attest.clock_info.len(), 17);
        assert_eq!(attest.firmware_version, 0x5605dc5176ea838d);
        assert_eq!(attest.attested_name.len(), 34);
        assert_eq!(&attest.attested_name[..2], &[0x00, 0x0b]);

        // Truncated.
        assert!(matches!(
            TpmsAttest::try_from(&CERT_INFO[..100]),
            Err(FidoError::AttestationTpmStructureInvalid)
        ));
        // Trailing.
        let mut long = CERT_INFO.to_vec();
        long.push(0);
        assert!(TpmsAttest::try_from(long.as_slice()).is_err());
    }

    #[test]
    fn cert_info_magic_and_type() {
        let mut bad_magic = CERT_INFO;
        bad_magic[0] = 0xfe;
        assert!(matches!(
            TpmsAttest::try_from(bad_magic.as_slice()),
            Err(FidoError::AttestationTpmStInvalid)
        ));

        let mut bad_type = CERT_INFO;
        bad_type[5] = 0x18;
        assert!(matches!(
            TpmsAttest::try_from(bad_type.as_slice()),
            Err(FidoError::AttestationTpmStInvalid)
        ));
    }

    #[test]
    fn ecc_pub_area() {
        let x = [0x11u8; 32];
        let y = [0x22u8; 32];
        let mut pub_area = Vec::new();
        pub_area.extend_from_slice(&TPM_ALG_ECC.to_be_bytes());
        pub_area.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        pub_area.extend_from_slice(&0x0006_0472u32.to_be_bytes());
        pub_area.extend_from_slice(&[0x00, 0x00]); // authPolicy
        pub_area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // symmetric
        pub_area.extend_from_slice(&TPM_ALG_ECDSA.to_be_bytes()); // scheme
        pub_area.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes()); // scheme hash
        pub_area.extend_from_slice(&TPM_ECC_NIST_P256.to_be_bytes());
        pub_area.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // kdf
        pub_area.extend_from_slice(&[0x00, 0x20]);
        pub_area.extend_from_slice(&x);
        pub_area.extend_from_slice(&[0x00, 0x20]);
        pub_area.extend_from_slice(&y);

        let public = TpmtPublic::try_from(pub_area.as_slice()).unwrap();
        assert_eq!(public.name_alg, TPM_ALG_SHA256);
        assert_eq!(
            public.parameters,
            TpmuPublicParms::Ecc {
                curve_id: TPM_ECC_NIST_P256
            }
        );
        assert_eq!(
            public.unique,
            TpmuPublicId::Ecc {
                x: x.to_vec(),
                y: y.to_vec()
            }
        );

        // Unknown key type.
        pub_area[1] = 0x99;
        assert!(TpmtPublic::try_from(pub_area.as_slice()).is_err());
    }

    #[test]
    fn signature_forms() {
        let mut rsassa = Vec::new();
        rsassa.extend_from_slice(&TPM_ALG_RSASSA.to_be_bytes());
        rsassa.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
        rsassa.extend_from_slice(&[0x00, 0x04, 1, 2, 3, 4]);
        assert_eq!(
            TpmtSignature::from(rsassa.as_slice()),
            TpmtSignature::Rsa {
                signature: vec![1, 2, 3, 4]
            }
        );

        // A bare RSA signature is not a TPMT_SIGNATURE.
        let raw = [0x05u8, 0x03, 0xa2, 0xd8, 0x97, 0x39];
        assert_eq!(
            TpmtSignature::from(raw.as_slice()),
            TpmtSignature::Raw(raw.to_vec())
        );
    }
}

//! Binary decoding and encoding of authenticator data and attestation objects.
//!
//! Authenticator data has a fixed layout:
//!
//! ```text
//! rpIdHash(32) · flags(1) · signCount(4, BE)
//!     · [AT: aaguid(16) · credIdLen(2, BE) · credId · COSE key]
//!     · [ED: extensions CBOR map]
//! ```
//!
//! All parsing is done with bounds checked nom combinators, so truncated input is an
//! error and never a panic.

use nom::bytes::complete::take;
use nom::combinator::cond;
use nom::number::complete::{be_u16, be_u32, be_u8};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::constants::*;
use crate::crypto::COSEKey;
use crate::error::*;
use crate::interface::*;

fn cbor_parser(i: &[u8]) -> nom::IResult<&[u8], serde_cbor_2::Value> {
    let mut deserializer = serde_cbor_2::Deserializer::from_slice(i);
    let v = serde::de::Deserialize::deserialize(&mut deserializer).map_err(|e| {
        debug!(?e, "cbor_parser");
        nom::Err::Failure(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
    })?;

    let len = deserializer.byte_offset();
    let (i, _) = take(len)(i)?;

    Ok((i, v))
}

fn acd_parser(i: &[u8]) -> nom::IResult<&[u8], AttestedCredentialData> {
    let (i, aaguid) = take(16usize)(i)?;
    let (i, cred_id_len) = be_u16(i)?;
    let (i, cred_id) = take(cred_id_len as usize)(i)?;
    let (i, cred_pk) = cbor_parser(i)?;

    let mut aaguid_arr: Aaguid = [0; 16];
    aaguid_arr.copy_from_slice(aaguid);

    Ok((
        i,
        AttestedCredentialData {
            aaguid: aaguid_arr,
            credential_id: cred_id.to_vec(),
            credential_pk: cred_pk,
        },
    ))
}

fn authenticator_data_parser(i: &[u8]) -> nom::IResult<&[u8], AuthenticatorData> {
    let (i, rp_id_hash) = take(32usize)(i)?;
    let (i, flags) = be_u8(i)?;
    let (i, counter) = be_u32(i)?;

    let acd_present = flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0;
    let extensions_present = flags & FLAG_EXTENSION_DATA != 0;

    let (i, acd) = cond(acd_present, acd_parser)(i)?;
    let (i, extensions) = cond(extensions_present, cbor_parser)(i)?;

    let mut rp_id_hash_arr = [0; 32];
    rp_id_hash_arr.copy_from_slice(rp_id_hash);

    Ok((
        i,
        AuthenticatorData {
            rp_id_hash: rp_id_hash_arr,
            flags,
            counter,
            acd,
            extensions,
        },
    ))
}

impl TryFrom<&[u8]> for AuthenticatorData {
    type Error = FidoError;
    fn try_from(auth_data_bytes: &[u8]) -> Result<Self, Self::Error> {
        if auth_data_bytes.len() < AUTHENTICATOR_DATA_MIN_LEN {
            debug!(len = auth_data_bytes.len(), "authenticator data too short");
            return Err(FidoError::ParseInsufficentBytesAvailable);
        }

        let (rem, auth_data) = authenticator_data_parser(auth_data_bytes).map_err(|e| {
            debug!(?e, "try_from authenticator_data_parser");
            FidoError::ParseNOMFailure
        })?;

        if !rem.is_empty() {
            debug!(trailing = rem.len(), "authenticator data has trailing bytes");
            return Err(FidoError::AuthenticatorDataTrailingBytes);
        }

        if let Some(acd) = &auth_data.acd {
            if !matches!(acd.credential_pk, serde_cbor_2::Value::Map(_)) {
                return Err(FidoError::COSEKeyInvalidCBORValue);
            }
            // Reject key types we could never verify at decode time.
            COSEKey::try_from(&acd.credential_pk)?;
        }

        if let Some(extensions) = &auth_data.extensions {
            if !matches!(extensions, serde_cbor_2::Value::Map(_)) {
                return Err(FidoError::ParseNOMFailure);
            }
        }

        trace!(?auth_data);
        Ok(auth_data)
    }
}

/// Decode authenticator data.
pub fn decode_authenticator_data(bytes: &[u8]) -> FidoResult<AuthenticatorData> {
    AuthenticatorData::try_from(bytes)
}

/// Encode authenticator data in its transmitted layout. The flags byte is written as
/// given and must agree with the presence of the optional blocks.
pub fn encode_authenticator_data(auth_data: &AuthenticatorData) -> FidoResult<Vec<u8>> {
    let acd_flag = auth_data.flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0;
    let ed_flag = auth_data.flags & FLAG_EXTENSION_DATA != 0;

    if acd_flag != auth_data.acd.is_some() {
        return Err(FidoError::MissingAttestationCredentialData);
    }
    if ed_flag != auth_data.extensions.is_some() {
        return Err(FidoError::ParseNOMFailure);
    }

    let mut out = Vec::with_capacity(AUTHENTICATOR_DATA_MIN_LEN);
    out.extend_from_slice(&auth_data.rp_id_hash);
    out.push(auth_data.flags);
    out.extend_from_slice(&auth_data.counter.to_be_bytes());

    if let Some(acd) = &auth_data.acd {
        let cred_id_len =
            u16::try_from(acd.credential_id.len()).map_err(|_| FidoError::ParseNOMFailure)?;
        out.extend_from_slice(&acd.aaguid);
        out.extend_from_slice(&cred_id_len.to_be_bytes());
        out.extend_from_slice(&acd.credential_id);
        out.extend(serde_cbor_2::to_vec(&acd.credential_pk)?);
    }

    if let Some(extensions) = &auth_data.extensions {
        out.extend(serde_cbor_2::to_vec(extensions)?);
    }

    Ok(out)
}

fn text_key(k: &str) -> serde_cbor_2::Value {
    serde_cbor_2::Value::Text(k.to_string())
}

impl TryFrom<&[u8]> for AttestationObject {
    type Error = FidoError;
    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let value: serde_cbor_2::Value = serde_cbor_2::from_slice(data)?;

        let m = cbor_try!(&value, Map).map_err(|_| FidoError::AttestationObjectInvalid("map"))?;

        let fmt = m
            .get(&text_key("fmt"))
            .ok_or(FidoError::AttestationObjectInvalid("fmt"))
            .and_then(|v| {
                cbor_try!(v, Text).map_err(|_| FidoError::AttestationObjectInvalid("fmt"))
            })?
            .clone();

        let att_stmt = m
            .get(&text_key("attStmt"))
            .ok_or(FidoError::AttestationObjectInvalid("attStmt"))?
            .clone();

        if !matches!(att_stmt, serde_cbor_2::Value::Map(_)) {
            return Err(FidoError::AttestationObjectInvalid("attStmt"));
        }

        let auth_data_bytes = m
            .get(&text_key("authData"))
            .ok_or(FidoError::AttestationObjectInvalid("authData"))
            .and_then(|v| {
                cbor_try!(v, Bytes).map_err(|_| FidoError::AttestationObjectInvalid("authData"))
            })?
            .clone();

        let auth_data = AuthenticatorData::try_from(auth_data_bytes.as_slice())?;

        Ok(AttestationObject {
            fmt,
            att_stmt,
            auth_data_bytes,
            auth_data,
        })
    }
}

/// Decode an attestation object into its format tag, statement and authenticator data.
pub fn decode_attestation_object(bytes: &[u8]) -> FidoResult<AttestationObject> {
    AttestationObject::try_from(bytes)
}

/// Encode an attestation object. The authenticator data is written verbatim from
/// `auth_data_bytes`.
pub fn encode_attestation_object(att_obj: &AttestationObject) -> FidoResult<Vec<u8>> {
    let mut m = BTreeMap::new();
    m.insert(text_key("fmt"), serde_cbor_2::Value::Text(att_obj.fmt.clone()));
    m.insert(text_key("attStmt"), att_obj.att_stmt.clone());
    m.insert(
        text_key("authData"),
        serde_cbor_2::Value::Bytes(att_obj.auth_data_bytes.clone()),
    );
    Ok(serde_cbor_2::to_vec(&serde_cbor_2::Value::Map(m))?)
}

/// Format an AAGUID as a UUID. The two 8 byte halves are the big endian high and low
/// 64 bits.
pub fn format_aaguid(aaguid: &Aaguid) -> String {
    Uuid::from_bytes(*aaguid).hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64urlsafedata::Base64UrlSafeData;
    use hex_literal::hex;
    use serde_cbor_2::Value;

    // A Firefox "none" attestation.
    const NONE_ATTESTATION_OBJECT: &str = "o2NmbXRkbm9uZWdhdHRTdG10oGhhdXRoRGF0YVjFarm78N-aFvkduzO7sTL6-dF8eCxIJsbscOzuWNl-9SpFAAAAAAAAAAAAAAAAAAAAAAAAAAAAQQHyX6Jx7F2P3-_4BZldXSOO9wnvvv4NLR4XV1KIeyZjJ9IM4WFLVPWxaqQoEpY48CcRF5I82_tdbpXj2ciNEYskpQECAyYgASFYIE_9awy66uhXZ6hIzPAW2AzIrTMZ7kyC2jtZe0zuH_pOIlggFbNKhOSt8-prIx0snKRqcxULtc2u1rzUUf47g1PxTcU";

    const COSE_ES256: [u8; 77] = hex!(
        "A5"
        "01 02"
        "03 26"
        "20 01"
        "21 58 20   65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d"
        "22 58 20   1e52ed75701163f7f9e40ddf9f341b3dc9ba860af7e0ca7ca7e9eecd0084d19c"
    );

    fn synthetic_auth_data(flags: u8, counter: u32, with_ext: bool) -> AuthenticatorData {
        let acd = if flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
            Some(AttestedCredentialData {
                aaguid: hex!("cb69481e8ff7403993ec0a2729a154a8"),
                credential_id: vec![0xAA; 16],
                credential_pk: serde_cbor_2::from_slice(&COSE_ES256).unwrap(),
            })
        } else {
            None
        };
        let extensions = if with_ext {
            let mut m = BTreeMap::new();
            m.insert(Value::Text("credProtect".to_string()), Value::Integer(1));
            Some(Value::Map(m))
        } else {
            None
        };
        AuthenticatorData {
            rp_id_hash: crate::crypto::compute_sha256(b"example.com"),
            flags,
            counter,
            acd,
            extensions,
        }
    }

    #[test]
    fn decode_none_attestation_object() {
        let _ = tracing_subscriber::fmt::try_init();
        let bytes = Base64UrlSafeData::try_from(NONE_ATTESTATION_OBJECT).unwrap();
        let att_obj = decode_attestation_object(&bytes.0).unwrap();

        assert_eq!(att_obj.fmt, "none");
        assert_eq!(att_obj.att_stmt, Value::Map(BTreeMap::new()));
        assert_eq!(att_obj.auth_data_bytes.len(), 197);

        let ad = &att_obj.auth_data;
        assert_eq!(
            ad.rp_id_hash,
            crate::crypto::compute_sha256(b"webauthn.firstyear.id.au")
        );
        assert_eq!(ad.flags, 0x45);
        assert!(ad.user_present());
        assert!(ad.user_verified());
        assert_eq!(ad.counter, 0);
        assert!(ad.extensions.is_none());

        let acd = ad.acd.as_ref().unwrap();
        assert_eq!(
            format_aaguid(&acd.aaguid),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(acd.credential_id.len(), 65);
        assert!(COSEKey::try_from(&acd.credential_pk).is_ok());
    }

    #[test]
    fn short_authenticator_data_is_rejected() {
        let _ = tracing_subscriber::fmt::try_init();
        for len in 0..AUTHENTICATOR_DATA_MIN_LEN {
            let data = vec![0x41; len];
            let err = decode_authenticator_data(&data).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DecodeError);
        }
    }

    #[test]
    fn minimal_authenticator_data() {
        let mut data = vec![0u8; 32];
        data.push(FLAG_USER_PRESENT);
        data.extend_from_slice(&hex!("00000014"));
        let ad = decode_authenticator_data(&data).unwrap();
        assert!(ad.user_present());
        assert!(!ad.user_verified());
        assert_eq!(ad.counter, 20);
        assert!(ad.acd.is_none());

        // A trailing byte that no flag accounts for.
        data.push(0x00);
        assert!(matches!(
            decode_authenticator_data(&data),
            Err(FidoError::AuthenticatorDataTrailingBytes)
        ));
    }

    #[test]
    fn credential_id_length_past_end() {
        let mut data = vec![0u8; 32];
        data.push(FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA);
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&[0u8; 16]);
        // Claims 0xffff bytes of credential id but supplies four.
        data.extend_from_slice(&[0xff, 0xff, 1, 2, 3, 4]);
        let err = decode_authenticator_data(&data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn truncated_cose_key() {
        let ad = synthetic_auth_data(FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA, 1, false);
        let bytes = encode_authenticator_data(&ad).unwrap();
        let err = decode_authenticator_data(&bytes[..bytes.len() - 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn authenticator_data_encode_then_decode() {
        let ad = synthetic_auth_data(
            FLAG_USER_PRESENT
                | FLAG_USER_VERIFIED
                | FLAG_ATTESTED_CREDENTIAL_DATA
                | FLAG_EXTENSION_DATA,
            7,
            true,
        );
        let bytes = encode_authenticator_data(&ad).unwrap();
        assert_eq!(decode_authenticator_data(&bytes).unwrap(), ad);
    }

    #[test]
    fn inconsistent_flags_refuse_to_encode() {
        let mut ad = synthetic_auth_data(FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA, 1, false);
        ad.flags = FLAG_USER_PRESENT;
        assert!(encode_authenticator_data(&ad).is_err());
    }

    #[test]
    fn attestation_object_encode_then_decode_per_format() {
        let ad = synthetic_auth_data(FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA, 0, false);
        let auth_data_bytes = encode_authenticator_data(&ad).unwrap();
        let auth_data = decode_authenticator_data(&auth_data_bytes).unwrap();

        for fmt in [
            "none",
            "fido-u2f",
            "packed",
            "tpm",
            "android-key",
            "android-safetynet",
        ] {
            let mut stmt = BTreeMap::new();
            if fmt != "none" {
                stmt.insert(Value::Text("sig".to_string()), Value::Bytes(vec![1, 2, 3]));
                stmt.insert(Value::Text("alg".to_string()), Value::Integer(-7));
            }
            let att_obj = AttestationObject {
                fmt: fmt.to_string(),
                att_stmt: Value::Map(stmt),
                auth_data_bytes: auth_data_bytes.clone(),
                auth_data: auth_data.clone(),
            };
            let encoded = encode_attestation_object(&att_obj).unwrap();
            assert_eq!(decode_attestation_object(&encoded).unwrap(), att_obj);
        }
    }

    #[test]
    fn attestation_object_members_are_required() {
        let mut m = BTreeMap::new();
        m.insert(Value::Text("fmt".to_string()), Value::Text("none".to_string()));
        m.insert(Value::Text("attStmt".to_string()), Value::Map(BTreeMap::new()));
        let bytes = serde_cbor_2::to_vec(&Value::Map(m)).unwrap();
        assert!(matches!(
            decode_attestation_object(&bytes),
            Err(FidoError::AttestationObjectInvalid("authData"))
        ));

        let err = decode_attestation_object(&[0xff, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn aaguid_format() {
        assert_eq!(
            format_aaguid(&[0; 16]),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            format_aaguid(&hex!("08987058cadc4b81b6e130de50dcbe96")),
            "08987058-cadc-4b81-b6e1-30de50dcbe96"
        );
    }
}

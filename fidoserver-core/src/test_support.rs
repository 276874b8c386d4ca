//! Certificate fixtures generated at test time.

use openssl::asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Extension, X509Name, X509NameBuilder, X509};
use serde_cbor_2::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::encode_authenticator_data;
use crate::constants::*;
use crate::crypto::compute_sha256;
use crate::interface::*;

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub(crate) struct TestCa {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub(crate) fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub(crate) fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

pub(crate) fn cn_subject(cn: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    name.build()
}

/// A subject that satisfies packed attestation certificate requirements.
pub(crate) fn attestation_subject(cn: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COUNTRYNAME, "AU").unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Fidoserver Test")
        .unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, "Authenticator Attestation")
        .unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    name.build()
}

/// An FIDO AAGUID certificate extension.
pub(crate) fn aaguid_extension(aaguid: [u8; 16]) -> X509Extension {
    let oid = Asn1Object::from_str("1.3.6.1.4.1.45724.1.1.4").unwrap();
    let mut der = vec![0x04, 0x10];
    der.extend_from_slice(&aaguid);
    let value = Asn1OctetString::new_from_bytes(&der).unwrap();
    X509Extension::new_from_der(&oid, false, &value).unwrap()
}

fn next_serial() -> Asn1Integer {
    BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .unwrap()
        .to_asn1_integer()
        .unwrap()
}

fn window() -> (Asn1Time, Asn1Time) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    (
        Asn1Time::from_unix(now - 3600).unwrap(),
        Asn1Time::from_unix(now + 86400).unwrap(),
    )
}

pub(crate) fn make_ca(cn: &str, issuer: Option<&TestCa>) -> TestCa {
    let key = ec_key();
    let subject = cn_subject(cn);
    let (not_before, not_after) = window();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&next_serial()).unwrap();
    builder.set_subject_name(&subject).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&subject).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();

    let signer = issuer.map(|i| &i.key).unwrap_or(&key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();

    TestCa {
        cert: builder.build(),
        key,
    }
}

pub(crate) fn make_leaf(
    key: &PKey<Private>,
    subject: &X509Name,
    issuer: &TestCa,
    extensions: Vec<X509Extension>,
) -> X509 {
    let (not_before, not_after) = window();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&next_serial()).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder
        .set_issuer_name(issuer.cert.subject_name())
        .unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().build().unwrap())
        .unwrap();
    for ext in extensions {
        builder.append_extension(ext).unwrap();
    }
    builder.sign(&issuer.key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Authenticator data for a registration, and its transmitted bytes.
pub(crate) struct RegistrationData {
    pub auth_data: AuthenticatorData,
    pub bytes: Vec<u8>,
}

/// The COSE form of a P-256 public key.
pub(crate) fn cose_ec2(key: &PKey<Private>) -> Value {
    let ec = key.ec_key().unwrap();
    let mut ctx = BigNumContext::new().unwrap();
    let mut x = BigNum::new().unwrap();
    let mut y = BigNum::new().unwrap();
    ec.public_key()
        .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
        .unwrap();

    let mut m = BTreeMap::new();
    m.insert(Value::Integer(1), Value::Integer(2));
    m.insert(Value::Integer(3), Value::Integer(-7));
    m.insert(Value::Integer(-1), Value::Integer(1));
    m.insert(Value::Integer(-2), Value::Bytes(x.to_vec_padded(32).unwrap()));
    m.insert(Value::Integer(-3), Value::Bytes(y.to_vec_padded(32).unwrap()));
    Value::Map(m)
}

/// Registration authenticator data for `rp_id` carrying `key` as the credential.
pub(crate) fn registration_data_for(
    rp_id: &str,
    key: &PKey<Private>,
    aaguid: [u8; 16],
    credential_id: &[u8],
) -> RegistrationData {
    let auth_data = AuthenticatorData {
        rp_id_hash: compute_sha256(rp_id.as_bytes()),
        flags: FLAG_USER_PRESENT | FLAG_USER_VERIFIED | FLAG_ATTESTED_CREDENTIAL_DATA,
        counter: 0,
        acd: Some(AttestedCredentialData {
            aaguid,
            credential_id: credential_id.to_vec(),
            credential_pk: cose_ec2(key),
        }),
        extensions: None,
    };
    let bytes = encode_authenticator_data(&auth_data).unwrap();
    RegistrationData { auth_data, bytes }
}

pub(crate) fn registration_data(key: &PKey<Private>, aaguid: [u8; 16]) -> RegistrationData {
    registration_data_for("example.com", key, aaguid, &[0xC1; 32])
}

/// A DER ECDSA signature with SHA-256.
pub(crate) fn sign_es256(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.sign_oneshot_to_vec(data).unwrap()
}

/// A keymaster KeyDescription with a TEE enforced generated signing key.
pub(crate) fn android_key_description(challenge: &[u8], all_applications: bool) -> Vec<u8> {
    // purpose [1] SET { SIGN }, origin [702] GENERATED
    let mut tee = hex::decode("a1053103020102bf853e03020100").unwrap();
    if all_applications {
        // allApplications [600] NULL
        tee.extend(hex::decode("bf8458020500").unwrap());
    }

    let mut body = hex::decode("0201030a0101020104 0a0101".replace(' ', "")).unwrap();
    body.push(0x04);
    body.push(challenge.len() as u8);
    body.extend_from_slice(challenge);
    // uniqueId, empty softwareEnforced
    body.extend(hex::decode("04003000").unwrap());
    body.push(0x30);
    body.push(tee.len() as u8);
    body.extend(tee);

    let mut der = vec![0x30, body.len() as u8];
    der.extend(body);
    der
}

pub(crate) fn android_key_extension(challenge: &[u8], all_applications: bool) -> X509Extension {
    let oid = Asn1Object::from_str("1.3.6.1.4.1.11129.2.1.17").unwrap();
    let value =
        Asn1OctetString::new_from_bytes(&android_key_description(challenge, all_applications))
            .unwrap();
    X509Extension::new_from_der(&oid, false, &value).unwrap()
}

//! The `android-safetynet` attestation format.
//!
//! The statement carries a compact JWS produced by the SafetyNet attestation service. Its
//! header holds the signing chain, and its payload states the device integrity verdict
//! together with a nonce binding it to this registration.

use base64::{engine::general_purpose, Engine as _};
use compact_jwt::{Jws, JwsUnverified};
use openssl::x509;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::attestation::{stmt_bytes, stmt_field, StatementMap, VerificationContext};
use crate::constants::SAFETYNET_HOSTNAME;
use crate::crypto::{compute_sha256, subject_common_name};
use crate::error::{ErrorKind, FidoError, FidoResult};
use crate::time::unix_ms;

/// Reasons a SafetyNet attestation is refused.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum SafetyNetError {
    #[error("The SafetyNet response is malformed: {0}")]
    Malformed(&'static str),

    #[error("The SafetyNet response has no timestampMs")]
    TimestampMissing,

    #[error("The SafetyNet response at {timestamp_ms} is too old at {now_ms}")]
    Stale { timestamp_ms: u64, now_ms: u128 },

    #[error("The SafetyNet response at {timestamp_ms} is in the future at {now_ms}")]
    FromFuture { timestamp_ms: u64, now_ms: u128 },

    #[error("The SafetyNet certificate chain needs at least two certificates")]
    ChainTooShort,

    #[error("The SafetyNet certificate chain did not validate")]
    ChainUntrusted,

    #[error("The JWS signature is invalid")]
    SignatureInvalid,

    #[error("The SafetyNet nonce does not match the registration")]
    NonceMismatch,

    #[error("The SafetyNet leaf certificate is not issued to the attestation service")]
    HostnameMismatch,

    #[error("The device failed the ctsProfileMatch check")]
    CtsProfileMismatch,
}

impl SafetyNetError {
    /// The machine readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SafetyNetError::Malformed(_) | SafetyNetError::TimestampMissing => {
                ErrorKind::DecodeError
            }
            SafetyNetError::ChainTooShort | SafetyNetError::ChainUntrusted => {
                ErrorKind::UntrustedChain
            }
            SafetyNetError::Stale { .. }
            | SafetyNetError::FromFuture { .. }
            | SafetyNetError::SignatureInvalid
            | SafetyNetError::NonceMismatch
            | SafetyNetError::HostnameMismatch
            | SafetyNetError::CtsProfileMismatch => ErrorKind::SignatureInvalid,
        }
    }
}

/// The SafetyNet verdict carried in the JWS payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyNetClaims {
    /// When the service produced the verdict, in milliseconds since the unix epoch.
    pub timestamp_ms: Option<u64>,
    /// Standard base64 of the hash the relying party binds the verdict to.
    #[serde(default)]
    pub nonce: String,
    /// The package that requested the attestation.
    pub apk_package_name: Option<String>,
    /// Digests of the requesting package's signing certificates.
    #[serde(default)]
    pub apk_certificate_digest_sha256: Vec<String>,
    /// The device passed compatibility testing.
    #[serde(default)]
    pub cts_profile_match: bool,
    /// The device has not been tampered with.
    #[serde(default)]
    pub basic_integrity: bool,
    /// How the verdict was reached.
    pub evaluation_type: Option<String>,
}

/// A parsed `android-safetynet` attestation statement. The payload is only released by
/// [`SafetyNetStatement::verify`], once the chain and signature hold.
#[derive(Debug, Clone)]
pub struct SafetyNetStatement {
    /// The Google Play Services version that produced the response.
    pub ver: String,
    /// The JWS signing chain from the header, leaf first.
    pub x5c: Vec<x509::X509>,
    response: String,
}

fn parse_jws(token: &str) -> Result<JwsUnverified, SafetyNetError> {
    JwsUnverified::from_str(token).map_err(|e| {
        debug!(?e, "safetynet response is not a compact jws");
        SafetyNetError::Malformed("not a compact jws")
    })
}

impl TryFrom<&str> for SafetyNetStatement {
    type Error = SafetyNetError;

    /// Parse a compact JWS and its header chain. The `ver` of the result is empty.
    fn try_from(token: &str) -> Result<Self, Self::Error> {
        let x5c = parse_jws(token)?
            .get_x5c_chain()
            .map_err(|e| {
                debug!(?e, "safetynet x5c is invalid");
                SafetyNetError::Malformed("x5c certificate")
            })?
            .unwrap_or_default();

        Ok(SafetyNetStatement {
            ver: String::new(),
            x5c,
            response: token.to_string(),
        })
    }
}

impl TryFrom<&StatementMap> for SafetyNetStatement {
    type Error = FidoError;

    fn try_from(map: &StatementMap) -> Result<Self, Self::Error> {
        let ver_value =
            stmt_field(map, "ver").ok_or(FidoError::AttestationStatementVerMissing)?;
        let ver =
            cbor_try!(ver_value, Text).map_err(|_| FidoError::AttestationStatementVerInvalid)?;
        if ver.is_empty() {
            return Err(FidoError::AttestationStatementVerInvalid);
        }

        let response = stmt_bytes(
            map,
            "response",
            FidoError::AttestationStatementResponseMissing,
        )?;
        let token = std::str::from_utf8(&response)
            .map_err(|_| SafetyNetError::Malformed("response is not utf8"))?;

        let mut stmt = SafetyNetStatement::try_from(token)?;
        stmt.ver = ver.clone();
        trace!(ver = %stmt.ver, chain_len = stmt.x5c.len(), "parsed safetynet statement");
        Ok(stmt)
    }
}

fn check_timestamp(
    claims: &SafetyNetClaims,
    ctx: &VerificationContext<'_>,
) -> Result<(), SafetyNetError> {
    let timestamp_ms = claims.timestamp_ms.ok_or(SafetyNetError::TimestampMissing)?;
    let now_ms = unix_ms(ctx.clock.now());
    let ts = u128::from(timestamp_ms);

    if ts + ctx.config.safetynet_max_age().as_millis() < now_ms {
        return Err(SafetyNetError::Stale {
            timestamp_ms,
            now_ms,
        });
    }
    if ts > now_ms + ctx.config.safetynet_max_future_skew().as_millis() {
        return Err(SafetyNetError::FromFuture {
            timestamp_ms,
            now_ms,
        });
    }
    Ok(())
}

impl SafetyNetStatement {
    // https://w3c.github.io/webauthn/#sctn-android-safetynet-attestation
    pub(crate) fn verify(
        &self,
        auth_data_bytes: &[u8],
        client_data_hash: &[u8],
        ctx: &VerificationContext<'_>,
    ) -> FidoResult<SafetyNetClaims> {
        if self.x5c.len() < 2 {
            debug!(len = self.x5c.len(), "safetynet chain too short");
            return Err(SafetyNetError::ChainTooShort.into());
        }
        // The chain is anchored on its own last certificate, and must hold before the
        // signature is trusted.
        if !ctx.validator.validate_self_anchored(&self.x5c) {
            return Err(SafetyNetError::ChainUntrusted.into());
        }
        let leaf = &self.x5c[0];

        // Verify with the leaf of the chain that was just validated.
        let jws: Jws<SafetyNetClaims> =
            parse_jws(&self.response)?.validate_embeded().map_err(|e| {
                debug!(?e, "safetynet jws signature rejected");
                SafetyNetError::SignatureInvalid
            })?;
        let claims = jws.into_inner();
        trace!(?claims, "safetynet verdict");

        check_timestamp(&claims, ctx).map_err(|e| {
            debug!(?e, "safetynet timestamp rejected");
            e
        })?;

        let data_to_verify: Vec<u8> = auth_data_bytes
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();
        let expected_nonce = general_purpose::STANDARD.encode(compute_sha256(&data_to_verify));
        if claims.nonce != expected_nonce {
            debug!("safetynet nonce mismatch");
            return Err(SafetyNetError::NonceMismatch.into());
        }

        let common_name = subject_common_name(leaf);
        if common_name.as_deref() != Some(SAFETYNET_HOSTNAME) {
            debug!(?common_name, "safetynet leaf is not {}", SAFETYNET_HOSTNAME);
            return Err(SafetyNetError::HostnameMismatch.into());
        }

        if !claims.cts_profile_match {
            debug!("safetynet ctsProfileMatch is false");
            return Err(SafetyNetError::CtsProfileMismatch.into());
        }

        Ok(claims)
    }
}

//! Certificate chain and trust anchor validation.
//!
//! A chain is always ordered leaf first. Validation never errors: any structural,
//! cryptographic or trust failure is reported as `false` and logged, and callers decide
//! what that means for the ceremony.

use openssl::error::ErrorStack as OpenSSLErrorStack;
use openssl::{hash, stack, x509};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use uuid::Uuid;

use base64urlsafedata::Base64UrlSafeData;

use crate::error::FidoError;

/// A serialised trust anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialisableTrustAnchor {
    pub(crate) ca: Base64UrlSafeData,
    pub(crate) aaguids: BTreeSet<Uuid>,
}

/// A root certificate that attestation chains may validate to, and the authenticator
/// models it is trusted for.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "SerialisableTrustAnchor")]
pub struct TrustAnchor {
    /// The x509 root CA of the attestation chain.
    pub ca: x509::X509,
    /// If not empty, the set of AAGUIDs this anchor vouches for. Authenticators with other
    /// AAGUIDs that chain to this anchor are NOT trusted.
    pub aaguids: BTreeSet<Uuid>,
}

impl TryFrom<&TrustAnchor> for SerialisableTrustAnchor {
    type Error = OpenSSLErrorStack;

    fn try_from(anchor: &TrustAnchor) -> Result<Self, Self::Error> {
        Ok(SerialisableTrustAnchor {
            ca: Base64UrlSafeData(anchor.ca.to_der()?),
            aaguids: anchor.aaguids.clone(),
        })
    }
}

impl Serialize for TrustAnchor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SerialisableTrustAnchor::try_from(self)
            .map_err(|e| {
                error!(?e, "unable to encode trust anchor");
                S::Error::custom(e)
            })?
            .serialize(serializer)
    }
}

impl TryFrom<SerialisableTrustAnchor> for TrustAnchor {
    type Error = OpenSSLErrorStack;

    fn try_from(data: SerialisableTrustAnchor) -> Result<Self, Self::Error> {
        Ok(TrustAnchor {
            ca: x509::X509::from_der(&data.ca.0)?,
            aaguids: data.aaguids,
        })
    }
}

impl TryFrom<&[u8]> for TrustAnchor {
    type Error = OpenSSLErrorStack;

    fn try_from(pem: &[u8]) -> Result<Self, Self::Error> {
        Ok(TrustAnchor {
            ca: x509::X509::from_pem(pem)?,
            aaguids: Default::default(),
        })
    }
}

impl TrustAnchor {
    /// Create an anchor from a DER certificate, trusted for every AAGUID.
    pub fn new_from_der(data: &[u8]) -> Result<Self, OpenSSLErrorStack> {
        Ok(TrustAnchor {
            ca: x509::X509::from_der(data)?,
            aaguids: BTreeSet::default(),
        })
    }

    /// The key identifier of this anchor, the base64url SHA-256 digest of its certificate.
    pub fn get_kid(&self) -> Result<String, OpenSSLErrorStack> {
        certificate_kid(&self.ca)
    }

    /// Restrict this anchor to an additional AAGUID.
    pub fn insert_aaguid(&mut self, aaguid: Uuid) {
        self.aaguids.insert(aaguid);
    }

    /// Whether this anchor vouches for `aaguid`.
    pub fn permits_aaguid(&self, aaguid: &Uuid) -> bool {
        self.aaguids.is_empty() || self.aaguids.contains(aaguid)
    }
}

/// The set of anchors trusted for attestation, keyed by [`TrustAnchor::get_kid`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TrustAnchorList {
    /// The anchors trusted in this operation.
    pub cas: BTreeMap<String, TrustAnchor>,
}

impl TryFrom<TrustAnchor> for TrustAnchorList {
    type Error = OpenSSLErrorStack;

    fn try_from(anchor: TrustAnchor) -> Result<Self, Self::Error> {
        let mut new = Self::default();
        new.insert(anchor)?;
        Ok(new)
    }
}

impl TryFrom<&[(&[u8], Uuid)]> for TrustAnchorList {
    type Error = OpenSSLErrorStack;

    fn try_from(iter: &[(&[u8], Uuid)]) -> Result<Self, Self::Error> {
        let mut list = Self::default();
        for (der, aaguid) in iter {
            let ca = x509::X509::from_der(der)?;
            let kid = certificate_kid(&ca)?;
            list.cas
                .entry(kid)
                .or_insert_with(|| TrustAnchor {
                    ca,
                    aaguids: BTreeSet::default(),
                })
                .insert_aaguid(*aaguid);
        }
        Ok(list)
    }
}

impl TrustAnchorList {
    /// Determine if this list contains any anchors.
    pub fn is_empty(&self) -> bool {
        self.cas.is_empty()
    }

    /// Insert an anchor, replacing any anchor for the same certificate.
    pub fn insert(&mut self, anchor: TrustAnchor) -> Result<Option<TrustAnchor>, OpenSSLErrorStack> {
        let kid = anchor.get_kid()?;
        Ok(self.cas.insert(kid, anchor))
    }
}

/// Checks whether a certificate has been revoked by its issuer.
///
/// The checker is given the time left before the chain's deadline and is expected to
/// honour it. The validator stops waiting at that deadline, and treats a late answer as
/// a failed validation.
pub trait RevocationChecker: Send + Sync {
    /// `Ok(true)` if `cert` is revoked by `issuer`.
    fn is_revoked(
        &self,
        cert: &x509::X509,
        issuer: &x509::X509,
        timeout: Duration,
    ) -> Result<bool, FidoError>;
}

/// Options that change how chains are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOptions {
    /// Ignore validity windows.
    pub danger_disable_certificate_time_checks: bool,
    /// Check every non anchor certificate with the revocation checker.
    pub check_revocation: bool,
    /// The bound for revocation checks across a whole chain.
    pub revocation_timeout: Duration,
}

impl Default for ChainOptions {
    fn default() -> Self {
        ChainOptions {
            danger_disable_certificate_time_checks: false,
            check_revocation: false,
            revocation_timeout: Duration::from_secs(5),
        }
    }
}

/// PKIX path validation against configured or self asserted anchors.
#[derive(Clone, Default)]
pub struct TrustChainValidator {
    options: ChainOptions,
    revocation: Option<Arc<dyn RevocationChecker>>,
}

impl std::fmt::Debug for TrustChainValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustChainValidator")
            .field("options", &self.options)
            .field("revocation", &self.revocation.is_some())
            .finish()
    }
}

impl TrustChainValidator {
    /// A validator with the given options and no revocation checker.
    pub fn new(options: ChainOptions) -> Self {
        TrustChainValidator {
            options,
            revocation: None,
        }
    }

    /// Attach the revocation checker consulted when revocation checks are enabled.
    pub fn with_revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    /// Validate `chain` to one of the certificates in `anchors`.
    pub fn validate(&self, chain: &[x509::X509], anchors: &[x509::X509]) -> bool {
        self.verified_path(chain, anchors, false).is_some()
    }

    /// Validate `chain`, leaf first, to any anchor in `anchors`. Never errors, a chain
    /// that cannot be shown to be trusted is simply false.
    pub fn validate_chain(&self, chain: &[x509::X509], anchors: &TrustAnchorList) -> bool {
        self.trusted_anchor_for(chain, anchors).is_some()
    }

    /// Validate `chain` using its own last certificate as the anchor. The chain must
    /// contain at least the leaf and the anchor.
    pub fn validate_self_anchored(&self, chain: &[x509::X509]) -> bool {
        match chain.split_last() {
            Some((anchor, rest)) if !rest.is_empty() => self
                .verified_path(rest, std::slice::from_ref(anchor), true)
                .is_some(),
            _ => {
                debug!("self anchored chain needs a leaf and an anchor");
                false
            }
        }
    }

    /// Validate `chain` against a configured anchor list and return the anchor it reached.
    pub fn trusted_anchor_for<'a>(
        &self,
        chain: &[x509::X509],
        anchors: &'a TrustAnchorList,
    ) -> Option<&'a TrustAnchor> {
        if anchors.is_empty() {
            debug!("trust anchor list is empty");
            return None;
        }

        let roots: Vec<x509::X509> = anchors.cas.values().map(|a| a.ca.clone()).collect();
        let path = self.verified_path(chain, &roots, false)?;

        let root = path.last()?;
        let kid = match certificate_kid(root) {
            Ok(kid) => kid,
            Err(e) => {
                error!(?e, "unable to digest verified root");
                return None;
            }
        };

        let anchor = anchors.cas.get(&kid);
        if anchor.is_none() {
            debug!("verified root is not a configured anchor");
        }
        anchor
    }

    /// The verified path leaf to anchor, or None with the reason logged.
    fn verified_path(
        &self,
        chain: &[x509::X509],
        anchors: &[x509::X509],
        partial_chain: bool,
    ) -> Option<Vec<x509::X509>> {
        let path = match build_path(chain, anchors, &self.options, partial_chain) {
            Ok(path) => path?,
            Err(e) => {
                error!(?e, "openssl failure during chain validation");
                return None;
            }
        };

        if self.options.check_revocation && !self.check_revocation(&path) {
            return None;
        }

        Some(path)
    }

    fn check_revocation(&self, path: &[x509::X509]) -> bool {
        let checker = match &self.revocation {
            Some(checker) => checker.clone(),
            None => {
                error!("revocation checking is enabled but no checker is configured");
                return false;
            }
        };

        // The anchor itself is not checked.
        let pairs: Vec<(x509::X509, x509::X509)> = path
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let expected = pairs.len();

        // A single worker walks the path and one deadline bounds the whole walk. A checker
        // that overruns leaves at most that worker behind.
        let deadline = Instant::now() + self.options.revocation_timeout;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for (cert, issuer) in pairs {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let result = checker.is_revoked(&cert, &issuer, remaining);
                let done = !matches!(result, Ok(false));
                if tx.send(result).is_err() || done {
                    break;
                }
            }
        });

        for cert in path.iter().take(expected) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Ok(false)) => {}
                Ok(Ok(true)) => {
                    error!(subject = ?cert.subject_name(), "certificate is revoked");
                    return false;
                }
                Ok(Err(e)) => {
                    error!(?e, "revocation check failed");
                    return false;
                }
                Err(e) => {
                    error!(?e, "revocation checks did not complete in time");
                    return false;
                }
            }
        }
        true
    }
}

fn certificate_kid(cert: &x509::X509Ref) -> Result<String, OpenSSLErrorStack> {
    cert.digest(hash::MessageDigest::sha256())
        .map(|bytes| Base64UrlSafeData(bytes.to_vec()).to_string())
}

fn build_path(
    chain: &[x509::X509],
    anchors: &[x509::X509],
    options: &ChainOptions,
    partial_chain: bool,
) -> Result<Option<Vec<x509::X509>>, OpenSSLErrorStack> {
    let (leaf, intermediates) = match chain.split_first() {
        Some(split) => split,
        None => {
            debug!("empty certificate chain");
            return Ok(None);
        }
    };

    // Convert the chain to a stackref so that openssl can use it.
    let mut chain_stack = stack::Stack::new()?;
    for crt in intermediates.iter() {
        chain_stack.push(crt.clone())?;
    }

    // Create the x509 store that we will validate against.
    let mut ca_store = x509::store::X509StoreBuilder::new()?;

    let mut flags = x509::verify::X509VerifyFlags::empty();
    // In tests we may need to allow disabling time window validity.
    if options.danger_disable_certificate_time_checks {
        flags |= x509::verify::X509VerifyFlags::NO_CHECK_TIME;
    }
    // A self asserted anchor need not be self signed.
    if partial_chain {
        flags |= x509::verify::X509VerifyFlags::PARTIAL_CHAIN;
    }
    ca_store.set_flags(flags)?;

    for ca_crt in anchors {
        ca_store.add_cert(ca_crt.clone())?;
    }

    let ca_store = ca_store.build();

    let mut ca_ctx = x509::X509StoreContext::new()?;

    ca_ctx.init(&ca_store, leaf, &chain_stack, |ca_ctx_ref| {
        let valid = ca_ctx_ref.verify_cert()?;
        if !valid || ca_ctx_ref.error() != x509::X509VerifyResult::OK {
            debug!(
                error = ?ca_ctx_ref.error(),
                depth = ca_ctx_ref.error_depth(),
                "chain did not validate"
            );
            return Ok(None);
        }

        Ok(ca_ctx_ref
            .chain()
            .map(|verified| verified.iter().map(|c| c.to_owned()).collect()))
    })
}

/// The chain options a configuration asks for.
impl From<&crate::config::CoreConfig> for ChainOptions {
    fn from(config: &crate::config::CoreConfig) -> Self {
        ChainOptions {
            danger_disable_certificate_time_checks: config.danger_disable_certificate_time_checks,
            check_revocation: config.check_revocation,
            revocation_timeout: config.revocation_timeout(),
        }
    }
}

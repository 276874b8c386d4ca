//! The collaborators a ceremony reads from and writes to, and in-memory implementations
//! of each.
//!
//! The core never owns persistent state. Everything it learns is handed to these traits,
//! and everything it needs to know about previously registered credentials is asked of
//! them. Every method is scoped by a domain id (`did`).

use base64::{engine::general_purpose, Engine as _};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use openssl::x509;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::{FidoError, FidoResult};
use crate::interface::*;
use crate::session::PendingSession;
use fidoserver_proto::CollectedClientData;

pub use crate::trust::RevocationChecker;

/// A refusal by the relying party registration policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PolicyDenial(pub String);

impl From<PolicyDenial> for FidoError {
    fn from(denial: PolicyDenial) -> Self {
        FidoError::PolicyDenied(denial.0)
    }
}

/// Receives each credential a registration ceremony verified.
pub trait CredentialPersistence: Send + Sync {
    /// Persist a newly verified credential.
    fn persist(&self, did: u64, credential: &VerifiedCredential) -> FidoResult<()>;
}

/// Stores attestation certificates as a chain of keyed records.
pub trait CertificateStore: Send + Sync {
    /// Find a certificate by issuer distinguished name and serial number.
    fn lookup_by_issuer_serial(
        &self,
        did: u64,
        issuer_dn: &str,
        serial: &str,
    ) -> FidoResult<Option<CertificateRecord>>;

    /// Store `der`, or return the existing record's key if a certificate with the same
    /// issuer and serial is already stored.
    fn insert(&self, did: u64, der: &[u8], parent: Option<CertRef>) -> FidoResult<CertRef>;
}

/// Reads back a registered credential during authentication.
pub trait CredentialLookup: Send + Sync {
    /// The credential with this base64url id.
    fn lookup(&self, did: u64, credential_id: &str) -> FidoResult<Option<StoredCredential>>;
}

/// Relying party specific conditions on a registration.
pub trait RegistrationPolicy: Send + Sync {
    /// Accept or refuse the registration.
    fn apply(
        &self,
        session: &PendingSession,
        client_data: &CollectedClientData,
        attestation: &AttestationObject,
    ) -> Result<(), PolicyDenial>;
}

/// Records the counter accepted by an authentication ceremony.
pub trait CounterUpdate: Send + Sync {
    /// Persist `counter` for the credential, with where it was used.
    fn update_counter(
        &self,
        did: u64,
        credential_id: &str,
        counter: u32,
        location: &str,
    ) -> FidoResult<()>;
}

/// A policy that accepts every registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl RegistrationPolicy for AllowAllPolicy {
    fn apply(
        &self,
        _session: &PendingSession,
        _client_data: &CollectedClientData,
        _attestation: &AttestationObject,
    ) -> Result<(), PolicyDenial> {
        Ok(())
    }
}

/// A policy that only accepts authenticators with a listed AAGUID.
#[derive(Debug, Default, Clone)]
pub struct AaguidAllowListPolicy {
    allowed: BTreeSet<Uuid>,
}

impl AaguidAllowListPolicy {
    /// Allow the given AAGUIDs.
    pub fn new<I: IntoIterator<Item = Uuid>>(allowed: I) -> Self {
        AaguidAllowListPolicy {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl RegistrationPolicy for AaguidAllowListPolicy {
    fn apply(
        &self,
        _session: &PendingSession,
        _client_data: &CollectedClientData,
        attestation: &AttestationObject,
    ) -> Result<(), PolicyDenial> {
        let aaguid = attestation
            .auth_data
            .acd
            .as_ref()
            .map(|acd| Uuid::from_bytes(acd.aaguid))
            .ok_or_else(|| PolicyDenial("registration carries no aaguid".to_string()))?;

        if self.allowed.contains(&aaguid) {
            Ok(())
        } else {
            debug!(%aaguid, "aaguid is not allowed");
            Err(PolicyDenial(format!("aaguid {aaguid} is not allowed")))
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryCredential {
    stored: StoredCredential,
    registration: VerifiedCredential,
    last_used_location: Option<String>,
}

/// Credentials held in memory. Implements persistence, lookup and counter update.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: DashMap<(u64, String), MemoryCredential>,
}

impl MemoryCredentialStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate or deactivate a credential. Returns false if it does not exist.
    pub fn set_status(&self, did: u64, credential_id: &str, status: CredentialStatus) -> bool {
        match self.credentials.get_mut(&(did, credential_id.to_string())) {
            Some(mut entry) => {
                entry.stored.status = status;
                entry.registration.status = status;
                true
            }
            None => false,
        }
    }

    /// The registration record the credential was created from.
    pub fn registration(&self, did: u64, credential_id: &str) -> Option<VerifiedCredential> {
        self.credentials
            .get(&(did, credential_id.to_string()))
            .map(|entry| entry.registration.clone())
    }

    /// Where the credential last authenticated.
    pub fn last_used_location(&self, did: u64, credential_id: &str) -> Option<String> {
        self.credentials
            .get(&(did, credential_id.to_string()))
            .and_then(|entry| entry.last_used_location.clone())
    }

    /// The number of stored credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Determine if no credentials are stored.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialPersistence for MemoryCredentialStore {
    fn persist(&self, did: u64, credential: &VerifiedCredential) -> FidoResult<()> {
        let public_key_der = general_purpose::URL_SAFE_NO_PAD.decode(&credential.public_key)?;

        // The entry lock covers both the existence check and the insert.
        match self
            .credentials
            .entry((did, credential.credential_id.clone()))
        {
            Entry::Occupied(_) => {
                debug!(did, credential_id = %credential.credential_id, "duplicate credential");
                Err(FidoError::Collaborator(
                    "credential is already registered".to_string(),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(MemoryCredential {
                    stored: StoredCredential {
                        credential_id: credential.credential_id.clone(),
                        username: credential.username.clone(),
                        public_key_der,
                        counter: credential.counter,
                        status: credential.status,
                    },
                    registration: credential.clone(),
                    last_used_location: None,
                });
                Ok(())
            }
        }
    }
}

impl CredentialLookup for MemoryCredentialStore {
    fn lookup(&self, did: u64, credential_id: &str) -> FidoResult<Option<StoredCredential>> {
        Ok(self
            .credentials
            .get(&(did, credential_id.to_string()))
            .map(|entry| entry.stored.clone()))
    }
}

impl CounterUpdate for MemoryCredentialStore {
    fn update_counter(
        &self,
        did: u64,
        credential_id: &str,
        counter: u32,
        location: &str,
    ) -> FidoResult<()> {
        let mut entry = self
            .credentials
            .get_mut(&(did, credential_id.to_string()))
            .ok_or_else(|| FidoError::Collaborator("credential disappeared".to_string()))?;
        entry.stored.counter = counter;
        entry.last_used_location = Some(location.to_string());
        Ok(())
    }
}

/// Render a distinguished name as comma separated `short=value` pairs.
pub(crate) fn distinguished_name(name: &x509::X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("UNDEF");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A certificate serial number as upper case hex.
pub(crate) fn serial_hex(cert: &x509::X509Ref) -> FidoResult<String> {
    Ok(cert.serial_number().to_bn()?.to_hex_str()?.to_string())
}

/// Attestation certificates held in memory.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    by_issuer_serial: DashMap<(u64, String, String), CertificateRecord>,
    by_ref: DashMap<CertRef, CertificateRecord>,
    next_id: AtomicU64,
}

impl MemoryCertificateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The record stored under `cert_ref`.
    pub fn get(&self, cert_ref: &CertRef) -> Option<CertificateRecord> {
        self.by_ref.get(cert_ref).map(|r| r.clone())
    }

    /// The number of stored certificates.
    pub fn len(&self) -> usize {
        self.by_ref.len()
    }

    /// Determine if no certificates are stored.
    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn lookup_by_issuer_serial(
        &self,
        did: u64,
        issuer_dn: &str,
        serial: &str,
    ) -> FidoResult<Option<CertificateRecord>> {
        Ok(self
            .by_issuer_serial
            .get(&(did, issuer_dn.to_string(), serial.to_string()))
            .map(|r| r.clone()))
    }

    fn insert(&self, did: u64, der: &[u8], parent: Option<CertRef>) -> FidoResult<CertRef> {
        let cert = x509::X509::from_der(der)?;
        let issuer_dn = distinguished_name(cert.issuer_name());
        let subject_dn = distinguished_name(cert.subject_name());
        let serial = serial_hex(&cert)?;

        // The entry lock is held until the record exists, so concurrent inserts of one
        // certificate observe the same key.
        let record = self
            .by_issuer_serial
            .entry((did, issuer_dn.clone(), serial.clone()))
            .or_insert_with(|| {
                let cert_ref = CertRef {
                    did,
                    id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                };
                let record = CertificateRecord {
                    cert_ref,
                    issuer_dn,
                    serial,
                    subject_dn,
                    der: der.to_vec(),
                    parent,
                };
                trace!(?cert_ref, subject = %record.subject_dn, "storing certificate");
                self.by_ref.insert(cert_ref, record.clone());
                record
            });

        Ok(record.cert_ref)
    }
}

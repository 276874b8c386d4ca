//! Registration and authentication ceremonies.
//!
//! A [`CeremonyOrchestrator`] takes the JSON a client produced and the metadata the relying
//! party front end recorded, and walks it through every check in order. Any failure ends
//! the ceremony with a [`FidoError`]. The pending session is consumed as soon as the
//! challenge is resolved, so a failed ceremony can never be retried with the same
//! challenge.

use base64::{engine::general_purpose, Engine as _};
use openssl::x509;
use std::sync::Arc;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::attestation::{AttestationStatement, VerificationContext};
use crate::codec::{decode_attestation_object, format_aaguid};
use crate::config::CoreConfig;
use crate::constants::*;
use crate::counter::{CounterDecision, CounterPolicy};
use crate::crypto::{compute_sha256, verify_spki_signature};
use crate::error::{FidoError, FidoResult};
use crate::interface::*;
use crate::proto::{
    AuthenticationMetadata, AuthenticationRequest, AuthenticatorTransport, CollectedClientData,
    RegisterPublicKeyCredential, RegistrationMetadata,
};
use crate::session::{ChallengeDigest, ChallengeSessionStore, PendingSession};
use crate::store::{
    distinguished_name, serial_hex, AllowAllPolicy, CertificateStore, CounterUpdate,
    CredentialLookup, CredentialPersistence, MemoryCredentialStore, RegistrationPolicy,
    RevocationChecker,
};
use crate::time::{Clock, SystemClock};
use crate::trust::{ChainOptions, TrustAnchorList, TrustChainValidator};

/// Assembles a [`CeremonyOrchestrator`].
///
/// The credential persistence, credential lookup, counter update and certificate store
/// collaborators are required. The clock defaults to the system clock and the
/// registration policy to [`AllowAllPolicy`].
pub struct CeremonyOrchestratorBuilder {
    config: CoreConfig,
    sessions: Arc<ChallengeSessionStore>,
    anchors: TrustAnchorList,
    clock: Arc<dyn Clock>,
    persistence: Option<Arc<dyn CredentialPersistence>>,
    lookup: Option<Arc<dyn CredentialLookup>>,
    counters: Option<Arc<dyn CounterUpdate>>,
    certificates: Option<Arc<dyn CertificateStore>>,
    policy: Arc<dyn RegistrationPolicy>,
    revocation: Option<Arc<dyn RevocationChecker>>,
}

impl CeremonyOrchestratorBuilder {
    /// Start a builder. `sessions` is shared with whatever issues challenges.
    pub fn new(config: CoreConfig, sessions: Arc<ChallengeSessionStore>) -> Self {
        CeremonyOrchestratorBuilder {
            config,
            sessions,
            anchors: TrustAnchorList::default(),
            clock: Arc::new(SystemClock),
            persistence: None,
            lookup: None,
            counters: None,
            certificates: None,
            policy: Arc::new(AllowAllPolicy),
            revocation: None,
        }
    }

    /// The configured attestation trust anchors.
    pub fn trust_anchors(mut self, anchors: TrustAnchorList) -> Self {
        self.anchors = anchors;
        self
    }

    /// Replace the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where verified credentials are persisted.
    pub fn credential_persistence(mut self, persistence: Arc<dyn CredentialPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Where registered credentials are read back from.
    pub fn credential_lookup(mut self, lookup: Arc<dyn CredentialLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Where accepted signature counters are recorded.
    pub fn counter_update(mut self, counters: Arc<dyn CounterUpdate>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Use one in-memory store for persistence, lookup and counter updates.
    pub fn memory_credentials(self, store: Arc<MemoryCredentialStore>) -> Self {
        self.credential_persistence(store.clone())
            .credential_lookup(store.clone())
            .counter_update(store)
    }

    /// Where attestation certificates are stored.
    pub fn certificate_store(mut self, certificates: Arc<dyn CertificateStore>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// The relying party registration policy.
    pub fn registration_policy(mut self, policy: Arc<dyn RegistrationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The revocation checker consulted when `check_revocation` is configured.
    pub fn revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    /// Complete the construction of the orchestrator. Fails if a required collaborator
    /// was not supplied.
    pub fn build(self) -> FidoResult<CeremonyOrchestrator> {
        let missing = |what: &str| FidoError::Collaborator(format!("no {what} configured"));

        let persistence = self.persistence.ok_or_else(|| missing("credential persistence"))?;
        let lookup = self.lookup.ok_or_else(|| missing("credential lookup"))?;
        let counters = self.counters.ok_or_else(|| missing("counter update"))?;
        let certificates = self.certificates.ok_or_else(|| missing("certificate store"))?;

        if self.config.check_revocation && self.revocation.is_none() {
            warn!("revocation checking is enabled without a checker, every chain will fail");
        }

        let mut validator = TrustChainValidator::new(ChainOptions::from(&self.config));
        if let Some(checker) = self.revocation {
            validator = validator.with_revocation_checker(checker);
        }

        Ok(CeremonyOrchestrator {
            config: self.config,
            sessions: self.sessions,
            anchors: self.anchors,
            clock: self.clock,
            validator,
            persistence,
            lookup,
            counters,
            certificates,
            policy: self.policy,
        })
    }
}

/// Runs registration and authentication ceremonies against shared session and credential
/// state. It is `Send + Sync` and may be shared between request handlers with an `Arc`.
pub struct CeremonyOrchestrator {
    config: CoreConfig,
    sessions: Arc<ChallengeSessionStore>,
    anchors: TrustAnchorList,
    clock: Arc<dyn Clock>,
    validator: TrustChainValidator,
    persistence: Arc<dyn CredentialPersistence>,
    lookup: Arc<dyn CredentialLookup>,
    counters: Arc<dyn CounterUpdate>,
    certificates: Arc<dyn CertificateStore>,
    policy: Arc<dyn RegistrationPolicy>,
}

impl std::fmt::Debug for CeremonyOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyOrchestrator")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("anchors", &self.anchors.cas.len())
            .field("validator", &self.validator)
            .finish()
    }
}

fn require<'a>(field: &'static str, value: &'a str) -> FidoResult<&'a str> {
    if value.is_empty() {
        debug!(field, "required field is empty");
        Err(FidoError::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Decode unpadded base64url, refusing anything that would not re-encode to the same
/// text.
fn decode_b64url(field: &'static str, value: &str) -> FidoResult<Vec<u8>> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(require(field, value)?)
        .map_err(|e| {
            debug!(field, ?e, "field is not canonical base64url");
            FidoError::ParseBase64NotCanonical(field)
        })
}

fn decode_client_data(value: &str) -> FidoResult<(Vec<u8>, CollectedClientData)> {
    let bytes = decode_b64url("clientDataJSON", value)?;
    let client_data: CollectedClientData = serde_json::from_slice(&bytes)?;
    require("challenge", &client_data.challenge)?;
    decode_b64url("challenge", &client_data.challenge)?;
    require("origin", &client_data.origin)?;
    trace!(?client_data, "decoded client data");
    Ok((bytes, client_data))
}

/// Compare two origins by scheme, host and port. Origins without a host, such as android
/// apk key hashes, must be identical.
fn check_origin(client_origin: &str, expected_origin: &str) -> FidoResult<()> {
    let parse = |origin: &str| {
        Url::parse(origin).map_err(|e| {
            debug!(%origin, ?e, "origin is not a url");
            FidoError::InvalidOriginUrl
        })
    };
    let client = parse(client_origin)?.origin();
    let expected = parse(expected_origin)?.origin();

    let same = if client.is_tuple() && expected.is_tuple() {
        client == expected
    } else {
        client_origin == expected_origin
    };

    if same {
        Ok(())
    } else {
        debug!(%client_origin, %expected_origin, "origin mismatch");
        Err(FidoError::InvalidRPOrigin)
    }
}

fn check_username(session: &PendingSession, username: &str) -> FidoResult<()> {
    if session.username.to_lowercase() == username.to_lowercase() {
        Ok(())
    } else {
        debug!(expected = %session.username, %username, "username mismatch");
        Err(FidoError::UsernameMismatch)
    }
}

fn transport_hint(transports: Option<&[AuthenticatorTransport]>) -> String {
    match transports {
        Some(t) if !t.is_empty() => t
            .iter()
            .map(|t| t.hint_token())
            .collect::<Vec<_>>()
            .join("_"),
        _ => DEFAULT_TRANSPORT_HINT.to_string(),
    }
}

impl CeremonyOrchestrator {
    /// Take the pending session for a challenge and check the user and origin against
    /// it.
    fn resolve_session(
        &self,
        client_data: &CollectedClientData,
        username: &str,
        origin: &str,
    ) -> FidoResult<PendingSession> {
        let digest = ChallengeDigest::of(&client_data.challenge);
        let session = self.sessions.take(&digest, self.clock.now())?;
        check_username(&session, username)?;
        check_origin(&client_data.origin, origin)?;
        Ok(session)
    }

    /// Store the chain root-most first, so each record can name its issuer. Returns the
    /// leaf's reference.
    fn store_chain(&self, chain: &[x509::X509]) -> FidoResult<Option<CertRef>> {
        let did = self.config.domain_id;
        let mut parent = None;
        for cert in chain.iter().rev() {
            let issuer_dn = distinguished_name(cert.issuer_name());
            let serial = serial_hex(cert)?;
            let cert_ref = match self
                .certificates
                .lookup_by_issuer_serial(did, &issuer_dn, &serial)?
            {
                Some(existing) => existing.cert_ref,
                None => self.certificates.insert(did, &cert.to_der()?, parent)?,
            };
            parent = Some(cert_ref);
        }
        Ok(parent)
    }

    /// Verify a registration response and persist the resulting credential.
    #[instrument(level = "debug", skip_all)]
    pub fn register(
        &self,
        response_json: &str,
        metadata_json: &str,
    ) -> FidoResult<VerifiedCredential> {
        // Envelope.
        let reg: RegisterPublicKeyCredential = serde_json::from_str(response_json)?;
        if reg.type_ != PUBLIC_KEY_CREDENTIAL_TYPE {
            debug!(type_ = %reg.type_, "credential type is not public-key");
            return Err(FidoError::InvalidCredentialType);
        }
        let raw_id = decode_b64url("rawId", &reg.raw_id)?;
        decode_b64url("id", &reg.id)?;
        if reg.id != reg.raw_id {
            return Err(FidoError::CredentialIdMismatch);
        }
        let att_obj_bytes = decode_b64url("attestationObject", &reg.response.attestation_object)?;

        // Client data.
        let (client_data_bytes, client_data) =
            decode_client_data(&reg.response.client_data_json)?;
        if client_data.type_ != CLIENT_DATA_TYPE_CREATE {
            debug!(type_ = %client_data.type_, "client data is not a registration");
            return Err(FidoError::InvalidClientDataType);
        }

        let metadata: RegistrationMetadata = serde_json::from_str(metadata_json)?;
        require("origin", &metadata.origin)?;
        require("username", &metadata.username)?;
        require("createLocation", &metadata.create_location)?;

        // The session is gone from here on, whatever the outcome.
        let session = self.resolve_session(&client_data, &metadata.username, &metadata.origin)?;

        // Attestation object.
        let att_obj = decode_attestation_object(&att_obj_bytes)?;
        let acd = att_obj
            .auth_data
            .acd
            .as_ref()
            .ok_or(FidoError::MissingAttestationCredentialData)?;
        if acd.credential_id != raw_id {
            debug!("attested credential id is not the rawId");
            return Err(FidoError::CredentialIdMismatch);
        }
        if let Some(rp_id) = self.config.rp_id.as_deref() {
            if att_obj.auth_data.rp_id_hash != compute_sha256(rp_id.as_bytes()) {
                debug!(%rp_id, "rpIdHash mismatch");
                return Err(FidoError::InvalidRPIDHash);
            }
        }
        if self.config.require_user_presence && !att_obj.auth_data.user_present() {
            return Err(FidoError::UserNotPresent);
        }

        self.policy.apply(&session, &client_data, &att_obj)?;

        // Statement.
        let client_data_hash = compute_sha256(&client_data_bytes);
        let statement = AttestationStatement::parse(&att_obj.fmt, &att_obj.att_stmt)?;
        let ctx = VerificationContext {
            config: &self.config,
            clock: self.clock.as_ref(),
            validator: &self.validator,
        };
        let verified = statement.verify(
            &att_obj.auth_data,
            &att_obj.auth_data_bytes,
            &client_data_hash,
            &ctx,
        )?;
        debug!(format = ?statement.format(), attestation_type = ?verified.attestation_type, "attestation verified");

        // Chain trust.
        let aaguid = Uuid::from_bytes(acd.aaguid);
        if !verified.chain.is_empty()
            && (!self.anchors.is_empty() || self.config.require_trusted_attestation)
        {
            let anchor = self
                .validator
                .trusted_anchor_for(&verified.chain, &self.anchors)
                .ok_or_else(|| {
                    debug!("attestation chain is not trusted");
                    FidoError::AttestationTrustFailure
                })?;
            if !anchor.permits_aaguid(&aaguid) {
                debug!(%aaguid, "trust anchor does not permit aaguid");
                return Err(FidoError::AttestationAaguidNotTrusted);
            }
        }
        let attestation_cert_ref = self.store_chain(&verified.chain)?;

        // Credential.
        let flags = RegistrationFlags {
            user_present: att_obj.auth_data.user_present(),
            user_verified: att_obj.auth_data.user_verified(),
            kty: verified.credential_key.key_type_id(),
            alg: i128::from(verified.credential_key.type_),
            display_name: session.display_name.clone(),
            icon: session.icon.clone(),
        };

        let credential = VerifiedCredential {
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            credential_id: general_purpose::URL_SAFE_NO_PAD.encode(&acd.credential_id),
            public_key: general_purpose::URL_SAFE_NO_PAD
                .encode(verified.credential_key.to_spki_der()?),
            origin: metadata.origin,
            transport_hint: transport_hint(reg.response.transports.as_deref()),
            attestation_cert_ref,
            attestation_type: verified.attestation_type,
            counter: att_obj.auth_data.counter,
            aaguid: format_aaguid(&acd.aaguid),
            registration_flags: general_purpose::URL_SAFE.encode(serde_json::to_vec(&flags)?),
            create_location: metadata.create_location,
            fido_protocol: FIDO_PROTOCOL_VERSION.to_string(),
            status: CredentialStatus::Active,
        };

        self.persistence
            .persist(self.config.domain_id, &credential)?;
        info!(
            username = %credential.username,
            credential_id = %credential.credential_id,
            aaguid = %credential.aaguid,
            "registered credential"
        );
        Ok(credential)
    }

    /// Verify an authentication response and record the new signature counter.
    #[instrument(level = "debug", skip_all)]
    pub fn authenticate(
        &self,
        request_json: &str,
        metadata_json: &str,
    ) -> FidoResult<AuthenticationOutcome> {
        let request: AuthenticationRequest = serde_json::from_str(request_json)?;
        decode_b64url("keyHandle", &request.key_handle)?;
        let signature_data = decode_b64url("signatureData", &request.signature_data)?;

        let (client_data_bytes, client_data) = decode_client_data(&request.client_data_json)?;
        if client_data.type_ != CLIENT_DATA_TYPE_GET && client_data.type_ != CLIENT_DATA_TYPE_U2F_GET
        {
            debug!(type_ = %client_data.type_, "client data is not an assertion");
            return Err(FidoError::InvalidClientDataType);
        }

        let metadata: AuthenticationMetadata = serde_json::from_str(metadata_json)?;
        require("origin", &metadata.origin)?;
        require("username", &metadata.username)?;
        require("lastUsedLocation", &metadata.last_used_location)?;

        let session = self.resolve_session(&client_data, &metadata.username, &metadata.origin)?;

        let did = self.config.domain_id;
        let stored = self
            .lookup
            .lookup(did, &request.key_handle)?
            .ok_or_else(|| {
                debug!(key_handle = %request.key_handle, "unknown credential");
                FidoError::CredentialNotFound
            })?;
        if stored.status != CredentialStatus::Active {
            debug!(credential_id = %stored.credential_id, "credential is inactive");
            return Err(FidoError::CredentialInactive);
        }
        check_username(&session, &stored.username)?;

        // userPresence(1) · counter(4) · signature
        if signature_data.len() <= 5 {
            debug!(len = signature_data.len(), "signature data too short");
            return Err(FidoError::SignatureDataInvalid);
        }
        let (header, signature) = signature_data.split_at(5);
        let user_presence = header[0];
        let counter = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

        let app_id = match self.config.app_id_or_rp_id() {
            Some(app_id) => app_id.to_string(),
            None => Url::parse(&metadata.origin)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .ok_or(FidoError::InvalidOriginUrl)?,
        };

        let mut tbs = Vec::with_capacity(32 + 1 + 4 + 32);
        tbs.extend_from_slice(&compute_sha256(app_id.as_bytes()));
        tbs.push(user_presence);
        tbs.extend_from_slice(&counter.to_be_bytes());
        tbs.extend_from_slice(&compute_sha256(&client_data_bytes));

        if !verify_spki_signature(&stored.public_key_der, signature, &tbs)? {
            debug!(credential_id = %stored.credential_id, "assertion signature invalid");
            return Err(FidoError::AuthenticationSignatureInvalid);
        }

        let user_present = user_presence & FLAG_USER_PRESENT != 0;
        if self.config.require_user_presence && !user_present {
            return Err(FidoError::UserNotPresent);
        }

        let counter = match CounterPolicy::check(stored.counter, counter)? {
            CounterDecision::Advance(counter) => {
                self.counters.update_counter(
                    did,
                    &stored.credential_id,
                    counter,
                    &metadata.last_used_location,
                )?;
                counter
            }
            CounterDecision::Unsupported => stored.counter,
        };

        info!(
            username = %stored.username,
            credential_id = %stored.credential_id,
            counter,
            "authenticated credential"
        );
        Ok(AuthenticationOutcome {
            credential_id: stored.credential_id,
            counter,
            user_present,
            user_verified: user_presence & FLAG_USER_VERIFIED != 0,
        })
    }
}

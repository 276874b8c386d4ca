//! fidoserver-core - the verification core of a FIDO2 / U2F relying party.
//!
//! Given a client registration or authentication response, this crate decides whether it
//! is cryptographically genuine, bound to a challenge the relying party issued, issued by
//! an authenticator the relying party trusts, and not a replay or a clone.
//!
//! The entry point is [`CeremonyOrchestrator`]. It is assembled from a [`CoreConfig`], a
//! shared [`ChallengeSessionStore`], a [`TrustAnchorList`] and the storage collaborators in
//! [`store`]. Everything it emits to the outside world passes through those collaborator
//! traits, so persistence and directory lookups stay the embedder's concern.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
// #![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

mod constants;

pub mod attestation;
pub mod ceremony;
pub mod codec;
pub mod config;
pub mod counter;
pub mod crypto;
pub mod error;
pub mod interface;
pub mod safetynet;
pub mod session;
pub mod store;
pub mod time;
pub mod tpm;
pub mod trust;

#[cfg(test)]
mod test_support;

/// Protocol bindings
pub mod proto {
    pub use crate::interface::*;
    pub use base64urlsafedata::Base64UrlSafeData;
    pub use fidoserver_proto::*;
}

pub use crate::attestation::{AttestationFormat, AttestationStatement};
pub use crate::ceremony::{CeremonyOrchestrator, CeremonyOrchestratorBuilder};
pub use crate::config::CoreConfig;
pub use crate::counter::{CounterDecision, CounterPolicy};
pub use crate::error::{ErrorKind, FidoError, FidoResult};
pub use crate::session::{ChallengeDigest, ChallengeSessionStore, PendingSession};
pub use crate::trust::{TrustAnchor, TrustAnchorList, TrustChainValidator};

//! Signature counter anti-clone rule.

use crate::error::{FidoError, FidoResult};

/// What to do with a received signature counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// The authenticator does not implement a counter. Nothing is persisted.
    Unsupported,
    /// Persist this new counter.
    Advance(u32),
}

/// The signature counter policy.
///
/// An authenticator that keeps a counter must present a strictly larger value on every
/// assertion. A counter that stands still or goes backwards means two devices may hold
/// the same credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterPolicy;

impl CounterPolicy {
    /// Compare the `received` counter with the `stored` one.
    pub fn check(stored: u32, received: u32) -> FidoResult<CounterDecision> {
        if stored == 0 && received == 0 {
            trace!("authenticator does not support a counter");
            Ok(CounterDecision::Unsupported)
        } else if received > stored {
            Ok(CounterDecision::Advance(received))
        } else {
            error!(
                stored,
                received, "signature counter did not advance, possible cloned authenticator"
            );
            Err(FidoError::CounterRegression { stored, received })
        }
    }
}

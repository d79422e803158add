//! Correlation tokens tying a request to its eventual result.
//!
//! A token packs a 16-bit process-local salt above a 48-bit sequence number.
//! The salt keeps tokens from two bridge instances (or two runs of the
//! process) from looking alike in backend logs; uniqueness within a bridge
//! comes from the sequence alone.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use log::error;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

const SEQUENCE_BITS: u32 = 48;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Opaque identifier of one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    /// Rebuild a token from the value a transport carried over the wire.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn salt(self) -> u16 {
        (self.0 >> SEQUENCE_BITS) as u16
    }

    pub fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}-{}", self.salt(), self.sequence())
    }
}

/// Hands out tokens from a monotonically increasing sequence.
///
/// Running off the end of the sequence space is not wrapped around: the
/// allocator stays exhausted and every later call fails.
#[derive(Debug)]
pub(crate) struct TokenAllocator {
    salt: u16,
    next: u64,
    exhausted: bool,
}

impl TokenAllocator {
    pub(crate) fn new() -> Self {
        Self::with_salt(process_salt())
    }

    pub(crate) fn with_salt(salt: u16) -> Self {
        Self {
            salt,
            next: 1,
            exhausted: false,
        }
    }

    /// Allocator whose next sequence number is `next` (used to exercise exhaustion).
    #[cfg(test)]
    pub(crate) fn starting_at(salt: u16, next: u64) -> Self {
        Self {
            salt,
            next,
            exhausted: false,
        }
    }

    pub(crate) fn allocate(&mut self) -> Result<CorrelationToken, BridgeError> {
        if self.exhausted || self.next > SEQUENCE_MASK {
            if !self.exhausted {
                error!(
                    target: "inference_bridge::token",
                    "Correlation token space exhausted (salt {:04x}); pending calls are leaking",
                    self.salt
                );
                self.exhausted = true;
            }
            return Err(BridgeError::TokenExhaustion {
                issued: self.next - 1,
            });
        }

        let token = CorrelationToken((u64::from(self.salt) << SEQUENCE_BITS) | self.next);
        self.next += 1;
        Ok(token)
    }
}

fn process_salt() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let mixed = std::process::id().rotate_left(16) ^ nanos;
    (mixed ^ (mixed >> 16)) as u16
}

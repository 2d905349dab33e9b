//! Content-derived opportunity fingerprints for de-duplication
//!
//! A fingerprint is a stable 128-bit hash of (chain, sorted pool set, loan
//! token, loan amount bucketed to 1% granularity, quantized epoch). Two
//! opportunities over the same pools at nearly the same size in the same
//! epoch collapse to one fingerprint.

use alloy::primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::u256_to_f64;

/// Geometric bucket base: each bucket spans 1% of loan size
const BUCKET_BASE: f64 = 1.01;

/// Stable 128-bit opportunity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u128);

impl Fingerprint {
    /// Compute the fingerprint for an opportunity shape
    ///
    /// `epoch_bucket` is the scan epoch already quantized by the caller
    /// (epoch_ms / fingerprint_cooldown_ms).
    pub fn compute(
        chain_id: u64,
        pools: &[Address],
        loan_token: Address,
        loan_amount: U256,
        epoch_bucket: u64,
    ) -> Self {
        let mut sorted: Vec<Address> = pools.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut bytes = Vec::with_capacity(8 + sorted.len() * 20 + 20 + 8 + 8);
        bytes.extend_from_slice(&chain_id.to_be_bytes());
        for pool in &sorted {
            bytes.extend_from_slice(pool.as_slice());
        }
        bytes.extend_from_slice(loan_token.as_slice());
        bytes.extend_from_slice(&amount_bucket(loan_amount).to_be_bytes());
        bytes.extend_from_slice(&epoch_bucket.to_be_bytes());

        let digest = keccak256(&bytes);
        let mut high = [0u8; 16];
        high.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(high))
    }

    /// Render as a 32-char lowercase hex string (wire format)
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Quantize a loan amount to a geometric 1% bucket index
fn amount_bucket(amount: U256) -> i64 {
    let value = u256_to_f64(amount);
    if value <= 0.0 {
        return 0;
    }
    (value.ln() / BUCKET_BASE.ln()).floor() as i64
}

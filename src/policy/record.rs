//! Policy record type and its fixed binary layout
//!
//! A policy is stored as exactly 40 bytes:
//!
//! ```text
//! +------------------+
//! | Payment Hash     | (32 bytes, verbatim)
//! +------------------+
//! | Fee              | (u64 BE)
//! +------------------+
//! ```
//!
//! There is no length prefix and no padding. The stored value repeats the
//! key in its first 32 bytes; that redundancy is part of the on-disk format.

use std::fmt;
use std::io::{self, Read, Write};

use super::errors::{PolicyError, PolicyResult};

/// Length of a payment hash in bytes.
pub const PAYMENT_HASH_LEN: usize = 32;

/// Length of an encoded policy in bytes.
pub const ENCODED_POLICY_LEN: usize = PAYMENT_HASH_LEN + 8;

/// 32-byte identifier of a payment. Primary key of the policies bucket.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PaymentHash([u8; PAYMENT_HASH_LEN]);

impl PaymentHash {
    /// Wraps raw hash bytes.
    #[inline]
    pub const fn new(bytes: [u8; PAYMENT_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes, as used for the bucket key.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; PAYMENT_HASH_LEN] {
        &self.0
    }
}

impl From<[u8; PAYMENT_HASH_LEN]> for PaymentHash {
    fn from(bytes: [u8; PAYMENT_HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PaymentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", self)
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Amount in thousandths of a satoshi.
///
/// Opaque to this crate beyond its 8-byte big-endian encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MilliSatoshi(u64);

impl MilliSatoshi {
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for MilliSatoshi {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MilliSatoshi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mSAT", self.0)
    }
}

/// A fee policy attached to a payment hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Policy {
    /// Primary key. Never recomputed from other fields.
    pub payment_hash: PaymentHash,
    /// Fee charged for the payment.
    pub fee: MilliSatoshi,
}

impl Policy {
    /// Create a new policy
    pub fn new(payment_hash: PaymentHash, fee: MilliSatoshi) -> Self {
        Self { payment_hash, fee }
    }

    /// Writes the 40-byte encoding to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.payment_hash.as_bytes())?;
        w.write_all(&self.fee.to_be_bytes())?;
        Ok(())
    }

    /// Reads one policy from `r`, consuming exactly 40 bytes.
    ///
    /// Returns `TruncatedInput` if the stream ends early.
    pub fn read_from<R: Read>(r: &mut R) -> PolicyResult<Self> {
        let mut hash = [0u8; PAYMENT_HASH_LEN];
        read_exact_or_truncated(r, &mut hash)?;

        let mut scratch = [0u8; 8];
        read_exact_or_truncated(r, &mut scratch)?;

        Ok(Self {
            payment_hash: PaymentHash::new(hash),
            fee: MilliSatoshi::from_be_bytes(scratch),
        })
    }

    /// Serialize to the fixed on-disk layout.
    pub fn to_bytes(&self) -> [u8; ENCODED_POLICY_LEN] {
        let mut buf = [0u8; ENCODED_POLICY_LEN];
        buf[..PAYMENT_HASH_LEN].copy_from_slice(self.payment_hash.as_bytes());
        buf[PAYMENT_HASH_LEN..].copy_from_slice(&self.fee.to_be_bytes());
        buf
    }

    /// Encode into a freshly allocated buffer through the stream encoder.
    ///
    /// This is the path used before opening a write transaction, so any
    /// encoding failure surfaces before the store is touched.
    pub fn encode(&self) -> PolicyResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(ENCODED_POLICY_LEN);
        self.write_to(&mut buf).map_err(PolicyError::Encode)?;
        Ok(buf)
    }

    /// Deserialize from a stored value. Trailing bytes are ignored.
    pub fn from_bytes(data: &[u8]) -> PolicyResult<Self> {
        let mut cursor = data;
        Self::read_from(&mut cursor)
    }
}

fn read_exact_or_truncated<R: Read>(r: &mut R, buf: &mut [u8]) -> PolicyResult<()> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            PolicyError::TruncatedInput
        } else {
            PolicyError::Decode(e)
        }
    })
}

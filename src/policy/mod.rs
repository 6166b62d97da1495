//! Policy storage subsystem
//!
//! Holds fee policies keyed by payment hash in a single bucket of the
//! embedded engine.
//!
//! # Design Principles
//!
//! - Fixed 40-byte records, no framing
//! - Encode before any write transaction is opened
//! - Last write wins for the same payment hash
//! - Bulk reset drops and recreates the bucket atomically
//! - Engine errors pass through unchanged

mod errors;
mod record;
mod store;

pub use errors::{PolicyError, PolicyResult, Severity};
pub use record::{MilliSatoshi, PaymentHash, Policy, ENCODED_POLICY_LEN, PAYMENT_HASH_LEN};
pub use store::PolicyStore;

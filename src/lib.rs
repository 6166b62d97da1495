//! policydb - durable storage of payment fee policies
//!
//! ```no_run
//! use policydb::{MilliSatoshi, PaymentHash, Policy, PolicyStore, StoreConfig};
//!
//! let store = PolicyStore::open(StoreConfig::new("policies.redb"))?;
//! let policy = Policy::new(PaymentHash::new([1; 32]), MilliSatoshi::new(101));
//!
//! store.insert(&policy)?;
//! assert_eq!(store.lookup(&policy.payment_hash)?, policy);
//! # Ok::<(), policydb::PolicyError>(())
//! ```

pub mod config;
pub mod engine;
pub mod policy;

pub use config::{BatchConfig, ConfigError, StoreConfig};
pub use policy::{MilliSatoshi, PaymentHash, Policy, PolicyError, PolicyResult, PolicyStore};

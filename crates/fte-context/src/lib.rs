//! Fact Engine Context
//!
//! Structured context values and their canonical fingerprints.
//!
//! # Core Concepts
//!
//! - [`Value`]: structured value (numbers, text, dates, decimals, collections)
//! - [`Context`]: string-keyed mapping a fact is resolved against
//! - [`Normalizer`]: canonicalizes a context into a [`CanonicalForm`]
//! - [`Fingerprint`]: 32-byte Blake3 digest of a canonical form
//!
//! # Example
//!
//! ```rust
//! use fte_context::{normalize, fingerprint, Context};
//!
//! let a = Context::new().with("account", "A1").with("year", 2024_i64);
//! let b = Context::new().with("year", 2024_i64).with("account", "A1");
//!
//! let fa = fingerprint(&normalize(&a).unwrap());
//! let fb = fingerprint(&normalize(&b).unwrap());
//! assert_eq!(fa, fb);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod fingerprint;
mod normalize;
mod value;

pub use error::{FingerprintError, NormalizeError};
pub use fingerprint::Fingerprint;
pub use normalize::{
    canonical_decimal, canonical_float, canonical_timestamp, fingerprint, normalize,
    CanonicalForm, Normalizer, DEFAULT_MAX_DEPTH, DEFAULT_TRANSIENT_KEYS,
};
pub use value::{Context, Value};

/// Re-exported so downstream crates agree on the decimal type
pub use rust_decimal::Decimal;

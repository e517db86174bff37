//! Pure payload decoding and event normalization.
//!
//! Adapters hand raw bytes plus routing metadata to the [`Normalizer`],
//! which decodes them with the configured [`PayloadFormat`] parser and
//! produces canonical [`inflow_core::IngestionEvent`] records. No I/O
//! happens here; a failed normalization is an error value, never a panic.

pub mod error;
pub mod format;
pub mod normalizer;
pub mod syslog;

pub use error::NormalizeError;
pub use format::{decode, lookup_path, sha256_hex, PayloadFormat};
pub use normalizer::{Normalizer, NormalizerOptions, RawEvent};

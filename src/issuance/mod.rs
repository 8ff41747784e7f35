//! This module contains the implementation of the `issuance` module.
//!
//! The `issuance` module signs mobile security objects over issuer namespaces,
//! and lets a reader check what it received against them.
pub mod mdoc;

pub use mdoc::{verify_issuer_auth, verify_issuer_signed, verify_item_digests, Mdoc, PreparedMdoc};

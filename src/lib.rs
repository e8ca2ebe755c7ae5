// src/lib.rs

//! Component version transfer
//!
//! Replicates component versions, together with the versions they
//! reference and optionally the artifacts they describe, from one
//! repository into another.
//!
//! # Architecture
//!
//! - Descriptors: signed metadata of a component version; signatures cover
//!   a normalised projection, so access specs and volatile labels may change
//! - Policies: pluggable decisions on what to follow and what to copy by
//!   value (standard flags, transfer scripts, external plugins)
//! - Orchestrator: depth-first traversal with a per-transfer closure,
//!   equivalence classification and merge of an existing target version
//! - Copy engine: bounded worker pool per version for blob copies

pub mod config;
pub mod descriptor;
mod error;
pub mod hash;
pub mod merge;
pub mod policy;
pub mod printer;
pub mod repository;
pub mod signing;
pub mod transfer;

pub use config::TransferConfig;
pub use descriptor::{
    AccessSpec, ComponentDescriptor, ComponentVersionId, DigestSpec, EqualState, Label, Labels,
    Reference, Resource, Signature, Source,
};
pub use error::{Error, ErrorList, Result};
pub use hash::HashAlgorithm;
pub use policy::{TransferOption, TransferPolicy, new_transfer_handler};
pub use printer::{Printer, SharedPrinter};
pub use repository::{ComponentVersionAccess, Repository};
pub use signing::{SigningKeyPair, verify_descriptor};
pub use transfer::{Transfer, TransferClosure, transfer, transfer_version};

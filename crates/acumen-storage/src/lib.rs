//! Acumen Storage - store abstractions for the assessment engine
//!
//! The engine talks to durable state only through the traits in this crate.
//! `InMemoryStorage` is the deterministic, test-friendly reference backend;
//! production deployments supply a transactional implementation of the same
//! traits.

#![deny(unsafe_code)]

mod error;
mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use traits::{
    AssessmentStore, CertificateStore, EngineStorage, ProgressionStore, QuestionPool,
};

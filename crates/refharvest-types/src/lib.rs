#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-types** – Shared primitive data structures for the reference
//! harvesting orchestrator.
//!
//! This crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It makes no assumptions about I/O, persistence, or messaging transport -
//! those concerns belong to `refharvest-store`, `refharvest-broker`, and the
//! crates built on top of them.
//!
//! The module layout mirrors the data model of the orchestrator's
//! specification: identifiers and entities are the inputs, references and
//! their ancillary graph (contributors, concepts, organizations, journals,
//! issues, books, document types) are the harvested output, and retrievals /
//! harvestings / reference events are the bookkeeping rows that tie a run of
//! the pipeline together.

mod catalog;
mod concept;
mod contributor;
mod entity;
mod event;
mod harvesting;
mod hashkey;
mod identifier;
mod message;
mod reference;
mod retrieval;

pub use catalog::{Book, DocumentTypeRecord, Issue, Journal, Organization};
pub use concept::{Concept, Label};
pub use contributor::{Contribution, Contributor};
pub use entity::{Entity, EntityKind, PersonName};
pub use event::{ReferenceEvent, ReferenceEventType};
pub use harvesting::{Harvesting, HarvestingError, HarvestingState};
pub use hashkey::HashKey;
pub use identifier::{Identifier, IdentifierTypeRegistry};
pub use message::{
    InboundMessage, InboundPersonFields, OutboundHarvesting, OutboundMessage, OutboundReferenceEvent,
    OutboundRetrieval,
};
pub use reference::{Manifestation, Reference};
pub use retrieval::{Retrieval, RetrievalOptions};

/// Errors raised while constructing or validating the data model types in
/// this crate. Every variant corresponds to a construction-time invariant
/// named in the data model (entity identity, reference completeness,
/// identifier type closure).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    /// An identifier's type was not present in the configured closed set.
    #[error("identifier type {0:?} is not a recognised identifier type")]
    UnknownIdentifierType(String),
    /// A person entity had neither a recognised identifier nor a full name.
    #[error("a person must carry at least one recognised identifier or a full first and last name")]
    EntityMissingIdentity,
    /// A reference failed one of its construction invariants.
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    /// A contributor failed one of its construction invariants.
    #[error("invalid contributor: {0}")]
    InvalidContributor(String),
}

/// Convenience alias for fallible construction in this crate.
pub type Result<T> = std::result::Result<T, TypesError>;

//! The persistent catalog of logical objects.
//!
//! A repository is a directory tree with a JSON catalog at its root. Every
//! object (dataset, reference set, variant set, ...) is one [`RegistryEntry`]
//! with an explicit parent id; the files an entry owns are recorded as paths
//! relative to the root so the tree can be relocated wholesale.

pub mod compound_id;
mod consistency;
mod entry;
mod layout;
mod store;
mod transfer;

pub use consistency::{Problem, ProblemKind};
pub use entry::*;
pub use layout::{FileKind, Layout, natural_cmp, validate_name};
pub use store::{
    AddRequest, CATALOG_VERSION, ChildSpec, Document, RegistryStore, ShardSource, ValidatedSource,
};
pub use transfer::{Transfer, rollback, transfer};

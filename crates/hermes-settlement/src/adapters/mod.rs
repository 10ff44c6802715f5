//! Collaborator implementations shipped with the settler.

pub mod memory;

pub use memory::{InMemoryHistory, InMemoryLedger, StaticIdentities};

//! Test-only scaffolding shared across the crate's integration tests:
//! a scriptable `ExchangeAdapter` and small store-construction helpers.

pub mod mock_adapter;

pub use mock_adapter::{MockAdapter, ScriptedResponse};

use crate::store::Store;

/// An in-memory, migrated `Store` ready for a test to use immediately.
pub fn in_memory_store() -> Store {
    Store::open_in_memory().expect("in-memory store should always open")
}

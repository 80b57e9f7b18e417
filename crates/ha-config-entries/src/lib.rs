//! Config Entries
//!
//! This crate provides the configuration entry system and the flow engine
//! that creates and reconfigures entries.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`FlowManager`] - Runs config and options flows
//! - [`FlowRegistry`] - Flows in progress, with atomic discovery claims
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking.

pub mod entry;
pub mod flow;
pub mod flow_manager;
pub mod manager;
pub mod state_machine;
pub mod storage;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState};
pub use flow::{
    FlowError, FlowResult, FlowResultType, FormField, ALREADY_CONFIGURED, ALREADY_IN_PROGRESS,
};
pub use flow_manager::{FlowHandler, FlowManager, FlowRecord, FlowRegistry, FlowScope};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntryLifecycle,
    STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
pub use state_machine::InvalidTransition;
pub use storage::{Storable, Storage, StorageError, StorageResult};

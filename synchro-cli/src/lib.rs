//! Synchro CLI - install and manage Synchro apps and servers
//!
//! Apps live in a module store (a local directory or a remote blob store) and
//! are registered by path in the app registry. Installing an app runs a small
//! pipeline:
//!
//! ```text
//!  reference ──► resolver ──► archive classifier ──► module store
//!  (path/URL)    (bytes)      (format + manifest)        │
//!                                                        ▼
//!                             dependency sync ◄──── app registry
//! ```

pub mod apps;
pub mod archive;
pub mod cli;
pub mod config;
pub mod context;
pub mod deps;
pub mod error;
pub mod installer;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod settings;
pub mod store;
pub mod templates;

pub use config::ConfigStore;
pub use context::AppContext;
pub use error::{Result, SynchroError};
pub use installer::{InstallOutcome, InstallRequest};
pub use manifest::Manifest;
pub use store::ModuleStore;

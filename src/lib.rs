//! codemap — a live, navigable symbol map of a source workspace.
//!
//! The library surface is the [`Engine`]: point it at a root directory and it
//! keeps an in-memory symbol index warm through snapshot cold-starts,
//! debounced filesystem events, and background full scans. Transports (the
//! bundled HTTP/SSE adapter, or anything else) consume the engine's queries,
//! control calls, and event subscriptions.

pub mod analyze;
pub mod api;
pub mod engine;
pub mod error;
pub mod events;
pub mod index;
pub mod scan;
pub mod sched;
pub mod settings;
pub mod snapshot;
pub mod types;
pub mod watch;

pub use engine::{Engine, EngineStatus};
pub use error::{EngineError, Result};
pub use events::{IndexEvent, Subscription};
pub use index::SearchHit;
pub use sched::ChangeKind;
pub use settings::{AppliedSettings, SettingsPatch};
pub use types::{AppSettings, FileIssue, FileSummary, ProjectTreeNode, SymbolInfo, SymbolKind};

pub mod aggregate;
pub mod coerce;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod loader;
pub mod normalize;
pub mod output;
pub mod store;
pub mod types;
pub mod util;

pub use engine::{Analysis, Engine, MissingData};
pub use error::{ReportError, Result};
pub use store::{MemoryStore, ReportStore, SqliteStore};

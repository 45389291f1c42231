//! OpenCine Store: persisted render job records.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteJobStore;
pub use types::{JobStore, RenderJob};

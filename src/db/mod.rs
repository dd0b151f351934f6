//! Database module: row models, SQL repositories and the pipeline recorder.
//!
//! - `model`: row structs and their mapping into domain records.
//! - `repo`: SQL-only functions.
//! - `recorder`: a pipeline observer that persists every record replace.
//!
//! Callers import from `pinsmith::db`; the repository API is re-exported.

pub mod model;
pub mod recorder;
pub mod repo;

pub use model::StoredBatch;
pub use recorder::SqliteRecorder;
pub use repo::*;

//! Boot journal persistence.
//!
//! One SQLite file under the state directory records every boot and the
//! outcome of each init step. It survives supervisor restarts within a
//! container lifetime and backs the `skip_completed` rerun policy.

mod journal;
mod schema;

pub use journal::{JournalStore, StepRecord};

/// Convert a rusqlite result into a `PodbootError::Database`.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| podboot_shared::errors::PodbootError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

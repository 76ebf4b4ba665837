//! Small filesystem and process helpers.

mod fs;
mod process;

pub use fs::{Ownership, chown_path, write_atomic};
pub use process::{
    describe_exit, find_on_path, is_process_alive, kill_process, run_command, terminate_process,
};

//! Types shared between the podboot library and its binary.

pub mod errors;

pub use errors::{PodbootError, PodbootResult};

pub mod download;
pub mod error;
pub mod install;

pub use error::RestoreError;

//! Commands of the `dpe-stream` binary.

pub mod config;
pub mod master;
pub mod submit;
pub mod worker;

/// Errors surfaced by any command.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::Error),
    #[error(transparent)]
    Master(#[from] master::Error),
    #[error(transparent)]
    Worker(#[from] worker::Error),
    #[error(transparent)]
    Submit(#[from] submit::Error),
}

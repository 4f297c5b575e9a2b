//! Core of the stream job subsystem: job model, chain builder, master
//! service, orchestrator port and the worker-side execution pipeline.

pub mod chain;
pub mod codec;
pub mod event;
pub mod execution;
pub mod host;
pub mod job;
pub mod master;
pub mod queue;
pub mod source;
pub mod store;
pub mod task {
    pub mod executor;
    pub mod pool;
    pub mod receiver;
    pub mod runner;
    #[cfg(test)]
    pub(crate) mod fakes;
}

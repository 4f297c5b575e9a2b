//! Execution of function chains over queue messages.

use crate::job::{Operator, StartJob};
use async_trait::async_trait;

pub mod engine;
pub mod script;

/// Errors raised while executing a chain.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}: evaluator was not decoded before execution")]
    NotDecoded(Operator),
    #[error("{0}: evaluator is missing")]
    MissingEvaluator(Operator),
    #[error("limit: wrong number of arguments, exactly one argument expected")]
    LimitArguments,
    #[error("limit: unknown parameter type, it has to be an integer")]
    LimitType,
    #[error("fold requires an accumulator to be the second parameter to its evaluator")]
    MissingAccumulator,
    #[error("{operator} evaluator failed: {source}")]
    Evaluation {
        operator: Operator,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },
    #[error("{0} evaluator has to return a boolean value")]
    NotBoolean(Operator),
    #[error("Value conversion failed: {0}")]
    Conversion(String),
    #[error("Chain has {actual} functions but the engine was prepared for {expected}")]
    ChainMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Event(#[from] crate::event::Error),
}

/// What the executor should do after a chain ran.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Flow {
    /// The message was handled and can be acknowledged.
    Continue,
    /// A `limit` is exhausted; the pipeline is over.
    Terminate,
}

/// Execution engine collaborator.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, payload: &[u8], job: &StartJob) -> Result<Flow, Error>;
}

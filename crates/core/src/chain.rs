//! Function-chain builder.
//!
//! [`Chain`] is an immutable, runtime-checked list of operators: every step
//! consumes the chain and hands back a new one or an error. [`StreamBuilder`]
//! layers a type state on top so that appending after `foreach` or `fold` does
//! not compile:
//!
//! ```compile_fail
//! use dpe_stream_core::chain::StreamBuilder;
//! use dpe_stream_core::job::Source;
//!
//! let source = Source { name: "kafka".to_string(), connection: Default::default() };
//! let builder = StreamBuilder::new(source).foreach("|msg| print(msg)", &[]).unwrap();
//! let _ = builder.map("|msg| msg", &[]);
//! ```

use crate::codec::{self, ScriptEngine, ScriptEnvelope};
use crate::execution::script::{self, Script};
use crate::job::{Evaluator, Function, Operator, Parameter, Source, StreamJob};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Errors raised while assembling a chain.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid stream processing chain: {next} cannot be preceded by {last}")]
    AfterTerminal { next: Operator, last: Operator },
    #[error("negative limit: {0}")]
    NegativeLimit(i64),
    #[error("fold requires an accumulator to be the second parameter to its evaluator")]
    MissingAccumulator,
    #[error("{0} requires an evaluator")]
    MissingEvaluator(Operator),
    #[error("limit takes exactly one argument, got {0}")]
    LimitArguments(usize),
    #[error("limit argument must be an integer")]
    LimitType,
    #[error("Evaluator for {operator} is invalid: {source}")]
    Script {
        operator: Operator,
        #[source]
        source: script::Error,
    },
    #[error("Parameter for {operator} could not be encoded: {source}")]
    Codec {
        operator: Operator,
        #[source]
        source: codec::Error,
    },
}

/// Checks a chain as it arrived over the wire: every function must be well
/// formed and no operator may follow a terminal one.
pub fn validate(functions: &[Function]) -> Result<(), Error> {
    let mut last: Option<Operator> = None;
    for function in functions {
        check_after(last, function.name)?;
        check_function(function)?;
        last = Some(function.name);
    }
    Ok(())
}

fn check_after(last: Option<Operator>, next: Operator) -> Result<(), Error> {
    match last {
        Some(last) if last.is_terminal() => Err(Error::AfterTerminal { next, last }),
        _ => Ok(()),
    }
}

/// Checks the arguments a single operator needs to run.
pub fn check_function(function: &Function) -> Result<(), Error> {
    let operator = function.name;
    match operator {
        Operator::Limit => {
            let [count] = function.parameters.as_slice() else {
                return Err(Error::LimitArguments(function.parameters.len()));
            };
            let count = count
                .to_value()
                .map_err(|source| Error::Codec { operator, source })?
                .as_i64()
                .ok_or(Error::LimitType)?;
            if count < 0 {
                return Err(Error::NegativeLimit(count));
            }
        }
        _ => {
            if operator == Operator::Fold && function.parameters.is_empty() {
                return Err(Error::MissingAccumulator);
            }
            if function.evaluator.is_none() {
                return Err(Error::MissingEvaluator(operator));
            }
        }
    }
    Ok(())
}

/// Immutable, runtime-checked operator chain.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct Chain {
    functions: Vec<Function>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Operator> {
        self.functions.last().map(|function| function.name)
    }

    pub fn is_terminated(&self) -> bool {
        self.last().is_some_and(Operator::is_terminal)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn into_functions(self) -> Vec<Function> {
        self.functions
    }

    /// Appends an already assembled function.
    pub fn push(mut self, function: Function) -> Result<Self, Error> {
        check_after(self.last(), function.name)?;
        check_function(&function)?;
        self.functions.push(function);
        Ok(self)
    }

    /// Passes at most `count` messages, then ends the pipeline.
    pub fn limit(self, count: i64) -> Result<Self, Error> {
        let parameters = encode_parameters(Operator::Limit, [&Value::from(count)])?;
        self.push(Function {
            name: Operator::Limit,
            parameters,
            evaluator: None,
        })
    }

    pub fn foreach(self, code: &str, parameters: &[Value]) -> Result<Self, Error> {
        self.with_evaluator(Operator::Foreach, code, parameters.iter())
    }

    pub fn filter(self, code: &str, parameters: &[Value]) -> Result<Self, Error> {
        self.with_evaluator(Operator::Filter, code, parameters.iter())
    }

    pub fn map(self, code: &str, parameters: &[Value]) -> Result<Self, Error> {
        self.with_evaluator(Operator::Map, code, parameters.iter())
    }

    /// Folds every message into `accumulator`; the evaluator receives
    /// `(msg, acc, parameters...)`.
    pub fn fold(self, code: &str, accumulator: Value, parameters: &[Value]) -> Result<Self, Error> {
        let all = std::iter::once(&accumulator).chain(parameters.iter());
        self.with_evaluator(Operator::Fold, code, all)
    }

    fn with_evaluator<'a>(
        self,
        operator: Operator,
        code: &str,
        parameters: impl IntoIterator<Item = &'a Value>,
    ) -> Result<Self, Error> {
        let script = Script::compile(ScriptEnvelope {
            engine: ScriptEngine::Rhai,
            code: code.to_string(),
        })
        .map_err(|source| Error::Script { operator, source })?;
        let parameters = encode_parameters(operator, parameters)?;
        self.push(Function {
            name: operator,
            parameters,
            evaluator: Some(Evaluator::Decoded(Arc::new(script))),
        })
    }
}

fn encode_parameters<'a>(
    operator: Operator,
    values: impl IntoIterator<Item = &'a Value>,
) -> Result<Vec<Parameter>, Error> {
    values
        .into_iter()
        .map(|value| Parameter::encode(value).map_err(|source| Error::Codec { operator, source }))
        .collect()
}

/// Chain state that still accepts operators.
#[derive(Debug)]
pub struct Open;

/// Chain state after `foreach` or `fold`.
#[derive(Debug)]
pub struct Terminated;

/// Typed builder for a [`StreamJob`].
#[derive(Debug)]
pub struct StreamBuilder<S = Open> {
    source: Source,
    chain: Chain,
    invocation_id: String,
    memory: u32,
    description: String,
    _state: PhantomData<S>,
}

impl<S> StreamBuilder<S> {
    fn advance<T>(self, chain: Chain) -> StreamBuilder<T> {
        StreamBuilder {
            source: self.source,
            chain,
            invocation_id: self.invocation_id,
            memory: self.memory,
            description: self.description,
            _state: PhantomData,
        }
    }

    pub fn invocation_id(mut self, invocation_id: &str) -> Self {
        self.invocation_id = invocation_id.to_string();
        self
    }

    /// Worker memory in MiB.
    pub fn memory(mut self, memory: u32) -> Self {
        self.memory = memory;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Assembles and validates the job.
    pub fn build(self) -> Result<StreamJob, crate::job::Error> {
        let job = StreamJob {
            invocation_id: self.invocation_id,
            memory: self.memory,
            source: self.source,
            functions: self.chain.into_functions(),
            description: self.description,
        };
        job.validate()?;
        Ok(job)
    }
}

impl StreamBuilder<Open> {
    pub fn new(source: Source) -> Self {
        StreamBuilder {
            source,
            chain: Chain::new(),
            invocation_id: String::new(),
            memory: 0,
            description: String::new(),
            _state: PhantomData,
        }
    }

    pub fn limit(self, count: i64) -> Result<StreamBuilder<Open>, Error> {
        let chain = self.chain.clone().limit(count)?;
        Ok(self.advance(chain))
    }

    pub fn filter(self, code: &str, parameters: &[Value]) -> Result<StreamBuilder<Open>, Error> {
        let chain = self.chain.clone().filter(code, parameters)?;
        Ok(self.advance(chain))
    }

    pub fn map(self, code: &str, parameters: &[Value]) -> Result<StreamBuilder<Open>, Error> {
        let chain = self.chain.clone().map(code, parameters)?;
        Ok(self.advance(chain))
    }

    pub fn foreach(
        self,
        code: &str,
        parameters: &[Value],
    ) -> Result<StreamBuilder<Terminated>, Error> {
        let chain = self.chain.clone().foreach(code, parameters)?;
        Ok(self.advance(chain))
    }

    pub fn fold(
        self,
        code: &str,
        accumulator: Value,
        parameters: &[Value],
    ) -> Result<StreamBuilder<Terminated>, Error> {
        let chain = self.chain.clone().fold(code, accumulator, parameters)?;
        Ok(self.advance(chain))
    }
}

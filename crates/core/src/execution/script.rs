//! Compiled evaluator closures.

use crate::codec::ScriptEnvelope;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, AST};
use std::fmt;

/// Errors raised while turning an envelope into a callable closure.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Evaluator failed to compile with error: {source}")]
    Compile {
        #[source]
        source: rhai::ParseError,
    },
    #[error("Evaluator failed to evaluate with error: {source}")]
    Evaluate {
        #[source]
        source: Box<EvalAltResult>,
    },
    #[error("Evaluator must evaluate to a closure, got {0}")]
    NotAClosure(String),
}

/// An evaluator ready to be invoked, together with the envelope it came from.
pub struct Script {
    envelope: ScriptEnvelope,
    ast: AST,
    function: FnPtr,
}

impl Script {
    /// Compiles a Rhai closure such as `|msg, n| msg.count > n`.
    pub fn compile(envelope: ScriptEnvelope) -> Result<Self, Error> {
        let engine = Engine::new();
        let ast = engine
            .compile(&envelope.code)
            .map_err(|source| Error::Compile { source })?;
        let value: Dynamic = engine
            .eval_ast(&ast)
            .map_err(|source| Error::Evaluate { source })?;
        let type_name = value.type_name().to_string();
        let function = value
            .try_cast::<FnPtr>()
            .ok_or(Error::NotAClosure(type_name))?;

        Ok(Script {
            envelope,
            ast,
            function,
        })
    }

    pub fn envelope(&self) -> &ScriptEnvelope {
        &self.envelope
    }

    /// Invokes the closure on `engine` with positional arguments.
    pub fn call(&self, engine: &Engine, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        self.function.call(engine, &self.ast, args)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("engine", &self.envelope.engine)
            .field("code", &self.envelope.code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ScriptEngine;

    fn rhai(code: &str) -> ScriptEnvelope {
        ScriptEnvelope {
            engine: ScriptEngine::Rhai,
            code: code.to_string(),
        }
    }

    #[test]
    fn test_compile_and_call_closure() {
        let script = Script::compile(rhai("|x, n| x * n")).unwrap();
        let result = script
            .call(&Engine::new(), vec![Dynamic::from(6_i64), Dynamic::from(7_i64)])
            .unwrap();
        assert_eq!(result.as_int().unwrap(), 42);
    }

    #[test]
    fn test_captured_variables_survive_compilation() {
        let script = Script::compile(rhai("let base = 10; |x| x + base")).unwrap();
        let result = script
            .call(&Engine::new(), vec![Dynamic::from(5_i64)])
            .unwrap();
        assert_eq!(result.as_int().unwrap(), 15);
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let result = Script::compile(rhai("|x| x +"));
        assert!(matches!(result, Err(Error::Compile { .. })));
    }

    #[test]
    fn test_non_closure_is_rejected() {
        let result = Script::compile(rhai("40 + 2"));
        assert!(matches!(result, Err(Error::NotAClosure(_))));
    }
}

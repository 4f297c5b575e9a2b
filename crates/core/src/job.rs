//! Stream job model and validation.
//!
//! A [`StreamJob`] is what clients submit. The master enriches it into a
//! [`StartJob`] (account, job id and instance count) which is handed to every
//! worker. Evaluators and parameters stay encoded until a worker calls
//! [`StartJob::decode`].

use crate::codec::{self, ScriptEnvelope};
use crate::execution::script::{self, Script};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Name of the only registered source adapter.
pub const SOURCE_KAFKA: &str = "kafka";

/// Environment variable carrying the base64 JSON [`StartJob`] into workers.
pub const WORKER_JOB_ENV: &str = "DPE_STREAM_WORKER_JOB";

/// Errors raised by job validation and decoding.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invocation id is empty")]
    EmptyInvocationId,
    #[error("Source not supported: {0}")]
    UnsupportedSource(String),
    #[error("Number of functions less than one")]
    NoFunctions,
    #[error("Account id is empty")]
    EmptyAccountId,
    #[error("Job id is empty")]
    EmptyJobId,
    #[error(transparent)]
    Chain(#[from] crate::chain::Error),
    #[error("Function {operator} failed to decode with error: {source}")]
    Codec {
        operator: Operator,
        #[source]
        source: codec::Error,
    },
    #[error("Function {operator} failed to compile with error: {source}")]
    Script {
        operator: Operator,
        #[source]
        source: script::Error,
    },
}

/// Stream operators a function chain is made of.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Limit,
    Foreach,
    Filter,
    Map,
    Fold,
}

impl Operator {
    /// Terminal operators end a chain; nothing may follow them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Operator::Foreach | Operator::Fold)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Limit => "limit",
            Operator::Foreach => "foreach",
            Operator::Filter => "filter",
            Operator::Map => "map",
            Operator::Fold => "fold",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered source adapters.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum SourceKind {
    Kafka,
}

impl SourceKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            SOURCE_KAFKA => Some(SourceKind::Kafka),
            _ => None,
        }
    }
}

/// Input source of a job: adapter name plus adapter specific connection data.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub connection: Map<String, Value>,
}

impl Source {
    pub fn kind(&self) -> Option<SourceKind> {
        SourceKind::from_name(&self.name)
    }
}

/// Evaluator closure, either as it travels or ready to run.
#[derive(Clone, Debug)]
pub enum Evaluator {
    Encoded(Vec<u8>),
    Decoded(Arc<Script>),
}

impl Evaluator {
    /// Compiles an encoded evaluator. Already decoded evaluators are returned as is.
    pub fn decode(self, operator: Operator) -> Result<Self, Error> {
        match self {
            Evaluator::Encoded(bytes) => {
                let envelope = codec::decode_envelope(&bytes)
                    .map_err(|source| Error::Codec { operator, source })?;
                let script = Script::compile(envelope)
                    .map_err(|source| Error::Script { operator, source })?;
                Ok(Evaluator::Decoded(Arc::new(script)))
            }
            decoded => Ok(decoded),
        }
    }

    pub fn script(&self) -> Option<&Script> {
        match self {
            Evaluator::Decoded(script) => Some(script),
            Evaluator::Encoded(_) => None,
        }
    }

    fn envelope(&self) -> Result<ScriptEnvelope, codec::Error> {
        match self {
            Evaluator::Encoded(bytes) => codec::decode_envelope(bytes),
            Evaluator::Decoded(script) => Ok(script.envelope().clone()),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, codec::Error> {
        match self {
            Evaluator::Encoded(bytes) => Ok(bytes.clone()),
            Evaluator::Decoded(script) => codec::encode_envelope(script.envelope()),
        }
    }
}

impl PartialEq for Evaluator {
    fn eq(&self, other: &Self) -> bool {
        match (self.envelope(), other.envelope()) {
            (Ok(a), Ok(b)) => a == b,
            _ => matches!((self, other), (Evaluator::Encoded(a), Evaluator::Encoded(b)) if a == b),
        }
    }
}

impl Serialize for Evaluator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = self.to_bytes().map_err(serde::ser::Error::custom)?;
        codec::base64_bytes::serialize(&bytes, serializer)
    }
}

impl<'de> Deserialize<'de> for Evaluator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        codec::base64_bytes::deserialize(deserializer).map(Evaluator::Encoded)
    }
}

/// Operator parameter, either as it travels or as a plain value.
#[derive(Clone, Debug)]
pub enum Parameter {
    Encoded(Vec<u8>),
    Decoded(Value),
}

impl Parameter {
    pub fn encode(value: &Value) -> Result<Self, codec::Error> {
        codec::encode_parameter(value).map(Parameter::Encoded)
    }

    pub fn decode(self, operator: Operator) -> Result<Self, Error> {
        match self {
            Parameter::Encoded(bytes) => codec::decode_parameter(&bytes)
                .map(Parameter::Decoded)
                .map_err(|source| Error::Codec { operator, source }),
            decoded => Ok(decoded),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Parameter::Decoded(value) => Some(value),
            Parameter::Encoded(_) => None,
        }
    }

    /// The plain value, decoding it if needed.
    pub fn to_value(&self) -> Result<Value, codec::Error> {
        match self {
            Parameter::Encoded(bytes) => codec::decode_parameter(bytes),
            Parameter::Decoded(value) => Ok(value.clone()),
        }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_value(), other.to_value()) {
            (Ok(a), Ok(b)) => a == b,
            _ => matches!((self, other), (Parameter::Encoded(a), Parameter::Encoded(b)) if a == b),
        }
    }
}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Parameter::Encoded(bytes) => codec::base64_bytes::serialize(bytes, serializer),
            Parameter::Decoded(value) => {
                let bytes = codec::encode_parameter(value).map_err(serde::ser::Error::custom)?;
                codec::base64_bytes::serialize(&bytes, serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        codec::base64_bytes::deserialize(deserializer).map(Parameter::Encoded)
    }
}

/// A single operator of a chain.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Function {
    pub name: Operator,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<Evaluator>,
}

impl Function {
    /// Decodes the evaluator and every parameter.
    pub fn decode(self) -> Result<Self, Error> {
        let operator = self.name;
        let evaluator = self
            .evaluator
            .map(|evaluator| evaluator.decode(operator))
            .transpose()?;
        let parameters = self
            .parameters
            .into_iter()
            .map(|parameter| parameter.decode(operator))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Function {
            name: operator,
            parameters,
            evaluator,
        })
    }
}

/// Job as submitted by clients.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamJob {
    #[serde(default)]
    pub invocation_id: String,
    #[serde(default)]
    pub memory: u32,
    pub source: Source,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub description: String,
}

impl StreamJob {
    /// Checks the job, reporting the first violated rule.
    pub fn validate(&self) -> Result<(), Error> {
        validate_common(&self.invocation_id, &self.source, &self.functions)
    }
}

/// Job as handed to the orchestrator and every worker instance.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJob {
    /// Owning account.
    pub account_id: String,
    /// Id assigned by the master.
    pub job_id: String,
    #[serde(default)]
    pub invocation_id: String,
    #[serde(default)]
    pub memory: u32,
    /// Number of worker instances, one per partition.
    pub instances: u32,
    pub source: Source,
    /// Operator chain, encoded until decoded by a worker.
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub description: String,
}

impl StartJob {
    pub fn new(account_id: &str, job_id: &str, instances: u32, job: StreamJob) -> Self {
        StartJob {
            account_id: account_id.to_string(),
            job_id: job_id.to_string(),
            invocation_id: job.invocation_id,
            memory: job.memory,
            instances,
            source: job.source,
            functions: job.functions,
            description: job.description,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_common(&self.invocation_id, &self.source, &self.functions)?;
        if self.account_id.trim().is_empty() {
            return Err(Error::EmptyAccountId);
        }
        if self.job_id.trim().is_empty() {
            return Err(Error::EmptyJobId);
        }
        Ok(())
    }

    /// Decodes every function once so messages can be executed without re-parsing.
    pub fn decode(self) -> Result<Self, Error> {
        let functions = self
            .functions
            .into_iter()
            .map(Function::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StartJob { functions, ..self })
    }
}

fn validate_common(invocation_id: &str, source: &Source, functions: &[Function]) -> Result<(), Error> {
    if invocation_id.trim().is_empty() {
        return Err(Error::EmptyInvocationId);
    }
    if source.kind().is_none() {
        return Err(Error::UnsupportedSource(source.name.clone()));
    }
    if functions.is_empty() {
        return Err(Error::NoFunctions);
    }
    crate::chain::validate(functions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kafka_source() -> Source {
        let connection = json!({"topic": "clicks", "brokers": "k1:9092", "coordinators": "z1:2181"});
        Source {
            name: SOURCE_KAFKA.to_string(),
            connection: connection.as_object().cloned().unwrap(),
        }
    }

    fn function(name: Operator) -> Function {
        let chain = crate::chain::Chain::new();
        let chain = match name {
            Operator::Limit => chain.limit(1),
            Operator::Foreach => chain.foreach("|msg| print(msg)", &[]),
            Operator::Filter => chain.filter("|msg| true", &[]),
            Operator::Map => chain.map("|msg| msg", &[]),
            Operator::Fold => chain.fold("|msg, acc| acc + 1", json!(0), &[]),
        };
        chain.unwrap().into_functions().remove(0)
    }

    fn job(functions: Vec<Function>) -> StreamJob {
        StreamJob {
            invocation_id: "inv-1".to_string(),
            memory: 128,
            source: kafka_source(),
            functions,
            description: String::new(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_job() {
        assert!(job(vec![function(Operator::Map)]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_invocation_id() {
        let mut job = job(vec![function(Operator::Map)]);
        job.invocation_id = String::new();
        let err = job.validate().unwrap_err();
        assert!(matches!(err, Error::EmptyInvocationId));
        assert_eq!(err.to_string(), "Invocation id is empty");
    }

    #[test]
    fn test_validate_rejects_unknown_source() {
        let mut job = job(vec![function(Operator::Map)]);
        job.source.name = "rabbitmq".to_string();
        assert!(matches!(
            job.validate(),
            Err(Error::UnsupportedSource(name)) if name == "rabbitmq"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_chain() {
        assert!(matches!(job(vec![]).validate(), Err(Error::NoFunctions)));
    }

    #[test]
    fn test_validate_reports_first_violation() {
        let mut job = job(vec![]);
        job.invocation_id = String::new();
        job.source.name = "other".to_string();
        assert!(matches!(job.validate(), Err(Error::EmptyInvocationId)));
    }

    #[test]
    fn test_validate_rejects_operator_after_terminal() {
        let job = job(vec![function(Operator::Foreach), function(Operator::Map)]);
        assert!(matches!(job.validate(), Err(Error::Chain(_))));
    }

    #[test]
    fn test_validate_rejects_raw_fold_limit_and_map_missing_arguments() {
        for raw in [json!({"name": "fold"}), json!({"name": "limit"}), json!({"name": "map"})] {
            let function: Function = serde_json::from_value(raw).unwrap();
            assert!(
                matches!(job(vec![function.clone()]).validate(), Err(Error::Chain(_))),
                "{} should be rejected",
                function.name
            );
        }
    }

    #[test]
    fn test_start_job_requires_account_and_job_ids() {
        let start = StartJob::new("", "job-1", 1, job(vec![function(Operator::Map)]));
        assert!(matches!(start.validate(), Err(Error::EmptyAccountId)));

        let start = StartJob::new("acct", "", 1, job(vec![function(Operator::Map)]));
        assert!(matches!(start.validate(), Err(Error::EmptyJobId)));
    }

    #[test]
    fn test_unknown_operator_name_fails_to_deserialize() {
        let raw = json!({"name": "reduce", "parameters": []});
        assert!(serde_json::from_value::<Function>(raw).is_err());
    }

    #[test]
    fn test_start_job_wire_format_is_camel_case() {
        let start = StartJob::new("acct", "job-1", 4, job(vec![function(Operator::Limit)]));
        let value = serde_json::to_value(&start).unwrap();
        assert_eq!(value["accountId"], "acct");
        assert_eq!(value["jobId"], "job-1");
        assert_eq!(value["invocationId"], "inv-1");
        assert_eq!(value["instances"], 4);
        assert_eq!(value["functions"][0]["name"], "limit");
    }

    #[test]
    fn test_decode_turns_encoded_parts_into_runnable_parts() {
        let envelope = ScriptEnvelope {
            engine: codec::ScriptEngine::Rhai,
            code: "|msg, n| msg + n".to_string(),
        };
        let function = Function {
            name: Operator::Map,
            parameters: vec![Parameter::encode(&json!(5)).unwrap()],
            evaluator: Some(Evaluator::Encoded(codec::encode_envelope(&envelope).unwrap())),
        };

        let decoded = function.clone().decode().unwrap();
        assert_eq!(decoded.parameters[0].value(), Some(&json!(5)));
        let script = decoded.evaluator.as_ref().and_then(Evaluator::script).unwrap();
        assert_eq!(script.envelope(), &envelope);

        // Decoding keeps the wire representation intact.
        assert_eq!(
            serde_json::to_value(&decoded).unwrap(),
            serde_json::to_value(&function).unwrap()
        );
    }

    #[test]
    fn test_decode_fails_on_corrupt_evaluator() {
        let function = Function {
            name: Operator::Filter,
            parameters: vec![],
            evaluator: Some(Evaluator::Encoded(vec![1, 2, 3])),
        };
        assert!(matches!(
            function.decode(),
            Err(Error::Codec { operator: Operator::Filter, .. })
        ));
    }
}

//! Binary encodings used to carry evaluators, parameters and jobs.
//!
//! Evaluators travel as a bincode envelope, parameters as MessagePack and
//! whole jobs as JSON. Every binary payload is base64 encoded when it is
//! embedded in JSON or in an environment variable.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Errors raised while encoding or decoding stream payloads.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Base64 decoding failed with error: {source}")]
    Base64 {
        #[source]
        source: base64::DecodeError,
    },
    #[error("Evaluator envelope encoding failed with error: {source}")]
    Bincode {
        #[source]
        source: bincode::Error,
    },
    #[error("Parameter encoding failed with error: {source}")]
    MsgpackEncode {
        #[source]
        source: rmp_serde::encode::Error,
    },
    #[error("Parameter decoding failed with error: {source}")]
    MsgpackDecode {
        #[source]
        source: rmp_serde::decode::Error,
    },
    #[error("JSON serialization/deserialization failed with error: {source}")]
    SerdeJson {
        #[source]
        source: serde_json::Error,
    },
}

/// Script dialect an evaluator is written in.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptEngine {
    Rhai,
}

/// Portable form of an evaluator closure.
#[derive(PartialEq, Eq, Clone, Debug, Deserialize, Serialize)]
pub struct ScriptEnvelope {
    pub engine: ScriptEngine,
    pub code: String,
}

pub fn encode_envelope(envelope: &ScriptEnvelope) -> Result<Vec<u8>, Error> {
    bincode::serialize(envelope).map_err(|source| Error::Bincode { source })
}

pub fn decode_envelope(bytes: &[u8]) -> Result<ScriptEnvelope, Error> {
    bincode::deserialize(bytes).map_err(|source| Error::Bincode { source })
}

pub fn encode_parameter(value: &Value) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec(value).map_err(|source| Error::MsgpackEncode { source })
}

pub fn decode_parameter(bytes: &[u8]) -> Result<Value, Error> {
    rmp_serde::from_slice(bytes).map_err(|source| Error::MsgpackDecode { source })
}

/// Encodes a job as base64 JSON, the form workers receive it in.
pub fn encode_job<T: Serialize>(job: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(job).map_err(|source| Error::SerdeJson { source })?;
    Ok(STANDARD.encode(json))
}

pub fn decode_job<T: DeserializeOwned>(encoded: &str) -> Result<T, Error> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|source| Error::Base64 { source })?;
    serde_json::from_slice(&json).map_err(|source| Error::SerdeJson { source })
}

/// Serde adapter storing raw bytes as a base64 string.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

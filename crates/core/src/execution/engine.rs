//! Rhai execution engine.
//!
//! Runs a decoded chain over one message and publishes the outcome as an
//! [`OutputEvent`](crate::event::OutputEvent). Limit counters and fold
//! accumulators live in the engine and are shared by every message of the job.

use super::{Error, ExecutionEngine, Flow};
use crate::event::{EventsProducer, OutputEventBuilder};
use crate::job::{Function, Operator, StartJob};
use async_trait::async_trait;
use rhai::{Dynamic, Engine};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Per-operator state carried across messages.
enum OperatorState {
    Stateless,
    Limit(AtomicI64),
    Fold(Mutex<Dynamic>),
}

/// What a chain produced for one message.
enum Outcome {
    Terminated,
    Filtered,
    Completed(Dynamic),
}

/// [`ExecutionEngine`] evaluating Rhai closures.
pub struct RhaiEngine {
    /// Publisher of one output event per message.
    events: EventsProducer,
    /// Per function state, in chain order.
    states: Vec<OperatorState>,
    /// Per function evaluator arguments, in chain order.
    parameters: Vec<Vec<Dynamic>>,
}

impl RhaiEngine {
    /// Prepares state for every function of a decoded job.
    pub fn new(job: &StartJob, events: EventsProducer) -> Result<Self, Error> {
        let mut states = Vec::with_capacity(job.functions.len());
        let mut parameters = Vec::with_capacity(job.functions.len());

        for function in &job.functions {
            let values = function
                .parameters
                .iter()
                .map(|parameter| {
                    parameter
                        .value()
                        .ok_or(Error::NotDecoded(function.name))
                        .and_then(json_to_dynamic)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let state = match function.name {
                Operator::Limit => {
                    let [count] = values.as_slice() else {
                        return Err(Error::LimitArguments);
                    };
                    let count = count.as_int().map_err(|_| Error::LimitType)?;
                    OperatorState::Limit(AtomicI64::new(count))
                }
                Operator::Fold => {
                    let accumulator = values.first().ok_or(Error::MissingAccumulator)?;
                    OperatorState::Fold(Mutex::new(accumulator.clone()))
                }
                _ => OperatorState::Stateless,
            };

            states.push(state);
            parameters.push(values);
        }

        Ok(RhaiEngine {
            events,
            states,
            parameters,
        })
    }

    fn run(&self, engine: &Engine, payload: &[u8], functions: &[Function]) -> Result<Outcome, Error> {
        let mut data = message_to_dynamic(payload)?;

        for ((function, state), parameters) in functions.iter().zip(&self.states).zip(&self.parameters) {
            let operator = function.name;
            match state {
                OperatorState::Limit(remaining) => {
                    let passed = remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 0).then(|| n - 1))
                        .is_ok();
                    if !passed {
                        return Ok(Outcome::Terminated);
                    }
                }
                OperatorState::Fold(accumulator) => {
                    let mut accumulator = accumulator
                        .lock()
                        .map_err(|e| Error::Conversion(format!("fold accumulator poisoned: {e}")))?;
                    let mut args = vec![data.clone(), accumulator.clone()];
                    args.extend(parameters.iter().skip(1).cloned());
                    let next = call(engine, function, args)?;
                    *accumulator = next.clone();
                    data = next;
                }
                OperatorState::Stateless => {
                    let mut args = vec![data.clone()];
                    args.extend(parameters.iter().cloned());
                    let value = call(engine, function, args)?;
                    match operator {
                        Operator::Filter => match value.as_bool() {
                            Ok(true) => {}
                            Ok(false) => return Ok(Outcome::Filtered),
                            Err(_) => return Err(Error::NotBoolean(operator)),
                        },
                        Operator::Map => data = value,
                        _ => {}
                    }
                }
            }
        }

        Ok(Outcome::Completed(data))
    }

    async fn publish(&self, job: &StartJob, stdout: String, stderr: String, result: String) -> Result<(), Error> {
        let event = OutputEventBuilder::new()
            .job(job)
            .stdout(stdout)
            .stderr(stderr)
            .result(result)
            .build()?;
        self.events.publish(&event).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionEngine for RhaiEngine {
    async fn execute(&self, payload: &[u8], job: &StartJob) -> Result<Flow, Error> {
        if job.functions.len() != self.states.len() {
            return Err(Error::ChainMismatch {
                expected: self.states.len(),
                actual: job.functions.len(),
            });
        }

        let output = Arc::new(Mutex::new(String::new()));
        let outcome = {
            let mut engine = Engine::new();
            let sink = Arc::clone(&output);
            engine.on_print(move |text| {
                if let Ok(mut out) = sink.lock() {
                    out.push_str(text);
                    out.push('\n');
                }
            });
            self.run(&engine, payload, &job.functions)
        };
        let stdout = output.lock().map(|out| out.clone()).unwrap_or_default();

        match outcome {
            Ok(Outcome::Terminated) => Ok(Flow::Terminate),
            Ok(Outcome::Filtered) => {
                self.publish(job, stdout, String::new(), String::new()).await?;
                Ok(Flow::Continue)
            }
            Ok(Outcome::Completed(value)) => {
                let result = dynamic_to_json(value)?.to_string();
                debug!("Chain result for job {}: {}", job.job_id, result);
                self.publish(job, stdout, String::new(), result).await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                self.publish(job, stdout, e.to_string(), String::new()).await?;
                Err(e)
            }
        }
    }
}

fn call(engine: &Engine, function: &Function, args: Vec<Dynamic>) -> Result<Dynamic, Error> {
    let operator = function.name;
    let script = function
        .evaluator
        .as_ref()
        .ok_or(Error::MissingEvaluator(operator))?
        .script()
        .ok_or(Error::NotDecoded(operator))?;
    script
        .call(engine, args)
        .map_err(|source| Error::Evaluation { operator, source })
}

/// JSON payloads become maps/arrays/scalars, anything else a string.
fn message_to_dynamic(payload: &[u8]) -> Result<Dynamic, Error> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => json_to_dynamic(&value),
        Err(_) => Ok(Dynamic::from(String::from_utf8_lossy(payload).into_owned())),
    }
}

fn json_to_dynamic(value: &Value) -> Result<Dynamic, Error> {
    rhai::serde::to_dynamic(value).map_err(|e| Error::Conversion(e.to_string()))
}

fn dynamic_to_json(value: Dynamic) -> Result<Value, Error> {
    rhai::serde::from_dynamic(&value).map_err(|e| Error::Conversion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::event::OutputEvent;
    use crate::job::{Source, StreamJob, SOURCE_KAFKA};
    use crate::queue::{self, Producer};
    use serde_json::json;

    #[derive(Default)]
    struct CapturingProducer {
        events: Mutex<Vec<OutputEvent>>,
    }

    #[async_trait]
    impl Producer for CapturingProducer {
        async fn send(&self, _key: &str, payload: Vec<u8>) -> Result<(), queue::Error> {
            let event = serde_json::from_slice(&payload).unwrap();
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn setup(chain: Chain) -> (StartJob, RhaiEngine, Arc<CapturingProducer>) {
        let job = StartJob::new(
            "acct",
            "job-1",
            1,
            StreamJob {
                invocation_id: "inv-1".to_string(),
                memory: 0,
                source: Source {
                    name: SOURCE_KAFKA.to_string(),
                    connection: Default::default(),
                },
                functions: chain.into_functions(),
                description: String::new(),
            },
        );
        // Go through the wire format so the engine sees what a worker sees.
        let encoded = crate::codec::encode_job(&job).unwrap();
        let job: StartJob = crate::codec::decode_job::<StartJob>(&encoded)
            .unwrap()
            .decode()
            .unwrap();
        let producer = Arc::new(CapturingProducer::default());
        let engine = RhaiEngine::new(&job, EventsProducer::new(producer.clone())).unwrap();
        (job, engine, producer)
    }

    fn last_event(producer: &CapturingProducer) -> OutputEvent {
        producer.events.lock().unwrap().last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_map_result_is_published() {
        let (job, engine, producer) = setup(Chain::new().map("|msg, k| msg.n * k", &[json!(10)]).unwrap());

        let flow = engine.execute(br#"{"n": 2}"#, &job).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let event = last_event(&producer);
        assert_eq!(event.account_id, "acct");
        assert_eq!(event.job_id, "job-1");
        assert_eq!(event.invocation_id, "inv-1");
        assert_eq!(event.result, "20");
        assert_eq!(event.stderr, "");
    }

    #[tokio::test]
    async fn test_filter_false_stops_chain_without_error() {
        let chain = Chain::new()
            .filter("|msg| msg.n > 5", &[])
            .and_then(|c| c.foreach("|msg| print(\"unreachable\")", &[]))
            .unwrap();
        let (job, engine, producer) = setup(chain);

        let flow = engine.execute(br#"{"n": 1}"#, &job).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        let event = last_event(&producer);
        assert_eq!(event.stdout, "");
        assert_eq!(event.result, "");
    }

    #[tokio::test]
    async fn test_filter_must_return_boolean() {
        let (job, engine, producer) = setup(Chain::new().filter("|msg| 1", &[]).unwrap());

        let err = engine.execute(b"{}", &job).await.unwrap_err();

        assert!(matches!(err, Error::NotBoolean(Operator::Filter)));
        assert_eq!(
            last_event(&producer).stderr,
            "filter evaluator has to return a boolean value"
        );
    }

    #[tokio::test]
    async fn test_evaluator_error_is_reported_in_stderr() {
        let (job, engine, producer) = setup(Chain::new().map("|msg| msg.n / 0", &[]).unwrap());

        let err = engine.execute(br#"{"n": 1}"#, &job).await.unwrap_err();

        assert!(matches!(err, Error::Evaluation { operator: Operator::Map, .. }));
        assert!(!last_event(&producer).stderr.is_empty());
    }

    #[tokio::test]
    async fn test_limit_terminates_after_count() {
        let chain = Chain::new()
            .limit(2)
            .and_then(|c| c.map("|msg| msg", &[]))
            .unwrap();
        let (job, engine, producer) = setup(chain);

        assert_eq!(engine.execute(b"1", &job).await.unwrap(), Flow::Continue);
        assert_eq!(engine.execute(b"2", &job).await.unwrap(), Flow::Continue);
        assert_eq!(engine.execute(b"3", &job).await.unwrap(), Flow::Terminate);
        assert_eq!(producer.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_limit_zero_terminates_immediately() {
        let (job, engine, producer) = setup(Chain::new().limit(0).unwrap());
        assert_eq!(engine.execute(b"1", &job).await.unwrap(), Flow::Terminate);
        assert!(producer.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fold_accumulates_across_messages() {
        let chain = Chain::new()
            .fold("|msg, acc, step| acc + msg.n * step", json!(0), &[json!(1)])
            .unwrap();
        let (job, engine, producer) = setup(chain);

        for n in 1..=3 {
            let payload = format!(r#"{{"n": {n}}}"#);
            engine.execute(payload.as_bytes(), &job).await.unwrap();
        }

        let results: Vec<String> = producer
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.result.clone())
            .collect();
        assert_eq!(results, vec!["1", "3", "6"]);
    }

    #[tokio::test]
    async fn test_print_is_captured_as_stdout() {
        let (job, engine, producer) = setup(
            Chain::new()
                .foreach("|msg, prefix| print(prefix + msg)", &[json!("got ")])
                .unwrap(),
        );

        engine.execute(b"hello", &job).await.unwrap();

        assert_eq!(last_event(&producer).stdout, "got hello\n");
    }

    #[tokio::test]
    async fn test_non_json_payload_is_a_string() {
        let (job, engine, producer) = setup(Chain::new().map("|msg| msg.len()", &[]).unwrap());
        engine.execute(b"hello", &job).await.unwrap();
        assert_eq!(last_event(&producer).result, "5");
    }

    #[test]
    fn test_engine_requires_decoded_job() {
        let chain = Chain::new().limit(3).unwrap();
        let job = StartJob::new(
            "acct",
            "job-1",
            1,
            StreamJob {
                invocation_id: "inv-1".to_string(),
                memory: 0,
                source: Source {
                    name: SOURCE_KAFKA.to_string(),
                    connection: Default::default(),
                },
                functions: chain.into_functions(),
                description: String::new(),
            },
        );
        let producer = Arc::new(CapturingProducer::default());
        let result = RhaiEngine::new(&job, EventsProducer::new(producer));
        assert!(matches!(result, Err(Error::NotDecoded(Operator::Limit))));
    }
}

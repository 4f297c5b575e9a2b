//! In-process collaborators for task tests.

use crate::execution::{self, ExecutionEngine, Flow};
use crate::job::StartJob;
use crate::queue::{self, Consumer, QueueMessage};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Serves a fixed list of messages, then waits forever.
pub(crate) struct FakeConsumer {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<QueueMessage, queue::Error>>>,
    pub(crate) acks: Mutex<Vec<i64>>,
}

impl FakeConsumer {
    pub(crate) fn new(items: Vec<Result<QueueMessage, queue::Error>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            tx.send(item).unwrap();
        }
        FakeConsumer {
            rx: tokio::sync::Mutex::new(rx),
            acks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acks(&self) -> Vec<i64> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Consumer for FakeConsumer {
    async fn recv(&self) -> Result<QueueMessage, queue::Error> {
        let next = self.rx.lock().await.recv().await;
        match next {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), queue::Error> {
        self.acks.lock().unwrap().push(message.offset);
        Ok(())
    }
}

/// Behaves according to the payload: `slow`, `fail`, `end`, anything else succeeds.
pub(crate) struct ScriptedEngine;

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(&self, payload: &[u8], _job: &StartJob) -> Result<Flow, execution::Error> {
        match payload {
            b"slow" => {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(Flow::Continue)
            }
            b"fail" => Err(execution::Error::Conversion("scripted failure".to_string())),
            b"end" => Ok(Flow::Terminate),
            _ => Ok(Flow::Continue),
        }
    }
}

pub(crate) fn message(offset: i64, payload: &str) -> QueueMessage {
    QueueMessage {
        topic: "clicks".to_string(),
        partition: 0,
        offset,
        payload: payload.as_bytes().to_vec(),
    }
}

pub(crate) fn start_job() -> StartJob {
    serde_json::from_value(serde_json::json!({
        "accountId": "acct",
        "jobId": "job-1",
        "invocationId": "inv-1",
        "instances": 1,
        "source": {"name": "kafka", "connection": {"topic": "clicks", "brokers": "k:9092", "coordinators": "z:2181"}},
        "functions": [{"name": "limit", "parameters": []}]
    }))
    .unwrap()
}

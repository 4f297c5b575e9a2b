//! Kafka adapter for the stream job subsystem.
//!
//! Implements the message-queue contracts of `dpe_stream_core::queue` with
//! rdkafka: partition metadata for the master, a group consumer with
//! explicit offset acknowledgement and an output producer for workers.

pub mod client;
pub mod consumer;
pub mod partitions;
pub mod producer;

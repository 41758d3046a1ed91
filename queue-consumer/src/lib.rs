//! Resilient polling client for a REST-fronted message queue.
//!
//! The proxy exposes Kafka-style consumer instances over HTTP; this crate
//! creates them, polls them for record batches, hands each record to an
//! application [`consumer::RecordDispatcher`] and commits progress. Any
//! proxy failure tears the instance down and starts over after a backoff,
//! so a flapping proxy degrades throughput instead of crashing the
//! process. The [`supervisor::StreamSupervisor`] runs any number of these
//! poll loops concurrently and shuts them down cooperatively.

pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod health;
pub mod proxy;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

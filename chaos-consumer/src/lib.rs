//! Chaos-testing consumer for validating a consumer group under rebalances, slow-downs,
//! simulated processing failures and delayed commits.
//!
//! The operator-controlled lifecycle state lives in a single [`lifecycle::SharedLifecycleState`]
//! cell shared by the consumption loop and the rebalance coordinator. Every delivered record
//! runs through the [`fault::FaultInjector`] stages before it is acknowledged.

pub mod api;
pub mod config;
pub mod consumer;
pub mod control;
pub mod counters;
pub mod error;
pub mod fault;
pub mod kafka;
pub mod lifecycle;
pub mod message;
pub mod metrics_consts;
pub mod rebalance;
pub mod shutdown;

//! The coordinator that drives the ranged-loop sweep: range fan-out, Join
//! serialization, Finish, anomaly detection, and cycle pacing.

pub mod config;
pub mod service;
pub mod worker;

pub use config::ServiceConfig;
pub use service::Service;
pub use worker::{WorkerOutput, WorkerPartitionResult};

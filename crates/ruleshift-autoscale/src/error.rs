//! Autoscaler error types.

use thiserror::Error;

/// Errors that end a tick early. None of them is fatal: the control loop
/// logs the error and tries again on the next tick.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("replica count unstable (current {current}, ready {ready}), won't scale now")]
    TargetUnstable { current: u32, ready: u32 },

    #[error("no scalable consensus: {0}")]
    ConsensusUndefined(String),

    #[error("failed to read target: {0}")]
    TargetRead(String),

    #[error("failed to scale target to {desired} replicas: {reason}")]
    TargetUpdate { desired: u32, reason: String },
}

pub type ScaleResult<T> = Result<T, ScaleError>;

//! Scalable target seam.

use std::future::Future;

/// Replica counts reported by the target workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub current: u32,
    pub ready: u32,
}

impl ReplicaStatus {
    /// A previous scale operation is still rolling out.
    pub fn is_stable(&self) -> bool {
        self.current == self.ready
    }
}

/// A workload whose replica count the autoscaler controls.
pub trait Target: Send + Sync {
    /// Current and ready replica counts.
    fn get(&self) -> impl Future<Output = anyhow::Result<ReplicaStatus>> + Send;

    /// Request `desired` replicas.
    fn set(&self, desired: u32) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl<T: Target> Target for std::sync::Arc<T> {
    fn get(&self) -> impl Future<Output = anyhow::Result<ReplicaStatus>> + Send {
        (**self).get()
    }

    fn set(&self, desired: u32) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).set(desired)
    }
}

//! Async wrapper: steps run on tokio's blocking pool so an async host
//! (a telemetry service, a UI bridge) never stalls on kernel work.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{Simulation, StepReport};
use crate::snapshot::{SimulationStatus, SnapshotExporter, WritableRegion};
use crate::{Error, Result};

/// Shared handle to a simulation. Clones drive the same instance; steps
/// are serialized by the lock, so kernel order is unchanged.
#[derive(Clone)]
pub struct SimulationTask {
    inner: Arc<Mutex<Simulation>>,
}

impl std::fmt::Debug for SimulationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationTask").field("status", &self.status()).finish()
    }
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Runtime(format!("simulation task: {e}")))?
}

impl SimulationTask {
    pub fn new(simulation: Simulation) -> Self {
        Self { inner: Arc::new(Mutex::new(simulation)) }
    }

    pub fn status(&self) -> SimulationStatus {
        self.inner.lock().status()
    }

    pub fn iteration(&self) -> u64 {
        self.inner.lock().iteration()
    }

    /// Run `f` with exclusive access. Blocks the calling thread.
    pub fn with<T>(&self, f: impl FnOnce(&mut Simulation) -> T) -> T {
        f(&mut self.inner.lock())
    }

    pub async fn step(&self) -> Result<StepReport> {
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.lock().step()).await
    }

    /// Up to `steps` steps in one blocking job.
    pub async fn run(&self, steps: u64) -> Result<u64> {
        let inner = Arc::clone(&self.inner);
        blocking(move || inner.lock().run(steps)).await
    }

    /// Step `steps` times, publishing every `publish_every` steps and once
    /// more at the end. Returns the number of steps run.
    pub async fn run_publishing<R>(
        &self,
        steps: u64,
        publish_every: u64,
        exporter: Arc<Mutex<SnapshotExporter<R>>>,
    ) -> Result<u64>
    where
        R: WritableRegion + 'static,
    {
        let publish_every = publish_every.max(1);
        let mut ran = 0;
        while ran < steps {
            let chunk = publish_every.min(steps - ran);
            let done = self.run(chunk).await?;
            ran += done;

            let inner = Arc::clone(&self.inner);
            let exporter = Arc::clone(&exporter);
            blocking(move || inner.lock().publish(&mut exporter.lock())).await?;
            if done < chunk {
                break;
            }
        }
        tracing::debug!(ran, "publishing run finished");
        Ok(ran)
    }
}

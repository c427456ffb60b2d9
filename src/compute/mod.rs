//! # Compute Context
//!
//! Explicit handle through which every kernel pass is dispatched. A pass is
//! one invocation per output slot (node, CSR slot, or block) with no data
//! dependency between invocations; passes run strictly one after another.
//!
//! With the `parallel` feature the invocations run on a rayon pool owned by
//! the context; without it they run sequentially in index order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{Error, Result};

/// Fixed block size of the two-stage sum reductions.
pub const REDUCTION_BLOCK: usize = 256;

/// What the executing device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub double_precision: bool,
    /// 0 = let the runtime pick.
    pub worker_threads: usize,
}

impl DeviceCapabilities {
    /// The host CPU: f64 is always available.
    pub fn host() -> Self {
        Self { double_precision: true, worker_threads: 0 }
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::host()
    }
}

pub struct ComputeContext {
    caps: DeviceCapabilities,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext").field("caps", &self.caps).finish()
    }
}

impl ComputeContext {
    /// Create a context for the given device. Fails when the device cannot
    /// run double-precision kernels; there is no reduced-precision fallback.
    pub fn new(caps: DeviceCapabilities) -> Result<Self> {
        if !caps.double_precision {
            return Err(Error::Unsupported(
                "device lacks double-precision compute".into(),
            ));
        }

        #[cfg(feature = "parallel")]
        let pool = if caps.worker_threads > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(caps.worker_threads)
                    .thread_name(|i| format!("spacetime-kernel-{i}"))
                    .build()
                    .map_err(|e| Error::Unsupported(format!("kernel pool: {e}")))?,
            )
        } else {
            None
        };

        tracing::debug!(?caps, "compute context ready");
        Ok(Self {
            caps,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    pub fn host() -> Result<Self> {
        Self::new(DeviceCapabilities::host())
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    /// Number of workers a pass is spread over.
    pub fn worker_count(&self) -> usize {
        #[cfg(feature = "parallel")]
        {
            match &self.pool {
                Some(pool) => pool.current_num_threads(),
                None => rayon::current_num_threads(),
            }
        }
        #[cfg(not(feature = "parallel"))]
        {
            1
        }
    }

    #[cfg(feature = "parallel")]
    fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// One invocation per slot of `out`; `f(i, &mut out[i])`.
    pub fn for_each_slot<T, F>(&self, out: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        self.run(|| out.par_iter_mut().enumerate().for_each(|(i, slot)| f(i, slot)));
        #[cfg(not(feature = "parallel"))]
        out.iter_mut().enumerate().for_each(|(i, slot)| f(i, slot));
    }

    /// One invocation per index writing two parallel outputs.
    pub fn for_each_slot_pair<A, B, F>(&self, a: &mut [A], b: &mut [B], f: F)
    where
        A: Send,
        B: Send,
        F: Fn(usize, &mut A, &mut B) + Sync + Send,
    {
        debug_assert_eq!(a.len(), b.len());
        #[cfg(feature = "parallel")]
        self.run(|| {
            a.par_iter_mut()
                .zip(b.par_iter_mut())
                .enumerate()
                .for_each(|(i, (x, y))| f(i, x, y))
        });
        #[cfg(not(feature = "parallel"))]
        a.iter_mut()
            .zip(b.iter_mut())
            .enumerate()
            .for_each(|(i, (x, y))| f(i, x, y));
    }

    /// One invocation per index in `0..n` with no owned output (atomics).
    pub fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        self.run(|| (0..n).into_par_iter().for_each(|i| f(i)));
        #[cfg(not(feature = "parallel"))]
        (0..n).for_each(f);
    }

    /// Block-level partial sums (first stage of a two-stage reduction).
    pub fn block_sums(&self, data: &[f64], block: usize) -> Vec<f64> {
        let block = block.max(1);
        #[cfg(feature = "parallel")]
        {
            self.run(|| data.par_chunks(block).map(|c| c.iter().sum()).collect())
        }
        #[cfg(not(feature = "parallel"))]
        {
            data.chunks(block).map(|c| c.iter().sum()).collect()
        }
    }

    /// Two-stage sum: parallel block partials, then a sequential host pass.
    pub fn reduce_sum(&self, data: &[f64]) -> f64 {
        self.block_sums(data, REDUCTION_BLOCK).iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_single_precision_device() {
        let caps = DeviceCapabilities { double_precision: false, worker_threads: 0 };
        assert!(matches!(ComputeContext::new(caps), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_for_each_slot_writes_own_slot() {
        let ctx = ComputeContext::new(DeviceCapabilities { double_precision: true, worker_threads: 2 }).unwrap();
        let mut out = vec![0usize; 1000];
        ctx.for_each_slot(&mut out, |i, slot| *slot = i * 2);
        assert!(out.iter().enumerate().all(|(i, v)| *v == i * 2));
    }

    #[test]
    fn test_reduce_sum_matches_sequential() {
        let ctx = ComputeContext::host().unwrap();
        let data: Vec<f64> = (0..1000).map(|i| i as f64 * 0.5).collect();
        let partials = ctx.block_sums(&data, REDUCTION_BLOCK);
        assert_eq!(partials.len(), 4);
        assert_eq!(ctx.reduce_sum(&data), data.iter().sum::<f64>());
        assert_eq!(ctx.reduce_sum(&[]), 0.0);
    }
}

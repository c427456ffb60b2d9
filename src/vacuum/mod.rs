//! # Vacuum Statistics
//!
//! Masked reduction over a per-node scalar field:
//!
//! ```text
//! pass 1  masked_i = mask_i ? φ_i : 0,  squared_i = masked_i²
//! pass 2  count, min, max            (integer-scaled atomics)
//! pass 3  block sums of masked/squared (REDUCTION_BLOCK), host sums partials
//! host    mean = Σ/count, var = max(0, Σ²/count − mean²)
//! ```
//!
//! Min/max go through `i64` atomics after scaling by `MINMAX_SCALE`: atomic
//! min/max over floats is not available everywhere, so the extremes are
//! exact only to `1 / MINMAX_SCALE`. Masked values that are not finite or
//! exceed `MINMAX_LIMIT` in magnitude cannot be scaled; they are left out of
//! every statistic and counted in [`VacuumStats::rejected`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::compute::{ComputeContext, REDUCTION_BLOCK};
use crate::{Error, Result};

/// Fixed-point scale for the atomic min/max.
pub const MINMAX_SCALE: f64 = 1e6;

/// Largest magnitude whose scaled value still fits an `i64`.
pub const MINMAX_LIMIT: f64 = 9.0e12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VacuumStats {
    pub count: u64,
    /// Masked values skipped because they could not be scaled.
    pub rejected: u64,
    pub mean: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl VacuumStats {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

fn in_range(v: f64) -> bool {
    v.is_finite() && v.abs() <= MINMAX_LIMIT
}

/// Membership mask: 1 where mass is below `threshold`.
pub fn vacuum_mask(masses: &[f64], threshold: f64) -> Vec<u8> {
    masses.iter().map(|&m| u8::from(m < threshold)).collect()
}

/// Reusable scratch buffers for the masked reduction.
#[derive(Debug, Clone, Default)]
pub struct VacuumStatisticsEngine {
    masked: Vec<f64>,
    squared: Vec<f64>,
}

impl VacuumStatisticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, ctx: &ComputeContext, field: &[f64], mask: &[u8]) -> Result<VacuumStats> {
        if field.len() != mask.len() {
            return Err(Error::InvalidArgument(format!(
                "field has {} entries, mask has {}",
                field.len(),
                mask.len()
            )));
        }
        let n = field.len();

        self.masked.resize(n, 0.0);
        self.squared.resize(n, 0.0);
        ctx.for_each_slot_pair(&mut self.masked, &mut self.squared, |i, m, s| {
            let v = if mask[i] != 0 && in_range(field[i]) { field[i] } else { 0.0 };
            *m = v;
            *s = v * v;
        });

        let count = AtomicU64::new(0);
        let rejected = AtomicU64::new(0);
        let min = AtomicI64::new(i64::MAX);
        let max = AtomicI64::new(i64::MIN);
        ctx.for_each_index(n, |i| {
            if mask[i] == 0 {
                return;
            }
            if !in_range(field[i]) {
                rejected.fetch_add(1, Ordering::Relaxed);
            } else {
                let scaled = (field[i] * MINMAX_SCALE).round() as i64;
                count.fetch_add(1, Ordering::Relaxed);
                min.fetch_min(scaled, Ordering::Relaxed);
                max.fetch_max(scaled, Ordering::Relaxed);
            }
        });

        let count = count.into_inner();
        let rejected = rejected.into_inner();
        if rejected > 0 {
            tracing::debug!(rejected, "vacuum values outside the min/max range skipped");
        }
        if count == 0 {
            return Ok(VacuumStats { rejected, ..VacuumStats::default() });
        }

        let sum: f64 = ctx.block_sums(&self.masked, REDUCTION_BLOCK).iter().sum();
        let sum_sq: f64 = ctx.block_sums(&self.squared, REDUCTION_BLOCK).iter().sum();
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0);

        Ok(VacuumStats {
            count,
            rejected,
            mean,
            variance,
            min: min.into_inner() as f64 / MINMAX_SCALE,
            max: max.into_inner() as f64 / MINMAX_SCALE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask_returns_default() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = VacuumStatisticsEngine::new();
        let stats = engine.compute(&ctx, &[1.0, 2.0], &[0, 0]).unwrap();
        assert_eq!(stats, VacuumStats::default());
        let stats = engine.compute(&ctx, &[], &[]).unwrap();
        assert_eq!(stats.count, 0);
    }

    #[test]
    fn test_single_member() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = VacuumStatisticsEngine::new();
        let stats = engine.compute(&ctx, &[5.0, -2.5, 9.0], &[0, 1, 0]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean, -2.5);
        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.min, -2.5);
        assert_eq!(stats.max, -2.5);
    }

    #[test]
    fn test_constant_field_variance_clamped() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = VacuumStatisticsEngine::new();
        let field = vec![0.1; 777];
        let stats = engine.compute(&ctx, &field, &vec![1; 777]).unwrap();
        assert!(stats.variance >= 0.0);
        assert!(stats.variance < 1e-15);
    }

    #[test]
    fn test_length_mismatch() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = VacuumStatisticsEngine::new();
        assert!(engine.compute(&ctx, &[1.0], &[1, 1]).is_err());
    }

    #[test]
    fn test_unscalable_values_are_rejected() {
        let ctx = ComputeContext::host().unwrap();
        let mut engine = VacuumStatisticsEngine::new();
        let field = [f64::NAN, 2.0, 1e13, -4.0, f64::INFINITY];
        let stats = engine.compute(&ctx, &field, &[1, 1, 1, 1, 0]).unwrap();
        assert_eq!((stats.count, stats.rejected), (2, 2));
        assert_eq!(stats.mean, -1.0);
        assert_eq!((stats.min, stats.max), (-4.0, 2.0));

        let stats = engine.compute(&ctx, &[f64::NAN], &[1]).unwrap();
        assert_eq!(stats, VacuumStats { rejected: 1, ..VacuumStats::default() });
    }

    #[test]
    fn test_vacuum_mask() {
        assert_eq!(vacuum_mask(&[0.0, 0.5, 1.0], 0.5), vec![1, 0, 0]);
    }
}

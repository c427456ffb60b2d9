//! Masked reduction against a straightforward sequential reference.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use spacetime_rs::vacuum::{vacuum_mask, MINMAX_SCALE};
use spacetime_rs::{ComputeContext, VacuumStatisticsEngine, VacuumStats};

const FIELD_LEN: usize = 4096;

fn reference(field: &[f64], mask: &[u8]) -> VacuumStats {
    let members: Vec<f64> = field.iter().zip(mask).filter(|(_, m)| **m != 0).map(|(v, _)| *v).collect();
    if members.is_empty() {
        return VacuumStats::default();
    }
    let count = members.len() as f64;
    let mean = members.iter().sum::<f64>() / count;
    let variance = members.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;
    VacuumStats {
        count: members.len() as u64,
        mean,
        variance,
        min: members.iter().copied().fold(f64::INFINITY, f64::min),
        max: members.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ..VacuumStats::default()
    }
}

fn random_case(rng: &mut StdRng, members: usize) -> (Vec<f64>, Vec<u8>) {
    let field: Vec<f64> = (0..FIELD_LEN).map(|_| rng.gen_range(-10.0..10.0)).collect();
    let mut mask = vec![0u8; FIELD_LEN];
    mask[..members].iter_mut().for_each(|m| *m = 1);
    mask.shuffle(rng);
    (field, mask)
}

#[test]
fn test_masked_reduction_matches_sequential() {
    let ctx = ComputeContext::host().unwrap();
    let mut engine = VacuumStatisticsEngine::new();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for members in [0usize, 1, 1000] {
        let (field, mask) = random_case(&mut rng, members);
        let got = engine.compute(&ctx, &field, &mask).unwrap();
        let want = reference(&field, &mask);

        assert_eq!(got.count, want.count, "members = {members}");
        if members == 0 {
            assert_eq!(got, VacuumStats::default());
            continue;
        }
        assert!((got.mean - want.mean).abs() < 1e-9, "mean {} vs {}", got.mean, want.mean);
        assert!((got.variance - want.variance).abs() < 1e-6 * want.variance.max(1.0));
        let quantum = 1.0 / MINMAX_SCALE;
        assert!((got.min - want.min).abs() <= quantum);
        assert!((got.max - want.max).abs() <= quantum);
        assert!(got.variance >= 0.0);
    }
}

#[test]
fn test_mask_from_masses() {
    let ctx = ComputeContext::host().unwrap();
    let mut engine = VacuumStatisticsEngine::new();
    let masses = [0.0, 2.0, 0.1, 5.0];
    let field = [1.0, 100.0, 3.0, 100.0];
    let stats = engine.compute(&ctx, &field, &vacuum_mask(&masses, 0.5)).unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.mean, 2.0);
    assert_eq!(stats.variance, 1.0);
    assert_eq!((stats.min, stats.max), (1.0, 3.0));
}

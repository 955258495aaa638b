// src/utils/synthetic.rs: seeded random feature tables for tests and benchmarking

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};

use crate::utils::matrix::FeatureMatrix;


/// Generates a sparse abundance table with log-normally distributed non-zero values.
///
/// # Arguments
///
/// * `n_features` - Rows, named `feature_{i}`.
/// * `n_samples` - Columns, named `sample_{j}`.
/// * `density` - Probability that a cell is non-zero, in [0, 1].
/// * `seed` - RNG seed; equal seeds give equal tables.
///
/// # Returns
/// anyhow::Result<FeatureMatrix>
pub fn matrix_generator(n_features: usize, n_samples: usize, density: f64, seed: u64) -> Result<FeatureMatrix> {
    if !(0.0..=1.0).contains(&density) {
        return Err(anyhow!("Density must be within [0, 1], got {}", density));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let abundance = LogNormal::<f64>::new(2.0, 1.5).map_err(|e| anyhow!("Invalid distribution: {}", e))?;

    let observation_ids = (0..n_features).map(|i| format!("feature_{}", i)).collect();
    let sample_ids = (0..n_samples).map(|j| format!("sample_{}", j)).collect();
    let mut triplets = Vec::new();
    for col in 0..n_samples {
        for row in 0..n_features {
            if rng.random::<f64>() < density {
                // Rounded to keep TSV output short and exact.
                let value = (abundance.sample(&mut rng) * 100.0).round() / 100.0;
                triplets.push((row, col, value.max(0.01)));
            }
        }
    }
    FeatureMatrix::from_triplets("synthetic", observation_ids, sample_ids, triplets)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_generator_is_seeded() -> Result<()> {
        let a = matrix_generator(50, 20, 0.2, 7)?;
        let b = matrix_generator(50, 20, 0.2, 7)?;
        assert_eq!(a, b);
        assert_eq!(a.n_samples(), 20);
        assert!(a.nnz() > 0);
        assert!(matrix_generator(5, 5, 1.5, 1).is_err());
        Ok(())
    }
}

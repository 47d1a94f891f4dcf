use crate::errors::{configuration, Result};
use natural_param::CompoundVector;
use serde::{Deserialize, Serialize};

/// What one batch (or a partial reduction of batches) contributes to a
/// round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    /// expected sufficient statistics in natural-parameter space
    pub vector: CompoundVector,
    pub elbo: f64,
    pub num_records: usize,
    pub num_batches: usize,
}

impl BatchOutput {
    /// contribution of an empty batch
    pub fn zero(like: &CompoundVector) -> Self {
        BatchOutput {
            vector: like.zeros_like(),
            elbo: 0.0,
            num_records: 0,
            num_batches: 0,
        }
    }

    pub fn merge(&mut self, other: &BatchOutput) -> Result<()> {
        self.vector.sum(&other.vector).map_err(configuration)?;
        self.elbo += other.elbo;
        self.num_records += other.num_records;
        self.num_batches += other.num_batches;
        Ok(())
    }
}

/// Fold batch outputs in iteration order; `None` when there is nothing to
/// fold. Any grouping of the same outputs gives the same result up to
/// floating point summation order.
pub fn reduce<I>(outputs: I) -> Result<Option<BatchOutput>>
where
    I: IntoIterator<Item = BatchOutput>,
{
    let mut iter = outputs.into_iter();
    let Some(mut acc) = iter.next() else {
        return Ok(None);
    };
    for out in iter {
        acc.merge(&out)?;
    }
    Ok(Some(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bn_model::DagBuilder;
    use natural_param::{Hyperparameters, ParamBlock};

    fn outputs() -> anyhow::Result<Vec<BatchOutput>> {
        let mut b = DagBuilder::new("coin");
        b.multinomial("A", 3);
        let prior = CompoundVector::prior(&b.build()?, &Hyperparameters::default());
        Ok((0..5)
            .map(|i| {
                let mut out = BatchOutput::zero(&prior);
                if let ParamBlock::Multinomial(rows) = out.vector.block_mut(0) {
                    rows[0].add_count(i % 3, 0.1 * (i + 1) as f64);
                }
                out.elbo = -1.5 * i as f64;
                out.num_records = 10;
                out.num_batches = 1;
                out
            })
            .collect())
    }

    #[test]
    fn grouping_does_not_matter() -> anyhow::Result<()> {
        let all = outputs()?;
        let whole = reduce(all.clone())?.unwrap();

        let left = reduce(all[..2].to_vec())?.unwrap();
        let right = reduce(all[2..].iter().rev().cloned())?.unwrap();
        let merged = reduce([right, left])?.unwrap();

        assert!(whole.vector.max_abs_diff(&merged.vector)? < 1e-12);
        approx::assert_abs_diff_eq!(whole.elbo, merged.elbo, epsilon = 1e-12);
        assert_eq!(whole.num_records, 50);
        assert_eq!(merged.num_batches, 5);
        Ok(())
    }

    #[test]
    fn zero_output_is_neutral() -> anyhow::Result<()> {
        let all = outputs()?;
        let mut acc = all[3].clone();
        acc.merge(&BatchOutput::zero(&all[3].vector))?;
        assert_eq!(acc, all[3]);
        assert!(reduce(Vec::<BatchOutput>::new())?.is_none());
        Ok(())
    }
}

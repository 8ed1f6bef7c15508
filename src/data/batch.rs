use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// An immutable group of `(input, label)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBatch {
    inputs: Vec<Vec<f64>>,
    labels: Vec<usize>,
}

impl LabeledBatch {
    pub fn new(inputs: Vec<Vec<f64>>, labels: Vec<usize>) -> Result<LabeledBatch> {
        if inputs.len() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "batch has {} inputs and {} labels",
                inputs.len(),
                labels.len()
            )));
        }
        if inputs.is_empty() {
            return Err(Error::InvalidInput("batch is empty".into()));
        }
        Ok(LabeledBatch { inputs, labels })
    }

    pub fn inputs(&self) -> &[Vec<f64>] {
        &self.inputs
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; an empty batch cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A finite split that can be iterated once per epoch.
///
/// Every call to `epoch` yields one full pass over the split. Training
/// splits reshuffle on each call; validation splits keep a fixed order.
pub trait BatchSource {
    /// Number of examples in one pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn epoch(&mut self) -> Box<dyn Iterator<Item = LabeledBatch> + '_>;
}

/// Groups `order` into batches of `batch_size`, the last one possibly
/// partial, building each sample with `sample`.
pub(crate) fn batches_in_order<'a, F>(
    order: Vec<usize>,
    batch_size: usize,
    mut sample: F,
) -> Box<dyn Iterator<Item = LabeledBatch> + 'a>
where
    F: FnMut(usize) -> (Vec<f64>, usize) + 'a,
{
    let batch_size = batch_size.max(1);
    let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();
    Box::new(chunks.into_iter().map(move |chunk| {
        let (inputs, labels) = chunk.into_iter().map(&mut sample).unzip();
        LabeledBatch { inputs, labels }
    }))
}

/// A split held fully in memory.
#[derive(Debug, Clone)]
pub struct InMemorySplit {
    inputs: Vec<Vec<f64>>,
    labels: Vec<usize>,
    batch_size: usize,
    rng: Option<StdRng>,
}

impl InMemorySplit {
    /// Fixed-order split.
    pub fn new(inputs: Vec<Vec<f64>>, labels: Vec<usize>, batch_size: usize) -> Result<InMemorySplit> {
        if inputs.len() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "split has {} inputs and {} labels",
                inputs.len(),
                labels.len()
            )));
        }
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".into()));
        }
        Ok(InMemorySplit { inputs, labels, batch_size, rng: None })
    }

    /// Reshuffles on every epoch with a seeded generator.
    pub fn shuffled(mut self, seed: u64) -> InMemorySplit {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

impl BatchSource for InMemorySplit {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn epoch(&mut self) -> Box<dyn Iterator<Item = LabeledBatch> + '_> {
        let mut order: Vec<usize> = (0..self.labels.len()).collect();
        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
        }
        let inputs = &self.inputs;
        let labels = &self.labels;
        batches_in_order(order, self.batch_size, move |i| (inputs[i].clone(), labels[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split() -> InMemorySplit {
        let inputs = (0..7).map(|i| vec![i as f64]).collect();
        let labels = (0..7).map(|i| i % 2).collect();
        InMemorySplit::new(inputs, labels, 3).unwrap()
    }

    fn seen(split: &mut InMemorySplit) -> Vec<usize> {
        split.epoch().flat_map(|b| b.inputs().iter().map(|x| x[0] as usize).collect::<Vec<_>>()).collect()
    }

    #[test]
    fn fixed_order_with_partial_last_batch() {
        let mut s = split();
        let sizes: Vec<usize> = s.epoch().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(seen(&mut s), (0..7).collect::<Vec<_>>());
        assert_eq!(seen(&mut s), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn shuffled_pass_covers_every_example_once() {
        let mut s = split().shuffled(42);
        let identity: Vec<usize> = (0..7).collect();
        let passes: Vec<Vec<usize>> = (0..5).map(|_| seen(&mut s)).collect();
        assert!(passes.iter().any(|p| *p != identity));
        for mut pass in passes {
            pass.sort_unstable();
            assert_eq!(pass, identity);
        }
    }

    #[test]
    fn labels_follow_inputs() {
        let mut s = split().shuffled(5);
        for batch in s.epoch() {
            for (x, &y) in batch.inputs().iter().zip(batch.labels()) {
                assert_eq!(x[0] as usize % 2, y);
            }
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(InMemorySplit::new(vec![vec![1.0]], vec![], 2).is_err());
        assert!(LabeledBatch::new(vec![], vec![]).is_err());
    }
}

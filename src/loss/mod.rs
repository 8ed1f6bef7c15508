pub mod weighted_ce;

pub use weighted_ce::{softmax, LossOutput, WeightedCrossEntropy};

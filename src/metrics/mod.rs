pub mod evaluator;

pub use evaluator::{argmax, evaluate, Averages, ClassReport, Evaluation, Mismatch};

//! Serving a trained model over HTTP.

pub mod http;
pub mod multipart;
pub mod predictor;

pub use http::{route, serve, Reply};
pub use predictor::{ClassProbability, Prediction, Predictor};

pub mod augment;
pub mod batch;
pub mod folder;
pub mod preprocess;

pub use augment::AugmentationPolicy;
pub use batch::{BatchSource, InMemorySplit, LabeledBatch};
pub use folder::{ImageFolder, ImageSplit};
pub use preprocess::Preprocessing;

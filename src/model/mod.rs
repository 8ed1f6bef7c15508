pub mod adapter;
pub mod classifier;
pub mod labels;
pub mod manifest;
pub mod snapshot;
pub mod spec;

pub use adapter::{ForwardMode, ModelAdapter, ParamMut};
pub use classifier::{Stage, StagedClassifier};
pub use labels::ClassLabelSpace;
pub use manifest::ModelManifest;
pub use snapshot::ParamSnapshot;
pub use spec::{BackboneSpec, LayerSpec, StageSpec};

pub mod dense;
pub mod param;

pub use dense::Layer;
pub use param::Param;

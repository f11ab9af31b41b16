pub mod aggregator;
pub mod algorithm;
pub mod combiner;
pub mod computation;

pub use aggregator::{AggregatorKind, AggregatorValue, Aggregators};
pub use algorithm::{Algorithm, MasterContext, MessageValue};
pub use combiner::{Combiner, FnCombiner, MaxCombiner, MinCombiner, SumCombiner};
pub use computation::{VertexComputation, VertexContext};

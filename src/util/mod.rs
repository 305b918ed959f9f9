//! Small self-contained utilities.

mod rng;

pub use rng::SampleRng;

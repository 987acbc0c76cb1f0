//! Scalar grid container and the box filters run over it

pub mod data;
pub mod smoothing;

pub use data::Grid;

pub mod prelude;
pub mod common;
pub mod error;
pub mod geometry;
pub mod props;
pub mod routing;
pub mod config;
pub mod serializer;
pub mod calc;
pub mod planner;
pub mod engine;
pub mod stats;
pub mod writer;
pub mod model;
pub mod simulation;

#[cfg(test)]
mod test_support;

pub mod config;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod sources;

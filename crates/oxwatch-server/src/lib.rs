//! Host process for the detection engine: configuration, definition seed
//! loading, the stdin value stream and a logging alarm sink.

pub mod config;
pub mod definition_seed;
pub mod engine;
pub mod feed;
pub mod sink;

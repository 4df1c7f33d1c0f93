pub mod common;
pub mod config;
pub mod data_model;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod probe_engine;
pub mod runtime;
pub mod settings;
pub mod storage;

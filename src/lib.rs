pub mod anomaly;
pub mod api;
pub mod config;
pub mod engine;
pub mod fraud;
pub mod gate;
pub mod manipulation;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod store;

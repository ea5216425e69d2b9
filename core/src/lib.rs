//! alec-core: multi-round credit decisioning simulator for active-learning
//! experiments.

pub mod allocator;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod export;
pub mod query_strategy;
pub mod records;
pub mod risk_model;
pub mod rng;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod stream;
pub mod summary;
pub mod types;

// src/lib.rs — Library root for editstream

pub mod aggregator;
pub mod cli;
pub mod gateway;
pub mod infra;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod storage;
pub mod transport;

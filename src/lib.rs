// src/lib.rs — Library root for gpurent

pub mod cli;
pub mod core;
pub mod infra;
pub mod store;

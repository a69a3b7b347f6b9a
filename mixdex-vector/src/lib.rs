pub mod canonical;
pub mod config;
pub mod cosine;
pub mod engine;
pub mod error;
pub mod index;
pub mod interactions;
pub mod matrix;
pub mod mips;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod solver;
pub mod store;
pub mod transport;

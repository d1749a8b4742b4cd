pub mod algorithms;
pub mod catalog;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

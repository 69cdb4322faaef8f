pub mod admission;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod http;  // HTTP API
pub mod infra;
pub mod logging;
pub mod model;
pub mod repository;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use model::*;
pub use server::DeckServer;

pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod index;
mod metrics;
pub mod search;
mod server;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::Opts;
pub use embed::{Embedder, ImageEmbedder};
pub use engine::{Retrieval, RetrievalBuilder};
pub use error::RetrievalError;

pub mod config;
pub mod error;
pub mod quality;
pub mod types;

pub use config::{default_graph_search_keys, Config};
pub use error::{EngineError, EngineResult};
pub use types::*;

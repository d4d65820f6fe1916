mod client;
pub mod cypher;
mod reader;

pub use client::GraphClient;
pub use reader::{parse_timestamp, GraphSearcher};

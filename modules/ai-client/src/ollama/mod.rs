mod client;
mod types;

pub use client::{OllamaChat, OllamaEmbedder};

pub mod ollama;
pub mod openai;
pub mod traits;
pub mod util;

pub use ollama::{OllamaChat, OllamaEmbedder};
pub use openai::OpenAiChat;
pub use traits::{ChatModel, EmbedModel, GenerateOptions};
pub use util::cosine;

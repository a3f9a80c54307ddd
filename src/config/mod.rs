// Configuration management module
// TOML settings for the Ollama backends, chunking, storage and retrieval

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, GenerationConfig, OllamaConfig, RetrievalConfig, StoreConfig,
};

mod prompt;

pub use prompt::{AiService, PromptBuilder, PromptContext, PromptLinks, DEFAULT_TEMPLATE};

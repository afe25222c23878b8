use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{AppError, Result};

pub const DEFAULT_TEMPLATE: &str = "learn";
pub const MAX_PROMPT_CHARS: usize = 30_000;
const TRUNCATION_MARKER: &str = "\n[transcript truncated]";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(transcript|title|channel)\}").expect("valid placeholder regex")
});

const LEARN_TEMPLATE: &str = r#"I want to learn from this video transcript. Please analyze it and help me understand:
1. Key concepts and main ideas
2. Important terminology and definitions
3. Practical applications
4. Follow-up questions for deeper understanding

Transcript:
{transcript}"#;

const ANALYSIS_TEMPLATE: &str = r#"Please analyze this YouTube video transcript carefully and provide:
1. Key points and main ideas
2. Important insights and takeaways
3. Any notable quotes or statements
4. A brief summary

Transcript:
{transcript}"#;

const SUMMARIZE_TEMPLATE: &str =
    "Summarize the following transcript in a clear and concise way:\n\n{transcript}";

const KEY_POINTS_TEMPLATE: &str =
    "Extract the main key points from this transcript:\n\n{transcript}";

const STUDY_GUIDE_TEMPLATE: &str = "Create a study guide from this transcript with sections for key concepts, definitions, and practice questions:\n\n{transcript}";

/// Video details available to templates as `{title}` and `{channel}`.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub title: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: BTreeMap<String, String>,
}

impl PromptBuilder {
    /// Built-in templates, overridden or extended by `custom`.
    pub fn new(custom: &BTreeMap<String, String>) -> Self {
        let mut templates: BTreeMap<String, String> = [
            ("learn", LEARN_TEMPLATE),
            ("analysis", ANALYSIS_TEMPLATE),
            ("summarize", SUMMARIZE_TEMPLATE),
            ("key_points", KEY_POINTS_TEMPLATE),
            ("study_guide", STUDY_GUIDE_TEMPLATE),
        ]
        .into_iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();

        templates.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { templates }
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Renders `template` (the default one when `None`). Prompts over
    /// [`MAX_PROMPT_CHARS`] get a shortened transcript plus a marker.
    pub fn render(
        &self,
        template: Option<&str>,
        transcript: &str,
        context: &PromptContext,
    ) -> Result<String> {
        let name = template.unwrap_or(DEFAULT_TEMPLATE);
        let text = self
            .templates
            .get(name)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "prompt template '{}' (available: {})",
                    name,
                    self.template_names().join(", ")
                ))
            })?;

        let prompt = fill(text, transcript, context);
        if prompt.chars().count() <= MAX_PROMPT_CHARS {
            return Ok(prompt);
        }

        let frame = fill(text, "", context).chars().count();
        let slots = PLACEHOLDER_RE
            .find_iter(text)
            .filter(|m| m.as_str() == "{transcript}")
            .count()
            .max(1);
        let marker = TRUNCATION_MARKER.chars().count();
        let available = (MAX_PROMPT_CHARS.saturating_sub(frame) / slots).saturating_sub(marker);

        let mut shortened: String = transcript.chars().take(available).collect();
        shortened.push_str(TRUNCATION_MARKER);
        tracing::debug!(
            "Prompt truncated: transcript cut to {} of {} chars",
            available,
            transcript.chars().count()
        );
        Ok(fill(text, &shortened, context))
    }
}

fn fill(template: &str, transcript: &str, context: &PromptContext) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "transcript" => transcript.to_string(),
            "title" => context.title.clone(),
            _ => context.channel.clone(),
        })
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiService {
    ChatGpt,
    Claude,
    Gemini,
}

impl AiService {
    pub const ALL: [AiService; 3] = [AiService::ChatGpt, AiService::Claude, AiService::Gemini];

    pub fn name(&self) -> &'static str {
        match self {
            AiService::ChatGpt => "chatgpt",
            AiService::Claude => "claude",
            AiService::Gemini => "gemini",
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            AiService::ChatGpt => "https://chat.openai.com/chat",
            AiService::Claude => "https://claude.ai",
            AiService::Gemini => "https://gemini.google.com",
        }
    }

    /// Link that opens the service with `prompt` pre-filled.
    pub fn deep_link(&self, prompt: &str) -> String {
        format!("{}?text={}", self.base_url(), urlencoding::encode(prompt))
    }
}

impl FromStr for AiService {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AiService::ALL
            .into_iter()
            .find(|service| service.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown AI service '{}' (expected chatgpt, claude or gemini)",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptLinks {
    pub chatgpt: String,
    pub claude: String,
    pub gemini: String,
}

impl PromptLinks {
    pub fn for_prompt(prompt: &str) -> Self {
        Self {
            chatgpt: AiService::ChatGpt.deep_link(prompt),
            claude: AiService::Claude.deep_link(prompt),
            gemini: AiService::Gemini.deep_link(prompt),
        }
    }

    pub fn get(&self, service: AiService) -> &str {
        match service {
            AiService::ChatGpt => &self.chatgpt,
            AiService::Claude => &self.claude,
            AiService::Gemini => &self.gemini,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(&BTreeMap::new())
    }

    fn builder_with(custom: &BTreeMap<String, String>) -> PromptBuilder {
        PromptBuilder::new(custom)
    }

    #[test]
    fn default_template_is_learn() {
        let prompt = builder()
            .render(None, "Ownership moves values.", &PromptContext::default())
            .unwrap();
        assert!(prompt.starts_with("I want to learn from this video transcript."));
        assert!(prompt.ends_with("Transcript:\nOwnership moves values."));
    }

    #[test]
    fn placeholders_are_filled_once() {
        let mut custom = BTreeMap::new();
        custom.insert(
            "tagged".to_string(),
            "{title} by {channel}:\n{transcript}".to_string(),
        );
        let context = PromptContext {
            title: "Borrowing".to_string(),
            channel: "Rust Talks".to_string(),
        };

        let prompt = builder_with(&custom)
            .render(Some("tagged"), "mentions {title} literally", &context)
            .unwrap();
        assert_eq!(prompt, "Borrowing by Rust Talks:\nmentions {title} literally");
    }

    #[test]
    fn custom_templates_override_builtins() {
        let mut custom = BTreeMap::new();
        custom.insert("summarize".to_string(), "TL;DR: {transcript}".to_string());
        let builder = builder_with(&custom);

        let prompt = builder
            .render(Some("summarize"), "text", &PromptContext::default())
            .unwrap();
        assert_eq!(prompt, "TL;DR: text");
        assert!(builder.template_names().contains(&"study_guide"));
    }

    #[test]
    fn unknown_template_is_not_found() {
        let err = builder()
            .render(Some("poem"), "text", &PromptContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn long_transcripts_are_truncated_to_the_limit() {
        let transcript = "é".repeat(MAX_PROMPT_CHARS * 2);
        let prompt = builder()
            .render(Some("summarize"), &transcript, &PromptContext::default())
            .unwrap();

        assert!(prompt.ends_with(TRUNCATION_MARKER));
        assert!(prompt.chars().count() <= MAX_PROMPT_CHARS);
        assert!(prompt.chars().count() > MAX_PROMPT_CHARS - 100);
    }

    #[test]
    fn short_prompts_are_untouched() {
        let transcript = "a".repeat(1000);
        let prompt = builder()
            .render(Some("key_points"), &transcript, &PromptContext::default())
            .unwrap();
        assert!(!prompt.contains("[transcript truncated]"));
    }

    #[test]
    fn deep_links_percent_encode_the_prompt() {
        let links = PromptLinks::for_prompt("What is 1 + 1?\nExplain & show");
        assert_eq!(
            links.chatgpt,
            "https://chat.openai.com/chat?text=What%20is%201%20%2B%201%3F%0AExplain%20%26%20show"
        );
        assert!(links.claude.starts_with("https://claude.ai?text=What%20is"));
        assert!(links.get(AiService::Gemini).starts_with("https://gemini.google.com?text="));
    }

    #[test]
    fn service_names_parse_case_insensitively() {
        assert_eq!("ChatGPT".parse::<AiService>(), Ok(AiService::ChatGpt));
        assert_eq!(" gemini ".parse::<AiService>(), Ok(AiService::Gemini));
        assert!("bard".parse::<AiService>().is_err());
    }
}

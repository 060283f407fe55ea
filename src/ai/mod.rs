pub mod openai;
pub mod router;

use async_trait::async_trait;

/// Returned when a well-formed analysis response carries no content.
pub const NO_DESCRIPTION: &str = "No description available.";

/// Returned when a well-formed text response carries no content.
pub const NO_RESPONSE: &str = "No response available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which model a text request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Multimodal model, also used for image analysis.
    Vision,
    /// Cheaper text model for follow-ups.
    Fast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub description: String,
    pub objects: Vec<String>,
    pub keywords: Vec<String>,
    pub model: String,
}

impl AnalysisResult {
    /// Splits trailing `Objects:` / `Keywords:` lines out of a model reply.
    pub fn from_model_text(text: &str, model: &str) -> Self {
        let mut description = Vec::new();
        let mut objects = Vec::new();
        let mut keywords = Vec::new();

        for line in text.lines() {
            if let Some(rest) = strip_label(line, "objects:") {
                objects = split_list(rest);
            } else if let Some(rest) = strip_label(line, "keywords:") {
                keywords = split_list(rest);
            } else {
                description.push(line);
            }
        }

        let description = description.join("\n").trim().to_string();
        Self {
            description: if description.is_empty() {
                NO_DESCRIPTION.to_string()
            } else {
                description
            },
            objects,
            keywords,
            model: model.to_string(),
        }
    }

    /// Description plus structured lists, as handed to the fast model.
    pub fn as_context(&self) -> String {
        let mut context = self.description.clone();
        if !self.objects.is_empty() {
            context.push_str("\nObjects: ");
            context.push_str(&self.objects.join(", "));
        }
        if !self.keywords.is_empty() {
            context.push_str("\nKeywords: ");
            context.push_str(&self.keywords.join(", "));
        }
        context
    }
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let trimmed = line.trim_start().trim_start_matches(['-', '*']).trim_start();
    let head = trimmed.get(..label.len())?;
    head.eq_ignore_ascii_case(label)
        .then(|| &trimmed[label.len()..])
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
    #[error("OpenAI request failed: {0}")]
    Transport(String),
    #[error("OpenAI API error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("Failed to parse OpenAI response: {0}")]
    Decode(String),
}

/// Outbound model calls. One request per call, never retried.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Describes a PNG screenshot. `question` steers a re-analysis.
    async fn analyze_image(
        &self,
        image_png: &[u8],
        question: Option<&str>,
    ) -> Result<AnalysisResult, GatewayError>;

    async fn answer_text(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
        tier: Tier,
    ) -> Result<String, GatewayError>;
}

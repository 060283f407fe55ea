use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AnalysisResult, ConversationTurn, GatewayError, ModelGateway, Tier};
use super::{NO_DESCRIPTION, NO_RESPONSE};
use crate::config::{ApiKey, AppConfig};

pub const SYSTEM_PROMPT: &str = "You are an AI assistant analyzing screenshots and \
     answering the user's questions about them. Be concise.";

const ANALYSIS_PROMPT: &str = "What's in this screenshot? Describe it in a few sentences. \
     Then add a line starting with 'Objects:' listing the main visible objects, and a line \
     starting with 'Keywords:' listing a few keywords, both comma-separated.";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessageResponse>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

impl OpenAIResponse {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
    }
}

/// Chat-completions client for both model tiers.
pub struct OpenAiGateway {
    client: Client,
    api_key: ApiKey,
    config: AppConfig,
}

impl OpenAiGateway {
    pub fn new(config: &AppConfig, api_key: ApiKey) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            config: config.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    fn model_for(&self, tier: Tier) -> (&str, u32) {
        match tier {
            Tier::Vision => (self.config.vision_model.as_str(), self.config.vision_max_tokens),
            Tier::Fast => (self.config.fast_model.as_str(), self.config.fast_max_tokens),
        }
    }

    /// Sends one request and returns the first completion's content, if any.
    async fn complete(&self, request: &OpenAIRequest) -> Result<Option<String>, GatewayError> {
        log::info!(
            "Calling {} ({} messages)",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("{} returned {}", request.model, status);
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(body.first_content())
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn analyze_image(
        &self,
        image_png: &[u8],
        question: Option<&str>,
    ) -> Result<AnalysisResult, GatewayError> {
        if image_png.is_empty() {
            return Err(GatewayError::EmptyInput("image"));
        }

        let prompt = match question {
            Some(q) => format!(
                "{}\nThe user is asking: \"{}\". Make sure the description covers it.",
                ANALYSIS_PROMPT, q
            ),
            None => ANALYSIS_PROMPT.to_string(),
        };

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image_png));
        let (model, max_tokens) = self.model_for(Tier::Vision);
        let request = OpenAIRequest {
            model: model.to_string(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: serde_json::Value::String(SYSTEM_PROMPT.to_string()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: serde_json::json!([
                        {
                            "type": "text",
                            "text": prompt
                        },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": data_url,
                                "detail": self.config.image_detail
                            }
                        }
                    ]),
                },
            ],
            max_tokens,
            temperature: self.config.temperature,
        };

        let result = match self.complete(&request).await? {
            Some(text) => AnalysisResult::from_model_text(&text, model),
            None => AnalysisResult::from_model_text(NO_DESCRIPTION, model),
        };
        Ok(result)
    }

    async fn answer_text(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
        tier: Tier,
    ) -> Result<String, GatewayError> {
        if prompt.trim().is_empty() {
            return Err(GatewayError::EmptyInput("prompt"));
        }

        let mut messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: serde_json::Value::String(SYSTEM_PROMPT.to_string()),
        }];
        for turn in history {
            messages.push(OpenAIMessage {
                role: turn.role.as_str().to_string(),
                content: serde_json::Value::String(turn.content.clone()),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: serde_json::Value::String(prompt.to_string()),
        });

        let (model, max_tokens) = self.model_for(tier);
        let request = OpenAIRequest {
            model: model.to_string(),
            messages,
            max_tokens,
            temperature: self.config.temperature,
        };

        Ok(self
            .complete(&request)
            .await?
            .unwrap_or_else(|| NO_RESPONSE.to_string()))
    }
}

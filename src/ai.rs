//! LLM gateway client for menu planning and the automation jobs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Recipe offered to the model; it may only answer with these ids.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Candidate {
    pub id: Uuid,
    pub title: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum AiTask {
    PlanWeek {
        adults: i32,
        children: i32,
        restrictions: Vec<String>,
        candidates: Vec<Candidate>,
    },
    PickAlternative {
        slot: String,
        restrictions: Vec<String>,
        candidates: Vec<Candidate>,
        exclude: Vec<Uuid>,
    },
    AnalyzeMealPhoto {
        image_url: String,
    },
    FridgeInspiration {
        ingredients: Vec<String>,
        restrictions: Vec<String>,
    },
    Substitutions {
        ingredient: String,
        restrictions: Vec<String>,
    },
}

impl AiTask {
    pub fn name(&self) -> &'static str {
        match self {
            AiTask::PlanWeek { .. } => "plan_week",
            AiTask::PickAlternative { .. } => "pick_alternative",
            AiTask::AnalyzeMealPhoto { .. } => "analyze_meal_photo",
            AiTask::FridgeInspiration { .. } => "fridge_inspiration",
            AiTask::Substitutions { .. } => "substitutions",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            AiTask::PlanWeek { .. } => {
                "You plan family meals. Answer with JSON: {\"days\": {\"monday\": {\"lunch\": \"<recipe id>\", \
                 \"dinner\": \"<recipe id>\"}, ...}} covering monday to sunday. Use only the candidate ids given."
            }
            AiTask::PickAlternative { .. } => {
                "You replace one planned meal. Answer with JSON: {\"recipe_id\": \"<id>\"} choosing one \
                 candidate id that is not excluded."
            }
            AiTask::AnalyzeMealPhoto { .. } => {
                "You estimate the nutrition of the meal in the photo. Answer with JSON: {\"dishes\": [..], \
                 \"calories_kcal\": n, \"protein_g\": n, \"carbs_g\": n, \"fat_g\": n, \"confidence\": 0..1}."
            }
            AiTask::FridgeInspiration { .. } => {
                "You suggest recipes from what is in the fridge. Answer with JSON: {\"ideas\": [{\"title\": s, \
                 \"uses\": [s], \"missing\": [s], \"steps\": [s]}]} respecting the restrictions."
            }
            AiTask::Substitutions { .. } => {
                "You suggest ingredient substitutions. Answer with JSON: {\"substitutes\": [{\"name\": s, \
                 \"ratio\": s, \"note\": s}]} respecting the restrictions."
            }
        }
    }

    fn user_content(&self) -> Value {
        match self {
            AiTask::PlanWeek { adults, children, restrictions, candidates } => json!(
                json!({
                    "household": { "adults": adults, "children": children },
                    "restrictions": restrictions,
                    "candidates": candidates,
                })
                .to_string()
            ),
            AiTask::PickAlternative { slot, restrictions, candidates, exclude } => json!(
                json!({
                    "slot": slot,
                    "restrictions": restrictions,
                    "candidates": candidates,
                    "exclude": exclude,
                })
                .to_string()
            ),
            AiTask::AnalyzeMealPhoto { image_url } => json!([
                { "type": "text", "text": "Analyse this meal." },
                { "type": "image_url", "image_url": { "url": image_url } },
            ]),
            AiTask::FridgeInspiration { ingredients, restrictions } => json!(
                json!({ "ingredients": ingredients, "restrictions": restrictions }).to_string()
            ),
            AiTask::Substitutions { ingredient, restrictions } => json!(
                json!({ "ingredient": ingredient, "restrictions": restrictions }).to_string()
            ),
        }
    }
}

#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Run `task` and return the model's JSON answer.
    async fn run(&self, task: &AiTask) -> Result<Value, AiError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    fn request_body(&self, task: &AiTask) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.4,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": task.system_prompt() },
                { "role": "user", "content": task.user_content() },
            ],
        })
    }
}

/// Pull the JSON object out of a completion, tolerating markdown fences.
pub fn parse_completion(content: &str) -> Result<Value, AiError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| AiError::Malformed(e.to_string()))
}

#[async_trait]
impl AiGateway for LlmClient {
    async fn run(&self, task: &AiTask) -> Result<Value, AiError> {
        debug!(task = task.name(), "llm request");
        let res = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(task))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::Transport(e.to_string())
                }
            })?;

        match res.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(AiError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AiError::InvalidApiKey),
            s => {
                let body = res.text().await.unwrap_or_default();
                warn!(status = s.as_u16(), task = task.name(), "llm http error");
                return Err(AiError::Http { status: s.as_u16(), body });
            }
        }

        let chat: ChatResponse = res
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::Malformed("empty completion".into()))?;
        parse_completion(&content)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_completion_strips_fences() {
        let v = parse_completion("```json\n{\"ideas\": []}\n```").unwrap();
        assert_eq!(v, json!({ "ideas": [] }));
        let v = parse_completion("  {\"a\": 1} ").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parse_completion_rejects_prose() {
        assert!(matches!(parse_completion("Sure! Here is"), Err(AiError::Malformed(_))));
    }

    #[test]
    fn request_body_carries_model_and_json_mode() {
        let client = LlmClient::new(&LlmConfig {
            base_url: "https://llm.local/v1/".into(),
            api_key: "k".into(),
            model: "m".into(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.endpoint, "https://llm.local/v1/chat/completions");
        let body = client.request_body(&AiTask::Substitutions {
            ingredient: "butter".into(),
            restrictions: vec!["lactose_free".into()],
        });
        assert_eq!(body["model"], "m");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body["messages"][1]["content"].as_str().unwrap().contains("butter"));
    }

    #[test]
    fn photo_task_sends_image_part() {
        let task = AiTask::AnalyzeMealPhoto { image_url: "https://s3/x.jpg".into() };
        assert_eq!(task.user_content()[1]["image_url"]["url"], "https://s3/x.jpg");
    }
}

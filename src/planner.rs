//! The AI action layer behind `Page::act`.
//!
//! An OpenAI-compatible chat model is shown the instruction together with a
//! compact DOM snapshot and answers with one browser step at a time.

use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::PlannerConfig;

/// Plan/execute rounds per `act` call.
pub const MAX_ACT_STEPS: usize = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = r#"You operate a real Chrome browser that is exploring a SaaS product. You receive ONE instruction and reply with ONE step at a time as JSON.

Available actions:
- {"action":"Click","selector":"[data-eid=\"[e0]\"]"}
- {"action":"TypeInto","selector":"[data-eid=\"[e0]\"]","text":"search query"}
- {"action":"PressKey","key":"Enter"}
- {"action":"Scroll","pixels":800}
- {"action":"Navigate","url":"https://..."}
- {"action":"Done","summary":"Clicked the Sign in button"}

Rules:
1. Return ONLY a single JSON object. No markdown, no explanation.
2. Target elements with the [eN] ids from the DOM snapshot using the selector format [data-eid="[eN]"].
3. Scroll pixels are relative; negative values scroll up.
4. Never enter credentials. A human signs in when a login form is reached.
5. As soon as the instruction is satisfied, or cannot be satisfied on this page, reply with Done."#;

/// A single atomic step the model asks the browser to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum BrowserStep {
    Click { selector: String },
    TypeInto { selector: String, text: String },
    PressKey { key: String },
    Scroll { pixels: i64 },
    Navigate { url: String },
    Done { summary: String },
}

/// What the model sees before choosing a step.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub dom_snapshot: String,
}

#[derive(Debug, Clone)]
pub struct ActPlanner {
    client: Client,
    config: PlannerConfig,
}

impl ActPlanner {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Asks for the next step. `history` holds the steps already taken for
    /// this instruction, oldest first.
    pub async fn plan(
        &self,
        instruction: &str,
        observation: &Observation,
        history: &[BrowserStep],
    ) -> Result<BrowserStep> {
        let mut prompt = format!(
            "Instruction: {instruction}\n\nPage URL: {}\nTitle: {}\n\nDOM:\n{}",
            observation.url, observation.title, observation.dom_snapshot
        );
        if !history.is_empty() {
            prompt.push_str("\n\nSteps already taken:");
            for step in history {
                prompt.push_str(&format!("\n- {}", serde_json::to_string(step)?));
            }
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt},
                ],
                "temperature": 0.2,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(anyhow!("OpenAI API error ({status}): {message}"));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("No content in LLM response: {body}"))?;
        debug!(content, "planner replied");
        parse_step(content)
    }
}

/// Decodes a model reply, tolerating markdown code fences.
pub fn parse_step(content: &str) -> Result<BrowserStep> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(cleaned).map_err(|e| anyhow!("Failed to parse LLM response: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn planner(base_url: String) -> ActPlanner {
        ActPlanner::new(PlannerConfig {
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            base_url,
        })
        .unwrap()
    }

    fn observation() -> Observation {
        Observation {
            url: "https://x.com/".into(),
            title: "X".into(),
            dom_snapshot: "[e0] link \"Sign in\" href=/login".into(),
        }
    }

    #[test]
    fn fenced_replies_parse() {
        let step = parse_step("```json\n{\"action\":\"Click\",\"selector\":\"[data-eid=\\\"[e0]\\\"]\"}\n```")
            .unwrap();
        assert_eq!(
            step,
            BrowserStep::Click {
                selector: r#"[data-eid="[e0]"]"#.into()
            }
        );
        assert!(parse_step("I would click the button").is_err());
    }

    #[tokio::test]
    async fn asks_the_chat_endpoint_for_one_step() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"action\":\"Scroll\",\"pixels\":600}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let step = planner(server.uri())
            .plan("scroll to see features", &observation(), &[])
            .await
            .unwrap();
        assert_eq!(step, BrowserStep::Scroll { pixels: 600 });
    }

    #[tokio::test]
    async fn api_errors_surface_the_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let err = planner(server.uri())
            .plan("click sign in", &observation(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Incorrect API key provided"));
    }
}

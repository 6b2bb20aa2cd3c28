use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::agent_engine::state::ComputerAction;
use crate::config::ProviderEntry;
use crate::desktop::{MouseButton, Point, ScrollDirection};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::provider::ComputerProtocol;
use crate::llm::redact_images;
use crate::llm::types::{ChatMessage, ProviderTurn, ToolCallRequest, TurnContext};

/// OpenAI gives `wait` no duration.
const DEFAULT_WAIT_MS: u64 = 1000;

/// OpenAI Responses API with the `computer_use_preview` tool. History lives
/// server-side and is chained through `previous_response_id`.
pub struct OpenAiComputer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    previous_response_id: Option<String>,
    /// Input items for the next request.
    pending_input: Vec<Value>,
    /// Safety checks to acknowledge, keyed by call id.
    safety_checks: HashMap<String, Vec<Value>>,
}

impl OpenAiComputer {
    pub fn new(entry: &ProviderEntry, client: reqwest::Client) -> DeskPilotResult<Self> {
        let api_key = entry
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DeskPilotError::Config("OPENAI_API_KEY is not set".into()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/responses", entry.base_url.trim_end_matches('/')),
            api_key,
            model: entry.model.clone(),
            previous_response_id: None,
            pending_input: Vec::new(),
            safety_checks: HashMap::new(),
        })
    }

    fn request_body(&mut self, ctx: &TurnContext<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "tools": [{
                "type": "computer_use_preview",
                "display_width": ctx.display.width,
                "display_height": ctx.display.height,
                "environment": "linux",
            }],
            "input": std::mem::take(&mut self.pending_input),
            "instructions": ctx.system_prompt,
            "truncation": "auto",
            "reasoning": { "effort": "medium", "summary": "concise" },
        });
        if let Some(prev) = &self.previous_response_id {
            body["previous_response_id"] = json!(prev);
        }
        body
    }
}

#[async_trait]
impl ComputerProtocol for OpenAiComputer {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn begin(&mut self, messages: &[ChatMessage]) {
        self.previous_response_id = None;
        self.safety_checks.clear();
        self.pending_input = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
    }

    async fn next_turn(&mut self, ctx: &TurnContext<'_>) -> DeskPilotResult<ProviderTurn> {
        let body = self.request_body(ctx);
        tracing::debug!(
            provider = "openai",
            model = %self.model,
            body = %redact_images(&body),
            "sending responses request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeskPilotError::provider(None, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskPilotError::Provider {
                status: Some(status.as_u16()),
                message: err_body,
                // 429 covers both rate limits and exhausted quota; treat it as quota.
                quota_exceeded: status.as_u16() == 429,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| DeskPilotError::provider(None, e.to_string()))?;
        if let Some(id) = json["id"].as_str() {
            self.previous_response_id = Some(id.to_string());
        }

        let (turn, safety_checks) = first_call_turn(parse_response(&json));
        if let Some(call) = turn.calls.first() {
            if !safety_checks.is_empty() {
                tracing::warn!(call_id = %call.id, checks = safety_checks.len(), "acknowledging safety checks");
                self.safety_checks.insert(call.id.clone(), safety_checks);
            }
        }

        tracing::info!(
            reasoning = turn.reasoning.len(),
            calls = turn.calls.len(),
            "openai turn complete"
        );
        Ok(turn)
    }

    fn record_result(&mut self, call: &ToolCallRequest, screenshot_png: &[u8]) {
        let data = base64::engine::general_purpose::STANDARD.encode(screenshot_png);
        let mut item = json!({
            "type": "computer_call_output",
            "call_id": call.id,
            "output": {
                "type": "input_image",
                "image_url": format!("data:image/png;base64,{data}"),
            },
        });
        if let Some(checks) = self.safety_checks.remove(&call.id) {
            item["acknowledged_safety_checks"] = Value::Array(checks);
        }
        self.pending_input.push(item);
    }
}

pub(crate) struct ParsedCall {
    pub request: ToolCallRequest,
    pub safety_checks: Vec<Value>,
}

pub(crate) struct ParsedResponse {
    pub reasoning: Vec<String>,
    pub calls: Vec<ParsedCall>,
}

/// Splits a Responses API body into message text and computer calls.
pub(crate) fn parse_response(json: &Value) -> ParsedResponse {
    let mut text = String::new();
    let mut calls = Vec::new();

    for item in json["output"].as_array().into_iter().flatten() {
        match item["type"].as_str() {
            Some("message") => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if part["type"].as_str() == Some("output_text") {
                        text.push_str(part["text"].as_str().unwrap_or(""));
                    }
                }
            }
            Some("computer_call") => {
                let id = item["call_id"].as_str().unwrap_or("").to_string();
                calls.push(ParsedCall {
                    request: ToolCallRequest {
                        id,
                        action: parse_action(&item["action"]),
                    },
                    safety_checks: item["pending_safety_checks"]
                        .as_array()
                        .cloned()
                        .unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    ParsedResponse {
        reasoning: if text.is_empty() { Vec::new() } else { vec![text] },
        calls,
    }
}

/// Keeps only the first computer call of a response, along with the safety
/// checks it carries. Later calls are dropped; the model reissues them once it
/// has seen the next screenshot.
pub(crate) fn first_call_turn(parsed: ParsedResponse) -> (ProviderTurn, Vec<Value>) {
    let mut calls = parsed.calls.into_iter();
    let first = calls.next();
    let dropped = calls.count();
    if dropped > 0 {
        tracing::debug!(dropped, "multiple computer calls in one turn, executing the first");
    }

    let mut turn = ProviderTurn {
        reasoning: parsed.reasoning,
        calls: Vec::new(),
    };
    let checks = match first {
        Some(call) => {
            turn.calls.push(call.request);
            call.safety_checks
        }
        None => Vec::new(),
    };
    (turn, checks)
}

/// Out-of-range coordinates are treated as missing.
fn xy(action: &Value) -> Option<(i32, i32)> {
    let x = i32::try_from(action["x"].as_i64()?).ok()?;
    let y = i32::try_from(action["y"].as_i64()?).ok()?;
    Some((x, y))
}

pub(crate) fn parse_action(action: &Value) -> ComputerAction {
    let kind = action["type"].as_str().unwrap_or("").to_string();
    let unknown = || ComputerAction::Unknown { name: kind.clone() };

    match kind.as_str() {
        "click" => {
            let Some((x, y)) = xy(action) else { return unknown() };
            let button = match action["button"].as_str().unwrap_or("left") {
                "left" => MouseButton::Left,
                "right" => MouseButton::Right,
                "wheel" | "middle" => MouseButton::Middle,
                _ => return unknown(),
            };
            ComputerAction::Click {
                x,
                y,
                button,
                modifier: None,
            }
        }
        "double_click" => match xy(action) {
            Some((x, y)) => ComputerAction::DoubleClick { x, y, modifier: None },
            None => unknown(),
        },
        "type" => ComputerAction::Type {
            text: action["text"].as_str().unwrap_or("").to_string(),
        },
        "keypress" => ComputerAction::Keypress {
            keys: action["keys"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
        },
        "move" => match xy(action) {
            Some((x, y)) => ComputerAction::MouseMove { x, y },
            None => unknown(),
        },
        "scroll" => {
            let Some((x, y)) = xy(action) else { return unknown() };
            let delta = action["scroll_y"].as_i64().unwrap_or(0);
            ComputerAction::Scroll {
                x,
                y,
                direction: if delta < 0 {
                    ScrollDirection::Up
                } else {
                    ScrollDirection::Down
                },
                amount: u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX),
                modifier: None,
            }
        }
        "drag" => {
            let path: Vec<Point> = action["path"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|p| xy(p).map(|(x, y)| Point::new(x, y)))
                .collect();
            match (path.first(), path.last()) {
                (Some(start), Some(end)) if path.len() >= 2 => ComputerAction::Drag {
                    start: *start,
                    end: *end,
                },
                _ => unknown(),
            }
        }
        "wait" => ComputerAction::Wait {
            duration_ms: action["ms"].as_u64().unwrap_or(DEFAULT_WAIT_MS),
        },
        "screenshot" => ComputerAction::Screenshot,
        _ => unknown(),
    }
}

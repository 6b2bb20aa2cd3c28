use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::agent_engine::state::ComputerAction;
use crate::config::ProviderEntry;
use crate::desktop::{MouseButton, Point, ScrollDirection};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::executor::dispatcher::split_keys;
use crate::llm::provider::ComputerProtocol;
use crate::llm::redact_images;
use crate::llm::types::{ChatMessage, ProviderTurn, ToolCallRequest, TurnContext};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const COMPUTER_USE_BETA: &str = "computer-use-2025-01-24";
const MAX_TOKENS: u32 = 4096;
const THINKING_BUDGET: u32 = 1024;

/// Anthropic Messages API with the `computer_20250124` tool and extended
/// thinking. The full history is resent every turn.
pub struct AnthropicComputer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    messages: Vec<Value>,
    /// `tool_result` blocks waiting to be sent as the next user turn.
    pending_results: Vec<Value>,
}

impl AnthropicComputer {
    pub fn new(entry: &ProviderEntry, client: reqwest::Client) -> DeskPilotResult<Self> {
        let api_key = entry.api_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
            DeskPilotError::Config("ANTHROPIC_API_KEY or ANTHROPIC_AUTH_TOKEN is not set".into())
        })?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", entry.base_url.trim_end_matches('/')),
            api_key,
            model: entry.model.clone(),
            messages: Vec::new(),
            pending_results: Vec::new(),
        })
    }

    fn request_body(&mut self, ctx: &TurnContext<'_>) -> Value {
        if !self.pending_results.is_empty() {
            let results = std::mem::take(&mut self.pending_results);
            self.messages.push(json!({ "role": "user", "content": results }));
        }
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": ctx.system_prompt,
            "messages": self.messages,
            "tools": [{
                "type": "computer_20250124",
                "name": "computer",
                "display_width_px": ctx.display.width,
                "display_height_px": ctx.display.height,
            }],
            "thinking": { "type": "enabled", "budget_tokens": THINKING_BUDGET },
        })
    }
}

#[async_trait]
impl ComputerProtocol for AnthropicComputer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn begin(&mut self, messages: &[ChatMessage]) {
        self.pending_results.clear();
        self.messages = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "content": [{ "type": "text", "text": m.content }],
                })
            })
            .collect();
    }

    async fn next_turn(&mut self, ctx: &TurnContext<'_>) -> DeskPilotResult<ProviderTurn> {
        let body = self.request_body(ctx);
        tracing::debug!(
            provider = "anthropic",
            model = %self.model,
            body = %redact_images(&body),
            "sending messages request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", COMPUTER_USE_BETA)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeskPilotError::provider(None, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskPilotError::provider(Some(status.as_u16()), err_body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| DeskPilotError::provider(None, e.to_string()))?;
        let turn = parse_response(&json);

        if !turn.calls.is_empty() {
            // Thinking blocks carry signatures the API verifies on the next request.
            self.messages.push(json!({
                "role": "assistant",
                "content": json["content"].clone(),
            }));
        }

        tracing::info!(
            reasoning = turn.reasoning.len(),
            calls = turn.calls.len(),
            stop_reason = json["stop_reason"].as_str().unwrap_or(""),
            "anthropic turn complete"
        );
        Ok(turn)
    }

    fn record_result(&mut self, call: &ToolCallRequest, screenshot_png: &[u8]) {
        let data = base64::engine::general_purpose::STANDARD.encode(screenshot_png);
        self.pending_results.push(json!({
            "type": "tool_result",
            "tool_use_id": call.id,
            "content": [{
                "type": "image",
                "source": { "type": "base64", "media_type": "image/png", "data": data },
            }],
            "is_error": false,
        }));
    }
}

/// Thinking blocks become separate reasoning entries ahead of the joined
/// text blocks; every `tool_use` block becomes a call.
pub(crate) fn parse_response(json: &Value) -> ProviderTurn {
    let mut reasoning = Vec::new();
    let mut text = String::new();
    let mut calls = Vec::new();

    for block in json["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("thinking") => {
                if let Some(thinking) = block["thinking"].as_str().filter(|t| !t.is_empty()) {
                    reasoning.push(thinking.to_string());
                }
            }
            Some("text") => text.push_str(block["text"].as_str().unwrap_or("")),
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let action = match block["name"].as_str() {
                    Some("computer") => parse_action(&block["input"]),
                    other => ComputerAction::Unknown {
                        name: other.unwrap_or("").to_string(),
                    },
                };
                calls.push(ToolCallRequest { id, action });
            }
            _ => {}
        }
    }

    if !text.is_empty() {
        reasoning.push(text);
    }
    ProviderTurn { reasoning, calls }
}

/// `[x, y]`; out-of-range values are treated as missing.
fn coordinate(v: &Value) -> Option<(i32, i32)> {
    let arr = v.as_array()?;
    let x = i32::try_from(arr.first()?.as_i64()?).ok()?;
    let y = i32::try_from(arr.get(1)?.as_i64()?).ok()?;
    Some((x, y))
}

pub(crate) fn parse_action(input: &Value) -> ComputerAction {
    let kind = input["action"].as_str().unwrap_or("").to_string();
    let unknown = || ComputerAction::Unknown { name: kind.clone() };
    let modifier = input["text"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let at = coordinate(&input["coordinate"]);

    let click = |button: MouseButton| match at {
        Some((x, y)) => ComputerAction::Click {
            x,
            y,
            button,
            modifier: modifier.clone(),
        },
        None => unknown(),
    };

    match kind.as_str() {
        "left_click" => click(MouseButton::Left),
        "right_click" => click(MouseButton::Right),
        "middle_click" => click(MouseButton::Middle),
        "double_click" => match at {
            Some((x, y)) => ComputerAction::DoubleClick {
                x,
                y,
                modifier: modifier.clone(),
            },
            None => unknown(),
        },
        "triple_click" => match at {
            Some((x, y)) => ComputerAction::TripleClick {
                x,
                y,
                modifier: modifier.clone(),
            },
            None => unknown(),
        },
        "type" => ComputerAction::Type {
            text: input["text"].as_str().unwrap_or("").to_string(),
        },
        "key" | "hold_key" => ComputerAction::Keypress {
            keys: split_keys(input["text"].as_str().unwrap_or("")),
        },
        "mouse_move" => match at {
            Some((x, y)) => ComputerAction::MouseMove { x, y },
            None => unknown(),
        },
        "left_click_drag" => match (coordinate(&input["start_coordinate"]), at) {
            (Some(start), Some(end)) => ComputerAction::Drag {
                start: Point::new(start.0, start.1),
                end: Point::new(end.0, end.1),
            },
            _ => unknown(),
        },
        "scroll" => match at {
            Some((x, y)) => ComputerAction::Scroll {
                x,
                y,
                direction: if input["scroll_direction"].as_str() == Some("up") {
                    ScrollDirection::Up
                } else {
                    ScrollDirection::Down
                },
                amount: input["scroll_amount"]
                    .as_u64()
                    .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
                modifier: modifier.clone(),
            },
            None => unknown(),
        },
        "wait" => ComputerAction::Wait {
            duration_ms: (input["duration"].as_f64().unwrap_or(0.0).max(0.0) * 1000.0) as u64,
        },
        "screenshot" => ComputerAction::Screenshot,
        "cursor_position" => ComputerAction::CursorPosition,
        _ => unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::Resolution;

    fn provider() -> AnthropicComputer {
        let entry = ProviderEntry {
            api_key: Some("key".into()),
            base_url: "https://api.anthropic.com".into(),
            model: "claude-test".into(),
        };
        AnthropicComputer::new(&entry, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn missing_key_is_config_error() {
        let entry = ProviderEntry {
            api_key: None,
            base_url: "https://api.anthropic.com".into(),
            model: "claude-test".into(),
        };
        let err = AnthropicComputer::new(&entry, reqwest::Client::new()).err().unwrap();
        assert!(matches!(err, DeskPilotError::Config(_)));
    }

    #[test]
    fn thinking_precedes_text() {
        let body = json!({
            "content": [
                { "type": "text", "text": "I'll open " },
                { "type": "thinking", "thinking": "Need a terminal first.", "signature": "sig" },
                { "type": "text", "text": "a terminal." },
                { "type": "tool_use", "id": "tu_1", "name": "computer",
                  "input": { "action": "key", "text": "ctrl+alt+t" } }
            ]
        });
        let turn = parse_response(&body);
        assert_eq!(turn.reasoning, vec!["Need a terminal first.", "I'll open a terminal."]);
        assert_eq!(turn.calls.len(), 1);
        assert_eq!(
            turn.calls[0].action,
            ComputerAction::Keypress {
                keys: vec!["ctrl".into(), "alt".into(), "t".into()]
            }
        );
    }

    #[test]
    fn non_computer_tool_is_unknown() {
        let body = json!({ "content": [{ "type": "tool_use", "id": "tu_1", "name": "bash", "input": { "command": "ls" } }] });
        let turn = parse_response(&body);
        assert_eq!(turn.calls[0].action, ComputerAction::Unknown { name: "bash".into() });
    }

    #[test]
    fn action_mapping() {
        assert_eq!(
            parse_action(&json!({ "action": "left_click", "coordinate": [10, 20], "text": "shift" })),
            ComputerAction::Click {
                x: 10,
                y: 20,
                button: MouseButton::Left,
                modifier: Some("shift".into())
            }
        );
        assert_eq!(
            parse_action(&json!({ "action": "left_click_drag", "start_coordinate": [1, 2], "coordinate": [3, 4] })),
            ComputerAction::Drag {
                start: Point::new(1, 2),
                end: Point::new(3, 4)
            }
        );
        assert_eq!(
            parse_action(&json!({ "action": "scroll", "coordinate": [5, 6], "scroll_direction": "up", "scroll_amount": 3 })),
            ComputerAction::Scroll {
                x: 5,
                y: 6,
                direction: ScrollDirection::Up,
                amount: 3,
                modifier: None
            }
        );
        assert_eq!(
            parse_action(&json!({ "action": "wait", "duration": 1.5 })),
            ComputerAction::Wait { duration_ms: 1500 }
        );
        assert_eq!(
            parse_action(&json!({ "action": "left_click" })),
            ComputerAction::Unknown { name: "left_click".into() }
        );
        assert_eq!(
            parse_action(&json!({ "action": "left_mouse_down" })),
            ComputerAction::Unknown { name: "left_mouse_down".into() }
        );
    }

    #[test]
    fn out_of_range_values_do_not_wrap() {
        assert_eq!(
            parse_action(&json!({ "action": "left_click", "coordinate": [4_294_967_396_i64, 10] })),
            ComputerAction::Unknown { name: "left_click".into() }
        );
        assert_eq!(
            parse_action(&json!({ "action": "scroll", "coordinate": [5, 6], "scroll_direction": "up", "scroll_amount": 8_589_934_592_u64 })),
            ComputerAction::Scroll {
                x: 5,
                y: 6,
                direction: ScrollDirection::Up,
                amount: u32::MAX,
                modifier: None
            }
        );
    }

    #[test]
    fn tool_results_become_next_user_turn() {
        let mut p = provider();
        p.begin(&[ChatMessage::user("open a terminal")]);
        let ctx = TurnContext {
            system_prompt: "sys",
            display: Resolution::new(1280, 800),
        };

        let first = p.request_body(&ctx);
        assert_eq!(first["messages"].as_array().unwrap().len(), 1);
        assert_eq!(first["messages"][0]["content"][0]["text"], "open a terminal");
        assert_eq!(first["tools"][0]["display_width_px"], 1280);
        assert_eq!(first["thinking"]["budget_tokens"], THINKING_BUDGET);

        p.messages.push(json!({ "role": "assistant", "content": [] }));
        let call = ToolCallRequest {
            id: "tu_1".into(),
            action: ComputerAction::Screenshot,
        };
        p.record_result(&call, b"png");

        let second = p.request_body(&ctx);
        let messages = second["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "tu_1");
        assert_eq!(messages[2]["content"][0]["content"][0]["source"]["data"], "cG5n");
        assert!(p.pending_results.is_empty());
    }
}

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::desktop::{MouseButton, Point, ScrollDirection};
use crate::errors::DeskPilotError;
use crate::llm::types::ToolCallRequest;

pub const CANCELLED_MESSAGE: &str = "Generation stopped by user";

/// A provider-issued desktop action. Coordinates are in model space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    Click {
        x: i32,
        y: i32,
        button: MouseButton,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<String>,
    },
    DoubleClick {
        x: i32,
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<String>,
    },
    TripleClick {
        x: i32,
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<String>,
    },
    Type {
        text: String,
    },
    Keypress {
        keys: Vec<String>,
    },
    MouseMove {
        x: i32,
        y: i32,
    },
    Scroll {
        x: i32,
        y: i32,
        direction: ScrollDirection,
        amount: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modifier: Option<String>,
    },
    Drag {
        start: Point,
        end: Point,
    },
    Wait {
        duration_ms: u64,
    },
    Screenshot,
    CursorPosition,
    /// Anything the provider sent that the dispatcher does not understand.
    Unknown {
        name: String,
    },
}

/// Lifecycle notification delivered to the client for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SandboxCreated {
        #[serde(rename = "sandboxId")]
        sandbox_id: String,
        #[serde(rename = "vncUrl")]
        vnc_url: String,
    },
    Action {
        action: ComputerAction,
    },
    ActionCompleted,
    Reasoning {
        content: String,
    },
    Error {
        content: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl StreamEvent {
    pub fn done() -> Self {
        StreamEvent::Done { content: None }
    }

    pub fn cancelled() -> Self {
        StreamEvent::Done {
            content: Some(CANCELLED_MESSAGE.to_string()),
        }
    }
}

/// States of the per-request action loop.
#[derive(Debug)]
pub enum LoopState {
    /// Top of an iteration: poll cancellation, then call the provider.
    Requesting,
    /// Tool calls from the last turn still to execute, in order.
    Executing { pending: VecDeque<ToolCallRequest> },
    Failed(DeskPilotError),
    Finished,
}

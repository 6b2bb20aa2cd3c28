use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::EventSink;
use crate::agent_engine::state::{LoopState, StreamEvent};
use crate::desktop::RemoteDesktop;
use crate::executor::coordinator::ResolutionScaler;
use crate::executor::dispatcher;
use crate::llm::provider::ComputerProtocol;
use crate::llm::types::{ChatMessage, ComputerModel, ToolCallRequest, TurnContext};

pub const SYSTEM_PROMPT: &str = "\
You are DeskPilot, an assistant that completes the user's tasks by operating a virtual computer.

Environment:
- The computer is an isolated Ubuntu 22.04 sandbox with Firefox, Visual Studio Code, LibreOffice, \
Python 3, a terminal, a file manager and a text editor installed.
- You automatically receive a screenshot after every action. You never need to request one.
- Everything runs inside a disposable sandbox, so terminal commands are safe to execute.

Rules:
- After typing a command in a terminal, ALWAYS press Enter immediately. Commands do not run until Enter is pressed.
- When the user asks you to press a key (Enter, Tab, Ctrl+C, ...), do it immediately.
- Do not ask for confirmation on routine steps. Run the commands the task requires without asking.
- Break multi-step tasks into steps and continue until the task is complete.
- Prefer Visual Studio Code when editing files.";

/// Drives one provider's computer-use loop against one sandbox.
///
/// Created by [`crate::llm::registry::StreamerFactory`]; consumed by
/// [`ComputerStreamer::stream`], so it cannot be restarted.
pub struct ComputerStreamer {
    model: ComputerModel,
    protocol: Box<dyn ComputerProtocol>,
    desktop: Arc<dyn RemoteDesktop>,
    scaler: ResolutionScaler,
}

impl ComputerStreamer {
    pub fn new(
        model: ComputerModel,
        protocol: Box<dyn ComputerProtocol>,
        desktop: Arc<dyn RemoteDesktop>,
        scaler: ResolutionScaler,
    ) -> Self {
        Self {
            model,
            protocol,
            desktop,
            scaler,
        }
    }

    pub fn model(&self) -> ComputerModel {
        self.model
    }

    /// Spawns the loop and returns its finite, ordered event sequence.
    pub fn stream(
        self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (sink, rx) = EventSink::channel();
        tokio::spawn(async move {
            self.run(messages, cancel, sink).await;
        });
        rx
    }

    /// Runs the loop to completion, writing every event into `sink`.
    pub async fn run(mut self, messages: Vec<ChatMessage>, cancel: CancellationToken, sink: EventSink) {
        let sandbox_id = self.desktop.sandbox_id().to_string();
        tracing::info!(
            provider = self.protocol.name(),
            sandbox_id = %sandbox_id,
            messages = messages.len(),
            display = ?self.scaler.scaled_resolution(),
            actual = ?self.scaler.actual_resolution(),
            "computer loop started"
        );

        self.protocol.begin(&messages);
        let ctx = TurnContext {
            system_prompt: SYSTEM_PROMPT,
            display: self.scaler.scaled_resolution(),
        };

        let mut turns = 0u32;
        let mut state = LoopState::Requesting;
        loop {
            state = match state {
                LoopState::Requesting => {
                    if cancel.is_cancelled() {
                        tracing::info!(sandbox_id = %sandbox_id, "loop cancelled by user");
                        sink.emit(StreamEvent::cancelled()).await;
                        LoopState::Finished
                    } else {
                        turns += 1;
                        self.request_turn(&ctx, &sink, turns).await
                    }
                }

                LoopState::Executing { mut pending } => match pending.pop_front() {
                    Some(call) => match self.execute(&call, &sink).await {
                        Ok(true) => LoopState::Executing { pending },
                        Ok(false) => LoopState::Finished,
                        Err(e) => LoopState::Failed(e),
                    },
                    None => LoopState::Requesting,
                },

                LoopState::Failed(err) => {
                    tracing::error!(
                        provider = self.protocol.name(),
                        sandbox_id = %sandbox_id,
                        error = %err,
                        "computer loop failed"
                    );
                    if sink.emit(StreamEvent::Error { content: err.user_message() }).await {
                        sink.emit(StreamEvent::done()).await;
                    }
                    LoopState::Finished
                }

                LoopState::Finished => break,
            };
        }

        tracing::info!(sandbox_id = %sandbox_id, turns, "computer loop ended");
    }

    async fn request_turn(&mut self, ctx: &TurnContext<'_>, sink: &EventSink, turn: u32) -> LoopState {
        tracing::debug!(provider = self.protocol.name(), turn, "requesting provider turn");
        let response = match self.protocol.next_turn(ctx).await {
            Ok(r) => r,
            Err(e) => return LoopState::Failed(e),
        };

        for text in response.reasoning {
            if text.is_empty() {
                continue;
            }
            if !sink.emit(StreamEvent::Reasoning { content: text }).await {
                return LoopState::Finished;
            }
        }

        if response.calls.is_empty() {
            tracing::info!(turn, "no tool calls, task complete");
            sink.emit(StreamEvent::done()).await;
            return LoopState::Finished;
        }

        LoopState::Executing {
            pending: VecDeque::from(response.calls),
        }
    }

    /// `Ok(false)` when the consumer went away mid-action.
    async fn execute(&mut self, call: &ToolCallRequest, sink: &EventSink) -> crate::errors::DeskPilotResult<bool> {
        if !sink
            .emit(StreamEvent::Action {
                action: call.action.clone(),
            })
            .await
        {
            return Ok(false);
        }

        tracing::info!(call_id = %call.id, action = ?call.action, "executing action");
        dispatcher::dispatch(self.desktop.as_ref(), &self.scaler, &call.action).await?;

        if !sink.emit(StreamEvent::ActionCompleted).await {
            return Ok(false);
        }

        let screenshot = self.scaler.screenshot().await?;
        self.protocol.record_result(call, &screenshot);
        Ok(true)
    }
}

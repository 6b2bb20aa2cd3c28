use async_trait::async_trait;

use crate::errors::DeskPilotResult;
use crate::llm::types::{ChatMessage, ProviderTurn, ToolCallRequest, TurnContext};

/// One vendor's computer-use tool-calling protocol. Implementations own the
/// vendor-native conversation history for a single request.
#[async_trait]
pub trait ComputerProtocol: Send {
    /// Provider identifier used in logs.
    fn name(&self) -> &'static str;

    /// Seed the native history from the caller's messages.
    fn begin(&mut self, messages: &[ChatMessage]);

    /// One provider round trip against the current history.
    async fn next_turn(&mut self, ctx: &TurnContext<'_>) -> DeskPilotResult<ProviderTurn>;

    /// Attach the post-action screenshot as the result of `call`.
    fn record_result(&mut self, call: &ToolCallRequest, screenshot_png: &[u8]);
}

use foreman_protocol::protocol::Event;
use foreman_protocol::protocol::Op;
use foreman_protocol::protocol::Submission;

use crate::error::Result;
use crate::session::Agent;

/// Client-facing handle to one conversation. Thin wrapper over the agent's
/// SQ/EQ channels; all behavior lives in the session behind it.
pub struct ForemanConversation {
    agent: Agent,
}

impl ForemanConversation {
    pub(crate) fn new(agent: Agent) -> Self {
        Self { agent }
    }

    pub async fn submit(&self, op: Op) -> Result<String> {
        self.agent.submit(op).await
    }

    /// Use sparingly; prefer [`Self::submit`] so ids stay unique.
    pub async fn submit_with_id(&self, sub: Submission) -> Result<()> {
        self.agent.submit_with_id(sub).await
    }

    pub async fn next_event(&self) -> Result<Event> {
        self.agent.next_event().await
    }

    pub async fn interrupt(&self) -> Result<String> {
        self.submit(Op::Interrupt).await
    }

    pub async fn shutdown(&self) -> Result<String> {
        self.submit(Op::Shutdown).await
    }

    pub(crate) async fn has_active_turn(&self) -> bool {
        self.agent.session().has_active_turn().await
    }
}

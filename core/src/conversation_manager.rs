//! Creates conversations and keeps them addressable by id.

use std::collections::HashMap;
use std::sync::Arc;

use foreman_protocol::ConversationId;
use foreman_protocol::models::ResponseItem;
use foreman_protocol::protocol::Event;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::SessionConfiguredEvent;
use tokio::sync::RwLock;

use crate::auth::AuthManager;
use crate::client::ModelClientFactory;
use crate::config::Config;
use crate::conversation::ForemanConversation;
use crate::error::ForemanErr;
use crate::error::Result;
use crate::rollout::InMemoryRollout;
use crate::rollout::RolloutRecorder;
use crate::session::Agent;
use crate::session::AgentSpawnOk;
use crate::session::SessionServices;

/// A newly created conversation, including the first event (which is
/// [`EventMsg::SessionConfigured`]).
pub struct NewConversation {
    pub conversation_id: ConversationId,
    pub conversation: Arc<ForemanConversation>,
    pub session_configured: SessionConfiguredEvent,
}

/// Responsible for creating conversations and maintaining them in memory.
pub struct ConversationManager {
    conversations: RwLock<HashMap<ConversationId, Arc<ForemanConversation>>>,
    client_factory: Arc<dyn ModelClientFactory>,
    auth_manager: Arc<AuthManager>,
}

impl ConversationManager {
    pub fn new(client_factory: Arc<dyn ModelClientFactory>, auth_manager: Arc<AuthManager>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            client_factory,
            auth_manager,
        }
    }

    /// Fresh conversation with ephemeral (in-memory) history persistence.
    pub async fn new_conversation(&self, config: Config) -> Result<NewConversation> {
        self.new_conversation_with_rollout(config, Arc::new(InMemoryRollout::default()))
            .await
    }

    pub async fn new_conversation_with_rollout(
        &self,
        config: Config,
        rollout: Arc<dyn RolloutRecorder>,
    ) -> Result<NewConversation> {
        self.spawn_conversation(config, rollout, Vec::new()).await
    }

    /// Restarts a conversation from a recorded rollout. The replayed items
    /// become the session's initial history; an empty or corrupted rollout is
    /// an error, not a silent fresh start.
    pub async fn resume_conversation_from_rollout(
        &self,
        config: Config,
        rollout: Arc<dyn RolloutRecorder>,
    ) -> Result<NewConversation> {
        let initial_history = rollout.read_for_resume().await?;
        self.spawn_conversation(config, rollout, initial_history)
            .await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Arc<ForemanConversation>> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or(ForemanErr::ConversationNotFound(conversation_id))
    }

    /// Removes the conversation from the manager's map. Refused while a turn
    /// is in flight; interrupt or shut the conversation down first.
    pub async fn remove_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Arc<ForemanConversation>> {
        let conversation = self.get_conversation(conversation_id).await?;
        if conversation.has_active_turn().await {
            return Err(ForemanErr::SessionActive(conversation_id));
        }
        self.conversations
            .write()
            .await
            .remove(&conversation_id)
            .ok_or(ForemanErr::ConversationNotFound(conversation_id))
    }

    async fn spawn_conversation(
        &self,
        config: Config,
        rollout: Arc<dyn RolloutRecorder>,
        initial_history: Vec<ResponseItem>,
    ) -> Result<NewConversation> {
        let client = self.client_factory.create(&config, &self.auth_manager);
        let AgentSpawnOk {
            agent,
            conversation_id,
        } = Agent::spawn(SessionServices {
            config,
            client,
            rollout,
            initial_history,
        })
        .await?;
        self.finalize_spawn(agent, conversation_id).await
    }

    async fn finalize_spawn(
        &self,
        agent: Agent,
        conversation_id: ConversationId,
    ) -> Result<NewConversation> {
        // The session emits `SessionConfigured` before the submission loop
        // starts, so it must be the first event out.
        let event = agent.next_event().await?;
        let session_configured = match event {
            Event {
                msg: EventMsg::SessionConfigured(session_configured),
                ..
            } => session_configured,
            event => {
                return Err(ForemanErr::Configuration(format!(
                    "expected session_configured as the first event, got {}",
                    event.msg
                )));
            }
        };

        let conversation = Arc::new(ForemanConversation::new(agent));
        self.conversations
            .write()
            .await
            .insert(conversation_id, Arc::clone(&conversation));

        Ok(NewConversation {
            conversation_id,
            conversation,
            session_configured,
        })
    }
}

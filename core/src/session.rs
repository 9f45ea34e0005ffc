//! The conversation actor: one submission loop per session.
//!
//! [`Agent::spawn`] wires a bounded submission queue and an unbounded event
//! queue to a [`Session`] and starts the loop. The session owns all mutable
//! state; at most one turn is in flight, and every event for the conversation
//! is emitted through the single event sender, which keeps the event order
//! total.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use foreman_protocol::ConversationId;
use foreman_protocol::models::ResponseItem;
use foreman_protocol::protocol::ErrorEvent;
use foreman_protocol::protocol::Event;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::ExecApprovalRequestEvent;
use foreman_protocol::protocol::InputItem;
use foreman_protocol::protocol::Op;
use foreman_protocol::protocol::ReviewDecision;
use foreman_protocol::protocol::SessionConfiguredEvent;
use foreman_protocol::protocol::Submission;
use foreman_protocol::protocol::TaskCompleteEvent;
use foreman_protocol::protocol::TurnAbortReason;
use foreman_protocol::protocol::TurnAbortedEvent;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::client::ModelClient;
use crate::config::Config;
use crate::error::ForemanErr;
use crate::error::Result;
use crate::rollout::RolloutItem;
use crate::rollout::RolloutRecorder;
use crate::sandboxing::SandboxManager;
use crate::state::ActiveTurn;
use crate::state::SessionState;
use crate::state::TurnState;
use crate::tasks::run_turn;

/// Submissions are bounded so a runaway client backpressures instead of
/// growing the queue; events are unbounded so the agent never blocks on a
/// slow consumer.
pub(crate) const SUBMISSION_CHANNEL_CAPACITY: usize = 64;

/// How long an interrupted turn gets to unwind cooperatively before its task
/// is force-aborted.
const TURN_ABORT_GRACE: Duration = Duration::from_millis(100);

/// Handle to one running conversation actor.
pub struct Agent {
    next_id: AtomicU64,
    tx_sub: async_channel::Sender<Submission>,
    rx_event: async_channel::Receiver<Event>,
    session: Arc<Session>,
}

pub struct AgentSpawnOk {
    pub agent: Agent,
    pub conversation_id: ConversationId,
}

pub(crate) struct SessionServices {
    pub config: Config,
    pub client: Arc<dyn ModelClient>,
    pub rollout: Arc<dyn RolloutRecorder>,
    pub initial_history: Vec<ResponseItem>,
}

impl Agent {
    /// Constructs the session, emits `SessionConfigured` as the very first
    /// event and starts the submission loop.
    pub(crate) async fn spawn(services: SessionServices) -> Result<AgentSpawnOk> {
        services.config.validate()?;

        let (tx_sub, rx_sub) = async_channel::bounded(SUBMISSION_CHANNEL_CAPACITY);
        let (tx_event, rx_event) = async_channel::unbounded();

        let conversation_id = ConversationId::new();
        let history_entry_count = services.initial_history.len();
        let session = Arc::new(Session {
            conversation_id,
            tx_event,
            config: services.config,
            client: services.client,
            rollout: services.rollout,
            sandbox_manager: SandboxManager::new(),
            state: Mutex::new(SessionState::with_history(services.initial_history)),
            active_turn: Mutex::new(None),
        });

        session
            .send_event(
                "",
                EventMsg::SessionConfigured(SessionConfiguredEvent {
                    conversation_id,
                    model: session.config.model.clone(),
                    history_entry_count,
                }),
            )
            .await;

        tokio::spawn(submission_loop(Arc::clone(&session), rx_sub));

        Ok(AgentSpawnOk {
            agent: Agent {
                next_id: AtomicU64::new(0),
                tx_sub,
                rx_event,
                session,
            },
            conversation_id,
        })
    }

    /// Submits `op` with an auto-generated id and returns that id.
    pub async fn submit(&self, op: Op) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.submit_with_id(Submission { id: id.clone(), op }).await?;
        Ok(id)
    }

    pub async fn submit_with_id(&self, sub: Submission) -> Result<()> {
        self.tx_sub
            .send(sub)
            .await
            .map_err(|_| ForemanErr::InternalAgentDied)
    }

    /// Next event in conversation order.
    pub async fn next_event(&self) -> Result<Event> {
        self.rx_event
            .recv()
            .await
            .map_err(|_| ForemanErr::InternalAgentDied)
    }

    pub(crate) fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }
}

/// Shared per-conversation state and services. Everything a turn or a tool
/// call needs goes through here.
pub(crate) struct Session {
    conversation_id: ConversationId,
    tx_event: async_channel::Sender<Event>,
    pub(crate) config: Config,
    client: Arc<dyn ModelClient>,
    rollout: Arc<dyn RolloutRecorder>,
    pub(crate) sandbox_manager: SandboxManager,
    state: Mutex<SessionState>,
    active_turn: Mutex<Option<ActiveTurn>>,
}

impl Session {
    pub(crate) fn client(&self) -> Arc<dyn ModelClient> {
        Arc::clone(&self.client)
    }

    pub(crate) async fn send_event(&self, sub_id: &str, msg: EventMsg) {
        let event = Event {
            id: sub_id.to_string(),
            conversation_id: self.conversation_id,
            msg,
        };
        if self.tx_event.send(event).await.is_err() {
            trace!("event receiver dropped, event discarded");
        }
    }

    /// Appends items to the in-memory history and the rollout. A rollout
    /// write failure loses persistence, not the turn.
    pub(crate) async fn record_items(&self, items: &[ResponseItem]) {
        if items.is_empty() {
            return;
        }
        self.state.lock().await.record_items(items);
        let rollout_items: Vec<RolloutItem> = items
            .iter()
            .cloned()
            .map(RolloutItem::ResponseItem)
            .collect();
        if let Err(err) = self.rollout.append(&rollout_items).await {
            warn!("failed to persist rollout items: {err}");
        }
    }

    pub(crate) async fn history_snapshot(&self) -> Vec<ResponseItem> {
        self.state.lock().await.history_snapshot()
    }

    /// Blocks the calling tool task until the user decides. The sender is
    /// registered before the event is emitted so a decision can never arrive
    /// for an unknown call. A dropped sender (turn aborted) reads as `Abort`.
    pub(crate) async fn request_command_approval(
        &self,
        sub_id: &str,
        call_id: &str,
        command: Vec<String>,
        cwd: PathBuf,
        reason: Option<String>,
    ) -> ReviewDecision {
        let (tx, rx) = oneshot::channel();
        {
            let guard = self.active_turn.lock().await;
            let Some(turn) = guard.as_ref() else {
                // Turn already torn down; nothing to wait for.
                return ReviewDecision::Abort;
            };
            let mut turn_state = turn.turn_state.lock().await;
            if turn_state
                .insert_pending_approval(call_id.to_string(), tx)
                .is_some()
            {
                warn!("duplicate approval request for call {call_id}");
            }
        }

        self.send_event(
            sub_id,
            EventMsg::ExecApprovalRequest(ExecApprovalRequestEvent {
                call_id: call_id.to_string(),
                command,
                cwd,
                reason,
            }),
        )
        .await;

        rx.await.unwrap_or(ReviewDecision::Abort)
    }

    /// Routes an `Op::ExecApproval` decision to the waiting tool call.
    pub(crate) async fn notify_approval(&self, sub_id: &str, call_id: &str, decision: ReviewDecision) {
        let entry = {
            let guard = self.active_turn.lock().await;
            match guard.as_ref() {
                Some(turn) => turn.turn_state.lock().await.remove_pending_approval(call_id),
                None => None,
            }
        };
        match entry {
            Some(tx) => {
                if tx.send(decision).is_err() {
                    debug!("approval receiver for call {call_id} already gone");
                }
            }
            None => {
                warn!("approval decision for unknown call {call_id}");
                self.send_event(
                    sub_id,
                    EventMsg::Error(ErrorEvent {
                        message: format!("no pending approval for call {call_id}"),
                    }),
                )
                .await;
            }
        }
    }

    pub(crate) async fn add_approved_command(&self, command: Vec<String>, cwd: PathBuf) {
        self.state.lock().await.add_approved_command(command, cwd);
    }

    pub(crate) async fn is_command_approved(&self, command: &[String], cwd: &Path) -> bool {
        self.state.lock().await.is_command_approved(command, cwd)
    }

    pub(crate) async fn has_active_turn(&self) -> bool {
        self.active_turn.lock().await.is_some()
    }

    /// Starts a turn when idle; queues the input into the running turn
    /// otherwise.
    pub(crate) async fn queue_or_spawn_turn(
        self: &Arc<Self>,
        sub_id: String,
        input: Vec<ResponseItem>,
    ) {
        let mut guard = self.active_turn.lock().await;
        if let Some(turn) = guard.as_ref() {
            let mut turn_state = turn.turn_state.lock().await;
            for item in input {
                turn_state.push_pending_input(item);
            }
            return;
        }

        let turn_index = self.state.lock().await.next_turn_index();
        let cancellation_token = CancellationToken::new();
        let turn_state = Arc::new(Mutex::new(TurnState::default()));
        let handle = tokio::spawn(run_turn(
            Arc::clone(self),
            sub_id,
            input,
            cancellation_token.clone(),
            turn_index,
        ));
        *guard = Some(ActiveTurn {
            handle: AbortOnDropHandle::new(handle),
            cancellation_token,
            turn_state,
            turn_index,
        });
    }

    /// Drains input queued while the turn was running. Called by the turn
    /// between model iterations.
    pub(crate) async fn take_pending_input(&self) -> Vec<ResponseItem> {
        let guard = self.active_turn.lock().await;
        match guard.as_ref() {
            Some(turn) => turn.turn_state.lock().await.take_pending_input(),
            None => Vec::new(),
        }
    }

    /// Handles `Op::Interrupt`: cancel the token, give the turn a short
    /// window to unwind, then force-abort. Exactly one
    /// `TurnAborted(Interrupted)` is emitted here; the turn task itself never
    /// emits it once the active slot is empty.
    pub(crate) async fn interrupt_task(&self, sub_id: &str) {
        let turn = self.active_turn.lock().await.take();
        let Some(turn) = turn else {
            trace!("interrupt with no active turn, ignoring");
            return;
        };

        turn.interrupt();
        let mut handle = turn.handle;
        if tokio::time::timeout(TURN_ABORT_GRACE, &mut handle)
            .await
            .is_err()
        {
            debug!("turn {} did not unwind in time, aborting", turn.turn_index);
        }
        drop(handle);
        turn.turn_state.lock().await.clear_pending_approvals();

        self.send_event(
            sub_id,
            EventMsg::TurnAborted(TurnAbortedEvent {
                reason: TurnAbortReason::Interrupted,
            }),
        )
        .await;
    }

    /// Clears the active slot when the turn task itself ends. Returns `false`
    /// when another path (interrupt, shutdown) already tore the turn down, in
    /// which case the caller must not emit terminal events.
    pub(crate) async fn end_turn(&self, turn_index: u64) -> bool {
        let mut guard = self.active_turn.lock().await;
        match guard.as_ref() {
            Some(turn) if turn.turn_index == turn_index => {
                // Called from the turn task itself; the abort armed in the
                // handle's drop only fires at a yield point, and the caller
                // has none left before returning.
                *guard = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) async fn emit_turn_complete(&self, sub_id: &str, last_agent_message: Option<String>) {
        self.send_event(
            sub_id,
            EventMsg::TaskComplete(TaskCompleteEvent { last_agent_message }),
        )
        .await;
    }

    pub(crate) async fn emit_turn_failed(&self, sub_id: &str, message: String) {
        self.send_event(sub_id, EventMsg::Error(ErrorEvent { message })).await;
        self.send_event(
            sub_id,
            EventMsg::TurnAborted(TurnAbortedEvent {
                reason: TurnAbortReason::Error,
            }),
        )
        .await;
    }

    pub(crate) async fn emit_turn_interrupted(&self, sub_id: &str) {
        self.send_event(
            sub_id,
            EventMsg::TurnAborted(TurnAbortedEvent {
                reason: TurnAbortReason::Interrupted,
            }),
        )
        .await;
    }

    async fn shutdown(&self, sub_id: &str) {
        if let Some(turn) = self.active_turn.lock().await.take() {
            turn.interrupt();
            drop(turn.handle);
            self.send_event(
                sub_id,
                EventMsg::TurnAborted(TurnAbortedEvent {
                    reason: TurnAbortReason::Replaced,
                }),
            )
            .await;
        }
        self.send_event(sub_id, EventMsg::ShutdownComplete).await;
    }
}

async fn submission_loop(session: Arc<Session>, rx_sub: async_channel::Receiver<Submission>) {
    while let Ok(sub) = rx_sub.recv().await {
        debug!("submission {}: {}", sub.id, sub.op);
        match sub.op {
            Op::Interrupt => session.interrupt_task(&sub.id).await,
            Op::UserInput { items } => {
                let input: Vec<ResponseItem> = items
                    .into_iter()
                    .map(|InputItem::Text { text }| ResponseItem::user_message(text))
                    .collect();
                if input.is_empty() {
                    session
                        .send_event(
                            &sub.id,
                            EventMsg::Error(ErrorEvent {
                                message: "user input was empty".to_string(),
                            }),
                        )
                        .await;
                    continue;
                }
                session.queue_or_spawn_turn(sub.id, input).await;
            }
            Op::ExecApproval { id, decision } => {
                session.notify_approval(&sub.id, &id, decision).await;
            }
            Op::Shutdown => {
                session.shutdown(&sub.id).await;
                break;
            }
            _ => {} // Ignore unknown ops; enum is non_exhaustive to allow extensions.
        }
    }
    trace!("submission loop exited");
}

//! Mutable session and turn state.
//!
//! All of it lives behind the session's locks; nothing here is reachable from
//! more than one task at a time except through those locks.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use foreman_protocol::models::ResponseItem;
use foreman_protocol::protocol::ReviewDecision;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// The turn currently in flight. Dropping it aborts the task.
pub(crate) struct ActiveTurn {
    pub(crate) handle: AbortOnDropHandle<()>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) turn_state: std::sync::Arc<Mutex<TurnState>>,
    pub(crate) turn_index: u64,
}

impl ActiveTurn {
    pub(crate) fn interrupt(&self) {
        self.cancellation_token.cancel();
    }
}

/// Per-turn bookkeeping: approvals the turn is waiting on and user input that
/// arrived while the turn was running.
#[derive(Default)]
pub(crate) struct TurnState {
    pending_approvals: HashMap<String, oneshot::Sender<ReviewDecision>>,
    pending_input: Vec<ResponseItem>,
}

impl TurnState {
    pub(crate) fn insert_pending_approval(
        &mut self,
        call_id: String,
        tx: oneshot::Sender<ReviewDecision>,
    ) -> Option<oneshot::Sender<ReviewDecision>> {
        self.pending_approvals.insert(call_id, tx)
    }

    pub(crate) fn remove_pending_approval(
        &mut self,
        call_id: &str,
    ) -> Option<oneshot::Sender<ReviewDecision>> {
        self.pending_approvals.remove(call_id)
    }

    /// Drops every waiting approval sender; the receiving tool calls observe
    /// the closed channel and treat it as an abort.
    pub(crate) fn clear_pending_approvals(&mut self) {
        self.pending_approvals.clear();
    }

    pub(crate) fn push_pending_input(&mut self, item: ResponseItem) {
        self.pending_input.push(item);
    }

    pub(crate) fn take_pending_input(&mut self) -> Vec<ResponseItem> {
        std::mem::take(&mut self.pending_input)
    }
}

/// State that outlives individual turns.
#[derive(Default)]
pub(crate) struct SessionState {
    history: Vec<ResponseItem>,
    approved_commands: HashSet<(Vec<String>, PathBuf)>,
    turn_counter: u64,
}

impl SessionState {
    pub(crate) fn with_history(history: Vec<ResponseItem>) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    pub(crate) fn record_items(&mut self, items: &[ResponseItem]) {
        self.history.extend_from_slice(items);
    }

    pub(crate) fn history_snapshot(&self) -> Vec<ResponseItem> {
        self.history.clone()
    }

    pub(crate) fn add_approved_command(&mut self, command: Vec<String>, cwd: PathBuf) {
        self.approved_commands.insert((command, cwd));
    }

    pub(crate) fn is_command_approved(&self, command: &[String], cwd: &Path) -> bool {
        self.approved_commands
            .contains(&(command.to_vec(), cwd.to_path_buf()))
    }

    pub(crate) fn next_turn_index(&mut self) -> u64 {
        self.turn_counter += 1;
        self.turn_counter
    }
}

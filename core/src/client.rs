//! Collaborator interface to the model provider.
//!
//! The HTTP/SSE transport and request shaping live outside this crate; the
//! core only needs a way to send a prompt and receive a stream of response
//! items it can act on.

use std::sync::Arc;

use async_trait::async_trait;
use foreman_protocol::models::ResponseItem;
use tokio::sync::mpsc;

use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::Result;

/// Everything the model needs for one request: the conversation history
/// including the tool outputs produced so far in this turn.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub input: Vec<ResponseItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    OutputItemDone(ResponseItem),
    Completed,
}

/// Streamed model output. Items arrive in model order; the stream ends with
/// [`ResponseEvent::Completed`] or an error.
pub struct ResponseStream {
    pub(crate) rx_event: mpsc::Receiver<Result<ResponseEvent>>,
}

impl ResponseStream {
    pub fn new(rx_event: mpsc::Receiver<Result<ResponseEvent>>) -> Self {
        Self { rx_event }
    }

    /// Next event, or `None` once the stream is exhausted.
    pub async fn next_event(&mut self) -> Option<Result<ResponseEvent>> {
        self.rx_event.recv().await
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends one request and returns the streamed response. Transport
    /// failures before the first item must be reported here; failures
    /// mid-stream come through the stream itself.
    async fn stream(&self, prompt: Prompt) -> Result<ResponseStream>;
}

/// Constructs a model client for a freshly created session. The auth manager
/// is shared so a refreshed credential reaches clients created later.
pub trait ModelClientFactory: Send + Sync {
    fn create(&self, config: &Config, auth: &Arc<AuthManager>) -> Arc<dyn ModelClient>;
}

impl<F> ModelClientFactory for F
where
    F: Fn(&Config, &Arc<AuthManager>) -> Arc<dyn ModelClient> + Send + Sync,
{
    fn create(&self, config: &Config, auth: &Arc<AuthManager>) -> Arc<dyn ModelClient> {
        self(config, auth)
    }
}

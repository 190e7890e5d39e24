// Event dispatch - decouples the gateway from enforcement.
//
// Events go into a bounded queue. A single loop drains it and spawns one
// task per event, so a slow platform call in one guild never holds up
// another. Inside a guild, a semaphore caps how many events run at once.
// Events are never reordered, batched or dropped once queued.

use super::automod_models::AutomodEvent;
use super::automod_service::AutomodEnforcer;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Automod dispatcher has shut down")]
    Closed,
}

/// Whatever consumes dispatched events. The enforcer in production.
#[async_trait]
pub trait AutomodHandler: Send + Sync {
    async fn handle(&self, event: AutomodEvent);
}

#[async_trait]
impl AutomodHandler for AutomodEnforcer {
    async fn handle(&self, event: AutomodEvent) {
        self.handle_event(event).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub queue_capacity: usize,
    pub max_concurrent_per_guild: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_concurrent_per_guild: 4,
        }
    }
}

/// Cheap to clone; every clone feeds the same loop.
#[derive(Clone)]
pub struct AutomodDispatcher {
    sender: mpsc::Sender<AutomodEvent>,
}

impl AutomodDispatcher {
    /// Start the dispatch loop on the current tokio runtime.
    ///
    /// The loop exits once every `AutomodDispatcher` clone has been dropped
    /// and the queue is drained.
    pub fn spawn(handler: Arc<dyn AutomodHandler>, options: DispatchOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let per_guild = options.max_concurrent_per_guild.max(1);

        tokio::spawn(run_loop(handler, receiver, per_guild));
        tracing::info!(
            queue_capacity = options.queue_capacity,
            max_concurrent_per_guild = per_guild,
            "Automod dispatcher started"
        );

        Self { sender }
    }

    /// Queue an event, waiting for room if the queue is full.
    pub async fn submit(&self, event: AutomodEvent) -> Result<(), DispatchError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

async fn run_loop(
    handler: Arc<dyn AutomodHandler>,
    mut receiver: mpsc::Receiver<AutomodEvent>,
    per_guild: usize,
) {
    let mut guild_slots: HashMap<u64, Arc<Semaphore>> = HashMap::new();

    while let Some(event) = receiver.recv().await {
        let slots = Arc::clone(
            guild_slots
                .entry(event.guild_id())
                .or_insert_with(|| Arc::new(Semaphore::new(per_guild))),
        );
        let handler = Arc::clone(&handler);

        tokio::spawn(async move {
            // The semaphore is never closed, so this only fails on shutdown.
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };

            let (guild_id, user_id, kind) = (event.guild_id(), event.user_id(), event.kind());
            if let Err(panic) = AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                tracing::error!(
                    guild_id,
                    user_id,
                    kind,
                    panic = %panic_message(panic.as_ref()),
                    "Automod handler panicked; event dropped"
                );
            }
        });
    }

    tracing::info!("Automod dispatcher stopped");
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

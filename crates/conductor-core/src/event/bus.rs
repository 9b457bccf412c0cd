//! Scheduler event fan-out over `tokio::sync::broadcast`.
//!
//! The scheduler publishes without waiting on anyone. A bus nobody listens to
//! drops events; a receiver that falls more than `capacity` events behind
//! loses the oldest ones and [`drain`] reports how many.

use conductor_types::event::WorkflowEvent;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Capacity used by [`EventBus::default`]. A run publishes a handful of
/// events per task, so this covers plans of several dozen tasks.
pub const DEFAULT_CAPACITY: usize = 256;

/// Multi-consumer channel for [`WorkflowEvent`]s. Clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// A bus that buffers every event of a run over `task_count` tasks, for
    /// subscribers that only drain once the run is over.
    ///
    /// A run publishes at most three events per task (its wave, start, and
    /// outcome) plus the plan and completion events.
    pub fn for_run(task_count: usize) -> Self {
        Self::new(task_count.saturating_mul(3).saturating_add(2).max(DEFAULT_CAPACITY))
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Send `event` to current subscribers. Returns how many received it.
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        let kind = event_kind(&event);
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(event = kind, receivers, "workflow event published");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Take every event already buffered in `rx` without waiting.
///
/// Events lost to lag are skipped with a warning; the rest are returned in
/// publish order.
pub fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event receiver lagged, oldest events dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    events
}

fn event_kind(event: &WorkflowEvent) -> &'static str {
    match event {
        WorkflowEvent::PlanCreated { .. } => "plan_created",
        WorkflowEvent::WaveStarted { .. } => "wave_started",
        WorkflowEvent::TaskStarted { .. } => "task_started",
        WorkflowEvent::TaskCompleted { .. } => "task_completed",
        WorkflowEvent::TaskFailed { .. } => "task_failed",
        WorkflowEvent::TaskUnreachable { .. } => "task_unreachable",
        WorkflowEvent::RunCompleted { .. } => "run_completed",
    }
}

//! Progress events emitted during a sync run.
//!
//! The engine reports progress through a [`SyncObserver`] passed into the
//! sync context. Observers only watch; nothing they do affects the run.

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::sync::SyncState;
use crate::utils::log;

/// One observable step of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A batch plan of `chunk_count` chunks starts
    BatchStart { uuid: Uuid, chunk_count: usize },
    /// One chunk of the batch completed
    BatchChunk { uuid: Uuid },
    /// Every chunk of the batch completed
    BatchEnd { uuid: Uuid },
    SettingsBefore,
    SettingsAfter,
    /// Staging is about to replace production
    OverwriteBefore,
    OverwriteAfter,
    /// The orchestrator entered a new state
    StateChanged(SyncState),
}

impl SyncEvent {
    /// Event name as exposed to progress reporters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchStart { .. } => "batch:start",
            Self::BatchChunk { .. } => "batch:chunk",
            Self::BatchEnd { .. } => "batch:end",
            Self::SettingsBefore => "settings:before",
            Self::SettingsAfter => "settings:after",
            Self::OverwriteBefore => "overwrite:before",
            Self::OverwriteAfter => "overwrite:after",
            Self::StateChanged(_) => "state:changed",
        }
    }
}

/// Receiver of sync progress events.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_event(&self, _event: &SyncEvent) {}
}

/// Forwards events over a tokio channel.
///
/// Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: UnboundedSender<SyncEvent>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<SyncEvent>) -> Self {
        Self { sender }
    }
}

impl SyncObserver for ChannelObserver {
    fn on_event(&self, event: &SyncEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Prints human-readable progress lines to the console.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl SyncObserver for ConsoleObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::StateChanged(state) => {
                if let Some(step) = state.step_number() {
                    log::step(step, SyncState::STEP_COUNT, state.description());
                }
            }
            SyncEvent::BatchStart { uuid, chunk_count } => {
                log::sub_item(&format!("Batch {}: {} chunk(s)", short(uuid), chunk_count));
            }
            SyncEvent::BatchChunk { uuid } => {
                log::progress(&format!("Batch {}: chunk done", short(uuid)));
            }
            SyncEvent::BatchEnd { uuid } => {
                log::sub_item(&format!("Batch {}: complete", short(uuid)));
            }
            SyncEvent::SettingsAfter => log::sub_item("Settings pushed"),
            SyncEvent::OverwriteAfter => log::success("Staging promoted to production"),
            SyncEvent::SettingsBefore | SyncEvent::OverwriteBefore => {}
        }
    }
}

fn short(uuid: &Uuid) -> String {
    uuid.simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let uuid = Uuid::new_v4();
        assert_eq!(
            SyncEvent::BatchStart {
                uuid,
                chunk_count: 2
            }
            .name(),
            "batch:start"
        );
        assert_eq!(SyncEvent::BatchChunk { uuid }.name(), "batch:chunk");
        assert_eq!(SyncEvent::BatchEnd { uuid }.name(), "batch:end");
        assert_eq!(SyncEvent::SettingsBefore.name(), "settings:before");
        assert_eq!(SyncEvent::OverwriteAfter.name(), "overwrite:after");
    }

    #[test]
    fn test_channel_observer_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = ChannelObserver::new(tx);

        observer.on_event(&SyncEvent::SettingsBefore);
        observer.on_event(&SyncEvent::SettingsAfter);

        assert_eq!(rx.try_recv().unwrap(), SyncEvent::SettingsBefore);
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::SettingsAfter);
    }

    #[test]
    fn test_channel_observer_survives_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        ChannelObserver::new(tx).on_event(&SyncEvent::OverwriteBefore);
    }
}

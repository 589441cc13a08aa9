// src/watch/watcher.rs

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WorkerSettings;
use crate::engine::{DetectionSource, WorkerEvent};
use crate::trigger::{FileTriggerSlot, TRIGGER_FILE_NAME, TriggerSlot};

/// Timing knobs for the watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub rescan_interval: Duration,
    pub settle_delay: Duration,
}

impl From<&WorkerSettings> for WatchSettings {
    fn from(w: &WorkerSettings) -> Self {
        Self {
            rescan_interval: w.rescan_interval,
            settle_delay: w.settle_delay,
        }
    }
}

/// Keeps the `notify` watcher and the forwarding task alive. Dropping the
/// handle stops detection.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether a notify event may mean the trigger file appeared.
///
/// Creation, modification (which covers a rename into place) and the
/// catch-all `Any` kind qualify; removals and access events do not.
pub fn is_trigger_event(event: &Event, file_name: &str) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(OsStr::new(file_name)))
}

/// Watch the trigger directory of `slot` and report detections to
/// `runtime_tx`.
///
/// The directory is created if missing. A trigger already present is
/// reported once as [`DetectionSource::Startup`]. Every `rescan_interval` the
/// slot is checked again, so a lost notification only delays a run.
pub fn spawn_watcher(
    slot: FileTriggerSlot,
    settings: WatchSettings,
    runtime_tx: mpsc::Sender<WorkerEvent>,
) -> Result<WatcherHandle> {
    let dir = slot.dir().to_path_buf();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating trigger directory {:?}", dir))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event_tx.send(event).is_err() {
                    debug!("trigger watcher task gone; dropping notify event");
                }
            }
            Err(err) => warn!("trigger directory watch error: {err}"),
        },
        Config::default(),
    )?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching trigger directory {:?}", dir))?;

    info!(dir = ?dir, rescan = ?settings.rescan_interval, "trigger watcher started");

    let slot: Arc<dyn TriggerSlot> = Arc::new(slot);
    let task = tokio::spawn(async move {
        if trigger_present(slot.as_ref())
            && !report(&runtime_tx, DetectionSource::Startup).await
        {
            return;
        }

        let mut ticker = tokio::time::interval(settings.rescan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the startup scan covered it.
        ticker.tick().await;

        loop {
            let wake = tokio::select! {
                maybe = event_rx.recv() => Wake::Notify(maybe),
                _ = ticker.tick() => Wake::Tick,
            };

            let source = match wake {
                Wake::Notify(None) => break,
                Wake::Notify(Some(event)) => {
                    if !is_trigger_event(&event, TRIGGER_FILE_NAME) {
                        continue;
                    }
                    debug!(?event, "trigger file event");
                    tokio::time::sleep(settings.settle_delay).await;
                    // Writes of one trigger produce a burst of events.
                    while event_rx.try_recv().is_ok() {}
                    DetectionSource::FileEvent
                }
                Wake::Tick => DetectionSource::Rescan,
            };

            if !trigger_present(slot.as_ref()) {
                continue;
            }
            if !report(&runtime_tx, source).await {
                return;
            }
        }

        debug!("trigger watcher loop ended");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        task,
    })
}

enum Wake {
    Notify(Option<Event>),
    Tick,
}

fn trigger_present(slot: &dyn TriggerSlot) -> bool {
    match slot.is_present() {
        Ok(present) => present,
        Err(err) => {
            warn!(error = %err, "could not check trigger slot");
            false
        }
    }
}

/// Returns `false` once the runtime has gone away.
async fn report(tx: &mpsc::Sender<WorkerEvent>, source: DetectionSource) -> bool {
    debug!(?source, "reporting trigger detection");
    tx.send(WorkerEvent::TriggerDetected { source }).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind, RenameMode};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn creation_of_trigger_file_counts() {
        let e = event(EventKind::Create(CreateKind::File), "/trigger/complete");
        assert!(is_trigger_event(&e, TRIGGER_FILE_NAME));
    }

    #[test]
    fn rename_into_place_counts() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/trigger/complete",
        );
        assert!(is_trigger_event(&e, TRIGGER_FILE_NAME));
    }

    #[test]
    fn other_files_and_removals_do_not() {
        let other = event(EventKind::Create(CreateKind::File), "/trigger/complete.tmp");
        let removed = event(EventKind::Remove(RemoveKind::File), "/trigger/complete");
        let read = event(EventKind::Access(AccessKind::Read), "/trigger/complete");
        assert!(!is_trigger_event(&other, TRIGGER_FILE_NAME));
        assert!(!is_trigger_event(&removed, TRIGGER_FILE_NAME));
        assert!(!is_trigger_event(&read, TRIGGER_FILE_NAME));
    }
}

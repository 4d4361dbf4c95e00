use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    usage::entry::{LogEntry, SystemEvent},
    utils::clock::Clock,
    workspace::Workspace,
};

/// Translates workspace observations into usage log entries. Polling is the
/// event source: a change of the frontmost application is the activation
/// event, and a wall-clock gap much larger than the poll cadence means the
/// machine slept through it.
pub struct ActivityWatcher {
    next: mpsc::Sender<LogEntry>,
    workspace: Box<dyn Workspace>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    sleep_gap: Duration,
    time_provider: Box<dyn Clock>,
    current_app: Option<String>,
    last_polled: NaiveDateTime,
}

impl ActivityWatcher {
    pub fn new(
        next: mpsc::Sender<LogEntry>,
        workspace: Box<dyn Workspace>,
        shutdown: CancellationToken,
        poll_interval: Duration,
        sleep_gap: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        let last_polled = time_provider.time().naive_local();
        Self {
            next,
            workspace,
            shutdown,
            poll_interval,
            sleep_gap,
            time_provider,
            current_app: None,
            last_polled,
        }
    }

    /// Entries produced by a single poll at `now`. Updates the switch and
    /// sleep-gap tracking state.
    fn poll_once(&mut self, now: NaiveDateTime) -> Vec<LogEntry> {
        let mut entries = vec![];

        let since_last = (now - self.last_polled).to_std().unwrap_or_default();
        if since_last > self.sleep_gap {
            entries.push(LogEntry::system(self.last_polled, SystemEvent::Sleep));
            entries.push(LogEntry::system(now, SystemEvent::Wake));
        }
        self.last_polled = now;

        match self.workspace.frontmost_application() {
            Ok(Some(app)) => {
                if self.current_app.as_deref() != Some(app.name.as_str()) {
                    entries.push(LogEntry::app_switch(now, app.name.clone()));
                    self.current_app = Some(app.name);
                }
            }
            // Focus can sit nowhere for a moment. Keep the last application
            // until the next real activation.
            Ok(None) => {}
            Err(e) => error!("Failed to query the frontmost application {e:?}"),
        }

        entries
    }

    /// Executes the watcher event loop.
    pub async fn run(mut self) -> Result<()> {
        let mut poll_point = self.time_provider.instant();
        loop {
            poll_point += self.poll_interval;

            let now = self.time_provider.time().naive_local();
            for entry in self.poll_once(now) {
                debug!("Sending entry {:?}", entry);
                self.next
                    .send(entry)
                    .await
                    .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
            }

            tokio::select! {
                // Cancelation stands in for the will-terminate notification,
                // so the shutdown entry goes out before the sender is
                // dropped and the recorder stops.
                _ = self.shutdown.cancelled() => {
                    let stamp = self.time_provider.time().naive_local();
                    let entry = LogEntry::system(stamp, SystemEvent::Shutdown);
                    if self.next.send(entry).await.is_err() {
                        error!("Recorder was gone before the shutdown entry");
                    }
                    info!("Watcher stopped");
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(poll_point) => ()
            }
        }
    }
}

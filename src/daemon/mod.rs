use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use recorder::Recorder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use watcher::ActivityWatcher;

use crate::{
    usage::{entry::LogEntry, log::UsageLog},
    utils::clock::{Clock, DefaultClock},
    workspace::{GenericWorkspace, Workspace},
};

pub mod args;
pub mod recorder;
pub mod shutdown;
pub mod watcher;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wall-clock gap across a single poll that is treated as a sleep/wake
/// cycle rather than scheduling jitter.
const DEFAULT_SLEEP_GAP: Duration = Duration::from_secs(30);

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    std::env::set_current_dir("/")?;

    let (sender, receiver) = mpsc::channel::<LogEntry>(16);
    let workspace = GenericWorkspace::new()?;

    let shutdown_token = CancellationToken::new();

    let watcher = create_watcher(sender, workspace, &shutdown_token, DefaultClock);

    let recorder = create_recorder(dir, receiver, DefaultClock);

    let (_, watch_result, record_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        watcher.run(),
        recorder.run(),
    );

    if let Err(watch_result) = watch_result {
        error!("Watcher module got an error {:?}", watch_result);
    }

    if let Err(record_result) = record_result {
        error!("Recorder module got an error {:?}", record_result);
    }

    Ok(())
}

fn create_watcher(
    sender: mpsc::Sender<LogEntry>,
    workspace: impl Workspace + 'static,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> ActivityWatcher {
    ActivityWatcher::new(
        sender,
        Box::new(workspace),
        shutdown_token.clone(),
        DEFAULT_POLL_INTERVAL,
        DEFAULT_SLEEP_GAP,
        Box::new(clock),
    )
}

fn create_recorder(
    dir: PathBuf,
    receiver: mpsc::Receiver<LogEntry>,
    clock: impl Clock,
) -> Recorder {
    Recorder::new(receiver, UsageLog::with_clock(&dir, Box::new(clock)))
}

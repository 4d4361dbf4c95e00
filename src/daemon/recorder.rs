use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

use crate::usage::{entry::LogEntry, log::UsageLog};

/// Drains captured entries and appends them to the usage log. A failed
/// append loses that entry: there is no buffering or retry layer, so the
/// failure only reaches the diagnostic log and the daemon keeps running.
pub struct Recorder {
    receiver: Receiver<LogEntry>,
    log: UsageLog,
}

impl Recorder {
    pub fn new(receiver: Receiver<LogEntry>, log: UsageLog) -> Self {
        Self { receiver, log }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(entry) = self.receiver.recv().await {
            debug!("Recording entry {:?}", entry);
            match self.log.append(&entry) {
                Ok(_) => info!("Recorded entry {:?}", entry),
                Err(e) => error!("Error appending entry {:?}: {e:?}", entry),
            }
        }

        self.receiver.close();
        Ok(())
    }
}

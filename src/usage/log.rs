use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use fs4::fs_std::FileExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    usage::entry::{LogEntry, LOG_HEADER},
    utils::clock::{Clock, DefaultClock},
};

pub const LOG_FILE_NAME: &str = "app_usage.log";

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

const REOPEN_ATTEMPTS: usize = 3;

/// Broadcast to subscribers whenever the log file changes out from under
/// them, so cached views can be reloaded.
#[derive(Debug, Clone)]
pub enum LogNotice {
    /// The log was archived and recreated with only the header. `backup`
    /// holds the archive path when a previous log actually existed.
    Cleared { backup: Option<PathBuf> },
}

/// Handle to the usage log file. Owns the path and the single-writer lock;
/// callers get a reference to one of these instead of reaching for a global.
///
/// Appends and rotations exclude each other through the internal mutex and,
/// across processes, through an advisory lock on the file itself. The
/// original design had no such guard, which made a rotation racing an
/// in-flight append a real hazard.
pub struct UsageLog {
    path: PathBuf,
    write_guard: Mutex<()>,
    notices: broadcast::Sender<LogNotice>,
    clock: Box<dyn Clock>,
}

impl UsageLog {
    pub fn new(dir: &Path) -> Self {
        Self::with_clock(dir, Box::new(DefaultClock))
    }

    pub fn with_clock(dir: &Path, clock: Box<dyn Clock>) -> Self {
        let (notices, _) = broadcast::channel(8);
        Self {
            path: dir.join(LOG_FILE_NAME),
            write_guard: Mutex::new(()),
            notices,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogNotice> {
        self.notices.subscribe()
    }

    /// Creates the parent directory and the header-only file when they are
    /// missing. Safe to call repeatedly.
    fn ensure_exists(&self) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                debug!("Creating new usage log at {:?}", self.path);
                writeln!(file, "{LOG_HEADER}")
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Durably appends a single entry line, creating the directory and file
    /// first when needed. Exactly one line per call, in call order.
    pub fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut attempts = 0;
        loop {
            self.ensure_exists()?;

            let file = OpenOptions::new().append(true).open(&self.path)?;
            // Semi-safe acquire-release for the file
            file.lock_exclusive()?;

            // A clear in another process can rename the file away between
            // the open and the lock. Reopen the fresh log in that case.
            // After repeated misses the entry goes to the handle we hold,
            // which by then points into the archive rather than nowhere.
            if attempts < REOPEN_ATTEMPTS {
                match self.is_current(&file) {
                    Ok(true) => {}
                    Ok(false) => {
                        file.unlock()?;
                        attempts += 1;
                        continue;
                    }
                    Err(e) => {
                        file.unlock()?;
                        return Err(e);
                    }
                }
            }

            let result = (&file).write_all(entry.to_line().as_bytes());
            file.unlock()?;
            return result;
        }
    }

    /// Whether `file` is still the file living at the log path, or a stale
    /// handle left behind by a concurrent rename.
    fn is_current(&self, file: &File) -> io::Result<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            let on_disk = match fs::metadata(&self.path) {
                Ok(v) => v,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e),
            };
            let opened = file.metadata()?;
            Ok(opened.dev() == on_disk.dev() && opened.ino() == on_disk.ino())
        }
        #[cfg(not(unix))]
        {
            // Without a stable file identity to compare, keep the handle.
            let _ = file;
            Ok(true)
        }
    }

    /// Archives the current log under a timestamped backup name and starts a
    /// fresh one containing only the header. Returns the backup path when a
    /// previous log existed.
    ///
    /// The rename is atomic; the recreate step is not, but a crash in
    /// between only leaves the log absent until the next [append](Self::append)
    /// recreates it.
    pub fn rotate(&self) -> io::Result<Option<PathBuf>> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let stamp = self.clock.time().format(BACKUP_TIMESTAMP_FORMAT);
        let backup = self.path.with_file_name(format!("app_usage_{stamp}.log"));

        let moved = match File::open(&self.path) {
            Ok(file) => {
                // Waits out an in-flight append from another process before
                // the file is moved away.
                file.lock_exclusive()?;
                let moved = fs::rename(&self.path, &backup);
                file.unlock()?;
                moved?;
                Some(backup)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        self.ensure_exists()?;
        let _ = self.notices.send(LogNotice::Cleared {
            backup: moved.clone(),
        });
        Ok(moved)
    }

    /// Reads all entries back from the file. A missing file reads as empty.
    pub fn entries(&self) -> io::Result<Vec<LogEntry>> {
        let file = match File::open(&self.path) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };
        file.lock_shared()?;
        let result = Self::read_entries(&file, &self.path);
        file.unlock()?;
        result
    }

    fn read_entries(file: &File, path: &Path) -> io::Result<Vec<LogEntry>> {
        let reader = BufReader::new(file);
        let mut entries = vec![];
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if index == 0 && line == LOG_HEADER {
                continue;
            }
            match LogEntry::parse(&line) {
                Some(entry) => entries.push(entry),
                // ignore illegal lines. Might happen after shutdowns
                None => warn!("Found illegal line in {:?}: {}", path, line),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Local, TimeZone};
    use tempfile::tempdir;
    use tokio::time::Instant;

    use crate::usage::entry::{EntryKind, SystemEvent};

    use super::*;

    struct FrozenClock {
        now: DateTime<Local>,
    }

    #[async_trait]
    impl Clock for FrozenClock {
        fn time(&self) -> DateTime<Local> {
            self.now
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    fn frozen() -> Box<FrozenClock> {
        Box::new(FrozenClock {
            now: Local.with_ymd_and_hms(2024, 12, 8, 13, 45, 2).unwrap(),
        })
    }

    fn ts(second: u32) -> chrono::NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 12, 8)
            .unwrap()
            .and_hms_opt(13, 45, second)
            .unwrap()
    }

    #[test]
    fn first_append_creates_directory_file_and_header() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("timescape");
        let log = UsageLog::new(&nested);

        log.append(&LogEntry::app_switch(ts(0), "Finder")).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "App Usage Log\n2024-12-08 13:45:00,Finder\n");
    }

    #[test]
    fn system_event_append_is_bracketed() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        log.append(&LogEntry::system(ts(0), SystemEvent::Sleep))
            .unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            content,
            "App Usage Log\n2024-12-08 13:45:00,[System Sleep]\n"
        );
    }

    #[test]
    fn appends_keep_call_order() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        let names = ["Finder", "Safari", "Terminal", "Mail", "Notes"];
        for (i, name) in names.iter().enumerate() {
            log.append(&LogEntry::app_switch(ts(i as u32), *name))
                .unwrap();
        }

        let content = fs::read_to_string(log.path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), names.len() + 1);
        assert_eq!(lines[0], LOG_HEADER);
        for (i, name) in names.iter().enumerate() {
            assert!(lines[i + 1].ends_with(&format!(",{name}")));
        }
    }

    #[test]
    fn identical_appends_are_not_deduplicated() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        log.append(&LogEntry::app_switch(ts(0), "Finder")).unwrap();
        log.append(&LogEntry::app_switch(ts(0), "Finder")).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            content,
            "App Usage Log\n\
             2024-12-08 13:45:00,Finder\n\
             2024-12-08 13:45:00,Finder\n"
        );
    }

    #[test]
    fn ensure_exists_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        log.ensure_exists().unwrap();
        let before = fs::read_to_string(log.path()).unwrap();
        log.ensure_exists().unwrap();
        let after = fs::read_to_string(log.path()).unwrap();

        assert_eq!(before, "App Usage Log\n");
        assert_eq!(before, after);
    }

    #[test]
    fn rotation_preserves_bytes_and_resets_active_log() {
        let dir = tempdir().unwrap();
        let log = UsageLog::with_clock(dir.path(), frozen());

        for (i, name) in ["Finder", "Safari", "Terminal"].iter().enumerate() {
            log.append(&LogEntry::app_switch(ts(i as u32), *name))
                .unwrap();
        }
        let before = fs::read_to_string(log.path()).unwrap();
        assert_eq!(before.lines().count(), 4);

        let mut notices = log.subscribe();
        let backup = log.rotate().unwrap().expect("log existed before rotate");

        assert_eq!(
            backup.file_name().unwrap().to_str().unwrap(),
            "app_usage_2024-12-08_134502.log"
        );
        assert_eq!(fs::read_to_string(&backup).unwrap(), before);
        assert_eq!(
            fs::read_to_string(log.path()).unwrap(),
            "App Usage Log\n"
        );

        let LogNotice::Cleared { backup: notified } = notices.try_recv().unwrap();
        assert_eq!(notified.as_deref(), Some(backup.as_path()));
    }

    #[test]
    fn rotation_without_existing_log_starts_fresh() {
        let dir = tempdir().unwrap();
        let log = UsageLog::with_clock(dir.path(), frozen());

        let mut notices = log.subscribe();
        assert_eq!(log.rotate().unwrap(), None);

        assert_eq!(fs::read_to_string(log.path()).unwrap(), "App Usage Log\n");
        let LogNotice::Cleared { backup } = notices.try_recv().unwrap();
        assert_eq!(backup, None);
    }

    #[test]
    fn entries_round_trip_and_skip_garbage() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        let appended = vec![
            LogEntry::app_switch(ts(0), "Finder"),
            LogEntry::app_switch(ts(1), "Reports, Q4"),
            LogEntry::system(ts(2), SystemEvent::Wake),
        ];
        for entry in &appended {
            log.append(entry).unwrap();
        }
        // A line that parses as nothing should be skipped, not fail the read.
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "garbage without a timestamp").unwrap();

        assert_eq!(log.entries().unwrap(), appended);
    }

    #[test]
    fn entries_on_missing_file_are_empty() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());
        assert_eq!(log.entries().unwrap(), vec![]);
    }

    #[test]
    fn append_after_rotate_recreates_the_log() {
        let dir = tempdir().unwrap();
        let log = UsageLog::with_clock(dir.path(), frozen());

        log.append(&LogEntry::app_switch(ts(0), "Finder")).unwrap();
        log.rotate().unwrap();
        // Simulate a crash between rename and recreate.
        fs::remove_file(log.path()).unwrap();

        log.append(&LogEntry::app_switch(ts(1), "Safari")).unwrap();
        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "App Usage Log\n2024-12-08 13:45:01,Safari\n");
    }

    #[cfg(unix)]
    #[test]
    fn stale_handle_is_detected_after_rename() {
        let dir = tempdir().unwrap();
        let log = UsageLog::with_clock(dir.path(), frozen());
        log.ensure_exists().unwrap();

        let file = OpenOptions::new().append(true).open(log.path()).unwrap();
        assert!(log.is_current(&file).unwrap());

        // A concurrent clear renames the file away, then recreates it.
        let archive = dir.path().join("app_usage_archived.log");
        fs::rename(log.path(), &archive).unwrap();
        assert!(!log.is_current(&file).unwrap());
        log.ensure_exists().unwrap();
        assert!(!log.is_current(&file).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn append_lands_in_the_fresh_log_after_a_concurrent_rename() {
        let dir = tempdir().unwrap();
        let log = UsageLog::with_clock(dir.path(), frozen());
        log.append(&LogEntry::app_switch(ts(0), "Finder")).unwrap();

        // Stand in for another process clearing the log mid-append: the
        // file the next open would have seen is already the archive.
        let backup = log.rotate().unwrap().unwrap();
        log.append(&LogEntry::app_switch(ts(1), "Safari")).unwrap();

        let archived = fs::read_to_string(&backup).unwrap();
        assert_eq!(archived, "App Usage Log\n2024-12-08 13:45:00,Finder\n");
        let current = fs::read_to_string(log.path()).unwrap();
        assert_eq!(current, "App Usage Log\n2024-12-08 13:45:01,Safari\n");
    }

    #[test]
    fn parsed_kind_matches_appended_kind() {
        let dir = tempdir().unwrap();
        let log = UsageLog::new(dir.path());

        log.append(&LogEntry::system(ts(0), SystemEvent::Shutdown))
            .unwrap();
        let entries = log.entries().unwrap();
        assert!(matches!(
            entries[0].kind,
            EntryKind::System(SystemEvent::Shutdown)
        ));
    }
}

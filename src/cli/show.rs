use std::{
    fs::{self, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom},
    path::Path,
    time::Duration,
};

use ansi_term::Colour;
use anyhow::Result;

use crate::usage::{
    entry::{EntryKind, LogEntry, TIMESTAMP_FORMAT},
    log::UsageLog,
};

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn process_show_command(dir: &Path, last: Option<usize>, follow: bool) -> Result<()> {
    let log = UsageLog::new(dir);

    let entries = log.entries()?;
    let skipped = last
        .map(|n| entries.len().saturating_sub(n))
        .unwrap_or_default();
    for entry in &entries[skipped..] {
        println!("{}", render_entry(entry));
    }

    if follow {
        follow_log(&log).await?;
    }
    Ok(())
}

fn render_entry(entry: &LogEntry) -> String {
    let timestamp = entry.timestamp.format(TIMESTAMP_FORMAT);
    match &entry.kind {
        EntryKind::AppSwitch(name) => format!("{timestamp}  {name}"),
        EntryKind::System(event) => format!(
            "{timestamp}  {}",
            Colour::Yellow.paint(format!("[{}]", event.label()))
        ),
    }
}

/// Tails the log until interrupted. New complete lines are printed as they
/// appear. A clear always runs in another process, so it shows up here as
/// the file shrinking; the view then starts over from the fresh file.
/// In-process observers get the [LogNotice](crate::usage::log::LogNotice)
/// broadcast instead.
async fn follow_log(log: &UsageLog) -> Result<()> {
    let mut offset = fs::metadata(log.path()).map(|m| m.len()).unwrap_or(0);
    loop {
        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;

        let length = fs::metadata(log.path()).map(|m| m.len()).unwrap_or(0);
        if length < offset {
            println!("{}", Colour::Fixed(8).paint("-- log cleared --"));
            offset = 0;
        }
        if length > offset {
            for line in read_new_lines(log.path(), &mut offset)? {
                if let Some(entry) = LogEntry::parse(&line) {
                    println!("{}", render_entry(&entry));
                }
            }
        }
    }
}

/// Reads the complete lines that appeared past `offset` and advances it.
/// A trailing partial line is left for the next call, since an append from
/// the daemon may still be in flight.
fn read_new_lines(path: &Path, offset: &mut u64) -> io::Result<Vec<String>> {
    let mut file = match File::open(path) {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(*offset))?;
    let mut buffer = String::new();
    file.read_to_string(&mut buffer)?;

    let mut lines = vec![];
    let mut consumed = 0usize;
    for line in buffer.split_inclusive('\n') {
        if line.ends_with('\n') {
            consumed += line.len();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
    }
    *offset += consumed as u64;
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;

    use crate::usage::entry::SystemEvent;

    use super::*;

    #[test]
    fn partial_lines_wait_for_the_next_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_usage.log");
        fs::write(&path, "App Usage Log\n2024-12-08 13:00:00,Find").unwrap();

        let mut offset = 0;
        assert_eq!(
            read_new_lines(&path, &mut offset).unwrap(),
            vec!["App Usage Log".to_string()]
        );

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "er\n").unwrap();
        assert_eq!(
            read_new_lines(&path, &mut offset).unwrap(),
            vec!["2024-12-08 13:00:00,Finder".to_string()]
        );
        assert_eq!(offset, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn shrunken_file_is_reread_from_the_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_usage.log");
        fs::write(
            &path,
            "App Usage Log\n2024-12-08 13:00:00,Finder\n2024-12-08 13:00:01,Safari\n",
        )
        .unwrap();

        let mut offset = 0;
        assert_eq!(read_new_lines(&path, &mut offset).unwrap().len(), 3);

        // A clear in another process swaps in a header-only file. The
        // follow loop sees the length drop below the offset and resets it.
        fs::write(&path, "App Usage Log\n").unwrap();
        let length = fs::metadata(&path).unwrap().len();
        assert!(length < offset);
        offset = 0;
        assert_eq!(
            read_new_lines(&path, &mut offset).unwrap(),
            vec!["App Usage Log".to_string()]
        );
    }

    #[test]
    fn missing_file_reads_as_nothing() {
        let dir = tempdir().unwrap();
        let mut offset = 0;
        assert_eq!(
            read_new_lines(&dir.path().join("gone.log"), &mut offset).unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn rendering_marks_system_events() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 12, 8)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        let switch = render_entry(&LogEntry::app_switch(ts, "Finder"));
        assert!(switch.contains("Finder"));
        let sleep = render_entry(&LogEntry::system(ts, SystemEvent::Sleep));
        assert!(sleep.contains("[System Sleep]"));
    }
}

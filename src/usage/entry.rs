use std::borrow::Cow;

use chrono::NaiveDateTime;

/// First line of every usage log file.
pub const LOG_HEADER: &str = "App Usage Log";

/// Timestamps are local wall-clock time with second precision. The file
/// stores no offset, so entries use naive datetimes throughout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Placeholder when the frontmost application has no usable name.
pub const UNKNOWN_APP: &str = "Unknown";

/// Power and lifecycle events. Labels are fixed and appear bracketed in the
/// log, e.g. `[System Sleep]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Sleep,
    Wake,
    Shutdown,
}

impl SystemEvent {
    pub fn label(self) -> &'static str {
        match self {
            SystemEvent::Sleep => "System Sleep",
            SystemEvent::Wake => "System Wake",
            SystemEvent::Shutdown => "System Shutdown/Restart",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "System Sleep" => Some(SystemEvent::Sleep),
            "System Wake" => Some(SystemEvent::Wake),
            "System Shutdown/Restart" => Some(SystemEvent::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// An application became frontmost.
    AppSwitch(String),
    System(SystemEvent),
}

/// One timestamped record of an application switch or system event.
/// Immutable once created; serialized as `<timestamp>,<payload>\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub kind: EntryKind,
}

impl LogEntry {
    pub fn app_switch(timestamp: NaiveDateTime, name: impl Into<String>) -> Self {
        let name: String = name.into();
        let name = if name.is_empty() {
            UNKNOWN_APP.to_string()
        } else {
            name
        };
        Self {
            timestamp,
            kind: EntryKind::AppSwitch(name),
        }
    }

    pub fn system(timestamp: NaiveDateTime, event: SystemEvent) -> Self {
        Self {
            timestamp,
            kind: EntryKind::System(event),
        }
    }

    /// The second field of the serialized line. System events carry their
    /// label in brackets, application switches carry the raw name.
    pub fn payload(&self) -> Cow<'_, str> {
        match &self.kind {
            EntryKind::AppSwitch(name) => Cow::Borrowed(name.as_str()),
            EntryKind::System(event) => Cow::Owned(format!("[{}]", event.label())),
        }
    }

    /// Serializes the entry to its single line, including the trailing
    /// newline.
    pub fn to_line(&self) -> String {
        format!(
            "{},{}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            escape_payload(&self.payload())
        )
    }

    /// Parses one log line (without trailing newline). Returns `None` for
    /// lines that don't follow the `<timestamp>,<payload>` shape.
    pub fn parse(line: &str) -> Option<Self> {
        // The timestamp never contains a comma, so the first comma is always
        // the field delimiter.
        let (timestamp, payload) = line.split_once(',')?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let payload = unescape_payload(payload)?;

        let kind = payload
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .and_then(SystemEvent::from_label)
            .map(EntryKind::System)
            .unwrap_or(EntryKind::AppSwitch(payload));

        Some(Self { timestamp, kind })
    }
}

/// Application names have no character restriction, but the log format is
/// line- and comma-delimited. Payloads containing `,`, `"`, `\` or line
/// breaks are written quoted with backslash escapes so that every entry
/// stays on one physical line. Plain payloads are written raw, which keeps
/// ordinary lines identical to the unescaped format.
pub fn escape_payload(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['"', ',', '\\', '\n', '\r']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

/// Reverses [escape_payload]. Returns `None` on malformed quoting.
pub fn unescape_payload(field: &str) -> Option<String> {
    let Some(quoted) = field.strip_prefix('"') else {
        return Some(field.to_string());
    };
    let quoted = quoted.strip_suffix('"')?;

    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

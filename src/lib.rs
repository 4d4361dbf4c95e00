//! Keeps a plain-text journal of which application is in the foreground and
//! when the machine sleeps, wakes or shuts down. A small daemon appends one
//! line per event to `app_usage.log`; the cli manages the daemon, prints the
//! journal and archives it on request.
//!

pub mod cli;
pub mod daemon;
pub mod settings;
pub mod usage;
pub mod utils;
pub mod workspace;

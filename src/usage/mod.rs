//! The usage journal. The basic idea is:
//!  - There is a single append-only text file `app_usage.log` in the
//!    application directory.
//!  - Line 1 is always a fixed header, every later line is one timestamped
//!    entry in append order.
//!  - Clearing the log archives it under a timestamped name and starts a
//!    fresh one.

pub mod entry;
pub mod log;

//! Collapsible log sections for the runner's log viewer.
//!
//! The runner folds everything between a matching `section_start` /
//! `section_end` marker pair in the job log. The markers are cosmetic;
//! nothing downstream branches on them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Begin a named section, with a header line shown on the fold.
pub fn start(name: &str, header: &str) {
    print!("{}", start_marker(unix_now(), name, header));
}

/// Close a named section opened by [`start`].
pub fn end(name: &str) {
    print!("{}", end_marker(unix_now(), name));
}

fn start_marker(timestamp: u64, name: &str, header: &str) -> String {
    format!("section_start:{timestamp}:{name}\r\x1b[0K{header}\n")
}

fn end_marker(timestamp: u64, name: &str) -> String {
    format!("section_end:{timestamp}:{name}\r\x1b[0K\n")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

//! Directory listing and timestamp formats used in replies

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::adapter::FileStat;
use crate::resolver::ResolvedNode;

const DIR_MODE: &str = "drwxr-xr-x";
const FILE_MODE: &str = "-rw-r--r--";
const OWNER: &str = "owner";
const GROUP: &str = "group";

/// Entries older than this show the year instead of the time of day
const RECENT_WINDOW: Duration = Duration::from_secs(180 * 24 * 60 * 60);

/// One `ls -l` style line (without the line terminator)
pub fn list_line(node: &ResolvedNode, now: SystemTime) -> String {
    let mode = if node.is_dir { DIR_MODE } else { FILE_MODE };
    let links = if node.is_dir { 2 } else { 1 };
    format!(
        "{} {:>3} {} {} {:>12} {} {}",
        mode,
        links,
        OWNER,
        GROUP,
        node.size,
        list_timestamp(node.modified_at, now),
        node.name
    )
}

fn list_timestamp(mtime: SystemTime, now: SystemTime) -> String {
    let when: DateTime<Utc> = mtime.into();
    let recent = match now.duration_since(mtime) {
        Ok(age) => age < RECENT_WINDOW,
        // Future timestamps are shown with the year
        Err(_) => false,
    };
    if recent {
        when.format("%b %e %H:%M").to_string()
    } else {
        when.format("%b %e  %Y").to_string()
    }
}

/// MDTM reply value, `YYYYMMDDHHMMSS` in UTC
pub fn mdtm_timestamp(stat: &FileStat) -> String {
    let when: DateTime<Utc> = stat.mtime.into();
    when.format("%Y%m%d%H%M%S").to_string()
}

/// Quote a path for a 257 reply, doubling embedded quotes
pub fn quote_path(path: &str) -> String {
    format!("\"{}\"", path.replace('"', "\"\""))
}

//! Startup replay of persisted log files.
//!
//! Rotated files are read in lexicographic name order (chronological, since
//! names embed the rotation timestamp) with `current.log` last, so the
//! callback sees entries oldest-file-first and in-order within each file.
//! Replay runs to completion before the ingest listener starts accepting.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

use crate::persist::CURRENT_LOG;
use crate::persist::manager::list_rotated_files;
use crate::utils::error::{Result, ServerError};
use crate::utils::time;

/// Feed every persisted line to `callback(message, timestamp)`.
///
/// Lines shaped `[YYYY-MM-DD HH:MM:SS] <rest>` deliver `<rest>` with the
/// parsed timestamp; anything else is delivered whole, stamped "now", so no
/// data is silently lost. A missing directory is an empty replay, not an
/// error. Returns the number of delivered lines.
pub fn replay_existing<F>(directory: &Path, mut callback: F) -> Result<u64>
where
    F: FnMut(&str, i64),
{
    if !directory.is_dir() {
        return Ok(0);
    }

    let mut names = list_rotated_files(directory).map_err(|err| {
        ServerError::FileOperation(format!("scan {}: {}", directory.display(), err))
    })?;
    names.sort();
    if directory.join(CURRENT_LOG).is_file() {
        names.push(CURRENT_LOG.to_string());
    }

    let mut delivered = 0u64;
    for name in &names {
        let path = directory.join(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                // One unreadable file must not abort the rest of the replay.
                warn!("replay skipping {}: {}", path.display(), err);
                continue;
            }
        };
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("replay read error in {}: {}", path.display(), err);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            let (message, timestamp) = split_persisted_line(&line);
            callback(message, timestamp);
            delivered += 1;
        }
    }

    if delivered > 0 {
        info!(entries = delivered, files = names.len(), "replayed persisted logs");
    }
    Ok(delivered)
}

/// Split `[<19-char timestamp>] rest` into its parts, falling back to the
/// whole line stamped "now" when the prefix does not parse.
fn split_persisted_line(line: &str) -> (&str, i64) {
    let bytes = line.as_bytes();
    if bytes.len() >= 22
        && bytes[0] == b'['
        && bytes[20] == b']'
        && bytes[21] == b' '
        && let Some(timestamp) = time::parse_timestamp(&line[1..20])
    {
        return (&line[22..], timestamp);
    }
    (line, time::now())
}

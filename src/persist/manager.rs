//! Asynchronous durable writer with size-based rotation and retention.
//!
//! Producers enqueue `(message, timestamp)` pairs onto a crossbeam channel
//! and return immediately; the writer thread formats and appends each line to
//! `current.log`, flushing after every write so a crash loses at most the
//! entry in flight. Write failures are counted, never propagated back to the
//! producer.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::persist::CURRENT_LOG;
use crate::utils::error::{Result, ServerError};
use crate::utils::time;

/// Durable-writer settings, all required.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Directory holding `current.log` and rotated files. Created with mode
    /// 0775 if missing.
    pub directory: PathBuf,
    /// Rotation threshold in bytes for `current.log`.
    pub max_file_size: u64,
    /// Maximum number of rotated files retained after pruning.
    pub max_files: usize,
}

/// Counter snapshot returned by [`PersistenceManager::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistenceStats {
    pub queued_logs: u64,
    pub persisted_logs: u64,
    pub failed_logs: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

struct WriteJob {
    message: String,
    timestamp: i64,
}

/// Handle to the writer thread. Dropping the internal sender on shutdown
/// lets the thread drain every queued entry before exiting.
pub struct PersistenceManager {
    sender: Mutex<Option<Sender<WriteJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    stopped: AtomicBool,
    directory: PathBuf,
}

impl PersistenceManager {
    /// Ensure the log directory exists, open `current.log` for append and
    /// start the writer thread.
    ///
    /// # Errors
    ///
    /// Directory creation or file open failure is fatal; the server must not
    /// start without its durable sink.
    pub fn new(config: PersistenceConfig) -> Result<Self> {
        ensure_directory(&config.directory)?;

        let path = config.directory.join(CURRENT_LOG);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                ServerError::FileOperation(format!("open {}: {}", path.display(), err))
            })?;
        let current_size = file
            .metadata()
            .map_err(|err| {
                ServerError::FileOperation(format!("stat {}: {}", path.display(), err))
            })?
            .len();

        let (tx, rx) = unbounded::<WriteJob>();
        let counters = Arc::new(Counters::default());
        let mut writer = Writer {
            config: config.clone(),
            file,
            current_size,
            counters: Arc::clone(&counters),
        };

        let handle = std::thread::Builder::new()
            .name("persist-writer".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    writer.write_entry(&job);
                }
                // Channel disconnected: every queued entry has been written.
                debug!("persistence writer drained and stopped");
            })
            .map_err(|err| ServerError::FileOperation(format!("spawn writer: {}", err)))?;

        info!(directory = %config.directory.display(), "persistence enabled");
        Ok(PersistenceManager {
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            counters,
            stopped: AtomicBool::new(false),
            directory: config.directory,
        })
    }

    /// Directory this manager writes into.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Queue one already-normalized message for durable writing.
    ///
    /// O(1); never blocks the caller. Returns `false` once the manager has
    /// shut down.
    pub fn enqueue(&self, message: &str, timestamp: i64) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return false;
        };
        let job = WriteJob {
            message: message.to_string(),
            timestamp,
        };
        if tx.send(job).is_ok() {
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            queued_logs: self.counters.queued.load(Ordering::Relaxed),
            persisted_logs: self.counters.persisted.load(Ordering::Relaxed),
            failed_logs: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Entries accepted but not yet written or failed.
    pub fn queue_depth(&self) -> u64 {
        let stats = self.stats();
        stats
            .queued_logs
            .saturating_sub(stats.persisted_logs + stats.failed_logs)
    }

    /// Stop accepting entries, drain the queue, and join the writer.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        // Dropping the sender disconnects the channel; the writer drains
        // whatever is still queued, then exits.
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ensure_directory(directory: &Path) -> Result<()> {
    if directory.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(directory).map_err(|err| {
        ServerError::FileOperation(format!("create {}: {}", directory.display(), err))
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(directory, fs::Permissions::from_mode(0o775));
    }
    Ok(())
}

/// Writer-thread state. Owned exclusively by the thread; no lock needed.
struct Writer {
    config: PersistenceConfig,
    file: File,
    current_size: u64,
    counters: Arc<Counters>,
}

impl Writer {
    fn write_entry(&mut self, job: &WriteJob) {
        let line = format!(
            "[{}] {}\n",
            time::format_timestamp(job.timestamp),
            job.message
        );
        match self.file.write_all(line.as_bytes()).and_then(|_| self.file.flush()) {
            Ok(()) => {
                self.current_size += line.len() as u64;
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("persistence write failed: {}", err);
                return;
            }
        }

        if self.current_size >= self.config.max_file_size {
            self.rotate();
        }
    }

    /// Rename `current.log` to its rotation-timestamp name, reopen fresh,
    /// and prune old rotated files.
    fn rotate(&mut self) {
        let current = self.config.directory.join(CURRENT_LOG);
        let rotated = self
            .config
            .directory
            .join(format!("{}.log", time::format_timestamp(time::now())));

        // A second rotation within the same wall-clock second would clobber
        // the earlier file; skip this cycle and retry on a later write.
        if rotated.exists() {
            debug!(target = %rotated.display(), "rotation name taken, deferring");
            return;
        }

        if let Err(err) = fs::rename(&current, &rotated) {
            // Already-gone is fine; anything else aborts this cycle.
            if err.kind() != ErrorKind::NotFound {
                warn!("rotation rename failed: {}", err);
                return;
            }
        }

        match OpenOptions::new().create(true).append(true).open(&current) {
            Ok(file) => {
                self.file = file;
                self.current_size = 0;
                debug!(rotated = %rotated.display(), "rotated log file");
            }
            Err(err) => {
                // Keep the old handle; entries keep landing in the rotated
                // file until a reopen succeeds on a later rotation.
                error!("reopen after rotation failed: {}", err);
                return;
            }
        }

        self.prune();
    }

    /// Remove lexicographically-smallest rotated files beyond `max_files`.
    fn prune(&self) {
        let mut rotated = match list_rotated_files(&self.config.directory) {
            Ok(names) => names,
            Err(err) => {
                warn!("retention scan failed: {}", err);
                return;
            }
        };
        rotated.sort();
        while rotated.len() > self.config.max_files {
            let victim = self.config.directory.join(rotated.remove(0));
            if let Err(err) = fs::remove_file(&victim) {
                warn!("retention unlink {} failed: {}", victim.display(), err);
                return;
            }
        }
    }
}

/// Rotated `*.log` file names in `directory`, excluding `current.log`.
/// Unsorted; callers order as needed.
pub(crate) fn list_rotated_files(directory: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.ends_with(".log") && name != CURRENT_LOG {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn wait_for_persisted(manager: &PersistenceManager, expected: u64) {
        for _ in 0..200 {
            let stats = manager.stats();
            if stats.persisted_logs + stats.failed_logs >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("writer did not persist {} entries in time", expected);
    }

    fn manager_in(dir: &TempDir, max_file_size: u64, max_files: usize) -> PersistenceManager {
        PersistenceManager::new(PersistenceConfig {
            directory: dir.path().to_path_buf(),
            max_file_size,
            max_files,
        })
        .unwrap()
    }

    #[test]
    fn test_creates_directory_and_current_log() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("logs");
        let manager = PersistenceManager::new(PersistenceConfig {
            directory: nested.clone(),
            max_file_size: 1024,
            max_files: 3,
        })
        .unwrap();
        assert!(nested.join(CURRENT_LOG).is_file());
        drop(manager);
    }

    #[test]
    fn test_writes_formatted_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 1024 * 1024, 3);
        assert!(manager.enqueue("first", 100));
        assert!(manager.enqueue("second", 101));
        wait_for_persisted(&manager, 2);
        manager.shutdown();

        let content = fs::read_to_string(dir.path().join(CURRENT_LOG)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("[{}] first", time::format_timestamp(100)));
        assert_eq!(lines[1], format!("[{}] second", time::format_timestamp(101)));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 1024 * 1024, 3);
        for i in 0..100 {
            assert!(manager.enqueue(&format!("entry {}", i), i));
        }
        manager.shutdown();

        let stats = manager.stats();
        assert_eq!(stats.queued_logs, 100);
        assert_eq!(stats.persisted_logs + stats.failed_logs, 100);
        let content = fs::read_to_string(dir.path().join(CURRENT_LOG)).unwrap();
        assert_eq!(content.lines().count(), 100);
    }

    #[test]
    fn test_enqueue_after_shutdown_returns_false() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 1024, 3);
        manager.shutdown();
        assert!(!manager.enqueue("late", 1));
    }

    #[test]
    fn test_rotation_and_retention_bound() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, 128, 2);
        for i in 0..10 {
            manager.enqueue(&format!("message number {:02} padding padding", i), i);
        }
        wait_for_persisted(&manager, 10);
        manager.shutdown();

        assert!(dir.path().join(CURRENT_LOG).exists());
        let rotated = list_rotated_files(dir.path()).unwrap();
        assert!(rotated.len() <= 2, "rotated files: {:?}", rotated);
    }

    #[test]
    fn test_current_size_seeded_from_existing_file() {
        let dir = TempDir::new().unwrap();
        // Pre-existing content just under the threshold: the next write must
        // trigger a rotation.
        fs::write(dir.path().join(CURRENT_LOG), vec![b'x'; 120]).unwrap();
        let manager = manager_in(&dir, 128, 5);
        manager.enqueue("tip over", 1);
        wait_for_persisted(&manager, 1);
        manager.shutdown();

        let rotated = list_rotated_files(dir.path()).unwrap();
        assert_eq!(rotated.len(), 1);
        // current.log was reopened fresh after the rotation.
        let content = fs::read_to_string(dir.path().join(CURRENT_LOG)).unwrap();
        assert!(content.is_empty());
    }
}

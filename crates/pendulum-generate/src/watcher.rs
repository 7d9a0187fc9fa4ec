//! Log tailing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pendulum_pipeline::CancelToken;
use tracing::{debug, trace};

use crate::error::GenerationError;
use crate::protocol::EmissionScanner;

/// Tails a generator log with a poll-sleep loop, reporting every announced
/// artifact id in log order.
#[derive(Debug)]
pub struct LogWatcher {
    path: PathBuf,
    scanner: EmissionScanner,
    poll: Duration,
}

impl LogWatcher {
    pub fn new(path: impl Into<PathBuf>, scanner: EmissionScanner, poll: Duration) -> Self {
        Self {
            path: path.into(),
            scanner,
            poll,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tail until the producing process has ended (`ended` set) and the log
    /// is drained, or until `cancel` fires. Returns every id announced.
    pub fn run(
        mut self,
        ended: &AtomicBool,
        cancel: &CancelToken,
        mut on_emit: impl FnMut(u64),
    ) -> Result<Vec<u64>, GenerationError> {
        let file = self.open(ended, cancel)?;
        let Some(file) = file else {
            return Ok(Vec::new());
        };
        let mut reader = BufReader::new(file);
        let mut announced = Vec::new();
        let mut buf = Vec::new();

        loop {
            // Observe `ended` before reading, so an empty read after it
            // means everything the process wrote has been seen.
            let was_ended = ended.load(Ordering::SeqCst);
            buf.clear();
            let n = reader
                .read_to_end(&mut buf)
                .map_err(|e| GenerationError::io(&self.path, e))?;

            if n > 0 {
                let chunk = String::from_utf8_lossy(&buf);
                for id in self.scanner.feed(&chunk) {
                    trace!(stage = "generate", test_id = id, "emission announced");
                    announced.push(id);
                    on_emit(id);
                }
                continue;
            }

            if was_ended {
                if let Some(id) = self.scanner.finish() {
                    announced.push(id);
                    on_emit(id);
                }
                break;
            }
            if cancel.is_cancelled() {
                debug!(stage = "generate", log_file = %self.path.display(), "log watcher cancelled");
                break;
            }
            thread::sleep(self.poll);
        }
        Ok(announced)
    }

    /// The process may not have created its log yet; wait for it.
    fn open(&self, ended: &AtomicBool, cancel: &CancelToken) -> Result<Option<File>, GenerationError> {
        loop {
            let was_ended = ended.load(Ordering::SeqCst);
            match File::open(&self.path) {
                Ok(f) => return Ok(Some(f)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if was_ended || cancel.is_cancelled() {
                        return Ok(None);
                    }
                    thread::sleep(self.poll);
                }
                Err(e) => return Err(GenerationError::io(&self.path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    fn watcher(path: &Path) -> LogWatcher {
        LogWatcher::new(path, EmissionScanner::new("W").unwrap(), Duration::from_millis(10))
    }

    #[test]
    fn test_drains_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("gen-log-1.txt");
        std::fs::write(
            &log,
            "start\n* EMITTED TEST CASE: W_1, OK\n* EMITTED TEST CASE: W_3, OK",
        )
        .unwrap();

        let ended = AtomicBool::new(true);
        let mut seen = Vec::new();
        let ids = watcher(&log)
            .run(&ended, &CancelToken::new(), |id| seen.push(id))
            .unwrap();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_follows_appends_until_ended() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("gen-log-2.txt");
        let ended = Arc::new(AtomicBool::new(false));

        let writer = {
            let log = log.clone();
            let ended = Arc::clone(&ended);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                let mut f = File::create(&log).unwrap();
                writeln!(f, "* EMITTED TEST CASE: W_2, OK").unwrap();
                f.flush().unwrap();
                thread::sleep(Duration::from_millis(30));
                write!(f, "* EMITTED TEST CASE: W_").unwrap();
                f.flush().unwrap();
                thread::sleep(Duration::from_millis(30));
                writeln!(f, "9, OK").unwrap();
                drop(f);
                ended.store(true, Ordering::SeqCst);
            })
        };

        let ids = watcher(&log).run(&ended, &CancelToken::new(), |_| {}).unwrap();
        writer.join().unwrap();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn test_cancel_stops_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("never-written.txt");
        let ended = AtomicBool::new(false);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(watcher(&log).run(&ended, &cancel, |_| {}).unwrap().is_empty());
    }
}

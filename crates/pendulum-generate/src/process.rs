//! Supervised external process.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use pendulum_pipeline::CancelToken;
use tracing::{debug, warn};

use crate::error::GenerationError;

const EXIT_POLL: Duration = Duration::from_millis(50);

/// A child process whose stdout and stderr both go to one log file.
#[derive(Debug)]
pub struct SupervisedProcess {
    child: Child,
    program: String,
}

impl SupervisedProcess {
    pub fn launch(argv: &[String], log: &Path) -> Result<Self, GenerationError> {
        let (program, args) = argv.split_first().ok_or_else(|| GenerationError::Launch {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        })?;
        let out = File::create(log).map_err(|e| GenerationError::io(log, e))?;
        let err = out.try_clone().map_err(|e| GenerationError::io(log, e))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .spawn()
            .map_err(|source| GenerationError::Launch {
                program: program.clone(),
                source,
            })?;
        debug!(stage = "generate", pid = child.id(), program = %program, "process launched");
        Ok(Self {
            child,
            program: program.clone(),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait for exit, killing the process if `cancel` fires first.
    /// `ended` is set once the process is gone, whichever way it went.
    pub fn supervise(
        mut self,
        cancel: &CancelToken,
        ended: &AtomicBool,
    ) -> Result<Option<ExitStatus>, GenerationError> {
        let result = self.wait_or_kill(cancel);
        ended.store(true, Ordering::SeqCst);
        result
    }

    fn wait_or_kill(&mut self, cancel: &CancelToken) -> Result<Option<ExitStatus>, GenerationError> {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {}
                Err(source) => {
                    return Err(GenerationError::Launch {
                        program: self.program.clone(),
                        source,
                    })
                }
            }
            if cancel.is_cancelled() {
                warn!(stage = "generate", pid = self.child.id(), "cancelled, killing process");
                let _ = self.child.kill();
                let _ = self.child.wait();
                return Ok(None);
            }
            thread::sleep(EXIT_POLL);
        }
    }
}

//! Global completion detection for the two-stage cycle.
//!
//! No stage can tell on its own that the pipeline is finished: an idle
//! stage may receive new work the instant its sibling's job completes. The
//! monitor therefore samples every supervised stage and declares the run
//! quiescent only after two consecutive all-idle samples taken one debounce
//! interval apart. The global deadline bypasses the debounce and
//! force-cancels every stage.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stage::Supervised;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every stage stayed idle across the debounce interval.
    Quiescent,
    /// The global time budget ran out.
    DeadlineElapsed,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Quiescent => write!(f, "quiescent"),
            TerminationReason::DeadlineElapsed => write!(f, "deadline elapsed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    Done(TerminationReason),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Global time budget measured from `start`.
    pub budget: Duration,
    /// Separation between the two idle samples.
    pub debounce: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(600),
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl Shared {
    fn finish(&self, reason: TerminationReason) {
        let mut state = self.state.lock();
        if *state == MonitorState::Running {
            *state = MonitorState::Done(reason);
            self.changed.notify_all();
        }
    }
}

pub struct TerminationMonitor {
    stages: Vec<Arc<dyn Supervised>>,
    config: MonitorConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TerminationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminationMonitor")
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl TerminationMonitor {
    pub fn new(stages: Vec<Arc<dyn Supervised>>, config: MonitorConfig) -> Self {
        Self {
            stages,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState::Running),
                changed: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start polling. The deadline is `now + budget`.
    pub fn start(&self) -> std::io::Result<()> {
        let deadline = Instant::now() + self.config.budget;
        let stages = self.stages.clone();
        let shared = Arc::clone(&self.shared);
        let debounce = self.config.debounce;
        let handle = thread::Builder::new()
            .name("termination-monitor".to_string())
            .spawn(move || watch(&stages, deadline, debounce, &shared))?;
        *self.handle.lock() = Some(handle);
        info!(
            stage = "monitor",
            budget_ms = self.config.budget.as_millis() as u64,
            debounce_ms = debounce.as_millis() as u64,
            "termination monitor started"
        );
        Ok(())
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.state.lock()
    }

    /// Block until the monitor reaches `Done`.
    pub fn wait_termination(&self) -> TerminationReason {
        let reason = {
            let mut state = self.shared.state.lock();
            loop {
                if let MonitorState::Done(reason) = *state {
                    break reason;
                }
                self.shared.changed.wait(&mut state);
            }
        };
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        reason
    }
}

fn watch(stages: &[Arc<dyn Supervised>], deadline: Instant, debounce: Duration, shared: &Shared) {
    let mut previous_idle = false;
    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(stage = "monitor", "global deadline elapsed, cancelling all stages");
            for s in stages {
                s.force_cancel();
            }
            shared.finish(TerminationReason::DeadlineElapsed);
            return;
        }

        let idle: Vec<bool> = stages.iter().map(|s| s.is_idle()).collect();
        let all_idle = idle.iter().all(|&b| b);
        if all_idle && previous_idle {
            info!(stage = "monitor", "all stages idle, pipeline quiescent");
            shared.finish(TerminationReason::Quiescent);
            return;
        }
        if all_idle {
            debug!(stage = "monitor", "all stages idle, confirming after debounce");
        }
        previous_idle = all_idle;

        thread::sleep(debounce.min(deadline.saturating_duration_since(now)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        idle: AtomicBool,
        cancelled: AtomicBool,
        polls: AtomicUsize,
    }

    impl Supervised for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn is_idle(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.idle.load(Ordering::SeqCst)
        }

        fn force_cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn monitor(probes: &[Arc<Probe>], budget_ms: u64, debounce_ms: u64) -> TerminationMonitor {
        TerminationMonitor::new(
            probes.iter().map(|p| Arc::clone(p) as Arc<dyn Supervised>).collect(),
            MonitorConfig {
                budget: Duration::from_millis(budget_ms),
                debounce: Duration::from_millis(debounce_ms),
            },
        )
    }

    #[test]
    fn test_quiescent_needs_two_idle_samples() {
        let a = Arc::new(Probe::default());
        let b = Arc::new(Probe::default());
        a.idle.store(true, Ordering::SeqCst);
        b.idle.store(true, Ordering::SeqCst);

        let m = monitor(&[Arc::clone(&a), Arc::clone(&b)], 10_000, 20);
        let start = Instant::now();
        m.start().unwrap();
        assert_eq!(m.wait_termination(), TerminationReason::Quiescent);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(a.polls.load(Ordering::SeqCst) >= 2);
        assert!(!a.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_one_busy_stage_blocks_quiescence() {
        let a = Arc::new(Probe::default());
        let b = Arc::new(Probe::default());
        a.idle.store(true, Ordering::SeqCst);

        let m = monitor(&[Arc::clone(&a), Arc::clone(&b)], 150, 10);
        let start = Instant::now();
        m.start().unwrap();
        assert_eq!(m.wait_termination(), TerminationReason::DeadlineElapsed);
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(a.cancelled.load(Ordering::SeqCst));
        assert!(b.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_state_transitions_once() {
        let a = Arc::new(Probe::default());
        a.idle.store(true, Ordering::SeqCst);
        let m = monitor(&[a], 1_000, 5);
        assert_eq!(m.state(), MonitorState::Running);
        m.start().unwrap();
        let reason = m.wait_termination();
        assert_eq!(m.state(), MonitorState::Done(reason));
        // Waiting again returns the same terminal reason immediately.
        assert_eq!(m.wait_termination(), reason);
    }
}

//! One worker slot: its segment, its worker and its health bookkeeping.

use std::time::{Duration, Instant};

use serde::Serialize;
use tandem_shm::SlotSegment;

use crate::launcher::WorkerHandle;
use crate::status::{ParamStatus, SlotRole, SlotStatus};
use crate::worker::WorkerExit;

const BACKOFF_BASE: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// A worker is starting and has not published a frame yet.
    Spawning,
    /// The worker is ticking.
    Running,
    /// The worker exited or was killed.
    Dead,
    /// The worker stopped beating.
    Hung,
    /// A replacement is being built.
    Replacing,
    /// Shut down by the supervisor.
    Stopped,
}

impl SlotState {
    /// True for states the monitor must rebuild from.
    pub fn is_failed(self) -> bool {
        matches!(self, SlotState::Dead | SlotState::Hung)
    }
}

/// Why a slot failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Died(WorkerExit),
    Hung,
}

/// Outcome of one health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotCheck {
    /// No running worker to check.
    Idle,
    /// Alive and beating.
    Ok,
    /// Found failed; `since` is the last sign of life.
    Failed { failure: Failure, since: Instant },
}

pub(crate) struct WorkerSlot {
    pub index: usize,
    pub segment: SlotSegment,
    pub state: SlotState,
    pub handle: Option<Box<dyn WorkerHandle>>,
    pub incarnation: u64,
    pub patch_generation: u64,
    /// Receives broadcasts (set from reset until failure).
    pub accepting: bool,
    /// A rebuild thread owns this slot.
    pub rebuilding: bool,
    /// Missed a broadcast; must be rebuilt before it can be trusted.
    pub desynced: bool,
    last_beat: u64,
    last_progress: Instant,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl WorkerSlot {
    pub fn new(index: usize, segment: SlotSegment) -> Self {
        Self {
            index,
            segment,
            state: SlotState::Stopped,
            handle: None,
            incarnation: 0,
            patch_generation: 0,
            accepting: false,
            rebuilding: false,
            desynced: false,
            last_beat: 0,
            last_progress: Instant::now(),
            failures: 0,
            next_attempt: None,
        }
    }

    /// Marks the worker running from `now` on.
    pub fn mark_running(&mut self, now: Instant) {
        self.state = SlotState::Running;
        self.last_beat = self.segment.control().heartbeat();
        self.last_progress = now;
        self.desynced = false;
        self.failures = 0;
        self.next_attempt = None;
    }

    /// Checks exit status first, then heartbeat progress.
    pub fn check(&mut self, now: Instant, timeout: Duration) -> SlotCheck {
        if self.state != SlotState::Running {
            return SlotCheck::Idle;
        }
        let Some(handle) = self.handle.as_mut() else {
            return SlotCheck::Idle;
        };
        if let Some(exit) = handle.try_exit() {
            return SlotCheck::Failed {
                failure: Failure::Died(exit),
                since: self.last_progress,
            };
        }
        let beat = self.segment.control().heartbeat();
        if beat != self.last_beat {
            self.last_beat = beat;
            self.last_progress = now;
            return SlotCheck::Ok;
        }
        if now.saturating_duration_since(self.last_progress) > timeout {
            return SlotCheck::Failed {
                failure: Failure::Hung,
                since: self.last_progress,
            };
        }
        SlotCheck::Ok
    }

    /// Records a failure, stops broadcasts to the slot and terminates
    /// whatever is left of the worker. The first rebuild may start after
    /// `delay`.
    pub fn mark_failed(&mut self, failure: &Failure, now: Instant, delay: Duration) {
        self.state = match failure {
            Failure::Died(_) => SlotState::Dead,
            Failure::Hung => SlotState::Hung,
        };
        self.accepting = false;
        if let Some(mut handle) = self.handle.take() {
            handle.kill();
        }
        self.failures = self.failures.saturating_add(1);
        self.next_attempt = Some(now + delay);
    }

    /// Schedules the next rebuild attempt with exponential backoff.
    pub fn note_failed_attempt(&mut self, now: Instant) {
        self.failures = self.failures.saturating_add(1);
        let shift = self.failures.saturating_sub(1).min(16);
        let delay = BACKOFF_BASE.saturating_mul(1 << shift).min(BACKOFF_MAX);
        self.next_attempt = Some(now + delay);
    }

    /// True if a rebuild may start at `now`.
    pub fn may_rebuild(&self, now: Instant) -> bool {
        !self.rebuilding && self.next_attempt.is_none_or(|at| now >= at)
    }

    /// Consecutive failures since the last healthy start.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn status(&self, role: SlotRole) -> SlotStatus {
        let control = self.segment.control();
        let audio = self.segment.audio();
        let counters = control.counters();
        let params = self
            .segment
            .params()
            .snapshot()
            .unwrap_or_default()
            .into_iter()
            .map(|p| ParamStatus {
                module: p.module.as_str().to_string(),
                param: p.param.as_str().to_string(),
                current: p.current,
                target: p.target,
            })
            .collect();
        SlotStatus {
            index: self.index,
            role,
            state: self.state,
            pid: self.handle.as_ref().map(|h| h.pid()),
            incarnation: self.incarnation,
            heartbeat: control.heartbeat(),
            patch_generation: self.patch_generation,
            ready: control.is_ready(),
            buffers: counters.buffers,
            commands: counters.commands,
            rejected: counters.rejected,
            dropped: counters.dropped,
            underruns: audio.underruns(),
            repeats: audio.repeats(),
            frames_written: audio.written(),
            params,
        }
    }
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("incarnation", &self.incarnation)
            .field("accepting", &self.accepting)
            .field("rebuilding", &self.rebuilding)
            .field("desynced", &self.desynced)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tandem_shm::SegmentLayout;

    use super::*;

    struct FakeHandle {
        exit: Option<WorkerExit>,
    }

    impl WorkerHandle for FakeHandle {
        fn pid(&self) -> u32 {
            42
        }
        fn try_exit(&mut self) -> Option<WorkerExit> {
            self.exit.clone()
        }
        fn kill(&mut self) {
            self.exit = Some(WorkerExit::Killed);
        }
    }

    fn slot(dir: &tempfile::TempDir) -> WorkerSlot {
        let layout = SegmentLayout::new(4, 16, 16, 16).unwrap();
        let segment = SlotSegment::create(dir.path().join("s.shm"), layout).unwrap();
        let mut slot = WorkerSlot::new(0, segment);
        slot.handle = Some(Box::new(FakeHandle { exit: None }));
        slot
    }

    #[test]
    fn idle_unless_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        assert_eq!(
            slot.check(Instant::now(), Duration::from_millis(10)),
            SlotCheck::Idle
        );
    }

    #[test]
    fn stalled_heartbeat_is_a_hang() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        let t = Instant::now();
        slot.mark_running(t);
        let timeout = Duration::from_millis(10);
        assert_eq!(slot.check(t + Duration::from_millis(5), timeout), SlotCheck::Ok);
        slot.segment.control().beat();
        assert_eq!(slot.check(t + Duration::from_millis(12), timeout), SlotCheck::Ok);
        assert_eq!(
            slot.check(t + Duration::from_millis(30), timeout),
            SlotCheck::Failed {
                failure: Failure::Hung,
                since: t + Duration::from_millis(12),
            }
        );
    }

    #[test]
    fn exit_detected_before_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        let t = Instant::now();
        slot.mark_running(t);
        slot.handle = Some(Box::new(FakeHandle {
            exit: Some(WorkerExit::Failed("boom".into())),
        }));
        slot.segment.control().beat();
        assert!(matches!(
            slot.check(t, Duration::from_secs(1)),
            SlotCheck::Failed { failure: Failure::Died(WorkerExit::Failed(_)), .. }
        ));
    }

    #[test]
    fn failure_backoff_grows_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        let t = Instant::now();
        slot.accepting = true;
        slot.mark_failed(&Failure::Hung, t, Duration::ZERO);
        assert_eq!(slot.state, SlotState::Hung);
        assert!(!slot.accepting);
        assert!(slot.handle.is_none());
        assert!(slot.may_rebuild(t));

        slot.note_failed_attempt(t);
        assert!(!slot.may_rebuild(t + BACKOFF_BASE));
        assert!(slot.may_rebuild(t + BACKOFF_BASE * 2));
        assert_eq!(slot.failures(), 2);

        slot.mark_running(t);
        assert_eq!(slot.failures(), 0);
        assert!(slot.may_rebuild(t));
    }

    #[test]
    fn rebuild_delay_holds_off_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        let t = Instant::now();
        slot.mark_running(t);
        slot.mark_failed(&Failure::Died(WorkerExit::Killed), t, Duration::from_secs(5));
        assert_eq!(slot.state, SlotState::Dead);
        assert!(!slot.may_rebuild(t + Duration::from_secs(4)));
        assert!(slot.may_rebuild(t + Duration::from_secs(5)));
    }

    #[test]
    fn status_reports_published_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = slot(&dir);
        slot.mark_running(Instant::now());
        slot.incarnation = 3;
        slot.segment.control().beat();
        slot.segment.audio().write(&[0.0; 16]);
        let status = slot.status(SlotRole::Standby);
        assert_eq!(status.role, SlotRole::Standby);
        assert_eq!(status.pid, Some(42));
        assert_eq!(status.incarnation, 3);
        assert_eq!(status.heartbeat, 1);
        assert_eq!(status.frames_written, 1);
        assert_eq!(status.state, SlotState::Running);
    }
}

//! The monitor loop: failure detection, failover and rebuild scheduling.
//!
//! The loop waits on its event channel with a timeout taken from the
//! [`PollPolicy`], so it wakes either on schedule or as soon as a rebuild
//! finishes or a broadcast flags a desync. Each poll checks the active
//! slot first: its failover is the only latency-critical step.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::metrics::SupervisorMetrics;
use crate::poll::PollPolicy;
use crate::slot::{Failure, SlotCheck, SlotState};
use crate::supervisor::{Shared, start_worker};

/// Wake-up reasons for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorEvent {
    /// A background rebuild finished.
    Rebuilt { slot: usize, ok: bool },
    /// Something changed; poll now.
    Wake,
    /// Exit the loop.
    Shutdown,
}

pub(crate) fn run(shared: &Arc<Shared>, events: &Receiver<MonitorEvent>) {
    let mut policy = PollPolicy::from_config(&shared.ctx.config().supervisor);
    debug!(baseline_us = policy.baseline().as_micros() as u64, "monitor started");

    loop {
        let interval = policy.interval(Instant::now());
        shared
            .poll_us
            .store(interval.as_micros() as u64, std::sync::atomic::Ordering::Relaxed);

        match events.recv_timeout(interval) {
            Ok(MonitorEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(MonitorEvent::Rebuilt { slot, ok }) => {
                if !ok {
                    debug!(slot, "rebuild failed, tightening poll");
                    policy.note_incident(Instant::now());
                }
            }
            Ok(MonitorEvent::Wake) | Err(RecvTimeoutError::Timeout) => {}
        }
        if shared.is_stopping() {
            break;
        }

        let now = Instant::now();
        if poll_once(shared, now) {
            policy.note_incident(now);
        }
    }
    debug!("monitor stopped");
}

/// One detection pass. Returns true if a slot failed.
pub(crate) fn poll_once(shared: &Arc<Shared>, now: Instant) -> bool {
    let timeout = shared.ctx.config().supervisor.heartbeat_timeout();
    let active = shared.output.active();
    let mut incident = false;

    for index in [active, 1 - active] {
        let check = shared.slots[index].lock().check(now, timeout);
        if let SlotCheck::Failed { failure, since } = check {
            incident = true;
            handle_failure(shared, index, &failure, since, now);
        }
    }

    promote_if_needed(shared);
    ensure_standby(shared, now);
    incident
}

fn handle_failure(shared: &Arc<Shared>, index: usize, failure: &Failure, since: Instant, now: Instant) {
    let metrics = &shared.metrics;
    metrics.detection.record(now.saturating_duration_since(since));
    match failure {
        Failure::Died(exit) => {
            SupervisorMetrics::bump(&metrics.crashes);
            warn!(slot = index, %exit, "worker died");
        }
        Failure::Hung => {
            SupervisorMetrics::bump(&metrics.hangs);
            warn!(
                slot = index,
                silent_ms = now.saturating_duration_since(since).as_millis() as u64,
                "worker hung"
            );
        }
    }

    let was_active = shared.output.active() == index;
    let switch_start = Instant::now();
    match shared.output.fail_over(index) {
        Some(to) => {
            let switch = switch_start.elapsed();
            metrics.switch.record(switch);
            SupervisorMetrics::bump(&metrics.failovers);
            warn!(
                from = index,
                to,
                switch_ns = switch.as_nanos() as u64,
                "failed over"
            );
        }
        None if was_active => {
            error!(slot = index, "no viable worker, output is silent until a rebuild completes");
        }
        None => {}
    }

    let delay = shared.ctx.config().supervisor.rebuild_delay();
    let ready = {
        let mut slot = shared.slots[index].lock();
        slot.mark_failed(failure, now, delay);
        slot.may_rebuild(now)
    };
    if ready {
        spawn_rebuild(shared, index);
    }
}

/// Points the boundary at a healthy slot if the active one is not.
fn promote_if_needed(shared: &Shared) {
    let active = shared.output.active();
    let other = 1 - active;
    if !shared.output.is_healthy(active)
        && shared.output.is_healthy(other)
        && shared.output.swap_active(active, other)
    {
        info!(from = active, to = other, "promoted recovered slot");
    }
}

/// Retries failed rebuilds once their backoff has passed and resyncs
/// standbys that missed a command.
fn ensure_standby(shared: &Arc<Shared>, now: Instant) {
    let active = shared.output.active();
    for index in 0..2 {
        let needed = {
            let slot = shared.slots[index].lock();
            if !slot.may_rebuild(now) {
                false
            } else if slot.state.is_failed() {
                true
            } else {
                slot.desynced && slot.state == SlotState::Running && index != active
            }
        };
        if needed {
            spawn_rebuild(shared, index);
        }
    }
}

/// Rebuilds slot `index` with the live patch on a background thread.
///
/// No-op if a rebuild of the slot is already running or the supervisor is
/// stopping.
pub(crate) fn spawn_rebuild(shared: &Arc<Shared>, index: usize) {
    {
        let mut slot = shared.slots[index].lock();
        if slot.rebuilding || shared.is_stopping() {
            return;
        }
        slot.rebuilding = true;
    }

    let worker_shared = Arc::clone(shared);
    let spawned = std::thread::Builder::new()
        .name(format!("tandem-rebuild-{index}"))
        .spawn(move || rebuild(&worker_shared, index));
    match spawned {
        Ok(handle) => shared.push_rebuild(handle),
        Err(e) => {
            error!(slot = index, error = %e, "could not start rebuild thread");
            shared.slots[index].lock().rebuilding = false;
        }
    }
}

fn rebuild(shared: &Shared, index: usize) {
    let (patch, generation) = {
        let live = shared.live.lock();
        (live.spec.clone(), live.generation)
    };
    let timeout = shared.ctx.config().supervisor.spawn_timeout();
    info!(slot = index, generation, "rebuilding slot");

    let ok = match start_worker(shared, index, &patch, generation, timeout, false) {
        Ok(latency) => {
            SupervisorMetrics::bump(&shared.metrics.replacements);
            shared.metrics.rebuild.record(latency);
            true
        }
        Err(e) => {
            SupervisorMetrics::bump(&shared.metrics.rebuild_failures);
            let mut slot = shared.slots[index].lock();
            slot.note_failed_attempt(Instant::now());
            if !shared.is_stopping() {
                warn!(slot = index, error = %e, failures = slot.failures(), "rebuild failed");
            }
            false
        }
    };

    shared.slots[index].lock().rebuilding = false;
    let _ = shared.events.send(MonitorEvent::Rebuilt { slot: index, ok });
}

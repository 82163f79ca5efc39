// sched.rs
//
// Cooperative periodic scheduler. A fixed table of (fn, period, deadline)
// slots advanced by `step(elapsed_ms)` from the supervisor tick. Deadlines
// advance by the period, not from "now", so cadence is preserved under tick
// jitter. Jobs run with no scheduler lock held.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::types::{FswError, FswResult, MAX_SCHED_JOBS};

pub type JobFn = fn();

#[derive(Clone, Copy)]
struct Job {
    fn_ptr: JobFn,
    period_ms: u32,
    next_run_ms: u32,
    used: bool,
}

const JOB_EMPTY: Job = Job {
    fn_ptr: noop,
    period_ms: 0,
    next_run_ms: 0,
    used: false,
};

fn noop() {}

pub struct Scheduler {
    now_ms: u32,
    jobs: [Job; MAX_SCHED_JOBS],
    in_progress: bool,
    initialized: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            now_ms: 0,
            jobs: [JOB_EMPTY; MAX_SCHED_JOBS],
            in_progress: false,
            initialized: false,
        }
    }

    pub fn register(&mut self, fn_ptr: JobFn, period_ms: u32) -> FswResult<()> {
        if period_ms == 0 {
            return Err(FswError::InvalidParam);
        }
        for job in self.jobs.iter_mut() {
            if !job.used {
                *job = Job {
                    fn_ptr,
                    period_ms,
                    next_run_ms: self.now_ms.wrapping_add(period_ms),
                    used: true,
                };
                return Ok(());
            }
        }
        Err(FswError::NoMemory)
    }

    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    pub fn job_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.used).count()
    }

    /// Advance time and collect the jobs due this step, in registration
    /// order. Each due slot fires at most once per step; its deadline moves
    /// forward by one period.
    pub fn due(&mut self, elapsed_ms: u32) -> Vec<JobFn, MAX_SCHED_JOBS> {
        self.now_ms = self.now_ms.wrapping_add(elapsed_ms);
        let mut due = Vec::new();
        for job in self.jobs.iter_mut() {
            if !job.used {
                continue;
            }
            // Wrap-agnostic "now >= deadline" within half the counter range.
            if self.now_ms.wrapping_sub(job.next_run_ms) < u32::MAX / 2 {
                job.next_run_ms = job.next_run_ms.wrapping_add(job.period_ms);
                let _ = due.push(job.fn_ptr);
            }
        }
        due
    }

    /// Convenience for in-process use: advance and fire.
    pub fn step(&mut self, elapsed_ms: u32) {
        for fn_ptr in self.due(elapsed_ms) {
            fn_ptr();
        }
    }
}

static SCHEDULER: Mutex<CriticalSectionRawMutex, RefCell<Scheduler>> =
    Mutex::new(RefCell::new(Scheduler::new()));

pub fn init() {
    SCHEDULER.lock(|s| {
        let mut s = s.borrow_mut();
        *s = Scheduler::new();
        s.initialized = true;
    });
}

pub fn register(fn_ptr: JobFn, period_ms: u32) -> FswResult<()> {
    SCHEDULER.lock(|s| {
        let mut s = s.borrow_mut();
        if !s.initialized {
            return Err(FswError::NotReady);
        }
        s.register(fn_ptr, period_ms)
    })
}

/// One supervisor tick. Returns `Busy` if a step is already in progress;
/// the scheduler is not re-entrant.
pub fn step(elapsed_ms: u32) -> FswResult<()> {
    let due = SCHEDULER.lock(|s| {
        let mut s = s.borrow_mut();
        if !s.initialized {
            return Err(FswError::NotReady);
        }
        if s.in_progress {
            return Err(FswError::Busy);
        }
        s.in_progress = true;
        Ok(s.due(elapsed_ms))
    })?;

    // Jobs run with the scheduler lock released; they take their own locks.
    for fn_ptr in due {
        fn_ptr();
    }

    SCHEDULER.lock(|s| s.borrow_mut().in_progress = false);
    Ok(())
}

pub fn uptime_ms() -> u32 {
    SCHEDULER.lock(|s| s.borrow().now_ms)
}

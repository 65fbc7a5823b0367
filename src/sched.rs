//! Cooperative periodic tasks on one thread.
//!
//! A task is due again `interval()` after it last ran, so changing the value
//! a task reports changes its period from the next round on.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, trace};

use crate::stack::Stack;
use crate::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The device should be reset.
    Reboot,
}

pub trait Task {
    fn name(&self) -> &str;

    /// Delay before the next run.
    fn interval(&self) -> Duration;

    fn run(&mut self) -> Outcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u32);

struct Entry {
    id: TaskId,
    task: Box<dyn Task>,
    due: Instant,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    entries: Vec<Entry>,
    next_id: u32,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a task; it is due immediately.
    pub fn add(&mut self, task: Box<dyn Task>) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        debug!("task {} added, every {:?}", task.name(), task.interval());
        self.entries.push(Entry {
            id,
            task,
            due: self.clock.now(),
        });
        id
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Box<dyn Task>> {
        let at = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(at).task)
    }

    /// Time until the earliest task is due.
    pub fn next_due(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .iter()
            .map(|e| e.due.saturating_duration_since(now))
            .min()
    }

    /// Run every due task once, in registration order.
    pub fn poll(&mut self) -> Outcome {
        for entry in self.entries.iter_mut() {
            let now = self.clock.now();
            if now < entry.due {
                continue;
            }
            trace!("task {} run", entry.task.name());
            let outcome = entry.task.run();
            entry.due = self.clock.now() + entry.task.interval();
            if outcome == Outcome::Reboot {
                error!("task {} requested a reboot", entry.task.name());
                return Outcome::Reboot;
            }
        }
        Outcome::Continue
    }

    /// Loop until a task asks for a reboot, sleeping at most `idle` between rounds.
    pub fn run(&mut self, idle: Duration) {
        loop {
            if self.poll() == Outcome::Reboot {
                return;
            }
            let nap = self.next_due().map_or(idle, |d| d.min(idle));
            if !nap.is_zero() {
                self.clock.sleep(nap);
            }
        }
    }
}

/// Pumps a shared stack's receive path.
pub struct NetTask {
    stack: Rc<RefCell<Stack>>,
    interval: Duration,
}

impl NetTask {
    pub fn new(stack: Rc<RefCell<Stack>>, interval: Duration) -> Self {
        Self { stack, interval }
    }
}

impl Task for NetTask {
    fn name(&self) -> &str {
        "net"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn run(&mut self) -> Outcome {
        let Ok(mut stack) = self.stack.try_borrow_mut() else {
            return Outcome::Continue;
        };
        if let Err(e) = stack.poll() {
            error!("net: {}", e);
        }
        Outcome::Continue
    }
}

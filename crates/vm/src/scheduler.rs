//! The cooperative scheduler's queues and clock.
//!
//! Round-robin over runnable threads; the running thread is never on the
//! queue. The timer queue is kept sorted by absolute wake-up tick and holds
//! sleeping threads, timed waiters, and pending interrupt deliveries. All
//! queue manipulation happens between opcodes, so no locking exists below
//! this layer.

use std::collections::VecDeque;

use log::trace;

use crate::thread::ThreadId;

/// What to do with a thread whose alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    /// Make the thread runnable again (sleep expiry).
    Resume,
    /// Move the thread from its monitor's condvar queue to the waiter
    /// queue (timed wait expiry).
    CondvarTimeout,
    /// Raise `InterruptedException` in the thread.
    DeliverInterrupt,
}

/// One timer-queue entry.
#[derive(Debug, Clone, Copy)]
pub struct TimerEntry {
    pub wakeup: u64,
    pub thread: ThreadId,
    pub action: AlarmAction,
}

/// Time source. The VM only ever asks for "now" and, when every thread is
/// blocked on the timer queue, to wait until the next wake-up.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch.
    fn now(&mut self) -> u64;
    /// Blocks (or jumps) until at least `deadline`, returning the new now.
    fn wait_until(&mut self, deadline: u64) -> u64;
}

/// A virtual clock that jumps instantly; the default for embedding and
/// tests.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: u64,
}

impl VirtualClock {
    /// Creates a clock at tick 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for VirtualClock {
    fn now(&mut self) -> u64 {
        self.now
    }

    fn wait_until(&mut self, deadline: u64) -> u64 {
        if deadline > self.now {
            self.now = deadline;
        }
        self.now
    }
}

/// A clock backed by host time; sleeps for real when asked to wait.
#[derive(Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    /// Creates a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wait_until(&mut self, deadline: u64) -> u64 {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(std::time::Duration::from_millis(deadline - now));
        }
        self.now()
    }
}

/// Runnable ring and timer queue.
#[derive(Debug, Default)]
pub struct Scheduler {
    runnable: VecDeque<ThreadId>,
    timer: Vec<TimerEntry>,
}

impl Scheduler {
    /// Creates empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runnable threads (the current thread excluded).
    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    /// Number of timer-queue entries.
    pub fn timer_len(&self) -> usize {
        self.timer.len()
    }

    /// True when a thread is somewhere on the runnable queue.
    pub fn is_runnable_queued(&self, thread: ThreadId) -> bool {
        self.runnable.contains(&thread)
    }

    /// Appends a thread to the tail of the runnable ring.
    pub fn enqueue_runnable(&mut self, thread: ThreadId) {
        debug_assert!(!self.runnable.contains(&thread));
        trace!("schedule: thread {} runnable", thread.0);
        self.runnable.push_back(thread);
    }

    /// Pops the head of the runnable ring.
    pub fn dequeue_runnable(&mut self) -> Option<ThreadId> {
        self.runnable.pop_front()
    }

    /// Removes a thread from the runnable ring wherever it sits.
    pub fn remove_runnable(&mut self, thread: ThreadId) {
        self.runnable.retain(|&t| t != thread);
    }

    /// Registers an alarm for `thread` at absolute tick `wakeup`,
    /// keeping the queue sorted by wake-up time.
    pub fn register_alarm(&mut self, thread: ThreadId, wakeup: u64, action: AlarmAction) {
        trace!("schedule: alarm for thread {} at {}", thread.0, wakeup);
        let at = self
            .timer
            .partition_point(|entry| entry.wakeup <= wakeup);
        self.timer.insert(
            at,
            TimerEntry {
                wakeup,
                thread,
                action,
            },
        );
    }

    /// Cancels every alarm registered for `thread`, returning how many were
    /// removed.
    pub fn cancel_alarms(&mut self, thread: ThreadId) -> usize {
        let before = self.timer.len();
        self.timer.retain(|entry| entry.thread != thread);
        before - self.timer.len()
    }

    /// True when `thread` has an alarm registered.
    pub fn has_alarm(&self, thread: ThreadId) -> bool {
        self.timer.iter().any(|entry| entry.thread == thread)
    }

    /// Pops every entry due at or before `now`, in wake-up order.
    pub fn due_alarms(&mut self, now: u64) -> Vec<TimerEntry> {
        let split = self.timer.partition_point(|entry| entry.wakeup <= now);
        self.timer.drain(..split).collect()
    }

    /// The next wake-up tick, if any entry is pending.
    pub fn next_wakeup(&self) -> Option<u64> {
        self.timer.first().map(|entry| entry.wakeup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runnable_ring_is_fifo() {
        let mut s = Scheduler::new();
        s.enqueue_runnable(ThreadId(1));
        s.enqueue_runnable(ThreadId(2));
        s.enqueue_runnable(ThreadId(3));
        assert_eq!(s.dequeue_runnable(), Some(ThreadId(1)));
        s.enqueue_runnable(ThreadId(1));
        assert_eq!(s.dequeue_runnable(), Some(ThreadId(2)));
        assert_eq!(s.dequeue_runnable(), Some(ThreadId(3)));
        assert_eq!(s.dequeue_runnable(), Some(ThreadId(1)));
        assert_eq!(s.dequeue_runnable(), None);
    }

    #[test]
    fn timer_queue_stays_sorted() {
        let mut s = Scheduler::new();
        s.register_alarm(ThreadId(1), 300, AlarmAction::Resume);
        s.register_alarm(ThreadId(2), 100, AlarmAction::Resume);
        s.register_alarm(ThreadId(3), 200, AlarmAction::CondvarTimeout);
        assert_eq!(s.next_wakeup(), Some(100));
        let due = s.due_alarms(250);
        let order: Vec<u16> = due.iter().map(|e| e.thread.0).collect();
        assert_eq!(order, vec![2, 3]);
        assert_eq!(s.next_wakeup(), Some(300));
    }

    #[test]
    fn equal_deadlines_fire_in_registration_order() {
        let mut s = Scheduler::new();
        s.register_alarm(ThreadId(1), 100, AlarmAction::Resume);
        s.register_alarm(ThreadId(2), 100, AlarmAction::Resume);
        let due = s.due_alarms(100);
        let order: Vec<u16> = due.iter().map(|e| e.thread.0).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn cancel_removes_all_entries_for_a_thread() {
        let mut s = Scheduler::new();
        s.register_alarm(ThreadId(1), 100, AlarmAction::Resume);
        s.register_alarm(ThreadId(1), 200, AlarmAction::DeliverInterrupt);
        s.register_alarm(ThreadId(2), 150, AlarmAction::Resume);
        assert_eq!(s.cancel_alarms(ThreadId(1)), 2);
        assert!(!s.has_alarm(ThreadId(1)));
        assert!(s.has_alarm(ThreadId(2)));
    }

    #[test]
    fn virtual_clock_jumps() {
        let mut c = VirtualClock::new();
        assert_eq!(c.now(), 0);
        assert_eq!(c.wait_until(500), 500);
        assert_eq!(c.wait_until(100), 500);
    }
}

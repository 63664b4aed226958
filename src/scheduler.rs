// Cooperative timer queue and animation-frame registry on a host-driven clock.
// Single-threaded: nothing fires until the host advances the clock through `Show::tick`.
// See DESIGN.md: Scheduler

use std::collections::{BTreeMap, HashMap};

use crate::types::{PhaseId, Timestamp};

/// Cancellation token for a scheduled timer. Cancelling a fired timer is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Cancellation token for a requested animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

/// A (delay, action) pair, relative to the moment its timeline is scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent<A> {
    pub delay_ms: u64,
    pub action: A,
}

/// Ordered list of timed events: ascending delay, insertion order among equal delays.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline<A> {
    events: Vec<TimedEvent<A>>,
}

impl<A> Timeline<A> {
    pub fn new() -> Self {
        Timeline { events: Vec::new() }
    }

    /// Adds an event at an absolute delay from the timeline start.
    pub fn at(mut self, delay_ms: u64, action: A) -> Self {
        let pos = self.events.partition_point(|e| e.delay_ms <= delay_ms);
        self.events.insert(pos, TimedEvent { delay_ms, action });
        self
    }

    /// Adds an event `gap_ms` after the latest event so far (cumulative delay).
    pub fn then(self, gap_ms: u64, action: A) -> Self {
        let base = self.duration_ms();
        self.at(base.saturating_add(gap_ms), action)
    }

    pub fn events(&self) -> &[TimedEvent<A>] {
        &self.events
    }

    /// Delay of the last event.
    pub fn duration_ms(&self) -> u64 {
        self.events.last().map_or(0, |e| e.delay_ms)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn map<B>(self, mut f: impl FnMut(A) -> B) -> Timeline<B> {
        Timeline {
            events: self
                .events
                .into_iter()
                .map(|e| TimedEvent {
                    delay_ms: e.delay_ms,
                    action: f(e.action),
                })
                .collect(),
        }
    }
}

impl<A> Default for Timeline<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// A timer whose due time was reached.
#[derive(Debug)]
pub struct Fired<A> {
    pub due: Timestamp,
    pub owner: Option<PhaseId>,
    pub action: A,
}

struct TimerEntry<A> {
    owner: Option<PhaseId>,
    action: A,
}

struct FrameEntry<A> {
    id: u64,
    owner: Option<PhaseId>,
    action: A,
}

/// Delayed-callback queue plus one-shot frame requests.
pub struct Scheduler<A> {
    now: Timestamp,
    next_id: u64,
    timers: BTreeMap<(Timestamp, u64), TimerEntry<A>>,
    due_by_id: HashMap<u64, Timestamp>,
    frames: Vec<FrameEntry<A>>,
}

impl<A> Scheduler<A> {
    pub fn new() -> Self {
        Scheduler {
            now: Timestamp::default(),
            next_id: 0,
            timers: BTreeMap::new(),
            due_by_id: HashMap::new(),
            frames: Vec::new(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    fn bump(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Schedules `action` to fire `delay_ms` after the current clock.
    pub fn after(&mut self, delay_ms: u64, owner: Option<PhaseId>, action: A) -> TimerHandle {
        let id = self.bump();
        let due = self.now.after_millis(delay_ms);
        self.timers.insert((due, id), TimerEntry { owner, action });
        self.due_by_id.insert(id, due);
        TimerHandle(id)
    }

    /// Schedules every event of a timeline relative to the current clock.
    pub fn schedule_timeline(
        &mut self,
        timeline: Timeline<A>,
        owner: Option<PhaseId>,
    ) -> Vec<TimerHandle> {
        timeline
            .events
            .into_iter()
            .map(|e| self.after(e.delay_ms, owner, e.action))
            .collect()
    }

    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.due_by_id.remove(&handle.0) {
            Some(due) => self.timers.remove(&(due, handle.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.due_by_id.contains_key(&handle.0)
    }

    /// Registers `action` for the next animation frame (one-shot, like rAF).
    pub fn request_frame(&mut self, owner: Option<PhaseId>, action: A) -> FrameHandle {
        let id = self.bump();
        self.frames.push(FrameEntry { id, owner, action });
        FrameHandle(id)
    }

    pub fn cancel_frame(&mut self, handle: FrameHandle) -> bool {
        let before = self.frames.len();
        self.frames.retain(|f| f.id != handle.0);
        self.frames.len() != before
    }

    /// Cancels every timer and frame request owned by `owner`. Returns how many were dropped.
    pub fn cancel_owned(&mut self, owner: PhaseId) -> usize {
        let doomed: Vec<(Timestamp, u64)> = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.owner == Some(owner))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.timers.remove(key);
            self.due_by_id.remove(&key.1);
        }
        let frames_before = self.frames.len();
        self.frames.retain(|f| f.owner != Some(owner));
        doomed.len() + (frames_before - self.frames.len())
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Timers and frames still registered for `owner`.
    pub fn pending_for(&self, owner: PhaseId) -> usize {
        self.timers.values().filter(|e| e.owner == Some(owner)).count()
            + self.frames.iter().filter(|f| f.owner == Some(owner)).count()
    }

    /// Pops the earliest timer due at or before `until` and moves the clock to its due time,
    /// so timers scheduled from inside the callback are relative to when it was meant to run.
    pub fn pop_due(&mut self, until: Timestamp) -> Option<Fired<A>> {
        let key = *self.timers.keys().next()?;
        if key.0 > until {
            return None;
        }
        let entry = self.timers.remove(&key)?;
        self.due_by_id.remove(&key.1);
        if key.0 > self.now {
            self.now = key.0;
        }
        Some(Fired {
            due: key.0,
            owner: entry.owner,
            action: entry.action,
        })
    }

    /// Moves the clock forward; it never runs backwards.
    pub fn advance_to(&mut self, now: Timestamp) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Takes the frame requests registered so far. Requests made while these run land in the next frame.
    pub fn take_frames(&mut self) -> Vec<(Option<PhaseId>, A)> {
        std::mem::take(&mut self.frames)
            .into_iter()
            .map(|f| (f.owner, f.action))
            .collect()
    }

    /// Upcoming timers of one owner, as delays from the current clock.
    pub fn upcoming(&self, owner: PhaseId) -> Vec<TimedEvent<&A>> {
        self.timers
            .iter()
            .filter(|(_, entry)| entry.owner == Some(owner))
            .map(|((due, _), entry)| TimedEvent {
                delay_ms: due.millis_since(self.now),
                action: &entry.action,
            })
            .collect()
    }
}

impl<A> Default for Scheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(scheduler: &mut Scheduler<&'static str>, until_ms: u64) -> Vec<&'static str> {
        let until = Timestamp::from_micros(until_ms * 1000);
        let mut fired = Vec::new();
        while let Some(f) = scheduler.pop_due(until) {
            fired.push(f.action);
        }
        scheduler.advance_to(until);
        fired
    }

    #[test]
    fn fires_in_due_order_then_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.after(300, None, "late");
        scheduler.after(100, None, "first");
        scheduler.after(100, None, "second");

        assert_eq!(drain(&mut scheduler, 99), Vec::<&str>::new());
        assert_eq!(drain(&mut scheduler, 300), vec!["first", "second", "late"]);
    }

    #[test]
    fn clock_moves_to_due_time_while_firing() {
        let mut scheduler = Scheduler::new();
        scheduler.after(100, None, "a");
        let fired = scheduler.pop_due(Timestamp::from_micros(5_000_000)).unwrap();
        assert_eq!(fired.due, Timestamp::from_micros(100_000));
        assert_eq!(scheduler.now(), Timestamp::from_micros(100_000));

        // A chained timer is relative to the due time, not to the tick time.
        scheduler.after(50, None, "b");
        let chained = scheduler.pop_due(Timestamp::from_micros(5_000_000)).unwrap();
        assert_eq!(chained.due, Timestamp::from_micros(150_000));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.after(10, None, "x");
        assert!(scheduler.is_pending(handle));
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert_eq!(drain(&mut scheduler, 100), Vec::<&str>::new());
    }

    #[test]
    fn cancel_owned_drops_timers_and_frames() {
        let mut scheduler = Scheduler::new();
        scheduler.after(10, Some(PhaseId::Phase1), "mine");
        scheduler.after(10, Some(PhaseId::Phase2), "theirs");
        scheduler.request_frame(Some(PhaseId::Phase1), "frame");

        assert_eq!(scheduler.cancel_owned(PhaseId::Phase1), 2);
        assert_eq!(scheduler.pending_for(PhaseId::Phase1), 0);
        assert_eq!(scheduler.pending_frames(), 0);
        assert_eq!(drain(&mut scheduler, 10), vec!["theirs"]);
    }

    #[test]
    fn frames_are_one_shot() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.request_frame(None, "f");
        assert_eq!(scheduler.take_frames().len(), 1);
        assert!(scheduler.take_frames().is_empty());
        assert!(!scheduler.cancel_frame(handle));
    }

    #[test]
    fn timeline_keeps_ascending_order() {
        let timeline = Timeline::new()
            .at(500, "b")
            .at(100, "a")
            .then(250, "c")
            .at(500, "b2");
        let delays: Vec<u64> = timeline.events().iter().map(|e| e.delay_ms).collect();
        assert_eq!(delays, vec![100, 500, 500, 750]);
        assert_eq!(timeline.events()[2].action, "b2");
        assert_eq!(timeline.duration_ms(), 750);
    }

    #[test]
    fn upcoming_reports_relative_delays() {
        let mut scheduler = Scheduler::new();
        scheduler.advance_to(Timestamp::from_micros(1_000_000));
        scheduler.schedule_timeline(Timeline::new().at(0, "now").at(2000, "later"), Some(PhaseId::Phase3));
        let upcoming = scheduler.upcoming(PhaseId::Phase3);
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[1].delay_ms, 2000);
        assert_eq!(*upcoming[1].action, "later");
    }
}

//! Host-owned scheduling.
//!
//! Nothing in the runtime starts its own timer. Components register an
//! animation-frame callback or a fixed-interval timer here, the host calls
//! [`FrameScheduler::poll`] from its own loop and dispatches whatever is due.
//! Disposing a component cancels its registrations, so a leaked callback
//! shows up in [`FrameScheduler::active_registrations`].

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

/// Opaque handle to a scheduler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Registration {
    /// Fires on every polled frame.
    AnimationFrame,
    /// Fires once every `period_secs`.
    Interval { period_secs: f64, next_due: f64 },
}

#[derive(Debug, Clone)]
struct Entry {
    owner: String,
    registration: Registration,
}

#[derive(Debug, Default)]
struct SchedulerState {
    next_id: u64,
    entries: BTreeMap<CallbackId, Entry>,
}

/// Cheap-to-clone handle to the shared callback registry.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    inner: Arc<Mutex<SchedulerState>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_animation_frame(&self, owner: impl Into<String>) -> CallbackId {
        self.insert(owner.into(), Registration::AnimationFrame)
    }

    /// Registers a timer whose first firing is one period after `now`.
    pub fn set_interval(&self, owner: impl Into<String>, period_secs: f64, now: f64) -> CallbackId {
        let period_secs = period_secs.max(f64::EPSILON);
        self.insert(
            owner.into(),
            Registration::Interval {
                period_secs,
                next_due: now + period_secs,
            },
        )
    }

    /// Removes a registration. Cancelling twice is harmless.
    pub fn cancel(&self, id: CallbackId) -> bool {
        let removed = self.inner.lock().entries.remove(&id);
        if let Some(entry) = &removed {
            tracing::trace!(owner = %entry.owner, ?id, "cancelled scheduler registration");
        }
        removed.is_some()
    }

    pub fn is_active(&self, id: CallbackId) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    pub fn active_registrations(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Registrations still held by `owner`.
    pub fn registrations_for(&self, owner: &str) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.owner == owner)
            .count()
    }

    /// Returns every callback due at `now`, in registration order. Interval
    /// timers that fell behind fire once and are rescheduled from `now`.
    pub fn poll(&self, now: f64) -> Vec<CallbackId> {
        let mut state = self.inner.lock();
        let mut due = Vec::new();
        for (id, entry) in state.entries.iter_mut() {
            match &mut entry.registration {
                Registration::AnimationFrame => due.push(*id),
                Registration::Interval {
                    period_secs,
                    next_due,
                } => {
                    if now + 1e-9 >= *next_due {
                        due.push(*id);
                        *next_due += *period_secs;
                        if *next_due <= now {
                            *next_due = now + *period_secs;
                        }
                    }
                }
            }
        }
        due
    }

    fn insert(&self, owner: String, registration: Registration) -> CallbackId {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = CallbackId(state.next_id);
        tracing::trace!(%owner, ?id, ?registration, "scheduler registration");
        state.entries.insert(
            id,
            Entry {
                owner,
                registration,
            },
        );
        id
    }
}

/// Monotonic scene clock advanced explicitly once per frame.
#[derive(Debug, Default, Clone)]
pub struct SceneClock {
    elapsed: f64,
    delta: f32,
}

impl SceneClock {
    /// Advances by `delta` seconds; negative deltas are ignored.
    pub fn advance(&mut self, delta: f32) -> f32 {
        self.delta = delta.max(0.0);
        self.elapsed += self.delta as f64;
        self.delta
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animation_frames_fire_every_poll() {
        let scheduler = FrameScheduler::new();
        let id = scheduler.request_animation_frame("engine");

        assert_eq!(scheduler.poll(0.0), vec![id]);
        assert_eq!(scheduler.poll(0.016), vec![id]);
    }

    #[test]
    fn intervals_fire_on_period() {
        let scheduler = FrameScheduler::new();
        let id = scheduler.set_interval("monitor", 0.1, 0.0);

        assert!(scheduler.poll(0.05).is_empty());
        assert_eq!(scheduler.poll(0.1), vec![id]);
        assert!(scheduler.poll(0.15).is_empty());
        assert_eq!(scheduler.poll(0.2), vec![id]);
        // A stalled host only sees one firing, not a burst.
        assert_eq!(scheduler.poll(1.0), vec![id]);
        assert!(scheduler.poll(1.05).is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let scheduler = FrameScheduler::new();
        let id = scheduler.request_animation_frame("scene");
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.active_registrations(), 0);
        assert!(scheduler.poll(1.0).is_empty());
    }

    #[test]
    fn clock_ignores_negative_delta() {
        let mut clock = SceneClock::default();
        clock.advance(0.5);
        clock.advance(-1.0);
        assert_eq!(clock.elapsed(), 0.5);
        assert_eq!(clock.delta(), 0.0);
    }
}

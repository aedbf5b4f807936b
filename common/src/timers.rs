//! Slot-based MAC timers
//!
//! Timers are driven once per slot by the scheduler tick; durations are
//! expressed in slots of the active numerology.

/// A timer counting down in slots.
///
/// An inactive timer never expires. A timer with `duration == u32::MAX`
/// is treated as infinity: it stays active but never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTimer {
    active: bool,
    duration: u32,
    counter: u32,
}

/// Duration value meaning "never expire"
pub const TIMER_INFINITE: u32 = u32::MAX;

impl SlotTimer {
    /// Create a stopped timer with the given duration in slots
    pub fn new(duration: u32) -> Self {
        Self {
            active: false,
            duration,
            counter: 0,
        }
    }

    /// (Re)start the timer from zero
    pub fn start(&mut self) {
        self.active = true;
        self.counter = 0;
    }

    /// Change the duration and restart
    pub fn restart_with(&mut self, duration: u32) {
        self.duration = duration;
        self.start();
    }

    /// Stop the timer without firing
    pub fn stop(&mut self) {
        self.active = false;
        self.counter = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Advance by one slot. Returns true exactly once, on the tick where
    /// the configured duration is reached; the timer stops itself.
    pub fn tick(&mut self) -> bool {
        if !self.active || self.duration == TIMER_INFINITE {
            return false;
        }
        self.counter += 1;
        if self.counter >= self.duration {
            self.active = false;
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Slots elapsed since the last start
    pub fn elapsed(&self) -> u32 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_once() {
        let mut t = SlotTimer::new(3);
        t.start();
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(!t.is_active());
        assert!(!t.tick());
    }

    #[test]
    fn test_inactive_timer_never_fires() {
        let mut t = SlotTimer::new(1);
        assert!(!t.tick());
    }

    #[test]
    fn test_infinite_timer() {
        let mut t = SlotTimer::new(TIMER_INFINITE);
        t.start();
        for _ in 0..1000 {
            assert!(!t.tick());
        }
        assert!(t.is_active());
    }

    #[test]
    fn test_restart_resets_counter() {
        let mut t = SlotTimer::new(2);
        t.start();
        assert!(!t.tick());
        t.start();
        assert!(!t.tick());
        assert!(t.tick());
    }
}

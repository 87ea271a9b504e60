use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Per-class alert bookkeeping. Lives for the pipeline's lifetime only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertState {
    pub last_fired_at: Option<Instant>,
    pub total_count: u64,
}

/// Cooldown gate keyed by class name.
///
/// Classes are gated independently: an alert for one class never suppresses
/// another. Only the pipeline thread mutates it.
#[derive(Debug)]
pub struct AlertGate {
    cooldown: Duration,
    states: HashMap<String, AlertState>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            states: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Accept the alert when the class never fired or its last fire is more
    /// than `cooldown` before `now`. Accepting records `now` and bumps the count.
    pub fn should_fire(&mut self, class_name: &str, now: Instant) -> bool {
        let state = self.states.entry(class_name.to_string()).or_default();
        let open = match state.last_fired_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        };
        if open {
            state.last_fired_at = Some(now);
            state.total_count += 1;
        }
        open
    }

    pub fn state(&self, class_name: &str) -> Option<&AlertState> {
        self.states.get(class_name)
    }

    /// Accepted fires for `class_name` so far; 0 if it never fired.
    pub fn total_count(&self, class_name: &str) -> u64 {
        self.states
            .get(class_name)
            .map(|state| state.total_count)
            .unwrap_or(0)
    }

    /// Accepted fires across every class.
    pub fn total_fired(&self) -> u64 {
        self.states.values().map(|state| state.total_count).sum()
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_suppresses_then_reopens() {
        let mut gate = AlertGate::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(gate.should_fire("person", t0));
        assert!(!gate.should_fire("person", t0 + Duration::from_secs(3)));
        assert!(gate.should_fire("person", t0 + Duration::from_secs(6)));
        assert_eq!(gate.total_count("person"), 2);
    }

    #[test]
    fn suppressed_attempt_does_not_extend_cooldown() {
        let mut gate = AlertGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(gate.should_fire("person", t0));
        assert!(!gate.should_fire("person", t0 + Duration::from_secs(4)));
        assert!(gate.should_fire("person", t0 + Duration::from_millis(5_001)));
    }

    #[test]
    fn exactly_cooldown_apart_is_still_suppressed() {
        let mut gate = AlertGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(gate.should_fire("person", t0));
        assert!(!gate.should_fire("person", t0 + Duration::from_secs(5)));
    }

    #[test]
    fn classes_cool_down_independently() {
        let mut gate = AlertGate::default();
        let t0 = Instant::now();
        assert!(gate.should_fire("a", t0));
        assert!(gate.should_fire("b", t0));
        assert_eq!(gate.total_count("a"), 1);
        assert_eq!(gate.total_count("b"), 1);
        assert_eq!(gate.total_fired(), 2);
    }

    #[test]
    fn unknown_class_has_zero_total() {
        let gate = AlertGate::default();
        assert_eq!(gate.total_count("nothing"), 0);
        assert!(gate.state("nothing").is_none());
    }
}

//! Smooth transitions
//!
//! A device is either idle (`Option<Transition>` is `None`) or transitioning
//! toward a target. A transition owns exactly one loop timer; starting a new
//! one cancels the previous timer first, so a device never has two ticks in
//! flight. Each tick moves the value by at most `step` and never past the
//! target. Applying the value, emitting signals, and ending the transition
//! are the owning service's job; this module only does the bookkeeping.
use crate::error::Error;
use crate::mainloop::{EventLoop, Source, Token};
use log::debug;
use std::time::Duration;

/// Slack when comparing the remaining distance against `step`
///
/// Keeps accumulated floating-point error from adding an extra tick.
const EPSILON: f64 = 1e-9;

/// Per-request smoothing parameters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Smooth {
    /// Magnitude advanced per tick, in the capability's units
    pub step: f64,
    /// Tick period in milliseconds
    pub wait: u32,
}

impl Smooth {
    pub const NONE: Smooth = Smooth { step: 0.0, wait: 0 };

    pub fn new(step: f64, wait: u32) -> Self {
        Self { step, wait }
    }

    /// A transition runs only when target, step and wait are all positive
    pub fn applies_to(&self, target: f64) -> bool {
        target > 0.0 && self.step > 0.0 && self.wait > 0
    }
}

/// Move `current` toward `target` by at most `step`, snapping when close
pub fn advance(current: f64, target: f64, step: f64) -> f64 {
    let distance = target - current;
    if distance.abs() <= step + EPSILON {
        target
    } else if distance > 0.0 {
        current + step
    } else {
        current - step
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Value to apply; more ticks follow
    Continue(f64),
    /// Value to apply; it equals the target and the transition ends
    Finished(f64),
}

impl Tick {
    pub fn value(self) -> f64 {
        match self {
            Tick::Continue(v) | Tick::Finished(v) => v,
        }
    }
}

/// In-flight transition state
#[derive(Debug)]
pub struct Transition {
    target: f64,
    step: f64,
    current: f64,
    timer: Token,
}

impl Transition {
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn timer(&self) -> Token {
        self.timer
    }

    /// Compute the next value and record it as current
    pub fn tick(&mut self) -> Tick {
        self.current = advance(self.current, self.target, self.step);
        if self.current == self.target {
            Tick::Finished(self.current)
        } else {
            Tick::Continue(self.current)
        }
    }
}

/// Start a transition in `slot`, replacing any running one
///
/// The new timer fires immediately so the first step is applied without
/// waiting a whole period.
pub fn begin(
    slot: &mut Option<Transition>,
    events: &mut EventLoop,
    source: Source,
    start: f64,
    target: f64,
    smooth: Smooth,
) -> Result<(), Error> {
    cancel(slot, events);
    let timer = events.add_timer(Duration::from_millis(u64::from(smooth.wait)), source)?;
    debug!(
        "Transition {} -> {} (step {}, every {} ms)",
        start, target, smooth.step, smooth.wait
    );
    *slot = Some(Transition {
        target,
        step: smooth.step,
        current: start,
        timer,
    });
    Ok(())
}

/// Stop the transition in `slot`, if any, and release its timer
pub fn cancel(slot: &mut Option<Transition>, events: &mut EventLoop) {
    if let Some(transition) = slot.take()
        && let Err(e) = events.remove_timer(transition.timer)
    {
        log::warn!("Failed to release transition timer: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Capability;

    fn source() -> Source {
        Source::Tick {
            capability: Capability::Backlight,
            id: "panel".to_string(),
        }
    }

    fn run(start: f64, target: f64, step: f64) -> Vec<f64> {
        let mut current = start;
        let mut values = Vec::new();
        while current != target {
            current = advance(current, target, step);
            values.push(current);
            assert!(values.len() < 10_000, "transition did not converge");
        }
        values
    }

    #[test]
    fn converges_within_bound_and_stays_in_range() {
        let points = [0.0, 0.05, 0.2, 0.33, 0.5, 0.71, 0.999, 1.0];
        let steps = [0.01, 0.07, 0.1, 0.25, 0.5, 1.0, 3.0];
        for &start in &points {
            for &target in &points {
                for &step in &steps {
                    let values = run(start, target, step);
                    let bound = ((target - start).abs() / step).ceil() as usize;
                    assert!(
                        values.len() <= bound,
                        "{start} -> {target} by {step}: {} ticks > {bound}",
                        values.len()
                    );
                    let (lo, hi) = (start.min(target), start.max(target));
                    for v in values {
                        assert!(v >= lo - EPSILON && v <= hi + EPSILON);
                    }
                }
            }
        }
    }

    #[test]
    fn never_overshoots() {
        assert_eq!(advance(0.9, 1.0, 0.5), 1.0);
        assert_eq!(advance(0.2, 0.1, 5.0), 0.1);
        assert_eq!(advance(4000.0, 6500.0, 50.0), 4050.0);
        assert_eq!(advance(6480.0, 6500.0, 50.0), 6500.0);
    }

    #[test]
    fn ten_percent_steps_from_point_two_take_eight_ticks() {
        let values = run(0.2, 1.0, 0.1);
        assert_eq!(values.len(), 8);
        assert_eq!(*values.last().unwrap(), 1.0);
        for (i, v) in values.iter().enumerate() {
            let expected = 0.3 + 0.1 * i as f64;
            assert!((v - expected).abs() < 1e-9, "tick {i}: {v} != {expected}");
        }
    }

    #[test]
    fn requested_only_when_all_parameters_positive() {
        assert!(Smooth::new(0.1, 50).applies_to(1.0));
        assert!(!Smooth::new(0.0, 50).applies_to(1.0));
        assert!(!Smooth::new(0.1, 0).applies_to(1.0));
        assert!(!Smooth::new(0.1, 50).applies_to(0.0));
        assert!(!Smooth::NONE.applies_to(0.5));
    }

    #[test]
    fn begin_replaces_running_transition() {
        let mut events = EventLoop::new().unwrap();
        let mut slot = None;

        begin(&mut slot, &mut events, source(), 0.0, 1.0, Smooth::new(0.1, 50)).unwrap();
        let first = slot.as_ref().unwrap().timer();
        begin(&mut slot, &mut events, source(), 0.5, 0.0, Smooth::new(0.2, 10)).unwrap();

        assert!(!events.contains(first));
        assert_eq!(events.timers(), 1);
        assert_eq!(slot.as_ref().unwrap().target(), 0.0);
    }

    #[test]
    fn tick_reports_finish_on_target() {
        let mut events = EventLoop::new().unwrap();
        let mut slot = None;
        begin(&mut slot, &mut events, source(), 0.8, 1.0, Smooth::new(0.15, 10)).unwrap();

        let transition = slot.as_mut().unwrap();
        assert!(matches!(transition.tick(), Tick::Continue(v) if (v - 0.95).abs() < 1e-9));
        assert_eq!(transition.tick(), Tick::Finished(1.0));

        cancel(&mut slot, &mut events);
        assert!(slot.is_none());
        assert_eq!(events.timers(), 0);
    }
}

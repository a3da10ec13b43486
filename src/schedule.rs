/*!
Learning rate schedules.

The learning rate is not owned by the optimizer, it is passed to every update. A [`Scheduler`]
owns the current value and changes it once per epoch according to its [`Schedule`].
*/
use serde::{Deserialize, Serialize};

/// Adaptive patience decay.
///
/// Returns `(best, stall, learning_rate)` for the next epoch given the monitored `metric`.
/// - If `metric > best`, `metric` becomes the best and the stall counter resets.
/// - Else if `stall > delay`, the learning rate is divided by `divisor` and the stall counter
/// resets.
/// - Otherwise the stall counter is incremented.
///
/// A metric equal to `best` is not an improvement.
pub fn adaptive_patience(
    metric: f32,
    best: f32,
    stall: usize,
    learning_rate: f32,
    delay: usize,
    divisor: f32,
) -> (f32, usize, f32) {
    if metric > best {
        (metric, 0, learning_rate)
    } else if stall > delay {
        (best, 0, learning_rate / divisor)
    } else {
        (best, stall + 1, learning_rate)
    }
}

/// Learning rate policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Schedule {
    /// Divide by `divisor` once the monitored metric has not improved for more than `delay`
    /// epochs. See [`adaptive_patience`].
    AdaptivePatience {
        /// Epochs without improvement before decaying.
        delay: usize,
        /// Divides the learning rate.
        divisor: f32,
    },
    /// Divide by `divisor` at the end of every `interval` epochs, ignoring the metric.
    FixedIntervalDecay {
        /// Number of epochs between decays.
        interval: usize,
        /// Divides the learning rate.
        divisor: f32,
    },
    /// Keep the learning rate fixed.
    Constant,
}

/// Mutable state of a [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Best metric seen so far.
    pub best: f32,
    /// Consecutive epochs without improvement.
    pub stall: usize,
    /// The current learning rate.
    pub learning_rate: f32,
}

impl SchedulerState {
    /// A fresh state at `learning_rate` with `best = 0`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            best: 0.,
            stall: 0,
            learning_rate,
        }
    }
}

/// Applies a [`Schedule`] to its [`SchedulerState`].
#[derive(Clone, Debug)]
pub struct Scheduler {
    schedule: Schedule,
    state: SchedulerState,
}

impl Scheduler {
    /// Creates a scheduler starting at `learning_rate`.
    pub fn new(schedule: Schedule, learning_rate: f32) -> Self {
        Self {
            schedule,
            state: SchedulerState::new(learning_rate),
        }
    }
    /// Replaces the state, ie when resuming from a checkpoint.
    pub fn with_state(self, state: SchedulerState) -> Self {
        Self { state, ..self }
    }
    /// The schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
    /// The state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }
    /// The current learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.state.learning_rate
    }
    /// Updates the state after `epoch` (0 based) finished with `metric`.
    ///
    /// Returns the learning rate for the next epoch.
    pub fn step(&mut self, epoch: usize, metric: f32) -> f32 {
        let SchedulerState {
            best,
            stall,
            learning_rate,
        } = self.state;
        self.state = match self.schedule {
            Schedule::AdaptivePatience { delay, divisor } => {
                let (best, stall, learning_rate) =
                    adaptive_patience(metric, best, stall, learning_rate, delay, divisor);
                SchedulerState {
                    best,
                    stall,
                    learning_rate,
                }
            }
            Schedule::FixedIntervalDecay { interval, divisor } => {
                let learning_rate = if interval > 0 && epoch % interval == interval - 1 {
                    learning_rate / divisor
                } else {
                    learning_rate
                };
                SchedulerState {
                    best: best.max(metric),
                    stall,
                    learning_rate,
                }
            }
            Schedule::Constant => SchedulerState {
                best: best.max(metric),
                stall,
                learning_rate,
            },
        };
        self.state.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_interval_decay_every_40() {
        let mut scheduler = Scheduler::new(
            Schedule::FixedIntervalDecay {
                interval: 40,
                divisor: 10.,
            },
            1e-2,
        );
        let mut rates = Vec::new();
        for epoch in 0..120 {
            rates.push(scheduler.step(epoch, 0.));
        }
        assert_relative_eq!(rates[38], 1e-2, max_relative = 1e-6);
        assert_relative_eq!(rates[39], 1e-3, max_relative = 1e-6);
        assert_relative_eq!(rates[78], 1e-3, max_relative = 1e-6);
        assert_relative_eq!(rates[79], 1e-4, max_relative = 1e-6);
        assert_relative_eq!(rates[119], 1e-5, max_relative = 1e-5);
    }

    #[test]
    fn fixed_interval_ignores_metric() {
        let schedule = Schedule::FixedIntervalDecay {
            interval: 2,
            divisor: 2.,
        };
        let mut a = Scheduler::new(schedule, 1.);
        let mut b = Scheduler::new(schedule, 1.);
        for epoch in 0..6 {
            assert_eq!(a.step(epoch, epoch as f32), b.step(epoch, 0.));
        }
    }

    #[test]
    fn constant_keeps_rate() {
        let mut scheduler = Scheduler::new(Schedule::Constant, 0.5);
        for epoch in 0..10 {
            assert_eq!(scheduler.step(epoch, 0.), 0.5);
        }
        assert_eq!(scheduler.state().best, 0.);
    }

    #[test]
    fn schedule_serde_tagged() {
        let schedule: Schedule =
            serde_json::from_str(r#"{"policy":"adaptive_patience","delay":12,"divisor":10.0}"#)
                .unwrap();
        assert_eq!(
            schedule,
            Schedule::AdaptivePatience {
                delay: 12,
                divisor: 10.
            }
        );
    }
}

use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    pub world_width: u32,
    pub world_height: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            world_width: 1024,
            world_height: 512,
        }
    }
}

impl LoopConfig {
    /// Copy with zero values replaced by safe minimums.
    pub fn normalized(&self) -> Self {
        Self {
            target_tps: self.target_tps.max(1),
            max_frame_delta: normalize_non_zero_duration(
                self.max_frame_delta,
                Duration::from_millis(250),
            ),
            max_ticks_per_frame: self.max_ticks_per_frame.max(1),
            metrics_log_interval: normalize_non_zero_duration(
                self.metrics_log_interval,
                Duration::from_secs(1),
            ),
            world_width: self.world_width.max(1),
            world_height: self.world_height.max(1),
        }
    }

    pub fn fixed_dt(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_tps.max(1) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub ticks_to_run: u32,
    pub remaining_accumulator: Duration,
    pub dropped_backlog: Duration,
}

pub fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::take(&mut accumulator)
    } else {
        Duration::ZERO
    };
    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

pub fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

pub fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

/// Accumulates wall time and hands out whole fixed ticks.
#[derive(Debug)]
pub struct FixedStepClock {
    fixed_dt: Duration,
    max_frame_delta: Duration,
    max_ticks_per_frame: u32,
    accumulator: Duration,
    last_frame: Instant,
}

impl FixedStepClock {
    pub fn new(config: &LoopConfig, now: Instant) -> Self {
        let config = config.normalized();
        Self {
            fixed_dt: config.fixed_dt(),
            max_frame_delta: config.max_frame_delta,
            max_ticks_per_frame: config.max_ticks_per_frame,
            accumulator: Duration::ZERO,
            last_frame: now,
        }
    }

    pub fn fixed_dt(&self) -> Duration {
        self.fixed_dt
    }

    /// Returns the raw frame time since the previous call and the ticks due now.
    pub fn advance(&mut self, now: Instant) -> (Duration, StepPlan) {
        let raw_frame_dt = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;

        let clamped = clamp_frame_delta(raw_frame_dt, self.max_frame_delta);
        self.accumulator = self.accumulator.saturating_add(clamped);
        let plan = plan_sim_steps(self.accumulator, self.fixed_dt, self.max_ticks_per_frame);
        self.accumulator = plan.remaining_accumulator;

        if plan.dropped_backlog > Duration::ZERO {
            warn!(
                dropped_backlog_ms = plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame = self.max_ticks_per_frame,
                "sim_clamp_triggered"
            );
        }
        (raw_frame_dt, plan)
    }

    /// Time left before the next tick is due.
    pub fn until_next_tick(&self) -> Duration {
        self.fixed_dt.saturating_sub(self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let result = plan_sim_steps(Duration::from_millis(48), Duration::from_millis(16), 5);
        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let result = plan_sim_steps(Duration::from_millis(120), Duration::from_millis(16), 3);
        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(72));
    }

    #[test]
    fn clock_keeps_fractional_remainder() {
        let config = LoopConfig {
            target_tps: 50,
            ..LoopConfig::default()
        };
        let start = Instant::now();
        let mut clock = FixedStepClock::new(&config, start);
        assert_eq!(clock.fixed_dt(), Duration::from_millis(20));

        let (_, plan) = clock.advance(start + Duration::from_millis(45));
        assert_eq!(plan.ticks_to_run, 2);
        assert_eq!(clock.until_next_tick(), Duration::from_millis(15));

        let (_, plan) = clock.advance(start + Duration::from_millis(60));
        assert_eq!(plan.ticks_to_run, 1);
    }

    #[test]
    fn zeroed_config_is_normalized() {
        let config = LoopConfig {
            target_tps: 0,
            max_frame_delta: Duration::ZERO,
            max_ticks_per_frame: 0,
            metrics_log_interval: Duration::ZERO,
            world_width: 0,
            world_height: 0,
        }
        .normalized();
        assert_eq!(config.target_tps, 1);
        assert_eq!(config.max_ticks_per_frame, 1);
        assert_eq!(config.max_frame_delta, Duration::from_millis(250));
        assert_eq!(config.metrics_log_interval, Duration::from_secs(1));
        assert_eq!(config.world_width, 1);
    }
}

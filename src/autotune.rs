//! Kernel block-size autotuning.
//!
//! Each kernel owns one [`Autotuner`]. A tuner sweeps a discrete set of
//! block sizes, timing a fixed number of launches per candidate, then locks
//! in the candidate with the lowest mean and replays it until the next
//! periodic sweep. There is no global tuner state; a traverser carries its
//! own pair.

use std::time::{Duration, Instant};

/// Sweep parameters for an [`Autotuner`].
#[derive(Debug, Clone, Copy)]
pub struct AutotunerConfig {
    /// Run sweeps at all. When disabled the tuner always hands out its
    /// current best candidate.
    pub enabled: bool,
    /// Smallest candidate block size.
    pub start: u32,
    /// Largest candidate block size.
    pub end: u32,
    /// Spacing between candidates.
    pub step: u32,
    /// Timed launches per candidate in a sweep.
    pub samples: u32,
    /// Launches between the end of one sweep and the start of the next.
    pub period: u32,
}

impl Default for AutotunerConfig {
    fn default() -> Self {
        AutotunerConfig {
            enabled: true,
            start: 32,
            end: 1024,
            step: 32,
            samples: 5,
            period: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sweeping,
    Idle,
}

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    total: Duration,
    count: u32,
}

/// Round-robin block-size tuner bracketing kernel launches.
///
/// Call [`begin`](Self::begin) to pick the block size for a launch and
/// [`end`](Self::end) after the launch completes. While
/// [`measuring`](Self::measuring) is true the caller must synchronize the
/// device between the two so the wall-clock sample covers the kernel.
#[derive(Debug)]
pub struct Autotuner {
    label: &'static str,
    enabled: bool,
    period: u32,
    samples: u32,
    params: Vec<u32>,
    timings: Vec<Timing>,
    best: u32,
    calls: u32,
    state: State,
    current: usize,
    started: Option<Instant>,
}

impl Autotuner {
    /// Tuner over `{start, start+step, .., end}`, sweeping immediately.
    ///
    /// `label` names the tuned kernel in log output.
    pub fn new(label: &'static str, config: AutotunerConfig) -> Self {
        let params: Vec<u32> = (config.start..=config.end)
            .step_by(config.step as usize)
            .collect();
        assert!(!params.is_empty(), "autotuner needs at least one candidate");
        Autotuner {
            label,
            enabled: config.enabled,
            period: config.period,
            samples: config.samples.max(1),
            timings: vec![Timing::default(); params.len()],
            best: params[0],
            params,
            calls: 0,
            state: State::Sweeping,
            current: 0,
            started: None,
        }
    }

    /// Drop candidates above `max_param` (e.g. a device workgroup limit).
    pub fn restrict(&mut self, max_param: u32) {
        let keep = self.params.iter().filter(|&&p| p <= max_param).count().max(1);
        self.params.truncate(keep);
        self.timings.truncate(keep);
        self.best = self.best.min(self.params[keep - 1]);
        self.current = self.current.min(keep - 1);
    }

    /// Candidate block sizes.
    pub fn params(&self) -> &[u32] {
        &self.params
    }

    /// Current best block size.
    pub fn best(&self) -> u32 {
        self.best
    }

    /// Select the block size for the next launch.
    pub fn begin(&mut self) -> u32 {
        if !self.enabled {
            return self.best;
        }
        if self.state == State::Idle && self.calls >= self.period {
            self.start_sweep();
        }
        match self.state {
            State::Sweeping => {
                self.current = self
                    .timings
                    .iter()
                    .position(|t| t.count < self.samples)
                    .unwrap_or(0);
                self.started = Some(Instant::now());
                self.params[self.current]
            }
            State::Idle => self.best,
        }
    }

    /// True while a timing sample is open.
    pub fn measuring(&self) -> bool {
        self.started.is_some()
    }

    /// Restart the open sample, excluding setup work (e.g. a pipeline
    /// compile) from the measurement.
    pub fn rearm(&mut self) {
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    /// Close the launch opened by [`begin`](Self::begin).
    pub fn end(&mut self) {
        self.calls = self.calls.saturating_add(1);
        if let Some(start) = self.started.take() {
            self.record(start.elapsed());
        }
    }

    fn record(&mut self, elapsed: Duration) {
        let slot = &mut self.timings[self.current];
        slot.total += elapsed;
        slot.count += 1;
        log::trace!(
            "{}: block {} sample {}/{} took {:?}",
            self.label,
            self.params[self.current],
            slot.count,
            self.samples,
            elapsed
        );
        if self.timings.iter().all(|t| t.count >= self.samples) {
            self.finish_sweep();
        }
    }

    fn start_sweep(&mut self) {
        for t in &mut self.timings {
            *t = Timing::default();
        }
        self.state = State::Sweeping;
    }

    fn finish_sweep(&mut self) {
        let best = self
            .timings
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.total / t.count)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.best = self.params[best];
        self.state = State::Idle;
        self.calls = 0;
        log::debug!("{}: sweep done, best block size {}", self.label, self.best);
    }

    /// Enable or disable sweeping. Disabling mid-sweep keeps the current
    /// best and discards the open measurement.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.started = None;
        }
    }

    /// Set the number of launches between sweeps.
    pub fn set_period(&mut self, period: u32) {
        self.period = period;
    }
}

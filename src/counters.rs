//! Timing and statistics collection, modeled on the teacher's
//! `counters: Counters` field threaded through `MoreauJeanSolver`/`World`
//! (`assembly_started`/`assembly_completed`, etc.). Disabled by default so
//! it costs nothing on the hot path when the caller doesn't ask for it.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Named timer region. Spec §6 enumerates these labels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Region {
    Locdyn,
    GsInit,
    GsRun,
    GsCom,
    GsmRun,
    GsmCom,
    GsExit,
    ParBal,
    ConDet,
    TimInt,
}

impl Region {
    fn label(self) -> &'static str {
        match self {
            Region::Locdyn => "LOCDYN",
            Region::GsInit => "GSINIT",
            Region::GsRun => "GSRUN",
            Region::GsCom => "GSCOM",
            Region::GsmRun => "GSMRUN",
            Region::GsmCom => "GSMCOM",
            Region::GsExit => "GSEXIT",
            Region::ParBal => "PARBAL",
            Region::ConDet => "CONDET",
            Region::TimInt => "TIMINT",
        }
    }
}

/// Per-rank statistics named in spec §6.
#[derive(Copy, Clone, Debug, Default)]
pub struct Stats {
    pub bodies: usize,
    pub boxes: usize,
    pub constraints: usize,
    pub external_constraints: usize,
    pub sparsified: usize,
    pub deletions: usize,
    pub bytes_sent: usize,
}

struct Timer {
    total: Duration,
    started: Option<Instant>,
}

impl Timer {
    fn new() -> Self {
        Timer {
            total: Duration::default(),
            started: None,
        }
    }
}

/// Diagnostics aggregator. Construct with `Counters::new(false)` to disable
/// (matches the teacher's `World::new`) or `Counters::new(true)` to enable.
pub struct Counters {
    enabled: bool,
    timers: HashMap<Region, Timer>,
    pub stats: Stats,
}

impl Counters {
    pub fn new(enabled: bool) -> Self {
        Counters {
            enabled,
            timers: HashMap::new(),
            stats: Stats::default(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn start(&mut self, region: Region) {
        if !self.enabled {
            return;
        }
        let timer = self.timers.entry(region).or_insert_with(Timer::new);
        timer.started = Some(Instant::now());
    }

    pub fn stop(&mut self, region: Region) {
        if !self.enabled {
            return;
        }
        if let Some(timer) = self.timers.get_mut(&region) {
            if let Some(start) = timer.started.take() {
                timer.total += start.elapsed();
            }
        }
    }

    pub fn elapsed(&self, region: Region) -> Duration {
        self.timers
            .get(&region)
            .map(|t| t.total)
            .unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.timers.clear();
        self.stats = Stats::default();
    }

    pub fn locdyn_started(&mut self) {
        self.start(Region::Locdyn)
    }
    pub fn locdyn_completed(&mut self) {
        self.stop(Region::Locdyn)
    }
    pub fn gs_init_started(&mut self) {
        self.start(Region::GsInit)
    }
    pub fn gs_init_completed(&mut self) {
        self.stop(Region::GsInit)
    }
    pub fn gs_run_started(&mut self) {
        self.start(Region::GsRun)
    }
    pub fn gs_run_completed(&mut self) {
        self.stop(Region::GsRun)
    }
    pub fn gs_com_started(&mut self) {
        self.start(Region::GsCom)
    }
    pub fn gs_com_completed(&mut self) {
        self.stop(Region::GsCom)
    }
}

impl fmt::Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counters")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn disabled_counters_record_nothing() {
        let mut counters = Counters::new(false);
        counters.locdyn_started();
        sleep(Duration::from_millis(5));
        counters.locdyn_completed();
        assert_eq!(counters.elapsed(Region::Locdyn), Duration::default());
    }

    #[test]
    fn enabled_counters_accumulate_elapsed_time() {
        let mut counters = Counters::new(true);
        counters.gs_run_started();
        sleep(Duration::from_millis(5));
        counters.gs_run_completed();
        assert!(counters.elapsed(Region::GsRun) >= Duration::from_millis(5));
    }

    #[test]
    fn reset_clears_timers_and_stats() {
        let mut counters = Counters::new(true);
        counters.stats.constraints = 4;
        counters.gs_com_started();
        counters.gs_com_completed();
        counters.reset();
        assert_eq!(counters.stats.constraints, 0);
        assert_eq!(counters.elapsed(Region::GsCom), Duration::default());
    }
}

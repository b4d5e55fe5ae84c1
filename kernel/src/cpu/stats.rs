//! Per-processor counters

use core::sync::atomic::{AtomicU64, Ordering};

/// Lightweight scheduling and interrupt counters of one processor
#[derive(Debug)]
pub struct ProcessorStats {
    pub ticks: AtomicU64,
    pub preemptions: AtomicU64,
    pub voluntary_switches: AtomicU64,
    pub idle_selections: AtomicU64,
    pub spurious_interrupts: AtomicU64,
    pub deferred_interrupts: AtomicU64,
    pub ipis_handled: AtomicU64,
}

impl Default for ProcessorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorStats {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            voluntary_switches: AtomicU64::new(0),
            idle_selections: AtomicU64::new(0),
            spurious_interrupts: AtomicU64::new(0),
            deferred_interrupts: AtomicU64::new(0),
            ipis_handled: AtomicU64::new(0),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a thread switch, `preempt` when it was forced by the clock
    pub fn record_switch(&self, preempt: bool) {
        if preempt {
            self.preemptions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.voluntary_switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_idle(&self) {
        self.idle_selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spurious(&self) {
        self.spurious_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ipi(&self) {
        self.ipis_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            voluntary_switches: self.voluntary_switches.load(Ordering::Relaxed),
            idle_selections: self.idle_selections.load(Ordering::Relaxed),
            spurious_interrupts: self.spurious_interrupts.load(Ordering::Relaxed),
            deferred_interrupts: self.deferred_interrupts.load(Ordering::Relaxed),
            ipis_handled: self.ipis_handled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub preemptions: u64,
    pub voluntary_switches: u64,
    pub idle_selections: u64,
    pub spurious_interrupts: u64,
    pub deferred_interrupts: u64,
    pub ipis_handled: u64,
}

impl StatsSnapshot {
    /// Switches of either kind
    pub fn context_switches(&self) -> u64 {
        self.preemptions + self.voluntary_switches
    }
}

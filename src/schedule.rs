//! System scheduler: registration, tick-rate gating, conflict-free batch
//! dispatch, and per-system statistics.

use std::any::TypeId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::batch::build_batches;
use crate::error::{EcsError, Result};
use crate::system::{BoxedSystem, System, SystemAccess, SystemId, TickRate};
use crate::world::World;

/// Smoothing factor for the per-system update-time EMA.
const EMA_ALPHA: f32 = 0.1;

/// Default threshold above which a system's EMA update time logs a warning.
const DEFAULT_WARN_THRESHOLD_MS: f32 = 3.0;

/// Per-system execution statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStats {
    pub update_count: u64,
    pub last_ms: f32,
    pub peak_ms: f32,
    pub ema_ms: f32,
}

impl SystemStats {
    fn record(&mut self, ms: f32) {
        self.last_ms = ms;
        self.peak_ms = self.peak_ms.max(ms);
        self.ema_ms = if self.update_count == 0 {
            ms
        } else {
            EMA_ALPHA * ms + (1.0 - EMA_ALPHA) * self.ema_ms
        };
        self.update_count += 1;
    }
}

struct SystemEntry {
    system: BoxedSystem,
    id: SystemId,
    type_id: TypeId,
    name: &'static str,
    access: SystemAccess,
    rate: TickRate,
    enabled: bool,
    /// Gating accumulator for rated systems.
    accumulator: Duration,
    /// Wall time accumulated since this system last ran; handed to
    /// `update` as its delta.
    since_last_run: Duration,
    stats: SystemStats,
}

/// Partitions registered systems into conflict-free batches and runs them.
///
/// Batches execute sequentially; systems within a batch execute in parallel
/// on the rayon pool. `Manual`-rated systems are excluded from batches and
/// run only through [`SystemScheduler`] manual invocation (via the world).
pub struct SystemScheduler {
    entries: Vec<SystemEntry>,
    /// Entry indices, grouped into conflict-free batches.
    batches: Vec<Vec<usize>>,
    next_id: u32,
    warn_threshold_ms: f32,
    /// Scratch for the systems due in the current batch; cleared per batch.
    due_scratch: Vec<(usize, Duration)>,
}

impl SystemScheduler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            batches: Vec::new(),
            next_id: 0,
            warn_threshold_ms: DEFAULT_WARN_THRESHOLD_MS,
            due_scratch: Vec::new(),
        }
    }

    /// EMA threshold (milliseconds) above which a warning is logged.
    pub fn set_warn_threshold_ms(&mut self, threshold: f32) {
        self.warn_threshold_ms = threshold;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn contains_type(&self, type_id: TypeId) -> bool {
        self.entries.iter().any(|e| e.type_id == type_id)
    }

    pub(crate) fn insert(&mut self, system: BoxedSystem) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;

        let access = system.access();
        let rate = system.rate();
        let name = system.name();
        let type_id = system.as_any().type_id();

        self.entries.push(SystemEntry {
            system,
            id,
            type_id,
            name,
            access,
            rate,
            enabled: true,
            accumulator: Duration::ZERO,
            since_last_run: Duration::ZERO,
            stats: SystemStats::default(),
        });
        self.recompute_batches();
        id
    }

    pub(crate) fn remove_type(&mut self, type_id: TypeId) -> Option<BoxedSystem> {
        let idx = self.entries.iter().position(|e| e.type_id == type_id)?;
        let entry = self.entries.remove(idx);
        self.recompute_batches();
        Some(entry.system)
    }

    /// Recomputed whenever the system set changes. Disabled systems keep
    /// their batch membership; they just skip execution.
    fn recompute_batches(&mut self) {
        let batchable: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.rate != TickRate::Manual)
            .map(|(i, _)| i)
            .collect();
        let accesses: Vec<SystemAccess> = batchable
            .iter()
            .map(|&i| self.entries[i].access.clone())
            .collect();

        self.batches = build_batches(&accesses)
            .into_iter()
            .map(|batch| batch.into_iter().map(|pos| batchable[pos]).collect())
            .collect();

        debug!(
            systems = self.entries.len(),
            batches = self.batches.len(),
            "recomputed system batches"
        );
    }

    /// Flip the enabled flag for the system of type `T`.
    pub fn set_enabled<T: System>(&mut self, enabled: bool) -> bool {
        let type_id = TypeId::of::<T>();
        match self.entries.iter_mut().find(|e| e.type_id == type_id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable<T: System>(&mut self) -> bool {
        self.set_enabled::<T>(true)
    }

    pub fn disable<T: System>(&mut self) -> bool {
        self.set_enabled::<T>(false)
    }

    pub fn is_enabled<T: System>(&self) -> Option<bool> {
        let type_id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|e| e.type_id == type_id)
            .map(|e| e.enabled)
    }

    pub fn get_system<T: System>(&self) -> Option<&T> {
        let type_id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|e| e.type_id == type_id)
            .and_then(|e| e.system.as_any().downcast_ref::<T>())
    }

    pub fn get_system_mut<T: System>(&mut self) -> Option<&mut T> {
        let type_id = TypeId::of::<T>();
        self.entries
            .iter_mut()
            .find(|e| e.type_id == type_id)
            .and_then(|e| e.system.as_any_mut().downcast_mut::<T>())
    }

    pub fn system_id<T: System>(&self) -> Option<SystemId> {
        let type_id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|e| e.type_id == type_id)
            .map(|e| e.id)
    }

    pub fn stats<T: System>(&self) -> Option<&SystemStats> {
        let type_id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|e| e.type_id == type_id)
            .map(|e| &e.stats)
    }

    pub fn stats_by_name(&self, name: &str) -> Option<&SystemStats> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.stats)
    }

    /// System names per batch, in execution order. Inspection surface for
    /// tools and tests.
    pub fn batch_names(&self) -> Vec<Vec<&'static str>> {
        self.batches
            .iter()
            .map(|batch| batch.iter().map(|&i| self.entries[i].name).collect())
            .collect()
    }

    /// One scheduler pass: accumulate `delta` into every gate, then run the
    /// due systems batch by batch.
    pub(crate) fn run(&mut self, world: &mut World, delta: Duration) {
        for entry in &mut self.entries {
            entry.since_last_run += delta;
            entry.accumulator += delta;
        }

        for batch_idx in 0..self.batches.len() {
            let mut due = std::mem::take(&mut self.due_scratch);
            due.clear();

            for pos in 0..self.batches[batch_idx].len() {
                let entry_idx = self.batches[batch_idx][pos];
                let entry = &mut self.entries[entry_idx];
                if !entry.enabled {
                    continue;
                }
                let interval = match entry.rate.interval() {
                    Some(i) => i,
                    None => continue,
                };
                let run = interval.is_zero() || entry.accumulator >= interval;
                if run {
                    due.push((entry_idx, entry.since_last_run));
                    entry.since_last_run = Duration::ZERO;
                    // Consume one interval, keeping the overshoot;
                    // EveryFrame consumes everything
                    entry.accumulator = if interval.is_zero() {
                        Duration::ZERO
                    } else {
                        entry.accumulator.saturating_sub(interval)
                    };
                }
            }

            self.execute_batch(world, &due);

            self.due_scratch = due;
        }
    }

    fn execute_batch(&mut self, world: &mut World, due: &[(usize, Duration)]) {
        if due.is_empty() {
            return;
        }

        #[cfg(feature = "parallel")]
        {
            if due.len() > 1 {
                // Convert pointers to usize for Send + Sync across the pool.
                //
                // SAFETY: this parallel region is sound because
                // 1. every index in `due` is unique, so each task gets
                //    exclusive access to its own SystemEntry;
                // 2. systems sharing a batch have non-conflicting component
                //    access, verified at batch-construction time, so their
                //    world mutations touch disjoint columns;
                // 3. structural changes go through the world's MPSC queues,
                //    which accept pushes from any thread;
                // 4. the raw pointers never outlive this function and the
                //    join below completes before `world` is used again.
                let entries_ptr = self.entries.as_mut_ptr() as usize;
                let world_ptr = world as *mut World as usize;
                let threshold = self.warn_threshold_ms;

                due.par_iter().for_each(|&(idx, elapsed)| {
                    let entry = unsafe { &mut *(entries_ptr as *mut SystemEntry).add(idx) };
                    let world = unsafe { &mut *(world_ptr as *mut World) };
                    run_entry(entry, world, elapsed, threshold);
                });
                return;
            }
        }

        let threshold = self.warn_threshold_ms;
        for &(idx, elapsed) in due {
            run_entry(&mut self.entries[idx], world, elapsed, threshold);
        }
    }

    /// Run a `Manual` (or any) system outside the batch schedule.
    pub(crate) fn run_manual_by_type(
        &mut self,
        type_id: TypeId,
        world: &mut World,
        delta: Duration,
    ) -> Result<()> {
        let threshold = self.warn_threshold_ms;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.type_id == type_id)
            .ok_or(EcsError::SystemNotFound)?;

        entry.since_last_run += delta;
        let elapsed = entry.since_last_run;
        entry.since_last_run = Duration::ZERO;
        entry.accumulator = Duration::ZERO;
        run_entry_checked(entry, world, elapsed, threshold)
    }
}

fn run_entry(entry: &mut SystemEntry, world: &mut World, elapsed: Duration, threshold_ms: f32) {
    let _ = run_entry_checked(entry, world, elapsed, threshold_ms);
}

fn run_entry_checked(
    entry: &mut SystemEntry,
    world: &mut World,
    elapsed: Duration,
    threshold_ms: f32,
) -> Result<()> {
    let start = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| entry.system.update(world, elapsed)));
    let ms = start.elapsed().as_secs_f32() * 1000.0;

    let prev_ema = entry.stats.ema_ms;
    entry.stats.record(ms);
    if entry.stats.update_count > 1
        && prev_ema <= threshold_ms
        && entry.stats.ema_ms > threshold_ms
    {
        warn!(
            system = entry.name,
            ema_ms = entry.stats.ema_ms,
            "system update time crossed threshold"
        );
    }

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(system = entry.name, error = %err, "system update failed");
            Err(EcsError::SystemUpdateFailure {
                system: entry.name,
                message: err.to_string(),
            })
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(system = entry.name, message, "system update panicked");
            Err(EcsError::SystemUpdateFailure {
                system: entry.name,
                message: message.to_string(),
            })
        }
    }
}

impl Default for SystemScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(&s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

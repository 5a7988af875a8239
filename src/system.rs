//! System trait, access metadata, and tick rates.

use std::any::Any;
use std::time::Duration;

use smallvec::SmallVec;

use crate::error::Result;
use crate::registry::ComponentId;
use crate::settings::{SaveContext, SettingsDescriptor};
use crate::world::World;

/// System ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u32);

/// Minimum interval at which a system is eligible to run.
///
/// `Manual` systems never join scheduler batches; they run only when
/// explicitly invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRate {
    Manual,
    EveryFrame,
    Ms10,
    Ms16,
    Ms33,
    Ms100,
    Ms250,
    Ms500,
    S1,
    S2,
    S5,
    S10,
}

impl TickRate {
    /// The gating interval; `None` for `Manual`, zero for `EveryFrame`.
    pub fn interval(self) -> Option<Duration> {
        match self {
            TickRate::Manual => None,
            TickRate::EveryFrame => Some(Duration::ZERO),
            TickRate::Ms10 => Some(Duration::from_millis(10)),
            TickRate::Ms16 => Some(Duration::from_millis(16)),
            TickRate::Ms33 => Some(Duration::from_millis(33)),
            TickRate::Ms100 => Some(Duration::from_millis(100)),
            TickRate::Ms250 => Some(Duration::from_millis(250)),
            TickRate::Ms500 => Some(Duration::from_millis(500)),
            TickRate::S1 => Some(Duration::from_secs(1)),
            TickRate::S2 => Some(Duration::from_secs(2)),
            TickRate::S5 => Some(Duration::from_secs(5)),
            TickRate::S10 => Some(Duration::from_secs(10)),
        }
    }
}

/// System access metadata: the component ids a system reads and writes.
/// Mutation-of-read is modeled only via the explicit write set.
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    pub reads: SmallVec<[ComponentId; 8]>,
    pub writes: SmallVec<[ComponentId; 8]>,
}

impl SystemAccess {
    /// Create empty access
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn read(mut self, id: ComponentId) -> Self {
        self.reads.push(id);
        self
    }

    pub fn write(mut self, id: ComponentId) -> Self {
        self.writes.push(id);
        self
    }

    /// Check if conflicts with another access: write/write, write/read, or
    /// read/write on any shared component id.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        for w in &self.writes {
            if other.writes.contains(w) || other.reads.contains(w) {
                return true;
            }
        }
        for r in &self.reads {
            if other.writes.contains(r) {
                return true;
            }
        }
        false
    }
}

/// System trait
///
/// Systems within a batch run in parallel; the scheduler guarantees their
/// declared accesses do not conflict, so `update` must confine component
/// writes to the declared write set and route structural changes through
/// the world's deferred queues.
pub trait System: Send + Sync + 'static {
    /// Get system name
    fn name(&self) -> &'static str;

    /// Get system access metadata
    fn access(&self) -> SystemAccess;

    /// Minimum interval between updates
    fn rate(&self) -> TickRate {
        TickRate::EveryFrame
    }

    /// Called once when the system is registered
    fn on_initialize(&mut self, _world: &mut World) {}

    /// Run one update. `delta` is the time since this system last ran.
    fn update(&mut self, world: &mut World, delta: Duration) -> Result<()>;

    /// Called when the system is unregistered
    fn on_shutdown(&mut self, _world: &mut World) {}

    /// Flat key -> typed value descriptor consumed by external tooling.
    /// The core neither interprets nor persists it.
    fn settings(&self) -> Option<SettingsDescriptor> {
        None
    }

    /// Save/load context consumed by external persistence collaborators.
    fn save_context(&self) -> Option<SaveContext> {
        None
    }
}

/// Object-safe downcasting surface over [`System`], so the scheduler can
/// hand back concrete system references.
pub trait AnySystem: System {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: System> AnySystem for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Boxed system
pub type BoxedSystem = Box<dyn AnySystem>;

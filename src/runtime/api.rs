//! Serializable views of runtime state for host overlays and debug tooling.

use serde::{Deserialize, Serialize};

use crate::core::{ConcurrencyGate, UnitHandle, UnitId, UnitState};

/// Status of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitStatus {
    /// Unit identifier.
    pub unit_id: UnitId,
    /// Current state.
    pub state: UnitState,
    /// Progress in `[0, 1]`.
    pub progress: f32,
    /// Abort reason, if aborted.
    pub reason: Option<String>,
}

impl From<&UnitHandle> for UnitStatus {
    fn from(handle: &UnitHandle) -> Self {
        Self {
            unit_id: handle.id(),
            state: handle.state(),
            progress: handle.progress(),
            reason: handle.error().map(|e| e.to_string()),
        }
    }
}

/// Gate occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// Gate name.
    pub name: String,
    /// Maximum concurrent operations.
    pub max: u32,
    /// Slots currently held.
    pub active: u32,
}

impl From<&ConcurrencyGate> for GateSnapshot {
    fn from(gate: &ConcurrencyGate) -> Self {
        Self {
            name: gate.name().to_string(),
            max: gate.max(),
            active: gate.active(),
        }
    }
}

/// Point-in-time counters for the whole runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    /// Frames ticked so far.
    pub frame: u64,
    /// Sum of sanitized frame deltas, in seconds.
    pub elapsed_secs: f64,
    /// Live top-level units.
    pub units: usize,
    /// Registered timers.
    pub timers: usize,
    /// Live dependency groups.
    pub groups: usize,
    /// Gates sorted by name.
    pub gates: Vec<GateSnapshot>,
}

//! The provider abstraction: anything that can produce position,
//! heading, velocity, or satellite visibility updates, together with the
//! per-kind activation state machine shared by all implementations.

use std::{collections::BTreeMap, fmt, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    criteria::Criteria,
    observable::Signal,
    position::Position,
    space_vehicle::{SpaceVehicle, SpaceVehicleKey},
    units::{Degrees, Heading, Meters, MetersPerSecond, Velocity},
    update::Update,
};

bitflags::bitflags! {
    /// What a provider can deliver.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Features: u32 {
        const POSITION = 1 << 0;
        const HEADING = 1 << 1;
        const VELOCITY = 1 << 2;
    }
}

bitflags::bitflags! {
    /// What a provider consumes while running. The engine gates
    /// providers on these against the global configuration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Requirements: u32 {
        const SATELLITES = 1 << 0;
        const CELL_NETWORK = 1 << 1;
        const DATA_NETWORK = 1 << 2;
        const MONETARY_SPENT = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    Position,
    Heading,
    Velocity,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 3] = [UpdateKind::Position, UpdateKind::Heading, UpdateKind::Velocity];

    pub fn feature(&self) -> Features {
        match self {
            UpdateKind::Position => Features::POSITION,
            UpdateKind::Heading => Features::HEADING,
            UpdateKind::Velocity => Features::VELOCITY,
        }
    }

    fn index(&self) -> usize {
        match self {
            UpdateKind::Position => 0,
            UpdateKind::Heading => 1,
            UpdateKind::Velocity => 2,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Position => write!(f, "position"),
            UpdateKind::Heading => write!(f, "heading"),
            UpdateKind::Velocity => write!(f, "velocity"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatelliteBasedPositioningState {
    #[default]
    On,
    Off,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiAndCellIdReportingState {
    On,
    #[default]
    Off,
}

/// The accuracy a provider promises per kind. Used by the selection
/// policy; a missing entry never satisfies a finite bound.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeclaredAccuracy {
    pub horizontal: Option<Meters>,
    pub vertical: Option<Meters>,
    pub velocity: Option<MetersPerSecond>,
    pub heading: Option<Degrees>,
}

impl DeclaredAccuracy {
    pub fn meets(&self, bounds: &crate::criteria::AccuracyBounds) -> bool {
        fn within<U: PartialOrd>(declared: Option<U>, bound: Option<U>) -> bool {
            match bound {
                None => true,
                Some(bound) => matches!(declared, Some(declared) if declared <= bound),
            }
        }

        within(self.horizontal, bounds.horizontal)
            && within(self.vertical, bounds.vertical)
            && within(self.velocity, bounds.velocity)
            && within(self.heading, bounds.heading)
    }
}

pub type SpaceVehicleMap = BTreeMap<SpaceVehicleKey, SpaceVehicle>;

/// The four long-lived update streams every provider carries.
pub struct ProviderUpdates {
    pub position: Signal<Update<Position>>,
    pub heading: Signal<Update<Heading>>,
    pub velocity: Signal<Update<Velocity>>,
    pub svs: Signal<Update<SpaceVehicleMap>>,
}

impl ProviderUpdates {
    pub fn new() -> Self {
        Self {
            position: Signal::new(),
            heading: Signal::new(),
            velocity: Signal::new(),
            svs: Signal::new(),
        }
    }
}

impl Default for ProviderUpdates {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TrackerState {
    counts: [u32; 3],
    suspended: bool,
}

/// Reference-counted activation per update kind, plus the engine's
/// permission veto. Counts survive a suspension, so sessions keep their
/// references while the driver is parked.
pub struct ActivationTracker {
    state: Mutex<TrackerState>,
}

impl ActivationTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Returns true when the underlying driver has to be engaged for
    /// this kind (first reference while not suspended).
    pub fn start(&self, kind: UpdateKind) -> bool {
        let mut state = self.state.lock().unwrap();
        let count = &mut state.counts[kind.index()];
        *count += 1;
        *count == 1 && !state.suspended
    }

    /// Returns true when the last reference went away and the driver has
    /// to be disengaged. Extra stops are floored at zero.
    pub fn stop(&self, kind: UpdateKind) -> bool {
        let mut state = self.state.lock().unwrap();
        let count = &mut state.counts[kind.index()];
        if *count == 0 {
            return false;
        }
        *count -= 1;
        *count == 0 && !state.suspended
    }

    /// Park the driver without touching reference counts. Returns the
    /// kinds that were running and have to be disengaged.
    pub fn suspend(&self) -> Vec<UpdateKind> {
        let mut state = self.state.lock().unwrap();
        if state.suspended {
            return Vec::new();
        }
        state.suspended = true;
        UpdateKind::ALL
            .into_iter()
            .filter(|kind| state.counts[kind.index()] > 0)
            .collect()
    }

    /// Undo a suspension. Returns the kinds that have references and
    /// have to be re-engaged.
    pub fn resume(&self) -> Vec<UpdateKind> {
        let mut state = self.state.lock().unwrap();
        if !state.suspended {
            return Vec::new();
        }
        state.suspended = false;
        UpdateKind::ALL
            .into_iter()
            .filter(|kind| state.counts[kind.index()] > 0)
            .collect()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().unwrap().suspended
    }

    pub fn active_kinds(&self) -> Vec<UpdateKind> {
        let state = self.state.lock().unwrap();
        if state.suspended {
            return Vec::new();
        }
        UpdateKind::ALL
            .into_iter()
            .filter(|kind| state.counts[kind.index()] > 0)
            .collect()
    }

    /// Destructor path: zero every count and report which kinds were
    /// still running, each exactly once.
    pub fn drain(&self) -> Vec<UpdateKind> {
        let mut state = self.state.lock().unwrap();
        let active: Vec<UpdateKind> = UpdateKind::ALL
            .into_iter()
            .filter(|kind| state.counts[kind.index()] > 0 && !state.suspended)
            .collect();
        state.counts = [0; 3];
        active
    }
}

impl Default for ActivationTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A producer of location updates. Implementations wrap a chipset, a
/// remote service, or a canned data source; the engine only sees this
/// surface.
pub trait Provider: Send + Sync {
    fn features(&self) -> Features;
    fn requirements(&self) -> Requirements;

    fn declared_accuracy(&self) -> DeclaredAccuracy {
        DeclaredAccuracy::default()
    }

    fn satisfies(&self, criteria: &Criteria) -> bool {
        self.features().contains(criteria.required_features())
            && self.declared_accuracy().meets(&criteria.accuracy)
    }

    fn updates(&self) -> &ProviderUpdates;

    /// A fused hint from the engine. Providers are free to ignore it.
    fn on_reference_location_updated(&self, _position: &Position) {}
    fn on_reference_velocity_updated(&self, _velocity: &Velocity) {}
    fn on_reference_heading_updated(&self, _heading: &Heading) {}

    fn on_wifi_and_cell_reporting_state_changed(&self, _state: WifiAndCellIdReportingState) {}

    /// Start/stop are reference counted per kind and infallible from the
    /// caller's point of view; driver trouble is logged and retried on
    /// the next transition.
    fn start_position_updates(&self);
    fn stop_position_updates(&self);
    fn start_heading_updates(&self);
    fn stop_heading_updates(&self);
    fn start_velocity_updates(&self);
    fn stop_velocity_updates(&self);

    fn start_updates(&self, kind: UpdateKind) {
        match kind {
            UpdateKind::Position => self.start_position_updates(),
            UpdateKind::Heading => self.start_heading_updates(),
            UpdateKind::Velocity => self.start_velocity_updates(),
        }
    }

    fn stop_updates(&self, kind: UpdateKind) {
        match kind {
            UpdateKind::Position => self.stop_position_updates(),
            UpdateKind::Heading => self.stop_heading_updates(),
            UpdateKind::Velocity => self.stop_velocity_updates(),
        }
    }

    /// The kinds currently engaged at the driver.
    fn activity(&self) -> Vec<UpdateKind>;

    /// Engine-side permission veto. Reference counts held by sessions
    /// are preserved across a suspend/resume pair.
    fn suspend(&self);
    fn resume(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_starts_and_stops_end_inactive() {
        let tracker = ActivationTracker::new();

        assert!(tracker.start(UpdateKind::Position));
        assert!(!tracker.start(UpdateKind::Position));
        assert!(!tracker.start(UpdateKind::Position));

        assert!(!tracker.stop(UpdateKind::Position));
        assert!(!tracker.stop(UpdateKind::Position));
        assert!(tracker.stop(UpdateKind::Position));

        assert!(tracker.active_kinds().is_empty());
    }

    #[test]
    fn extra_stops_are_floored() {
        let tracker = ActivationTracker::new();
        assert!(!tracker.stop(UpdateKind::Heading));
        assert!(tracker.start(UpdateKind::Heading));
        assert!(tracker.stop(UpdateKind::Heading));
        assert!(!tracker.stop(UpdateKind::Heading));
    }

    #[test]
    fn kinds_are_counted_independently() {
        let tracker = ActivationTracker::new();
        assert!(tracker.start(UpdateKind::Position));
        assert!(tracker.start(UpdateKind::Velocity));
        assert!(tracker.stop(UpdateKind::Velocity));
        assert_eq!(tracker.active_kinds(), vec![UpdateKind::Position]);
    }

    #[test]
    fn suspension_preserves_reference_counts() {
        let tracker = ActivationTracker::new();
        tracker.start(UpdateKind::Position);
        tracker.start(UpdateKind::Position);

        assert_eq!(tracker.suspend(), vec![UpdateKind::Position]);
        assert!(tracker.suspend().is_empty());

        // Transitions while parked stay silent towards the driver.
        assert!(!tracker.stop(UpdateKind::Position));
        assert!(!tracker.start(UpdateKind::Velocity));

        let resumed = tracker.resume();
        assert!(resumed.contains(&UpdateKind::Position));
        assert!(resumed.contains(&UpdateKind::Velocity));
    }

    #[test]
    fn drain_reports_each_running_kind_once() {
        let tracker = ActivationTracker::new();
        tracker.start(UpdateKind::Position);
        tracker.start(UpdateKind::Position);
        tracker.start(UpdateKind::Heading);

        let drained = tracker.drain();
        assert_eq!(drained.len(), 2);
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn declared_accuracy_respects_bounds() {
        let declared = DeclaredAccuracy {
            horizontal: Some(Meters(10.0)),
            ..Default::default()
        };

        let mut criteria = Criteria::default();
        assert!(declared.meets(&criteria.accuracy));

        criteria.accuracy.horizontal = Some(Meters(5.0));
        assert!(!declared.meets(&criteria.accuracy));

        // A bound on an undeclared kind can never be met.
        criteria.accuracy.horizontal = None;
        criteria.accuracy.heading = Some(Degrees(1.0));
        assert!(!declared.meets(&criteria.accuracy));
    }
}

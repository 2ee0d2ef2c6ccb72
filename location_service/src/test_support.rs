//! Shared fakes for the unit tests in this crate.

use std::sync::{Arc, Mutex};

use location_lib::{
    position::Position,
    provider::{
        ActivationTracker, DeclaredAccuracy, Features, Provider, ProviderUpdates, Requirements,
        SpaceVehicleMap, UpdateKind,
    },
    units::{Heading, Meters, Velocity},
    update::Update,
    Error,
};

use crate::harvester::Reporter;

/// A scriptable provider that records its driver transitions.
pub struct TestProvider {
    features: Features,
    requirements: Requirements,
    declared: DeclaredAccuracy,
    updates: ProviderUpdates,
    tracker: ActivationTracker,
    events: Arc<Mutex<Vec<String>>>,
}

impl TestProvider {
    pub fn new(features: Features, requirements: Requirements) -> Self {
        Self {
            features,
            requirements,
            declared: DeclaredAccuracy {
                horizontal: Some(Meters(50.0)),
                ..Default::default()
            },
            updates: ProviderUpdates::new(),
            tracker: ActivationTracker::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Position-only provider with no requirements.
    pub fn positioning() -> Self {
        Self::new(Features::POSITION, Requirements::empty())
    }

    pub fn full() -> Self {
        Self::new(
            Features::POSITION | Features::HEADING | Features::VELOCITY,
            Requirements::empty(),
        )
    }

    pub fn with_declared_accuracy(mut self, declared: DeclaredAccuracy) -> Self {
        self.declared = declared;
        self
    }

    pub fn emit_position(&self, update: Update<Position>) {
        self.updates.position.emit(&update);
    }

    pub fn emit_heading(&self, update: Update<Heading>) {
        self.updates.heading.emit(&update);
    }

    pub fn emit_velocity(&self, update: Update<Velocity>) {
        self.updates.velocity.emit(&update);
    }

    pub fn emit_space_vehicles(&self, update: Update<SpaceVehicleMap>) {
        self.updates.svs.emit(&update);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn last_event(&self) -> Option<String> {
        self.events.lock().unwrap().last().cloned()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Provider for TestProvider {
    fn features(&self) -> Features {
        self.features
    }

    fn requirements(&self) -> Requirements {
        self.requirements
    }

    fn declared_accuracy(&self) -> DeclaredAccuracy {
        self.declared
    }

    fn updates(&self) -> &ProviderUpdates {
        &self.updates
    }

    fn on_reference_location_updated(&self, position: &Position) {
        self.record(format!(
            "reference {} {}",
            position.latitude().0,
            position.longitude().0
        ));
    }

    fn start_position_updates(&self) {
        if self.tracker.start(UpdateKind::Position) {
            self.record("engage position".into());
        }
    }

    fn stop_position_updates(&self) {
        if self.tracker.stop(UpdateKind::Position) {
            self.record("disengage position".into());
        }
    }

    fn start_heading_updates(&self) {
        if self.tracker.start(UpdateKind::Heading) {
            self.record("engage heading".into());
        }
    }

    fn stop_heading_updates(&self) {
        if self.tracker.stop(UpdateKind::Heading) {
            self.record("disengage heading".into());
        }
    }

    fn start_velocity_updates(&self) {
        if self.tracker.start(UpdateKind::Velocity) {
            self.record("engage velocity".into());
        }
    }

    fn stop_velocity_updates(&self) {
        if self.tracker.stop(UpdateKind::Velocity) {
            self.record("disengage velocity".into());
        }
    }

    fn activity(&self) -> Vec<UpdateKind> {
        self.tracker.active_kinds()
    }

    fn suspend(&self) {
        for kind in self.tracker.suspend() {
            self.record(format!("park {kind}"));
        }
    }

    fn resume(&self) {
        for kind in self.tracker.resume() {
            self.record(format!("unpark {kind}"));
        }
    }
}

/// Records reported batches; optionally fails every submission.
pub struct RecordingReporter {
    reports: Mutex<Vec<(Update<Position>, usize, usize)>>,
    failure: Mutex<Option<fn() -> Error>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn failing_with(failure: fn() -> Error) -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(failure)),
        }
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl Reporter for RecordingReporter {
    fn report(
        &self,
        update: &Update<Position>,
        wifis: &[location_lib::connectivity::WirelessNetwork],
        cells: &[location_lib::connectivity::RadioCell],
    ) -> Result<(), Error> {
        self.reports
            .lock()
            .unwrap()
            .push((update.clone(), wifis.len(), cells.len()));
        match *self.failure.lock().unwrap() {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

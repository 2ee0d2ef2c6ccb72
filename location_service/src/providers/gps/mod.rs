//! The chipset-backed provider and its hardware abstraction layer.

pub mod config;
pub mod hal;

use std::sync::Arc;

use location_lib::{
    observable::Subscription,
    position::Position,
    provider::{
        ActivationTracker, DeclaredAccuracy, Features, Provider, ProviderUpdates, Requirements,
        UpdateKind,
    },
    units::{Degrees, Meters, MetersPerSecond},
    update::Update,
};
use tracing::warn;

pub use config::GpsConfig;
pub use hal::{AndroidHardwareAbstractionLayer, HardwareAbstractionLayer};

pub struct GpsProvider {
    hal: Arc<dyn HardwareAbstractionLayer>,
    updates: ProviderUpdates,
    tracker: ActivationTracker,
    _subscriptions: Vec<Subscription>,
}

impl GpsProvider {
    pub fn new(hal: Arc<dyn HardwareAbstractionLayer>) -> Self {
        let updates = ProviderUpdates::new();

        // Chipset streams carry bare values; the provider stamps them
        // with the arrival time.
        let subscriptions = vec![
            {
                let sink = updates.position.clone();
                hal.position_updates()
                    .connect(move |position| sink.emit(&Update::now(*position)))
            },
            {
                let sink = updates.heading.clone();
                hal.heading_updates()
                    .connect(move |heading| sink.emit(&Update::now(*heading)))
            },
            {
                let sink = updates.velocity.clone();
                hal.velocity_updates()
                    .connect(move |velocity| sink.emit(&Update::now(*velocity)))
            },
            {
                let sink = updates.svs.clone();
                hal.space_vehicle_updates()
                    .connect(move |svs| sink.emit(&Update::now(svs.clone())))
            },
        ];

        Self {
            hal,
            updates,
            tracker: ActivationTracker::new(),
            _subscriptions: subscriptions,
        }
    }

    fn engage(&self) {
        if let Err(err) = self.hal.start_positioning() {
            warn!("could not start positioning, retrying on the next transition: {err}");
        }
    }

    fn disengage(&self) {
        if let Err(err) = self.hal.stop_positioning() {
            warn!("could not stop positioning, retrying on the next transition: {err}");
        }
    }
}

impl Provider for GpsProvider {
    fn features(&self) -> Features {
        Features::POSITION | Features::HEADING | Features::VELOCITY
    }

    fn requirements(&self) -> Requirements {
        Requirements::SATELLITES
    }

    fn declared_accuracy(&self) -> DeclaredAccuracy {
        // What a consumer-grade receiver delivers under open sky.
        DeclaredAccuracy {
            horizontal: Some(Meters(10.0)),
            vertical: Some(Meters(20.0)),
            velocity: Some(MetersPerSecond(1.0)),
            heading: Some(Degrees(2.0)),
        }
    }

    fn updates(&self) -> &ProviderUpdates {
        &self.updates
    }

    fn on_reference_location_updated(&self, position: &Position) {
        if let Err(err) = self.hal.inject_reference_position(position) {
            warn!("could not inject reference position: {err}");
        }
    }

    fn start_position_updates(&self) {
        if self.tracker.start(UpdateKind::Position) {
            self.engage();
        }
    }

    fn stop_position_updates(&self) {
        if self.tracker.stop(UpdateKind::Position) {
            self.disengage();
        }
    }

    fn start_heading_updates(&self) {
        if self.tracker.start(UpdateKind::Heading) {
            self.engage();
        }
    }

    fn stop_heading_updates(&self) {
        if self.tracker.stop(UpdateKind::Heading) {
            self.disengage();
        }
    }

    fn start_velocity_updates(&self) {
        if self.tracker.start(UpdateKind::Velocity) {
            self.engage();
        }
    }

    fn stop_velocity_updates(&self) {
        if self.tracker.stop(UpdateKind::Velocity) {
            self.disengage();
        }
    }

    fn activity(&self) -> Vec<UpdateKind> {
        self.tracker.active_kinds()
    }

    fn suspend(&self) {
        for _kind in self.tracker.suspend() {
            self.disengage();
        }
    }

    fn resume(&self) {
        for _kind in self.tracker.resume() {
            self.engage();
        }
    }
}

impl Drop for GpsProvider {
    fn drop(&mut self) {
        for _kind in self.tracker.drain() {
            self.disengage();
        }
    }
}

//! The engine owns every provider, fuses their streams, and arbitrates
//! which providers may run under the current global configuration.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use location_lib::{
    connectivity::ConnectivityMonitor,
    criteria::Criteria,
    observable::{Property, Signal, Subscription},
    position::Position,
    provider::{
        Provider, Requirements, SatelliteBasedPositioningState, SpaceVehicleMap, UpdateKind,
        WifiAndCellIdReportingState,
    },
    units::{Heading, Velocity},
    update::Update,
};
use tracing::{debug, warn};

use crate::{
    proxy_provider::{ProviderSelection, ProxyProvider},
    session::Session,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineStatus {
    Off,
    #[default]
    On,
    /// At least one session is consuming updates.
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProviderHandle(u64);

/// The engine-wide fused streams.
pub struct EngineUpdates {
    pub position: Signal<Update<Position>>,
    pub heading: Signal<Update<Heading>>,
    pub velocity: Signal<Update<Velocity>>,
    pub last_known_location: Property<Option<Update<Position>>>,
    pub visible_space_vehicles: Property<SpaceVehicleMap>,
}

struct ProviderEntry {
    handle: ProviderHandle,
    provider: Arc<dyn Provider>,
    _subscriptions: Vec<Subscription>,
}

pub struct Engine {
    pub updates: EngineUpdates,
    engine_state: Property<EngineStatus>,
    satellite_based_positioning_state: Property<SatelliteBasedPositioningState>,
    wifi_and_cell_id_reporting_state: Property<WifiAndCellIdReportingState>,
    connectivity: Arc<ConnectivityMonitor>,
    providers: Mutex<Vec<ProviderEntry>>,
    next_handle: AtomicU64,
    active_session_kinds: AtomicU32,
    _subscriptions: Vec<Subscription>,
}

impl Engine {
    pub fn new(connectivity: Arc<ConnectivityMonitor>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Engine>| {
            let engine_state = Property::new(EngineStatus::default());
            let satellite_based_positioning_state =
                Property::new(SatelliteBasedPositioningState::default());
            let wifi_and_cell_id_reporting_state =
                Property::new(WifiAndCellIdReportingState::default());
            let updates = EngineUpdates {
                position: Signal::new(),
                heading: Signal::new(),
                velocity: Signal::new(),
                last_known_location: Property::new(None),
                visible_space_vehicles: Property::new(SpaceVehicleMap::new()),
            };

            let mut subscriptions = Vec::new();

            let engine = weak.clone();
            subscriptions.push(engine_state.connect(move |_| {
                if let Some(engine) = engine.upgrade() {
                    engine.apply_permission_policy();
                }
            }));

            let engine = weak.clone();
            subscriptions.push(satellite_based_positioning_state.connect(move |_| {
                if let Some(engine) = engine.upgrade() {
                    engine.apply_permission_policy();
                }
            }));

            let engine = weak.clone();
            subscriptions.push(wifi_and_cell_id_reporting_state.connect(move |state| {
                if let Some(engine) = engine.upgrade() {
                    for provider in engine.snapshot_providers() {
                        provider.on_wifi_and_cell_reporting_state_changed(*state);
                    }
                    engine.apply_permission_policy();
                }
            }));

            let engine = weak.clone();
            subscriptions.push(connectivity.state().connect(move |_| {
                if let Some(engine) = engine.upgrade() {
                    engine.apply_permission_policy();
                }
            }));

            // Fused fixes travel back to the providers as reference hints.
            let engine = weak.clone();
            subscriptions.push(updates.last_known_location.connect(
                move |update: &Option<Update<Position>>| {
                    if let (Some(engine), Some(update)) = (engine.upgrade(), update.as_ref()) {
                        for provider in engine.snapshot_providers() {
                            provider.on_reference_location_updated(&update.value);
                        }
                    }
                },
            ));

            Engine {
                updates,
                engine_state,
                satellite_based_positioning_state,
                wifi_and_cell_id_reporting_state,
                connectivity,
                providers: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(0),
                active_session_kinds: AtomicU32::new(0),
                _subscriptions: subscriptions,
            }
        })
    }

    pub fn engine_state(&self) -> &Property<EngineStatus> {
        &self.engine_state
    }

    pub fn satellite_based_positioning_state(&self) -> &Property<SatelliteBasedPositioningState> {
        &self.satellite_based_positioning_state
    }

    pub fn wifi_and_cell_id_reporting_state(&self) -> &Property<WifiAndCellIdReportingState> {
        &self.wifi_and_cell_id_reporting_state
    }

    /// Registers a provider for the lifetime of the engine and fans its
    /// streams into the fused ones.
    pub fn add_provider(self: &Arc<Self>, provider: Arc<dyn Provider>) -> ProviderHandle {
        let handle = ProviderHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let weak = Arc::downgrade(self);

        let subscriptions = vec![
            {
                let engine = weak.clone();
                provider.updates().position.connect(move |update| {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_position_update(update);
                    }
                })
            },
            {
                let engine = weak.clone();
                provider.updates().heading.connect(move |update| {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_heading_update(update);
                    }
                })
            },
            {
                let engine = weak.clone();
                provider.updates().velocity.connect(move |update| {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_velocity_update(update);
                    }
                })
            },
            {
                let engine = weak.clone();
                provider.updates().svs.connect(move |update| {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_space_vehicles_update(update);
                    }
                })
            },
        ];

        if self.engine_state.get() == EngineStatus::Off
            || !self.is_provider_permitted(provider.as_ref())
        {
            provider.suspend();
        }

        self.providers.lock().unwrap().push(ProviderEntry {
            handle,
            provider,
            _subscriptions: subscriptions,
        });
        handle
    }

    /// Detaches a provider. Updates already dispatched are not recalled.
    pub fn remove_provider(&self, handle: ProviderHandle) {
        self.providers
            .lock()
            .unwrap()
            .retain(|entry| entry.handle != handle);
    }

    /// Runs the selection policy: keep the providers that satisfy the
    /// criteria and are currently permitted, then per kind take the one
    /// with the tightest declared accuracy, preferring cheaper
    /// requirement sets and earlier registration on ties. Kinds nobody
    /// can serve stay empty; the session layer reports that on the
    /// first start.
    pub fn determine_provider_selection_for_criteria(
        &self,
        criteria: &Criteria,
    ) -> ProviderSelection {
        let providers = self.providers.lock().unwrap();
        let candidates: Vec<(usize, &ProviderEntry)> = providers
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.provider.satisfies(criteria)
                    && self.is_provider_permitted(entry.provider.as_ref())
            })
            .collect();

        let pick = |kind: UpdateKind| -> Option<Arc<dyn Provider>> {
            candidates
                .iter()
                .filter(|(_, entry)| entry.provider.features().contains(kind.feature()))
                .min_by(|(index_a, a), (index_b, b)| {
                    declared_accuracy_for(a.provider.as_ref(), kind)
                        .total_cmp(&declared_accuracy_for(b.provider.as_ref(), kind))
                        .then_with(|| {
                            a.provider
                                .requirements()
                                .bits()
                                .count_ones()
                                .cmp(&b.provider.requirements().bits().count_ones())
                        })
                        .then_with(|| index_a.cmp(index_b))
                })
                .map(|(_, entry)| entry.provider.clone())
        };

        ProviderSelection {
            position: pick(UpdateKind::Position),
            heading: pick(UpdateKind::Heading),
            velocity: pick(UpdateKind::Velocity),
        }
    }

    pub fn create_session_for_criteria(self: &Arc<Self>, criteria: &Criteria) -> Session {
        let selection = self.determine_provider_selection_for_criteria(criteria);
        Session::new(self.clone(), ProxyProvider::new(selection))
    }

    /// Bookkeeping for the on/active transition, driven by the sessions.
    pub(crate) fn notify_session_activity(&self, started: bool) {
        let active = if started {
            self.active_session_kinds.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            let previous = self
                .active_session_kinds
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    Some(count.saturating_sub(1))
                })
                .unwrap_or(0);
            previous.saturating_sub(1)
        };

        let desired = if active > 0 {
            EngineStatus::Active
        } else {
            EngineStatus::On
        };
        let result = self.engine_state.replace_if(|current| match current {
            EngineStatus::Off => None,
            current if *current == desired => None,
            _ => Some(desired),
        });
        if let Err(err) = result {
            warn!("could not update engine state: {err}");
        }
    }

    fn is_provider_permitted(&self, provider: &dyn Provider) -> bool {
        let requirements = provider.requirements();

        if requirements.contains(Requirements::SATELLITES)
            && self.satellite_based_positioning_state.get() == SatelliteBasedPositioningState::Off
        {
            return false;
        }
        if requirements.contains(Requirements::CELL_NETWORK)
            && self.wifi_and_cell_id_reporting_state.get() == WifiAndCellIdReportingState::Off
        {
            return false;
        }
        if requirements.contains(Requirements::DATA_NETWORK) && !self.connectivity.is_online() {
            return false;
        }

        true
    }

    // Re-evaluates the veto for every provider after a global toggle.
    fn apply_permission_policy(&self) {
        let engine_on = self.engine_state.get() != EngineStatus::Off;
        for provider in self.snapshot_providers() {
            if engine_on && self.is_provider_permitted(provider.as_ref()) {
                provider.resume();
            } else {
                provider.suspend();
            }
        }
    }

    // Providers are cloned out before any of their methods run, so no
    // engine lock is held across a driver call.
    fn snapshot_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.provider.clone())
            .collect()
    }

    fn on_position_update(&self, update: &Update<Position>) {
        if !update.value.is_valid() {
            debug!("dropping invalid position update");
            return;
        }

        self.updates.position.emit(update);

        let incoming = update.clone();
        let result = self
            .updates
            .last_known_location
            .replace_if(move |current| match current {
                Some(current) if !is_better_fix(&incoming, current) => None,
                _ => Some(Some(incoming)),
            });
        if let Err(err) = result {
            warn!("could not update last known location: {err}");
        }
    }

    fn on_heading_update(&self, update: &Update<Heading>) {
        if !update.value.is_finite() {
            debug!("dropping invalid heading update");
            return;
        }
        self.updates.heading.emit(update);
    }

    fn on_velocity_update(&self, update: &Update<Velocity>) {
        if !update.value.is_finite() {
            debug!("dropping invalid velocity update");
            return;
        }
        self.updates.velocity.emit(update);
    }

    fn on_space_vehicles_update(&self, update: &Update<SpaceVehicleMap>) {
        let incoming = update.value.clone();
        let result = self
            .updates
            .visible_space_vehicles
            .replace_if(move |current| {
                let mut merged = current.clone();
                merged.extend(incoming);
                Some(merged)
            });
        if let Err(err) = result {
            warn!("could not update visible space vehicles: {err}");
        }
    }
}

/// Strictly newer wins; at the same instant a tighter horizontal
/// accuracy wins. A fix without accuracy competes as infinitely coarse.
fn is_better_fix(incoming: &Update<Position>, current: &Update<Position>) -> bool {
    if incoming.when != current.when {
        return incoming.when > current.when;
    }
    horizontal_accuracy_or_inf(incoming) < horizontal_accuracy_or_inf(current)
}

fn horizontal_accuracy_or_inf(update: &Update<Position>) -> f64 {
    update
        .value
        .accuracy
        .horizontal
        .map(|accuracy| accuracy.0)
        .unwrap_or(f64::INFINITY)
}

fn declared_accuracy_for(provider: &dyn Provider, kind: UpdateKind) -> f64 {
    let declared = provider.declared_accuracy();
    match kind {
        UpdateKind::Position => declared.horizontal.map(|m| m.0),
        UpdateKind::Heading => declared.heading.map(|d| d.0),
        UpdateKind::Velocity => declared.velocity.map(|v| v.0),
    }
    .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use location_lib::{
        provider::{DeclaredAccuracy, Features},
        space_vehicle::{Constellation, SpaceVehicle, SpaceVehicleKey},
        units::{Degrees, Meters},
    };

    use super::*;
    use crate::test_support::TestProvider;

    fn fix(lat: f64, lon: f64, accuracy: Option<f64>, millis: i64) -> Update<Position> {
        let mut position = Position::new(Degrees(lat), Degrees(lon)).unwrap();
        if let Some(accuracy) = accuracy {
            position = position.with_horizontal_accuracy(Meters(accuracy)).unwrap();
        }
        Update::new(position, Utc.timestamp_millis_opt(millis).unwrap())
    }

    #[test]
    fn last_known_location_is_monotone() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let provider = Arc::new(TestProvider::positioning());
        engine.add_provider(provider.clone());

        provider.emit_position(fix(51.5, -0.1, Some(20.0), 100));
        assert_eq!(
            engine.updates.last_known_location.get().unwrap().when,
            Utc.timestamp_millis_opt(100).unwrap()
        );

        // Older fixes lose, whatever their accuracy.
        provider.emit_position(fix(51.6, -0.1, Some(1.0), 50));
        let last = engine.updates.last_known_location.get().unwrap();
        assert_eq!(last.when, Utc.timestamp_millis_opt(100).unwrap());
        assert_eq!(last.value.accuracy.horizontal, Some(Meters(20.0)));

        // Same instant, tighter accuracy wins.
        provider.emit_position(fix(51.7, -0.1, Some(10.0), 100));
        let last = engine.updates.last_known_location.get().unwrap();
        assert_eq!(last.value.accuracy.horizontal, Some(Meters(10.0)));

        // Same instant, missing accuracy is infinitely coarse.
        provider.emit_position(fix(51.8, -0.1, None, 100));
        let last = engine.updates.last_known_location.get().unwrap();
        assert_eq!(last.value.accuracy.horizontal, Some(Meters(10.0)));
    }

    #[test]
    fn malformed_provider_output_is_dropped() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let provider = Arc::new(TestProvider::positioning());
        engine.add_provider(provider.clone());

        // A position that never went through the validating constructor.
        let bogus: Position = serde_json::from_str(
            r#"{"latitude":999.0,"longitude":0.0,"altitude":null,"accuracy":{"horizontal":null,"vertical":null}}"#,
        )
        .unwrap();
        provider.emit_position(Update::new(bogus, Utc.timestamp_millis_opt(10).unwrap()));

        assert!(engine.updates.last_known_location.get().is_none());
    }

    #[test]
    fn non_finite_heading_and_velocity_are_dropped() {
        use location_lib::units::{Heading, Velocity};

        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let provider = Arc::new(TestProvider::full());
        engine.add_provider(provider.clone());

        let headings = Arc::new(Mutex::new(0));
        let sink = headings.clone();
        let _h = engine
            .updates
            .heading
            .connect(move |_: &Update<Heading>| *sink.lock().unwrap() += 1);
        let velocities = Arc::new(Mutex::new(0));
        let sink = velocities.clone();
        let _v = engine
            .updates
            .velocity
            .connect(move |_: &Update<Velocity>| *sink.lock().unwrap() += 1);

        provider.emit_heading(Update::now(Heading::from_degrees(f64::NAN)));
        provider.emit_velocity(Update::now(Velocity::from_meters_per_second(f64::INFINITY)));
        assert_eq!(*headings.lock().unwrap(), 0);
        assert_eq!(*velocities.lock().unwrap(), 0);

        provider.emit_heading(Update::now(Heading::from_degrees(90.0)));
        provider.emit_velocity(Update::now(Velocity::from_meters_per_second(1.0)));
        assert_eq!(*headings.lock().unwrap(), 1);
        assert_eq!(*velocities.lock().unwrap(), 1);
    }

    #[test]
    fn selection_prefers_tightest_accuracy() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));

        let coarse = Arc::new(TestProvider::positioning().with_declared_accuracy(
            DeclaredAccuracy {
                horizontal: Some(Meters(100.0)),
                ..Default::default()
            },
        ));
        let fine = Arc::new(TestProvider::positioning().with_declared_accuracy(
            DeclaredAccuracy {
                horizontal: Some(Meters(10.0)),
                ..Default::default()
            },
        ));
        engine.add_provider(coarse);
        engine.add_provider(fine.clone());

        let selection = engine.determine_provider_selection_for_criteria(&Criteria::default());
        assert!(Arc::ptr_eq(
            &selection.position.unwrap(),
            &(fine as Arc<dyn Provider>)
        ));
    }

    #[test]
    fn selection_ties_break_on_cheaper_requirements_then_insertion() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let declared = DeclaredAccuracy {
            horizontal: Some(Meters(10.0)),
            ..Default::default()
        };

        let expensive = Arc::new(
            TestProvider::new(
                Features::POSITION,
                Requirements::SATELLITES | Requirements::MONETARY_SPENT,
            )
            .with_declared_accuracy(declared),
        );
        let cheap_late = Arc::new(
            TestProvider::new(Features::POSITION, Requirements::empty())
                .with_declared_accuracy(declared),
        );
        let cheap_early = Arc::new(
            TestProvider::new(Features::POSITION, Requirements::empty())
                .with_declared_accuracy(declared),
        );

        engine.add_provider(expensive);
        engine.add_provider(cheap_early.clone());
        engine.add_provider(cheap_late);

        let selection = engine.determine_provider_selection_for_criteria(&Criteria::default());
        assert!(Arc::ptr_eq(
            &selection.position.unwrap(),
            &(cheap_early as Arc<dyn Provider>)
        ));
    }

    #[test]
    fn unsatisfiable_kinds_stay_empty() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        engine.add_provider(Arc::new(TestProvider::positioning()));

        let selection = engine.determine_provider_selection_for_criteria(&Criteria::default());
        assert!(selection.position.is_some());
        assert!(selection.heading.is_none());
        assert!(selection.velocity.is_none());
    }

    #[test]
    fn disabling_satellite_positioning_parks_dependent_providers() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let provider = Arc::new(TestProvider::new(
            Features::POSITION,
            Requirements::SATELLITES,
        ));
        engine.add_provider(provider.clone());

        provider.start_position_updates();
        assert_eq!(provider.activity(), vec![UpdateKind::Position]);

        engine
            .satellite_based_positioning_state()
            .set(SatelliteBasedPositioningState::Off)
            .unwrap();
        assert!(provider.activity().is_empty());
        assert_eq!(provider.last_event(), Some("park position".to_string()));

        engine
            .satellite_based_positioning_state()
            .set(SatelliteBasedPositioningState::On)
            .unwrap();
        assert_eq!(provider.activity(), vec![UpdateKind::Position]);
    }

    #[test]
    fn turning_the_engine_off_parks_every_provider() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let first = Arc::new(TestProvider::positioning());
        let second = Arc::new(TestProvider::new(
            Features::POSITION,
            Requirements::SATELLITES,
        ));
        engine.add_provider(first.clone());
        engine.add_provider(second.clone());

        first.start_position_updates();
        second.start_position_updates();

        engine.engine_state().set(EngineStatus::Off).unwrap();
        assert!(first.activity().is_empty());
        assert!(second.activity().is_empty());

        engine.engine_state().set(EngineStatus::On).unwrap();
        assert_eq!(first.activity(), vec![UpdateKind::Position]);
        assert_eq!(second.activity(), vec![UpdateKind::Position]);
    }

    #[test]
    fn space_vehicles_merge_by_key() {
        let engine = Engine::new(Arc::new(ConnectivityMonitor::new()));
        let provider = Arc::new(TestProvider::positioning());
        engine.add_provider(provider.clone());

        let sv = |prn: u32, snr: f32| SpaceVehicle {
            key: SpaceVehicleKey {
                constellation: Constellation::Gps,
                prn,
            },
            snr,
            has_almanac: false,
            has_ephemeris: false,
            used_in_fix: false,
            azimuth: Degrees(0.0),
            elevation: Degrees(0.0),
        };

        let mut first = SpaceVehicleMap::new();
        first.insert(sv(1, 10.0).key, sv(1, 10.0));
        first.insert(sv(2, 20.0).key, sv(2, 20.0));
        provider.emit_space_vehicles(Update::now(first));

        let mut second = SpaceVehicleMap::new();
        second.insert(sv(2, 25.0).key, sv(2, 25.0));
        provider.emit_space_vehicles(Update::now(second));

        let visible = engine.updates.visible_space_vehicles.get();
        assert_eq!(visible.len(), 2);
        assert_eq!(
            visible[&SpaceVehicleKey {
                constellation: Constellation::Gps,
                prn: 2
            }]
            .snr,
            25.0
        );
    }
}

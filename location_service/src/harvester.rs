//! Opportunistic crowd-sourcing: every fused fix is bundled with the
//! currently visible radio environment and handed to a reporter.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread,
};

use location_lib::{
    connectivity::{ConnectivityMonitor, RadioCell, WirelessNetwork},
    observable::Subscription,
    position::Position,
    provider::WifiAndCellIdReportingState,
    update::Update,
    Error,
};
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Gates harvesting while benchmarks and hardware tests run.
pub const ENABLE_HARVESTING_DURING_TESTS_ENV: &str =
    "COM_UBUNTU_LOCATION_GPS_PROVIDER_ENABLE_HARVESTING_DURING_TESTS";

pub fn harvesting_enabled_during_tests() -> bool {
    std::env::var(ENABLE_HARVESTING_DURING_TESTS_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Where observation batches end up. Implementations talk to a
/// crowd-sourced geolocation database.
pub trait Reporter: Send + Sync {
    fn start(&self) {}
    fn stop(&self) {}

    /// Blocks until the batch is accepted or refused.
    fn report(
        &self,
        update: &Update<Position>,
        wifis: &[WirelessNetwork],
        cells: &[RadioCell],
    ) -> Result<(), Error>;
}

pub struct Harvester {
    engine: Arc<Engine>,
    connectivity: Arc<ConnectivityMonitor>,
    reporter: Arc<dyn Reporter>,
    started: Arc<AtomicBool>,
    submission_in_flight: Arc<AtomicBool>,
    _subscription: Subscription,
}

impl Harvester {
    pub fn new(
        engine: Arc<Engine>,
        connectivity: Arc<ConnectivityMonitor>,
        reporter: Arc<dyn Reporter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Harvester>| {
            let harvester = weak.clone();
            let subscription = engine.updates.last_known_location.connect(
                move |update: &Option<Update<Position>>| {
                    if let (Some(harvester), Some(update)) = (harvester.upgrade(), update.as_ref())
                    {
                        harvester.report_position_update(update);
                    }
                },
            );

            Harvester {
                engine,
                connectivity,
                reporter,
                started: Arc::new(AtomicBool::new(false)),
                submission_in_flight: Arc::new(AtomicBool::new(false)),
                _subscription: subscription,
            }
        })
    }

    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.reporter.start();
            info!("harvester started");
        }
    }

    pub fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            self.reporter.stop();
            info!("harvester stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Bundles the fix with the current radio environment and submits it
    /// on a dedicated thread. At most one submission is in flight; fixes
    /// arriving while one is are dropped, not queued.
    pub fn report_position_update(&self, update: &Update<Position>) {
        if !self.is_started() {
            return;
        }
        if self.engine.wifi_and_cell_id_reporting_state().get() != WifiAndCellIdReportingState::On
        {
            return;
        }
        if self
            .submission_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("submission in flight, dropping observation");
            return;
        }

        let wifis = self.connectivity.visible_wireless_networks();
        let cells = self.connectivity.visible_radio_cells();
        let reporter = self.reporter.clone();
        let update = update.clone();
        let started = self.started.clone();
        let in_flight = self.submission_in_flight.clone();

        let spawned = thread::Builder::new()
            .name("harvester-submit".into())
            .spawn(move || {
                match reporter.report(&update, &wifis, &cells) {
                    Ok(()) => debug!("submitted observation"),
                    Err(Error::ReporterPermanent(reason)) => {
                        warn!("reporter failed permanently ({reason}), stopping harvester");
                        started.store(false, Ordering::SeqCst);
                    }
                    Err(err) => warn!("dropping observation batch: {err}"),
                }
                in_flight.store(false, Ordering::SeqCst);
            });

        if let Err(err) = spawned {
            warn!("could not spawn submission thread: {err}");
            self.submission_in_flight.store(false, Ordering::SeqCst);
        }
    }
}

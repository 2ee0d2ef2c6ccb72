use std::{sync::Arc, thread, time::Duration};

use anyhow::Context;
use location_lib::{
    connectivity::ConnectivityMonitor,
    position::Position,
    provider::WifiAndCellIdReportingState,
    units::{Degrees, Meters},
};
use location_service::{
    engine::Engine,
    harvester::Harvester,
    ichnaea::{IchnaeaConfig, IchnaeaReporter},
    providers::dummy::{DummyProvider, DummyProviderConfig},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let connectivity = Arc::new(ConnectivityMonitor::new());
    let engine = Engine::new(connectivity.clone());

    // Without positioning hardware the dummy provider keeps the engine
    // exercised; the GPS provider is wired in by the platform launcher
    // once a vendor driver is present.
    let reference_position = Position::new(Degrees(52.5167), Degrees(13.3833))
        .context("reference position")?
        .with_horizontal_accuracy(Meters(100.0))
        .context("reference accuracy")?;
    engine.add_provider(Arc::new(DummyProvider::new(DummyProviderConfig {
        reference_position,
        update_period: Duration::from_secs(1),
    })));

    // Harvesting is opt-in via the environment and gated by the
    // reporting toggle at runtime.
    let _harvesting = match IchnaeaConfig::from_env() {
        Some(config) => {
            info!("reporting observations to {}", config.instance_url);
            let reporter = Arc::new(IchnaeaReporter::new(config).context("ichnaea reporter")?);
            let harvester = Harvester::new(engine.clone(), connectivity.clone(), reporter);

            if engine.wifi_and_cell_id_reporting_state().get() == WifiAndCellIdReportingState::On {
                harvester.start();
            }
            let toggle_target = harvester.clone();
            let subscription = engine.wifi_and_cell_id_reporting_state().connect(
                move |state: &WifiAndCellIdReportingState| match state {
                    WifiAndCellIdReportingState::On => toggle_target.start(),
                    WifiAndCellIdReportingState::Off => toggle_target.stop(),
                },
            );
            Some((harvester, subscription))
        }
        None => None,
    };

    info!("location service up");
    loop {
        thread::park();
    }
}

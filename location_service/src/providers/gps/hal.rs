//! The hardware abstraction layer between the GPS provider and the
//! vendor driver. The driver side is a trait mirroring the vendor
//! contract; the adapter translates its callback surface into typed
//! signals and policy checks.

use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use location_lib::{
    connectivity::{ConnectivityMonitor, RadioCell},
    observable::{Property, Signal},
    position::Position,
    provider::SpaceVehicleMap,
    space_vehicle::{Constellation, SpaceVehicle, SpaceVehicleKey},
    units::{Degrees, Heading, Meters, Velocity},
    Error,
};
use tracing::{debug, trace, warn};

use super::config::GpsConfig;

bitflags::bitflags! {
    /// Capability word reported by the chipset.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const SCHEDULING = 0x01;
        const MSB = 0x02;
        const MSA = 0x04;
        const SINGLE_SHOT = 0x08;
        const ON_DEMAND_TIME = 0x10;
        const GEOFENCE = 0x20;
    }
}

/// What the engine assumes until the chipset reports, and what vendor
/// configurations ship as `CAPABILITIES` by default.
pub const DEFAULT_CAPABILITIES: Capabilities = Capabilities::from_bits_truncate(0x33);

/// Driver implementations are expected to bound every vendor call.
pub const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssistanceMode {
    Standalone,
    MobileStationAssisted,
    MobileStationBased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionMode {
    SingleShot,
    Periodic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChipsetStatus {
    #[default]
    Unknown,
    SessionBegin,
    SessionEnd,
    EngineOn,
    EngineOff,
}

impl ChipsetStatus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => ChipsetStatus::SessionBegin,
            2 => ChipsetStatus::SessionEnd,
            3 => ChipsetStatus::EngineOn,
            4 => ChipsetStatus::EngineOff,
            _ => ChipsetStatus::Unknown,
        }
    }
}

bitflags::bitflags! {
    /// Which fields of a location callback are populated.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LocationFlags: u32 {
        const LAT_LONG = 0x0001;
        const ALTITUDE = 0x0002;
        const SPEED = 0x0004;
        const BEARING = 0x0008;
        const ACCURACY = 0x0010;
    }
}

/// One location callback from the driver, fields gated by `flags`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocationSample {
    pub flags: LocationFlags,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub bearing: f64,
    pub accuracy: f64,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SvInfo {
    pub prn: u16,
    pub snr: f32,
    pub elevation: f32,
    pub azimuth: f32,
}

/// SV callback payload: a flat list plus bitmasks indexed by `prn - 1`.
#[derive(Clone, Debug, Default)]
pub struct SvStatus {
    pub svs: Vec<SvInfo>,
    pub almanac_mask: u32,
    pub ephemeris_mask: u32,
    pub used_in_fix_mask: u32,
}

pub const AGPS_TYPE_SUPL: u16 = 1;
pub const AGPS_TYPE_C2K: u16 = 2;

#[derive(Clone, Copy, Debug)]
pub struct AgpsStatus {
    pub kind: u16,
    pub status: u16,
    pub ipv4: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuplAssistantStatus {
    #[default]
    Unknown,
    RequestDataConnection,
    ReleaseDataConnection,
    DataConnected,
    DataConnectionDone,
    DataConnectionFailed,
}

impl SuplAssistantStatus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => SuplAssistantStatus::RequestDataConnection,
            2 => SuplAssistantStatus::ReleaseDataConnection,
            3 => SuplAssistantStatus::DataConnected,
            4 => SuplAssistantStatus::DataConnectionDone,
            5 => SuplAssistantStatus::DataConnectionFailed,
            _ => SuplAssistantStatus::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgpsCellId {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u16,
    pub cid: u32,
}

/// Reference location payload for AGPS injection. Only GSM and UMTS
/// cell identities are representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgpsReferenceLocation {
    GsmCellId(AgpsCellId),
    UmtsCellId(AgpsCellId),
}

/// The vendor driver contract. An implementation wraps the chipset
/// library; failures surface as [`Error::DriverUnavailable`].
pub trait GpsDriver: Send + Sync {
    fn start(&self) -> Result<(), Error>;
    fn stop(&self) -> Result<(), Error>;
    fn delete_aiding_data(&self, mask: u16) -> Result<(), Error>;
    fn set_position_mode(
        &self,
        assistance: AssistanceMode,
        recurrence: PositionMode,
        min_interval: Duration,
        preferred_accuracy: Meters,
        preferred_ttff: Duration,
    ) -> Result<(), Error>;
    fn inject_location(&self, latitude: f64, longitude: f64, accuracy: f64) -> Result<(), Error>;
    fn inject_time(
        &self,
        reference_ns: i64,
        sample_ns: i64,
        uncertainty_ns: i64,
    ) -> Result<(), Error>;
    fn agps_inject_reference_location(
        &self,
        location: &AgpsReferenceLocation,
    ) -> Result<(), Error>;
    fn agps_set_server(&self, host: &str, port: u16) -> Result<(), Error>;
    fn agps_data_conn_open(&self, apn: &str) -> Result<(), Error>;
    fn agps_data_conn_closed(&self) -> Result<(), Error>;
    fn agps_data_conn_failed(&self) -> Result<(), Error>;
}

/// SUPL side-car: connection status as observed from the chipset, and
/// the surrounding system's data-connection notifications translated
/// into driver calls.
pub struct SuplAssistant {
    driver: Arc<dyn GpsDriver>,
    status: Property<SuplAssistantStatus>,
    server_ip: Property<Option<Ipv4Addr>>,
}

impl SuplAssistant {
    fn new(driver: Arc<dyn GpsDriver>) -> Self {
        Self {
            driver,
            status: Property::new(SuplAssistantStatus::default()),
            server_ip: Property::new(None),
        }
    }

    pub fn status(&self) -> &Property<SuplAssistantStatus> {
        &self.status
    }

    pub fn server_ip(&self) -> &Property<Option<Ipv4Addr>> {
        &self.server_ip
    }

    pub fn set_server(&self, host: &str, port: u16) {
        if let Err(err) = self.driver.agps_set_server(host, port) {
            warn!("could not configure SUPL server {host}:{port}: {err}");
        }
    }

    pub fn notify_data_connection_open_via_apn(&self, apn: &str) {
        if let Err(err) = self.driver.agps_data_conn_open(apn) {
            warn!("could not announce data connection via {apn}: {err}");
        }
    }

    pub fn notify_data_connection_closed(&self) {
        if let Err(err) = self.driver.agps_data_conn_closed() {
            warn!("could not announce closed data connection: {err}");
        }
    }

    pub fn notify_data_connection_not_available(&self) {
        if let Err(err) = self.driver.agps_data_conn_failed() {
            warn!("could not announce unavailable data connection: {err}");
        }
    }
}

/// What the GPS provider consumes. Mocked in tests; implemented by the
/// adapter below for real chipsets.
pub trait HardwareAbstractionLayer: Send + Sync {
    fn capabilities(&self) -> Capabilities;
    fn is_capable_of_assistance_mode(&self, mode: AssistanceMode) -> bool;
    fn is_capable_of_position_mode(&self, mode: PositionMode) -> bool;
    fn supports_on_demand_time_injection(&self) -> bool;

    fn supl_assistant(&self) -> &SuplAssistant;

    fn position_updates(&self) -> &Signal<Position>;
    fn heading_updates(&self) -> &Signal<Heading>;
    fn velocity_updates(&self) -> &Signal<Velocity>;
    fn space_vehicle_updates(&self) -> &Signal<SpaceVehicleMap>;
    fn chipset_status(&self) -> &Property<ChipsetStatus>;

    fn start_positioning(&self) -> Result<(), Error>;
    fn stop_positioning(&self) -> Result<(), Error>;

    fn set_assistance_mode(&self, mode: AssistanceMode) -> Result<(), Error>;
    fn set_position_mode(&self, mode: PositionMode) -> Result<(), Error>;

    fn inject_reference_position(&self, position: &Position) -> Result<(), Error>;
    fn inject_reference_time(
        &self,
        reference: DateTime<Utc>,
        sample: DateTime<Utc>,
    ) -> Result<(), Error>;

    fn delete_all_aiding_data(&self) -> Result<(), Error>;
}

struct CapabilityLatch {
    value: Capabilities,
    latched: bool,
}

type UtcTimeRequestHandler = Box<dyn Fn() + Send + Sync>;

/// Adapter over an Android-style chipset driver.
pub struct AndroidHardwareAbstractionLayer {
    driver: Arc<dyn GpsDriver>,
    connectivity: Arc<ConnectivityMonitor>,
    capabilities: Mutex<CapabilityLatch>,
    assistance_mode: Mutex<AssistanceMode>,
    position_mode: Mutex<PositionMode>,
    supl_assistant: SuplAssistant,
    utc_time_request_handler: Mutex<Option<UtcTimeRequestHandler>>,
    // Cell-identity injection is wired but off until the vendor path is
    // confirmed; see DESIGN.md.
    reference_cell_injection: AtomicBool,
    position_updates: Signal<Position>,
    heading_updates: Signal<Heading>,
    velocity_updates: Signal<Velocity>,
    space_vehicle_updates: Signal<SpaceVehicleMap>,
    chipset_status: Property<ChipsetStatus>,
}

impl AndroidHardwareAbstractionLayer {
    pub fn new(
        driver: Arc<dyn GpsDriver>,
        connectivity: Arc<ConnectivityMonitor>,
        config: &GpsConfig,
    ) -> Arc<Self> {
        let supl_assistant = SuplAssistant::new(driver.clone());
        if let Some(supl) = &config.supl {
            supl_assistant.set_server(&supl.host, supl.port);
        }

        Arc::new(Self {
            driver,
            connectivity,
            capabilities: Mutex::new(CapabilityLatch {
                value: config.capabilities.unwrap_or(DEFAULT_CAPABILITIES),
                latched: false,
            }),
            assistance_mode: Mutex::new(AssistanceMode::Standalone),
            position_mode: Mutex::new(PositionMode::Periodic),
            supl_assistant,
            utc_time_request_handler: Mutex::new(None),
            reference_cell_injection: AtomicBool::new(false),
            position_updates: Signal::new(),
            heading_updates: Signal::new(),
            velocity_updates: Signal::new(),
            space_vehicle_updates: Signal::new(),
            chipset_status: Property::new(ChipsetStatus::default()),
        })
    }

    /// The callback surface handed to the driver. Each event resolves a
    /// weak handle to the adapter and is dropped silently once the
    /// adapter is gone.
    pub fn events(self: &Arc<Self>) -> DriverEvents {
        DriverEvents {
            hal: Arc::downgrade(self),
        }
    }

    pub fn set_utc_time_request_handler(&self, handler: UtcTimeRequestHandler) {
        *self.utc_time_request_handler.lock().unwrap() = Some(handler);
    }

    pub fn set_reference_cell_injection(&self, enabled: bool) {
        self.reference_cell_injection.store(enabled, Ordering::SeqCst);
    }

    fn dispatch_modes_to_driver(&self) -> Result<(), Error> {
        // Mirrors what the chipset integration expects for periodic
        // tracking sessions.
        const MIN_INTERVAL: Duration = Duration::from_millis(500);
        const PREFERRED_ACCURACY: Meters = Meters(1.0);
        const PREFERRED_TTFF: Duration = Duration::ZERO;

        self.driver.set_position_mode(
            *self.assistance_mode.lock().unwrap(),
            *self.position_mode.lock().unwrap(),
            MIN_INTERVAL,
            PREFERRED_ACCURACY,
            PREFERRED_TTFF,
        )
    }

    fn handle_location_update(&self, sample: &LocationSample) {
        if sample.flags.contains(LocationFlags::LAT_LONG) {
            match Position::new(Degrees(sample.latitude), Degrees(sample.longitude)) {
                Ok(mut position) => {
                    if sample.flags.contains(LocationFlags::ALTITUDE) {
                        position = position.with_altitude(Meters(sample.altitude));
                    }
                    if sample.flags.contains(LocationFlags::ACCURACY) {
                        match position.with_horizontal_accuracy(Meters(sample.accuracy)) {
                            Ok(with_accuracy) => position = with_accuracy,
                            Err(err) => debug!("ignoring reported accuracy: {err}"),
                        }
                    }
                    // Altitude accuracy is not part of the vendor
                    // contract; the field stays absent.
                    self.position_updates.emit(&position);
                }
                Err(err) => debug!("dropping chipset location: {err}"),
            }
        }

        if sample.flags.contains(LocationFlags::SPEED) {
            self.velocity_updates
                .emit(&Velocity::from_meters_per_second(sample.speed));
        }

        if sample.flags.contains(LocationFlags::BEARING) {
            self.heading_updates
                .emit(&Heading::from_degrees(sample.bearing));
        }
    }

    fn handle_status_update(&self, raw: u16) {
        if let Err(err) = self.chipset_status.set(ChipsetStatus::from_raw(raw)) {
            warn!("could not publish chipset status: {err}");
        }
    }

    fn handle_sv_status_update(&self, status: &SvStatus) {
        trace!(
            count = status.svs.len(),
            almanac = status.almanac_mask,
            ephemeris = status.ephemeris_mask,
            used = status.used_in_fix_mask,
            "sv status"
        );

        let mut svs = SpaceVehicleMap::new();
        for sv in &status.svs {
            // PRNs are 1-based; the masks are indexed by prn - 1 and
            // only cover the first 32 vehicles.
            if sv.prn < 1 {
                continue;
            }
            let mask_bit = if sv.prn <= 32 { 1u32 << (sv.prn - 1) } else { 0 };

            let key = SpaceVehicleKey {
                constellation: Constellation::Gps,
                prn: sv.prn as u32,
            };
            svs.insert(
                key,
                SpaceVehicle {
                    key,
                    snr: sv.snr,
                    has_almanac: status.almanac_mask & mask_bit != 0,
                    has_ephemeris: status.ephemeris_mask & mask_bit != 0,
                    used_in_fix: status.used_in_fix_mask & mask_bit != 0,
                    // The chipset reports these two swapped; forwarded
                    // as delivered until the vendor stack is fixed.
                    azimuth: Degrees(sv.elevation as f64),
                    elevation: Degrees(sv.azimuth as f64),
                },
            );
        }

        self.space_vehicle_updates.emit(&svs);
    }

    fn handle_set_capabilities(&self, raw: u32) {
        let mut latch = self.capabilities.lock().unwrap();
        if latch.latched {
            debug!("capabilities already latched, ignoring {raw:#x}");
            return;
        }
        latch.value = Capabilities::from_bits_truncate(raw);
        latch.latched = true;
        debug!("chipset capabilities latched: {:?}", latch.value);
    }

    fn handle_agps_status_update(&self, status: &AgpsStatus) {
        if status.kind != AGPS_TYPE_SUPL {
            debug!(
                "only SUPL is supported, dropping agps status of type {}",
                status.kind
            );
            return;
        }

        if let Err(err) = self
            .supl_assistant
            .status
            .set(SuplAssistantStatus::from_raw(status.status))
        {
            warn!("could not publish SUPL status: {err}");
        }
        if let Err(err) = self
            .supl_assistant
            .server_ip
            .set(Some(Ipv4Addr::from(status.ipv4)))
        {
            warn!("could not publish SUPL server ip: {err}");
        }
    }

    fn handle_request_utc_time(&self) {
        if let Some(handler) = &*self.utc_time_request_handler.lock().unwrap() {
            handler();
            return;
        }

        let now = Utc::now();
        let now_ns = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis() * 1_000_000);
        if let Err(err) = self.driver.inject_time(now_ns, now_ns, 0) {
            warn!("could not inject time: {err}");
        }
    }

    fn handle_request_reference_location(&self) {
        if !self.reference_cell_injection.load(Ordering::SeqCst) {
            debug!("reference cell injection is disabled");
            return;
        }

        let cells = self.connectivity.visible_radio_cells();
        let Some(cell) = cells.first() else {
            debug!("no visible radio cell to inject");
            return;
        };

        let reference = match cell {
            RadioCell::Gsm(gsm) => AgpsReferenceLocation::GsmCellId(AgpsCellId {
                mcc: gsm.mcc,
                mnc: gsm.mnc,
                lac: gsm.location_area_code,
                cid: gsm.cell_id,
            }),
            RadioCell::Umts(umts) => AgpsReferenceLocation::UmtsCellId(AgpsCellId {
                mcc: umts.mcc,
                mnc: umts.mnc,
                lac: umts.location_area_code,
                cid: umts.cell_id,
            }),
            _ => {
                warn!("only gsm and umts cell ids can be injected");
                return;
            }
        };

        if let Err(err) = self.driver.agps_inject_reference_location(&reference) {
            warn!("could not inject reference cell: {err}");
        }
    }

    fn handle_nmea(&self, timestamp: i64, sentence: &str) {
        trace!(timestamp, sentence, "nmea");
    }
}

impl HardwareAbstractionLayer for AndroidHardwareAbstractionLayer {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().unwrap().value
    }

    fn is_capable_of_assistance_mode(&self, mode: AssistanceMode) -> bool {
        match mode {
            AssistanceMode::Standalone => true,
            AssistanceMode::MobileStationAssisted => {
                self.capabilities().contains(Capabilities::MSA)
            }
            AssistanceMode::MobileStationBased => self.capabilities().contains(Capabilities::MSB),
        }
    }

    fn is_capable_of_position_mode(&self, mode: PositionMode) -> bool {
        match mode {
            PositionMode::SingleShot => self.capabilities().contains(Capabilities::SINGLE_SHOT),
            PositionMode::Periodic => self.capabilities().contains(Capabilities::SCHEDULING),
        }
    }

    fn supports_on_demand_time_injection(&self) -> bool {
        self.capabilities().contains(Capabilities::ON_DEMAND_TIME)
    }

    fn supl_assistant(&self) -> &SuplAssistant {
        &self.supl_assistant
    }

    fn position_updates(&self) -> &Signal<Position> {
        &self.position_updates
    }

    fn heading_updates(&self) -> &Signal<Heading> {
        &self.heading_updates
    }

    fn velocity_updates(&self) -> &Signal<Velocity> {
        &self.velocity_updates
    }

    fn space_vehicle_updates(&self) -> &Signal<SpaceVehicleMap> {
        &self.space_vehicle_updates
    }

    fn chipset_status(&self) -> &Property<ChipsetStatus> {
        &self.chipset_status
    }

    fn start_positioning(&self) -> Result<(), Error> {
        self.driver.start()
    }

    fn stop_positioning(&self) -> Result<(), Error> {
        self.driver.stop()
    }

    fn set_assistance_mode(&self, mode: AssistanceMode) -> Result<(), Error> {
        if !self.is_capable_of_assistance_mode(mode) {
            return Err(Error::UnsupportedMode(format!(
                "assistance mode {mode:?} not in {:?}",
                self.capabilities()
            )));
        }
        *self.assistance_mode.lock().unwrap() = mode;
        self.dispatch_modes_to_driver()
    }

    fn set_position_mode(&self, mode: PositionMode) -> Result<(), Error> {
        if !self.is_capable_of_position_mode(mode) {
            return Err(Error::UnsupportedMode(format!(
                "position mode {mode:?} not in {:?}",
                self.capabilities()
            )));
        }
        *self.position_mode.lock().unwrap() = mode;
        self.dispatch_modes_to_driver()
    }

    fn inject_reference_position(&self, position: &Position) -> Result<(), Error> {
        self.driver.inject_location(
            position.latitude().0,
            position.longitude().0,
            position.accuracy.horizontal.map(|a| a.0).unwrap_or(0.0),
        )
    }

    fn inject_reference_time(
        &self,
        reference: DateTime<Utc>,
        sample: DateTime<Utc>,
    ) -> Result<(), Error> {
        if !self.supports_on_demand_time_injection() {
            return Err(Error::UnsupportedMode(
                "chipset does not accept on-demand time".into(),
            ));
        }

        let to_ns = |at: DateTime<Utc>| {
            at.timestamp_nanos_opt()
                .unwrap_or_else(|| at.timestamp_millis() * 1_000_000)
        };
        self.driver.inject_time(to_ns(reference), to_ns(sample), 10)
    }

    fn delete_all_aiding_data(&self) -> Result<(), Error> {
        self.driver.delete_aiding_data(0xFFFF)
    }
}

/// Callback registration surface: the driver calls these from its own
/// threads.
pub struct DriverEvents {
    hal: Weak<AndroidHardwareAbstractionLayer>,
}

impl DriverEvents {
    pub fn on_location_update(&self, sample: &LocationSample) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_location_update(sample);
        }
    }

    pub fn on_status_update(&self, status: u16) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_status_update(status);
        }
    }

    pub fn on_sv_status_update(&self, status: &SvStatus) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_sv_status_update(status);
        }
    }

    pub fn on_set_capabilities(&self, capabilities: u32) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_set_capabilities(capabilities);
        }
    }

    pub fn on_agps_status_update(&self, status: &AgpsStatus) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_agps_status_update(status);
        }
    }

    pub fn on_request_utc_time(&self) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_request_utc_time();
        }
    }

    pub fn on_request_reference_location(&self) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_request_reference_location();
        }
    }

    pub fn on_nmea(&self, timestamp: i64, sentence: &str) {
        if let Some(hal) = self.hal.upgrade() {
            hal.handle_nmea(timestamp, sentence);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use location_lib::connectivity::{GsmCell, LteCell};

    use super::*;

    /// Records every vendor call as a line of text.
    #[derive(Default)]
    pub(crate) struct FakeDriver {
        calls: Mutex<Vec<String>>,
    }

    impl FakeDriver {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl GpsDriver for FakeDriver {
        fn start(&self) -> Result<(), Error> {
            self.record("start".into());
            Ok(())
        }

        fn stop(&self) -> Result<(), Error> {
            self.record("stop".into());
            Ok(())
        }

        fn delete_aiding_data(&self, mask: u16) -> Result<(), Error> {
            self.record(format!("delete_aiding_data {mask:#x}"));
            Ok(())
        }

        fn set_position_mode(
            &self,
            assistance: AssistanceMode,
            recurrence: PositionMode,
            min_interval: Duration,
            _preferred_accuracy: Meters,
            _preferred_ttff: Duration,
        ) -> Result<(), Error> {
            self.record(format!(
                "set_position_mode {assistance:?} {recurrence:?} {}ms",
                min_interval.as_millis()
            ));
            Ok(())
        }

        fn inject_location(
            &self,
            latitude: f64,
            longitude: f64,
            accuracy: f64,
        ) -> Result<(), Error> {
            self.record(format!("inject_location {latitude} {longitude} {accuracy}"));
            Ok(())
        }

        fn inject_time(
            &self,
            _reference_ns: i64,
            _sample_ns: i64,
            uncertainty_ns: i64,
        ) -> Result<(), Error> {
            self.record(format!("inject_time uncertainty={uncertainty_ns}"));
            Ok(())
        }

        fn agps_inject_reference_location(
            &self,
            location: &AgpsReferenceLocation,
        ) -> Result<(), Error> {
            self.record(format!("agps_inject_reference_location {location:?}"));
            Ok(())
        }

        fn agps_set_server(&self, host: &str, port: u16) -> Result<(), Error> {
            self.record(format!("agps_set_server {host}:{port}"));
            Ok(())
        }

        fn agps_data_conn_open(&self, apn: &str) -> Result<(), Error> {
            self.record(format!("agps_data_conn_open {apn}"));
            Ok(())
        }

        fn agps_data_conn_closed(&self) -> Result<(), Error> {
            self.record("agps_data_conn_closed".into());
            Ok(())
        }

        fn agps_data_conn_failed(&self) -> Result<(), Error> {
            self.record("agps_data_conn_failed".into());
            Ok(())
        }
    }

    pub(crate) fn hal_fixture() -> (
        Arc<FakeDriver>,
        Arc<ConnectivityMonitor>,
        Arc<AndroidHardwareAbstractionLayer>,
    ) {
        let driver = Arc::new(FakeDriver::default());
        let connectivity = Arc::new(ConnectivityMonitor::new());
        let hal = AndroidHardwareAbstractionLayer::new(
            driver.clone(),
            connectivity.clone(),
            &GpsConfig::default(),
        );
        (driver, connectivity, hal)
    }

    fn trap<T: Clone + Send + Sync + 'static>(
        signal: &Signal<T>,
    ) -> (Arc<Mutex<Vec<T>>>, location_lib::observable::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = signal.connect(move |value: &T| sink.lock().unwrap().push(value.clone()));
        (seen, subscription)
    }

    #[test]
    fn location_callback_fans_out_independently() {
        let (_driver, _connectivity, hal) = hal_fixture();
        let (positions, _p) = trap(hal.position_updates());
        let (headings, _h) = trap(hal.heading_updates());
        let (velocities, _v) = trap(hal.velocity_updates());
        let (svs, _s) = trap(hal.space_vehicle_updates());

        hal.events().on_location_update(&LocationSample {
            flags: LocationFlags::LAT_LONG
                | LocationFlags::ACCURACY
                | LocationFlags::SPEED
                | LocationFlags::BEARING,
            latitude: 51.5,
            longitude: -0.1,
            accuracy: 5.0,
            speed: 1.0,
            bearing: 90.0,
            ..Default::default()
        });

        let positions = positions.lock().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].latitude(), Degrees(51.5));
        assert_eq!(positions[0].accuracy.horizontal, Some(Meters(5.0)));
        assert_eq!(positions[0].altitude, None);

        assert_eq!(velocities.lock().unwrap()[0].meters_per_second(), 1.0);
        assert_eq!(headings.lock().unwrap()[0].degrees(), 90.0);
        assert!(svs.lock().unwrap().is_empty());
    }

    #[test]
    fn position_needs_the_lat_long_flag() {
        let (_driver, _connectivity, hal) = hal_fixture();
        let (positions, _p) = trap(hal.position_updates());
        let (velocities, _v) = trap(hal.velocity_updates());

        hal.events().on_location_update(&LocationSample {
            flags: LocationFlags::SPEED,
            speed: 2.5,
            ..Default::default()
        });

        assert!(positions.lock().unwrap().is_empty());
        assert_eq!(velocities.lock().unwrap().len(), 1);
    }

    #[test]
    fn altitude_is_attached_only_when_flagged() {
        let (_driver, _connectivity, hal) = hal_fixture();
        let (positions, _p) = trap(hal.position_updates());

        hal.events().on_location_update(&LocationSample {
            flags: LocationFlags::LAT_LONG | LocationFlags::ALTITUDE,
            latitude: 48.1,
            longitude: 11.6,
            altitude: 520.0,
            ..Default::default()
        });

        let positions = positions.lock().unwrap();
        assert_eq!(positions[0].altitude, Some(Meters(520.0)));
        assert_eq!(positions[0].accuracy.horizontal, None);
    }

    #[test]
    fn sv_status_builds_a_deduplicated_map() {
        let (_driver, _connectivity, hal) = hal_fixture();
        let (updates, _s) = trap(hal.space_vehicle_updates());

        hal.events().on_sv_status_update(&SvStatus {
            svs: vec![
                SvInfo {
                    prn: 3,
                    snr: 41.0,
                    elevation: 45.0,
                    azimuth: 90.0,
                },
                SvInfo {
                    prn: 3,
                    snr: 42.0,
                    elevation: 45.0,
                    azimuth: 90.0,
                },
                SvInfo {
                    prn: 0, // invalid, skipped
                    ..Default::default()
                },
            ],
            almanac_mask: 1 << 2,
            ephemeris_mask: 0,
            used_in_fix_mask: 1 << 2,
        });

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let map = &updates[0];
        assert_eq!(map.len(), 1);

        let sv = &map[&SpaceVehicleKey {
            constellation: Constellation::Gps,
            prn: 3,
        }];
        assert!(sv.has_almanac);
        assert!(!sv.has_ephemeris);
        assert!(sv.used_in_fix);
        // Azimuth and elevation arrive swapped from the chipset.
        assert_eq!(sv.azimuth, Degrees(45.0));
        assert_eq!(sv.elevation, Degrees(90.0));
    }

    #[test]
    fn first_capabilities_callback_latches() {
        let (_driver, _connectivity, hal) = hal_fixture();
        assert_eq!(hal.capabilities(), DEFAULT_CAPABILITIES);

        hal.events().on_set_capabilities(0x02);
        assert_eq!(hal.capabilities(), Capabilities::MSB);

        hal.events().on_set_capabilities(0x3f);
        assert_eq!(hal.capabilities(), Capabilities::MSB);
    }

    #[test]
    fn incompatible_modes_are_refused() {
        let (driver, _connectivity, hal) = hal_fixture();
        hal.events().on_set_capabilities(0x02); // MSB only

        assert!(matches!(
            hal.set_assistance_mode(AssistanceMode::MobileStationAssisted),
            Err(Error::UnsupportedMode(_))
        ));
        assert!(matches!(
            hal.set_position_mode(PositionMode::SingleShot),
            Err(Error::UnsupportedMode(_))
        ));
        assert!(driver.calls().is_empty());

        hal.set_assistance_mode(AssistanceMode::MobileStationBased)
            .unwrap();
        assert_eq!(
            driver.calls(),
            vec!["set_position_mode MobileStationBased Periodic 500ms"]
        );
    }

    #[test]
    fn non_supl_agps_status_is_dropped() {
        let (_driver, _connectivity, hal) = hal_fixture();

        hal.events().on_agps_status_update(&AgpsStatus {
            kind: AGPS_TYPE_C2K,
            status: 3,
            ipv4: 0x7f000001,
        });
        assert_eq!(
            hal.supl_assistant().status().get(),
            SuplAssistantStatus::Unknown
        );

        hal.events().on_agps_status_update(&AgpsStatus {
            kind: AGPS_TYPE_SUPL,
            status: 3,
            ipv4: 0x7f000001,
        });
        assert_eq!(
            hal.supl_assistant().status().get(),
            SuplAssistantStatus::DataConnected
        );
        assert_eq!(
            hal.supl_assistant().server_ip().get(),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
    }

    #[test]
    fn utc_time_requests_fall_back_to_now() {
        let (driver, _connectivity, hal) = hal_fixture();

        hal.events().on_request_utc_time();
        assert_eq!(driver.calls(), vec!["inject_time uncertainty=0"]);

        let invoked = Arc::new(Mutex::new(false));
        let flag = invoked.clone();
        hal.set_utc_time_request_handler(Box::new(move || *flag.lock().unwrap() = true));

        hal.events().on_request_utc_time();
        assert!(*invoked.lock().unwrap());
        // No second driver injection once a handler is installed.
        assert_eq!(driver.calls().len(), 1);
    }

    #[test]
    fn reference_cell_injection_is_inactive_by_default() {
        let (driver, connectivity, hal) = hal_fixture();
        connectivity.report_cell_visible(RadioCell::Gsm(GsmCell {
            mcc: 262,
            mnc: 2,
            location_area_code: 5313,
            cell_id: 131948771,
        }));

        hal.events().on_request_reference_location();
        assert!(driver.calls().is_empty());

        hal.set_reference_cell_injection(true);
        hal.events().on_request_reference_location();
        assert_eq!(
            driver.calls(),
            vec![format!(
                "agps_inject_reference_location {:?}",
                AgpsReferenceLocation::GsmCellId(AgpsCellId {
                    mcc: 262,
                    mnc: 2,
                    lac: 5313,
                    cid: 131948771
                })
            )]
        );
    }

    #[test]
    fn non_cellular_reference_cells_are_skipped() {
        let (driver, connectivity, hal) = hal_fixture();
        hal.set_reference_cell_injection(true);
        connectivity.report_cell_visible(RadioCell::Lte(LteCell {
            mcc: 262,
            mnc: 2,
            tracking_area_code: 1,
            cell_id: 2,
            physical_cell_id: 3,
        }));

        hal.events().on_request_reference_location();
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn supl_notifications_reach_the_driver() {
        let (driver, _connectivity, hal) = hal_fixture();

        hal.supl_assistant()
            .notify_data_connection_open_via_apn("internet");
        hal.supl_assistant().notify_data_connection_closed();
        hal.supl_assistant().notify_data_connection_not_available();

        assert_eq!(
            driver.calls(),
            vec![
                "agps_data_conn_open internet",
                "agps_data_conn_closed",
                "agps_data_conn_failed"
            ]
        );
    }

    #[test]
    fn reference_position_reaches_the_driver() {
        let (driver, _connectivity, hal) = hal_fixture();
        let position = Position::new(Degrees(0.0), Degrees(0.0))
            .unwrap()
            .with_horizontal_accuracy(Meters(10.0))
            .unwrap();

        hal.inject_reference_position(&position).unwrap();
        assert_eq!(driver.calls(), vec!["inject_location 0 0 10"]);
    }

    #[test]
    fn aiding_data_wipe_uses_the_full_mask() {
        let (driver, _connectivity, hal) = hal_fixture();
        hal.delete_all_aiding_data().unwrap();
        assert_eq!(driver.calls(), vec!["delete_aiding_data 0xffff"]);
    }

    #[test]
    fn time_injection_requires_the_capability() {
        let (driver, _connectivity, hal) = hal_fixture();
        hal.events().on_set_capabilities(0x02); // no ON_DEMAND_TIME

        assert!(matches!(
            hal.inject_reference_time(Utc::now(), Utc::now()),
            Err(Error::UnsupportedMode(_))
        ));
        assert!(driver.calls().is_empty());
    }
}

//! A read-only view of the radio environment: the cells and wireless
//! networks currently visible, plus a coarse online summary. Platform
//! integration feeds the monitor; consumers only read and subscribe.
//!
//! The view is eventually consistent. Arrivals and departures travel as
//! add/remove signals, so a consumer may briefly observe both the old
//! and the new state.

use std::{fmt, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    observable::{Property, Signal},
    units::Megahertz,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    #[default]
    Unknown,
    Offline,
    /// Connected, but traffic is intercepted by a captive portal.
    CaptivePortal,
    Online,
}

/// A hardware address, normalized to lower-case colon-separated hex for
/// display and reporting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bssid(pub [u8; 6]);

impl Bssid {
    /// Accepts the usual vendor spellings (`AA:BB:…`, `aa-bb-…`, bare
    /// hex). Returns `None` for anything that does not contain exactly
    /// six bytes.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let bytes = hex::decode(digits).ok()?;
        let bytes: [u8; 6] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for Bssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bssid({self})")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WirelessMode {
    #[default]
    Unknown,
    Adhoc,
    Infrastructure,
    AccessPoint,
}

/// A visible access point. SSIDs are raw bytes; they are not required
/// to be valid UTF-8.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WirelessNetwork {
    pub ssid: Vec<u8>,
    pub bssid: Bssid,
    pub frequency: Megahertz,
    pub mode: WirelessMode,
    pub strength: i8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsmCell {
    pub mcc: u16,
    pub mnc: u16,
    pub location_area_code: u16,
    pub cell_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmtsCell {
    pub mcc: u16,
    pub mnc: u16,
    pub location_area_code: u16,
    pub cell_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LteCell {
    pub mcc: u16,
    pub mnc: u16,
    pub tracking_area_code: u16,
    pub cell_id: u32,
    pub physical_cell_id: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdmaCell {
    pub mcc: u16,
    pub mnc: u16,
    pub system_id: u16,
    pub network_id: u16,
    pub base_station_id: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioCell {
    Gsm(GsmCell),
    Umts(UmtsCell),
    Lte(LteCell),
    Cdma(CdmaCell),
}

impl RadioCell {
    pub fn mcc(&self) -> u16 {
        match self {
            RadioCell::Gsm(cell) => cell.mcc,
            RadioCell::Umts(cell) => cell.mcc,
            RadioCell::Lte(cell) => cell.mcc,
            RadioCell::Cdma(cell) => cell.mcc,
        }
    }

    pub fn mnc(&self) -> u16 {
        match self {
            RadioCell::Gsm(cell) => cell.mnc,
            RadioCell::Umts(cell) => cell.mnc,
            RadioCell::Lte(cell) => cell.mnc,
            RadioCell::Cdma(cell) => cell.mnc,
        }
    }
}

/// The connectivity snapshot the engine and the harvester consume.
pub struct ConnectivityMonitor {
    state: Property<ConnectivityState>,
    radio_cells: Mutex<Vec<RadioCell>>,
    wireless_networks: Mutex<Vec<WirelessNetwork>>,
    pub cell_added: Signal<RadioCell>,
    pub cell_removed: Signal<RadioCell>,
    pub network_added: Signal<WirelessNetwork>,
    pub network_removed: Signal<WirelessNetwork>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self {
            state: Property::new(ConnectivityState::Unknown),
            radio_cells: Mutex::new(Vec::new()),
            wireless_networks: Mutex::new(Vec::new()),
            cell_added: Signal::new(),
            cell_removed: Signal::new(),
            network_added: Signal::new(),
            network_removed: Signal::new(),
        }
    }

    pub fn state(&self) -> &Property<ConnectivityState> {
        &self.state
    }

    pub fn is_online(&self) -> bool {
        self.state.get() == ConnectivityState::Online
    }

    pub fn visible_radio_cells(&self) -> Vec<RadioCell> {
        self.radio_cells.lock().unwrap().clone()
    }

    pub fn visible_wireless_networks(&self) -> Vec<WirelessNetwork> {
        self.wireless_networks.lock().unwrap().clone()
    }

    pub fn update_state(&self, state: ConnectivityState) {
        if let Err(err) = self.state.set(state) {
            tracing::warn!("failed to publish connectivity state: {err}");
        }
    }

    pub fn report_cell_visible(&self, cell: RadioCell) {
        self.radio_cells.lock().unwrap().push(cell);
        self.cell_added.emit(&cell);
    }

    pub fn report_cell_lost(&self, cell: &RadioCell) {
        self.radio_cells.lock().unwrap().retain(|known| known != cell);
        self.cell_removed.emit(cell);
    }

    pub fn report_network_visible(&self, network: WirelessNetwork) {
        self.wireless_networks.lock().unwrap().push(network.clone());
        self.network_added.emit(&network);
    }

    pub fn report_network_lost(&self, network: &WirelessNetwork) {
        self.wireless_networks
            .lock()
            .unwrap()
            .retain(|known| known.bssid != network.bssid);
        self.network_removed.emit(network);
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

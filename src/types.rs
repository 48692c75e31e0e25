use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device identifier: the receiver's MAC address string
pub type DeviceId = String;

/// Zone index, 1-based; zone 1 is the main zone
pub type ZoneId = u8;

/// Tuner preset table slot, 1..=56
pub type PresetSlot = u8;

/// Tuner band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Am,
    Fm,
}

impl Band {
    /// Wire token for this band (`AM`/`FM`)
    pub fn token(self) -> &'static str {
        match self {
            Band::Am => "AM",
            Band::Fm => "FM",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "AM" => Some(Band::Am),
            "FM" => Some(Band::Fm),
            _ => None,
        }
    }
}

/// How volume is rendered on the front panel and in telegrams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VolumeDisplay {
    /// 0..98 step scale
    #[default]
    Absolute,
    /// dB-relative scale
    Relative,
}

/// Kind of input, fixed per vendor short name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    Physical,
    Network,
    Bluetooth,
    Usb,
    Tuner,
    Preset,
}

/// One selectable input on the receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    /// Unique key per device, e.g. `BLU-RAY`, `TUNERFM`, `PRESET03`
    pub key: String,
    /// Vendor name as reported by the device
    pub title: String,
    /// User-facing rename; falls back to the title when never renamed
    pub label: String,
    pub input_type: InputType,
    pub hidden: bool,
    pub can_hide: bool,
    pub can_rename: bool,
}

impl Input {
    /// Stable numeric identifier for protocol-facing handles
    pub fn id(&self) -> u32 {
        crate::hash::stable_id(&self.key)
    }
}

/// One saved tuner station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub slot: PresetSlot,
    pub band: Band,
    /// Station name as stored in the slot, may be blank
    pub name: String,
    /// Frequency in MHz (FM) or kHz (AM)
    pub frequency: f64,
}

/// Live tuner state assembled from telegrams
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunerStatus {
    pub band: Option<Band>,
    /// true = auto tuning mode
    pub auto_mode: bool,
    pub frequency: Option<f64>,
    pub preset_slot: Option<PresetSlot>,
    pub preset_name: Option<String>,
}

/// One independently controllable output group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub index: ZoneId,
    pub name: String,
    pub power: bool,
    /// Volume in device steps, 0..98 in 0.5 increments
    pub volume: f64,
    /// Raw volume in dB, always `volume - 79.5`
    pub volume_db: f64,
    pub volume_display: VolumeDisplay,
    pub mute: bool,
    /// Resolved active input key
    pub input: Option<String>,
    /// Secondary source key when a tuner preset is active (`PRESETnn`)
    pub source: Option<String>,
    /// Raw source token as last reported by the device
    pub raw_source: Option<String>,
}

impl Zone {
    pub fn new(index: ZoneId) -> Self {
        Self {
            index,
            name: format!("ZONE{index}"),
            power: false,
            volume: 0.0,
            volume_db: -79.5,
            volume_display: VolumeDisplay::Absolute,
            mute: false,
            input: None,
            source: None,
            raw_source: None,
        }
    }
}

/// Which channel commands for a device currently travel over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportMode {
    #[default]
    Disconnected,
    Connecting,
    /// Persistent line channel is up
    Connected,
    /// Persistent connect was refused; commands go over HTTP
    RequestResponse,
}

/// Static identity fetched from the descriptor bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// MAC address, the stable registry key
    pub mac: String,
    pub serial: String,
    pub firmware: String,
    pub friendly_name: String,
    pub model: String,
    pub zone_count: u8,
}

/// Canonical per-device state pushed to the collaborator layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub info: DeviceInfo,
    pub address: String,
    pub transport: TransportMode,
    /// Whole-device power; STANDBY forces every zone off
    pub power: bool,
    pub zones: Vec<Zone>,
    pub inputs: Vec<Input>,
    pub presets: BTreeMap<PresetSlot, Preset>,
    pub tuner: TunerStatus,
    /// Reported volume ceiling in steps, if any
    pub volume_max: Option<f64>,
}

impl DeviceState {
    pub fn new(info: DeviceInfo, address: String) -> Self {
        let zones = (1..=info.zone_count.max(1)).map(Zone::new).collect();
        Self {
            info,
            address,
            transport: TransportMode::Disconnected,
            power: false,
            zones,
            inputs: Vec::new(),
            presets: BTreeMap::new(),
            tuner: TunerStatus::default(),
            volume_max: None,
        }
    }

    /// Look up a zone by 1-based index
    pub fn zone(&self, index: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.index == index)
    }

    pub(crate) fn zone_mut(&mut self, index: ZoneId) -> Option<&mut Zone> {
        self.zones.iter_mut().find(|z| z.index == index)
    }

    /// Look up an input by key
    pub fn input(&self, key: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.key == key)
    }
}

//! Canonical state assembly.
//!
//! Telegrams arrive as isolated fragments (`Z2ON`, `MV455`, one rename-table
//! row at a time); the normalizer folds them, together with the descriptor
//! tables fetched at discovery, into one [`DeviceState`] the collaborator
//! layer can consume without knowing the wire vocabulary.

use crate::telegram::{steps_to_db, Fragment};
use crate::types::{Band, DeviceState, Input, InputType, Preset, PresetSlot, ZoneId};

/// Vendor names the bridge knows how to key and classify. Names reported in
/// the rename table that are not in this list are dropped from the canonical
/// input list. The tuner is deliberately absent; tuner inputs are
/// synthesized per band.
const KNOWN_INPUTS: &[(&str, InputType)] = &[
    ("PHONO", InputType::Physical),
    ("CD", InputType::Physical),
    ("DVD", InputType::Physical),
    ("BLU-RAY", InputType::Physical),
    ("TV AUDIO", InputType::Physical),
    ("CBL/SAT", InputType::Physical),
    ("MEDIA PLAYER", InputType::Physical),
    ("GAME", InputType::Physical),
    ("AUX1", InputType::Physical),
    ("AUX2", InputType::Physical),
    ("NETWORK", InputType::Network),
    ("BLUETOOTH", InputType::Bluetooth),
    ("IPOD/USB", InputType::Usb),
];

const SUPPORTED_BANDS: &[Band] = &[Band::Fm, Band::Am];

fn input_type_of(key: &str) -> Option<InputType> {
    KNOWN_INPUTS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, t)| *t)
}

/// Key for a synthesized tuner input, e.g. `TUNERFM`
pub fn tuner_key(band: Band) -> String {
    format!("TUNER{}", band.token())
}

/// Key for a synthesized preset input, e.g. `PRESET03`
pub fn preset_key(slot: PresetSlot) -> String {
    format!("PRESET{slot:02}")
}

/// Folds decoded fragments and descriptor tables into canonical state.
///
/// One normalizer exists per device; all mutation goes through
/// [`StateNormalizer::apply`] so active-input resolution stays consistent.
pub struct StateNormalizer {
    state: DeviceState,
    /// Rename table in device order: (canonical name, user label)
    renames: Vec<(String, String)>,
    /// Canonical names currently deleted from the source list
    hidden: Vec<String>,
}

impl StateNormalizer {
    pub fn new(state: DeviceState) -> Self {
        let mut n = Self {
            state,
            renames: Vec::new(),
            hidden: Vec::new(),
        };
        n.rebuild_inputs();
        n
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    /// Fold one decoded telegram into the canonical state.
    pub fn apply(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::DevicePower(on) => {
                self.state.power = on;
                if !on {
                    for zone in &mut self.state.zones {
                        zone.power = false;
                    }
                }
            }
            Fragment::ZonePower { zone, on } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    z.power = on;
                    if on {
                        self.state.power = true;
                    }
                }
            }
            Fragment::ZoneMute { zone, on } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    z.mute = on;
                }
            }
            Fragment::ZoneVolume { zone, steps } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    // `--` is the mute floor
                    let steps = steps.unwrap_or(0.0);
                    z.volume = steps;
                    z.volume_db = steps_to_db(steps);
                }
            }
            Fragment::VolumeMax(steps) => {
                self.state.volume_max = Some(steps);
            }
            Fragment::ZoneName { zone, name } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    z.name = name;
                }
            }
            Fragment::ZoneSource { zone, source } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    z.raw_source = Some(source);
                }
                self.resolve_zones();
            }
            Fragment::ZoneFollowMain { zone } => {
                if let Some(z) = self.state.zone_mut(zone) {
                    z.raw_source = Some("SOURCE".to_string());
                }
                self.resolve_zones();
            }
            Fragment::TunerFrequency(freq) => {
                self.state.tuner.frequency = Some(freq);
            }
            Fragment::TunerBand(band) => {
                self.state.tuner.band = Some(band);
                self.resolve_zones();
            }
            Fragment::TunerMode { auto } => {
                self.state.tuner.auto_mode = auto;
            }
            Fragment::TunerPreset(slot) => {
                self.state.tuner.preset_slot = slot;
                self.state.tuner.preset_name = slot
                    .and_then(|s| self.state.presets.get(&s))
                    .map(|p| p.name.clone());
                self.resolve_zones();
            }
            Fragment::PresetDetail {
                slot,
                name,
                frequency,
            } => {
                self.upsert_preset(slot, name, frequency);
                self.rebuild_inputs();
            }
            Fragment::RenameEntry { source, label } => {
                match self.renames.iter_mut().find(|(s, _)| *s == source) {
                    Some(entry) => entry.1 = label,
                    None => self.renames.push((source, label)),
                }
                self.rebuild_inputs();
            }
            Fragment::HideEntry { source, hidden } => {
                if hidden {
                    if !self.hidden.contains(&source) {
                        self.hidden.push(source);
                    }
                } else {
                    self.hidden.retain(|s| *s != source);
                }
                self.rebuild_inputs();
            }
            Fragment::Firmware(version) => {
                self.state.info.firmware = version;
            }
            Fragment::DisplayMode(mode) => {
                // The toggle re-renders stored volume for every zone, not
                // just the one the telegram came in on.
                for zone in &mut self.state.zones {
                    zone.volume_display = mode;
                }
            }
        }
    }

    fn upsert_preset(&mut self, slot: PresetSlot, name: String, frequency: f64) {
        if name.is_empty() && frequency == 0.0 {
            self.state.presets.remove(&slot);
            return;
        }
        // FM frequencies come over the wire in MHz (87.5..108), AM in kHz.
        let band = if frequency < 200.0 { Band::Fm } else { Band::Am };
        self.state.presets.insert(
            slot,
            Preset {
                slot,
                band,
                name,
                frequency,
            },
        );
    }

    /// Rebuild the canonical input list from the rename table, the hide
    /// table and the preset table.
    pub fn rebuild_inputs(&mut self) {
        let mut inputs = Vec::new();

        for (name, label) in &self.renames {
            let Some(input_type) = input_type_of(name) else {
                continue;
            };
            let label = if label.is_empty() {
                name.clone()
            } else {
                label.clone()
            };
            inputs.push(Input {
                key: name.clone(),
                title: name.clone(),
                label,
                input_type,
                hidden: self.hidden.contains(name),
                can_hide: true,
                can_rename: true,
            });
        }

        for band in SUPPORTED_BANDS {
            inputs.push(Input {
                key: tuner_key(*band),
                title: "TUNER".to_string(),
                label: format!("Tuner {}", band.token()),
                input_type: InputType::Tuner,
                hidden: false,
                can_hide: false,
                can_rename: false,
            });
        }

        for preset in self.state.presets.values() {
            let label = if preset.name.is_empty() {
                format!("Preset {}", preset.slot)
            } else {
                preset.name.clone()
            };
            inputs.push(Input {
                key: preset_key(preset.slot),
                title: label.clone(),
                label,
                input_type: InputType::Preset,
                hidden: false,
                can_hide: false,
                can_rename: true,
            });
        }

        self.state.inputs = inputs;
        self.resolve_zones();
    }

    /// Re-run active-input resolution for every zone. Main zone first so
    /// follow-main zones see its result.
    fn resolve_zones(&mut self) {
        let main = self.resolve_one(1);
        if let Some(z) = self.state.zone_mut(1) {
            (z.input, z.source) = main.clone();
        }
        let secondary: Vec<ZoneId> = self
            .state
            .zones
            .iter()
            .map(|z| z.index)
            .filter(|i| *i != 1)
            .collect();
        for index in secondary {
            let resolved = {
                let zone = self.state.zone(index);
                let raw = zone.and_then(|z| z.raw_source.clone());
                match raw.as_deref() {
                    None | Some("") | Some("SOURCE") => main.clone(),
                    Some(raw) => self.resolve_source(raw),
                }
            };
            if let Some(z) = self.state.zone_mut(index) {
                (z.input, z.source) = resolved;
            }
        }
    }

    fn resolve_one(&self, index: ZoneId) -> (Option<String>, Option<String>) {
        let raw = self
            .state
            .zone(index)
            .and_then(|z| z.raw_source.as_deref());
        match raw {
            None | Some("") => (None, None),
            Some(raw) => self.resolve_source(raw),
        }
    }

    /// Match a reported source against the canonical input keys, returning
    /// (active input key, secondary source key). Keys are matched whole;
    /// canonical names like `MEDIA PLAYER` contain spaces.
    fn resolve_source(&self, raw: &str) -> (Option<String>, Option<String>) {
        let raw = raw.trim();

        if raw == "TUNER" || raw.starts_with("TUNER ") {
            let band = self.state.tuner.band.unwrap_or(Band::Fm);
            let input = Some(tuner_key(band));
            let source = self.state.tuner.preset_slot.map(preset_key);
            return (input, source);
        }

        // AirPlay sessions report themselves as a distinct source but play
        // through the network input.
        let key = if raw == "AIRPLAY" { "NETWORK" } else { raw };

        let matched = self
            .state
            .inputs
            .iter()
            .find(|i| i.key == key)
            .map(|i| i.key.clone());
        (matched, None)
    }
}

//! Intent-to-telegram encoding.
//!
//! The main zone is addressed with the short historical prefixes (`ZM`,
//! `MV`, `MU`, `SI`); secondary zones use `Z<N>` compound prefixes. Some
//! intents expand into a short command sequence (tuner and preset
//! selection); some expand into nothing at all when the target input's
//! capability flags forbid the operation, in which case only the override
//! cache is updated by the caller.

use crate::telegram::{denormalize_source, encode_volume_code, quantize_steps};
use crate::types::{DeviceState, InputType, ZoneId};

/// A remote-control key forwarded to the device's menu system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
    Info,
    Options,
    MenuOn,
    MenuOff,
}

impl RemoteKey {
    fn telegram(self) -> &'static str {
        match self {
            RemoteKey::Up => "MNCUP",
            RemoteKey::Down => "MNCDN",
            RemoteKey::Left => "MNCLT",
            RemoteKey::Right => "MNCRT",
            RemoteKey::Enter => "MNENT",
            RemoteKey::Back => "MNRTN",
            RemoteKey::Info => "MNINF",
            RemoteKey::Options => "MNOPT",
            RemoteKey::MenuOn => "MNMEN ON",
            RemoteKey::MenuOff => "MNMEN OFF",
        }
    }
}

/// A high-level intent from the collaborator layer
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Power { zone: ZoneId, on: bool },
    Mute { zone: ZoneId, on: bool },
    /// Volume in device steps; snapped to the 0.5 grid before encoding
    Volume { zone: ZoneId, steps: f64 },
    SelectInput { zone: ZoneId, key: String },
    RenameInput { key: String, label: String },
    HideInput { key: String, hidden: bool },
    Remote(RemoteKey),
}

fn power_prefix(zone: ZoneId) -> String {
    if zone == 1 {
        "ZM".to_string()
    } else {
        format!("Z{zone}")
    }
}

fn select_prefix(zone: ZoneId) -> String {
    if zone == 1 {
        "SI".to_string()
    } else {
        format!("Z{zone}")
    }
}

/// Encode an intent into zero or more wire telegrams, in send order.
///
/// An empty result is not an error: rename/hide against an input whose
/// capability flags forbid it encodes to nothing, and the caller keeps the
/// change local.
pub fn encode(intent: &Intent, state: &DeviceState) -> Vec<String> {
    match intent {
        Intent::Power { zone, on } => {
            vec![format!(
                "{}{}",
                power_prefix(*zone),
                if *on { "ON" } else { "OFF" }
            )]
        }
        Intent::Mute { zone, on } => {
            let flag = if *on { "MUON" } else { "MUOFF" };
            if *zone == 1 {
                vec![flag.to_string()]
            } else {
                vec![format!("Z{zone}{flag}")]
            }
        }
        Intent::Volume { zone, steps } => {
            let steps = quantize_steps(steps.clamp(0.0, 98.0));
            if *zone == 1 {
                vec![format!("MV{}", encode_volume_code(steps))]
            } else {
                // Secondary zones only take whole steps
                vec![format!("Z{zone}{:02}", steps.round() as u32)]
            }
        }
        Intent::SelectInput { zone, key } => encode_select(*zone, key, state),
        Intent::RenameInput { key, label } => encode_rename(key, label, state),
        Intent::HideInput { key, hidden } => encode_hide(key, *hidden, state),
        Intent::Remote(key) => vec![key.telegram().to_string()],
    }
}

fn encode_select(zone: ZoneId, key: &str, state: &DeviceState) -> Vec<String> {
    let tuner = format!("{}TUNER", select_prefix(zone));

    if let Some(band) = key.strip_prefix("TUNER") {
        return vec![tuner, format!("TMAN{band}")];
    }

    if let Some(slot) = key
        .strip_prefix("PRESET")
        .and_then(|s| s.parse::<u8>().ok())
    {
        let band = state
            .presets
            .get(&slot)
            .map(|p| p.band.token())
            .unwrap_or("FM");
        return vec![tuner, format!("TMAN{band}"), format!("TPAN{slot:02}")];
    }

    vec![format!(
        "{}{}",
        select_prefix(zone),
        denormalize_source(key)
    )]
}

fn encode_rename(key: &str, label: &str, state: &DeviceState) -> Vec<String> {
    let Some(input) = state.input(key) else {
        return Vec::new();
    };
    if !input.can_rename {
        return Vec::new();
    }
    if input.input_type == InputType::Preset {
        // Presets are slot-addressed with a fixed-width name field
        let Some(slot) = key.strip_prefix("PRESET").and_then(|s| s.parse::<u8>().ok())
        else {
            return Vec::new();
        };
        // 8-byte name field; cut on a char boundary
        let mut name = String::new();
        for c in label.chars() {
            if name.len() + c.len_utf8() > 8 {
                break;
            }
            name.push(c);
        }
        let pad = 8 - name.len();
        return vec![format!("OPTPN{slot:02}{name}{:pad$}", "")];
    }
    vec![format!("SSFUN{} {label}", denormalize_source(key))]
}

fn encode_hide(key: &str, hidden: bool, state: &DeviceState) -> Vec<String> {
    let Some(input) = state.input(key) else {
        return Vec::new();
    };
    if !input.can_hide {
        return Vec::new();
    }
    vec![format!(
        "SSSOD{} {}",
        denormalize_source(key),
        if hidden { "DEL" } else { "USE" }
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateNormalizer;
    use crate::telegram::decode_line;
    use crate::types::{DeviceInfo, DeviceState};

    fn state_with_inputs() -> DeviceState {
        let base = DeviceState::new(
            DeviceInfo {
                mac: "0005CD123456".into(),
                serial: String::new(),
                firmware: String::new(),
                friendly_name: String::new(),
                model: String::new(),
                zone_count: 2,
            },
            "10.0.0.2".into(),
        );
        let mut n = StateNormalizer::new(base);
        for line in [
            "SSFUNBD Player",
            "SSFUNSAT/CBL Set Top Box",
            "OPTPN03POP ROCK010790",
        ] {
            n.apply(decode_line(line).unwrap());
        }
        n.state().clone()
    }

    #[test]
    fn main_zone_uses_short_prefixes() {
        let state = state_with_inputs();
        assert_eq!(
            encode(&Intent::Power { zone: 1, on: true }, &state),
            vec!["ZMON"]
        );
        assert_eq!(
            encode(&Intent::Mute { zone: 1, on: false }, &state),
            vec!["MUOFF"]
        );
        assert_eq!(
            encode(
                &Intent::Volume {
                    zone: 1,
                    steps: 45.5
                },
                &state
            ),
            vec!["MV455"]
        );
    }

    #[test]
    fn secondary_zone_uses_compound_prefixes() {
        let state = state_with_inputs();
        assert_eq!(
            encode(&Intent::Power { zone: 2, on: false }, &state),
            vec!["Z2OFF"]
        );
        assert_eq!(
            encode(&Intent::Mute { zone: 2, on: true }, &state),
            vec!["Z2MUON"]
        );
        assert_eq!(
            encode(
                &Intent::Volume {
                    zone: 2,
                    steps: 40.0
                },
                &state
            ),
            vec!["Z240"]
        );
    }

    #[test]
    fn plain_input_select_is_one_command_with_vendor_token() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::SelectInput {
                    zone: 1,
                    key: "BLU-RAY".into()
                },
                &state
            ),
            vec!["SIBD"]
        );
        assert_eq!(
            encode(
                &Intent::SelectInput {
                    zone: 2,
                    key: "CBL/SAT".into()
                },
                &state
            ),
            vec!["Z2SAT/CBL"]
        );
    }

    #[test]
    fn tuner_select_is_a_two_command_sequence() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::SelectInput {
                    zone: 1,
                    key: "TUNERFM".into()
                },
                &state
            ),
            vec!["SITUNER", "TMANFM"]
        );
    }

    #[test]
    fn preset_select_is_a_three_command_sequence() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::SelectInput {
                    zone: 1,
                    key: "PRESET03".into()
                },
                &state
            ),
            vec!["SITUNER", "TMANFM", "TPAN03"]
        );
    }

    #[test]
    fn rename_is_name_addressed_for_inputs_and_slot_addressed_for_presets() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::RenameInput {
                    key: "BLU-RAY".into(),
                    label: "Movies".into()
                },
                &state
            ),
            vec!["SSFUNBD Movies"]
        );
        assert_eq!(
            encode(
                &Intent::RenameInput {
                    key: "PRESET03".into(),
                    label: "Jazz".into()
                },
                &state
            ),
            vec!["OPTPN03Jazz    "]
        );
    }

    #[test]
    fn preset_rename_cuts_multibyte_labels_on_char_boundaries() {
        let state = state_with_inputs();
        // byte 8 falls inside the last 'é'; it is dropped, not split
        assert_eq!(
            encode(
                &Intent::RenameInput {
                    key: "PRESET03".into(),
                    label: "aéééé".into()
                },
                &state
            ),
            vec!["OPTPN03aééé "]
        );
    }

    #[test]
    fn capability_flags_gate_rename_and_hide() {
        let state = state_with_inputs();
        // Tuner inputs can neither be renamed nor hidden on the wire
        assert!(encode(
            &Intent::RenameInput {
                key: "TUNERFM".into(),
                label: "Radio".into()
            },
            &state
        )
        .is_empty());
        assert!(encode(
            &Intent::HideInput {
                key: "PRESET03".into(),
                hidden: true
            },
            &state
        )
        .is_empty());
    }

    #[test]
    fn hide_uses_the_delete_table_vocabulary() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::HideInput {
                    key: "CBL/SAT".into(),
                    hidden: true
                },
                &state
            ),
            vec!["SSSODSAT/CBL DEL"]
        );
        assert_eq!(
            encode(
                &Intent::HideInput {
                    key: "CBL/SAT".into(),
                    hidden: false
                },
                &state
            ),
            vec!["SSSODSAT/CBL USE"]
        );
    }

    #[test]
    fn remote_keys_pass_through() {
        let state = state_with_inputs();
        assert_eq!(
            encode(&Intent::Remote(RemoteKey::Enter), &state),
            vec!["MNENT"]
        );
        assert_eq!(
            encode(&Intent::Remote(RemoteKey::MenuOn), &state),
            vec!["MNMEN ON"]
        );
    }

    #[test]
    fn volume_is_clamped_and_quantized() {
        let state = state_with_inputs();
        assert_eq!(
            encode(
                &Intent::Volume {
                    zone: 1,
                    steps: 120.0
                },
                &state
            ),
            vec!["MV98"]
        );
        assert_eq!(
            encode(
                &Intent::Volume {
                    zone: 1,
                    steps: 45.3
                },
                &state
            ),
            vec!["MV455"]
        );
    }
}

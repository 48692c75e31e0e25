//! Telegram decoding for the receiver's line protocol.
//!
//! The receiver speaks a terse ASCII protocol: every status change arrives as
//! one carriage-return-terminated line ("telegram") such as `MV455`, `Z2ON`
//! or `SSFUNBD Blu-ray Player`. This module splits the inbound byte stream
//! into lines, matches each line against an ordered prefix table and turns it
//! into a typed [`Fragment`] for the state normalizer.
//!
//! Prefixes overlap (`MVMAX` contains `MV`, `SSINFFRM` shares the `SS` family
//! namespace), so the table is evaluated longest first. Lines that match no
//! prefix are ignored; newer firmware emits telegrams we do not know about.

use crate::types::{Band, PresetSlot, VolumeDisplay, ZoneId};

/// One decoded status telegram
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// `PWON` / `PWSTANDBY` whole-device power
    DevicePower(bool),
    /// `ZMON` / `Z2ON` zone power
    ZonePower { zone: ZoneId, on: bool },
    /// `MUON` / `Z2MUON` zone mute
    ZoneMute { zone: ZoneId, on: bool },
    /// `MV455` / `Z240` zone volume; `None` is the `--` unknown sentinel
    ZoneVolume { zone: ZoneId, steps: Option<f64> },
    /// `MVMAX 80` volume ceiling
    VolumeMax(f64),
    /// `R1MAIN ZONE ` fixed-width zone name
    ZoneName { zone: ZoneId, name: String },
    /// `SIBD` / `Z2SAT/CBL` active source, alias-normalized
    ZoneSource { zone: ZoneId, source: String },
    /// `Z2SOURCE`: the zone follows the main zone's source
    ZoneFollowMain { zone: ZoneId },
    /// `TFAN010790` frequency, wire integer / 100
    TunerFrequency(f64),
    /// `TMANAM` / `TMANFM`
    TunerBand(Band),
    /// `TMANAUTO` / `TMANMANUAL`
    TunerMode { auto: bool },
    /// `TPAN03`; `--`/`OFF` clears the slot
    TunerPreset(Option<PresetSlot>),
    /// `OPTPN03POP ROCK 010790` packed preset table entry
    PresetDetail {
        slot: PresetSlot,
        name: String,
        frequency: f64,
    },
    /// `SSFUNBD Blu-ray Player` rename table entry
    RenameEntry { source: String, label: String },
    /// `SSSODBD USE` / `SSSODBD DEL` hide table entry
    HideEntry { source: String, hidden: bool },
    /// `SSINFFRM 1234-5678-0000` firmware version
    Firmware(String),
    /// `SSVCTZMADIS ABS` / `REL`; re-renders volume for all zones
    DisplayMode(VolumeDisplay),
}

/// Known command prefixes, most specific first. Order matters: `MVMAX` must
/// be tested before `MV`, the `SS`-family telegrams before anything that
/// could shadow them.
const PREFIXES: &[&str] = &[
    "SSVCTZMADIS",
    "SSINFFRM",
    "SSFUN",
    "SSSOD",
    "OPTPN",
    "MVMAX",
    "TFAN",
    "TMAN",
    "TPAN",
    "MV",
    "MU",
    "PW",
    "ZM",
    "R1",
    "R2",
    "R3",
    "Z2",
    "Z3",
    "SI",
];

/// Decode one telegram line. Returns `None` for unknown or table-terminator
/// lines; those are not errors.
pub fn decode_line(line: &str) -> Option<Fragment> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    let (prefix, rest) = PREFIXES
        .iter()
        .find_map(|p| line.strip_prefix(p).map(|rest| (*p, rest)))?;

    match prefix {
        "PW" => match rest {
            "ON" => Some(Fragment::DevicePower(true)),
            "STANDBY" => Some(Fragment::DevicePower(false)),
            _ => None,
        },
        "ZM" => on_off(rest).map(|on| Fragment::ZonePower { zone: 1, on }),
        "MU" => on_off(rest).map(|on| Fragment::ZoneMute { zone: 1, on }),
        "MVMAX" => decode_volume_code(rest.trim_start())?.map(Fragment::VolumeMax),
        "MV" => decode_volume_code(rest).map(|steps| Fragment::ZoneVolume { zone: 1, steps }),
        "SI" => Some(Fragment::ZoneSource {
            zone: 1,
            source: normalize_source(rest),
        }),
        "R1" | "R2" | "R3" => {
            let zone = prefix.as_bytes()[1] - b'0';
            Some(Fragment::ZoneName {
                zone,
                name: rest.trim_end().to_string(),
            })
        }
        "Z2" | "Z3" => decode_zone_compound(prefix.as_bytes()[1] - b'0', rest),
        "TFAN" => {
            let raw: u32 = rest.trim().parse().ok()?;
            Some(Fragment::TunerFrequency(f64::from(raw) / 100.0))
        }
        "TMAN" => match rest {
            "AUTO" => Some(Fragment::TunerMode { auto: true }),
            "MANUAL" => Some(Fragment::TunerMode { auto: false }),
            band => Band::from_token(band).map(Fragment::TunerBand),
        },
        "TPAN" => match rest {
            "--" | "OFF" => Some(Fragment::TunerPreset(None)),
            digits => digits
                .trim()
                .parse::<PresetSlot>()
                .ok()
                .map(|slot| Fragment::TunerPreset(Some(slot))),
        },
        "OPTPN" => decode_preset_detail(rest),
        "SSFUN" => {
            let rest = rest.trim_start();
            if rest == "END" {
                return None;
            }
            let (source, label) = rest.split_once(' ')?;
            Some(Fragment::RenameEntry {
                source: normalize_source(source),
                label: label.trim().to_string(),
            })
        }
        "SSSOD" => {
            let rest = rest.trim_start();
            if rest == "END" {
                return None;
            }
            let (source, flag) = rest.split_once(' ')?;
            let hidden = match flag.trim() {
                "DEL" => true,
                "USE" => false,
                _ => return None,
            };
            Some(Fragment::HideEntry {
                source: normalize_source(source),
                hidden,
            })
        }
        "SSINFFRM" => Some(Fragment::Firmware(rest.trim().to_string())),
        "SSVCTZMADIS" => match rest.trim() {
            "ABS" => Some(Fragment::DisplayMode(VolumeDisplay::Absolute)),
            "REL" => Some(Fragment::DisplayMode(VolumeDisplay::Relative)),
            _ => None,
        },
        _ => None,
    }
}

fn on_off(rest: &str) -> Option<bool> {
    match rest {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

/// Secondary zones pack power, mute, volume and source selection under one
/// zone prefix; the remainder disambiguates.
fn decode_zone_compound(zone: ZoneId, rest: &str) -> Option<Fragment> {
    match rest {
        "ON" => return Some(Fragment::ZonePower { zone, on: true }),
        "OFF" => return Some(Fragment::ZonePower { zone, on: false }),
        "MUON" => return Some(Fragment::ZoneMute { zone, on: true }),
        "MUOFF" => return Some(Fragment::ZoneMute { zone, on: false }),
        "SOURCE" => return Some(Fragment::ZoneFollowMain { zone }),
        _ => {}
    }
    if (2..=3).contains(&rest.len()) && rest.bytes().all(|b| b.is_ascii_digit())
        || rest == "--"
    {
        return decode_volume_code(rest).map(|steps| Fragment::ZoneVolume { zone, steps });
    }
    Some(Fragment::ZoneSource {
        zone,
        source: normalize_source(rest),
    })
}

/// `OPTPN` remainder: 2-digit slot, 8-char space-padded station name, then
/// the frequency digits.
fn decode_preset_detail(rest: &str) -> Option<Fragment> {
    if rest.len() < 2 {
        return None;
    }
    let slot: PresetSlot = rest.get(..2)?.parse().ok()?;
    let payload = rest.get(2..)?;
    let name = payload.get(..8).unwrap_or(payload).trim_end().to_string();
    let freq_digits = payload.get(8..).unwrap_or("").trim();
    let frequency = freq_digits
        .parse::<u32>()
        .map(|raw| f64::from(raw) / 100.0)
        .unwrap_or(0.0);
    Some(Fragment::PresetDetail {
        slot,
        name,
        frequency,
    })
}

// ---------------------------------------------------------------------------
// Volume scale
// ---------------------------------------------------------------------------

/// Offset between step scale and raw dB: step 0 is -79.5 dB.
pub const VOLUME_DB_OFFSET: f64 = 79.5;

/// Decode a 2-3 digit volume code into whole or half steps. A 2-digit code
/// is whole steps (`45` = 45.0); a third digit scales by ten (`455` = 45.5).
/// The `--` sentinel (mute floor / unknown) decodes to `None`.
pub fn decode_volume_code(code: &str) -> Option<Option<f64>> {
    if code == "--" {
        return Some(None);
    }
    if code.is_empty() || code.len() > 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let raw: u32 = code.parse().ok()?;
    let steps = if code.len() == 3 {
        f64::from(raw) / 10.0
    } else {
        f64::from(raw)
    };
    Some(Some(steps))
}

/// Encode steps back into the wire code. Whole steps use two digits, half
/// steps use three.
pub fn encode_volume_code(steps: f64) -> String {
    let steps = quantize_steps(steps);
    if (steps.fract()).abs() < f64::EPSILON {
        format!("{:02}", steps as u32)
    } else {
        format!("{:03}", (steps * 10.0).round() as u32)
    }
}

/// Snap a step value to the device's 0.5 grid, ties to even.
pub fn quantize_steps(steps: f64) -> f64 {
    (steps * 2.0).round_ties_even() / 2.0
}

pub fn steps_to_db(steps: f64) -> f64 {
    ((steps - VOLUME_DB_OFFSET) * 10.0).round() / 10.0
}

pub fn db_to_steps(db: f64) -> f64 {
    ((db + VOLUME_DB_OFFSET) * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Source aliases
// ---------------------------------------------------------------------------

/// Vendor short names that differ from the canonical input key. `SAT/CBL`
/// and `CBL/SAT` are the same physical input spelled differently across
/// model years; the canonical key is `CBL/SAT`.
const ALIASES: &[(&str, &str)] = &[
    ("BD", "BLU-RAY"),
    ("MPLAY", "MEDIA PLAYER"),
    ("NET", "NETWORK"),
    ("BT", "BLUETOOTH"),
    ("USB/IPOD", "IPOD/USB"),
    ("TV", "TV AUDIO"),
    ("SAT/CBL", "CBL/SAT"),
];

/// Normalize a vendor-reported source token to the canonical input key.
pub fn normalize_source(raw: &str) -> String {
    let raw = raw.trim();
    for (vendor, canonical) in ALIASES {
        if raw == *vendor {
            return (*canonical).to_string();
        }
    }
    raw.to_string()
}

/// Map a canonical input key back to the token the wire vocabulary expects.
pub fn denormalize_source(canonical: &str) -> String {
    for (vendor, c) in ALIASES {
        if canonical == *c {
            return (*vendor).to_string();
        }
    }
    canonical.to_string()
}

// ---------------------------------------------------------------------------
// Line demultiplexing
// ---------------------------------------------------------------------------

/// Reassembles telegram lines from an arbitrary byte stream.
///
/// A single socket read may carry zero, one or several complete telegrams,
/// and a telegram may span reads. Bytes are buffered until a terminator
/// (`\r`, with optional trailing `\n`) arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes in, get every newly completed line out.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_telegram_455_decodes_to_half_step() {
        let frag = decode_line("MV455").unwrap();
        assert_eq!(
            frag,
            Fragment::ZoneVolume {
                zone: 1,
                steps: Some(45.5)
            }
        );
        assert_eq!(steps_to_db(45.5), -34.0);
    }

    #[test]
    fn volume_scale_is_invertible_over_full_range() {
        let mut db = -79.5;
        while db <= 18.0 {
            let steps = db_to_steps(db);
            assert_eq!(steps_to_db(steps), (db * 10.0).round() / 10.0);
            db += 0.1;
        }
    }

    #[test]
    fn volume_sentinel_decodes_to_unknown() {
        assert_eq!(
            decode_line("MV--"),
            Some(Fragment::ZoneVolume {
                zone: 1,
                steps: None
            })
        );
    }

    #[test]
    fn volume_code_round_trips() {
        assert_eq!(encode_volume_code(45.5), "455");
        assert_eq!(encode_volume_code(45.0), "45");
        assert_eq!(encode_volume_code(5.0), "05");
        assert_eq!(encode_volume_code(5.5), "055");
        assert_eq!(decode_volume_code("055"), Some(Some(5.5)));
    }

    #[test]
    fn mvmax_is_matched_before_mv() {
        assert_eq!(decode_line("MVMAX 80"), Some(Fragment::VolumeMax(80.0)));
    }

    #[test]
    fn firmware_prefix_is_matched_before_shorter_family_prefixes() {
        assert_eq!(
            decode_line("SSINFFRM 4700-2061-7080"),
            Some(Fragment::Firmware("4700-2061-7080".to_string()))
        );
    }

    #[test]
    fn zone_compound_remainders_disambiguate() {
        assert_eq!(
            decode_line("Z2ON"),
            Some(Fragment::ZonePower { zone: 2, on: true })
        );
        assert_eq!(
            decode_line("Z2MUOFF"),
            Some(Fragment::ZoneMute {
                zone: 2,
                on: false
            })
        );
        assert_eq!(
            decode_line("Z240"),
            Some(Fragment::ZoneVolume {
                zone: 2,
                steps: Some(40.0)
            })
        );
        assert_eq!(
            decode_line("Z2SOURCE"),
            Some(Fragment::ZoneFollowMain { zone: 2 })
        );
        assert_eq!(
            decode_line("Z2BD"),
            Some(Fragment::ZoneSource {
                zone: 2,
                source: "BLU-RAY".to_string()
            })
        );
    }

    #[test]
    fn aliases_normalize_in_rename_path() {
        for (vendor, canonical) in ALIASES {
            let line = format!("SSFUN{vendor} My Label");
            assert_eq!(
                decode_line(&line),
                Some(Fragment::RenameEntry {
                    source: (*canonical).to_string(),
                    label: "My Label".to_string()
                }),
                "rename alias failed for {vendor}"
            );
        }
    }

    #[test]
    fn aliases_normalize_in_hide_path() {
        for (vendor, canonical) in ALIASES {
            let line = format!("SSSOD{vendor} DEL");
            assert_eq!(
                decode_line(&line),
                Some(Fragment::HideEntry {
                    source: (*canonical).to_string(),
                    hidden: true
                }),
                "hide alias failed for {vendor}"
            );
            let line = format!("SSSOD{vendor} USE");
            assert_eq!(
                decode_line(&line),
                Some(Fragment::HideEntry {
                    source: (*canonical).to_string(),
                    hidden: false
                })
            );
        }
    }

    #[test]
    fn table_terminators_are_ignored() {
        assert_eq!(decode_line("SSFUN END"), None);
        assert_eq!(decode_line("SSSOD END"), None);
    }

    #[test]
    fn tuner_telegrams_decode() {
        assert_eq!(
            decode_line("TFAN010790"),
            Some(Fragment::TunerFrequency(107.90))
        );
        assert_eq!(decode_line("TMANFM"), Some(Fragment::TunerBand(Band::Fm)));
        assert_eq!(
            decode_line("TMANAUTO"),
            Some(Fragment::TunerMode { auto: true })
        );
        assert_eq!(decode_line("TPAN03"), Some(Fragment::TunerPreset(Some(3))));
        assert_eq!(decode_line("TPAN--"), Some(Fragment::TunerPreset(None)));
    }

    #[test]
    fn preset_detail_unpacks_slot_name_frequency() {
        assert_eq!(
            decode_line("OPTPN03POP ROCK010790"),
            Some(Fragment::PresetDetail {
                slot: 3,
                name: "POP ROCK".to_string(),
                frequency: 107.90
            })
        );
        // Blank name, padded
        assert_eq!(
            decode_line("OPTPN12        008830"),
            Some(Fragment::PresetDetail {
                slot: 12,
                name: String::new(),
                frequency: 88.30
            })
        );
    }

    #[test]
    fn zone_name_trims_fixed_width_padding() {
        assert_eq!(
            decode_line("R1MAIN ZONE "),
            Some(Fragment::ZoneName {
                zone: 1,
                name: "MAIN ZONE".to_string()
            })
        );
    }

    #[test]
    fn unknown_lines_are_ignored() {
        assert_eq!(decode_line("XYZZY42"), None);
        assert_eq!(decode_line(""), None);
        assert_eq!(decode_line("CVFL 50"), None);
    }

    #[test]
    fn display_mode_toggles_decode() {
        assert_eq!(
            decode_line("SSVCTZMADIS REL"),
            Some(Fragment::DisplayMode(VolumeDisplay::Relative))
        );
        assert_eq!(
            decode_line("SSVCTZMADIS ABS"),
            Some(Fragment::DisplayMode(VolumeDisplay::Absolute))
        );
    }

    #[test]
    fn one_read_with_two_telegrams_yields_two_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"MV455\rMUOFF\r");
        assert_eq!(lines, vec!["MV455", "MUOFF"]);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"MV4").is_empty());
        assert!(buf.push(b"5").is_empty());
        assert_eq!(buf.push(b"5\rZM"), vec!["MV455"]);
        assert_eq!(buf.push(b"ON\r"), vec!["ZMON"]);
    }

    #[test]
    fn crlf_terminators_do_not_produce_empty_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"PWON\r\nZMON\r\n"), vec!["PWON", "ZMON"]);
    }
}

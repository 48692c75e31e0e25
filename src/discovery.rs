//! Network discovery and descriptor fetch.
//!
//! Receivers announce themselves over SSDP. `discover()` multicasts three
//! search variants, collects responder addresses for a fixed window, then
//! pulls a descriptor bundle from each address over HTTP: the UPnP device
//! descriptor, the extended device-info document, a bulk status query and
//! the tuner preset table. Statically configured addresses skip the
//! multicast step entirely.
//!
//! Nothing in here raises to the caller: a candidate URL that fails is
//! logged and skipped, an address that never produces a usable bundle is
//! simply absent from the result.

use crate::telegram::{db_to_steps, normalize_source, Fragment};
use crate::types::{Band, DeviceInfo, Preset, PresetSlot, ZoneId};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

const SSDP_ADDR: &str = "239.255.255.250:1900";

/// Search-target variants sent per scan: generic, root device, and the
/// media-renderer service the receivers actually advertise.
const SEARCH_TARGETS: &[&str] = &[
    "ssdp:all",
    "upnp:rootdevice",
    "urn:schemas-upnp-org:device:MediaRenderer:1",
];

/// Candidate (port, path) pairs for the device descriptor, tried in order.
/// Which one answers depends on model year.
const DESCRIPTOR_CANDIDATES: &[(Option<u16>, &str)] = &[
    (Some(60006), "/upnp/desc/aios_device/aios_device.xml"),
    (Some(8080), "/description.xml"),
    (None, "/description.xml"),
    (Some(49154), "/description.xml"),
];

/// How long each multicast scan collects replies
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(10);

/// One receiver found during a scan, with everything needed to register it
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub address: String,
    pub info: DeviceInfo,
    /// Bulk status converted into decoder fragments
    pub status: Vec<Fragment>,
    pub presets: Vec<Preset>,
}

/// Run one discovery pass: multicast scan plus any statically configured
/// addresses, then a descriptor fetch per address. Never errors; an address
/// that yields no usable bundle is dropped with a log line.
pub async fn discover(
    http: &reqwest::Client,
    static_addresses: &[String],
    window: Duration,
) -> Vec<DiscoveredDevice> {
    let mut addresses: Vec<String> = static_addresses.to_vec();
    if static_addresses.is_empty() {
        addresses = ssdp_search(window).await;
    }

    let mut devices = Vec::new();
    for address in addresses {
        match fetch_bundle(http, &address).await {
            Some(device) => devices.push(device),
            None => tracing::debug!("No usable descriptor bundle from {}", address),
        }
    }
    devices
}

/// Multicast the search variants and collect responder IPs for the window.
async fn ssdp_search(window: Duration) -> Vec<String> {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Failed to bind discovery socket: {}", e);
            return Vec::new();
        }
    };

    for st in SEARCH_TARGETS {
        let msg = format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {SSDP_ADDR}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 5\r\n\
             ST: {st}\r\n\r\n"
        );
        if let Err(e) = socket.send_to(msg.as_bytes(), SSDP_ADDR).await {
            tracing::warn!("SSDP search send failed: {}", e);
        }
    }

    let deadline = Instant::now() + window;
    let mut buf = [0u8; 2048];
    let mut addresses: Vec<String> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((_, peer))) => {
                let ip = peer.ip().to_string();
                if !addresses.contains(&ip) {
                    tracing::debug!("SSDP reply from {}", ip);
                    addresses.push(ip);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("SSDP receive error: {}", e);
                break;
            }
            // Window elapsed; not an error
            Err(_) => break,
        }
    }

    tracing::info!("Discovery window closed, {} responder(s)", addresses.len());
    addresses
}

/// Fetch the full descriptor bundle for one address. The device descriptor
/// and device-info documents are required; bulk status and presets are
/// best-effort.
async fn fetch_bundle(http: &reqwest::Client, address: &str) -> Option<DiscoveredDevice> {
    let (friendly_name, model) = fetch_descriptor(http, address).await?;

    let info_url = format!("http://{address}/goform/Deviceinfo.xml");
    let info_xml = get_text(http, &info_url).await?;
    let mut info = match parse_device_info(&info_xml) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Skipping {}: {}", address, e);
            return None;
        }
    };
    if !friendly_name.is_empty() {
        info.friendly_name = friendly_name;
    }
    if info.model.is_empty() {
        info.model = model;
    }

    let status_url = format!("http://{address}/goform/AppCommand.xml");
    let status = match http
        .post(&status_url)
        .header("Content-Type", "text/xml")
        .body(bulk_status_body())
        .send()
        .await
    {
        Ok(resp) => match resp.text().await {
            Ok(body) => parse_bulk_status(&body),
            Err(e) => {
                tracing::debug!("Bulk status body from {} unreadable: {}", address, e);
                Vec::new()
            }
        },
        Err(e) => {
            tracing::debug!("Bulk status query to {} failed: {}", address, e);
            Vec::new()
        }
    };

    let preset_url = format!("http://{address}/goform/formiPhoneAppTunerPreset.xml");
    let presets = match get_text(http, &preset_url).await {
        Some(xml) => parse_tuner_presets(&xml),
        None => Vec::new(),
    };

    Some(DiscoveredDevice {
        address: address.to_string(),
        info,
        status,
        presets,
    })
}

/// Try the descriptor candidates in order; returns (friendly name, model).
async fn fetch_descriptor(http: &reqwest::Client, address: &str) -> Option<(String, String)> {
    for (port, path) in DESCRIPTOR_CANDIDATES {
        let url = match port {
            Some(port) => format!("http://{address}:{port}{path}"),
            None => format!("http://{address}{path}"),
        };
        let Some(xml) = get_text(http, &url).await else {
            continue;
        };
        match parse_device_descriptor(&xml) {
            Ok(parsed) => return Some(parsed),
            Err(e) => tracing::debug!("Descriptor at {} rejected: {}", url, e),
        }
    }
    None
}

async fn get_text(http: &reqwest::Client, url: &str) -> Option<String> {
    match http.get(url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::debug!("Body of {} unreadable: {}", url, e);
                None
            }
        },
        Ok(resp) => {
            tracing::debug!("{} answered {}", url, resp.status());
            None
        }
        Err(e) => {
            tracing::debug!("GET {} failed: {}", url, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// XML parsing: tag-trimming, single-value mode
// ---------------------------------------------------------------------------

/// First element with the given local tag name anywhere in the document,
/// text trimmed. Matching ignores namespaces: the UPnP descriptor declares
/// one, the goform documents do not. The documents never repeat the tags we
/// care about.
fn xml_text(doc: &roxmltree::Document, tag: &str) -> Option<String> {
    doc.descendants()
        .find(|n| n.tag_name().name() == tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

/// Parse the UPnP device descriptor into (friendly name, model).
pub(crate) fn parse_device_descriptor(xml: &str) -> crate::error::Result<(String, String)> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| crate::error::AvrError::MalformedDescriptor(e.to_string()))?;
    let friendly = xml_text(&doc, "friendlyName").ok_or_else(|| {
        crate::error::AvrError::MalformedDescriptor("missing friendlyName".to_string())
    })?;
    let model = xml_text(&doc, "modelName").unwrap_or_default();
    Ok((friendly, model))
}

/// Parse the extended device-info document. The MAC address is the registry
/// key and therefore required.
pub(crate) fn parse_device_info(xml: &str) -> crate::error::Result<DeviceInfo> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| crate::error::AvrError::MalformedDescriptor(e.to_string()))?;
    let mac = xml_text(&doc, "MacAddress").ok_or_else(|| {
        crate::error::AvrError::MalformedDescriptor("missing MacAddress".to_string())
    })?;
    let serial = xml_text(&doc, "SerialNumber").unwrap_or_else(|| mac.clone());
    let firmware = xml_text(&doc, "UpgradeVersion").unwrap_or_default();
    let model = xml_text(&doc, "ModelName").unwrap_or_default();
    let zone_count = xml_text(&doc, "DeviceZones")
        .and_then(|z| z.parse::<u8>().ok())
        .unwrap_or(1);

    Ok(DeviceInfo {
        mac,
        serial,
        firmware,
        friendly_name: model.clone(),
        model,
        zone_count,
    })
}

/// Queries sent in one bulk status POST; response `<cmd>` blocks come back
/// in the same order.
const BULK_QUERIES: &[&str] = &[
    "GetAllZonePowerStatus",
    "GetAllZoneVolume",
    "GetAllZoneMuteStatus",
    "GetAllZoneSource",
];

fn bulk_status_body() -> String {
    let cmds: String = BULK_QUERIES
        .iter()
        .map(|q| format!("<cmd id=\"1\">{q}</cmd>"))
        .collect();
    format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<tx>{cmds}</tx>")
}

/// Convert a bulk status response into decoder fragments. Blocks are
/// positional: power, volume, mute, source.
pub(crate) fn parse_bulk_status(xml: &str) -> Vec<Fragment> {
    let doc = match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!("Bulk status response unparseable: {}", e);
            return Vec::new();
        }
    };

    let mut fragments = Vec::new();
    let cmds = doc
        .root_element()
        .children()
        .filter(|n| n.tag_name().name() == "cmd");

    for (index, cmd) in cmds.enumerate() {
        let Some(query) = BULK_QUERIES.get(index) else {
            break;
        };
        for zone_node in cmd.children().filter(|n| n.is_element()) {
            let Some(zone) = zone_index(zone_node.tag_name().name()) else {
                continue;
            };
            match *query {
                "GetAllZonePowerStatus" => {
                    if let Some(text) = zone_node.text() {
                        fragments.push(Fragment::ZonePower {
                            zone,
                            on: text.trim().eq_ignore_ascii_case("ON"),
                        });
                    }
                }
                "GetAllZoneVolume" => {
                    let text = zone_node
                        .children()
                        .find(|n| n.tag_name().name() == "volume")
                        .and_then(|n| n.text())
                        .map(str::trim);
                    let steps = match text {
                        Some("--") | None => None,
                        Some(db) => db.parse::<f64>().ok().map(db_to_steps),
                    };
                    fragments.push(Fragment::ZoneVolume { zone, steps });
                }
                "GetAllZoneMuteStatus" => {
                    if let Some(text) = zone_node.text() {
                        fragments.push(Fragment::ZoneMute {
                            zone,
                            on: text.trim().eq_ignore_ascii_case("ON"),
                        });
                    }
                }
                "GetAllZoneSource" => {
                    let source = zone_node
                        .children()
                        .find(|n| n.tag_name().name() == "source")
                        .and_then(|n| n.text())
                        .map(str::trim)
                        .unwrap_or("");
                    if source == "SOURCE" {
                        fragments.push(Fragment::ZoneFollowMain { zone });
                    } else if !source.is_empty() {
                        fragments.push(Fragment::ZoneSource {
                            zone,
                            source: normalize_source(source),
                        });
                    }
                }
                _ => {}
            }
        }
    }
    fragments
}

fn zone_index(tag: &str) -> Option<ZoneId> {
    tag.strip_prefix("zone")?.parse().ok()
}

/// Parse the tuner preset table: `<Preset>` items carrying a slot id, a
/// band, and the packed name+frequency parameter.
pub(crate) fn parse_tuner_presets(xml: &str) -> Vec<Preset> {
    let doc = match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!("Tuner preset document unparseable: {}", e);
            return Vec::new();
        }
    };

    let mut presets = Vec::new();
    for item in doc.descendants().filter(|n| n.tag_name().name() == "Preset") {
        let text_of = |tag: &str| {
            item.children()
                .find(|n| n.tag_name().name() == tag)
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        };
        let Some(slot) = text_of("Table").and_then(|t| t.parse::<PresetSlot>().ok()) else {
            continue;
        };
        let Some(band) = text_of("Band").and_then(|b| Band::from_token(&b)) else {
            continue;
        };
        let param = item
            .children()
            .find(|n| n.tag_name().name() == "Param")
            .and_then(|n| n.text())
            .unwrap_or("");
        let name = param.get(..8).unwrap_or(param).trim_end().to_string();
        let frequency = param
            .get(8..)
            .unwrap_or("")
            .trim()
            .parse::<u32>()
            .map(|raw| f64::from(raw) / 100.0)
            .unwrap_or(0.0);
        if name.is_empty() && frequency == 0.0 {
            continue;
        }
        presets.push(Preset {
            slot,
            band,
            name,
            frequency,
        });
    }
    presets
}

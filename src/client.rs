//! Top-level bridge: registry, periodic discovery, intent dispatch.
//!
//! `AvrBridge` is the collaborator-facing surface. It owns the device
//! registry, re-runs discovery and persistent reconnection on a fixed
//! interval, pumps inbound telegrams through the decoder and normalizer,
//! and pushes a keyed "device updated" notification whenever canonical
//! state changes. Set-intents flow the other way, through the command
//! encoder and the per-device transport.

use crate::command::{encode, Intent};
use crate::discovery::{discover, DiscoveredDevice, DISCOVERY_WINDOW};
use crate::error::{AvrError, Result};
use crate::reconcile::{FieldPath, FieldValue, OverrideCache};
use crate::state::StateNormalizer;
use crate::subscription::UpdateReceiver;
use crate::telegram::{decode_line, quantize_steps};
use crate::transport::{DeviceTransport, TransportConfig};
use crate::types::{DeviceId, DeviceState};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Statically configured receiver addresses; non-empty skips multicast
    pub static_addresses: Vec<String>,
    /// Period of the discovery/reconnect cycle
    pub discovery_interval: Duration,
    /// Multicast reply collection window
    pub discovery_window: Duration,
    /// HTTP timeout for descriptor and fallback calls
    pub http_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            static_addresses: Vec::new(),
            discovery_interval: Duration::from_secs(60),
            discovery_window: DISCOVERY_WINDOW,
            http_timeout: Duration::from_secs(5),
            transport: TransportConfig::default(),
        }
    }
}

/// Everything the bridge tracks per receiver
struct DeviceEntry {
    normalizer: StateNormalizer,
    cache: OverrideCache,
    transport: Arc<DeviceTransport>,
}

type Registry = Arc<StdMutex<BTreeMap<DeviceId, DeviceEntry>>>;

/// Protocol/state bridge for Denon and Marantz receivers
pub struct AvrBridge {
    config: BridgeConfig,
    http: reqwest::Client,
    devices: Registry,
    update_tx: Arc<broadcast::Sender<DeviceId>>,
    stop_tx: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AvrBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            devices: Arc::new(StdMutex::new(BTreeMap::new())),
            update_tx: Arc::new(update_tx),
            stop_tx: None,
            task: None,
        }
    }

    /// Subscribe to "device updated" notifications. The payload is the
    /// device id; fetch the new state with [`AvrBridge::device_state`].
    pub fn subscribe_updates(&self) -> UpdateReceiver {
        UpdateReceiver::new(self.update_tx.subscribe())
    }

    /// Identifiers of all currently registered devices
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.lock().unwrap().keys().cloned().collect()
    }

    /// Exposed state for one device: canonical state with pending local
    /// overrides laid on top.
    pub fn device_state(&self, id: &str) -> Option<DeviceState> {
        let mut devices = self.devices.lock().unwrap();
        let entry = devices.get_mut(id)?;
        let canonical = entry.normalizer.state().clone();
        Some(entry.cache.overlay(&canonical))
    }

    /// Start the periodic discovery/reconnect loop. Restarts cleanly if
    /// already running; registered devices are preserved.
    pub async fn start(&mut self) {
        self.stop().await;

        let (stop_tx, _) = broadcast::channel(1);
        self.stop_tx = Some(stop_tx.clone());

        let http = self.http.clone();
        let config = self.config.clone();
        let devices = self.devices.clone();
        let update_tx = self.update_tx.clone();

        let handle = tokio::spawn(async move {
            let mut stop_rx = stop_tx.subscribe();
            let mut interval = tokio::time::interval(config.discovery_interval);
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Bridge stopped by user");
                        break;
                    }
                    _ = interval.tick() => {
                        run_cycle(&http, &config, &devices, &update_tx).await;
                    }
                }
            }
        });
        self.task = Some(handle);
    }

    /// Stop the loop and close every socket. Queued commands are not
    /// drained; registered state stays readable.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
        }
        let devices = self.devices.lock().unwrap();
        for entry in devices.values() {
            entry.transport.shutdown();
        }
    }

    /// Apply a set-intent to a device: note the local override, encode to
    /// wire telegrams, send them over the active transport.
    ///
    /// `RequestExhausted` from the fallback channel is raised as-is; the
    /// intent is not retried.
    pub async fn set(&self, id: &str, intent: Intent) -> Result<()> {
        let (commands, transport) = {
            let mut devices = self.devices.lock().unwrap();
            let entry = devices
                .get_mut(id)
                .ok_or_else(|| AvrError::DeviceNotFound(id.to_string()))?;

            let commands = encode(&intent, entry.normalizer.state());
            note_override(entry, &intent)?;
            (commands, entry.transport.clone())
        };

        // Exposed state already reflects the override
        let _ = self.update_tx.send(id.to_string());

        for command in &commands {
            transport.send(command).await?;
        }
        Ok(())
    }

    /// Feed one inbound telegram line through decode/normalize/notify.
    /// Unrecognized lines are dropped silently.
    pub(crate) fn handle_line(devices: &Registry, update_tx: &broadcast::Sender<DeviceId>, id: &str, line: &str) {
        let Some(fragment) = decode_line(line) else {
            tracing::trace!("Ignoring unrecognized telegram: {}", line);
            return;
        };
        {
            let mut registry = devices.lock().unwrap();
            let Some(entry) = registry.get_mut(id) else {
                return;
            };
            entry.normalizer.apply(fragment);
            entry.cache.resolve(entry.normalizer.state());
        }
        let _ = update_tx.send(id.to_string());
    }
}

impl Drop for AvrBridge {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

/// Record the override for an intent against the current canonical value.
fn note_override(entry: &mut DeviceEntry, intent: &Intent) -> Result<()> {
    let state = entry.normalizer.state();
    let (path, set, prior) = match intent {
        Intent::Power { zone, on } => {
            let z = state
                .zone(*zone)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no zone {zone}")))?;
            (
                FieldPath::ZonePower(*zone),
                FieldValue::Bool(*on),
                FieldValue::Bool(z.power),
            )
        }
        Intent::Mute { zone, on } => {
            let z = state
                .zone(*zone)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no zone {zone}")))?;
            (
                FieldPath::ZoneMute(*zone),
                FieldValue::Bool(*on),
                FieldValue::Bool(z.mute),
            )
        }
        Intent::Volume { zone, steps } => {
            let z = state
                .zone(*zone)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no zone {zone}")))?;
            (
                FieldPath::ZoneVolume(*zone),
                FieldValue::Steps(quantize_steps(steps.clamp(0.0, 98.0))),
                FieldValue::Steps(z.volume),
            )
        }
        Intent::SelectInput { zone, key } => {
            let z = state
                .zone(*zone)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no zone {zone}")))?;
            (
                FieldPath::ZoneInput(*zone),
                FieldValue::Key(Some(key.clone())),
                FieldValue::Key(z.input.clone()),
            )
        }
        Intent::RenameInput { key, label } => {
            let input = state
                .input(key)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no input {key}")))?;
            (
                FieldPath::InputLabel(key.clone()),
                FieldValue::Text(label.clone()),
                FieldValue::Text(input.label.clone()),
            )
        }
        Intent::HideInput { key, hidden } => {
            let input = state
                .input(key)
                .ok_or_else(|| AvrError::InvalidIntent(format!("no input {key}")))?;
            (
                FieldPath::InputHidden(key.clone()),
                FieldValue::Bool(*hidden),
                FieldValue::Bool(input.hidden),
            )
        }
        // Remote keys are stateless passthrough
        Intent::Remote(_) => return Ok(()),
    };
    entry.cache.note_set(path, set, prior);
    Ok(())
}

/// One discovery/reconnect cycle: scan, commit findings, reconnect every
/// persistent channel that is down.
async fn run_cycle(
    http: &reqwest::Client,
    config: &BridgeConfig,
    devices: &Registry,
    update_tx: &Arc<broadcast::Sender<DeviceId>>,
) {
    tracing::debug!("Discovery cycle starting");
    let found = discover(http, &config.static_addresses, config.discovery_window).await;
    for device in found {
        commit_device(http, config, devices, update_tx, device);
    }

    let transports: Vec<Arc<DeviceTransport>> = {
        let registry = devices.lock().unwrap();
        registry.values().map(|e| e.transport.clone()).collect()
    };
    for transport in transports {
        transport.connect_persistent().await;
    }
}

/// Register or refresh one discovered device. Check-and-insert happens
/// under a single registry lock, so two interleaved replies for the same
/// hardware id cannot double-register.
fn commit_device(
    http: &reqwest::Client,
    config: &BridgeConfig,
    devices: &Registry,
    update_tx: &Arc<broadcast::Sender<DeviceId>>,
    found: DiscoveredDevice,
) {
    let id = found.info.mac.clone();
    let mut spawn_pump: Option<Arc<DeviceTransport>> = None;
    {
        let mut registry = devices.lock().unwrap();
        match registry.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.transport.address() != found.address {
                    tracing::info!(
                        "Device {} moved from {} to {}",
                        id,
                        entry.transport.address(),
                        found.address
                    );
                    entry.transport.shutdown();
                    let transport = Arc::new(DeviceTransport::new(
                        found.address.clone(),
                        http.clone(),
                        config.transport.clone(),
                    ));
                    entry.transport = transport.clone();
                    entry.normalizer.state_mut().address = found.address.clone();
                    spawn_pump = Some(transport);
                }
                refresh_entry(entry, &found);
            }
            Entry::Vacant(vacant) => {
                tracing::info!("Registering device {} at {}", id, found.address);
                let transport = Arc::new(DeviceTransport::new(
                    found.address.clone(),
                    http.clone(),
                    config.transport.clone(),
                ));
                let state = DeviceState::new(found.info.clone(), found.address.clone());
                let mut entry = DeviceEntry {
                    normalizer: StateNormalizer::new(state),
                    cache: OverrideCache::new(),
                    transport: transport.clone(),
                };
                refresh_entry(&mut entry, &found);
                vacant.insert(entry);
                spawn_pump = Some(transport);
            }
        }
    }
    let _ = update_tx.send(id.clone());

    // New transport: pump its inbound telegrams into the normalizer
    if let Some(transport) = spawn_pump {
        let mut lines = transport.subscribe_lines();
        let devices = devices.clone();
        let update_tx = update_tx.clone();
        tokio::spawn(async move {
            while let Ok(line) = lines.recv().await {
                AvrBridge::handle_line(&devices, &update_tx, &id, &line);
            }
            tracing::debug!("Telegram pump for {} ended", id);
        });
    }
}

/// Fold a freshly fetched bundle into an entry: presets, then the bulk
/// status fragments, one at a time through the normalizer.
fn refresh_entry(entry: &mut DeviceEntry, found: &DiscoveredDevice) {
    {
        let state = entry.normalizer.state_mut();
        state.info = found.info.clone();
        for preset in &found.presets {
            state.presets.insert(preset.slot, preset.clone());
        }
        state.transport = entry.transport.mode();
    }
    entry.normalizer.rebuild_inputs();
    for fragment in &found.status {
        entry.normalizer.apply(fragment.clone());
    }
    entry.cache.resolve(entry.normalizer.state());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, DeviceInfo, Preset};
    use crate::telegram::Fragment;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn found_device(address: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            address: address.to_string(),
            info: DeviceInfo {
                mac: "0005CD123456".to_string(),
                serial: "SER1".to_string(),
                firmware: "1.0".to_string(),
                friendly_name: "Living Room".to_string(),
                model: "AVR-X2400H".to_string(),
                zone_count: 2,
            },
            status: vec![
                Fragment::RenameEntry {
                    source: "BLU-RAY".to_string(),
                    label: "Player".to_string(),
                },
                Fragment::ZonePower { zone: 1, on: false },
                Fragment::ZoneSource {
                    zone: 1,
                    source: "BLU-RAY".to_string(),
                },
            ],
            presets: vec![Preset {
                slot: 3,
                band: Band::Fm,
                name: "POP ROCK".to_string(),
                frequency: 107.9,
            }],
        }
    }

    fn test_bridge() -> AvrBridge {
        AvrBridge::new(BridgeConfig {
            transport: TransportConfig {
                pacing: Duration::from_millis(1),
                retries: 0,
                retry_backoff: Duration::from_millis(1),
                ..TransportConfig::default()
            },
            ..BridgeConfig::default()
        })
    }

    fn commit(bridge: &AvrBridge, found: DiscoveredDevice) {
        commit_device(
            &bridge.http,
            &bridge.config,
            &bridge.devices,
            &bridge.update_tx,
            found,
        );
    }

    #[tokio::test]
    async fn committed_device_is_registered_and_normalized() {
        let bridge = test_bridge();
        commit(&bridge, found_device("10.0.0.2"));

        assert_eq!(bridge.device_ids(), vec!["0005CD123456".to_string()]);
        let state = bridge.device_state("0005CD123456").unwrap();
        assert_eq!(state.info.model, "AVR-X2400H");
        assert_eq!(state.zone(1).unwrap().input.as_deref(), Some("BLU-RAY"));
        assert!(state.input("PRESET03").is_some());
    }

    #[tokio::test]
    async fn reappearing_mac_updates_address_without_duplicate() {
        let bridge = test_bridge();
        commit(&bridge, found_device("10.0.0.2"));
        commit(&bridge, found_device("10.0.0.9"));

        assert_eq!(bridge.device_ids().len(), 1);
        let state = bridge.device_state("0005CD123456").unwrap();
        assert_eq!(state.address, "10.0.0.9");
    }

    #[tokio::test]
    async fn each_telegram_line_produces_one_update() {
        let bridge = test_bridge();
        commit(&bridge, found_device("10.0.0.2"));
        let mut updates = bridge.subscribe_updates();

        for line in ["MV455", "MUOFF"] {
            AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", line);
        }
        assert_eq!(updates.recv().await.unwrap(), "0005CD123456");
        assert_eq!(updates.recv().await.unwrap(), "0005CD123456");
        assert!(updates.try_recv().unwrap().is_none());

        let state = bridge.device_state("0005CD123456").unwrap();
        assert_eq!(state.zone(1).unwrap().volume, 45.5);
        assert!(!state.zone(1).unwrap().mute);
    }

    #[tokio::test]
    async fn unrecognized_lines_produce_no_update() {
        let bridge = test_bridge();
        commit(&bridge, found_device("10.0.0.2"));
        let mut updates = bridge.subscribe_updates();
        AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", "XYZZY1");
        assert!(updates.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn set_intent_applies_override_until_confirmed() {
        // accept the persistent connect and swallow whatever arrives
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let mut bridge = test_bridge();
        bridge.config.transport.control_port = port;
        commit(&bridge, found_device("127.0.0.1"));
        {
            let registry = bridge.devices.lock().unwrap();
            let entry = registry.get("0005CD123456").unwrap();
            entry.transport.connect_persistent().await;
        }

        bridge
            .set("0005CD123456", Intent::Power { zone: 1, on: true })
            .await
            .unwrap();
        assert!(bridge.device_state("0005CD123456").unwrap().zone(1).unwrap().power);

        // stale echo of the pre-set value does not flicker the state back
        AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", "ZMOFF");
        assert!(bridge.device_state("0005CD123456").unwrap().zone(1).unwrap().power);

        // confirmation adopts canonical and clears the override
        AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", "ZMON");
        let state = bridge.device_state("0005CD123456").unwrap();
        assert!(state.zone(1).unwrap().power);
        {
            let mut registry = bridge.devices.lock().unwrap();
            assert!(registry.get_mut("0005CD123456").unwrap().cache.is_empty());
        }

        server.abort();
    }

    #[tokio::test]
    async fn external_change_after_confirmation_is_not_masked() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let mut bridge = test_bridge();
        bridge.config.transport.control_port = port;
        commit(&bridge, found_device("127.0.0.1"));
        {
            let registry = bridge.devices.lock().unwrap();
            let entry = registry.get("0005CD123456").unwrap();
            entry.transport.connect_persistent().await;
        }

        bridge
            .set("0005CD123456", Intent::Power { zone: 1, on: true })
            .await
            .unwrap();

        // device confirms, then someone powers it off at the front panel,
        // both before the collaborator reads the state again
        AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", "ZMON");
        AvrBridge::handle_line(&bridge.devices, &bridge.update_tx, "0005CD123456", "ZMOFF");

        let state = bridge.device_state("0005CD123456").unwrap();
        assert!(!state.zone(1).unwrap().power);

        server.abort();
    }

    #[tokio::test]
    async fn capability_gated_rename_updates_override_only() {
        let bridge = test_bridge();
        commit(&bridge, found_device("10.0.0.2"));

        // tuner inputs cannot be renamed on the wire; no command is sent,
        // so no transport is needed and the label still changes locally
        bridge
            .set(
                "0005CD123456",
                Intent::RenameInput {
                    key: "TUNERFM".to_string(),
                    label: "Radio".to_string(),
                },
            )
            .await
            .unwrap();
        let state = bridge.device_state("0005CD123456").unwrap();
        assert_eq!(state.input("TUNERFM").unwrap().label, "Radio");
    }

    #[tokio::test]
    async fn set_on_unknown_device_errors() {
        let bridge = test_bridge();
        let err = bridge
            .set("missing", Intent::Power { zone: 1, on: true })
            .await
            .unwrap_err();
        assert!(matches!(err, AvrError::DeviceNotFound(_)));
    }
}

use denon_avr::{AvrBridge, BridgeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "denon_avr=debug".into()),
        )
        .init();

    let mut bridge = AvrBridge::new(BridgeConfig::default());
    bridge.start().await;
    println!("Scanning for receivers, press Ctrl-C to stop...");

    let mut updates = bridge.subscribe_updates();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                let id = update?;
                if let Some(state) = bridge.device_state(&id) {
                    println!(
                        "{} ({}) at {} [{:?}]",
                        state.info.friendly_name, id, state.address, state.transport
                    );
                    for zone in &state.zones {
                        println!(
                            "  {}: power={} volume={} input={}",
                            zone.name,
                            zone.power,
                            zone.volume,
                            zone.input.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
    }

    bridge.stop().await;
    Ok(())
}

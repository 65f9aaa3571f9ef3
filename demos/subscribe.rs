use russound_rio::{RussoundClient, StateUpdate};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let host = std::env::args()
        .nth(1)
        .ok_or("usage: subscribe <host> [port]")?;
    let client = RussoundClient::tcp_default_port(host);

    let watcher = client.clone();
    client.register_state_callback(move |update: &StateUpdate| {
        println!("Callback: {:?} connected={}", update, watcher.is_connected());
        if let StateUpdate::Zone { controller_id, zone_id } = update {
            if let Ok(zone) = watcher.zone(*controller_id, *zone_id).state() {
                println!("  status={} volume={:?}", zone.status, zone.volume);
            }
        }
    });
    client.register_connection_callback(|connected: &bool| {
        println!("Watching: {}", connected);
    });

    client.connect().await?;

    for (source_id, source) in client.sources()? {
        println!("Found source {} - {:?}", source_id, source.name);
    }
    for (controller_id, controller) in client.controllers() {
        println!("Found controller {} - {:?}", controller_id, controller.mac_address);
        for zone_id in &controller.zones {
            let zone = client.zone(controller_id, *zone_id).state()?;
            println!("Found zone {} - {:?}", zone_id, zone.name);
        }
    }
    println!("{:#}", client.state());

    // Play media using the unit's front controls or the Russound app
    tokio::time::sleep(Duration::from_secs(30)).await;
    client.disconnect().await;
    Ok(())
}

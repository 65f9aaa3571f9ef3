use russound_rio::RussoundClient;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let host = std::env::args()
        .nth(1)
        .ok_or("usage: basic <host> [port]")?;
    let port = match std::env::args().nth(2) {
        Some(port) => port.parse()?,
        None => russound_rio::DEFAULT_PORT,
    };

    let client = RussoundClient::tcp(host, port);
    client.connect().await?;

    tracing::info!("Supported features:");
    for flag in client.supported_features() {
        tracing::info!("  {}", flag);
    }

    tracing::info!("Sources:");
    for (source_id, source) in client.sources()? {
        tracing::info!("  {}: {:?}", source_id, source.name);
    }

    tracing::info!("Controllers:");
    for controller in client.controllers().values() {
        tracing::info!(
            "  {} ({}): {:?}",
            controller.controller_id,
            controller.controller_type,
            controller.mac_address
        );
    }

    for zone in client.zones() {
        let state = zone.state()?;
        tracing::info!("  {}: {:?} (volume {:?})", zone.path(), state.name, state.volume);
    }

    // Give the controller a moment to push source metadata
    tokio::time::sleep(Duration::from_secs(3)).await;
    for (source_id, source) in client.sources()? {
        println!("{}: {:#?}", source_id, source);
    }

    client.disconnect().await;
    Ok(())
}

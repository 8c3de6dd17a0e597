//! Run the full gateway bootstrap against a dry-run upstream pipeline.
//!
//! Run with: cargo run --example bootstrap [-- path/to/gateway.toml]
//!
//! The bundle directory (default `./bundle`) must hold
//! `GatewayAuthConstants.toml` with `app_token` and `owner_id`.

use ble_upstream_gateway::{
    Coordinates, DryRunFactory, GatewayOrchestrator, GatewaySettings, Result, TracingLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_upstream_gateway=debug".parse().unwrap()),
        )
        .init();

    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = GatewaySettings::load(settings_path.as_deref())?;

    println!("Bundle:       {}", settings.bundle_dir.display());
    println!("Registration: {}", settings.registration_url);
    println!("Endpoint:     {}", settings.endpoint);
    println!("App version:  {}\n", settings.build_info);

    let gateway = GatewayOrchestrator::from_settings(
        &settings,
        Arc::new(DryRunFactory::with_heartbeat(Duration::from_secs(2))),
    )?
    .with_logger(Arc::new(TracingLogger));

    let _status = gateway.on_status(|line| println!("[status] {}", line));
    let _messages = gateway.on_message_sent(|message| println!("[upstream] {}", message));

    let state = gateway.load_required_data().await;
    if !state.is_running() {
        println!("\nBootstrap did not complete: {}", state);
        return Ok(());
    }

    println!("\nDevice id: {}", gateway.device_id());
    gateway
        .location_service()
        .update(Coordinates::new(52.5200, 13.4050)?.with_accuracy(25.0));

    let mut activity = gateway.subscribe_ble_activity();

    println!("Running for 30 seconds...");
    println!("Press Ctrl+C to exit early.\n");

    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted!");
                break;
            }
            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                let level = *activity.borrow_and_update();
                println!("[ble] activity {:>3.0}%", level * 100.0);
            }
        }
    }

    gateway.stop().await?;
    println!("\nDone!");

    Ok(())
}

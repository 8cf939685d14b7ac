//! LwM2M Device - Main entry point
//!
//! Registers a simulated device with an LwM2M server, answers its reads and
//! keeps the registration alive until interrupted.

mod config;

use anyhow::Result;
use clap::Parser;
use lwm2m_client::{Client, ClientError};
use lwm2m_coap::UdpTransport;
use lwm2m_core::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lwm2m-device")]
#[command(about = "Simulated LwM2M device client")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lwm2m-device.toml")]
    config: PathBuf,

    /// Server URI (overrides the configuration file)
    #[arg(short, long)]
    server: Option<String>,

    /// Endpoint name (overrides the configuration file)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a default configuration file and exit
    #[arg(long)]
    write_default_config: bool,

    /// Print the simulated object tree and exit
    #[arg(long)]
    list_objects: bool,
}

fn print_objects(registry: &Registry) {
    for object in registry.objects() {
        println!("/{} {}", object.id, object.name);
        for instance_id in object.instance_ids() {
            let Some(instance) = object.instance(instance_id) else {
                continue;
            };
            println!("  /{}/{}", object.id, instance_id);
            for resource_id in instance.resource_ids() {
                let name = object
                    .definition(resource_id)
                    .map(|d| d.name.as_str())
                    .unwrap_or("?");
                let value = instance
                    .get(resource_id)
                    .and_then(|v| v.to_payload().ok())
                    .unwrap_or_default();
                println!("    /{}/{}/{} {} = {}", object.id, instance_id, resource_id, name, value);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("LwM2M device v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(server) = args.server {
        config.server.uri = server;
    }
    if let Some(endpoint) = args.endpoint {
        config.client.endpoint_name = endpoint;
    }

    info!(
        server = %config.server.uri,
        endpoint = %config.client.endpoint_name,
        lifetime = config.client.lifetime_secs,
        "Configuration loaded"
    );

    let registry = Registry::standard(
        &config.server.uri,
        &config.client.binding_mode,
        config.simulation.seed,
    );

    if args.list_objects {
        print_objects(&registry);
        return Ok(());
    }

    let transport = Arc::new(
        UdpTransport::bind(
            &config.server.uri,
            config.client.local_port,
            config.to_transmission_params(),
        )
        .await?,
    );
    info!(
        local = %transport.local_addr()?,
        server = %transport.server_addr(),
        "CoAP transport ready"
    );

    let mut client = Client::new(transport, registry.into_shared(), config.to_client_settings());

    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
    });

    match client.connect().await {
        Ok(()) => {}
        Err(ClientError::Interrupted) => {
            client.disconnect().await;
            return Ok(());
        }
        Err(e) => {
            client.disconnect().await;
            return Err(e.into());
        }
    }

    let result = client.run().await;
    client.disconnect().await;
    result?;

    Ok(())
}

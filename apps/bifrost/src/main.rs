mod cli;

use std::io::Read as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use bifrost_core::{Dispatcher, HttpClient, WreqHttpClient};
use bifrost_protocol::NormalizedRequest;
use bifrost_provider_core::{AdapterRegistry, ProviderRecord};

use cli::CliArgs;

/// Builds a [`Dispatcher`] and registers every provider found in the config
/// file, exactly the "read config once, build registries, then serve" shape
/// of the teacher's `bootstrap()` — minus the SQL store, which spec.md §1
/// scopes out of this engine (see `StaticAccountLookup` in `bifrost-core`).
async fn build_dispatcher(records: Vec<ProviderRecord>) -> Result<Dispatcher> {
    let mut adapters = AdapterRegistry::new();
    bifrost_providers::install_builtin_adapters(&mut adapters);

    let http: Arc<dyn HttpClient> = Arc::new(WreqHttpClient::new());
    let dispatcher = Dispatcher::new(adapters, http);

    for record in records {
        let name = record.name.clone();
        let keys = record.keys.clone();
        let concurrency = record.concurrency_config;
        dispatcher
            .reload_provider(&name, record, keys, concurrency)
            .await
            .with_context(|| format!("reload provider {name}"))?;
    }

    Ok(dispatcher)
}

fn read_request(path: Option<&str>) -> Result<NormalizedRequest> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read request file {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("parse NormalizedRequest JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();

    let config_raw = std::fs::read_to_string(&args.providers_config)
        .with_context(|| format!("read providers config {}", args.providers_config))?;
    let records: Vec<ProviderRecord> =
        serde_json::from_str(&config_raw).context("parse providers config JSON")?;

    let dispatcher = build_dispatcher(records).await?;
    let request = read_request(args.request.as_deref())?;
    let deadline = args.deadline_secs.map(Duration::from_secs);

    if args.stream {
        match dispatcher
            .dispatch_stream(request, deadline, args.virtual_key.clone())
            .await
        {
            Ok((mut deltas, _cancel)) => {
                while let Some(delta) = deltas.recv().await {
                    println!("{}", serde_json::to_string(&delta)?);
                    if delta.is_terminal() {
                        break;
                    }
                }
            }
            Err(envelope) => {
                eprintln!("{}", serde_json::to_string(&envelope)?);
                std::process::exit(1);
            }
        }
    } else {
        match dispatcher.dispatch(request, deadline, args.virtual_key.clone()).await {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            Err(envelope) => {
                eprintln!("{}", serde_json::to_string_pretty(&envelope)?);
                std::process::exit(1);
            }
        }
    }

    dispatcher.shutdown(Duration::from_secs(5)).await;
    Ok(())
}

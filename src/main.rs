use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, warn};

use mikrocount::db::{InfluxSink, InfluxV1Sink, InfluxV2Sink, Writer};
use mikrocount::{Classifier, Cli, Config, RouterFetcher, Scheduler, SinkSettings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_cli(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e).context("invalid configuration");
        }
    };

    info!("mikrocount starting...");
    info!("  Router: {}", config.router);
    info!("  Local network: {}", config.local_network);
    info!("  Interval: {:?}", config.interval);

    let client = reqwest::Client::builder()
        .timeout(config.write_timeout)
        .build()
        .context("building InfluxDB client")?;

    let sink = match config.sink.clone() {
        SinkSettings::V1(settings) => {
            info!("  InfluxDB 1.x at {} (database {})", settings.url, settings.database);
            let sink = InfluxV1Sink::new(client, settings);
            if let Err(e) = sink.ensure_database().await {
                warn!(error = %e, "Could not create database, assuming it exists");
            }
            InfluxSink::V1(sink)
        }
        SinkSettings::V2(settings) => {
            info!("  InfluxDB 2.x at {} (bucket {})", settings.url, settings.bucket);
            InfluxSink::V2(InfluxV2Sink::new(client, settings))
        }
    };
    info!("  Sink API: {}", sink.api());

    let fetcher = RouterFetcher::new(&config.router, config.fetch_timeout)
        .context("building router client")?;
    info!("  Polling {}", fetcher.url());
    let classifier = Classifier::new(config.local_network)
        .with_anomaly_policy(config.anomaly_policy)
        .with_intra_lan(config.intra_lan);

    let scheduler = Scheduler::new(
        fetcher,
        Writer::new(sink, config.write_timeout),
        classifier,
        config.interval,
    )
    .with_max_in_flight(config.max_in_flight)
    .with_drain_timeout(config.write_timeout);

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("mikrocount stopped");
    Ok(())
}

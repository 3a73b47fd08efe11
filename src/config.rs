//! Startup configuration.
//!
//! Flags win over environment variables, which win over `.env` entries
//! (loaded by `main` before parsing). The result is an immutable [`Config`].

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::classify::{AnomalyPolicy, IntraLanPolicy};
use crate::db::{V1Settings, V2Settings};
use crate::error::ConfigError;
use crate::network::LocalNetwork;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkApi {
    /// 2.x when a token is configured, 1.x otherwise
    Auto,
    V1,
    V2,
}

/// mikrocount: MikroTik IP accounting to InfluxDB
#[derive(Parser, Debug, Clone)]
#[command(name = "mikrocount", version, about, long_about = None)]
pub struct Cli {
    /// InfluxDB base URL
    #[arg(long, env = "INFLUX_URL", default_value = "http://influxdb:8086")]
    pub influx_url: String,

    /// InfluxDB 1.x username (basic auth is skipped when empty)
    #[arg(long, env = "INFLUX_USER", default_value = "")]
    pub influx_user: String,

    /// InfluxDB 1.x password
    #[arg(long, env = "INFLUX_PWD", default_value = "", hide_env_values = true)]
    pub influx_password: String,

    /// InfluxDB 1.x database, created at startup
    #[arg(long, env = "INFLUX_DB", default_value = "mikrocount")]
    pub influx_database: String,

    /// InfluxDB 2.x API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// InfluxDB 2.x organization
    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    /// InfluxDB 2.x bucket
    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,

    /// Which InfluxDB write API to use
    #[arg(long, env = "INFLUX_API", value_enum, default_value_t = SinkApi::Auto)]
    pub sink_api: SinkApi,

    /// Network whose hosts are metered
    #[arg(long, env = "LOCAL_CIDR", default_value = "192.168.0.0/16")]
    pub local_cidr: String,

    /// Router address (host or host:port)
    #[arg(long, env = "MIKROTIK_ADDR", default_value = "192.168.0.1")]
    pub router: String,

    /// Poll interval in seconds
    #[arg(long, env = "MIKROCOUNT_TIMER", default_value_t = 15)]
    pub interval: u64,

    /// Router request timeout in seconds
    #[arg(long, env = "MIKROCOUNT_FETCH_TIMEOUT", default_value_t = 10)]
    pub fetch_timeout: u64,

    /// InfluxDB write timeout in seconds
    #[arg(long, env = "MIKROCOUNT_WRITE_TIMEOUT", default_value_t = 10)]
    pub write_timeout: u64,

    /// Concurrent fetches, and separately concurrent writes, allowed at once
    #[arg(long, env = "MIKROCOUNT_MAX_IN_FLIGHT", default_value_t = 2)]
    pub max_in_flight: usize,

    /// Flows with no local endpoint: skip, or abort-batch (legacy behaviour)
    #[arg(long, env = "MIKROCOUNT_ANOMALY_POLICY", default_value = "skip")]
    pub anomaly_policy: AnomalyPolicy,

    /// Flows between two local hosts: upload, download or skip
    #[arg(long, env = "MIKROCOUNT_INTRA_LAN", default_value = "upload")]
    pub intra_lan: IntraLanPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSettings {
    V1(V1Settings),
    V2(V2Settings),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub router: String,
    pub local_network: LocalNetwork,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub write_timeout: Duration,
    pub max_in_flight: usize,
    pub anomaly_policy: AnomalyPolicy,
    pub intra_lan: IntraLanPolicy,
    pub sink: SinkSettings,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let local_network: LocalNetwork = cli.local_cidr.parse()?;

        if cli.interval == 0 {
            return Err(ConfigError::Zero("interval"));
        }
        if cli.fetch_timeout == 0 {
            return Err(ConfigError::Zero("fetch timeout"));
        }
        if cli.write_timeout == 0 {
            return Err(ConfigError::Zero("write timeout"));
        }
        if cli.max_in_flight == 0 {
            return Err(ConfigError::Zero("max in-flight"));
        }

        let api = match cli.sink_api {
            SinkApi::Auto if cli.influx_token.is_some() => SinkApi::V2,
            SinkApi::Auto => SinkApi::V1,
            explicit => explicit,
        };

        let sink = match api {
            SinkApi::V2 => SinkSettings::V2(V2Settings {
                url: cli.influx_url,
                token: cli
                    .influx_token
                    .ok_or(ConfigError::MissingV2Setting("a token"))?,
                org: cli
                    .influx_org
                    .ok_or(ConfigError::MissingV2Setting("an organization"))?,
                bucket: cli
                    .influx_bucket
                    .ok_or(ConfigError::MissingV2Setting("a bucket"))?,
            }),
            _ => SinkSettings::V1(V1Settings {
                url: cli.influx_url,
                database: cli.influx_database,
                username: cli.influx_user,
                password: cli.influx_password,
            }),
        };

        Ok(Config {
            router: cli.router,
            local_network,
            interval: Duration::from_secs(cli.interval),
            fetch_timeout: Duration::from_secs(cli.fetch_timeout),
            write_timeout: Duration::from_secs(cli.write_timeout),
            max_in_flight: cli.max_in_flight,
            anomaly_policy: cli.anomaly_policy,
            intra_lan: cli.intra_lan,
            sink,
        })
    }
}

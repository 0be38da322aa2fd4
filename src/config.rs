//! Command line arguments of the binaries. Every flag can also come from a
//! `SOCKPIPE_*` environment variable.

use clap::Parser;
use std::time::Duration;
use strum_macros::{Display, EnumString};

use crate::coordinator::{CoordinatorConfig, InstanceConfig, DEFAULT_CALL_TIMEOUT};
use crate::manager::{ManagerConfig, DEFAULT_QUOTA_PER_PERIOD};
use crate::quota::LOW_WATER_MARK;

/// Parse duration string (e.g., "30s", "2m", "1h") or plain seconds.
/// Zero is rejected: every duration flag drives a timer or a timeout.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let d = match humantime::parse_duration(s) {
        Ok(d) => d,
        Err(_) => s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
            format!("Invalid duration '{s}'. Use formats like '30s', '2m', '1h' or plain seconds")
        })?,
    };
    if d.is_zero() {
        return Err(format!("Duration '{s}' must be greater than zero"));
    }
    Ok(d)
}

/// How the relay talks to its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Full SOCKS5 handshake with the client
    Local,
    /// Secret handshake with an agent, then the SOCKS5 command stage
    Remote,
}

/// Flags shared by binaries that pipe traffic to targets.
#[derive(clap::Args, Debug, Clone)]
pub struct ManagerArgs {
    /// Meter traffic against a periodically refilled quota
    #[arg(long, env = "SOCKPIPE_QUOTA", default_value_t = false)]
    pub quota: bool,

    /// Bytes per direction per refill period
    #[arg(long, env = "SOCKPIPE_QUOTA_PER_PERIOD", default_value_t = DEFAULT_QUOTA_PER_PERIOD)]
    pub quota_per_period: i64,

    #[arg(
        long,
        env = "SOCKPIPE_REFILL_INTERVAL",
        default_value = "1h",
        value_parser = parse_duration
    )]
    pub refill_interval: Duration,

    #[arg(
        long,
        env = "SOCKPIPE_DIAL_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration
    )]
    pub dial_timeout: Duration,

    /// Period of the statistics log line
    #[arg(
        long,
        env = "SOCKPIPE_ANALYSIS_INTERVAL",
        default_value = "2m",
        value_parser = parse_duration
    )]
    pub analysis_interval: Duration,
}

impl ManagerArgs {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            dial_timeout: self.dial_timeout,
            analysis_interval: self.analysis_interval,
            refill_interval: self.refill_interval,
            quota_per_period: self.quota_per_period,
            low_water_mark: LOW_WATER_MARK,
        }
    }
}

/// Standalone SOCKS5 server
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Socks5Args {
    #[arg(long, env = "SOCKPIPE_IP", default_value = "127.0.0.1")]
    pub ip: String,

    #[arg(short, long, env = "SOCKPIPE_PORT", default_value_t = 1080)]
    pub port: u16,

    #[command(flatten)]
    pub manager: ManagerArgs,

    #[arg(long, env = "SOCKPIPE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Relay server, reached by agents or directly by SOCKS5 clients
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct TigerArgs {
    #[arg(long, env = "SOCKPIPE_IP", default_value = "0.0.0.0")]
    pub ip: String,

    #[arg(short, long, env = "SOCKPIPE_PORT", default_value_t = 1081)]
    pub port: u16,

    #[arg(long, env = "SOCKPIPE_MODE", default_value_t = Mode::Remote)]
    pub mode: Mode,

    /// Coordinator to announce this relay to
    #[arg(long, env = "SOCKPIPE_COORDINATOR")]
    pub coordinator: Option<String>,

    /// Address agents should use to reach this relay (defaults to ip:port)
    #[arg(long, env = "SOCKPIPE_ANNOUNCE")]
    pub announce: Option<String>,

    #[arg(
        long,
        env = "SOCKPIPE_HEART_BEAT_INTERVAL",
        default_value = "1m",
        value_parser = parse_duration
    )]
    pub heart_beat_interval: Duration,

    #[command(flatten)]
    pub manager: ManagerArgs,

    #[arg(long, env = "SOCKPIPE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl TigerArgs {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn instance_config(&self) -> Option<InstanceConfig> {
        let coordinator = self.coordinator.clone()?;
        let announce = self.announce.clone().unwrap_or_else(|| self.listen_addr());
        Some(InstanceConfig {
            heart_beat_interval: self.heart_beat_interval,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            ..InstanceConfig::new(coordinator, announce)
        })
    }
}

/// SOCKS5 agent tunnelling to a relay
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct WolfArgs {
    #[arg(long, env = "SOCKPIPE_AGENT_IP", default_value = "127.0.0.1")]
    pub agent_ip: String,

    #[arg(long, env = "SOCKPIPE_AGENT_PORT", default_value_t = 1080)]
    pub agent_port: u16,

    /// Fixed relay address; ignored when a coordinator is given
    #[arg(long, env = "SOCKPIPE_RELAY", default_value = "127.0.0.1:1081")]
    pub relay: String,

    /// Discover relays from this coordinator
    #[arg(long, env = "SOCKPIPE_COORDINATOR")]
    pub coordinator: Option<String>,

    #[arg(
        long,
        env = "SOCKPIPE_REFRESH_INTERVAL",
        default_value = "1m",
        value_parser = parse_duration
    )]
    pub refresh_interval: Duration,

    #[arg(
        long,
        env = "SOCKPIPE_DIAL_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration
    )]
    pub dial_timeout: Duration,

    #[arg(
        long,
        env = "SOCKPIPE_ANALYSIS_INTERVAL",
        default_value = "2m",
        value_parser = parse_duration
    )]
    pub analysis_interval: Duration,

    #[arg(long, env = "SOCKPIPE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl WolfArgs {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.agent_ip, self.agent_port)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            dial_timeout: self.dial_timeout,
            analysis_interval: self.analysis_interval,
            ..ManagerConfig::default()
        }
    }
}

/// Service discovery coordinator
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct CoordinatorArgs {
    #[arg(long, env = "SOCKPIPE_COORDINATOR_LISTEN", default_value = "0.0.0.0:9000")]
    pub listen: String,

    #[arg(
        long,
        env = "SOCKPIPE_CLEAN_INTERVAL",
        default_value = "3m",
        value_parser = parse_duration
    )]
    pub clean_interval: Duration,

    #[arg(long, env = "SOCKPIPE_NO_CONTACT", default_value = "5m", value_parser = parse_duration)]
    pub no_contact: Duration,

    #[arg(long, env = "SOCKPIPE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl CoordinatorArgs {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            clean_interval: self.clean_interval,
            no_contact: self.no_contact,
        }
    }
}

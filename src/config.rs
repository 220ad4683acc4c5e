use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub machine_id: String,
    pub database_url: String,

    pub serial_port: String,
    pub serial_baud: u32,
    pub modbus_unit: u8,
    pub serial_timeout: Duration,

    pub interval: Duration,

    pub spool_path: PathBuf,
    pub spool_capacity: usize,

    pub probe_urls: Vec<String>,
    pub probe_timeout: Duration,
    pub db_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_string("DATABASE_URL", None)?;
        let machine_id = env_string("SOIL_AGENT_MACHINE_ID", Some(default_machine_id()))?;

        let serial_port = env_string("SOIL_AGENT_SERIAL_PORT", Some("/dev/ttyUSB0".to_string()))?;
        let serial_baud = env_u64("SOIL_AGENT_SERIAL_BAUD", Some(9600))? as u32;
        let modbus_unit = env_u64("SOIL_AGENT_MODBUS_UNIT", Some(1))? as u8;
        let serial_timeout =
            Duration::from_millis(env_u64("SOIL_AGENT_SERIAL_TIMEOUT_MS", Some(1000))?);

        let interval = Duration::from_secs(env_u64("SOIL_AGENT_INTERVAL_SECONDS", Some(300))?);

        let spool_path = PathBuf::from(env_string(
            "SOIL_AGENT_SPOOL_PATH",
            Some("/opt/soil-agent/storage/spool.json".to_string()),
        )?);
        let spool_capacity = env_u64("SOIL_AGENT_SPOOL_CAPACITY", Some(1000))? as usize;
        if spool_capacity == 0 {
            return Err(anyhow!("SOIL_AGENT_SPOOL_CAPACITY must be at least 1"));
        }

        let probe_urls = parse_probe_urls(&env_string(
            "SOIL_AGENT_PROBE_URLS",
            Some("http://www.google.com,http://www.cloudflare.com".to_string()),
        )?);
        if probe_urls.is_empty() {
            return Err(anyhow!("SOIL_AGENT_PROBE_URLS contains no usable URLs"));
        }
        let probe_timeout = Duration::from_millis(env_u64("SOIL_AGENT_PROBE_TIMEOUT_MS", Some(3000))?);

        let db_timeout = Duration::from_millis(env_u64("SOIL_AGENT_DB_TIMEOUT_MS", Some(5000))?);

        Ok(Self {
            machine_id,
            database_url,
            serial_port,
            serial_baud,
            modbus_unit,
            serial_timeout,
            interval,
            spool_path,
            spool_capacity,
            probe_urls,
            probe_timeout,
            db_timeout,
        })
    }
}

fn default_machine_id() -> String {
    fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "soil-node".to_string())
}

fn parse_probe_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

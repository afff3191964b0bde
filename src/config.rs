use std::fs::read_to_string;
use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Peer {
    /// root bootstrap address
    ///
    /// the address every non-root peer probes first; for the root itself
    /// this is its own address.
    #[serde(default = "Peer::remote_address")]
    pub remote_address: Ipv4Addr,

    /// root UDP port
    ///
    /// the well-known rendezvous port, reused by every peer in the tree.
    #[serde(default = "Peer::remote_port")]
    pub remote_port: u16,

    /// selects root vs. member behavior
    ///
    /// the root originates data and never runs parent-selection; every
    /// other peer bootstraps against `remote_address`/`remote_port`.
    #[serde(default)]
    pub is_root: bool,

    /// local UDP port this peer binds
    #[serde(default = "Peer::listen_port")]
    pub listen_port: u16,
}

impl Peer {
    fn remote_address() -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 0, 1)
    }

    fn remote_port() -> u16 {
        9
    }

    fn listen_port() -> u16 {
        9
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self {
            remote_address: Self::remote_address(),
            remote_port: Self::remote_port(),
            is_root: false,
            listen_port: Self::listen_port(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Cache {
    /// total size in bytes of the block-cache ring
    #[serde(default = "Cache::cache_size")]
    pub cache_size: usize,

    /// size in bytes of one cache block, the granularity of NACK repair
    #[serde(default = "Cache::block_size")]
    pub block_size: usize,
}

impl Cache {
    fn cache_size() -> usize {
        512 * 1024
    }

    fn block_size() -> usize {
        1024
    }

    /// `cache_size` must be a positive multiple of `block_size`.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.cache_size == 0 || self.cache_size % self.block_size != 0 {
            bail!(
                "cache.cache_size ({}) must be a positive multiple of cache.block_size ({})",
                self.cache_size,
                self.block_size
            );
        }

        Ok(())
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self { cache_size: Self::cache_size(), block_size: Self::block_size() }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Origination {
    /// total payload size (in bytes) of each originated `DATA` frame,
    /// including the 8-byte leading origination timestamp
    #[serde(default = "Origination::packet_size")]
    pub packet_size: usize,

    /// delay in milliseconds between successive originations, root-only
    #[serde(default = "Origination::interval_ms")]
    pub interval_ms: u64,
}

impl Origination {
    fn packet_size() -> usize {
        1024
    }

    fn interval_ms() -> u64 {
        50
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_size < 8 {
            bail!("origination.packet_size ({}) must be at least 8 bytes", self.packet_size);
        }

        Ok(())
    }
}

impl Default for Origination {
    fn default() -> Self {
        Self { packet_size: Self::packet_size(), interval_ms: Self::interval_ms() }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub peer: Peer,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub origination: Origination,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// path to a JSON5 configuration file; defaults are used for anything
    /// it doesn't specify, and for every field when no file is given
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Loads configuration from the `--config` file, if any, falling back
    /// to defaults for anything unspecified.
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();

        let raw = match cli.config {
            Some(path) => read_to_string(&path).with_context(|| format!("reading config file {path}"))?,
            None => String::new(),
        };

        let text = if raw.trim().is_empty() { "{}" } else { raw.as_str() };
        let config: Config = serde_json5::from_str(text).context("parsing config file")?;

        config.cache.validate()?;
        config.origination.validate()?;

        Ok(config)
    }
}

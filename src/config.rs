//! Server configuration: CLI flags via `clap` derive, with an optional TOML
//! file for the same fields via `serde`. CLI flags override file values,
//! which override the built-in defaults below.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

const DEFAULT_LISTEN: &str = "0.0.0.0:2049";
const DEFAULT_FRAGMENT_CAP: u32 = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "nfsd4", about = "An NFSv4.0/v3 server over an in-memory VFS")]
pub struct Cli {
    /// Listen address, e.g. 0.0.0.0:2049.
    #[arg(short = 'l', long = "listen", alias = "p")]
    pub listen: Option<SocketAddr>,

    /// Optional TOML config file; CLI flags take precedence over its values.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Raise the tracing filter level; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// The subset of `Config` that may come from a TOML file. All fields are
/// optional so a file may set only what it cares about.
#[derive(Deserialize, Debug, Default)]
struct FileConfig {
    listen: Option<SocketAddr>,
    fragment_cap: Option<u32>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub fragment_cap: u32,
    pub verbose: u8,
}

impl Config {
    /// Resolves CLI flags, an optional TOML file, and defaults into one
    /// `Config`. Fails only if a given `--config` path cannot be read or
    /// parsed, or if the final listen address is not a valid socket addr.
    pub fn resolve(cli: Cli) -> crate::error::Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str::<FileConfig>(&text)
                    .map_err(|e| crate::error::Error::config(format!("{}: {e}", path.display())))?
            }
            None => FileConfig::default(),
        };

        let listen = cli
            .listen
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.parse().expect("default listen addr is valid"));

        Ok(Config {
            listen,
            fragment_cap: file.fragment_cap.unwrap_or(DEFAULT_FRAGMENT_CAP),
            verbose: cli.verbose,
        })
    }

    /// Maps `-v` repetitions to a `tracing_subscriber::EnvFilter` directive,
    /// used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        match self.verbose {
            0 => "nfsd4=info",
            1 => "nfsd4=debug",
            _ => "nfsd4=trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_defaults_with_no_flags() {
        let cli = Cli { listen: None, config: None, verbose: 0 };
        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.fragment_cap, DEFAULT_FRAGMENT_CAP);
    }

    #[test]
    fn cli_listen_overrides_default() {
        let cli = Cli { listen: Some("127.0.0.1:9999".parse().unwrap()), config: None, verbose: 2 };
        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.listen.to_string(), "127.0.0.1:9999");
        assert_eq!(config.default_filter(), "nfsd4=trace");
    }
}

use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Log configuration
#[derive(Debug, Args, Clone)]
pub struct LogConfig {
  /// Log level, overridden by RUST_LOG when set
  #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
  pub level: String,
}

/// Redirector and admin listener configuration
#[derive(Debug, Parser, Clone)]
#[command(name = "stemdirect", version, about = "Serve HTTP redirects for short stems")]
pub struct Config {
  /// ip:port to bind the redirector service
  #[arg(long = "redirector-bind", env = "REDIRECTOR_BIND", default_value = "0.0.0.0:8000")]
  pub redirector_addr: String,

  /// Seconds to wait for a request before closing the connection
  #[arg(long = "redirector-readtimeout", env = "REDIRECTOR_READTIMEOUT", default_value_t = 5)]
  pub redirector_read_timeout: u64,

  /// Seconds to wait for a response before closing the connection
  #[arg(long = "redirector-writetimeout", env = "REDIRECTOR_WRITETIMEOUT", default_value_t = 2)]
  pub redirector_write_timeout: u64,

  /// ip:port to bind the admin interface
  #[arg(long = "admin-bind", env = "ADMIN_BIND", default_value = "127.0.0.1:8888")]
  pub admin_addr: String,

  /// Path to the stems database
  #[arg(long = "db-path", env = "DB_PATH", default_value = "stems.db")]
  pub db_path: PathBuf,

  #[command(flatten)]
  pub log: LogConfig,
}

impl Config {
  pub fn read_timeout(&self) -> Duration {
    Duration::from_secs(self.redirector_read_timeout)
  }

  pub fn write_timeout(&self) -> Duration {
    Duration::from_secs(self.redirector_write_timeout)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let config = Config::try_parse_from(["stemdirect"]).unwrap();
    assert_eq!(config.redirector_addr, "0.0.0.0:8000");
    assert_eq!(config.read_timeout(), Duration::from_secs(5));
    assert_eq!(config.write_timeout(), Duration::from_secs(2));
    assert_eq!(config.admin_addr, "127.0.0.1:8888");
    assert_eq!(config.db_path, PathBuf::from("stems.db"));
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_flags_override_defaults() {
    let config = Config::try_parse_from([
      "stemdirect",
      "--redirector-bind",
      "127.0.0.1:9000",
      "--redirector-readtimeout",
      "10",
      "--redirector-writetimeout",
      "3",
      "--admin-bind",
      "127.0.0.1:9001",
      "--db-path",
      "/tmp/redirects.db",
      "--log-level",
      "debug",
    ])
    .unwrap();

    assert_eq!(config.redirector_addr, "127.0.0.1:9000");
    assert_eq!(config.read_timeout(), Duration::from_secs(10));
    assert_eq!(config.write_timeout(), Duration::from_secs(3));
    assert_eq!(config.admin_addr, "127.0.0.1:9001");
    assert_eq!(config.db_path, PathBuf::from("/tmp/redirects.db"));
    assert_eq!(config.log.level, "debug");
  }

  #[test]
  fn test_bad_timeout_rejected() {
    assert!(Config::try_parse_from(["stemdirect", "--redirector-readtimeout", "soon"]).is_err());
  }
}

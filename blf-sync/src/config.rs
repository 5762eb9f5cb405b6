//! Service configuration from flags and environment.
//!
//! Every setting can be given as a flag or through the environment variable
//! named next to it. `.env.local` and `.env` are read first when present.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use thiserror::Error;

use crate::extensions::ExtensionsError;
use crate::logging::LoggingMode;

pub const DEFAULT_STUN_SERVERS: &str = "stun.l.google.com,stun2.l.google.com,stun3.l.google.com,stun4.l.google.com";

const DEFAULT_SIP_PORT: u16 = 5060;

/// Invalid or incomplete configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported SIP transport {0:?}; only udp is implemented")]
    UnsupportedTransport(String),

    #[error("{0} is required")]
    MissingSetting(&'static str),

    #[error("Invalid SIP listen address {value:?}: {reason}")]
    InvalidListen { value: String, reason: String },

    #[error("SIP_CONTACT_IP is auto/stun/empty but no public address was discovered; check STUN_SERVERS and network")]
    ContactUnresolved,

    #[error(transparent)]
    Extensions(#[from] ExtensionsError),
}

/// Bridge PBX busy-lamp-field state into Microsoft Teams presence
#[derive(Debug, Clone, Parser)]
#[command(name = "sip-blf-sync", version, about, long_about = None)]
pub struct Config {
    /// PBX address, host[:port]
    #[arg(long, env = "SIP_SERVER", default_value = "127.0.0.1:5060")]
    pub sip_server: String,

    /// Signaling transport (only udp)
    #[arg(long, env = "SIP_TRANSPORT", default_value = "udp")]
    pub sip_transport: String,

    #[arg(long, env = "SIP_USERNAME", default_value = "blf-client")]
    pub sip_username: String,

    #[arg(long, env = "SIP_PASSWORD", default_value = "", hide_env_values = true)]
    pub sip_password: String,

    /// Address advertised to the PBX; auto, stun or empty discovers it via STUN
    #[arg(long, env = "SIP_CONTACT_IP", default_value = "127.0.0.1")]
    pub sip_contact_ip: String,

    /// Local bind address; defaults from the contact address
    #[arg(long, env = "SIP_LISTEN")]
    pub sip_listen: Option<String>,

    /// Comma-separated STUN servers, host[:port]
    #[arg(long, env = "STUN_SERVERS", default_value = DEFAULT_STUN_SERVERS)]
    pub stun_servers: String,

    /// Extension list, JSON or CSV
    #[arg(long = "extensions", env = "EXTENSIONS_JSON", default_value = "config/extensions.json")]
    pub extensions_path: PathBuf,

    /// Persisted per-extension session ids
    #[arg(long = "presence-state", env = "PRESENCE_STATE_JSON", default_value = "config/presence-state.json")]
    pub presence_state_path: PathBuf,

    #[arg(long, env = "AZURE_TENANT_ID", default_value = "")]
    pub azure_tenant_id: String,

    #[arg(long, env = "AZURE_CLIENT_ID", default_value = "")]
    pub azure_client_id: String,

    #[arg(long, env = "AZURE_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub azure_client_secret: String,

    /// Minutes a published presence holds (5 to 240)
    #[arg(
        long,
        env = "PRESENCE_EXPIRATION_MINUTES",
        default_value_t = 60,
        value_parser = clap::value_parser!(u32).range(5..=240)
    )]
    pub presence_expiration_minutes: u32,

    /// Re-register and re-subscribe before the PBX grants lapse
    #[arg(
        long = "refresh-subscriptions",
        env = "SIP_REFRESH_SUBSCRIPTIONS",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub refresh_subscriptions: bool,

    #[arg(long, env = "BLF_LOG_MODE", value_enum, default_value_t = LoggingMode::Development)]
    pub log_mode: LoggingMode,
}

impl Config {
    /// Read `.env.local` then `.env`, then parse flags and environment.
    pub fn load() -> Self {
        load_env_files();
        Self::parse()
    }

    /// Check settings that clap cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sip_transport.trim().eq_ignore_ascii_case("udp") {
            return Err(ConfigError::UnsupportedTransport(self.sip_transport.clone()));
        }
        for (name, value) in [
            ("AZURE_TENANT_ID", &self.azure_tenant_id),
            ("AZURE_CLIENT_ID", &self.azure_client_id),
            ("AZURE_CLIENT_SECRET", &self.azure_client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingSetting(name));
            }
        }
        Ok(())
    }

    /// STUN servers with blanks removed
    pub fn stun_servers(&self) -> Vec<String> {
        self.stun_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Bind address for the SIP socket.
    ///
    /// An explicit `SIP_LISTEN` wins. Otherwise `0.0.0.0:5060` when the
    /// contact was discovered or is still a placeholder, else
    /// `<contact-ip>:5060`.
    pub fn listen_addr(&self, discovered: bool) -> Result<SocketAddr, ConfigError> {
        let value = match self.sip_listen.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None if discovered || stun_client::is_contact_sentinel(&self.sip_contact_ip) => {
                format!("0.0.0.0:{}", DEFAULT_SIP_PORT)
            }
            None => {
                let ip = self.sip_contact_ip.trim();
                if ip.contains(':') {
                    format!("[{}]:{}", ip, DEFAULT_SIP_PORT)
                } else {
                    format!("{}:{}", ip, DEFAULT_SIP_PORT)
                }
            }
        };

        value.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidListen {
            value,
            reason: e.to_string(),
        })
    }
}

/// Load `.env.local` and `.env` from the working directory, if present.
///
/// Variables already set in the environment are left alone, so `.env.local`
/// takes precedence over `.env`.
pub fn load_env_files() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["sip-blf-sync"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    fn with_azure(args: &[&str]) -> Config {
        let mut all = vec![
            "--azure-tenant-id",
            "t",
            "--azure-client-id",
            "c",
            "--azure-client-secret",
            "s",
        ];
        all.extend_from_slice(args);
        parse(&all)
    }

    #[test]
    fn test_validate_accepts_udp() {
        assert!(with_azure(&["--sip-transport", "UDP"]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tcp() {
        let err = with_azure(&["--sip-transport", "tcp"]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedTransport(ref t) if t == "tcp"));
    }

    #[test]
    fn test_validate_requires_azure_secret() {
        let config = parse(&[
            "--sip-transport",
            "udp",
            "--azure-tenant-id",
            "t",
            "--azure-client-id",
            "c",
            "--azure-client-secret",
            " ",
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSetting("AZURE_CLIENT_SECRET"))
        ));
    }

    #[test]
    fn test_stun_servers_skip_blanks() {
        let config = parse(&["--stun-servers", " a.example , ,b.example:3478,"]);
        assert_eq!(config.stun_servers(), vec!["a.example", "b.example:3478"]);
    }

    #[test]
    fn test_expiration_range_enforced() {
        assert!(Config::try_parse_from(["sip-blf-sync", "--presence-expiration-minutes", "4"]).is_err());
        assert!(Config::try_parse_from(["sip-blf-sync", "--presence-expiration-minutes", "241"]).is_err());
        assert_eq!(
            parse(&["--presence-expiration-minutes", "240"]).presence_expiration_minutes,
            240
        );
    }

    #[rstest]
    #[case(&["--sip-contact-ip", "192.0.2.7"], false, "192.0.2.7:5060")]
    #[case(&["--sip-contact-ip", "192.0.2.7"], true, "0.0.0.0:5060")]
    #[case(&["--sip-contact-ip", "auto"], false, "0.0.0.0:5060")]
    #[case(&["--sip-contact-ip", "2001:db8::7"], false, "[2001:db8::7]:5060")]
    #[case(&["--sip-contact-ip", "auto", "--sip-listen", "127.0.0.1:5070"], true, "127.0.0.1:5070")]
    fn test_listen_addr(#[case] args: &[&str], #[case] discovered: bool, #[case] expected: &str) {
        let config = parse(args);
        assert_eq!(config.listen_addr(discovered).unwrap(), expected.parse().unwrap());
    }

    #[test]
    fn test_invalid_listen_addr() {
        let config = parse(&["--sip-listen", "not-an-address"]);
        assert!(matches!(config.listen_addr(false), Err(ConfigError::InvalidListen { .. })));
    }

    #[test]
    fn test_refresh_flag() {
        assert!(parse(&["--refresh-subscriptions"]).refresh_subscriptions);
    }

    #[test]
    fn test_log_mode_value() {
        assert_eq!(parse(&["--log-mode", "json"]).log_mode, LoggingMode::Json);
    }
}

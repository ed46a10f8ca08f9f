//! # Cli
//!
//! Command line arguments and configuration taken from the environment.

use std::env;

use clap::Parser;
use log::LevelFilter;

use crate::core::{
    bpf::XdpMode,
    errors::{Error, Result},
    pipeline::PipelineConfig,
};

/// Environment variable holding the log level.
pub(crate) const ENV_LOG: &str = "XDPTRACE_LOG";
/// Environment variable holding the XDP attachment mode.
pub(crate) const ENV_XDP_MODE: &str = "XDPTRACE_XDP_MODE";

/// Attach a dummy XDP program to a network device and trace its entry and
/// exit with fentry/fexit programs.
///
/// Trace output can be read from /sys/kernel/debug/tracing/trace_pipe. The
/// log level and XDP attachment mode can be set using the XDPTRACE_LOG
/// (error, warn, info, debug, trace) and XDPTRACE_XDP_MODE (auto, generic,
/// driver, offload) environment variables.
#[derive(Parser, Debug)]
#[command(name = "xdptrace", version)]
pub(crate) struct XdpTraceCli {
    #[arg(
        short,
        long,
        default_value = "lo",
        help = "Network device to attach the XDP program to"
    )]
    pub(crate) device: String,
}

/// Full configuration, once the command line and the environment were
/// parsed.
#[derive(Debug)]
pub(crate) struct Config {
    pub(crate) device: String,
    pub(crate) log_level: LevelFilter,
    pub(crate) xdp_mode: XdpMode,
}

impl Config {
    pub(crate) fn from_env(cli: XdpTraceCli) -> Result<Self> {
        Self::from_vars(cli, |name| env::var(name).ok())
    }

    fn from_vars<F>(cli: XdpTraceCli, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = match var(ENV_LOG).as_deref() {
            None | Some("") => LevelFilter::Info,
            Some(level @ ("error" | "warn" | "info" | "debug" | "trace")) => level
                .parse()
                .map_err(|_| Error::Config(format!("invalid {ENV_LOG} value '{level}'")))?,
            Some(level) => {
                return Err(Error::Config(format!(
                    "invalid {ENV_LOG} value '{level}' (expected error, warn, info, debug or trace)"
                )))
            }
        };

        let xdp_mode = match var(ENV_XDP_MODE).as_deref() {
            None | Some("") => XdpMode::default(),
            Some(mode) => mode.parse()?,
        };

        Ok(Self {
            device: cli.device,
            log_level,
            xdp_mode,
        })
    }

    pub(crate) fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            device: self.device.clone(),
            xdp_mode: self.xdp_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::{error::ErrorKind, CommandFactory};
    use test_case::test_case;

    use super::*;

    fn config(args: &[&str], vars: &[(&str, &str)]) -> Result<Config> {
        let cli = XdpTraceCli::try_parse_from(args).unwrap();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(cli, |name| vars.get(name).cloned())
    }

    #[test]
    fn cli() {
        XdpTraceCli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let config = config(&["xdptrace"], &[]).unwrap();
        assert_eq!(config.device, "lo");
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.xdp_mode, XdpMode::Auto);
    }

    #[test_case(&["xdptrace", "-d", "eth0"] ; "short")]
    #[test_case(&["xdptrace", "--device", "eth0"] ; "long")]
    #[test_case(&["xdptrace", "--device=eth0"] ; "long with equal")]
    fn device(args: &[&str]) {
        assert_eq!(config(args, &[]).unwrap().device, "eth0");
    }

    #[test]
    fn unknown_argument() {
        assert_eq!(
            XdpTraceCli::try_parse_from(["xdptrace", "--mode", "skb"])
                .unwrap_err()
                .kind(),
            ErrorKind::UnknownArgument
        );
    }

    #[test_case("error", LevelFilter::Error ; "error")]
    #[test_case("warn", LevelFilter::Warn ; "warn")]
    #[test_case("debug", LevelFilter::Debug ; "debug")]
    #[test_case("trace", LevelFilter::Trace ; "trace")]
    #[test_case("", LevelFilter::Info ; "empty")]
    fn log_level(value: &str, level: LevelFilter) {
        let config = config(&["xdptrace"], &[(ENV_LOG, value)]).unwrap();
        assert_eq!(config.log_level, level);
    }

    #[test_case(ENV_LOG, "verbose" ; "bad log level")]
    #[test_case(ENV_LOG, "off" ; "logs off")]
    #[test_case(ENV_XDP_MODE, "native-ish" ; "bad xdp mode")]
    fn invalid_env(name: &str, value: &str) {
        assert!(matches!(
            config(&["xdptrace"], &[(name, value)]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn pipeline_config() {
        let config = config(&["xdptrace", "-d", "veth0"], &[(ENV_XDP_MODE, "generic")]).unwrap();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.device, "veth0");
        assert_eq!(pipeline.xdp_mode, XdpMode::Generic);
    }
}

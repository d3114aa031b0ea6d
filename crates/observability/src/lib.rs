//! Logging configuration for strand nodes.

use clap::Args;
use eyre::{Result, WrapErr, eyre};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LogArgs {
    /// Silence all output except errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub verbosity: u8,

    /// Extra filter directives (e.g. "strand_swarm=trace,strand_net_transport=debug").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub json: bool,
}

impl LogArgs {
    fn base_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Builds the filter for `args`.
///
/// `--quiet` shows errors only. Otherwise `RUST_LOG` is used if set, falling
/// back to a level derived from the verbosity flags, and `--log.filter`
/// directives are layered on top.
pub fn build_filter(args: &LogArgs) -> Result<EnvFilter> {
    if args.quiet {
        return Ok(EnvFilter::new(args.base_level()));
    }

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.base_level()));

    if let Some(custom) = &args.filter {
        for directive in custom.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let directive = directive
                .parse()
                .map_err(|e| eyre!("invalid log directive {directive:?}: {e}"))?;
            filter = filter.add_directive(directive);
        }
    }

    Ok(filter)
}

/// Installs the global subscriber.
pub fn init_logging(args: &LogArgs) -> Result<()> {
    let filter = build_filter(args)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if args.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| eyre!("{e}"))
    .wrap_err("failed to install tracing subscriber")?;

    tracing::debug!(json = args.json, "Logging initialised");
    Ok(())
}

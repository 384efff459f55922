use clap::{ArgAction, ValueEnum};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging flags shared by every subcommand.
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Log more: -v info, -vv debug, -vvv trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Log level for the duplex crates. Overrides -v.
    #[arg(long, global = true, env = "DUPLEX_LOG", value_enum)]
    log_level: Option<LogLevel>,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,
}

impl LogArgs {
    pub fn level(&self) -> LevelFilter {
        if let Some(level) = self.log_level {
            return level.into();
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Directives applied when `RUST_LOG` is unset.
    fn directives(&self) -> String {
        let level = self.level().to_string().to_lowercase();
        format!("duplex={level},duplex_cli={level}")
    }

    /// Installs the subscriber. Everything goes to stderr, since stdout may
    /// be carrying a session.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()));
        let output = fmt::layer().with_writer(std::io::stderr);
        let output = match self.log_format {
            LogFormat::Text => output.boxed(),
            LogFormat::Json => output.json().boxed(),
        };
        let _ = tracing_subscriber::registry()
            .with(output)
            .with(filter)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        log: LogArgs,
    }

    fn parse(args: &[&str]) -> LogArgs {
        Cli::try_parse_from(std::iter::once("duplex").chain(args.iter().copied()))
            .unwrap()
            .log
    }

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(parse(&[]).level(), LevelFilter::WARN);
        assert_eq!(parse(&["-v"]).level(), LevelFilter::INFO);
        assert_eq!(parse(&["-vv"]).level(), LevelFilter::DEBUG);
        assert_eq!(parse(&["-vvvv"]).level(), LevelFilter::TRACE);
    }

    #[test]
    fn explicit_level_wins() {
        let args = parse(&["-vv", "--log-level", "error"]);
        assert_eq!(args.level(), LevelFilter::ERROR);
        assert_eq!(args.directives(), "duplex=error,duplex_cli=error");
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
    }
}

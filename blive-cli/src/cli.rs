use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Bilibili live danmaku client
#[derive(Parser, Debug)]
#[command(name = "blive", version, about, long_about = None)]
pub struct Args {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the configured rooms and print every event
    Run {
        /// Path to the configuration file
        #[arg(short, long, env = "BLIVE_CONFIG")]
        config: Option<PathBuf>,

        /// Print a human readable line instead of JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Decode a hex dump of one socket message
    Decode {
        /// Hex encoded frame bytes (whitespace is ignored)
        hex: String,

        /// Room id attached to the decoded events
        #[arg(long, default_value_t = 0)]
        room: u64,

        /// Print a human readable line instead of JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from(["blive", "-v", "run", "--config", "a.toml", "--pretty"]);
        assert!(args.verbose);
        match args.command {
            Commands::Run { config, pretty } => {
                assert_eq!(config, Some(PathBuf::from("a.toml")));
                assert!(pretty);
            }
            other => panic!("Unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_decode() {
        let args = Args::parse_from(["blive", "decode", "00ff", "--room", "5050"]);
        assert!(matches!(
            args.command,
            Commands::Decode { ref hex, room: 5050, pretty: false } if hex == "00ff"
        ));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["blive", "-v", "-q", "decode", "00"]).is_err());
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ssh-tunnel", about = "Keeps an SSH SOCKS5 tunnel alive", version)]
pub struct Cli {
    /// TOML config file; SSH_TUNNEL_* variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start and supervise the tunnel (default)
    Run,
    /// Report whether an instance owns the endpoint lock
    Status,
    /// Print the SSH command line that would be spawned
    Args,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["ssh-tunnel"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.command(), Command::Run);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_run() {
        let cli = Cli::try_parse_from(["ssh-tunnel", "run"]).unwrap();
        assert_eq!(cli.command(), Command::Run);
    }

    #[test]
    fn test_status_with_config() {
        let cli = Cli::try_parse_from(["ssh-tunnel", "status", "--config", "t.toml"]).unwrap();
        assert_eq!(cli.command(), Command::Status);
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
    }

    #[test]
    fn test_config_before_subcommand() {
        let cli = Cli::try_parse_from(["ssh-tunnel", "-c", "t.toml", "args"]).unwrap();
        assert_eq!(cli.command(), Command::Args);
        assert_eq!(cli.config, Some(PathBuf::from("t.toml")));
    }

    #[test]
    fn test_unknown_subcommand_errors() {
        assert!(Cli::try_parse_from(["ssh-tunnel", "bogus"]).is_err());
    }
}

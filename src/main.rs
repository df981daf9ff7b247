use clap::Parser;
use owo_colors::OwoColorize;
use ssh_tunnel::cli::{Cli, Command};
use ssh_tunnel::config::{self, Config};
use ssh_tunnel::lock::{self, LockStatus};
use ssh_tunnel::paths::Paths;
use std::fmt::Display;
use std::path::Path;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => fatal(e),
    };

    match cli.command() {
        Command::Run => {
            if let Err(e) = ssh_tunnel::daemon::run(config).await {
                fatal(e);
            }
        }
        Command::Status => {
            let paths = Paths::new(&config);
            let status = match lock::inspect(paths.lock_file()) {
                Ok(status) => status,
                Err(e) => fatal(format!("lock file {}: {e}", paths.lock_file().display())),
            };
            let (line, running) = status_line(&status, &config, paths.lock_file());
            if running {
                println!("{}", line.green());
            } else {
                println!("{}", line.yellow());
                std::process::exit(1);
            }
        }
        Command::Args => {
            let mut words = vec![config.ssh_command.clone()];
            words.extend(config.ssh_args());
            println!("{}", shell_words::join(words));
        }
    }

    Ok(())
}

/// Single-line diagnostic, then exit 1.
fn fatal(error: impl Display) -> ! {
    eprintln!("{} {error}", "error:".red().bold());
    std::process::exit(1);
}

fn status_line(status: &LockStatus, config: &Config, lock_file: &Path) -> (String, bool) {
    let endpoint = &config.endpoint;
    match status {
        LockStatus::Held(pid) => (format!("running: {endpoint} (PID {pid})"), true),
        LockStatus::Free => (format!("not running: {endpoint}"), false),
        LockStatus::Stale(pid) => (
            format!(
                "not running: {endpoint} (stale lock {} from PID {pid})",
                lock_file.display()
            ),
            false,
        ),
        LockStatus::Unreadable(_) => (
            format!(
                "not running: {endpoint} (unreadable lock {})",
                lock_file.display()
            ),
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        config::resolve_config(None, |key| {
            (key == "SSH_TUNNEL_REMOTE_ADDRESS").then(|| "user@host".to_string())
        })
        .unwrap()
    }

    #[test]
    fn test_status_line_running() {
        let (line, running) = status_line(
            &LockStatus::Held(42),
            &test_config(),
            Path::new("ssh-tunnel-8080.pid"),
        );
        assert!(running);
        assert_eq!(line, "running: localhost:8080 (PID 42)");
    }

    #[test]
    fn test_status_line_free() {
        let (line, running) =
            status_line(&LockStatus::Free, &test_config(), Path::new("x.pid"));
        assert!(!running);
        assert_eq!(line, "not running: localhost:8080");
    }

    #[test]
    fn test_status_line_stale() {
        let (line, running) = status_line(
            &LockStatus::Stale(7),
            &test_config(),
            Path::new("ssh-tunnel-8080.pid"),
        );
        assert!(!running);
        assert_eq!(
            line,
            "not running: localhost:8080 (stale lock ssh-tunnel-8080.pid from PID 7)"
        );
    }

    #[test]
    fn test_status_line_unreadable() {
        let (line, running) = status_line(
            &LockStatus::Unreadable("junk".to_string()),
            &test_config(),
            Path::new("t.pid"),
        );
        assert!(!running);
        assert!(line.contains("unreadable lock t.pid"));
    }
}

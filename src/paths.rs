use crate::config::Config;
use crate::endpoint::TunnelEndpoint;
use std::path::{Path, PathBuf};

/// Lock and log file locations, qualified by the endpoint port so several
/// tunnels on different ports can share a working directory.
#[derive(Debug, Clone)]
pub struct Paths {
    lock_file: PathBuf,
    log_file: PathBuf,
}

impl Paths {
    pub fn new(config: &Config) -> Self {
        Self::for_endpoint(&config.pid_file, &config.log_file, &config.endpoint)
    }

    pub fn for_endpoint(pid_file: &str, log_file: &str, endpoint: &TunnelEndpoint) -> Self {
        Self {
            lock_file: PathBuf::from(port_qualified(pid_file, "pid", endpoint.port())),
            log_file: PathBuf::from(port_qualified(log_file, "log", endpoint.port())),
        }
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// `ssh-tunnel.pid` + 8080 becomes `ssh-tunnel-8080.pid`; names without the
/// expected extension get the port appended.
pub fn port_qualified(name: &str, extension: &str, port: u16) -> String {
    let suffix = format!(".{extension}");
    match name.strip_suffix(&suffix) {
        Some(base) if !base.is_empty() && !base.ends_with('/') => {
            format!("{base}-{port}{suffix}")
        }
        _ => format!("{name}-{port}"),
    }
}

use crate::endpoint::TunnelEndpoint;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;

/// Overall budget for the request routed through the tunnel.
pub const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    PortUnreachable,
    TrafficFailed,
}

impl HealthState {
    pub fn is_healthy(self) -> bool {
        self == HealthState::Healthy
    }
}

/// The two network checks a health cycle is made of.
pub trait Probe {
    fn port_reachable(
        &self,
        endpoint: &TunnelEndpoint,
        timeout: Duration,
    ) -> impl Future<Output = bool> + Send;

    fn traffic_ok(
        &self,
        endpoint: &TunnelEndpoint,
        target: &str,
        timeout: Duration,
    ) -> impl Future<Output = bool> + Send;
}

/// Real probe: TCP connect, then `HEAD target` through the endpoint as a
/// SOCKS5 proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkProbe;

impl Probe for NetworkProbe {
    async fn port_reachable(&self, endpoint: &TunnelEndpoint, timeout: Duration) -> bool {
        let addr = endpoint.address();
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::error!(host = %addr, error = %e, "proxy port unavailable");
                false
            }
            Err(_) => {
                tracing::error!(
                    host = %addr,
                    timeout_ms = timeout.as_millis() as u64,
                    "proxy port unavailable: connect timed out"
                );
                false
            }
        }
    }

    async fn traffic_ok(&self, endpoint: &TunnelEndpoint, target: &str, timeout: Duration) -> bool {
        let client = match probe_client(endpoint, timeout) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to build probe client");
                return false;
            }
        };

        match client.head(target).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => true,
            Ok(resp) => {
                tracing::error!(url = target, status = %resp.status(), "traffic check failed");
                false
            }
            Err(e) => {
                tracing::error!(url = target, error = %e, "traffic check failed");
                false
            }
        }
    }
}

/// Client whose only route is the tunnel. Certificate verification is off:
/// this request proves the tunnel forwards traffic, nothing about the target.
/// A fresh client per check keeps pooled connections from outliving a restart.
fn probe_client(endpoint: &TunnelEndpoint, timeout: Duration) -> reqwest::Result<reqwest::Client> {
    let proxy = reqwest::Proxy::all(format!("socks5h://{}", endpoint.address()))?;
    reqwest::Client::builder()
        .proxy(proxy)
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .timeout(timeout)
        .build()
}

/// Two-stage, short-circuiting tunnel check.
#[derive(Debug, Clone)]
pub struct HealthChecker<P = NetworkProbe> {
    probe: P,
    endpoint: TunnelEndpoint,
    target: String,
    port_timeout: Duration,
    probe_timeout: Duration,
}

impl<P: Probe> HealthChecker<P> {
    pub fn new(
        probe: P,
        endpoint: TunnelEndpoint,
        target: impl Into<String>,
        port_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            endpoint,
            target: target.into(),
            port_timeout,
            probe_timeout: PROBE_REQUEST_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Stage one alone; used by the readiness poll after a spawn.
    pub async fn port_reachable(&self) -> bool {
        self.probe
            .port_reachable(&self.endpoint, self.port_timeout)
            .await
    }

    pub async fn check(&self) -> HealthState {
        if !self.port_reachable().await {
            return HealthState::PortUnreachable;
        }
        if !self
            .probe
            .traffic_ok(&self.endpoint, &self.target, self.probe_timeout)
            .await
        {
            return HealthState::TrafficFailed;
        }
        HealthState::Healthy
    }
}

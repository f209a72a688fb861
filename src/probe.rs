//! Reachability checks.
//!
//! A probe never fails: every problem, from a refused connection to a missing
//! `ping` binary, comes back as a down [`Probe`] with the reason in `detail`.

use anyhow::{Context, Result};
use hickory_resolver::TokioResolver;
use std::future::Future;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence};
use tokio::process::Command;
use tracing::{debug, error};

use crate::models::CheckMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub up: bool,
    pub detail: String,
}

impl Probe {
    pub fn up(detail: impl Into<String>) -> Self {
        Self { up: true, detail: detail.into() }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self { up: false, detail: detail.into() }
    }
}

pub trait Prober: Send + Sync + 'static {
    /// Performs one check of `target`. No retries.
    fn probe(&self, method: CheckMethod, target: &str) -> impl Future<Output = Probe> + Send;
}

/// Runs the system `ping` and `curl` binaries.
#[derive(Debug, Clone)]
pub struct CommandProber {
    ping: String,
    curl: String,
}

impl Default for CommandProber {
    fn default() -> Self {
        Self::with_programs("ping", "curl")
    }
}

impl CommandProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_programs(ping: impl Into<String>, curl: impl Into<String>) -> Self {
        Self { ping: ping.into(), curl: curl.into() }
    }

    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(program, ?args, "Executing probe command");
        cmd.output().await
    }

    async fn ping(&self, host: &str) -> Probe {
        let count_flag = if cfg!(windows) { "-n" } else { "-c" };
        let output = match self.run(&self.ping, &[count_flag, "1", host]).await {
            Ok(output) => output,
            Err(e) => return Probe::down(format!("failed to run {}: {}", self.ping, e)),
        };

        log_stderr("ping", host, &output.stderr);
        if output.status.success() {
            Probe::up("ICMP echo reply received")
        } else {
            Probe::down(format!("ping {}", exit_detail(&output)))
        }
    }

    async fn curl(&self, url: &str) -> Probe {
        let args = ["-s", "-o", null_device(), "-w", "%{http_code}", url];
        let output = match self.run(&self.curl, &args).await {
            Ok(output) => output,
            Err(e) => return Probe::down(format!("failed to run {}: {}", self.curl, e)),
        };

        log_stderr("curl", url, &output.stderr);
        let code = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match code.as_str() {
            "200" => Probe::up("HTTP 200"),
            "" => Probe::down(format!("curl {}", exit_detail(&output))),
            other => Probe::down(format!("HTTP {}", other)),
        }
    }
}

impl Prober for CommandProber {
    async fn probe(&self, method: CheckMethod, target: &str) -> Probe {
        match method {
            CheckMethod::Ping => self.ping(target).await,
            CheckMethod::Curl => self.curl(target).await,
        }
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

fn log_stderr(tool: &str, host: &str, stderr: &[u8]) {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        error!(tool, host, "{}", stderr);
    }
}

fn exit_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    match (output.status.code(), stderr.is_empty()) {
        (Some(code), true) => format!("exited with status {}", code),
        (Some(code), false) => format!("exited with status {}: {}", code, stderr),
        (None, _) => "terminated by signal".to_string(),
    }
}

/// HTTP GET that counts only a 200 answer as up.
pub struct HttpCheck {
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(timeout: Duration) -> Result<Self> {
        // curl does not follow redirects by default, so neither do we.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    pub async fn check(&self, target: &str) -> Probe {
        let url = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{}", target)
        };

        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => Probe::up("HTTP 200"),
            Ok(resp) => Probe::down(format!("HTTP {}", resp.status().as_u16())),
            Err(e) => Probe::down(format!("HTTP request failed: {}", e)),
        }
    }
}

/// In-process ICMP echo and HTTP GET. ICMP needs raw-socket privileges.
pub struct NativeProber {
    ping_client: PingClient,
    http: HttpCheck,
    dns_resolver: TokioResolver,
    timeout: Duration,
}

impl NativeProber {
    pub fn new(timeout: Duration) -> Result<Self> {
        let ping_client = PingClient::new(&PingConfig::default())
            .context("Failed to create Ping Client (raw sockets need elevated privileges)")?;

        let dns_resolver = TokioResolver::builder_tokio()
            .context("Failed to read system resolver configuration")?
            .build();

        Ok(Self {
            ping_client,
            http: HttpCheck::new(timeout)?,
            dns_resolver,
            timeout,
        })
    }

    async fn ping(&self, host: &str) -> Probe {
        let ip = match self.resolve(host).await {
            Ok(ip) => ip,
            Err(e) => return Probe::down(e),
        };

        let payload = [0u8; 56];
        let mut pinger = self.ping_client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, latency)) => Probe::up(format!(
                "ICMP reply from {} in {:.1}ms",
                ip,
                latency.as_secs_f64() * 1000.0
            )),
            Err(e) => Probe::down(format!("ICMP to {} failed: {}", ip, e)),
        }
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        match self.dns_resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "No IP Address Found".into()),
            Err(e) => Err(format!("DNS Resolution Failed: {}", e)),
        }
    }
}

impl Prober for NativeProber {
    async fn probe(&self, method: CheckMethod, target: &str) -> Probe {
        match method {
            CheckMethod::Ping => self.ping(target).await,
            CheckMethod::Curl => self.http.check(target).await,
        }
    }
}

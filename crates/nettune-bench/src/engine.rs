//! Benchmark engine
//!
//! Latency, DNS and connect probes run concurrently and are joined; the
//! throughput probe saturates the link, so it runs alone afterwards.

use crate::probes;
use crate::result::{
    BenchmarkResult, BenchmarkTests, LatencyStats, Probe, ThroughputStats, TimingStats,
};
use nettune_common::{
    AuditAction, AuditEntry, AuditSink, CommandExecutor, CommandLine, NetTuneError, Targets,
    WorkloadProfile,
};
use std::sync::Arc;
use std::time::Duration;

/// Ping count of the quick latency check
pub const QUICK_PING_COUNT: u32 = 10;

#[derive(Debug, Clone)]
pub struct BenchmarkSettings {
    pub ping_host: String,
    pub dns_server: String,
    pub dns_domain: String,
    pub connect_url: String,
    /// Throughput is only measured when a peer is configured
    pub iperf_host: Option<String>,
    pub iperf_port: u16,
    pub iperf_duration_secs: u32,
    /// Repetitions of the DNS and connect probes
    pub samples: u32,
    /// Pause between repeated DNS and connect probes
    pub probe_interval: Duration,
    pub command_timeout: Duration,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            ping_host: "8.8.8.8".to_string(),
            dns_server: "8.8.8.8".to_string(),
            dns_domain: "google.com".to_string(),
            connect_url: "https://www.google.com".to_string(),
            iperf_host: None,
            iperf_port: 5201,
            iperf_duration_secs: 5,
            samples: 5,
            probe_interval: Duration::from_millis(200),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl BenchmarkSettings {
    /// Override probe endpoints with a plan's `validate.targets`
    ///
    /// The iperf target may carry a port as `host:port`.
    pub fn with_targets(mut self, targets: &Targets) -> Self {
        if let Some(ping) = &targets.ping {
            self.ping_host = ping.clone();
        }
        if let Some(iperf) = &targets.iperf {
            match iperf.rsplit_once(':').and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h, p))) {
                Some((host, port)) if !host.contains(':') => {
                    self.iperf_host = Some(host.to_string());
                    self.iperf_port = port;
                }
                _ => self.iperf_host = Some(iperf.clone()),
            }
        }
        self
    }
}

pub struct BenchmarkEngine {
    executor: Arc<dyn CommandExecutor>,
    audit: Arc<dyn AuditSink>,
    settings: BenchmarkSettings,
}

impl BenchmarkEngine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        audit: Arc<dyn AuditSink>,
        settings: BenchmarkSettings,
    ) -> Self {
        Self { executor, audit, settings }
    }

    pub fn settings(&self) -> &BenchmarkSettings {
        &self.settings
    }

    /// Run the full battery for a profile
    pub async fn run(&self, profile: WorkloadProfile) -> BenchmarkResult {
        self.run_with(profile, &self.settings).await
    }

    /// Run the full battery against explicit endpoints
    pub async fn run_with(
        &self,
        profile: WorkloadProfile,
        settings: &BenchmarkSettings,
    ) -> BenchmarkResult {
        tracing::info!("Running {} benchmark", profile);
        let (latency, dns, connect_time) = tokio::join!(
            self.latency(settings, profile.ping_samples()),
            self.dns(settings),
            self.connect(settings),
        );
        let throughput = self.throughput(settings).await;

        let tests = BenchmarkTests { latency, throughput, dns, connect_time };
        let result = BenchmarkResult::new(profile, tests);
        tracing::info!("Benchmark finished: {}", result.summary);
        self.audit.record(AuditEntry::new(AuditAction::ValidationTest, true).with_details(
            serde_json::json!({
                "profile": profile,
                "summary": result.summary,
                "latency": result.tests.latency.available,
                "throughput": result.tests.throughput.available,
                "dns": result.tests.dns.available,
                "connect_time": result.tests.connect_time.available,
            }),
        ));
        result
    }

    /// Ten pings to the configured host
    pub async fn quick_latency(&self) -> Probe<LatencyStats> {
        let probe = self.latency(&self.settings, QUICK_PING_COUNT).await;
        self.audit.record(
            AuditEntry::new(AuditAction::ValidationTest, probe.available)
                .with_details(serde_json::json!({ "quick": true, "message": probe.message })),
        );
        probe
    }

    async fn output(&self, cmd: &CommandLine, timeout: Duration) -> Result<String, String> {
        tracing::debug!("probe: {}", cmd);
        match self.executor.run(cmd, timeout).await {
            Ok(out) if out.ok => Ok(out.stdout),
            Ok(out) => Err(out.error_message()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn latency(&self, settings: &BenchmarkSettings, count: u32) -> Probe<LatencyStats> {
        let host = settings.ping_host.as_str();
        if !probes::is_safe_target(host) {
            return unavailable(format!("invalid ping target {:?}", host));
        }
        let cmd = probes::ping_command(host, count);
        let timeout =
            Duration::from_secs(u64::from(count) + u64::from(probes::PING_REPLY_WAIT_SECS) + 10);

        // partial loss makes ping exit non-zero while still printing replies
        let stdout = match self.executor.run(&cmd, timeout).await {
            Ok(out) if out.ok || !out.stdout.is_empty() => out.stdout,
            Ok(out) => return unavailable(format!("ping failed: {}", out.error_message())),
            Err(e) => return unavailable(format!("ping failed: {}", e)),
        };
        match probes::parse_ping(host, &stdout) {
            Ok(stats) => {
                let message = format!(
                    "avg {:.2}ms, jitter {:.2}ms, loss {:.1}%",
                    stats.avg_ms, stats.jitter_ms, stats.packet_loss_pct
                );
                Probe::measured(stats, message)
            }
            Err(e) => unavailable(e),
        }
    }

    async fn throughput(&self, settings: &BenchmarkSettings) -> Probe<ThroughputStats> {
        let Some(host) = settings.iperf_host.as_deref() else {
            return unavailable("no throughput peer configured".to_string());
        };
        if !probes::is_safe_target(host) {
            return unavailable(format!("invalid iperf3 target {:?}", host));
        }
        let duration = settings.iperf_duration_secs;
        let cmd = probes::iperf_command(host, settings.iperf_port, duration);
        let timeout = Duration::from_secs(u64::from(duration) + 10);

        let parsed = self
            .output(&cmd, timeout)
            .await
            .and_then(|stdout| probes::parse_iperf(&stdout));
        match parsed {
            Ok((throughput_mbps, retransmits)) => Probe::measured(
                ThroughputStats {
                    host: host.to_string(),
                    port: settings.iperf_port,
                    throughput_mbps,
                    retransmits,
                    duration_secs: duration,
                },
                format!("{:.2} Mbps, {} retransmits", throughput_mbps, retransmits),
            ),
            Err(e) => unavailable(format!(
                "iperf3 peer {}:{} unavailable: {}",
                host, settings.iperf_port, e
            )),
        }
    }

    async fn dns(&self, settings: &BenchmarkSettings) -> Probe<TimingStats> {
        let server = settings.dns_server.as_str();
        if !probes::is_safe_target(server) || !probes::is_safe_target(&settings.dns_domain) {
            return unavailable("invalid DNS probe target".to_string());
        }
        let cmd = probes::dig_command(server, &settings.dns_domain);
        let samples = self.repeat(settings, &cmd, probes::parse_dig_query_time).await;
        timing(server, &samples, "DNS query")
    }

    async fn connect(&self, settings: &BenchmarkSettings) -> Probe<TimingStats> {
        let url = settings.connect_url.as_str();
        if !probes::is_safe_target(url) {
            return unavailable(format!("invalid connect target {:?}", url));
        }
        let cmd = probes::curl_command(url);
        let samples = self.repeat(settings, &cmd, probes::parse_curl_connect_ms).await;
        timing(url, &samples, "connect")
    }

    async fn repeat(
        &self,
        settings: &BenchmarkSettings,
        cmd: &CommandLine,
        parse: impl Fn(&str) -> Option<f64>,
    ) -> Vec<f64> {
        let mut samples = Vec::new();
        for i in 0..settings.samples {
            if i > 0 && !settings.probe_interval.is_zero() {
                tokio::time::sleep(settings.probe_interval).await;
            }
            match self.output(cmd, settings.command_timeout).await {
                Ok(stdout) => samples.extend(parse(&stdout)),
                Err(e) => tracing::debug!("{} failed: {}", cmd.binary, e),
            }
        }
        samples
    }
}

fn unavailable<T>(message: String) -> Probe<T> {
    let message = NetTuneError::BenchmarkUnavailable(message).to_string();
    tracing::warn!("{}", message);
    Probe::unavailable(message)
}

fn timing(target: &str, samples: &[f64], what: &str) -> Probe<TimingStats> {
    match TimingStats::from_samples(target, samples) {
        Some(stats) => {
            let message =
                format!("{} avg {:.2}ms over {} samples", what, stats.avg_ms, stats.samples);
            Probe::measured(stats, message)
        }
        None => unavailable(format!("no successful {} samples against {}", what, target)),
    }
}

//! Probe command lines and output parsers
//!
//! Parsers are pure so they can be exercised against captured tool output.

use crate::result::LatencyStats;
use nettune_common::{Binary, CommandLine};

/// Per-reply wait passed to `ping -W`
pub const PING_REPLY_WAIT_SECS: u32 = 2;

/// Targets are passed as single argv entries; a leading dash would be read as an option
pub fn is_safe_target(target: &str) -> bool {
    !target.is_empty() && !target.starts_with('-') && !target.chars().any(char::is_whitespace)
}

pub fn ping_command(host: &str, count: u32) -> CommandLine {
    CommandLine::new(Binary::Ping).args([
        "-c".to_string(),
        count.to_string(),
        "-W".to_string(),
        PING_REPLY_WAIT_SECS.to_string(),
        host.to_string(),
    ])
}

pub fn iperf_command(host: &str, port: u16, duration_secs: u32) -> CommandLine {
    CommandLine::new(Binary::Iperf3).args([
        "-c".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
        "-t".to_string(),
        duration_secs.to_string(),
        "-J".to_string(),
    ])
}

pub fn dig_command(server: &str, domain: &str) -> CommandLine {
    CommandLine::new(Binary::Dig).args([
        format!("@{}", server),
        domain.to_string(),
        "+stats".to_string(),
    ])
}

pub fn curl_command(url: &str) -> CommandLine {
    CommandLine::new(Binary::Curl).args(["-o", "/dev/null", "-s", "-w", "%{time_connect}", url])
}

/// Parse `ping -c` output into latency statistics
///
/// Reply times come from `time=` fields; transmitted and received counts from
/// the summary line when present. Fails when no reply was seen.
pub fn parse_ping(host: &str, stdout: &str) -> Result<LatencyStats, String> {
    let mut times = Vec::new();
    let mut transmitted = None;
    let mut received = None;

    for line in stdout.lines() {
        if let Some(rest) = line.split("time=").nth(1) {
            let value = rest
                .split_whitespace()
                .next()
                .and_then(|t| t.trim_end_matches("ms").parse::<f64>().ok());
            if let Some(value) = value {
                times.push(value);
            }
        }
        if line.contains("packets transmitted") {
            for part in line.split(',') {
                let part = part.trim();
                let count = part.split_whitespace().next().and_then(|n| n.parse::<u32>().ok());
                if part.ends_with("transmitted") {
                    transmitted = count;
                } else if part.ends_with("received") {
                    received = count;
                }
            }
        }
    }

    if times.is_empty() {
        return Err(format!("no ping replies received from {}", host));
    }

    let replies = times.len() as u32;
    let transmitted = transmitted.unwrap_or(replies).max(1);
    let received = received.unwrap_or(replies).min(transmitted);
    let packet_loss_pct = f64::from(transmitted - received) / f64::from(transmitted) * 100.0;

    let n = times.len() as f64;
    let avg_ms = times.iter().sum::<f64>() / n;
    let min_ms = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ms = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let stddev_ms = if times.len() > 1 {
        (times.iter().map(|t| (t - avg_ms).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    Ok(LatencyStats {
        host: host.to_string(),
        transmitted,
        received,
        min_ms,
        avg_ms,
        max_ms,
        jitter_ms: max_ms - min_ms,
        stddev_ms,
        p95_ms: percentile(&times, 95.0),
        packet_loss_pct,
    })
}

/// Nearest-rank percentile
pub fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Throughput (Mbit/s) and retransmits from `iperf3 -J`
pub fn parse_iperf(stdout: &str) -> Result<(f64, u64), String> {
    let doc: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| format!("unreadable iperf3 output: {}", e))?;
    if let Some(error) = doc.get("error").and_then(|e| e.as_str()) {
        return Err(error.to_string());
    }
    let end = &doc["end"];
    let bps = end["sum_received"]["bits_per_second"]
        .as_f64()
        .ok_or_else(|| "iperf3 output has no end.sum_received.bits_per_second".to_string())?;
    let retransmits = end["sum_sent"]["retransmits"].as_u64().unwrap_or(0);
    Ok((bps / 1_000_000.0, retransmits))
}

/// `;; Query time: 14 msec`
pub fn parse_dig_query_time(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.split("Query time:").nth(1))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|ms| ms.parse().ok())
}

/// curl prints `%{time_connect}` in seconds
pub fn parse_curl_connect_ms(stdout: &str) -> Option<f64> {
    let secs: f64 = stdout.trim().parse().ok()?;
    (secs > 0.0).then_some(secs * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=14.2 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=15.8 ms
64 bytes from 8.8.8.8: icmp_seq=3 ttl=117 time=13.9 ms
64 bytes from 8.8.8.8: icmp_seq=5 ttl=117 time=16.1 ms

--- 8.8.8.8 ping statistics ---
5 packets transmitted, 4 received, 20% packet loss, time 4006ms
rtt min/avg/max/mdev = 13.900/15.000/16.100/0.951 ms
";

    #[test]
    fn test_parse_ping() {
        let stats = parse_ping("8.8.8.8", PING).unwrap();
        assert_eq!(stats.transmitted, 5);
        assert_eq!(stats.received, 4);
        assert!((stats.packet_loss_pct - 20.0).abs() < 1e-9);
        assert!((stats.min_ms - 13.9).abs() < 1e-9);
        assert!((stats.max_ms - 16.1).abs() < 1e-9);
        assert!((stats.avg_ms - 15.0).abs() < 1e-9);
        assert!((stats.jitter_ms - 2.2).abs() < 1e-9);
        assert!((stats.p95_ms - 16.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_without_replies() {
        let out = "--- 10.9.9.9 ping statistics ---\n\
                   3 packets transmitted, 0 received, 100% packet loss, time 2030ms\n";
        let err = parse_ping("10.9.9.9", out).unwrap_err();
        assert!(err.contains("10.9.9.9"));
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&samples, 95.0), 19.0);
        assert_eq!(percentile(&samples, 100.0), 20.0);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_parse_iperf() {
        let out = r#"{"start":{},"end":{"sum_sent":{"bits_per_second":941000000.0,"retransmits":12},
                     "sum_received":{"bits_per_second":938500000.0}}}"#;
        let (mbps, retransmits) = parse_iperf(out).unwrap();
        assert!((mbps - 938.5).abs() < 1e-9);
        assert_eq!(retransmits, 12);

        let refused =
            r#"{"start":{},"end":{},"error":"unable to connect to server: Connection refused"}"#;
        assert!(parse_iperf(refused).unwrap_err().contains("Connection refused"));
        assert!(parse_iperf("iperf3: error").is_err());
    }

    #[test]
    fn test_parse_dig_and_curl() {
        let dig = ";; ANSWER SECTION:\ngoogle.com.\t300\tIN\tA\t142.250.185.78\n\n\
                   ;; Query time: 14 msec\n;; SERVER: 8.8.8.8#53(8.8.8.8)\n";
        assert_eq!(parse_dig_query_time(dig), Some(14.0));
        let timed_out = ";; connection timed out; no servers could be reached\n";
        assert_eq!(parse_dig_query_time(timed_out), None);

        assert_eq!(parse_curl_connect_ms("0.021500"), Some(21.5));
        assert_eq!(parse_curl_connect_ms("0.000000"), None);
        assert_eq!(parse_curl_connect_ms(""), None);
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(ping_command("1.1.1.1", 10).to_string(), "ping -c 10 -W 2 1.1.1.1");
        assert_eq!(
            iperf_command("10.0.0.2", 5201, 5).to_string(),
            "iperf3 -c 10.0.0.2 -p 5201 -t 5 -J"
        );
        assert_eq!(
            dig_command("8.8.8.8", "example.org").argv(),
            vec!["dig", "@8.8.8.8", "example.org", "+stats"]
        );
        assert_eq!(curl_command("https://example.org").args[4], "%{time_connect}");
        assert!(!is_safe_target("-f"));
        assert!(!is_safe_target("a b"));
        assert!(is_safe_target("ping.example.org"));
    }
}

//! Table rendering and value formatting for check results

use crate::proxy::models::{ProxyReport, TargetResult};
use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Speeds at or above this many KB/s are displayed in MB/s
const MBPS_SWITCH_KBPS: f64 = 1024.0;

/// Latency coloring thresholds in milliseconds
const LATENCY_GOOD_MS: f64 = 500.0;
const LATENCY_FAIR_MS: f64 = 1500.0;

/// Ping coloring thresholds in milliseconds
const PING_GOOD_MS: f64 = 50.0;
const PING_FAIR_MS: f64 = 150.0;

pub fn format_latency(ms: Option<f64>) -> String {
    match ms {
        None => "-".dimmed().to_string(),
        Some(ms) => {
            let text = format!("{:.0}ms", ms);
            if ms < LATENCY_GOOD_MS {
                text.green()
            } else if ms < LATENCY_FAIR_MS {
                text.yellow()
            } else {
                text.red()
            }
            .to_string()
        }
    }
}

pub fn format_speed(kbps: Option<f64>) -> String {
    let Some(kbps) = kbps.filter(|&k| k >= 1.0) else {
        return "-".dimmed().to_string();
    };

    if kbps >= MBPS_SWITCH_KBPS {
        let mbps = kbps / MBPS_SWITCH_KBPS;
        let text = format!("{:.1}MB/s", mbps);
        if mbps >= 1.0 {
            text.green()
        } else if mbps >= 0.5 {
            text.yellow()
        } else {
            text.red()
        }
        .to_string()
    } else {
        let text = format!("{:.0}KB/s", kbps);
        if kbps >= 500.0 {
            text.green()
        } else if kbps >= 100.0 {
            text.yellow()
        } else {
            text.red()
        }
        .to_string()
    }
}

pub fn format_ping(ms: Option<f64>, error: Option<&str>) -> String {
    match ms {
        None if error.is_some() => "FAIL".red().to_string(),
        None => "-".dimmed().to_string(),
        Some(ms) => {
            let text = format!("{:.0}ms", ms);
            if ms < PING_GOOD_MS {
                text.green()
            } else if ms < PING_FAIR_MS {
                text.yellow()
            } else {
                text.red()
            }
            .to_string()
        }
    }
}

pub fn format_status(result: &TargetResult) -> String {
    if !result.succeeded {
        return "ERR".red().to_string();
    }
    match result.status {
        None => "-".dimmed().to_string(),
        Some(status) => {
            let text = status.to_string();
            match status {
                200..=299 => text.green().to_string(),
                300..=399 => text.yellow().to_string(),
                _ => text.red().to_string(),
            }
        }
    }
}

pub fn format_blocked(result: &TargetResult) -> String {
    if !result.succeeded {
        return "-".dimmed().to_string();
    }
    match &result.block {
        None => "?".dimmed().to_string(),
        Some(block) if block.is_blocked => "YES".red().to_string(),
        Some(_) => "No".green().to_string(),
    }
}

pub fn format_ip(ip: Option<&str>) -> String {
    match ip {
        None => "-".dimmed().to_string(),
        Some(ip) if ip.len() > 15 => format!("{}...", &ip[..12]).cyan().to_string(),
        Some(ip) => ip.cyan().to_string(),
    }
}

/// Host part of a URL, shortened for a column header
fn domain(url: &str) -> String {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string());

    if host.len() > 16 {
        format!("{}...", &host[..13])
    } else {
        host
    }
}

/// Detail table for single-target runs: one row per proxy with status,
/// latency, speed, ping, block verdict and observed IP.
pub fn render_single_table(reports: &[ProxyReport]) -> String {
    let mut builder = Builder::default();
    builder.push_record([
        "#", "Proxy", "Status", "Latency", "Speed", "Ping", "Blocked", "IP",
    ]);

    for (i, report) in reports.iter().enumerate() {
        let Some(result) = report.results.first() else {
            continue;
        };

        let mut proxy_cell = report.proxy.redacted();
        if !result.succeeded {
            if let Some(error) = &result.error {
                proxy_cell = format!("{}\n{}", proxy_cell, error.as_str().dimmed().red());
            }
        }

        builder.push_record([
            (i + 1).to_string(),
            proxy_cell,
            format_status(result),
            format_latency(result.latency_ms),
            format_speed(result.speed_kbps),
            format_ping(report.ping_ms, report.ping_error.as_deref()),
            format_blocked(result),
            format_ip(report.exit_ip.as_deref()),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::modern()).to_string()
}

/// Matrix table for multi-target runs: success fraction plus one
/// OK/BLK/FAIL cell per target, in the order the targets were given.
pub fn render_multi_table(reports: &[ProxyReport], urls: &[String]) -> String {
    let mut builder = Builder::default();

    let mut header: Vec<String> = ["#", "Proxy", "Success", "Avg Latency", "Ping", "IP"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(urls.iter().map(|url| domain(url)));
    builder.push_record(header);

    for (i, report) in reports.iter().enumerate() {
        let fraction = report.success_fraction();
        let ratio = if report.total_count() > 0 {
            report.working_count() as f64 / report.total_count() as f64
        } else {
            0.0
        };
        let fraction = if ratio >= 1.0 {
            fraction.green().to_string()
        } else if ratio >= 0.5 {
            fraction.yellow().to_string()
        } else {
            fraction.red().to_string()
        };

        let mut row = vec![
            (i + 1).to_string(),
            report.proxy.redacted(),
            fraction,
            format_latency(report.avg_latency()),
            format_ping(report.ping_ms, report.ping_error.as_deref()),
            format_ip(report.exit_ip.as_deref()),
        ];

        for result in &report.results {
            if result.is_working() {
                row.push("OK".green().to_string());
            } else if result.succeeded {
                row.push("BLK".yellow().to_string());
            } else {
                row.push("FAIL".red().to_string());
            }
        }

        builder.push_record(row);
    }

    let mut table = builder.build();
    table.with(Style::modern()).to_string()
}

/// Run summary for single-target mode
pub fn print_summary(reports: &[ProxyReport]) {
    let total = reports.len();
    let working = reports.iter().filter(|r| r.is_fully_working()).count();
    let percentage = if total > 0 {
        working as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let fraction = format!("{}/{}", working, total);
    let fraction = if working == total {
        fraction.green().bold()
    } else if working > 0 {
        fraction.yellow().bold()
    } else {
        fraction.red().bold()
    };

    println!(
        "Summary: {} proxies working ({:.0}%)",
        fraction, percentage
    );

    let working_reports: Vec<&ProxyReport> = reports
        .iter()
        .filter(|r| r.is_fully_working())
        .collect();

    if working_reports.is_empty() {
        return;
    }

    let latencies: Vec<f64> = working_reports.iter().filter_map(|r| r.avg_latency()).collect();
    let speeds: Vec<f64> = working_reports
        .iter()
        .filter_map(|r| r.results.first().and_then(|t| t.speed_kbps))
        .collect();
    let pings: Vec<f64> = working_reports.iter().filter_map(|r| r.ping_ms).collect();

    let mut parts: Vec<String> = Vec::new();
    if let Some(avg) = mean(&latencies) {
        parts.push(format!("Latency: {:.0}ms", avg));
    }
    if let Some(avg) = mean(&speeds) {
        if avg >= MBPS_SWITCH_KBPS {
            parts.push(format!("Speed: {:.1}MB/s", avg / MBPS_SWITCH_KBPS));
        } else {
            parts.push(format!("Speed: {:.0}KB/s", avg));
        }
    }
    if let Some(avg) = mean(&pings) {
        parts.push(format!("Ping: {:.0}ms", avg));
    }

    if !parts.is_empty() {
        println!("{}", format!("Averages: {}", parts.join("  ")).cyan());
    }
}

/// Run summary for multi-target mode, with per-URL success rates
pub fn print_multi_summary(reports: &[ProxyReport], urls: &[String]) {
    let total = reports.len();
    let fully = reports.iter().filter(|r| r.is_fully_working()).count();
    let partial = reports
        .iter()
        .filter(|r| r.working_count() > 0 && !r.is_fully_working())
        .count();
    let failed = total - fully - partial;

    println!("Summary:");
    println!(
        "  All URLs working:  {}",
        format!("{}/{}", fully, total).green().bold()
    );
    println!(
        "  Partial success:   {}",
        format!("{}/{}", partial, total).yellow().bold()
    );
    println!(
        "  All failed:        {}",
        format!("{}/{}", failed, total).red().bold()
    );

    println!();
    println!("Per-URL success rates:");
    for (index, url) in urls.iter().enumerate() {
        let working = reports
            .iter()
            .filter(|r| r.results.get(index).map_or(false, |t| t.is_working()))
            .count();
        let rate = if total > 0 {
            working as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let cell = format!("{}/{}", working, total);
        let cell = if rate >= 80.0 {
            cell.green()
        } else if rate >= 50.0 {
            cell.yellow()
        } else {
            cell.red()
        };

        println!("  {} ({:.0}%) {}", cell, rate, url);
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

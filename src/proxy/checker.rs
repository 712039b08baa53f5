//! Proxy checker module for testing proxies against target URLs

use crate::proxy::detector::{BlockDetector, BlockRules};
use crate::proxy::models::{Proxy, ProxyReport, TargetResult};
use crate::Result;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, Proxy as ReqwestProxy};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Default timeout for each HTTP request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default number of proxies checked concurrently
const DEFAULT_CONCURRENCY: usize = 10;

/// Upper bound on the TCP ping probe
const PING_TIMEOUT_SECS: u64 = 5;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Endpoints that echo the caller's public IP in the response body,
/// tried in order until one answers
const IP_ECHO_URLS: &[&str] = &[
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ipinfo.io/ip",
];

static IPV4_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("invalid IPv4 regex"));

/// Configuration for the proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each HTTP request
    pub timeout: Duration,
    /// Number of proxies checked concurrently
    pub concurrency: usize,
    /// User agent sent with every request
    pub user_agent: String,
    /// Probe the proxy host with a timed TCP connect
    pub include_ping: bool,
    /// Query an IP echo endpoint when no target reported the exit IP
    pub include_ip_probe: bool,
    /// Skip TLS certificate verification; broken proxies frequently
    /// man-in-the-middle TLS and would otherwise hide behind cert errors
    pub accept_invalid_certs: bool,
    /// Rules driving block detection
    pub rules: BlockRules,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            include_ping: true,
            include_ip_probe: true,
            accept_invalid_certs: true,
            rules: BlockRules::default(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_ping(mut self, include_ping: bool) -> Self {
        self.include_ping = include_ping;
        self
    }

    pub fn with_ip_probe(mut self, include_ip_probe: bool) -> Self {
        self.include_ip_probe = include_ip_probe;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_rules(mut self, rules: BlockRules) -> Self {
        self.rules = rules;
        self
    }
}

/// Proxy checker: runs test requests through proxies and collects
/// per-target results
pub struct ProxyChecker {
    config: CheckerConfig,
    detector: BlockDetector,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        let detector = BlockDetector::new(config.rules.clone());
        Self { config, detector }
    }

    /// Test one proxy against every target URL, in the order given.
    ///
    /// Network failures never propagate; they land in the corresponding
    /// [`TargetResult`] and the remaining targets are still checked.
    pub async fn check(&self, proxy: &Proxy, targets: &[String]) -> ProxyReport {
        let mut report = ProxyReport::new(proxy.clone());

        match self.create_client(proxy) {
            Ok(client) => {
                for url in targets {
                    let result = self.check_target(&client, url).await;
                    report.results.push(result);
                }

                report.exit_ip = report
                    .results
                    .iter()
                    .filter(|r| r.succeeded)
                    .find_map(|r| r.observed_ip.clone());

                if report.exit_ip.is_none()
                    && self.config.include_ip_probe
                    && report.results.iter().any(|r| r.succeeded)
                {
                    report.exit_ip = self.probe_exit_ip(&client).await;
                }
            }
            Err(e) => {
                for url in targets {
                    report
                        .results
                        .push(TargetResult::failed(url.clone(), truncate(&e.to_string())));
                }
            }
        }

        if self.config.include_ping {
            let (ping_ms, ping_error) = self.ping(proxy).await;
            report.ping_ms = ping_ms;
            report.ping_error = ping_error;
        }

        report
    }

    /// Check many proxies with bounded concurrency.
    ///
    /// Reports come back in input order regardless of completion order.
    pub async fn check_all(
        &self,
        proxies: &[Proxy],
        targets: &[String],
        progress: Option<&ProgressBar>,
    ) -> Vec<ProxyReport> {
        // buffered, not buffer_unordered: yields in input order
        stream::iter(proxies)
            .map(|proxy| self.check(proxy, targets))
            .buffered(self.config.concurrency.max(1))
            .inspect(|_| {
                if let Some(pb) = progress {
                    pb.inc(1);
                }
            })
            .collect()
            .await
    }

    /// One GET through the proxy, timed to full body retrieval
    async fn check_target(&self, client: &Client, url: &str) -> TargetResult {
        let mut result = TargetResult::new(url.to_string());
        let start = Instant::now();

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                result.error = Some(classify_error(&e));
                return result;
            }
        };

        let status = response.status().as_u16();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                result.error = Some(classify_error(&e));
                return result;
            }
        };

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        result.succeeded = true;
        result.status = Some(status);
        result.latency_ms = Some(latency_ms);
        result.content_length = body.len();
        if latency_ms > 0.0 {
            result.speed_kbps = Some((body.len() as f64 / 1024.0) / (latency_ms / 1000.0));
        }

        let text = String::from_utf8_lossy(&body);
        result.block = Some(self.detector.detect(&text, status, body.len()));
        result.observed_ip = extract_ip(&text);

        result
    }

    /// Timed TCP connect to the proxy's own endpoint. Independent of the
    /// HTTP leg; failure is reported, never fatal.
    async fn ping(&self, proxy: &Proxy) -> (Option<f64>, Option<String>) {
        let addr = format!("{}:{}", proxy.host, proxy.port);
        let deadline = self.config.timeout.min(Duration::from_secs(PING_TIMEOUT_SECS));
        let start = Instant::now();

        match tokio::time::timeout(deadline, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => (Some(start.elapsed().as_secs_f64() * 1000.0), None),
            Ok(Err(e)) => (None, Some(truncate(&e.to_string()))),
            Err(_) => (None, Some("ping timed out".to_string())),
        }
    }

    /// Ask an echo endpoint which IP the outside world sees
    async fn probe_exit_ip(&self, client: &Client) -> Option<String> {
        for url in IP_ECHO_URLS {
            let Ok(response) = client.get(*url).send().await else {
                continue;
            };
            if !response.status().is_success() {
                continue;
            }
            let Ok(text) = response.text().await else {
                continue;
            };
            let ip = text.trim();
            if ip.parse::<std::net::IpAddr>().is_ok() {
                return Some(ip.to_string());
            }
        }
        None
    }

    /// Build a reqwest client routed through the proxy
    fn create_client(&self, proxy: &Proxy) -> Result<Client> {
        // Proxy::all so https targets go through the proxy too
        let reqwest_proxy = ReqwestProxy::all(proxy.url())?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a transport error to a short stable label
fn classify_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_body() || e.is_decode() {
        "failed reading response body".to_string()
    } else {
        truncate(&e.to_string())
    }
}

fn truncate(message: &str) -> String {
    const MAX: usize = 60;
    if message.chars().count() <= MAX {
        message.to_string()
    } else {
        let cut: String = message.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

/// Pull an IP address out of a response body: a JSON `"ip"`-style field
/// first, then any bare IPv4 pattern
pub(crate) fn extract_ip(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body.trim()) {
        for key in ["ip", "origin"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                if let Some(m) = IPV4_REGEX.find(text) {
                    return Some(m.as_str().to_string());
                }
            }
        }
    }

    IPV4_REGEX.find(body).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProxyType;

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(config.include_ping);
        assert!(config.include_ip_probe);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_concurrency(20)
            .with_ping(false)
            .with_ip_probe(false);

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.concurrency, 20);
        assert!(!config.include_ping);
        assert!(!config.include_ip_probe);
    }

    #[test]
    fn test_extract_ip_from_json_field() {
        assert_eq!(
            extract_ip(r#"{"ip": "203.0.113.7"}"#),
            Some("203.0.113.7".to_string())
        );
        assert_eq!(
            extract_ip(r#"{"origin": "198.51.100.1, 203.0.113.7"}"#),
            Some("198.51.100.1".to_string())
        );
    }

    #[test]
    fn test_extract_ip_from_plain_text() {
        assert_eq!(extract_ip("203.0.113.7\n"), Some("203.0.113.7".to_string()));
        assert_eq!(
            extract_ip("<html><body>Your IP is 198.51.100.23</body></html>"),
            Some("198.51.100.23".to_string())
        );
    }

    #[test]
    fn test_extract_ip_absent() {
        assert_eq!(extract_ip("no address here"), None);
        assert_eq!(extract_ip(r#"{"country": "DE"}"#), None);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_fails_all_targets() {
        let proxy = Proxy::new("127.0.0.1".to_string(), 9, ProxyType::Http);
        let targets = vec![
            "http://192.0.2.1/a".to_string(),
            "http://192.0.2.1/b".to_string(),
        ];

        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(2))
            .with_ip_probe(false);
        let checker = ProxyChecker::with_config(config);

        let report = checker.check(&proxy, &targets).await;

        assert_eq!(report.results.len(), 2);
        // Target order is preserved even when everything fails
        assert_eq!(report.results[0].url, targets[0]);
        assert_eq!(report.results[1].url, targets[1]);
        for result in &report.results {
            assert!(!result.succeeded);
            assert!(!result.blocked());
            assert!(result.status.is_none());
            assert!(result.error.is_some());
        }
        // Nothing is listening, so the ping leg reports an error too
        assert!(report.ping_ms.is_none());
        assert!(report.ping_error.is_some());
        assert!(report.exit_ip.is_none());
    }

    #[tokio::test]
    async fn test_check_all_preserves_input_order() {
        let proxies: Vec<Proxy> = [9001u16, 9002, 9003]
            .iter()
            .map(|&port| Proxy::new("127.0.0.1".to_string(), port, ProxyType::Http))
            .collect();
        let targets = vec!["http://192.0.2.1/".to_string()];

        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(2))
            .with_concurrency(3)
            .with_ping(false)
            .with_ip_probe(false);
        let checker = ProxyChecker::with_config(config);

        let reports = checker.check_all(&proxies, &targets, None).await;

        assert_eq!(reports.len(), 3);
        for (report, proxy) in reports.iter().zip(&proxies) {
            assert_eq!(report.proxy.port, proxy.port);
        }
    }
}

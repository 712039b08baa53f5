//! Heuristic detection of block pages behind an otherwise successful response

use crate::Result;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Confidence at or above which a response is flagged as blocked
pub const BLOCK_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Confidence above which a blocked response disqualifies the proxy
/// from counting as working
pub const WORKING_CONFIDENCE_CUTOFF: f64 = 0.6;

static TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("invalid title regex"));

/// Marker lists and status rules driving block detection.
///
/// The defaults cover the common CDN/WAF block pages; a replacement set can
/// be loaded from a JSON file so the heuristic stays adjustable without a
/// rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRules {
    /// Status codes that alone suggest the target rejected the proxy
    #[serde(default = "default_suspicious_statuses")]
    pub suspicious_statuses: Vec<u16>,
    /// Markers that identify a block page outright
    #[serde(default = "default_high_markers")]
    pub high_markers: Vec<String>,
    /// Markers typical of challenge/rate-limit interstitials
    #[serde(default = "default_medium_markers")]
    pub medium_markers: Vec<String>,
    /// Weak signals that only matter in combination
    #[serde(default = "default_low_markers")]
    pub low_markers: Vec<String>,
}

fn default_suspicious_statuses() -> Vec<u16> {
    vec![403, 429]
}

fn default_high_markers() -> Vec<String> {
    [
        "access denied",
        "403 forbidden",
        "401 unauthorized",
        "your ip has been blocked",
        "ip blocked",
        "ip banned",
        "you have been blocked",
        "sorry, you have been blocked",
        "request blocked",
        "access denied - akamai",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_medium_markers() -> Vec<String> {
    [
        "verify you are human",
        "human verification",
        "checking your browser",
        "please wait while we verify",
        "enable javascript and cookies",
        "too many requests",
        "rate limit exceeded",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_low_markers() -> Vec<String> {
    ["captcha", "recaptcha", "hcaptcha", "cloudflare", "security check"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for BlockRules {
    fn default() -> Self {
        Self {
            suspicious_statuses: default_suspicious_statuses(),
            high_markers: default_high_markers(),
            medium_markers: default_medium_markers(),
            low_markers: default_low_markers(),
        }
    }
}

impl BlockRules {
    /// Load a replacement rule set from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read block rules from {:?}", path.as_ref()))?;
        let rules: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid block rules in {:?}", path.as_ref()))?;
        Ok(rules)
    }
}

/// Outcome of block detection for one response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockVerdict {
    pub is_blocked: bool,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub reason: Option<String>,
}

/// Scores a response body and status against a [`BlockRules`] set
#[derive(Debug, Clone, Default)]
pub struct BlockDetector {
    rules: BlockRules,
}

impl BlockDetector {
    pub fn new(rules: BlockRules) -> Self {
        Self { rules }
    }

    /// Score a completed response. Only call for responses that were
    /// actually received; transport failures are not blocks.
    pub fn detect(&self, body: &str, status: u16, content_length: usize) -> BlockVerdict {
        let mut confidence: f64 = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        let body_lower = body.to_lowercase();
        let title = TITLE_REGEX
            .captures(&body_lower)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        if self.rules.suspicious_statuses.contains(&status) {
            confidence += 0.3;
            reasons.push(format!("suspicious status {}", status));
        }

        for marker in &self.rules.high_markers {
            let marker = marker.to_lowercase();
            if title.contains(&marker) {
                confidence += 0.5;
                reasons.push(format!("block indicator in title: {}", marker));
                break;
            } else if content_length < 5000 && body_lower.contains(&marker) {
                confidence += 0.3;
                reasons.push(format!("block indicator: {}", marker));
                break;
            }
        }

        if content_length < 10000 {
            for marker in &self.rules.medium_markers {
                let marker = marker.to_lowercase();
                if body_lower.contains(&marker) {
                    confidence += 0.2;
                    reasons.push(format!("possible block: {}", marker));
                    break;
                }
            }
        }

        if content_length < 3000 {
            let low_hits = self
                .rules
                .low_markers
                .iter()
                .filter(|marker| body_lower.contains(&marker.to_lowercase()))
                .count();
            if low_hits >= 2 {
                confidence += 0.15;
                reasons.push("multiple security indicators".to_string());
            }
        }

        if content_length < 500 && status >= 400 {
            confidence += 0.2;
            reasons.push("short error response".to_string());
        }

        if content_length < 100 && status != 204 {
            confidence += 0.3;
            reasons.push("nearly empty response".to_string());
        }

        // Large bodies are almost never block pages; damp the score.
        if content_length > 50000 {
            confidence *= 0.3;
        } else if content_length > 20000 {
            confidence *= 0.5;
        }

        let confidence = confidence.min(1.0);

        BlockVerdict {
            is_blocked: confidence >= BLOCK_CONFIDENCE_THRESHOLD,
            confidence,
            reason: if reasons.is_empty() {
                None
            } else {
                Some(reasons.join("; "))
            },
        }
    }
}

//! Proxy parser module for parsing proxies from various formats

use crate::proxy::models::{Proxy, ProxyType};
use crate::Result;
use anyhow::{anyhow, bail, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

static URL_FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks5)://(?:([^:]+):([^@]+)@)?([^:]+):(\d+)/?$")
        .expect("invalid proxy URL regex")
});

static AUTH_AT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:]+):([^@]+)@([^:]+):(\d+)$").expect("invalid user:pass@host:port regex")
});

/// Outcome of parsing a whole proxy list: the descriptors plus one warning
/// per malformed line that was skipped.
#[derive(Debug, Clone, Default)]
pub struct ParsedProxies {
    pub proxies: Vec<Proxy>,
    pub warnings: Vec<String>,
}

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line.
    ///
    /// Supported formats, first structural match wins:
    /// - scheme://IP:PORT and scheme://USER:PASS@IP:PORT (scheme is http,
    ///   https or socks5, case-insensitive)
    /// - USER:PASS@IP:PORT
    /// - IP:PORT:USER:PASS
    /// - IP:PORT
    ///
    /// Blank and `#` comment lines yield `Ok(None)`. A malformed line or an
    /// out-of-range port is an error naming the line.
    pub fn parse_line(line: &str, default_type: ProxyType) -> Result<Option<Proxy>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let proxy = if line.contains("://") {
            Self::parse_url_format(line)?
        } else if line.contains('@') {
            Self::parse_auth_at_format(line, default_type)?
        } else {
            Self::parse_colon_format(line, default_type)?
        };

        Ok(Some(proxy))
    }

    /// scheme://ip:port or scheme://user:pass@ip:port
    fn parse_url_format(line: &str) -> Result<Proxy> {
        let caps = URL_FORMAT_REGEX
            .captures(line)
            .ok_or_else(|| anyhow!("unrecognized proxy URL format: {:?}", line))?;

        let proxy_type = match caps[1].to_lowercase().as_str() {
            "http" => ProxyType::Http,
            "https" => ProxyType::Https,
            "socks5" => ProxyType::Socks5,
            scheme => bail!("unsupported proxy scheme {:?} in line {:?}", scheme, line),
        };

        let host = caps[4].to_string();
        let port = Self::parse_port(&caps[5], line)?;

        let proxy = match (caps.get(2), caps.get(3)) {
            (Some(user), Some(pass)) => Proxy::with_auth(
                host,
                port,
                proxy_type,
                user.as_str().to_string(),
                pass.as_str().to_string(),
            ),
            _ => Proxy::new(host, port, proxy_type),
        };

        Ok(proxy.with_raw(line))
    }

    /// user:pass@ip:port
    fn parse_auth_at_format(line: &str, default_type: ProxyType) -> Result<Proxy> {
        let caps = AUTH_AT_REGEX
            .captures(line)
            .ok_or_else(|| anyhow!("unrecognized proxy format: {:?}", line))?;

        let username = caps[1].to_string();
        let password = caps[2].to_string();
        let host = caps[3].to_string();
        let port = Self::parse_port(&caps[4], line)?;

        Ok(Proxy::with_auth(host, port, default_type, username, password).with_raw(line))
    }

    /// ip:port or ip:port:user:pass
    fn parse_colon_format(line: &str, default_type: ProxyType) -> Result<Proxy> {
        let parts: Vec<&str> = line.split(':').collect();

        let proxy = match parts.as_slice() {
            [host, port] => {
                let port = Self::parse_port(port, line)?;
                Proxy::new(host.to_string(), port, default_type)
            }
            [host, port, username, password] => {
                let port = Self::parse_port(port, line)?;
                Proxy::with_auth(
                    host.to_string(),
                    port,
                    default_type,
                    username.to_string(),
                    password.to_string(),
                )
            }
            _ => bail!("unrecognized proxy format: {:?}", line),
        };

        Ok(proxy.with_raw(line))
    }

    fn parse_port(field: &str, line: &str) -> Result<u16> {
        let port: u32 = field
            .parse()
            .with_context(|| format!("invalid port {:?} in proxy line {:?}", field, line))?;

        if !(1..=65535).contains(&port) {
            bail!("port {} out of range (1-65535) in proxy line {:?}", port, line);
        }

        Ok(port as u16)
    }

    /// Parse proxies from a string (multiple lines), skipping malformed
    /// lines with a warning instead of failing the run
    pub fn parse_string(content: &str, default_type: ProxyType) -> ParsedProxies {
        let mut parsed = ParsedProxies::default();

        for (number, line) in content.lines().enumerate() {
            match Self::parse_line(line, default_type) {
                Ok(Some(proxy)) => parsed.proxies.push(proxy),
                Ok(None) => {}
                Err(e) => parsed.warnings.push(format!("line {}: {}", number + 1, e)),
            }
        }

        parsed
    }

    /// Parse proxies from a file. An unreadable file is an error; malformed
    /// lines inside it are collected as warnings.
    pub fn parse_file<P: AsRef<Path>>(path: P, default_type: ProxyType) -> Result<ParsedProxies> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read proxy file {:?}", path.as_ref()))?;
        Ok(Self::parse_string(&content, default_type))
    }

    /// Save proxies to a file in simple (ip:port) or full
    /// (ip:port:user:pass) form
    pub fn save_to_file<P: AsRef<Path>>(proxies: &[Proxy], path: P, full_format: bool) -> Result<()> {
        let content: String = proxies
            .iter()
            .map(|p| {
                if full_format {
                    p.to_full_string()
                } else {
                    p.to_simple_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(&path, content)
            .with_context(|| format!("failed to write proxy file {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Resolve a 1-based selection expression over `total` entries into
    /// sorted, deduplicated 0-based indices.
    ///
    /// Accepts `all`, comma lists (`1,2,3`), ranges (`1-5`) and mixes
    /// (`1,3-5,8`). Out-of-range entries are dropped; an expression that
    /// selects nothing is an error so the caller can re-prompt.
    pub fn parse_selection(expr: &str, total: usize) -> Result<Vec<usize>> {
        let expr = expr.trim().to_lowercase();

        if expr == "all" {
            return Ok((0..total).collect());
        }

        let mut indices = BTreeSet::new();

        for part in expr.replace(' ', "").split(',') {
            if let Some((start, end)) = part.split_once('-') {
                let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
                    continue;
                };
                for i in start.max(1)..=end.min(total) {
                    indices.insert(i - 1);
                }
            } else if let Ok(i) = part.parse::<usize>() {
                if (1..=total).contains(&i) {
                    indices.insert(i - 1);
                }
            }
        }

        if indices.is_empty() {
            bail!("selection {:?} matches no proxies", expr);
        }

        Ok(indices.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_format() {
        let proxy = ProxyParser::parse_line("1.2.3.4:8080", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.host, "1.2.3.4");
        assert_eq!(proxy.port, 8080);
        assert_eq!(proxy.proxy_type, ProxyType::Http);
        assert!(proxy.auth.is_none());
        assert_eq!(proxy.raw, "1.2.3.4:8080");
    }

    #[test]
    fn test_parse_with_auth_colon_format() {
        let proxy = ProxyParser::parse_line("10.0.0.1:3128:admin:password123", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.host, "10.0.0.1");
        assert_eq!(proxy.port, 3128);
        let auth = proxy.auth.unwrap();
        assert_eq!(auth.username, "admin");
        assert_eq!(auth.password, "password123");
    }

    #[test]
    fn test_parse_auth_at_format() {
        let proxy = ProxyParser::parse_line("myuser:mypass@proxy.example.com:8080", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.host, "proxy.example.com");
        assert_eq!(proxy.port, 8080);
        // No explicit scheme, so the default applies
        assert_eq!(proxy.proxy_type, ProxyType::Http);
        let auth = proxy.auth.unwrap();
        assert_eq!(auth.username, "myuser");
        assert_eq!(auth.password, "mypass");
    }

    #[test]
    fn test_parse_url_format_socks5_with_auth() {
        let proxy = ProxyParser::parse_line("socks5://u:p@1.2.3.4:1080", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert_eq!(proxy.host, "1.2.3.4");
        assert_eq!(proxy.port, 1080);
        let auth = proxy.auth.unwrap();
        assert_eq!(auth.username, "u");
        assert_eq!(auth.password, "p");
    }

    #[test]
    fn test_parse_url_format_scheme_case_insensitive() {
        let proxy = ProxyParser::parse_line("SOCKS5://1.2.3.4:1080", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);

        let proxy = ProxyParser::parse_line("HTTP://1.2.3.4:8080", ProxyType::Socks5)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Http);
    }

    #[test]
    fn test_parse_url_format_without_auth() {
        let proxy = ProxyParser::parse_line("https://203.0.113.50:3128", ProxyType::Http)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Https);
        assert!(proxy.auth.is_none());
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        assert!(ProxyParser::parse_line("1.2.3.4:99999", ProxyType::Http).is_err());
        assert!(ProxyParser::parse_line("1.2.3.4:0", ProxyType::Http).is_err());

        let err = ProxyParser::parse_line("1.2.3.4:99999", ProxyType::Http).unwrap_err();
        assert!(err.to_string().contains("99999"));
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        assert!(ProxyParser::parse_line("1.2.3.4:abc", ProxyType::Http).is_err());
        assert!(ProxyParser::parse_line("http://1.2.3.4:abc", ProxyType::Http).is_err());
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        assert!(ProxyParser::parse_line("", ProxyType::Http).unwrap().is_none());
        assert!(ProxyParser::parse_line("   \t ", ProxyType::Http).unwrap().is_none());
        assert!(ProxyParser::parse_line("# a comment", ProxyType::Http)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unrecognized_format_is_error() {
        assert!(ProxyParser::parse_line("not a proxy", ProxyType::Http).is_err());
        assert!(ProxyParser::parse_line("1.2.3.4", ProxyType::Http).is_err());
        assert!(ProxyParser::parse_line("a:1:b:c:d", ProxyType::Http).is_err());
        assert!(ProxyParser::parse_line("ftp://1.2.3.4:21", ProxyType::Http).is_err());
    }

    #[test]
    fn test_parse_string_collects_warnings() {
        let content = "\n\
            192.168.1.1:8080\n\
            # comment\n\
            bogus line\n\
            10.0.0.1:3128:user:pass\n\
            1.2.3.4:99999\n";

        let parsed = ProxyParser::parse_string(content, ProxyType::Http);
        assert_eq!(parsed.proxies.len(), 2);
        assert_eq!(parsed.warnings.len(), 2);
        assert!(parsed.warnings[0].contains("line 4"));
        assert!(parsed.warnings[1].contains("line 6"));
    }

    #[test]
    fn test_selection_all() {
        assert_eq!(
            ProxyParser::parse_selection("all", 4).unwrap(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(ProxyParser::parse_selection("ALL", 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_selection_list_and_range() {
        assert_eq!(
            ProxyParser::parse_selection("1,2,3", 5).unwrap(),
            vec![0, 1, 2]
        );
        assert_eq!(
            ProxyParser::parse_selection("2-4", 5).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            ProxyParser::parse_selection("1, 3-5, 8", 10).unwrap(),
            vec![0, 2, 3, 4, 7]
        );
    }

    #[test]
    fn test_selection_deduplicates_and_sorts() {
        assert_eq!(
            ProxyParser::parse_selection("3,1,2-3", 5).unwrap(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_selection_drops_out_of_range() {
        assert_eq!(ProxyParser::parse_selection("1,9", 3).unwrap(), vec![0]);
        assert_eq!(ProxyParser::parse_selection("2-9", 3).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_selection_matching_nothing_is_error() {
        assert!(ProxyParser::parse_selection("9", 3).is_err());
        assert!(ProxyParser::parse_selection("garbage", 3).is_err());
        assert!(ProxyParser::parse_selection("", 3).is_err());
    }
}

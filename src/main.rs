use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use proxy_probe::{
    report, BlockRules, CheckerConfig, ParsedProxies, Proxy, ProxyChecker, ProxyParser, ProxyType,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Default proxy list path
const DEFAULT_PROXY_FILE: &str = "proxies.txt";

/// Default target when the user provides none
const DEFAULT_TARGET_URL: &str = "https://httpbin.org/ip";

/// Test proxies against target URLs and report latency, speed and block status
#[derive(Parser)]
#[command(name = "proxy-probe")]
#[command(about = "Test proxies against target URLs and report latency, speed and block status")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxies against one or more target URLs
    Check {
        /// Input file containing proxies, one per line
        #[arg(default_value = DEFAULT_PROXY_FILE)]
        input: PathBuf,
        /// Target URL, repeatable or comma-separated; bare hostnames are
        /// treated as https://
        #[arg(short, long = "url")]
        urls: Vec<String>,
        /// Selection over 1-based proxy numbers: "all", "1,2,3", "1-5" or mixes
        #[arg(short, long, default_value = "all")]
        select: String,
        /// Default scheme for lines without one (http, https, socks5)
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
        /// Timeout in seconds for each request
        #[arg(long, default_value = "15")]
        timeout: u64,
        /// Number of proxies checked concurrently
        #[arg(short = 'n', long, default_value = "10")]
        concurrency: usize,
        /// Skip the TCP ping probe
        #[arg(long)]
        no_ping: bool,
        /// Skip the exit-IP echo probe
        #[arg(long)]
        no_ip_probe: bool,
        /// Verify TLS certificates instead of accepting any
        #[arg(long)]
        verify_tls: bool,
        /// JSON file with replacement block-detection rules
        #[arg(long)]
        block_rules: Option<PathBuf>,
        /// Write the full results as JSON to this path
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Parse and normalize a proxy list without checking it
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for normalized proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Default scheme for lines without one (http, https, socks5)
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check {
            input,
            urls,
            select,
            proxy_type,
            timeout,
            concurrency,
            no_ping,
            no_ip_probe,
            verify_tls,
            block_rules,
            export,
        }) => {
            let ptype = parse_proxy_type(&proxy_type)?;
            let parsed = ProxyParser::parse_file(&input, ptype)?;
            warn_skipped(&parsed);

            if parsed.proxies.is_empty() {
                bail!("no valid proxies found in {:?}", input);
            }

            let indices = ProxyParser::parse_selection(&select, parsed.proxies.len())?;
            let selected: Vec<Proxy> = indices.iter().map(|&i| parsed.proxies[i].clone()).collect();

            let targets = normalize_urls(&urls);

            let rules = match block_rules {
                Some(path) => BlockRules::from_json_file(path)?,
                None => BlockRules::default(),
            };

            let config = CheckerConfig::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_concurrency(concurrency)
                .with_ping(!no_ping)
                .with_ip_probe(!no_ip_probe)
                .with_accept_invalid_certs(!verify_tls)
                .with_rules(rules);

            run_and_report(selected, targets, config, export).await
        }
        Some(Commands::Parse {
            input,
            output,
            proxy_type,
        }) => {
            let ptype = parse_proxy_type(&proxy_type)?;
            let parsed = ProxyParser::parse_file(&input, ptype)?;
            warn_skipped(&parsed);

            println!("Parsed {} proxies from {:?}", parsed.proxies.len(), input);

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&parsed.proxies, &output_path, true)?;
                println!("Saved parsed proxies to {:?}", output_path);
            } else {
                for proxy in &parsed.proxies {
                    println!("{}", proxy.to_full_string());
                }
            }

            Ok(())
        }
        None => run_interactive().await,
    }
}

/// Interactive flow: prompt for file, selection and targets, then check
async fn run_interactive() -> Result<()> {
    println!("{}", "Proxy Probe".cyan().bold());
    println!();

    let filepath = prompt("Proxy file", DEFAULT_PROXY_FILE)?;
    let parsed = match ProxyParser::parse_file(&filepath, ProxyType::Http) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            println!("Create a file with proxies (one per line) and try again.");
            println!("Supported formats:");
            println!("  - ip:port");
            println!("  - ip:port:user:pass");
            println!("  - user:pass@ip:port");
            println!("  - http://user:pass@ip:port");
            println!("  - socks5://user:pass@ip:port");
            std::process::exit(1);
        }
    };
    warn_skipped(&parsed);

    if parsed.proxies.is_empty() {
        bail!("no valid proxies found in {:?}", filepath);
    }

    print_proxy_list(&parsed.proxies);

    println!("{}", "Select proxies to test".bold());
    println!("{}", "Enter numbers (1,2,3), ranges (1-5), or 'all'".dimmed());
    let indices = loop {
        let selection = prompt("Selection", "all")?;
        match ProxyParser::parse_selection(&selection, parsed.proxies.len()) {
            Ok(indices) => break indices,
            Err(_) => eprintln!("{} invalid selection, try again", "Warning:".yellow()),
        }
    };
    let selected: Vec<Proxy> = indices.iter().map(|&i| parsed.proxies[i].clone()).collect();

    println!();
    println!("{}", "Target URL(s)".bold());
    println!("{}", "Separate multiple URLs with commas".dimmed());
    let raw_urls = prompt("URLs", DEFAULT_TARGET_URL)?;
    let targets = normalize_urls(&[raw_urls]);

    println!();
    run_and_report(selected, targets, CheckerConfig::default(), None).await
}

/// Check the selected proxies and print the table, summary and export
async fn run_and_report(
    proxies: Vec<Proxy>,
    targets: Vec<String>,
    config: CheckerConfig,
    export: Option<PathBuf>,
) -> Result<()> {
    if targets.len() == 1 {
        println!(
            "Testing {} proxies against {}...",
            proxies.len(),
            targets[0]
        );
    } else {
        println!(
            "Testing {} proxies against {} URLs...",
            proxies.len(),
            targets.len()
        );
        for (i, url) in targets.iter().enumerate() {
            println!("  {}. {}", i + 1, url);
        }
    }
    println!();

    let progress = ProgressBar::new(proxies.len() as u64).with_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} {percent}% [{wide_bar:.cyan}] {pos}/{len} [{elapsed_precise}]")
            .expect("invalid progress template"),
    );

    let checker = ProxyChecker::with_config(config);
    let reports = checker.check_all(&proxies, &targets, Some(&progress)).await;
    progress.finish_and_clear();

    if targets.len() == 1 {
        println!("{}", report::render_single_table(&reports));
        println!();
        report::print_summary(&reports);
    } else {
        println!("{}", report::render_multi_table(&reports, &targets));
        println!();
        report::print_multi_summary(&reports, &targets);
    }

    if let Some(path) = export {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write results to {:?}", path))?;
        println!();
        println!("Exported results to {:?}", path);
    }

    Ok(())
}

/// Numbered listing of the parsed proxies, credentials redacted
fn print_proxy_list(proxies: &[Proxy]) {
    use tabled::builder::Builder;
    use tabled::settings::Style;

    println!();
    println!("Found {} proxies:", proxies.len().to_string().green());
    println!();

    let mut builder = Builder::default();
    builder.push_record(["#", "Proxy", "Type", "Auth"]);
    for (i, proxy) in proxies.iter().enumerate() {
        builder.push_record([
            (i + 1).to_string(),
            proxy.to_simple_string(),
            proxy.proxy_type.to_string(),
            if proxy.auth.is_some() { "yes" } else { "no" }.to_string(),
        ]);
    }

    let mut table = builder.build();
    println!("{}", table.with(Style::psql()));
    println!();
}

fn warn_skipped(parsed: &ParsedProxies) {
    for warning in &parsed.warnings {
        eprintln!("{} skipped {}", "Warning:".yellow(), warning);
    }
}

/// Split comma-separated URL input, defaulting bare hostnames to https://
fn normalize_urls(inputs: &[String]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();

    for input in inputs {
        for url in input.split(',') {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            if url.starts_with("http://") || url.starts_with("https://") {
                urls.push(url.to_string());
            } else {
                urls.push(format!("https://{}", url));
            }
        }
    }

    if urls.is_empty() {
        urls.push(DEFAULT_TARGET_URL.to_string());
    }

    urls
}

fn parse_proxy_type(s: &str) -> Result<ProxyType> {
    match s.to_lowercase().as_str() {
        "http" => Ok(ProxyType::Http),
        "https" => Ok(ProxyType::Https),
        "socks5" => Ok(ProxyType::Socks5),
        _ => Err(anyhow!(
            "Invalid proxy type: {}. Use: http, https, socks5",
            s
        )),
    }
}

fn prompt(message: &str, default: &str) -> Result<String> {
    if default.is_empty() {
        print!("{}: ", message.bold());
    } else {
        print!("{} [{}]: ", message.bold(), default.cyan());
    }
    io::stdout().flush()?;

    let mut line = String::new();
    let bytes = io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    if bytes == 0 {
        bail!("end of input");
    }

    let line = line.trim();
    Ok(if line.is_empty() {
        default.to_string()
    } else {
        line.to_string()
    })
}

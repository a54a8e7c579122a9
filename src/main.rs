//! rsbanner - 服务Banner指纹识别命令行工具
//!
//! Usage:
//!   rsbanner --banner "SSH-2.0-OpenSSH_8.2p1"          使用内置规则识别单个Banner
//!   rsbanner --probe-file nmap-service-probes -b ...    使用探测文件规则识别
//!   rsbanner --interactive                             交互模式（从标准输入读取Banner）

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use rsbanner::{
    BannerDetector, ConfigManager, ProbeFileLoader, ResultRanker, Rule, RuleSetCodec, ServiceInfo, builtin_rules,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "rsbanner", version)]
#[command(about = "Identify services from network banners", long_about = None)]
struct Cli {
    /// Banner to identify
    #[arg(short, long)]
    banner: Option<String>,

    /// Base64 encoded response body appended to the banner
    #[arg(long)]
    response: Option<String>,

    /// Nmap service-probes style rule file
    #[arg(short, long)]
    probe_file: Option<PathBuf>,

    /// JSON rule set file
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Include the built-in rules (default when no other rule source is given)
    #[arg(long)]
    builtin: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Drop results below this confidence
    #[arg(short, long, default_value_t = 0)]
    min_confidence: u8,

    /// Read banners from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Write the loaded rules as a JSON rule set and exit
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigManager::get_default();
    let detector = BannerDetector::new(config.clone());

    let rules = collect_rules(&cli, &config)?;
    let report = detector.load_rules(rules);
    info!(
        "{} rules loaded ({} inert, {} skipped)",
        report.loaded, report.inert, report.skipped
    );

    if let Some(path) = &cli.export {
        let json = detector.export_json(true)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write rule set: {}", path.display()))?;
        println!("Exported {} rules to {}", report.loaded, path.display());
        return Ok(());
    }

    if cli.interactive {
        let _sweeper = detector.spawn_cache_sweeper()?;
        return run_interactive(&detector, &cli);
    }

    let Some(banner) = &cli.banner else {
        bail!("Nothing to match: pass --banner or --interactive");
    };
    run_single(&detector, &cli, banner)
}

/// 汇总命令行指定的规则来源
fn collect_rules(cli: &Cli, config: &rsbanner::EngineConfig) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    if cli.builtin || (cli.probe_file.is_none() && cli.rules.is_none()) {
        rules.extend(builtin_rules());
    }

    if let Some(path) = &cli.probe_file {
        let file = File::open(path).with_context(|| format!("Failed to open probe file: {}", path.display()))?;
        let import = ProbeFileLoader::new(config.import)
            .parse(BufReader::new(file))
            .with_context(|| format!("Failed to read probe file: {}", path.display()))?;
        for skipped in &import.skipped {
            warn!("{}: {}", path.display(), skipped);
        }
        rules.extend(import.rules);
    }

    if let Some(path) = &cli.rules {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule set: {}", path.display()))?;
        let rule_set = RuleSetCodec::from_json(&json)
            .with_context(|| format!("Failed to parse rule set: {}", path.display()))?;
        rules.extend(rule_set.rules);
    }

    Ok(rules)
}

fn run_single(detector: &BannerDetector, cli: &Cli, banner: &str) -> Result<()> {
    let start = Instant::now();
    let results = detector.match_with_response(banner, cli.response.as_deref().map(str::as_bytes));
    let results = ResultRanker::filter_min_confidence(results, cli.min_confidence);
    print_results(&results, cli.output, start.elapsed().as_secs_f64() * 1000.0)
}

fn run_interactive(detector: &BannerDetector, cli: &Cli) -> Result<()> {
    println!("Interactive mode: type a banner, or `stats`, `rules`, `help`, `quit`");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("banner> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("  <banner>        identify a banner");
                println!("  match <banner>  identify a banner");
                println!("  stats           show engine statistics");
                println!("  rules           list loaded rules");
                println!("  quit            exit");
            }
            "stats" => println!("{}", serde_json::to_string_pretty(&detector.stats())?),
            "rules" => {
                for rule in detector.rules() {
                    println!(
                        "  {:<20} {:<10} {:<24} {}%",
                        rule.id, rule.service, rule.product, rule.confidence
                    );
                }
            }
            _ => {
                let banner = input.strip_prefix("match ").unwrap_or(input);
                let start = Instant::now();
                let results = ResultRanker::filter_min_confidence(detector.match_banner(banner), cli.min_confidence);
                print_results(&results, cli.output, start.elapsed().as_secs_f64() * 1000.0)?;
            }
        }
    }

    Ok(())
}

fn print_results(results: &[ServiceInfo], format: OutputFormat, elapsed_ms: f64) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "matches": results,
                "count": results.len(),
                "elapsed_ms": elapsed_ms,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No match ({:.3} ms)", elapsed_ms);
                return Ok(());
            }
            println!("{} match(es) ({:.3} ms)", results.len(), elapsed_ms);
            for (idx, result) in results.iter().enumerate() {
                println!("{}. {}", idx + 1, result);
                let fields = [
                    ("info", &result.info),
                    ("os", &result.os),
                    ("host", &result.hostname),
                    ("device", &result.device_type),
                    ("cpe", &result.cpe),
                ];
                for (name, value) in fields {
                    if !value.is_empty() {
                        println!("   {:<7} {}", name, value);
                    }
                }
                println!("   {:<7} {}", "rule", result.rule_id);
            }
        }
    }
    Ok(())
}

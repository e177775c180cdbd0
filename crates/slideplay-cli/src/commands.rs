//! CLI command implementations

use crate::output::{self, OutputFormat};
use crate::scenarios::{self, Scenario, ScenarioReport};
use anyhow::Context;
use serde::Serialize;
use slideplay_core::{
    media::EffectiveType,
    resolver::{detect_manifest_type, preferred_tier, select_variant, ResolveContext},
    ArbiterConfig, MediaSource, NetworkSignals, QualityTier, QualityVariants, SourceResolver,
    StaticSignals,
};
use std::path::Path;
use std::sync::Arc;

/// Load the configuration from a file, or from a named preset
pub fn load_config(path: Option<&Path>, preset: &str) -> anyhow::Result<ArbiterConfig> {
    if let Some(path) = path {
        return ArbiterConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }

    match preset.to_lowercase().as_str() {
        "default" => Ok(ArbiterConfig::default()),
        "mobile" => Ok(ArbiterConfig::mobile()),
        "desktop" => Ok(ArbiterConfig::desktop()),
        other => anyhow::bail!("unknown preset '{}' (expected default, mobile or desktop)", other),
    }
}

/// List the built-in scenarios
pub fn list_scenarios() {
    println!("Available scenarios:");
    for scenario in Scenario::ALL {
        println!("  {:<18} {}", scenario.as_str(), scenario.description());
    }
    println!("\nRun one with: slideplay scenario <name>, or all with --all");
}

/// Run scenarios and print their reports
pub async fn scenario(selected: &[Scenario], config: &ArbiterConfig, format: &str) -> anyhow::Result<()> {
    let mut reports: Vec<ScenarioReport> = Vec::with_capacity(selected.len());
    for &scenario in selected {
        tracing::info!(%scenario, "Running scenario");
        reports.push(scenarios::run(scenario, config).await?);
    }

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Table => reports.iter().for_each(output::print_report_table),
        OutputFormat::Text => reports.iter().for_each(output::print_report),
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        anyhow::bail!("{} of {} scenario(s) failed", failed, reports.len());
    }
    Ok(())
}

/// Arguments of the resolve command
pub struct ResolveArgs {
    pub url: Option<String>,
    pub low: Option<String>,
    pub mid: Option<String>,
    pub high: Option<String>,
    pub downlink: Option<f64>,
    pub effective_type: Option<String>,
    pub save_data: bool,
    pub viewport: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResolveReport {
    signals: StaticSignals,
    estimated_downlink_mbps: f64,
    preferred_tier: QualityTier,
    selected_tier: Option<QualityTier>,
    url: Option<String>,
    manifest: Option<String>,
}

/// Resolve a source for the given signals
pub fn resolve(args: ResolveArgs, config: &ArbiterConfig, format: &str) -> anyhow::Result<()> {
    let effective_type = args
        .effective_type
        .as_deref()
        .map(str::parse::<EffectiveType>)
        .transpose()?;
    let signals = StaticSignals::new(
        NetworkSignals {
            save_data: args.save_data,
            effective_type,
            downlink_mbps: args.downlink,
        },
        args.viewport,
    );

    let src = match args.url {
        Some(url) => MediaSource::Url(url),
        None => {
            let variants = QualityVariants {
                low: args.low,
                mid: args.mid,
                high: args.high,
            };
            if variants.is_empty() {
                anyhow::bail!("give a source with --url or at least one of --low/--mid/--high");
            }
            MediaSource::Variants(variants)
        }
    };

    let resolver = SourceResolver::new(config.resolver.clone(), Arc::new(signals));
    let ctx = ResolveContext::from_provider(&signals);
    let selected_tier = match &src {
        MediaSource::Variants(variants) => select_variant(variants, &ctx, &config.resolver).map(|(tier, _)| tier),
        MediaSource::Url(_) => None,
    };
    let url = resolver.resolve(&src);

    let report = ResolveReport {
        signals,
        estimated_downlink_mbps: ctx.downlink_mbps(&config.resolver),
        preferred_tier: preferred_tier(&ctx, &config.resolver),
        selected_tier,
        manifest: url
            .as_deref()
            .and_then(detect_manifest_type)
            .map(|m| format!("{:?}", m)),
        url,
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text | OutputFormat::Table => {
            println!("Source Resolution:");
            println!("  Estimated downlink: {:.2} Mbps", report.estimated_downlink_mbps);
            println!("  Preferred tier: {}", report.preferred_tier);
            if let Some(tier) = report.selected_tier {
                println!("  Selected tier: {}", tier);
            }
            match &report.url {
                Some(url) => println!("  URL: {}", url),
                None => println!("  URL: (none)"),
            }
            if let Some(manifest) = &report.manifest {
                println!("  Adaptive manifest: {}", manifest);
            }
        }
    }

    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &ArbiterConfig, format: &str) -> anyhow::Result<()> {
    config.validate()?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text | OutputFormat::Table => output::print_config(config),
    }
    Ok(())
}

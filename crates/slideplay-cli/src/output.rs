//! Output formatting for CLI

use crate::scenarios::ScenarioReport;
use console::style;
use slideplay_core::{ArbiterConfig, PlaybackScope};
use tabled::{settings::Style, Table};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

fn verdict(passed: bool) -> console::StyledObject<&'static str> {
    if passed {
        style("PASS").green().bold()
    } else {
        style("FAIL").red().bold()
    }
}

fn print_header(report: &ScenarioReport) {
    println!(
        "\n{} {} - {}",
        verdict(report.passed),
        style(report.scenario).cyan().bold(),
        report.description
    );
}

fn print_checks_and_cache(report: &ScenarioReport) {
    println!("\n  Checks:");
    for check in &report.checks {
        let mark = if check.passed { style("✓").green() } else { style("✗").red() };
        println!("    {} {}", mark, check.name);
    }

    let cache = &report.cache;
    println!(
        "\n  Cache: {} entries, {} attached, {} pending disposal, {} stream handles",
        cache.entries, cache.attached, cache.pending_disposal, cache.stream_handles
    );
    println!("  Session events: {}", report.events.len());
}

/// Print a scenario report as plain text
pub fn print_report(report: &ScenarioReport) {
    print_header(report);
    println!("\n  Steps:");
    for step in &report.steps {
        println!("    [{:>5} ms] {:<32} {}", step.at_ms, step.action, step.result);
    }
    print_checks_and_cache(report);
}

/// Print a scenario report with its steps as a table
pub fn print_report_table(report: &ScenarioReport) {
    print_header(report);
    let mut table = Table::new(&report.steps);
    table.with(Style::rounded());
    println!("{}", table);
    print_checks_and_cache(report);
}

/// Print the configuration in a readable form
pub fn print_config(config: &ArbiterConfig) {
    let resolver = &config.resolver;
    println!("Resolver:");
    println!("  Low threshold: {} Mbps", resolver.low_threshold_mbps);
    println!("  Mid threshold: {} Mbps", resolver.mid_threshold_mbps);
    println!("  Small viewport: < {} px", resolver.small_viewport_px);
    println!("  Default downlink: {} Mbps", resolver.default_downlink_mbps);

    let cache = &config.cache;
    println!("\nCache:");
    println!("  Capacity: {} entries", cache.capacity);
    for scope in PlaybackScope::ALL {
        let policy = cache.policy(scope);
        println!(
            "  {}: release on detach = {}, dispose after {} ms",
            scope, policy.release_on_detach, policy.dispose_after_ms
        );
    }
    println!(
        "  Stream: max buffer {} s, start at lowest = {}, worker = {}",
        cache.stream.max_buffer_secs, cache.stream.start_at_lowest, cache.stream.enable_worker
    );

    let engine = &config.engine;
    println!("\nEngine:");
    println!("  Ready timeout: {} ms", engine.ready_timeout_ms);
    println!(
        "  Progress samples: {} ms / {} ms (min advance {} s)",
        engine.short_sample_ms, engine.long_sample_ms, engine.min_advance_secs
    );
    println!("  Progress probe: {:?}", engine.probe);
}

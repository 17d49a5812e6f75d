//! Command implementations for the CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use npm_mirror_core::{CancelToken, Mirror, MirrorConfig, SyncSummary};

use crate::formatting::{
    format_bytes, format_duration, print_error, print_key_value, print_section_header,
    print_separator_with_spacing, print_success, print_summary_box, print_warning, SectionStyle,
};
use crate::MirrorArgs;

const DEFAULT_CONFIG_FILE: &str = "npm-mirror.toml";

/// Loads the configuration file, if any, and applies command-line overrides.
///
/// An explicitly named file must exist; the default file is optional.
pub fn resolve_config(path: Option<&Path>, args: &MirrorArgs) -> Result<MirrorConfig> {
    let mut config = match path {
        Some(path) => MirrorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => MirrorConfig::load(DEFAULT_CONFIG_FILE)?,
        None => MirrorConfig::default(),
    };

    if let Some(from) = &args.from {
        config = config.with_source(from.clone());
    }
    if let Some(to) = &args.to {
        config = config.with_root(to.clone());
    }
    if let Some(server) = &args.server {
        config = config.with_server(server.clone());
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.no_recheck {
        config = config.with_recheck(false);
    }

    config.validate()?;
    Ok(config)
}

/// Installs a Ctrl+C handler that trips the returned token.
fn cancel_on_interrupt() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        handler_cancel.cancel();
    })
    .map_err(|e| anyhow::anyhow!("Failed to set signal handler: {}", e))?;
    Ok(cancel)
}

pub fn cmd_sync(config: MirrorConfig, json: bool) -> Result<()> {
    if !json {
        print_plan("Mirroring registry", SectionStyle::Primary, &config);
    }

    let cancel = cancel_on_interrupt()?;
    let start = Instant::now();
    let mirror = Mirror::new(config, cancel.clone())?;
    let summary = mirror.run()?;

    report(&summary, start, &cancel, json)
}

pub fn cmd_package(config: MirrorConfig, names: Vec<String>, json: bool) -> Result<()> {
    if !json {
        print_plan("Mirroring packages", SectionStyle::Secondary, &config);
        print_key_value("Packages", &names.join(", "));
        println!();
    }

    let cancel = cancel_on_interrupt()?;
    let start = Instant::now();
    let mirror: Arc<Mirror> = Mirror::new(config, cancel.clone())?;
    let summary = mirror.run_packages(&names)?;

    report(&summary, start, &cancel, json)
}

fn print_plan(title: &str, style: SectionStyle, config: &MirrorConfig) {
    print_section_header(title, style);
    print_key_value("From", &config.source);
    print_key_value("To", &config.root.display().to_string());
    print_key_value("Server", &config.server);
    print_key_value("Workers", &config.workers.to_string());
    println!();
}

fn report(summary: &SyncSummary, start: Instant, cancel: &CancelToken, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let elapsed = start.elapsed().as_secs_f64();
    print_separator_with_spacing();
    print_summary_box("Summary", &summary_items(summary, elapsed));
    println!();

    if cancel.is_cancelled() {
        print_warning("Interrupted; the mirror is incomplete");
    } else if summary.failed_tasks > 0 {
        print_error(&format!(
            "{} task(s) failed; rerun to retry them",
            summary.failed_tasks
        ));
    } else {
        print_success("Mirror is up to date");
    }

    Ok(())
}

fn summary_items(summary: &SyncSummary, elapsed: f64) -> Vec<(&'static str, String)> {
    vec![
        ("Packages", summary.packages_scheduled.to_string()),
        ("Tarballs", summary.tarballs_scheduled.to_string()),
        ("Downloaded", summary.fresh.to_string()),
        ("Unchanged", summary.not_modified.to_string()),
        ("Skipped", summary.skipped.to_string()),
        ("Unpublished", summary.unpublished.to_string()),
        ("Removed versions", summary.versions_removed.to_string()),
        ("Failed", summary.failed_tasks.to_string()),
        ("Written", format_bytes(summary.bytes_written)),
        ("Duration", format_duration(elapsed)),
    ]
}

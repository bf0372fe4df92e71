pub mod bundle;
pub mod catalogue;
pub mod config;
pub mod corpus;
pub mod errors;
pub mod log_retention;
pub mod logging;
pub mod matcher;
pub mod narrator;
pub mod report;
pub mod runtime;
pub mod types;

use bundle::extract_bundle;
use catalogue::Catalogue;
use chrono::{DateTime, Utc};
use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use corpus::build_corpus;
use errors::TriageError;
use logging::{append_run_log, init_run_log};
use matcher::aggregate;
use narrator::factory::NarratorFactory;
use narrator::narrate_report;
use report::{emit_report, report_paths, Report, ReportPaths};
use runtime::ProductionRuntime;
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use types::NarratorKind;

#[derive(Debug, Clone, Parser)]
#[command(name = "triage-analyze")]
#[command(about = "Match a triage bundle against known failure signatures and write a report")]
#[command(
    after_help = "Reports are written as report_<hostdir>_<YYYYmmdd_HHMMSS>.json and .txt; the timestamp in the file name and in generated_at is UTC."
)]
pub struct AnalyzeCli {
    /// Triage bundle (.tar.gz) holding one host directory
    pub bundle: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Evidence lines kept on each side of a match
    #[arg(long)]
    pub window: Option<usize>,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "triage-narrate")]
#[command(about = "Summarize a triage report with a text model")]
pub struct NarrateCli {
    /// Report JSON written by triage-analyze
    pub report: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<CliNarrator>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliNarrator {
    Ollama,
    Offline,
}

impl From<CliNarrator> for NarratorKind {
    fn from(value: CliNarrator) -> Self {
        match value {
            CliNarrator::Ollama => NarratorKind::Ollama,
            CliNarrator::Offline => NarratorKind::Offline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub report: Report,
    pub paths: ReportPaths,
}

pub fn run_analyze() -> Result<i32, TriageError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TriageError::Io(e.to_string()))?;
    run_analyze_with_runtime(&args, &cwd, &ProductionRuntime::new())
}

pub fn run_narrate() -> Result<i32, TriageError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TriageError::Io(e.to_string()))?;
    run_narrate_with_runtime(&args, &cwd, &ProductionRuntime::new())
}

pub fn run_analyze_with_runtime(
    args: &[OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, TriageError> {
    let Some(cli) = parse_cli::<AnalyzeCli>(args)? else {
        return Ok(0);
    };

    let bundle_path = absolutize(cwd, &cli.bundle);
    if !bundle_path.is_file() {
        return Err(TriageError::MissingInput(format!(
            "bundle not found: {}",
            cli.bundle.display()
        )));
    }

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        output_dir: cli.output_dir.clone(),
        window_radius: cli.window,
        ..CliOverrides::default()
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    init_run_log(cfg.run_log_path(cwd));

    let catalogue = Catalogue::builtin()?;
    let outcome = analyze_bundle(
        &bundle_path,
        &cli.bundle.display().to_string(),
        &cfg,
        &catalogue,
        runtime,
        &cfg.output_dir(cwd),
    )?;

    runtime.terminal.write_line("OK:")?;
    runtime
        .terminal
        .write_line(&format!("  JSON: {}", outcome.paths.json.display()))?;
    runtime
        .terminal
        .write_line(&format!("  TXT : {}", outcome.paths.text.display()))?;
    Ok(0)
}

/// Runs extraction, matching and emission for one bundle. The extracted
/// tree is removed before the report is written, on success or failure.
pub fn analyze_bundle(
    bundle_path: &Path,
    bundle_label: &str,
    cfg: &AppConfig,
    catalogue: &Catalogue,
    runtime: &ProductionRuntime,
    out_dir: &Path,
) -> Result<AnalysisOutcome, TriageError> {
    let (hostdir, findings) = {
        let extracted = extract_bundle(bundle_path)?;
        let corpus = build_corpus(&extracted.root, &cfg.corpus.extensions);
        let findings = aggregate(&corpus, catalogue, &cfg.match_options());
        (extracted.hostdir.clone(), findings)
    };

    let generated_at: DateTime<Utc> = runtime.clock.now().into();
    let report = Report::new(bundle_label, hostdir, generated_at, findings);
    let paths = report_paths(out_dir, &report.hostdir, generated_at);
    let paths = emit_report(runtime.file_system.as_ref(), &report, &paths)?;

    append_run_log(
        "info",
        "analyze.completed",
        json!({
            "bundle": bundle_label,
            "hostdir": report.hostdir,
            "primary": report.primary_finding.as_ref().map(|f| f.rule_id.clone()),
        }),
    );
    Ok(AnalysisOutcome { report, paths })
}

pub fn run_narrate_with_runtime(
    args: &[OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, TriageError> {
    let Some(cli) = parse_cli::<NarrateCli>(args)? else {
        return Ok(0);
    };

    let report_path = absolutize(cwd, &cli.report);
    if !runtime.file_system.exists(&report_path) {
        return Err(TriageError::MissingInput(format!(
            "report not found: {}",
            cli.report.display()
        )));
    }

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        narrator_backend: cli.backend.map(Into::into),
        narrator_model: cli.model.clone(),
        narrator_endpoint: cli.endpoint.clone(),
        ..CliOverrides::default()
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    init_run_log(cfg.run_log_path(cwd));

    let factory = NarratorFactory::with_defaults(&cfg.narrator);
    let narrator = factory.get(cfg.narrator.backend).ok_or_else(|| {
        TriageError::InvalidConfig(format!(
            "no narrator registered for backend {}",
            cfg.narrator.backend.as_str()
        ))
    })?;
    let out = narrate_report(runtime.file_system.as_ref(), narrator.as_ref(), &report_path)?;

    runtime
        .terminal
        .write_line(&format!("OK: {}", out.display()))?;
    Ok(0)
}

/// Parses `args`, printing help or version output and returning `None` when
/// clap asked for it.
fn parse_cli<T: Parser>(args: &[OsString]) -> Result<Option<T>, TriageError> {
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                Ok(None)
            }
            _ => Err(TriageError::Usage(error.to_string())),
        },
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

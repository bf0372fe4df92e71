use crate::corpus::DEFAULT_EXTENSIONS;
use crate::errors::TriageError;
use crate::matcher::{MatchOptions, DEFAULT_WINDOW_RADIUS};
use crate::runtime::FileSystem;
use crate::types::{EvidenceScope, NarratorKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const RUN_LOG_FILE: &str = "triage-run.jsonl";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub window_radius: Option<usize>,
    pub narrator_backend: Option<NarratorKind>,
    pub narrator_model: Option<String>,
    pub narrator_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub evidence: EvidenceConfig,
    pub corpus: CorpusConfig,
    pub output: OutputConfig,
    pub narrator: NarratorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceConfig {
    pub window_radius: usize,
    pub scope: EvidenceScope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusConfig {
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarratorConfig {
    pub backend: NarratorKind,
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub run_log: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            evidence: EvidenceConfig {
                window_radius: DEFAULT_WINDOW_RADIUS,
                scope: EvidenceScope::Artifact,
            },
            corpus: CorpusConfig {
                extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            },
            output: OutputConfig {
                dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            },
            narrator: NarratorConfig {
                backend: NarratorKind::Ollama,
                endpoint: "http://127.0.0.1:11434".to_string(),
                model: "qwen2.5:3b".to_string(),
                temperature: 0.0,
                timeout_seconds: 500,
            },
            logging: LoggingConfig { run_log: None },
        }
    }
}

impl AppConfig {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            window_radius: self.evidence.window_radius,
            scope: self.evidence.scope,
        }
    }

    pub fn output_dir(&self, process_cwd: &Path) -> PathBuf {
        absolutize_path(process_cwd, &self.output.dir)
    }

    /// Run log location; defaults to `<output dir>/logs/triage-run.jsonl`.
    pub fn run_log_path(&self, process_cwd: &Path) -> PathBuf {
        match &self.logging.run_log {
            Some(path) => absolutize_path(process_cwd, path),
            None => self.output_dir(process_cwd).join("logs").join(RUN_LOG_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    evidence: Option<PartialEvidenceConfig>,
    corpus: Option<PartialCorpusConfig>,
    output: Option<PartialOutputConfig>,
    narrator: Option<PartialNarratorConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialEvidenceConfig {
    window_radius: Option<usize>,
    scope: Option<EvidenceScope>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCorpusConfig {
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialNarratorConfig {
    backend: Option<NarratorKind>,
    endpoint: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    run_log: Option<PathBuf>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, TriageError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        if !fs.exists(&path) {
            return Err(TriageError::MissingInput(format!(
                "config not found: {}",
                path.display()
            )));
        }
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| TriageError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(evidence) = partial.evidence {
        if let Some(value) = evidence.window_radius {
            cfg.evidence.window_radius = value;
        }
        if let Some(value) = evidence.scope {
            cfg.evidence.scope = value;
        }
    }

    if let Some(corpus) = partial.corpus {
        if let Some(extensions) = corpus.extensions {
            cfg.corpus.extensions = extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect();
        }
    }

    if let Some(output) = partial.output {
        if let Some(dir) = output.dir {
            cfg.output.dir = dir;
        }
    }

    if let Some(narrator) = partial.narrator {
        if let Some(value) = narrator.backend {
            cfg.narrator.backend = value;
        }
        if let Some(value) = narrator.endpoint {
            cfg.narrator.endpoint = value;
        }
        if let Some(value) = narrator.model {
            cfg.narrator.model = value;
        }
        if let Some(value) = narrator.temperature {
            cfg.narrator.temperature = value;
        }
        if let Some(value) = narrator.timeout_seconds {
            cfg.narrator.timeout_seconds = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.run_log {
            cfg.logging.run_log = Some(path);
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(dir) = &overrides.output_dir {
        cfg.output.dir = dir.clone();
    }
    if let Some(radius) = overrides.window_radius {
        cfg.evidence.window_radius = radius;
    }
    if let Some(backend) = overrides.narrator_backend {
        cfg.narrator.backend = backend;
    }
    if let Some(model) = &overrides.narrator_model {
        cfg.narrator.model = model.clone();
    }
    if let Some(endpoint) = &overrides.narrator_endpoint {
        cfg.narrator.endpoint = endpoint.clone();
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), TriageError> {
    if cfg.corpus.extensions.iter().all(|ext| ext.trim().is_empty()) {
        return Err(TriageError::InvalidConfig(
            "corpus.extensions must name at least one extension".to_string(),
        ));
    }

    if cfg.narrator.timeout_seconds == 0 {
        return Err(TriageError::InvalidConfig(
            "narrator.timeout_seconds must be greater than zero".to_string(),
        ));
    }

    if !cfg.narrator.temperature.is_finite() || cfg.narrator.temperature < 0.0 {
        return Err(TriageError::InvalidConfig(
            "narrator.temperature must be a non-negative number".to_string(),
        ));
    }

    if cfg.narrator.backend == NarratorKind::Ollama {
        validate_model(&cfg.narrator.model)?;
        if cfg.narrator.endpoint.trim().is_empty() {
            return Err(TriageError::InvalidConfig(
                "narrator.endpoint is required for the ollama backend".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn validate_model(model: &str) -> Result<(), TriageError> {
    if model.trim().is_empty() || model.trim() == "..." || model.eq_ignore_ascii_case("todo") {
        return Err(TriageError::InvalidConfig(
            "narrator.model is invalid; configure a real model id".to_string(),
        ));
    }
    Ok(())
}

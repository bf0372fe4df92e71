//! Narration of a finished report by an external text model.
//!
//! The narrator only ever sees the structured [`Report`]. Its answer is
//! treated as untrusted annotation: when it does not match [`Narration`] the
//! raw text is kept in an [`UnparsedNarration`] instead of failing the run.

use crate::errors::TriageError;
use crate::logging::append_run_log;
use crate::report::Report;
use crate::runtime::FileSystem;
use crate::types::NarratorKind;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub mod factory;
pub mod ollama;

pub const UNPARSED_SUMMARY: &str = "narrator output was not valid JSON";
pub const UNCONFIRMED: &str = "cannot be confirmed from the report";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    pub phenomenon: String,
    pub impact: String,
    pub root_cause: String,
    pub fix: String,
    pub prevention: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narration {
    pub summary: String,
    pub verify: Vec<String>,
    pub fix: Vec<String>,
    pub risk: String,
    pub rca: RootCauseAnalysis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparsedNarration {
    pub summary: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NarratedResult {
    Structured(Narration),
    Unparsed(UnparsedNarration),
}

impl NarratedResult {
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    pub fn summary(&self) -> &str {
        match self {
            Self::Structured(narration) => &narration.summary,
            Self::Unparsed(unparsed) => &unparsed.summary,
        }
    }
}

pub trait Narrator: Send + Sync {
    fn kind(&self) -> NarratorKind;
    fn summarize(&self, report: &Report) -> Result<NarratedResult, TriageError>;
}

pub fn build_prompt(report: &Report) -> Result<String, TriageError> {
    let report_json = serde_json::to_string(report)
        .map_err(|e| TriageError::Narrator(format!("report encode failed: {e}")))?;
    Ok(format!(
        r#"You are a senior on-call operations engineer. Answer strictly from the JSON report below and do not invent information.
Only use fields present in the report (findings, primary_finding, verify_steps, fix_steps, evidence_snippet).
If evidence is missing or a point cannot be confirmed, write "{UNCONFIRMED}".

Reply with JSON only, using exactly this structure and field names:
{{
  "summary": "string",
  "verify": ["step1", "step2"],
  "fix": ["step1", "step2"],
  "risk": "string",
  "rca": {{
    "phenomenon": "string",
    "impact": "string",
    "root_cause": "string",
    "fix": "string",
    "prevention": "string"
  }}
}}

Requirements:
1) summary: one sentence on primary_finding, including its rule_id and root_cause
2) verify: primary_finding.verify_steps, in order
3) fix: primary_finding.fix_steps, in order
4) risk: one sentence of risk, based only on the report
5) rca: one sentence per field, based only on the report

JSON:
{report_json}
"#
    ))
}

/// Parses a model answer into a [`Narration`], falling back to the raw text.
pub fn parse_narration(raw: &str) -> NarratedResult {
    match serde_json::from_str::<Narration>(strip_code_fence(raw)) {
        Ok(narration) => NarratedResult::Structured(narration),
        Err(err) => {
            append_run_log(
                "warn",
                "narrator.response.unparsed",
                json!({ "error": err.to_string(), "raw_bytes": raw.len() }),
            );
            NarratedResult::Unparsed(UnparsedNarration {
                summary: UNPARSED_SUMMARY.to_string(),
                raw: raw.to_string(),
            })
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub fn prompt_fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Narrates from the report alone, without a model. Every field is copied
/// or derived from the primary finding.
pub struct OfflineNarrator;

impl Narrator for OfflineNarrator {
    fn kind(&self) -> NarratorKind {
        NarratorKind::Offline
    }

    fn summarize(&self, report: &Report) -> Result<NarratedResult, TriageError> {
        let Some(primary) = &report.primary_finding else {
            return Ok(NarratedResult::Structured(Narration {
                summary: format!("No known failure signature matched host {}.", report.hostdir),
                verify: Vec::new(),
                fix: Vec::new(),
                risk: UNCONFIRMED.to_string(),
                rca: RootCauseAnalysis {
                    phenomenon: UNCONFIRMED.to_string(),
                    impact: UNCONFIRMED.to_string(),
                    root_cause: UNCONFIRMED.to_string(),
                    fix: UNCONFIRMED.to_string(),
                    prevention: UNCONFIRMED.to_string(),
                },
            }));
        };

        let others = report.findings.len().saturating_sub(1);
        Ok(NarratedResult::Structured(Narration {
            summary: format!(
                "{} ({}): {}",
                primary.rule_id,
                primary.severity.as_str(),
                primary.root_cause
            ),
            verify: primary.verify_steps.clone(),
            fix: primary.fix_steps.clone(),
            risk: format!(
                "{} issue on host {}; {others} further finding(s) matched.",
                primary.severity.as_str(),
                report.hostdir
            ),
            rca: RootCauseAnalysis {
                phenomenon: format!("Signature {} matched the bundle logs.", primary.rule_id),
                impact: format!("Severity {} on host {}.", primary.severity.as_str(), report.hostdir),
                root_cause: primary.root_cause.clone(),
                fix: primary.fix_steps.join("; "),
                prevention: UNCONFIRMED.to_string(),
            },
        }))
    }
}

pub fn narration_path(report_path: &Path) -> PathBuf {
    let stem = report_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    report_path.with_file_name(format!("{stem}_llm.json"))
}

/// Reads a report, narrates it and writes `<stem>_llm.json` beside it. The
/// output file is only written once the narrator has answered.
pub fn narrate_report(
    fs: &dyn FileSystem,
    narrator: &dyn Narrator,
    report_path: &Path,
) -> Result<PathBuf, TriageError> {
    if !fs.exists(report_path) {
        return Err(TriageError::MissingInput(format!(
            "report not found: {}",
            report_path.display()
        )));
    }
    let report = Report::from_json(&fs.read_to_string(report_path)?)?;

    append_run_log(
        "info",
        "narrator.request.started",
        json!({
            "backend": narrator.kind().as_str(),
            "report": report_path.display().to_string(),
            "finding_count": report.findings.len(),
        }),
    );
    let result = narrator.summarize(&report)?;

    let out = narration_path(report_path);
    let text = serde_json::to_string_pretty(&result)
        .map_err(|e| TriageError::Io(format!("narration encode failed: {e}")))?;
    fs.write_string(&out, &text)?;

    append_run_log(
        "info",
        "narrator.request.completed",
        json!({
            "backend": narrator.kind().as_str(),
            "output": out.display().to_string(),
            "structured": result.is_structured(),
        }),
    );
    Ok(out)
}

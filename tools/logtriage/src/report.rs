use crate::catalogue::Signature;
use crate::errors::TriageError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use crate::types::Severity;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub priority: u32,
    pub severity: Severity,
    pub root_cause: String,
    pub verify_steps: Vec<String>,
    pub fix_steps: Vec<String>,
    pub evidence_snippet: String,
}

impl Finding {
    pub fn from_signature(signature: &Signature, evidence_snippet: String) -> Self {
        Self {
            rule_id: signature.id.to_string(),
            priority: signature.priority,
            severity: signature.severity,
            root_cause: signature.cause.to_string(),
            verify_steps: signature.verify.iter().map(|s| s.to_string()).collect(),
            fix_steps: signature.fix.iter().map(|s| s.to_string()).collect(),
            evidence_snippet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub bundle: String,
    pub hostdir: String,
    pub generated_at: String,
    pub findings: Vec<Finding>,
    pub primary_finding: Option<Finding>,
}

impl Report {
    /// `findings` must already be in priority order; the first one becomes
    /// the primary finding.
    pub fn new(
        bundle: impl Into<String>,
        hostdir: impl Into<String>,
        generated_at: DateTime<Utc>,
        findings: Vec<Finding>,
    ) -> Self {
        let primary_finding = findings.first().cloned();
        Self {
            bundle: bundle.into(),
            hostdir: hostdir.into(),
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            findings,
            primary_finding,
        }
    }

    pub fn to_json(&self) -> Result<String, TriageError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TriageError::Io(format!("report encode failed: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self, TriageError> {
        serde_json::from_str(text).map_err(|e| TriageError::ReportParse(e.to_string()))
    }
}

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str("=== TRIAGE REPORT ===\n");
    out.push_str(&format!("Bundle: {}\n", report.bundle));
    out.push_str(&format!("HostDir: {}\n", report.hostdir));
    out.push_str(&format!("Generated: {}\n\n", report.generated_at));

    let Some(primary) = &report.primary_finding else {
        out.push_str("No known patterns matched.\n");
        return out;
    };

    out.push_str(&format!(
        "Primary: {} ({})\nCause: {}\n\n",
        primary.rule_id,
        primary.severity.as_str(),
        primary.root_cause
    ));
    for (idx, finding) in report.findings.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} {}\n",
            idx + 1,
            finding.rule_id,
            finding.severity.as_str()
        ));
        out.push_str(&format!("Cause: {}\n", finding.root_cause));
        out.push_str("Verify:\n");
        push_bullets(&mut out, &finding.verify_steps);
        out.push_str("Fix:\n");
        push_bullets(&mut out, &finding.fix_steps);
        out.push_str("Evidence snippet:\n");
        out.push_str(&finding.evidence_snippet);
        out.push_str("\n\n");
    }
    out
}

fn push_bullets(out: &mut String, steps: &[String]) {
    for step in steps {
        out.push_str(&format!("  - {step}\n"));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub text: PathBuf,
}

pub fn report_paths(out_dir: &Path, hostdir: &str, generated_at: DateTime<Utc>) -> ReportPaths {
    let stem = format!(
        "report_{}_{}",
        sanitize_file_component(hostdir),
        generated_at.format("%Y%m%d_%H%M%S")
    );
    ReportPaths {
        json: out_dir.join(format!("{stem}.json")),
        text: out_dir.join(format!("{stem}.txt")),
    }
}

fn sanitize_file_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "bundle".to_string()
    } else {
        cleaned
    }
}

/// Writes the JSON and text forms of `report`. Both are staged under
/// `.partial` names and moved into place together; on failure neither
/// final file is left behind.
pub fn emit_report(
    fs: &dyn FileSystem,
    report: &Report,
    paths: &ReportPaths,
) -> Result<ReportPaths, TriageError> {
    let json_text = report.to_json()?;
    let text = render_text(report);

    for path in [&paths.json, &paths.text] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs.create_dir_all(parent)?;
            }
        }
    }

    let json_staged = staging_path(&paths.json);
    let text_staged = staging_path(&paths.text);
    let staged = fs
        .write_string(&json_staged, &json_text)
        .and_then(|_| fs.write_string(&text_staged, &text))
        .and_then(|_| fs.rename(&json_staged, &paths.json));
    if let Err(err) = staged {
        discard(fs, &[json_staged.as_path(), text_staged.as_path()]);
        return Err(emit_failed(err));
    }
    if let Err(err) = fs.rename(&text_staged, &paths.text) {
        discard(fs, &[text_staged.as_path(), paths.json.as_path()]);
        return Err(emit_failed(err));
    }

    append_run_log(
        "info",
        "report.emitted",
        json!({
            "json": paths.json.display().to_string(),
            "text": paths.text.display().to_string(),
            "finding_count": report.findings.len(),
        }),
    );
    Ok(paths.clone())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

fn discard(fs: &dyn FileSystem, paths: &[&Path]) {
    for path in paths {
        if fs.exists(path) {
            let _ = fs.remove_file(path);
        }
    }
}

fn emit_failed(err: TriageError) -> TriageError {
    append_run_log(
        "error",
        "report.emit.failed",
        json!({ "error": err.to_string() }),
    );
    err
}

use crate::catalogue::{Catalogue, Signature};
use crate::corpus::Corpus;
use crate::logging::append_run_log;
use crate::report::Finding;
use crate::types::EvidenceScope;
use serde_json::json;

pub const DEFAULT_WINDOW_RADIUS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub window_radius: usize,
    pub scope: EvidenceScope,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            window_radius: DEFAULT_WINDOW_RADIUS,
            scope: EvidenceScope::Artifact,
        }
    }
}

/// Inclusive line range of an evidence window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceWindow {
    pub start: usize,
    pub end: usize,
}

/// Index of the first content line the signature matches.
pub fn first_match(corpus: &Corpus, signature: &Signature) -> Option<usize> {
    corpus
        .lines()
        .iter()
        .enumerate()
        .find(|(idx, line)| !corpus.is_marker(*idx) && signature.is_match(line))
        .map(|(idx, _)| idx)
}

/// Window of `radius` lines either side of `hit`, clamped to the corpus and,
/// for [`EvidenceScope::Artifact`], to the artifact holding the hit.
pub fn evidence_window(corpus: &Corpus, hit: usize, options: &MatchOptions) -> EvidenceWindow {
    let last = corpus.lines().len().saturating_sub(1);
    let mut start = hit.saturating_sub(options.window_radius);
    let mut end = hit.saturating_add(options.window_radius).min(last);

    if options.scope == EvidenceScope::Artifact {
        if let Some(span) = corpus.artifact_at(hit) {
            start = start.max(span.marker);
            end = end.min(span.end.saturating_sub(1));
        }
    }

    EvidenceWindow { start, end }
}

pub fn match_signature(
    corpus: &Corpus,
    signature: &Signature,
    options: &MatchOptions,
) -> Option<Finding> {
    let hit = first_match(corpus, signature)?;
    let window = evidence_window(corpus, hit, options);
    let evidence_snippet = corpus.lines()[window.start..=window.end].join("\n");

    append_run_log(
        "debug",
        "matcher.signature.matched",
        json!({
            "rule_id": signature.id,
            "line": hit,
            "artifact": corpus.artifact_at(hit).map(|span| span.name.clone()),
            "window_start": window.start,
            "window_end": window.end,
        }),
    );

    Some(Finding::from_signature(signature, evidence_snippet))
}

/// Matches every signature and orders the findings by ascending priority.
/// The sort is stable, so equal priorities keep catalogue order.
pub fn aggregate(corpus: &Corpus, catalogue: &Catalogue, options: &MatchOptions) -> Vec<Finding> {
    let mut findings = catalogue
        .signatures()
        .iter()
        .filter_map(|signature| match_signature(corpus, signature, options))
        .collect::<Vec<_>>();
    findings.sort_by_key(|finding| finding.priority);

    append_run_log(
        "info",
        "aggregate.completed",
        json!({
            "signature_count": catalogue.len(),
            "finding_count": findings.len(),
            "primary": findings.first().map(|finding| finding.rule_id.clone()),
        }),
    );
    findings
}

use crate::logging::append_run_log;
use serde_json::json;
use std::path::Path;
use walkdir::WalkDir;

pub const DEFAULT_EXTENSIONS: &[&str] = &["txt", "log", "out"];

/// Line span one artifact occupies in the corpus. `marker` is the index of
/// the `===== name =====` line; content runs up to, not including, `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpan {
    pub name: String,
    pub marker: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    lines: Vec<String>,
    artifacts: Vec<ArtifactSpan>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one artifact under its boundary marker.
    pub fn push_artifact(&mut self, name: &str, text: &str) {
        let marker = self.lines.len();
        self.lines.push(marker_line(name));
        self.lines.extend(text.lines().map(str::to_string));
        self.artifacts.push(ArtifactSpan {
            name: name.to_string(),
            marker,
            end: self.lines.len(),
        });
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn artifacts(&self) -> &[ArtifactSpan] {
        &self.artifacts
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Artifact whose span contains `line`.
    pub fn artifact_at(&self, line: usize) -> Option<&ArtifactSpan> {
        let idx = self.artifacts.partition_point(|span| span.end <= line);
        self.artifacts
            .get(idx)
            .filter(|span| span.marker <= line && line < span.end)
    }

    pub fn is_marker(&self, line: usize) -> bool {
        self.artifact_at(line)
            .map(|span| span.marker == line)
            .unwrap_or(false)
    }
}

pub fn marker_line(name: &str) -> String {
    format!("===== {name} =====")
}

/// Builds the corpus from every artifact under `root` whose extension is in
/// `extensions`, visiting files in path order. Unreadable files are skipped.
pub fn build_corpus(root: &Path, extensions: &[String]) -> Corpus {
    let mut corpus = Corpus::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                append_run_log(
                    "warn",
                    "corpus.artifact.skipped",
                    json!({ "error": err.to_string() }),
                );
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match std::fs::read(entry.path()) {
            Ok(bytes) => corpus.push_artifact(&name, &String::from_utf8_lossy(&bytes)),
            Err(err) => append_run_log(
                "warn",
                "corpus.artifact.skipped",
                json!({ "artifact": name, "error": err.to_string() }),
            ),
        }
    }

    append_run_log(
        "info",
        "corpus.built",
        json!({
            "root": root.display().to_string(),
            "artifact_count": corpus.artifacts.len(),
            "line_count": corpus.lines.len(),
        }),
    );
    corpus
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

use flate2::write::GzEncoder;
use flate2::Compression;
use logtriage::analyze_bundle;
use logtriage::catalogue::Catalogue;
use logtriage::config::AppConfig;
use logtriage::errors::TriageError;
use logtriage::logging::close_run_log;
use logtriage::report::Report;
use logtriage::runtime::{FakeClock, FakeFileSystem, FakeTerminal, FileSystem, ProductionRuntime};
use logtriage::run_analyze_with_runtime;
use logtriage::types::Severity;
use std::ffi::OsString;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const REFUSED_LINE: &str = "2024/03/09 14:05:07 [error] 1234#0: *5 connect() failed (111: Connection refused) while connecting to upstream, client: 10.0.0.9";
const SELINUX_LINE: &str = "2024/03/09 14:04:00 [crit] 1234#0: *1 connect() to 10.0.0.2:8080 failed (13: Permission denied) while connecting to upstream";

fn write_bundle(path: &Path, files: &[(&str, &str)]) {
    let file = File::create(path).expect("create bundle");
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, name, std::io::empty())
                .expect("append dir");
        } else {
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .expect("append file");
        }
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");
}

fn write_traversal_bundle(path: &Path) {
    let name = b"../escaped.txt";
    let body = b"connect() failed (111: Connection refused)\n";
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let file = File::create(path).expect("create bundle");
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append(&header, &body[..]).expect("append raw");
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");
}

fn fixed_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn fake_runtime(fs: &FakeFileSystem, terminal: &FakeTerminal) -> ProductionRuntime {
    ProductionRuntime {
        clock: Arc::new(FakeClock::new(fixed_time())),
        file_system: Arc::new(fs.clone()),
        terminal: Arc::new(terminal.clone()),
    }
}

fn analyze(bundle: &Path, fs: &FakeFileSystem) -> Result<Report, TriageError> {
    let runtime = fake_runtime(fs, &FakeTerminal::default());
    let catalogue = Catalogue::builtin().expect("catalogue");
    analyze_bundle(
        bundle,
        "bundle.tar.gz",
        &AppConfig::default(),
        &catalogue,
        &runtime,
        Path::new("/out"),
    )
    .map(|outcome| outcome.report)
}

/// Detaches the run log before the tempdir it points into is removed.
struct RunLogGuard;

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        close_run_log();
    }
}

fn args(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

#[test]
fn refused_connection_alone_is_the_primary_finding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("bundle.tar.gz");
    write_bundle(
        &bundle,
        &[(
            "web01/nginx/error.txt",
            &format!("worker started\n{REFUSED_LINE}\nworker exiting\n"),
        )],
    );

    let fs = FakeFileSystem::default();
    let report = analyze(&bundle, &fs).expect("analyze");

    assert_eq!(report.hostdir, "web01");
    assert_eq!(report.findings.len(), 1);
    let primary = report.primary_finding.as_ref().expect("primary");
    assert_eq!(primary.rule_id, "NGINX_UPSTREAM_REFUSED");
    assert_eq!(primary.severity, Severity::P1);
    assert_eq!(primary, &report.findings[0]);
    assert!(primary.evidence_snippet.contains(REFUSED_LINE));
    assert!(primary.evidence_snippet.contains("===== nginx/error.txt ====="));
}

#[test]
fn selinux_outranks_refused_regardless_of_file_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("bundle.tar.gz");
    write_bundle(
        &bundle,
        &[
            ("web01/a-first.txt", REFUSED_LINE),
            ("web01/z-last.txt", SELINUX_LINE),
        ],
    );

    let report = analyze(&bundle, &FakeFileSystem::default()).expect("analyze");
    let ids: Vec<_> = report.findings.iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["NGINX_UPSTREAM_SELINUX", "NGINX_UPSTREAM_REFUSED"]);
    assert_eq!(
        report.primary_finding.as_ref().map(|f| f.rule_id.as_str()),
        Some("NGINX_UPSTREAM_SELINUX")
    );
    let priorities: Vec<_> = report.findings.iter().map(|f| f.priority).collect();
    assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn repeated_matches_still_produce_one_finding_per_signature() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("bundle.tar.gz");
    let body = [REFUSED_LINE; 5].join("\n");
    write_bundle(
        &bundle,
        &[("web01/one.txt", body.as_str()), ("web01/two.log", REFUSED_LINE)],
    );

    let report = analyze(&bundle, &FakeFileSystem::default()).expect("analyze");
    assert_eq!(report.findings.len(), 1);
}

#[test]
fn host_directory_without_artifacts_yields_empty_report_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("bundle.tar.gz");
    write_bundle(&bundle, &[("web01/", ""), ("web01/core.bin", "LifecycleException")]);

    let fs = FakeFileSystem::default();
    let report = analyze(&bundle, &fs).expect("analyze");
    assert!(report.findings.is_empty());
    assert!(report.primary_finding.is_none());

    let json = fs
        .read_to_string(Path::new("/out/report_web01_20231114_221320.json"))
        .expect("json written");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert!(value["primary_finding"].is_null());
    let text = fs
        .read_to_string(Path::new("/out/report_web01_20231114_221320.txt"))
        .expect("text written");
    assert!(text.contains("No known patterns matched."));
}

#[test]
fn identical_bundles_give_identical_reports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("bundle.tar.gz");
    write_bundle(
        &bundle,
        &[
            ("web01/catalina.out", "org.apache.catalina.LifecycleException: boom"),
            ("web01/nginx/error.txt", SELINUX_LINE),
            ("web01/mysql.txt", "Access denied for user 'root'@'localhost'"),
        ],
    );

    let first_fs = FakeFileSystem::default();
    let second_fs = FakeFileSystem::default();
    analyze(&bundle, &first_fs).expect("first");
    analyze(&bundle, &second_fs).expect("second");

    let path = Path::new("/out/report_web01_20231114_221320.json");
    assert_eq!(
        first_fs.read_to_string(path).expect("first json"),
        second_fs.read_to_string(path).expect("second json")
    );
}

#[test]
fn path_traversal_fails_before_any_report_is_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("evil.tar.gz");
    write_traversal_bundle(&bundle);

    let fs = FakeFileSystem::default();
    let err = analyze(&bundle, &fs).expect_err("unsafe bundle");
    assert!(matches!(err, TriageError::UnsafeArchivePath(_)));
    assert!(fs.paths().is_empty());
}

#[test]
fn bundle_without_host_directory_is_distinct_from_zero_findings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bundle = dir.path().join("flat.tar.gz");
    write_bundle(&bundle, &[("loose.txt", REFUSED_LINE)]);

    let fs = FakeFileSystem::default();
    let err = analyze(&bundle, &fs).expect_err("no host dir");
    assert!(matches!(err, TriageError::EmptyBundle(_)));
    assert!(fs.paths().is_empty());
}

#[test]
fn cli_run_prints_written_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let _run_log = RunLogGuard;
    let bundle = dir.path().join("bundle.tar.gz");
    write_bundle(&bundle, &[("web01/error.txt", REFUSED_LINE)]);

    let out_dir = dir.path().join("reports");
    let json_path = out_dir.join("report_web01_20231114_221320.json");
    let text_path = out_dir.join("report_web01_20231114_221320.txt");

    let fs = FakeFileSystem::default();
    let terminal = FakeTerminal::default();
    let runtime = fake_runtime(&fs, &terminal);
    let code = run_analyze_with_runtime(
        &args(&[
            "triage-analyze",
            "bundle.tar.gz",
            "--output-dir",
            out_dir.to_str().expect("utf8 path"),
        ]),
        dir.path(),
        &runtime,
    )
    .expect("run");

    assert_eq!(code, 0);
    assert_eq!(
        terminal.written_lines(),
        vec![
            "OK:".to_string(),
            format!("  JSON: {}", json_path.display()),
            format!("  TXT : {}", text_path.display()),
        ]
    );
    let report = Report::from_json(&fs.read_to_string(&json_path).expect("json")).expect("report");
    assert_eq!(report.bundle, "bundle.tar.gz");
    assert!(fs.file(&text_path).is_some());
}

#[test]
fn cli_usage_and_missing_bundle_errors_write_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs = FakeFileSystem::default();
    let runtime = fake_runtime(&fs, &FakeTerminal::default());

    let usage = run_analyze_with_runtime(&args(&["triage-analyze"]), dir.path(), &runtime)
        .expect_err("usage");
    assert!(matches!(usage, TriageError::Usage(_)));
    assert_eq!(usage.exit_code(), 2);

    let missing = run_analyze_with_runtime(
        &args(&["triage-analyze", "nope.tar.gz"]),
        dir.path(),
        &runtime,
    )
    .expect_err("missing");
    assert!(matches!(missing, TriageError::MissingInput(_)));
    assert_eq!(missing.exit_code(), 2);
    assert!(fs.paths().is_empty());
    assert!(!dir.path().join("output").exists());
}

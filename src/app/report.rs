use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, Utc};
use mime_guess::MimeGuess;
use std::collections::HashSet;
use std::fmt::Write;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::app::devices::device_descriptor;
use crate::app::error::AppError;
use crate::app::models::{
    ArtifactKind, ArtifactStatus, Report, ReportHeader, ReportOutput, ReportRow, StoredArtifact,
};
use crate::app::state::Session;
use crate::app::store::report_file_name;

const HTML_PREFIX: &str = "\
<!doctype html>\n\
<html>\n\
<head>\n\
<meta charset=\"utf-8\" />\n\
<title>Android Forensic Report</title>\n\
<style>\n\
body { font-family: Arial, sans-serif; margin: 40px; }\n\
table { border-collapse: collapse; width: 100%; }\n\
th, td { border: 1px solid #ccc; padding: 8px; text-align: left; }\n\
th { background-color: #f2f2f2; color: #007BFF; font-weight: bold; }\n\
.status-found { color: #166534; }\n\
.status-no-data, .status-error { color: #b91c1c; }\n\
.status-not-analyzed { color: #475569; }\n\
footer { margin-top: 50px; font-size: 0.9em; color: gray; text-align: center; }\n\
</style>\n\
</head>\n\
<body>\n\
<h1>Android Forensic Report</h1>\n";

const HTML_SUFFIX: &str = "</body>\n</html>\n";

const LOGO_SIZE_PX: u32 = 100;
const MAX_REPORT_SEQUENCE: u32 = 999;

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Header row only is `NoData`; a file with no lines at all was never
/// filled in and counts as `NotAnalyzed`.
pub fn classify_artifact(path: &Path) -> Result<ArtifactStatus, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read {}: {err}", path.display()))?;
    let lines = content.lines().filter(|line| !line.trim().is_empty()).count();
    Ok(match lines {
        0 => ArtifactStatus::NotAnalyzed,
        1 => ArtifactStatus::NoData,
        _ => ArtifactStatus::Found,
    })
}

/// One row per stored artifact (in the given order), then a `NotAnalyzed`
/// row for every tabular kind that has no file at all.
pub fn build_report(
    device_id: &str,
    device_descriptor: &str,
    header: &ReportHeader,
    artifacts: &[StoredArtifact],
    trace_id: &str,
) -> Report {
    let mut rows = Vec::with_capacity(artifacts.len() + ArtifactKind::TABULAR.len());
    let mut seen: HashSet<ArtifactKind> = HashSet::new();

    for artifact in artifacts {
        seen.insert(artifact.kind);
        let status = match classify_artifact(&artifact.path) {
            Ok(status) => status,
            Err(message) => {
                let err = AppError::artifact_read(message, trace_id);
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "artifact unreadable");
                ArtifactStatus::Error
            }
        };
        rows.push(ReportRow {
            device: device_descriptor.to_string(),
            artifact: Some(artifact.clone()),
            kind: artifact.kind,
            data_type: artifact.kind.label().to_string(),
            status,
        });
    }

    for kind in ArtifactKind::TABULAR {
        if seen.contains(&kind) {
            continue;
        }
        rows.push(ReportRow {
            device: device_descriptor.to_string(),
            artifact: None,
            kind,
            data_type: kind.label().to_string(),
            status: ArtifactStatus::NotAnalyzed,
        });
    }

    Report {
        device_id: device_id.to_string(),
        device_descriptor: device_descriptor.to_string(),
        investigator: header.investigator.clone(),
        organization: header.organization.clone(),
        logo: header
            .logo_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        generated_at: Utc::now(),
        rows,
    }
}

/// Inlines the logo so the report stays a single self-contained file.
pub fn logo_data_url(path: &Path) -> Result<String, String> {
    let mime = MimeGuess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .ok_or_else(|| format!("{} is not a recognized image", path.display()))?;
    let bytes = fs::read(path).map_err(|err| format!("Failed to read logo: {err}"))?;
    if bytes.is_empty() {
        return Err("Logo file is empty".to_string());
    }
    Ok(format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes)))
}

fn status_class(status: ArtifactStatus) -> &'static str {
    match status {
        ArtifactStatus::Found => "status-found",
        ArtifactStatus::NoData => "status-no-data",
        ArtifactStatus::Error => "status-error",
        ArtifactStatus::NotAnalyzed => "status-not-analyzed",
    }
}

pub fn render_report_html(report: &Report) -> String {
    let mut output = String::from(HTML_PREFIX);
    let _ = writeln!(
        output,
        "<p><strong>Date:</strong> {}</p>",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        output,
        "<p><strong>Investigator:</strong> {}</p>",
        escape_html(&report.investigator)
    );
    let _ = writeln!(
        output,
        "<p><strong>Organization:</strong> {}</p>",
        escape_html(&report.organization)
    );
    if let Some(logo) = report.logo.as_deref() {
        let src = match logo_data_url(Path::new(logo)) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "logo not inlined; linking path instead");
                escape_html(logo)
            }
        };
        let _ = writeln!(
            output,
            "<img src=\"{src}\" alt=\"Logo\" width=\"{LOGO_SIZE_PX}\" height=\"{LOGO_SIZE_PX}\">"
        );
    }
    let _ = writeln!(output, "<h2>Device: {}</h2>", escape_html(&report.device_descriptor));
    output.push_str("<table>\n");
    output.push_str(
        "<tr><th>Source (Device)</th><th>Destination (CSV Report)</th><th>Data Type</th><th>Status</th></tr>\n",
    );
    for row in &report.rows {
        let destination = match row.artifact.as_ref() {
            Some(artifact) => {
                let name = escape_html(&artifact.file_name);
                format!("<a href=\"{name}\">{name}</a>")
            }
            None => "&mdash;".to_string(),
        };
        let _ = writeln!(
            output,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
            escape_html(&row.device),
            destination,
            escape_html(&row.data_type),
            status_class(row.status),
            row.status.label()
        );
    }
    output.push_str("</table>\n");
    let _ = writeln!(
        output,
        "<footer><p>Generated by AutoTriage v{}</p></footer>",
        env!("CARGO_PKG_VERSION")
    );
    output.push_str(HTML_SUFFIX);
    output
}

/// Builds the report from everything stored for the session's device and
/// writes it as a new file; existing artifacts are only read.
pub fn generate_report(
    session: &Session,
    header: &ReportHeader,
    trace_id: &str,
) -> Result<ReportOutput, AppError> {
    let store = session.store();
    store.ensure_dir(trace_id)?;

    let descriptor = device_descriptor(session.runner(), session.device_id(), trace_id);
    let artifacts = store.list_for_device(session.device_id(), trace_id);
    let report = build_report(session.device_id(), &descriptor, header, &artifacts, trace_id);
    let html = render_report_html(&report);

    let generated_at = Local::now().naive_local();
    let mut tmp = NamedTempFile::new_in(store.output_dir()).map_err(|err| {
        AppError::storage_write(format!("Failed to create temp file: {err}"), trace_id)
    })?;
    std::io::Write::write_all(&mut tmp, html.as_bytes())
        .map_err(|err| AppError::storage_write(format!("Failed to write report: {err}"), trace_id))?;

    let mut sequence = 0;
    let output_path = loop {
        let candidate = store
            .output_dir()
            .join(report_file_name(session.device_id(), generated_at, sequence));
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => break candidate,
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists && sequence < MAX_REPORT_SEQUENCE => {
                tmp = err.file;
                sequence += 1;
            }
            Err(err) => {
                return Err(AppError::storage_write(
                    format!("Failed to write report {}: {}", candidate.display(), err.error),
                    trace_id,
                ));
            }
        }
    };

    info!(
        trace_id = %trace_id,
        serial = %session.device_id(),
        rows = report.rows.len(),
        path = %output_path.display(),
        "report generated"
    );
    Ok(ReportOutput {
        report,
        output_path: output_path.to_string_lossy().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::scripted::ScriptedRunner;
    use crate::app::adb::runner::CommandRunner;
    use crate::app::models::{ArtifactRecord, ArtifactSet};
    use crate::app::store::ArtifactStore;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn header() -> ReportHeader {
        ReportHeader {
            investigator: "Ana <script>alert(1)</script>".to_string(),
            organization: "Lab & Co".to_string(),
            logo_path: None,
        }
    }

    fn stored(dir: &Path, file_name: &str, kind: ArtifactKind) -> StoredArtifact {
        StoredArtifact {
            path: dir.join(file_name),
            file_name: file_name.to_string(),
            kind,
            device_id: "ABC".to_string(),
            captured_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|date| date.and_hms_opt(10, 0, 0))
                .expect("valid time"),
        }
    }

    #[test]
    fn classifies_by_line_count() {
        let dir = TempDir::new().expect("tmp");
        let found = dir.path().join("found.csv");
        let header_only = dir.path().join("header.csv");
        let empty = dir.path().join("empty.csv");
        fs::write(&found, "Package Name\ncom.a\n").expect("write");
        fs::write(&header_only, "Package Name\n\n  \n").expect("write");
        fs::write(&empty, "").expect("write");

        assert_eq!(classify_artifact(&found), Ok(ArtifactStatus::Found));
        assert_eq!(classify_artifact(&header_only), Ok(ArtifactStatus::NoData));
        assert_eq!(classify_artifact(&empty), Ok(ArtifactStatus::NotAnalyzed));
        assert!(classify_artifact(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn unreadable_rows_are_errors_and_missing_kinds_not_analyzed() {
        let dir = TempDir::new().expect("tmp");
        fs::write(dir.path().join("installed_apps_ABC_20240501_100000.csv"), "Package Name\ncom.a\n")
            .expect("write");
        fs::write(dir.path().join("current_user_ABC_20240501_100000.csv"), "Current User ID\n")
            .expect("write");
        fs::write(dir.path().join("user_profiles_ABC_20240501_100000.csv"), [0xffu8, 0xfe, 0x00])
            .expect("write");
        let artifacts = vec![
            stored(dir.path(), "current_user_ABC_20240501_100000.csv", ArtifactKind::CurrentUser),
            stored(dir.path(), "installed_apps_ABC_20240501_100000.csv", ArtifactKind::Packages),
            stored(dir.path(), "user_profiles_ABC_20240501_100000.csv", ArtifactKind::UserProfiles),
        ];

        let report = build_report("ABC", "ABC device", &header(), &artifacts, "t");
        let statuses: Vec<(ArtifactKind, ArtifactStatus)> =
            report.rows.iter().map(|row| (row.kind, row.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (ArtifactKind::CurrentUser, ArtifactStatus::NoData),
                (ArtifactKind::Packages, ArtifactStatus::Found),
                (ArtifactKind::UserProfiles, ArtifactStatus::Error),
                (ArtifactKind::UninstalledPackages, ArtifactStatus::NotAnalyzed),
                (ArtifactKind::ForegroundApp, ArtifactStatus::NotAnalyzed),
                (ArtifactKind::ResumedActivities, ArtifactStatus::NotAnalyzed),
            ]
        );
        assert!(report.rows.iter().all(|row| row.device == "ABC device"));
    }

    #[test]
    fn html_escapes_operator_text() {
        let report = build_report("ABC", "ABC <dev>", &header(), &[], "t");
        let html = render_report_html(&report);
        assert!(html.contains("Ana &lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("Lab &amp; Co"));
        assert!(html.contains("<h2>Device: ABC &lt;dev&gt;</h2>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Not Analyzed"));
    }

    #[test]
    fn logo_is_inlined_when_readable() {
        let dir = TempDir::new().expect("tmp");
        let logo = dir.path().join("logo.png");
        fs::write(&logo, b"\x89PNG\r\n\x1a\nfake").expect("write");
        let url = logo_data_url(&logo).expect("data url");
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(logo_data_url(&dir.path().join("notes.txt")).is_err());

        let mut with_missing_logo = header();
        with_missing_logo.logo_path = Some("/missing/\"logo\".png".to_string());
        let html = render_report_html(&build_report("ABC", "d", &with_missing_logo, &[], "t"));
        assert!(html.contains("src=\"/missing/&quot;logo&quot;.png\""));
    }

    #[test]
    fn regenerating_yields_identical_rows_in_separate_files() {
        let dir = TempDir::new().expect("tmp");
        let runner: Arc<dyn CommandRunner> = Arc::new(
            ScriptedRunner::new().with("devices -l", "List of devices attached\nABC device product:foo"),
        );
        let store = ArtifactStore::new(dir.path());
        let session = Session::new(runner, store.clone(), "ABC", "t").expect("session");
        store
            .save(
                &ArtifactSet {
                    kind: ArtifactKind::Packages,
                    device_id: "ABC".to_string(),
                    captured_at: Local::now().naive_local(),
                    records: vec![ArtifactRecord::single("com.a")],
                    condition: None,
                },
                "t",
            )
            .expect("save");

        let first = generate_report(&session, &header(), "t").expect("first report");
        let second = generate_report(&session, &header(), "t").expect("second report");
        assert_eq!(first.report.rows, second.report.rows);
        assert_eq!(first.report.device_descriptor, "ABC device product:foo");
        assert_eq!(first.report.rows[0].status, ArtifactStatus::Found);
        assert_ne!(first.output_path, second.output_path);
        assert!(Path::new(&first.output_path).is_file());
        assert!(Path::new(&second.output_path).is_file());

        let reports = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("forensic_report_ABC_"))
            .count();
        assert_eq!(reports, 2);
        // Reports are not artifacts and never show up as rows.
        assert_eq!(store.list_for_device("ABC", "t").len(), 1);
    }

    #[test]
    fn same_second_reports_get_a_sequence_suffix() {
        let dir = TempDir::new().expect("tmp");
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::new());
        let store = ArtifactStore::new(dir.path());
        let session = Session::new(runner, store, "ABC", "t").expect("session");

        let now = Local::now().naive_local();
        let taken = [
            report_file_name("ABC", now, 0),
            report_file_name("ABC", now + chrono::Duration::seconds(1), 0),
            report_file_name("ABC", now, 1),
        ];
        for name in &taken {
            fs::write(dir.path().join(name), "older report").expect("write");
        }

        let output = generate_report(&session, &ReportHeader::default(), "t").expect("report");
        assert!(!taken.iter().any(|name| output.output_path.ends_with(name.as_str())));
        for name in &taken {
            assert_eq!(
                fs::read_to_string(dir.path().join(name)).expect("read"),
                "older report"
            );
        }
    }
}

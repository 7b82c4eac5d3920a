use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::adb::parse::{
    lines_containing, parse_package_names, raw_lines, uninstalled_only, FOREGROUND_MARKER,
    RESUMED_MARKER,
};
use crate::app::adb::runner::CommandRunner;
use crate::app::error::AppError;
use crate::app::models::{
    ArtifactKind, ArtifactRecord, ArtifactSet, CommandResult, LogcatCapture, StoredArtifact,
};
use crate::app::state::Session;

fn shell(args: &[&str]) -> Vec<String> {
    std::iter::once("shell")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Runs the read-only diagnostic queries against the session's device. A
/// failed command yields an empty set carrying the error, never an `Err`.
pub struct ArtifactCollector<'a> {
    runner: &'a dyn CommandRunner,
    device_id: &'a str,
}

impl<'a> ArtifactCollector<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            runner: session.runner(),
            device_id: session.device_id(),
        }
    }

    pub fn collect(&self, kind: ArtifactKind, trace_id: &str) -> ArtifactSet {
        match kind {
            ArtifactKind::Packages => self.packages(trace_id),
            ArtifactKind::UninstalledPackages => self.uninstalled_packages(trace_id),
            ArtifactKind::ForegroundApp => self.foreground_app(trace_id),
            ArtifactKind::ResumedActivities => self.resumed_activities(trace_id),
            ArtifactKind::CurrentUser => self.current_user(trace_id),
            ArtifactKind::UserProfiles => self.user_profiles(trace_id),
            ArtifactKind::Logcat => self.finish(
                kind,
                now(),
                Err(AppError::validation("logcat is captured as text, not records", trace_id)),
                trace_id,
            ),
        }
    }

    pub fn packages(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["pm", "list", "packages"]), trace_id)
            .map(|stdout| parse_package_names(&stdout));
        self.finish(ArtifactKind::Packages, captured_at, values, trace_id)
    }

    pub fn uninstalled_packages(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["pm", "list", "packages", "-u"]), trace_id)
            .and_then(|all| {
                let installed = self.run(&shell(&["pm", "list", "packages"]), trace_id)?;
                Ok(uninstalled_only(
                    &parse_package_names(&all),
                    &parse_package_names(&installed),
                ))
            });
        self.finish(ArtifactKind::UninstalledPackages, captured_at, values, trace_id)
    }

    pub fn foreground_app(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["dumpsys", "window"]), trace_id)
            .map(|stdout| lines_containing(&stdout, FOREGROUND_MARKER));
        self.finish(ArtifactKind::ForegroundApp, captured_at, values, trace_id)
    }

    pub fn resumed_activities(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["dumpsys", "activity", "activities"]), trace_id)
            .map(|stdout| lines_containing(&stdout, RESUMED_MARKER));
        self.finish(ArtifactKind::ResumedActivities, captured_at, values, trace_id)
    }

    pub fn current_user(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["am", "get-current-user"]), trace_id)
            .map(|stdout| {
                let trimmed = stdout.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed.to_string()]
                }
            });
        self.finish(ArtifactKind::CurrentUser, captured_at, values, trace_id)
    }

    pub fn user_profiles(&self, trace_id: &str) -> ArtifactSet {
        let captured_at = now();
        let values = self
            .run(&shell(&["pm", "list", "users"]), trace_id)
            .map(|stdout| raw_lines(&stdout));
        self.finish(ArtifactKind::UserProfiles, captured_at, values, trace_id)
    }

    pub fn logcat(&self, trace_id: &str) -> LogcatCapture {
        let captured_at = now();
        let (text, condition) = match self.run(&["logcat".to_string(), "-d".to_string()], trace_id) {
            Ok(text) => (text, None),
            Err(err) => (String::new(), Some(err)),
        };
        info!(
            trace_id = %trace_id,
            serial = %self.device_id,
            bytes = text.len(),
            failed = condition.is_some(),
            "logcat captured"
        );
        LogcatCapture {
            device_id: self.device_id.to_string(),
            captured_at,
            text,
            condition,
        }
    }

    fn run(&self, args: &[String], trace_id: &str) -> Result<String, AppError> {
        let result: CommandResult = self.runner.execute(Some(self.device_id), args, trace_id);
        if result.success {
            return Ok(result.stdout);
        }
        Err(result
            .error
            .unwrap_or_else(|| AppError::command_failed(format!("adb {} failed", args.join(" ")), trace_id)))
    }

    fn finish(
        &self,
        kind: ArtifactKind,
        captured_at: NaiveDateTime,
        values: Result<Vec<String>, AppError>,
        trace_id: &str,
    ) -> ArtifactSet {
        let (records, condition) = match values {
            Ok(values) => (values.into_iter().map(ArtifactRecord::single).collect::<Vec<_>>(), None),
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    serial = %self.device_id,
                    kind = %kind,
                    code = %err.code,
                    error = %err.error,
                    "collection degraded to empty set"
                );
                (Vec::new(), Some(err))
            }
        };
        info!(
            trace_id = %trace_id,
            serial = %self.device_id,
            kind = %kind,
            records = records.len(),
            "artifact collected"
        );
        ArtifactSet {
            kind,
            device_id: self.device_id.to_string(),
            captured_at,
            records,
            condition,
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionOutcome {
    pub set: ArtifactSet,
    pub stored: StoredArtifact,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogcatOutcome {
    pub capture: LogcatCapture,
    pub stored: StoredArtifact,
}

/// Query plus persistence. Only a storage failure is an `Err`; a failed
/// query is still written (header only) so the report can show "No Data".
pub fn collect_and_store(
    session: &Session,
    kind: ArtifactKind,
    trace_id: &str,
) -> Result<CollectionOutcome, AppError> {
    if !kind.is_tabular() {
        return Err(AppError::validation(format!("{kind} is not a tabular artifact"), trace_id));
    }
    let set = ArtifactCollector::new(session).collect(kind, trace_id);
    let stored = session.store().save(&set, trace_id)?;
    Ok(CollectionOutcome { set, stored })
}

pub fn capture_and_store_logcat(session: &Session, trace_id: &str) -> Result<LogcatOutcome, AppError> {
    let capture = ArtifactCollector::new(session).logcat(trace_id);
    let stored = session.store().save_logcat(&capture, trace_id)?;
    Ok(LogcatOutcome { capture, stored })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::scripted::ScriptedRunner;
    use crate::app::error::ErrorKind;
    use crate::app::store::ArtifactStore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn session(runner: ScriptedRunner, dir: &std::path::Path) -> (Arc<ScriptedRunner>, Session) {
        let runner = Arc::new(runner);
        let shared: Arc<dyn CommandRunner> = runner.clone();
        let session = Session::new(shared, ArtifactStore::new(dir), "ABC123", "t").expect("session");
        (runner, session)
    }

    #[test]
    fn installed_packages_are_normalized() {
        let dir = TempDir::new().expect("tmp");
        let (runner, session) = session(
            ScriptedRunner::new().with("shell pm list packages", "package:com.a\npackage:com.b"),
            dir.path(),
        );
        let set = ArtifactCollector::new(&session).packages("t");
        assert_eq!(set.values(), vec!["com.a", "com.b"]);
        assert_eq!(set.kind, ArtifactKind::Packages);
        assert!(set.condition.is_none());
        let calls = runner.calls.lock().expect("calls");
        assert_eq!(calls[0].0.as_deref(), Some("ABC123"));
    }

    #[test]
    fn uninstalled_packages_are_the_sorted_difference() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new()
                .with("shell pm list packages -u", "package:com.c\npackage:com.a\npackage:com.b")
                .with("shell pm list packages", "package:com.a"),
            dir.path(),
        );
        let collector = ArtifactCollector::new(&session);
        let first = collector.uninstalled_packages("t");
        let second = collector.uninstalled_packages("t");
        assert_eq!(first.values(), vec!["com.b", "com.c"]);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn uninstalled_is_empty_when_installed_query_fails() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new()
                .with("shell pm list packages -u", "package:com.a")
                .failing("shell pm list packages", "device offline"),
            dir.path(),
        );
        let set = ArtifactCollector::new(&session).uninstalled_packages("t");
        assert!(set.records.is_empty());
        assert!(set.condition.expect("condition").is(ErrorKind::CommandFailed));
    }

    #[test]
    fn marker_filters_apply() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new()
                .with("shell dumpsys window", "x\n  mCurrentFocus=Window{a}\ny")
                .with(
                    "shell dumpsys activity activities",
                    "  mResumedActivity: ActivityRecord{1}\nnoise\n  topResumedActivity=ActivityRecord{1}",
                ),
            dir.path(),
        );
        let collector = ArtifactCollector::new(&session);
        assert_eq!(collector.foreground_app("t").values(), vec!["mCurrentFocus=Window{a}"]);
        assert_eq!(collector.resumed_activities("t").records.len(), 2);
    }

    #[test]
    fn current_user_is_one_record_and_profiles_are_lines() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new()
                .with("shell am get-current-user", "0\n")
                .with("shell pm list users", "Users:\n\tUserInfo{0:Owner:c13} running\n\tUserInfo{10:Work:1030} running"),
            dir.path(),
        );
        let collector = ArtifactCollector::new(&session);
        assert_eq!(collector.current_user("t").values(), vec!["0"]);
        assert_eq!(collector.user_profiles("t").records.len(), 3);
    }

    #[test]
    fn user_profiles_keep_blank_and_indented_lines() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new().with("shell pm list users", "Users:\n\n\tUserInfo{0:Owner:c13} running \n\tUserInfo{10:Work:1030}"),
            dir.path(),
        );
        let profiles = ArtifactCollector::new(&session).user_profiles("t");
        assert_eq!(
            profiles.values(),
            vec!["Users:", "", "\tUserInfo{0:Owner:c13} running ", "\tUserInfo{10:Work:1030}"]
        );
    }

    #[test]
    fn missing_tool_yields_empty_sets_with_condition() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(ScriptedRunner::missing_tool(), dir.path());
        let collector = ArtifactCollector::new(&session);
        for kind in ArtifactKind::TABULAR {
            let set = collector.collect(kind, "t");
            assert!(set.records.is_empty(), "{kind} should be empty");
            assert!(set.condition.expect("condition").is(ErrorKind::ToolNotFound));
        }
        let capture = collector.logcat("t");
        assert!(capture.text.is_empty());
        assert!(capture.condition.expect("condition").is(ErrorKind::ToolNotFound));
    }

    #[test]
    fn failed_query_still_persists_header_only_file() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(ScriptedRunner::missing_tool(), dir.path());
        let outcome = collect_and_store(&session, ArtifactKind::UserProfiles, "t").expect("stored");
        assert_eq!(fs::read_to_string(&outcome.stored.path).expect("read"), "User Info\n");
        assert_eq!(outcome.stored.kind, ArtifactKind::UserProfiles);
        assert_eq!(outcome.stored.device_id, "ABC123");
    }

    #[test]
    fn logcat_is_stored_as_text() {
        let dir = TempDir::new().expect("tmp");
        let (_runner, session) = session(
            ScriptedRunner::new().with("logcat -d", "line one\nline two"),
            dir.path(),
        );
        let outcome = capture_and_store_logcat(&session, "t").expect("stored");
        assert!(outcome.stored.file_name.starts_with("logcat_ABC123_"));
        assert!(outcome.stored.file_name.ends_with(".txt"));
        assert_eq!(fs::read_to_string(&outcome.stored.path).expect("read"), "line one\nline two");
        assert!(collect_and_store(&session, ArtifactKind::Logcat, "t").is_err());
    }
}

use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::sync::Arc;

use autotriage_lib::app::adb::runner::{AdbRunner, CommandRunner};
use autotriage_lib::app::collector::{
    capture_and_store_logcat, collect_and_store, CollectionOutcome, LogcatOutcome,
};
use autotriage_lib::app::config::{
    config_path, load_config, save_config, AppConfig, LoggingSettings,
};
use autotriage_lib::app::devices::{require_devices, DeviceRegistry};
use autotriage_lib::app::error::{AppError, ErrorKind};
use autotriage_lib::app::logging::init_logging;
use autotriage_lib::app::models::{ArtifactKind, CommandResponse, ReportHeader, ReportOutput};
use autotriage_lib::app::report::generate_report;
use autotriage_lib::app::state::Session;
use autotriage_lib::app::store::ArtifactStore;
use autotriage_lib::app::worker::{resolve_trace_id, spawn_task, TaskEvent};
use serde::Serialize;
use tracing::info;

const USAGE: &str = "Usage: autotriage [--serial ID] [--device N] [--out DIR] [--investigator NAME] [--organization NAME] [--logo PATH] [--json] [--remember] <features|devices|collect <kind|all>|logcat|report|config>\n";

const FEATURES: [(&str, &str); 9] = [
    ("devices", "List connected devices"),
    ("collect packages", "Export installed packages"),
    ("collect uninstalled", "Export uninstalled packages"),
    ("collect foreground", "Export the focused window"),
    ("collect resumed", "Export resumed activities"),
    ("collect current_user", "Export the current user id"),
    ("collect users", "Export user profiles"),
    ("logcat", "Dump the device log buffer"),
    ("report", "Generate the HTML forensic report"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum CollectTarget {
    One(ArtifactKind),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Features,
    Devices,
    Collect(CollectTarget),
    Logcat,
    Report,
    Config,
}

#[derive(Debug, Clone)]
struct Args {
    command: Command,
    serial: Option<String>,
    device_index: usize,
    out_dir: Option<PathBuf>,
    investigator: Option<String>,
    organization: Option<String>,
    logo: Option<String>,
    json: bool,
    remember: bool,
}

#[derive(Debug)]
enum TaskOutput {
    Collected(CollectionOutcome),
    Logcat(LogcatOutcome),
    Report(ReportOutput),
}

#[derive(Serialize)]
struct FeatureEntry {
    command: &'static str,
    description: &'static str,
}

fn required_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut device_index = 0usize;
    let mut out_dir: Option<PathBuf> = None;
    let mut investigator: Option<String> = None;
    let mut organization: Option<String> = None;
    let mut logo: Option<String> = None;
    let mut json = false;
    let mut remember = false;
    let mut positional: Vec<String> = Vec::new();

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => serial = Some(required_value(&mut it, "--serial")?),
            "--device" => {
                let value = required_value(&mut it, "--device")?;
                device_index = value
                    .parse()
                    .map_err(|_| format!("--device expects an index, got {value}"))?;
            }
            "--out" => out_dir = Some(PathBuf::from(required_value(&mut it, "--out")?)),
            "--investigator" => investigator = Some(required_value(&mut it, "--investigator")?),
            "--organization" => organization = Some(required_value(&mut it, "--organization")?),
            "--logo" => logo = Some(required_value(&mut it, "--logo")?),
            "--json" => json = true,
            "--remember" => remember = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("Unknown arg: {other}")),
            _ => positional.push(arg),
        }
    }

    let command = match positional.first().map(String::as_str) {
        Some("features") => Command::Features,
        Some("devices") => Command::Devices,
        Some("logcat") => Command::Logcat,
        Some("report") => Command::Report,
        Some("config") => Command::Config,
        Some("collect") => {
            let target = positional
                .get(1)
                .ok_or_else(|| "collect requires a kind or `all`".to_string())?;
            if target == "all" {
                Command::Collect(CollectTarget::All)
            } else {
                let kind = ArtifactKind::from_name(target)
                    .ok_or_else(|| format!("Unknown artifact kind: {target}"))?;
                if kind == ArtifactKind::Logcat {
                    Command::Logcat
                } else {
                    Command::Collect(CollectTarget::One(kind))
                }
            }
        }
        Some(other) => return Err(format!("Unknown command: {other}\n{USAGE}")),
        None => return Err(USAGE.to_string()),
    };

    Ok(Args {
        command,
        serial,
        device_index,
        out_dir,
        investigator,
        organization,
        logo,
        json,
        remember,
    })
}

fn exit_code(err: &AppError) -> i32 {
    if err.is(ErrorKind::NoDevicesFound) {
        3
    } else {
        1
    }
}

fn fail(err: &AppError, json: bool) -> ! {
    if json {
        println!("{}", serde_json::to_string_pretty(err).unwrap_or_default());
    } else {
        eprintln!("error: {err} [trace {}]", err.trace_id);
    }
    process::exit(exit_code(err));
}

fn print_json<T: Serialize>(trace_id: &str, data: T) {
    let response = CommandResponse {
        trace_id: trace_id.to_string(),
        data,
    };
    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
}

/// Command-line values override the stored config; `--remember` writes them back.
fn apply_overrides(config: &mut AppConfig, args: &Args, trace_id: &str) -> Result<(), AppError> {
    if let Some(dir) = &args.out_dir {
        config.output_path = dir.to_string_lossy().to_string();
    }
    if let Some(value) = &args.investigator {
        config.report.investigator = value.clone();
    }
    if let Some(value) = &args.organization {
        config.report.organization = value.clone();
    }
    if let Some(value) = &args.logo {
        config.report.logo_path = value.clone();
    }
    if args.remember {
        save_config(config, trace_id)?;
        info!(trace_id = %trace_id, path = %config_path().display(), "config saved");
    }
    Ok(())
}

fn report_header(config: &AppConfig) -> ReportHeader {
    let logo = config.report.logo_path.trim();
    ReportHeader {
        investigator: config.report.investigator.clone(),
        organization: config.report.organization.clone(),
        logo_path: (!logo.is_empty()).then(|| logo.to_string()),
    }
}

/// Runs `adb devices` on a worker and waits for its event.
fn enumerate_devices(
    runner: &Arc<dyn CommandRunner>,
    trace_id: &str,
) -> Result<DeviceRegistry, AppError> {
    let (sender, receiver) = mpsc::channel::<TaskEvent<DeviceRegistry>>();
    let runner = Arc::clone(runner);
    spawn_task("devices", sender, move |task_trace| {
        let mut registry = DeviceRegistry::new();
        registry.list_devices(runner.as_ref(), task_trace)?;
        Ok(registry)
    });
    match receiver.recv() {
        Ok(event) => event.outcome,
        Err(_) => Err(AppError::system(
            "Device enumeration stopped without a result",
            trace_id,
        )),
    }
}

fn resolve_device(
    runner: &Arc<dyn CommandRunner>,
    args: &Args,
    trace_id: &str,
) -> Result<String, AppError> {
    if let Some(serial) = &args.serial {
        return Ok(serial.clone());
    }
    let mut registry = enumerate_devices(runner, trace_id)?;
    require_devices(registry.devices(), trace_id)?;
    let connected = registry.devices().len();
    registry
        .select_device(args.device_index)
        .map(|device| device.id.clone())
        .ok_or_else(|| {
            AppError::validation(
                format!(
                    "Device index {} out of range ({connected} connected)",
                    args.device_index
                ),
                trace_id,
            )
        })
}

fn print_event(event: &TaskEvent<TaskOutput>, json: bool) {
    let output = match &event.outcome {
        Ok(output) => output,
        Err(err) => {
            if json {
                print_json(&event.trace_id, err);
            } else {
                eprintln!("{}: {err}", event.label);
            }
            return;
        }
    };
    match output {
        TaskOutput::Collected(outcome) => {
            if json {
                print_json(&event.trace_id, outcome);
                return;
            }
            println!(
                "{}: {} record(s) -> {}",
                outcome.set.kind.label(),
                outcome.set.records.len(),
                outcome.stored.path.display()
            );
            if let Some(condition) = &outcome.set.condition {
                eprintln!("  warning: {condition}");
            }
        }
        TaskOutput::Logcat(outcome) => {
            if json {
                print_json(&event.trace_id, outcome);
                return;
            }
            println!(
                "Logcat: {} line(s) -> {}",
                outcome.capture.text.lines().count(),
                outcome.stored.path.display()
            );
            if let Some(condition) = &outcome.capture.condition {
                eprintln!("  warning: {condition}");
            }
        }
        TaskOutput::Report(output) => {
            if json {
                print_json(&event.trace_id, output);
                return;
            }
            println!("Device: {}", output.report.device_descriptor);
            for row in &output.report.rows {
                println!("  {:<28} {}", row.data_type, row.status.label());
            }
            println!("Report written to {}", output.output_path);
        }
    }
}

fn run_tasks(session: &Session, command: &Command, json: bool, header: ReportHeader) -> bool {
    let (sender, receiver) = mpsc::channel::<TaskEvent<TaskOutput>>();
    let spawn_collect = |kind: ArtifactKind| {
        let session = session.clone();
        spawn_task(kind.label(), sender.clone(), move |trace_id| {
            collect_and_store(&session, kind, trace_id).map(TaskOutput::Collected)
        });
    };

    match command {
        Command::Collect(CollectTarget::One(kind)) => spawn_collect(*kind),
        Command::Collect(CollectTarget::All) => {
            for kind in ArtifactKind::TABULAR {
                spawn_collect(kind);
            }
            let session = session.clone();
            spawn_task(ArtifactKind::Logcat.label(), sender.clone(), move |trace_id| {
                capture_and_store_logcat(&session, trace_id).map(TaskOutput::Logcat)
            });
        }
        Command::Logcat => {
            let session = session.clone();
            spawn_task(ArtifactKind::Logcat.label(), sender.clone(), move |trace_id| {
                capture_and_store_logcat(&session, trace_id).map(TaskOutput::Logcat)
            });
        }
        Command::Report => {
            let session = session.clone();
            spawn_task("report", sender.clone(), move |trace_id| {
                generate_report(&session, &header, trace_id).map(TaskOutput::Report)
            });
        }
        _ => {}
    }
    drop(sender);

    let mut all_ok = true;
    for event in receiver {
        all_ok &= event.outcome.is_ok();
        print_event(&event, json);
    }
    all_ok
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(2);
        }
    };

    let trace_id = resolve_trace_id(None);
    let mut config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            init_logging(&LoggingSettings::default());
            fail(&err, args.json);
        }
    };
    init_logging(&config.logging);
    if let Err(err) = apply_overrides(&mut config, &args, &trace_id) {
        fail(&err, args.json);
    }

    match &args.command {
        Command::Features => {
            if args.json {
                let entries: Vec<FeatureEntry> = FEATURES
                    .iter()
                    .map(|&(command, description)| FeatureEntry {
                        command,
                        description,
                    })
                    .collect();
                print_json(&trace_id, entries);
            } else {
                for (command, description) in FEATURES {
                    println!("{command:<24} {description}");
                }
            }
            return;
        }
        Command::Config => {
            if args.json {
                print_json(&trace_id, &config);
            } else {
                println!("# {}", config_path().display());
                println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
            }
            return;
        }
        _ => {}
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(AdbRunner::from_config(&config));

    if args.command == Command::Devices {
        let registry = match enumerate_devices(&runner, &trace_id) {
            Ok(registry) => registry,
            Err(err) => fail(&err, args.json),
        };
        let devices = registry.devices();
        if let Err(err) = require_devices(devices, &trace_id) {
            if args.json {
                print_json(&trace_id, devices);
            } else {
                println!("{}", err.error);
            }
            process::exit(exit_code(&err));
        }
        if args.json {
            print_json(&trace_id, devices);
        } else {
            for (index, device) in devices.iter().enumerate() {
                println!("[{index}] {}", device.label);
            }
        }
        return;
    }

    let device_id = match resolve_device(&runner, &args, &trace_id) {
        Ok(id) => id,
        Err(err) => fail(&err, args.json),
    };
    let store = ArtifactStore::new(config.resolved_output_dir());
    let session = match Session::new(runner, store, device_id, &trace_id) {
        Ok(session) => session,
        Err(err) => fail(&err, args.json),
    };
    info!(trace_id = %trace_id, serial = %session.device_id(), "device selected");

    if !run_tasks(&session, &args.command, args.json, report_header(&config)) {
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotriage_lib::app::models::CommandResult;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    fn parse(values: &[&str]) -> Result<Args, String> {
        parse_args(values.iter().map(|value| value.to_string()))
    }

    #[test]
    fn parses_collect_targets() {
        let args = parse(&["collect", "all"]).expect("all");
        assert_eq!(args.command, Command::Collect(CollectTarget::All));

        let args = parse(&["--device", "1", "collect", "packages"]).expect("packages");
        assert_eq!(args.command, Command::Collect(CollectTarget::One(ArtifactKind::Packages)));
        assert_eq!(args.device_index, 1);

        let args = parse(&["collect", "logcat"]).expect("logcat");
        assert_eq!(args.command, Command::Logcat);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["collect"]).is_err());
        assert!(parse(&["collect", "contacts"]).is_err());
        assert!(parse(&["--device", "x", "report"]).is_err());
        assert!(parse(&["--frobnicate", "report"]).is_err());
        assert!(parse(&["--out"]).is_err());
    }

    #[test]
    fn header_fields_and_flags() {
        let args = parse(&[
            "--investigator",
            "J. Doe",
            "--logo",
            "logo.png",
            "--json",
            "--remember",
            "report",
        ])
        .expect("report");
        assert_eq!(args.command, Command::Report);
        assert_eq!(args.investigator.as_deref(), Some("J. Doe"));
        assert!(args.json && args.remember);

        let mut config = AppConfig::default();
        config.report.logo_path = "  ".to_string();
        assert_eq!(report_header(&config).logo_path, None);
    }

    struct ListingRunner {
        listing: &'static str,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl ListingRunner {
        fn shared(listing: &'static str) -> (Arc<ListingRunner>, Arc<dyn CommandRunner>) {
            let runner = Arc::new(ListingRunner {
                listing,
                threads: Mutex::new(Vec::new()),
            });
            let shared: Arc<dyn CommandRunner> = runner.clone();
            (runner, shared)
        }
    }

    impl CommandRunner for ListingRunner {
        fn execute(&self, device_id: Option<&str>, _args: &[String], _trace_id: &str) -> CommandResult {
            if let Ok(mut threads) = self.threads.lock() {
                threads.push(thread::current().id());
            }
            CommandResult::ok(device_id, self.listing)
        }
    }

    #[test]
    fn enumeration_runs_off_the_foreground_thread() {
        let (runner, shared) =
            ListingRunner::shared("List of devices attached\nABC device product:foo\nOFF offline");
        let registry = enumerate_devices(&shared, "t").expect("devices");
        assert_eq!(registry.devices().len(), 1);
        assert_eq!(registry.devices()[0].id, "ABC");

        let threads = runner.threads.lock().expect("lock");
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
    }

    #[test]
    fn resolves_devices_by_serial_or_index() {
        let (_runner, shared) =
            ListingRunner::shared("List of devices attached\nABC device\nDEF device");
        let mut args = parse(&["--device", "1", "report"]).expect("args");
        args.serial = None;
        assert_eq!(resolve_device(&shared, &args, "t").expect("index"), "DEF");

        args.device_index = 5;
        let err = resolve_device(&shared, &args, "t").expect_err("out of range");
        assert!(err.is(ErrorKind::Validation));

        args.serial = Some("XYZ".to_string());
        assert_eq!(resolve_device(&shared, &args, "t").expect("serial"), "XYZ");

        let (_runner, empty) = ListingRunner::shared("List of devices attached\n");
        args.serial = None;
        let err = resolve_device(&empty, &args, "t").expect_err("no devices");
        assert_eq!(exit_code(&err), 3);
    }

    #[test]
    fn no_devices_has_its_own_exit_code() {
        assert_eq!(exit_code(&AppError::no_devices("none", "t")), 3);
        assert_eq!(exit_code(&AppError::tool_not_found("adb", "t")), 1);
    }
}

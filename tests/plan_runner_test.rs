//! Plan files run against the emulator.

use rig_daq::mock::{MockDevice, MockRecorder};
use rig_daq::protocol::{Command, DeviceLink};
use rig_daq::recording::{RecordControl, SessionState};
use rig_daq::{Plan, Rig, RigConfig, RigError};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn repo_file(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

fn table_rows(path: &Path) -> Vec<csv::StringRecord> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .unwrap()
        .records()
        .map(Result::unwrap)
        .collect()
}

#[test]
fn test_shipped_config_and_plan_parse() {
    let config = RigConfig::load_from(repo_file("config/rig.toml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.valve_for_gas("hypoxia").unwrap(), 3);
    assert_eq!(config.valve_for_odor("blank").unwrap(), 1);

    let plan = Plan::load(repo_file("plans/example.toml")).unwrap();
    assert_eq!(plan.name.as_deref(), Some("hypoxia with tagging"));
    assert_eq!(plan.steps.len(), 9);
    assert_eq!(plan.steps[0].action.name(), "preroll");
    assert_eq!(plan.steps[3].repeat.map(|r| r.n), Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_example_plan_on_emulator() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RigConfig::load_from(repo_file("config/rig.toml")).unwrap();
    config.recording.data_dir = dir.path().to_path_buf();
    let recorder = MockRecorder::new("m3", dir.path());
    let (link, device) = MockDevice::spawn(Duration::from_secs(1));
    let mut rig = Rig::new(config, link, RecordControl::Remote(Box::new(recorder.clone())));

    let plan = Plan::load(repo_file("plans/example.toml")).unwrap();
    let report = plan.run(&mut rig).await.unwrap();

    assert_eq!(report.completed, 9);
    assert_eq!(report.cancelled, 0);
    assert!(report.faults.is_empty());
    assert_eq!(rig.session().state(), SessionState::Idle);
    assert_eq!(recorder.triggers(), vec![(1, 1), (-1, 0)]);

    let log_path = report.log_path.unwrap();
    assert_eq!(
        log_path,
        dir.path()
            .join("m3")
            .join("m3_g0")
            .join("_cibbrig_log.table.m3.g0.t0.tsv")
    );
    let rows = table_rows(&log_path);
    let labels: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(labels.first(), Some(&"rec_start"));
    assert_eq!(labels.last(), Some(&"rec_stop"));
    assert_eq!(labels.iter().filter(|l| **l == "present_odor").count(), 5);
    assert!(labels.contains(&"hering_breuer"));
    assert!(labels.contains(&"opto_phasic"));
    assert!(labels.contains(&"opto_tagging"));

    let annotation = rows.iter().find(|r| &r[0] == "tagging block").unwrap();
    assert!(annotation.iter().any(|field| field == "unit 3"));

    // Stop switched back to the reset gas
    let commands = device.commands();
    assert_eq!(commands.last(), Some(&Command::OpenValve { valve: 0 }));
    let pulses = commands
        .iter()
        .filter(|c| matches!(c, Command::Pulse { .. }))
        .count();
    assert_eq!(pulses, 75);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_cuts_repetitions_short() {
    let plan = Plan::from_toml_str(
        r#"
[[steps]]
action = "run_pulse"
duration = 0.01
amplitude = 0.5
repeat = { n = 10, interval = 60 }

[[steps]]
action = "annotate"
label = "after"
"#,
    )
    .unwrap();
    let mut rig = Rig::new(
        RigConfig::default(),
        DeviceLink::disconnected(),
        RecordControl::Ttl,
    );

    let cancel = rig.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        cancel.cancel();
    });
    let report = plan.run(&mut rig).await.unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.cancelled, 1);
    let labels: Vec<&str> = rig.log().records().iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["opto_pulse", "opto_pulse", "after"]);
}

#[tokio::test]
async fn test_precondition_failure_stops_the_plan() {
    let plan = Plan::from_toml_str(
        r#"
[[steps]]
action = "open_valve"
valve = 1

[[steps]]
action = "present_gas"
gas = "helium"

[[steps]]
action = "open_valve"
valve = 2
"#,
    )
    .unwrap();
    let (link, device) = MockDevice::spawn(Duration::from_secs(1));
    let mut rig = Rig::new(RigConfig::default(), link, RecordControl::Ttl);

    let err = plan.run(&mut rig).await.unwrap_err();
    assert!(matches!(err, RigError::GasNotConfigured { .. }));
    assert_eq!(device.commands(), vec![Command::OpenValve { valve: 1 }]);
}

#[test]
fn test_malformed_plans_are_rejected() {
    let unknown = Plan::from_toml_str("[[steps]]\naction = \"levitate\"\n").unwrap_err();
    assert!(matches!(unknown, RigError::Plan(_)));

    let missing = Plan::from_toml_str("[[steps]]\naction = \"run_pulse\"\nduration = 0.1\n");
    assert!(matches!(missing, Err(RigError::Plan(_))));
}

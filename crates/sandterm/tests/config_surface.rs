// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Configuration surface tests: attribute updates, autorun and config files.

use sandterm::config::{load_config_file, ConfigUpdate};
use sandterm::controller::RunController;
use sandterm::display::NullDisplay;
use sandterm::error::ErrorCode;
use sandterm::model::{RunConfiguration, RunOutcome};
use sandterm_fixtures::{temp_dir, wait_until, write_config, ScriptedLauncher, Step};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn controller(launcher: &ScriptedLauncher, config: RunConfiguration) -> RunController {
    RunController::new(config, Arc::new(launcher.clone()), Arc::new(NullDisplay))
}

#[tokio::test]
async fn args_attribute_splits_on_whitespace() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    assert!(controller.set_attribute("args", "a b  c").unwrap().is_none());
    assert_eq!(controller.config().unwrap().args, vec!["a", "b", "c"]);

    controller.set_attribute("args", "   ").unwrap();
    assert!(controller.config().unwrap().args.is_empty());
}

#[tokio::test]
async fn boolean_attributes_are_presence_triggered() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    controller.set_attribute("disable-echo", "false").unwrap();
    controller.set_attribute("disable-tty", "").unwrap();
    controller.set_attribute("controls", "no").unwrap();

    let config = controller.config().unwrap();
    assert!(config.disable_echo);
    assert!(config.disable_tty);
    assert!(controller.controls_visible());
}

#[tokio::test]
async fn unknown_attribute_is_a_config_error() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    let err = controller.set_attribute("colour", "red").unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn autorun_triggers_exactly_one_run() {
    let launcher = ScriptedLauncher::new(vec![Step::stdout("hi"), Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    let handle = controller
        .set_attribute("autorun", "")
        .unwrap()
        .expect("first autorun spawns a run");
    let result = handle.await.unwrap();
    assert_eq!(result.outcome(), RunOutcome::Completed);

    assert!(controller.set_attribute("autorun", "").unwrap().is_none());
    assert!(controller.apply_update(ConfigUpdate::Autorun).unwrap().is_none());
    assert_eq!(launcher.launches().len(), 1);
}

#[tokio::test]
async fn autorun_after_manual_run_does_nothing() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    controller.run().await;
    assert!(controller.set_attribute("autorun", "").unwrap().is_none());
    assert_eq!(launcher.launches().len(), 1);
    assert!(controller.config().unwrap().autorun);
}

#[tokio::test]
async fn connect_honours_initial_autorun_once() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let config = RunConfiguration {
        autorun: true,
        ..RunConfiguration::default()
    };
    let controller = controller(&launcher, config);

    let handle = controller.connect().unwrap().expect("autorun on connect");
    handle.await.unwrap();
    assert!(controller.connect().unwrap().is_none());
    assert_eq!(launcher.launches().len(), 1);
}

#[test]
fn autorun_outside_runtime_is_an_internal_error() {
    let launcher = ScriptedLauncher::new(vec![Step::Exit(0)]);
    let controller = controller(&launcher, RunConfiguration::default());

    let err = controller.apply_update(ConfigUpdate::Autorun).unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
}

#[tokio::test]
async fn updates_during_a_run_apply_to_the_next_run() {
    let launcher = ScriptedLauncher::new(vec![Step::WaitForKill]);
    let config = RunConfiguration {
        args: vec!["one".to_string()],
        ..RunConfiguration::default()
    };
    let controller = controller(&launcher, config);

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);

    controller.set_attribute("args", "two").unwrap();
    let mut env = BTreeMap::new();
    env.insert("MODE".to_string(), "test".to_string());
    controller.apply_update(ConfigUpdate::Env(env)).unwrap();
    controller.stop().unwrap();
    run.await.unwrap();

    launcher.queue(vec![Step::Exit(0)]);
    controller.run().await;

    let launches = launcher.launches();
    assert_eq!(launches[0].argv, vec!["program", "one"]);
    assert!(launches[0].env.is_empty());
    assert_eq!(launches[1].argv, vec!["program", "two"]);
    assert_eq!(launches[1].env.get("MODE").map(String::as_str), Some("test"));
}

#[test]
fn config_files_load_from_json_and_yaml() {
    let dir = temp_dir("config-load");

    let json_path = dir.join("run.json");
    let config = RunConfiguration {
        name: "tool".to_string(),
        args: vec!["--flag".to_string()],
        ..RunConfiguration::default()
    };
    write_config(&json_path, &config);
    assert_eq!(load_config_file(&json_path).unwrap(), config);

    let yaml_path = dir.join("run.yaml");
    std::fs::write(
        &yaml_path,
        "src: /bin/cat\nargs: [\"-n\"]\nfs:\n  /notes.txt: hello\ndisable_echo: true\n",
    )
    .unwrap();
    let loaded = load_config_file(&yaml_path).unwrap();
    assert_eq!(loaded.src.as_str(), "/bin/cat");
    assert_eq!(loaded.args, vec!["-n"]);
    assert_eq!(loaded.fs.get_text("/notes.txt"), Some("hello"));
    assert!(loaded.disable_echo);
    assert_eq!(loaded.name, "program");

    let broken = dir.join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert_eq!(load_config_file(&broken).unwrap_err().code, ErrorCode::Config);

    let missing = dir.join("missing.json");
    assert_eq!(load_config_file(&missing).unwrap_err().code, ErrorCode::Io);

    let _ = std::fs::remove_dir_all(dir);
}

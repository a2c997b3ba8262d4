// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Input forwarding, echo and transcript tests.

use sandterm::controller::RunController;
use sandterm::display::{DisplayEvent, DisplayOp, KeyChord, MemoryDisplay};
use sandterm::model::RunConfiguration;
use sandterm_fixtures::{wait_until, ScriptedLauncher, Step};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn controller_with(
    launcher: &ScriptedLauncher,
    config: RunConfiguration,
    display: Arc<MemoryDisplay>,
) -> RunController {
    RunController::new(config, Arc::new(launcher.clone()), display)
}

#[tokio::test]
async fn echoed_input_precedes_program_response() {
    let launcher = ScriptedLauncher::new(vec![
        Step::wait_for_input("hello\n"),
        Step::stdout("got it\n"),
        Step::Exit(0),
    ]);
    let display = Arc::new(MemoryDisplay::new());
    let controller = controller_with(&launcher, RunConfiguration::default(), display.clone());

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);
    controller.push_input("hel").unwrap();
    controller.push_input("lo\r").unwrap();

    let result = run.await.unwrap();
    let done = result.as_complete().unwrap();
    assert_eq!(done.stdin, "hello\n");
    assert_eq!(done.tty, "hello\ngot it\n");
    assert_eq!(done.stdout, "got it\n");
    assert_eq!(display.contents(), "hello\ngot it\n");
    assert_eq!(
        launcher.host(0).unwrap().stdin_chunks(),
        vec!["hel".to_string(), "lo\n".to_string()]
    );
}

#[tokio::test]
async fn disabled_echo_keeps_input_off_the_display() {
    let launcher = ScriptedLauncher::new(vec![Step::EchoInput, Step::Exit(0)]);
    let display = Arc::new(MemoryDisplay::new());
    let config = RunConfiguration {
        disable_echo: true,
        ..RunConfiguration::default()
    };
    let controller = controller_with(&launcher, config, display.clone());

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);
    controller.push_input("abc").unwrap();
    controller.push_eof().unwrap();

    let result = run.await.unwrap();
    let done = result.as_complete().unwrap();
    assert_eq!(done.stdin, "abc");
    assert_eq!(done.stdout, "abc");
    // Only the program's copy reaches the transcript and the display.
    assert_eq!(done.tty, "abc");
    assert_eq!(display.contents(), "abc");
}

#[tokio::test]
async fn every_carriage_return_becomes_a_newline() {
    let launcher = ScriptedLauncher::new(vec![Step::EchoInput, Step::Exit(0)]);
    let display = Arc::new(MemoryDisplay::new());
    let config = RunConfiguration {
        disable_echo: true,
        ..RunConfiguration::default()
    };
    let controller = controller_with(&launcher, config, display.clone());

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);
    controller.push_input("a\r\nb").unwrap();
    controller.push_input("c\r").unwrap();
    controller.push_input("\nd").unwrap();
    controller.push_eof().unwrap();

    let result = run.await.unwrap();
    let done = result.as_complete().unwrap();
    assert_eq!(done.stdin, "a\n\nbc\n\nd");
    assert_eq!(done.stdout, "a\n\nbc\n\nd");
    assert_eq!(
        launcher.host(0).unwrap().stdin_chunks(),
        vec!["a\n\nb".to_string(), "c\n".to_string(), "\nd".to_string()]
    );
}

#[tokio::test]
async fn rapid_input_is_delivered_in_call_order() {
    let launcher = ScriptedLauncher::new(vec![Step::EchoInput, Step::Exit(0)]);
    let display = Arc::new(MemoryDisplay::new());
    let config = RunConfiguration {
        disable_echo: true,
        ..RunConfiguration::default()
    };
    let controller = controller_with(&launcher, config, display);

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);

    let payloads: Vec<String> = (0..200).map(|i| format!("{i},")).collect();
    for payload in &payloads {
        controller.push_input(payload).unwrap();
    }
    controller.push_eof().unwrap();

    let result = run.await.unwrap();
    let expected = payloads.concat();
    let done = result.as_complete().unwrap();
    assert_eq!(done.stdin, expected);
    assert_eq!(done.stdout, expected);
    assert_eq!(launcher.host(0).unwrap().stdin_chunks(), payloads);
}

#[tokio::test]
async fn ctrl_d_chord_signals_end_of_input() {
    let launcher = ScriptedLauncher::new(vec![Step::WaitForEof, Step::Exit(3)]);
    let display = Arc::new(MemoryDisplay::new());
    let controller = controller_with(&launcher, RunConfiguration::default(), display);

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);

    controller
        .handle_display_event(DisplayEvent::Key(KeyChord::plain('d')))
        .unwrap();
    controller
        .handle_display_event(DisplayEvent::Data("typed".to_string()))
        .unwrap();
    controller
        .handle_display_event(DisplayEvent::Key(KeyChord::ctrl('d')))
        .unwrap();

    let result = tokio::time::timeout(TIMEOUT, run).await.unwrap().unwrap();
    let done = result.as_complete().unwrap();
    assert_eq!(done.exit_code, 3);
    assert_eq!(done.stdin, "typed");
    assert!(launcher.host(0).unwrap().saw_eof());
}

#[tokio::test]
async fn eof_does_not_end_the_session_by_itself() {
    let launcher = ScriptedLauncher::new(vec![Step::WaitForKill]);
    let display = Arc::new(MemoryDisplay::new());
    let controller = controller_with(&launcher, RunConfiguration::default(), display);

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    assert!(wait_until(TIMEOUT, || controller.is_running()).await);
    controller.push_eof().unwrap();
    let host = launcher.host(0).unwrap();
    assert!(wait_until(TIMEOUT, || host.saw_eof()).await);
    assert!(controller.is_running());

    controller.stop().unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn stderr_uses_distinct_channel_when_display_supports_it() {
    let launcher = ScriptedLauncher::new(vec![
        Step::stdout("a"),
        Step::stderr("b"),
        Step::stdout("c"),
        Step::Exit(0),
    ]);
    let display = Arc::new(MemoryDisplay::with_stderr_channel());
    let controller = controller_with(&launcher, RunConfiguration::default(), display.clone());

    let result = controller.run().await;
    assert_eq!(result.as_complete().unwrap().tty, "abc");

    let writes: Vec<DisplayOp> = display
        .ops()
        .into_iter()
        .filter(|op| matches!(op, DisplayOp::Write(_) | DisplayOp::WriteStderr(_)))
        .collect();
    assert_eq!(
        writes,
        vec![
            DisplayOp::Write("a".to_string()),
            DisplayOp::WriteStderr("b".to_string()),
            DisplayOp::Write("c".to_string()),
        ]
    );
}

#[tokio::test]
async fn each_run_starts_with_empty_buffers() {
    let launcher = ScriptedLauncher::new(vec![Step::stdout("same"), Step::Exit(0)]);
    let display = Arc::new(MemoryDisplay::new());
    let controller = controller_with(&launcher, RunConfiguration::default(), display.clone());

    controller.run().await;
    let second = controller.run().await;

    assert_eq!(second.as_complete().unwrap().stdout, "same");
    assert_eq!(display.contents(), "same");
}

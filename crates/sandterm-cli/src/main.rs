//! Sandterm CLI: run a terminal program under the sandterm run controller.
//!
//! `sandterm run` resolves a run configuration from a file and flags, streams
//! the program's output to this terminal (or headless to stdout/stderr) and
//! exits with the program's status.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

mod display;
mod interactive;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use sandterm::config::{load_config_file, ConfigUpdate};
use sandterm::controller::RunController;
use sandterm::display::{DisplaySurface, NullDisplay};
use sandterm::error::{SandtermError, SandtermResult};
use sandterm::model::{FsSnapshot, ProgramRef, RunConfiguration, RunResult};
use sandterm::worker::ProcessLauncher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, IsTerminal};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status when a run is cancelled (same as a shell reports for SIGINT).
const EXIT_TERMINATED: i32 = 130;
const EXIT_CRASHED: i32 = 1;
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "sandterm", version, about = "Run terminal programs in a sandbox")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log controller activity to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a program and stream its I/O
    Run(RunArgs),
    /// Print the resolved configuration of a config file
    Config {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, help = "Output as JSON (default: human-readable)")]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Load the run configuration from a JSON or YAML file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Program to execute")]
    src: Option<String>,
    #[arg(long, help = "Program name passed as argv[0]")]
    name: Option<String>,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Arguments as one whitespace-separated string"
    )]
    args: Option<String>,
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_pair)]
    env: Vec<(String, String)>,
    #[arg(
        long = "file",
        value_name = "VPATH=HOSTPATH",
        value_parser = parse_pair,
        help = "Copy a host file into the virtual filesystem"
    )]
    files: Vec<(String, String)>,
    #[arg(long, help = "Do not echo input locally")]
    disable_echo: bool,
    #[arg(long, help = "Tell the program its streams are not a terminal")]
    disable_tty: bool,
    #[arg(long, help = "Forward stdin line by line instead of using raw mode")]
    headless: bool,
    #[arg(long, help = "Print the run result as JSON")]
    json: bool,
    #[arg(long, value_name = "DIR", help = "Write the resulting filesystem to DIR")]
    write_fs: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Config { config, json } => cmd_config(&config, json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            std::env::var("NO_COLOR").is_err()
                && supports_color::on(supports_color::Stream::Stderr).is_some()
        }
    };
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
fn cmd_run(args: RunArgs) -> Result<()> {
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => return emit_cli_error(args.json, err),
    };
    let headless = args.headless || !io::stdin().is_terminal();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let result = runtime.block_on(async {
        if headless {
            run_headless(config, args.json).await
        } else {
            run_interactive(config).await
        }
    })?;

    if let (Some(dir), RunResult::Complete(done)) = (args.write_fs.as_ref(), &result) {
        if let Err(err) = write_fs_snapshot(dir, &done.fs) {
            return emit_cli_error(args.json, err);
        }
    }
    emit_result(args.json, &result)
}

/// Handle the config command.
fn cmd_config(path: &Path, json: bool) -> Result<()> {
    let config = match load_config_file(path) {
        Ok(config) => config,
        Err(err) => return emit_cli_error(json, err),
    };
    if json {
        let payload = serde_json::to_string_pretty(&config).into_diagnostic()?;
        println!("{payload}");
    } else {
        print_config_text(&config);
    }
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Run modes
// =============================================================================

fn controller_for(config: RunConfiguration, display: Arc<dyn DisplaySurface>) -> RunController {
    RunController::new(config, Arc::new(ProcessLauncher::new()), display)
}

/// Stdin lines become input, stdin EOF becomes end-of-input, Ctrl+C stops.
async fn run_headless(config: RunConfiguration, json: bool) -> Result<RunResult> {
    let display: Arc<dyn DisplaySurface> = if json {
        Arc::new(NullDisplay)
    } else {
        Arc::new(display::StreamDisplay)
    };
    let controller = controller_for(config, display);
    install_interrupt_handler(&controller);

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };
    let forwarder = tokio::spawn(forward_stdin(controller.clone()));
    let result = run.await.into_diagnostic()?;
    forwarder.abort();
    Ok(result)
}

/// Raw-mode keystrokes become display events; Ctrl+D is end-of-input.
async fn run_interactive(config: RunConfiguration) -> Result<RunResult> {
    let controller = controller_for(config, Arc::new(display::RawTerminalDisplay));
    let guard = interactive::RawModeGuard::enable()?;
    let done = Arc::new(AtomicBool::new(false));
    let reader = interactive::spawn_key_reader(controller.clone(), Arc::clone(&done));

    let result = controller.run().await;

    done.store(true, Ordering::SeqCst);
    let _ = tokio::task::spawn_blocking(move || reader.join()).await;
    drop(guard);
    eprintln!();
    Ok(result)
}

fn install_interrupt_handler(controller: &RunController) {
    let controller = controller.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if let Err(err) = controller.stop() {
            tracing::warn!(error = %err, "failed to stop run");
        }
    }) {
        tracing::warn!(error = %err, "failed to install interrupt handler");
    }
}

async fn forward_stdin(controller: RunController) {
    let (lines, mut queue) = tokio::sync::mpsc::unbounded_channel::<Option<String>>();
    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if lines.send(Some(line)).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = lines.send(None);
    });

    // Input pushed before the worker is attached would be dropped.
    while !controller.is_running() {
        tokio::time::sleep(WORKER_POLL_INTERVAL).await;
    }
    while let Some(message) = queue.recv().await {
        let outcome = match message {
            Some(line) => controller.push_input(&line),
            None => controller.push_eof(),
        };
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "failed to forward stdin");
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

/// Config file first, then flags applied as configuration updates.
fn resolve_config(args: &RunArgs) -> SandtermResult<RunConfiguration> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_config_file(path)?,
        None => RunConfiguration::default(),
    };
    for update in flag_updates(args, &config)? {
        config.apply(update, true);
    }
    if config.src.is_empty() {
        return Err(SandtermError::config(
            "no program to run: pass --src or a config file with `src`",
            None,
        ));
    }
    Ok(config)
}

fn flag_updates(args: &RunArgs, base: &RunConfiguration) -> SandtermResult<Vec<ConfigUpdate>> {
    let mut updates = Vec::new();
    if let Some(src) = args.src.as_deref() {
        updates.push(ConfigUpdate::Src(ProgramRef::new(src)));
    }
    if let Some(name) = args.name.as_deref() {
        updates.push(ConfigUpdate::from_attribute("name", name)?);
    }
    if let Some(raw) = args.args.as_deref() {
        updates.push(ConfigUpdate::from_attribute("args", raw)?);
    }
    if !args.env.is_empty() {
        let mut env: BTreeMap<String, String> = base.env.clone();
        env.extend(args.env.iter().cloned());
        updates.push(ConfigUpdate::Env(env));
    }
    if !args.files.is_empty() {
        let mut fs = base.fs.clone();
        for (virtual_path, host_path) in &args.files {
            let content = std::fs::read(host_path).map_err(|err| {
                SandtermError::io(format!("failed to read {host_path}"), err)
            })?;
            fs.insert(virtual_path.clone(), content);
        }
        updates.push(ConfigUpdate::Fs(fs));
    }
    if args.disable_echo {
        updates.push(ConfigUpdate::DisableEcho);
    }
    if args.disable_tty {
        updates.push(ConfigUpdate::DisableTty);
    }
    Ok(updates)
}

fn write_fs_snapshot(dir: &Path, fs: &FsSnapshot) -> SandtermResult<()> {
    for (virtual_path, content) in fs.iter() {
        let relative: PathBuf = Path::new(virtual_path)
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        if relative.as_os_str().is_empty()
            || Path::new(virtual_path)
                .components()
                .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(SandtermError::config(
                "refusing to write path outside the output directory",
                serde_json::json!({ "path": virtual_path }),
            ));
        }
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| SandtermError::io("failed to create output directory", err))?;
        }
        std::fs::write(&target, content)
            .map_err(|err| SandtermError::io("failed to write output file", err))?;
    }
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn print_config_text(config: &RunConfiguration) {
    println!("src: {}", config.src);
    println!("name: {}", config.name);
    println!("args: {}", config.args.join(" "));
    for (key, value) in &config.env {
        println!("env: {key}={value}");
    }
    for (path, content) in config.fs.iter() {
        println!("file: {path} ({} bytes)", content.len());
    }
    println!("disable-echo: {}", config.disable_echo);
    println!("disable-tty: {}", config.disable_tty);
    println!("controls: {}", config.controls);
    println!("autorun: {}", config.autorun);
}

fn emit_result(json: bool, result: &RunResult) -> Result<()> {
    if json {
        let payload = serde_json::to_string(result).into_diagnostic()?;
        println!("{payload}");
    }
    match result {
        RunResult::Complete(done) => std::process::exit(program_exit_status(done.exit_code)),
        RunResult::Terminated => {
            if !json {
                eprintln!("run terminated");
            }
            std::process::exit(EXIT_TERMINATED);
        }
        RunResult::Crash { error } => {
            if !json {
                eprintln!("run crashed: {}: {}", error.code, error.message);
            }
            std::process::exit(EXIT_CRASHED);
        }
    }
}

/// Exit status mirroring a completed program.
///
/// Negative codes mean the status was unknown and must not read as success.
fn program_exit_status(code: i32) -> i32 {
    match code {
        0..=255 => code,
        negative if negative < 0 => EXIT_CRASHED,
        _ => 255,
    }
}

#[derive(Serialize)]
struct CliErrorPayload<'a> {
    #[serde(rename = "resultType")]
    result_type: &'static str,
    code: &'a str,
    message: &'a str,
}

fn emit_cli_error(json: bool, err: SandtermError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&CliErrorPayload {
            result_type: "error",
            code: err.code.as_str(),
            message: &err.message,
        })
        .into_diagnostic()?;
        println!("{payload}");
        std::process::exit(2);
    }
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_pair("=x").is_err());
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn unknown_exit_status_is_not_success() {
        assert_eq!(program_exit_status(0), 0);
        assert_eq!(program_exit_status(3), 3);
        assert_eq!(program_exit_status(-1), EXIT_CRASHED);
        assert_eq!(program_exit_status(300), 255);
    }

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["sandterm", "run"].iter().chain(argv)).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn flags_override_config_file_values() {
        let args = run_args(&[
            "--src",
            "/bin/echo",
            "--args",
            "a  b",
            "--env",
            "K=V",
            "--disable-echo",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.src.as_str(), "/bin/echo");
        assert_eq!(config.args, vec!["a", "b"]);
        assert_eq!(config.env.get("K").map(String::as_str), Some("V"));
        assert!(config.disable_echo);
        assert!(!config.disable_tty);
    }

    #[test]
    fn missing_src_is_rejected() {
        let args = run_args(&[]);
        let err = resolve_config(&args).unwrap_err();
        assert_eq!(err.code.as_str(), "E_CONFIG");
    }
}

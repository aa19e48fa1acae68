mod app;
mod config;
mod render;
mod replay;

use std::env;
use std::path::Path;
use std::path::PathBuf;

use tether_core::conversation::ConversationStore;
use tether_core::JsonFileStore;
use tether_core::RecordedEventLog;
use tether_exec::discovery::codex_version;
use tether_exec::discovery::discover_codex_command;
use tether_exec::discovery::DiscoveryEnv;
use tether_exec::rollout::codex_home;
use tether_exec::rollout::load_history;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const DEFAULT_LOG_FILTER: &str = "warn,tether_core=info,tether_exec=info,tether=info";

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_help();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" | "version" => {
            print_version();
            Ok(())
        }
        "chat" => {
            let options = parse_options(&rest)?;
            let repo = options.repo.canonicalize()?;
            let settings = config::load_config(config::config_path().as_deref())?;
            app::run_chat(repo, settings)
        }
        "sessions" => {
            let options = parse_options(&rest)?;
            list_sessions(options)
        }
        "replay" => {
            let Some(session_id) = rest.first() else {
                return Err("replay requires a session id".into());
            };
            replay(session_id)
        }
        _ => {
            print_help();
            Err(format!("unknown command: {command}").into())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    repo: PathBuf,
    all: bool,
    history: bool,
}

fn parse_options(args: &[String]) -> Result<Options, Box<dyn std::error::Error>> {
    let mut repo = None;
    let mut all = false;
    let mut history = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--repo" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--repo requires a path".into());
                };
                repo = Some(PathBuf::from(value));
                i += 2;
            }
            "--all" => {
                all = true;
                i += 1;
            }
            "--history" => {
                history = true;
                i += 1;
            }
            other => {
                return Err(format!("unsupported argument: {other}").into());
            }
        }
    }
    Ok(Options {
        repo: repo.unwrap_or_else(|| PathBuf::from(".")),
        all,
        history,
    })
}

fn list_sessions(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let mut kv = JsonFileStore::open(config::data_dir()?.join("store.json"))?;
    let mut store = ConversationStore::restore(&kv)?;
    if options.history {
        let settings = config::load_config(config::config_path().as_deref())?;
        let imported = import_history(&mut store, settings.backend.codex_home.as_deref())?;
        if imported > 0 {
            store.persist(&mut kv)?;
        }
        println!("imported {imported} session(s) from codex history");
    }
    let repo = options.repo.canonicalize()?;
    let project = (!options.all).then_some(repo.as_path());
    let sessions = store.list_sessions(project);
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    let current = store.current_session_id();
    for session in sessions {
        println!(
            "{}",
            app::session_line(session, current == Some(session.id.as_str()))
        );
    }
    Ok(())
}

/// Adds codex rollout sessions the store does not know yet.
fn import_history(
    store: &mut ConversationStore,
    codex_home_override: Option<&Path>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let Some(home) = codex_home(codex_home_override) else {
        return Err("cannot locate the codex home directory".into());
    };
    let imported = load_history(&home)?
        .into_iter()
        .filter(|session| store.import_session(session.clone()))
        .count();
    tracing::info!(home = %home.display(), imported, "codex history imported");
    Ok(imported)
}

fn print_version() {
    println!("tether {}", env!("CARGO_PKG_VERSION"));
    let settings = config::load_config(config::config_path().as_deref()).unwrap_or_default();
    let program = settings
        .backend
        .codex_path
        .or_else(|| discover_codex_command(&DiscoveryEnv::from_process()));
    match program.map(|program| codex_version(&program)) {
        Some(Ok(version)) => println!("codex: {version}"),
        Some(Err(err)) => println!("codex: {err}"),
        None => println!("codex: not found"),
    }
}

fn replay(prefix: &str) -> Result<(), Box<dyn std::error::Error>> {
    let data = config::data_dir()?;
    let kv = JsonFileStore::open(data.join("store.json"))?;
    let store = ConversationStore::restore(&kv)?;
    let session_id =
        app::resolve_session_id(&store, prefix).unwrap_or_else(|_| prefix.to_string());

    let log = RecordedEventLog::open(data.join("events.jsonl"))?;
    let records = log.load_session(&session_id)?;
    if records.is_empty() {
        return Err(format!("no recorded events for session {session_id}").into());
    }
    let settings = config::load_config(config::config_path().as_deref())?;
    let mut session = replay::replay_session(settings, &session_id, &records)?;
    if let Some(stored) = store.session(&session_id) {
        session.title = stored.title.clone();
    }
    print!("{}", render::render_full(&session));
    Ok(())
}

fn print_help() {
    println!("tether {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  tether chat [--repo PATH]");
    println!("  tether sessions [--repo PATH] [--all] [--history]");
    println!("  tether replay SESSION_ID");
    println!("  tether --help");
    println!("  tether --version");
    println!();
    println!("Logging goes to stderr; set RUST_LOG to change the filter.");
}

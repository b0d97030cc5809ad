use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use update_flow::update::{
    load_config, InstallLoop, Scenario, StateChangeEvent, UpdateSimulator, UpdateState,
    UpdateStateKind, UpdaterConfig,
};

/// How the runner answers states that wait on the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Respond {
    /// Proceed (install, acknowledge, allow, retry)
    Confirm,
    /// Decline or dismiss
    Cancel,
    /// Leave the state alone
    None,
}

/// Run a simulated update flow and print every state it passes through
#[derive(Parser, Debug)]
#[command(name = "update-flow", version)]
struct Args {
    /// Scenario to simulate
    #[arg(long, value_enum, default_value_t = Scenario::HappyPath)]
    scenario: Scenario,

    /// Answer to prompts (update available, permission, not found, error)
    #[arg(long, value_enum, default_value_t = Respond::Confirm)]
    respond: Respond,

    /// Drive every confirmable step automatically
    #[arg(long)]
    force_install: bool,

    /// Print state change events as JSON lines
    #[arg(long)]
    json: bool,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    // All state mutation happens on this one thread
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(args));
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    let config = load_config();
    log::info!(
        "Simulating {:?} on channel {} (automatic checks: {})",
        args.scenario,
        config.channel,
        config.automatic_checks
    );
    let simulator = UpdateSimulator::new();
    let view_model = simulator.view_model().clone();
    let install_loop = InstallLoop::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<UpdateState>();
    let previous = Mutex::new(UpdateState::Idle);
    let json = args.json;
    let print_config = config.clone();
    view_model.observe(move |state| {
        let previous_state = std::mem::replace(&mut *previous.lock(), state.clone());
        print_transition(&previous_state, state, json, &print_config);
        let _ = tx.send(state.clone());
    });

    simulator.simulate(args.scenario);

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                log::warn!("Timed out after {}s in {}", args.timeout_secs, view_model.kind());
                return 2;
            }
            received = rx.recv() => {
                let Some(state) = received else {
                    return 1;
                };

                match state.kind() {
                    UpdateStateKind::Idle => return 0,
                    UpdateStateKind::Installing => return 0,
                    _ => {}
                }

                // Only answer the state that is still live
                let current = view_model.state();
                if current.kind() != state.kind() {
                    continue;
                }

                if args.force_install && current.is_installable() {
                    install_loop.start(&view_model);
                    continue;
                }

                if waits_on_user(&current) {
                    respond(&current, args.respond);
                }
            }
        }
    }
}

fn waits_on_user(state: &UpdateState) -> bool {
    matches!(
        state,
        UpdateState::UpdateAvailable { .. }
            | UpdateState::PermissionRequest { .. }
            | UpdateState::NotFound { .. }
            | UpdateState::Error { .. }
    )
}

fn respond(state: &UpdateState, respond: Respond) {
    match (respond, state) {
        (Respond::None, _) => {}
        (Respond::Confirm, UpdateState::Error { retry, .. }) => retry(),
        (Respond::Confirm, _) => state.confirm(),
        (Respond::Cancel, _) => state.cancel(),
    }
}

fn print_transition(
    previous: &UpdateState,
    state: &UpdateState,
    json: bool,
    config: &UpdaterConfig,
) {
    if json {
        match serde_json::to_string(&StateChangeEvent::new(previous, state)) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize state change: {}", e),
        }
        return;
    }

    let summary = state.summary();
    if summary.is_empty() {
        println!("{:<18}", state.kind());
    } else {
        println!("{:<18} {}", state.kind(), summary);
    }

    if let UpdateState::UpdateAvailable { item, .. } = state {
        if let Some(notes) = item.release_notes(config) {
            println!("{:<18} release notes: {}", "", notes.url());
        }
    }
}

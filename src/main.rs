use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hopsync::{
    AppError, ChallengeResolver, ConnectionProfile, Direction, ProfileRecord, ProfileStore,
    ProgressAggregator, ProgressReport, PromptReceiver, PromptRequest, Result, SessionHandle,
    SessionProfiles, TransferEngine, TransferMode, TransferOutcome, TransferTask, init_tracing,
    parse_port,
};

#[derive(Parser)]
#[command(name = "hopsync", version, about = "Bastion-aware SFTP synchronization client")]
struct Cli {
    /// Saved profile label to load connection parameters from
    #[arg(short, long)]
    profile: Option<String>,

    /// Save the resolved parameters under this label on success
    #[arg(long)]
    save: Option<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Default)]
struct TargetArgs {
    /// Target host
    #[arg(long)]
    host: Option<String>,
    /// Target port (defaults to 22)
    #[arg(long)]
    port: Option<String>,
    /// Target user
    #[arg(long)]
    user: Option<String>,
    /// Private key for the target
    #[arg(long)]
    key: Option<String>,
    /// Static password for the target
    #[arg(long)]
    password: Option<String>,
    /// Challenge secret (rotating PIN) for the target
    #[arg(long)]
    pin: Option<String>,

    /// Bastion host; enables tunneling
    #[arg(long)]
    bastion_host: Option<String>,
    /// Bastion port (defaults to 22)
    #[arg(long)]
    bastion_port: Option<String>,
    /// Bastion user
    #[arg(long)]
    bastion_user: Option<String>,
    /// Private key for the bastion
    #[arg(long)]
    bastion_key: Option<String>,
    /// Password for the bastion
    #[arg(long)]
    bastion_password: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file or directory tree
    Upload {
        local: PathBuf,
        remote: String,
        /// Treat the source as one file instead of a tree
        #[arg(long)]
        single_file: bool,
        /// Retransfer files whose sizes already match
        #[arg(long)]
        force: bool,
    },
    /// Download a remote file or directory tree
    Download {
        remote: String,
        local: PathBuf,
        /// Retransfer files whose sizes already match
        #[arg(long)]
        force: bool,
    },
    /// Run one command line on the target
    Exec {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Verify that the connection and authentication work
    Check,
    /// List saved profiles, most recently used first
    Profiles,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_level)?;
    let mut store = ProfileStore::new()?;

    if let Command::Profiles = cli.command {
        if store.records().is_empty() {
            println!("no saved profiles");
        }
        for record in store.records() {
            let bastion = if record.use_bastion {
                format!(" via {}", record.bastion.host_port())
            } else {
                String::new()
            };
            println!(
                "{:<20} {}@{}{}",
                record.display_label(),
                record.target.user,
                record.target.host_port(),
                bastion
            );
        }
        return Ok(());
    }

    let profiles = resolve_profiles(&cli, &store)?;

    // The foreground loop below is the only code that talks to the
    // terminal; workers rendezvous with it through this channel.
    let (prompt_tx, prompt_rx) = mpsc::channel(4);
    let responder = tokio::spawn(prompt_responder(prompt_rx));
    let resolver = ChallengeResolver::new(prompt_tx);

    let session = SessionHandle::connect(&profiles, &resolver).await?;
    eprintln!("connected to {}", session.target_label());

    let result = dispatch(&cli, &session).await;

    session.close().await.ok();
    drop(resolver);
    responder.abort();

    result?;

    if let Some(label) = &cli.save {
        let record = build_record(label, &cli, &profiles);
        store.remember(record)?;
        eprintln!("profile '{label}' saved");
    }

    Ok(())
}

async fn dispatch(cli: &Cli, session: &SessionHandle) -> Result<()> {
    match &cli.command {
        Command::Upload {
            local,
            remote,
            single_file,
            force,
        } => {
            let task = TransferTask {
                direction: Direction::Upload,
                mode: if *single_file {
                    TransferMode::SingleFile
                } else {
                    TransferMode::Tree
                },
                local_root: local.clone(),
                remote_root: remote.clone(),
                force_overwrite: *force,
            };
            run_transfer(session, task).await
        }
        Command::Download { remote, local, force } => {
            let task = TransferTask {
                direction: Direction::Download,
                mode: TransferMode::Tree,
                local_root: local.clone(),
                remote_root: remote.clone(),
                force_overwrite: *force,
            };
            run_transfer(session, task).await
        }
        Command::Exec { command } => {
            let line = command.join(" ");
            let output = session.exec(&line).await?;
            if !output.stdout.is_empty() {
                print!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                eprint!("{}", output.stderr);
            }
            if output.stdout.is_empty() && output.stderr.is_empty() {
                eprintln!("[no output]");
            }
            Ok(())
        }
        Command::Check => {
            session.probe().await?;
            eprintln!("authentication and SFTP subsystem OK");
            Ok(())
        }
        Command::Profiles => unreachable!("handled before connecting"),
    }
}

async fn run_transfer(session: &SessionHandle, task: TransferTask) -> Result<()> {
    let guard = session.begin_transfer()?;
    session.probe().await?;

    let cancel = CancellationToken::new();
    {
        // Ctrl-C sets the flag; the run stops at the next checkpoint
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressReport>(64);
    let printer = tokio::spawn(async move {
        while let Some(report) = progress_rx.recv().await {
            eprintln!(
                "transferred {:.1} MB | {:.1} MB/s | {}",
                report.cumulative_mb, report.rate_mbps, report.current_file
            );
        }
    });

    let remote = session.remote();
    let mut engine = TransferEngine::new(
        &remote,
        ProgressAggregator::new(Some(progress_tx)),
        cancel.clone(),
        task.force_overwrite,
    );

    let result = engine.run(&task).await;
    let total = engine.total_bytes();
    drop(engine);
    drop(guard);
    let _ = printer.await;

    match TransferOutcome::from_result(result) {
        TransferOutcome::Completed => {
            info!("task complete, {} bytes accounted", total);
            eprintln!("task complete ({:.1} MB)", total as f64 / 1_048_576.0);
            Ok(())
        }
        TransferOutcome::Aborted => {
            warn!("task aborted by operator");
            eprintln!("task aborted");
            Ok(())
        }
        TransferOutcome::Failed(e) => Err(e),
    }
}

/// Answer prompt requests from workers. Masked prompts never echo.
async fn prompt_responder(mut requests: PromptReceiver) {
    while let Some(request) = requests.recv().await {
        let PromptRequest {
            title,
            prompt,
            masked,
            reply,
        } = request;

        let answer = tokio::task::spawn_blocking(move || {
            if masked {
                rpassword::prompt_password(format!("{title}: {prompt} ")).unwrap_or_default()
            } else {
                eprint!("{title}: {prompt} ");
                let _ = std::io::stderr().flush();
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_err() {
                    return String::new();
                }
                line.trim_end_matches(['\r', '\n']).to_string()
            }
        })
        .await
        .unwrap_or_default();

        let _ = reply.send(answer);
    }
}

/// Merge a saved record (if any) with command-line overrides.
fn resolve_profiles(cli: &Cli, store: &ProfileStore) -> Result<SessionProfiles> {
    let mut profiles = match &cli.profile {
        Some(label) => {
            let record = store
                .find(label)
                .ok_or_else(|| AppError::Config(format!("no saved profile named '{label}'")))?;
            SessionProfiles::from_record(record)
        }
        None => SessionProfiles::direct(ConnectionProfile::default()),
    };

    let args = &cli.target;
    apply_override(&mut profiles.target.host, &args.host);
    apply_override(&mut profiles.target.user, &args.user);
    if let Some(port) = &args.port {
        profiles.target.port = parse_port(port);
    }
    if args.key.is_some() {
        profiles.target.key_path = args.key.clone();
    }
    if args.password.is_some() {
        profiles.target.static_secret = args.password.clone();
    }
    if args.pin.is_some() {
        profiles.target.challenge_secret = args.pin.clone();
    }

    if args.bastion_host.is_some() || profiles.bastion.is_some() {
        let mut bastion = profiles.bastion.take().unwrap_or_default();
        apply_override(&mut bastion.host, &args.bastion_host);
        apply_override(&mut bastion.user, &args.bastion_user);
        if let Some(port) = &args.bastion_port {
            bastion.port = parse_port(port);
        }
        if args.bastion_key.is_some() {
            bastion.key_path = args.bastion_key.clone();
        }
        if args.bastion_password.is_some() {
            bastion.static_secret = args.bastion_password.clone();
        }
        profiles.bastion = Some(bastion);
    }

    profiles.target.validate()?;
    Ok(profiles)
}

fn apply_override(field: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

fn build_record(label: &str, cli: &Cli, profiles: &SessionProfiles) -> ProfileRecord {
    let mut record = ProfileRecord::new(label, profiles.target.clone());
    if let Some(bastion) = &profiles.bastion {
        record.use_bastion = true;
        record.bastion = bastion.clone();
    }
    match &cli.command {
        Command::Upload {
            local,
            remote,
            single_file,
            ..
        } => {
            record.upload_mode = if *single_file {
                TransferMode::SingleFile
            } else {
                TransferMode::Tree
            };
            record.paths.up_local = local.display().to_string();
            record.paths.up_remote = remote.clone();
        }
        Command::Download { remote, local, .. } => {
            record.paths.down_remote = remote.clone();
            record.paths.down_local = local.display().to_string();
        }
        _ => {}
    }
    record
}

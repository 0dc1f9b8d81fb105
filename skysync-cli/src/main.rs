mod prompt;

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use skysync_core::project::safe_project_path;
use skysync_core::{
    CloudSyncService, Config, DirectoryRemote, IdentityProvider, SqliteProjectFile, StaticIdentity,
    TokenFileIdentity, Workspace,
};
use skysync_types::{ProjectId, SnapshotId, SnapshotUpdate};

use prompt::TerminalUi;

const USAGE: &str = "usage:
  skysync [-v] [--token TOKEN] new <title> <file>...   create a project from files and save it
  skysync [-v] [--token TOKEN] push <project>          upload a project to the cloud
  skysync [-v] status <project>                        show a project's cloud state";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    New { title: String, files: Vec<PathBuf> },
    Push { project: PathBuf },
    Status { project: PathBuf },
}

struct Options {
    verbose: bool,
    token: Option<String>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut verbose = false;
    let mut token = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "--token" => {
                token = Some(iter.next().ok_or("--token needs a value")?.clone());
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
            _ => positional.push(arg.clone()),
        }
    }

    let command = match positional.split_first() {
        Some((cmd, rest)) if cmd == "new" => match rest.split_first() {
            Some((title, files)) if !files.is_empty() => Command::New {
                title: title.clone(),
                files: files.iter().map(PathBuf::from).collect(),
            },
            _ => return Err("new needs a title and at least one file".to_string()),
        },
        Some((cmd, [project])) if cmd == "push" => Command::Push {
            project: PathBuf::from(project),
        },
        Some((cmd, [project])) if cmd == "status" => Command::Status {
            project: PathBuf::from(project),
        },
        Some((cmd, _)) => return Err(format!("bad arguments for '{}'", cmd)),
        None => return Err("no command given".to_string()),
    };

    Ok(Options {
        verbose,
        token,
        command,
    })
}

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skysync")
        .join("skysync.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path) {
        Ok(file) => file,
        Err(_) => match File::create(std::env::temp_dir().join("skysync.log")) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("logging disabled: {}", e);
                return;
            }
        },
    };

    if WriteLogger::init(log_level, simplelog::Config::default(), log_file).is_err() {
        eprintln!("logging disabled: logger already set");
        return;
    }

    log::info!("skysync starting (log level: {:?})", log_level);
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };
    init_logging(options.verbose);

    let config = Config::load();
    let remote = Arc::new(DirectoryRemote::new(config.remote_root()));

    let (identity, credentials_hint): (Arc<dyn IdentityProvider>, String) = match (
        options.token,
        TokenFileIdentity::default_location(),
    ) {
        (Some(token), _) => (Arc::new(StaticIdentity::new(&token)), "--token".to_string()),
        (None, Some(file)) => {
            let hint = file.path().display().to_string();
            (Arc::new(file), hint)
        }
        (None, None) => (
            Arc::new(StaticIdentity::signed_out()),
            "a credentials file (no config directory found)".to_string(),
        ),
    };

    let file_io = Rc::new(SqliteProjectFile);
    let service = CloudSyncService::from_config(&config, file_io.clone(), remote.clone(), identity)
        .with_ui(Rc::new(TerminalUi::new(credentials_hint)));
    let mut workspace = Workspace::new(service, file_io);

    let result = match options.command {
        Command::New { title, files } => std::env::current_dir()
            .map_err(|e| e.to_string())
            .and_then(|cwd| run_new(&mut workspace, &title, &files, &cwd)),
        Command::Push { project } => run_push(&mut workspace, &project),
        Command::Status { project } => run_status(&mut workspace, &remote, &project),
    };
    workspace.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "cli", "{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Build a project from `files`. If no extension takes the first save it is
/// written to `local_dir`.
fn run_new(
    workspace: &mut Workspace,
    title: &str,
    files: &[PathBuf],
    local_dir: &Path,
) -> Result<(), String> {
    let id = workspace.new_project(title);
    {
        let project = workspace
            .project_mut(id)
            .ok_or("project vanished after creation")?;
        for file in files {
            let data = std::fs::read(file).map_err(|e| format!("{}: {}", file.display(), e))?;
            let block = project.add_block(data);
            let name = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("track {}", block));
            project.add_track(&name, vec![block]);
        }
    }

    if !workspace.save(id) {
        let path = safe_project_path(local_dir, title);
        if !workspace.save_as(id, &path) {
            return Err(format!("could not save {}", path.display()));
        }
    }
    if let Some(path) = workspace.project(id).and_then(|p| p.path.as_ref()) {
        println!("Saved {}", path.display());
    }

    wait_for_uploads(workspace)?;
    record_remote_id(workspace, id)
}

/// Re-save a project that became cloud-backed so its file knows the remote id.
fn record_remote_id(workspace: &mut Workspace, id: ProjectId) -> Result<(), String> {
    let needs_save = workspace
        .project(id)
        .is_some_and(|p| p.is_cloud_backed() && p.dirty);
    if needs_save && !workspace.save(id) {
        return Err("could not record the cloud id in the project file".to_string());
    }
    Ok(())
}

fn run_push(workspace: &mut Workspace, path: &Path) -> Result<(), String> {
    let id = workspace.open(path).map_err(|e| e.to_string())?;
    let cloud_backed = workspace.project(id).is_some_and(|p| p.is_cloud_backed());

    if cloud_backed {
        // re-save; the upload only happens if the content changed
        if !workspace.save(id) {
            return Err(format!("could not save {}", path.display()));
        }
    } else {
        workspace.save_to_cloud(id);
    }

    wait_for_uploads(workspace)?;
    record_remote_id(workspace, id)
}

fn run_status(workspace: &mut Workspace, remote: &DirectoryRemote, path: &Path) -> Result<(), String> {
    let id = workspace.open(path).map_err(|e| e.to_string())?;
    let project = workspace.project(id).ok_or("project vanished after open")?;

    println!("Title:   {}", project.title());
    println!("Tracks:  {}", project.document.tracks.len());
    println!("Blocks:  {}", project.blocks.len());
    match project.cloud.remote_id() {
        Some(remote_id) => {
            println!("Cloud:   {}", remote_id);
            match remote.manifest(remote_id) {
                Ok(manifest) => println!("Remote:  {} snapshot(s)", manifest.snapshots.len()),
                Err(e) => println!("Remote:  unavailable ({})", e),
            }
        }
        None => println!("Cloud:   not cloud-backed"),
    }
    Ok(())
}

/// Pump until every upload has finished, printing progress as it changes.
fn wait_for_uploads(workspace: &mut Workspace) -> Result<(), String> {
    let mut shown: HashMap<SnapshotId, SnapshotUpdate> = HashMap::new();

    while workspace.is_busy() {
        workspace.pump();

        let current: Vec<(SnapshotId, SnapshotUpdate)> = workspace
            .cloud()
            .snapshots()
            .iter()
            .map(|s| (s.id(), s.update()))
            .collect();
        for (id, update) in current {
            if shown.get(&id) != Some(&update) {
                println!("{}", progress_line(id, &update));
                shown.insert(id, update);
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let mut failures = Vec::new();
    for finished in workspace.cloud().take_finished() {
        if finished.update.successful {
            println!(
                "Uploaded {} to {}",
                finished.id,
                finished.remote_project_id.as_deref().unwrap_or("?")
            );
        } else {
            failures.push(format!(
                "{}: {}",
                finished.id,
                finished.update.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!("upload failed ({})", failures.join("; ")))
    }
}

fn progress_line(id: SnapshotId, update: &SnapshotUpdate) -> String {
    let blob = if update.blob_uploaded { "sent" } else { "pending" };
    format!(
        "{}: {}/{} blocks, project data {}",
        id, update.blocks_uploaded, update.total_blocks, blob
    )
}

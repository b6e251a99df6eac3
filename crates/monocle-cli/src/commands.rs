//! Command dispatch and execution

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use monocle_core::repl::is_device_error;
use monocle_core::script::join_device_path;
use monocle_core::{extract_error, extract_output, DeviceEntry, DeviceSession, LocalFile};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::console::ConsoleSink;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Everything a command needs
pub struct CommandContext {
    pub session: DeviceSession,
    pub sink: Arc<ConsoleSink>,
    pub config: AppConfig,
}

pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Run one command. Device commands connect first and disconnect when
    /// done, whatever the outcome.
    pub async fn execute(command: Commands, ctx: &CommandContext) -> Result<()> {
        if command == Commands::Config {
            print!("{}", ctx.config.to_toml()?);
            return Ok(());
        }

        ctx.session.ensure_connected().await?;
        // A cancelled selection or a finished firmware update leaves no REPL
        if !ctx.session.is_connected() {
            return Err(CliError::NotConnected);
        }
        let result = Self::run_device_command(command, ctx).await;
        ctx.session.disconnect().await;
        result
    }

    async fn run_device_command(command: Commands, ctx: &CommandContext) -> Result<()> {
        match command {
            Commands::Ls { path, json } => list(ctx, &path, json).await,
            Commands::Mkdir { path } => {
                expect_success(ctx.session.make_dir(&path).await?, "Creating", &path)
            }
            Commands::Put { local, device_path } => put(ctx, &local, device_path.as_deref()).await,
            Commands::Mv { old, new } => {
                expect_success(ctx.session.rename(&old, &new).await?, "Renaming", &old)
            }
            Commands::Rm { path } => {
                expect_success(ctx.session.delete(&path).await?, "Deleting", &path)
            }
            Commands::Cat { path } => cat(ctx, &path).await,
            Commands::Run { script } => run(ctx, &script).await,
            Commands::Exec { code } => exec(ctx, &code).await,
            Commands::Repl => repl(ctx).await,
            Commands::Config => Ok(()),
        }
    }
}

fn expect_success(ok: bool, action: &str, path: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(CliError::CommandFailed(format!("{} {}", action, path)))
    }
}

// ----------------------------------------------------------------------------
// File Commands
// ----------------------------------------------------------------------------

async fn list(ctx: &CommandContext, path: &str, json: bool) -> Result<()> {
    let mut entries = ctx.session.list_dir(path).await?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}", format_entry(entry));
        }
    }
    Ok(())
}

/// Directories get a trailing slash
pub fn format_entry(entry: &DeviceEntry) -> String {
    if entry.file {
        entry.name.clone()
    } else {
        format!("{}/", entry.name)
    }
}

async fn put(ctx: &CommandContext, local: &Path, device_path: Option<&str>) -> Result<()> {
    if local.is_dir() {
        let files = collect_local_files(local, &ctx.config.cli.upload_ignore)?;
        let root = device_path.unwrap_or(&ctx.config.cli.upload_root);
        info!("Uploading {} file(s) to {}", files.len(), root);

        let report = ctx.session.bulk_write(&files, root).await?;
        for path in &report.written {
            println!("{}", path);
        }
        for path in &report.skipped {
            warn!("Skipped {}: file too large", path);
        }
        for path in &report.failed {
            warn!("Failed to write {}", path);
        }
        if !report.is_complete() {
            return Err(CliError::CommandFailed(format!(
                "Uploading {} of {} file(s)",
                report.failed.len() + report.skipped.len(),
                files.len()
            )));
        }
        return Ok(());
    }

    let content = fs::read(local)?;
    let target = match device_path {
        Some(path) => path.to_string(),
        None => default_device_path(local, &ctx.config.cli.upload_root),
    };
    expect_success(
        ctx.session.write_file(&content, &target).await?,
        "Writing",
        &target,
    )?;
    println!("{}", target);
    Ok(())
}

/// Upload destination of a single file when none is given
pub fn default_device_path(local: &Path, upload_root: &str) -> String {
    let name = local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    join_device_path(upload_root, &name)
}

/// Every file below `root`, in path order, with `/`-separated relative
/// paths. Entries whose name is in `ignore` are skipped along with their
/// contents.
pub fn collect_local_files(root: &Path, ignore: &[String]) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    collect_into(root, "", ignore, &mut files)?;
    Ok(files)
}

fn collect_into(
    dir: &Path,
    prefix: &str,
    ignore: &[String],
    files: &mut Vec<LocalFile>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if ignore.iter().any(|ignored| *ignored == name) {
            debug!("Ignoring {}", entry.path().display());
            continue;
        }
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        if entry.file_type()?.is_dir() {
            collect_into(&entry.path(), &relative, ignore, files)?;
        } else {
            files.push(LocalFile::new(relative, fs::read(entry.path())?));
        }
    }
    Ok(())
}

async fn cat(ctx: &CommandContext, path: &str) -> Result<()> {
    let content = ctx
        .session
        .read_file(path)
        .await?
        .ok_or_else(|| CliError::NotFound(path.to_string()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&content)?;
    stdout.flush()?;
    Ok(())
}

// ----------------------------------------------------------------------------
// REPL Commands
// ----------------------------------------------------------------------------

async fn run(ctx: &CommandContext, script: &Path) -> Result<()> {
    let source = fs::read_to_string(script)?;
    ctx.sink.set_echo(true);
    let reply = ctx.session.run_script(&source).await;
    ctx.sink.set_echo(false);

    match reply? {
        Some(reply) if !is_device_error(&reply) => Ok(()),
        _ => Err(CliError::CommandFailed(format!("Running {}", script.display()))),
    }
}

async fn exec(ctx: &CommandContext, code: &str) -> Result<()> {
    let reply = ctx
        .session
        .run_script(code)
        .await?
        .ok_or_else(|| CliError::CommandFailed("Executing statement".to_string()))?;

    if is_device_error(&reply) {
        if let Some(detail) = extract_error(&reply) {
            eprint!("{}", detail);
        }
        return Err(CliError::CommandFailed("Executing statement".to_string()));
    }
    if let Some(output) = extract_output(&reply) {
        print!("{}", output);
    }
    Ok(())
}

/// Forward stdin lines to the friendly REPL until EOF. Ctrl-C is passed on
/// to the device as an interrupt.
async fn repl(ctx: &CommandContext) -> Result<()> {
    ctx.sink.set_echo(true);
    info!("Interactive REPL, Ctrl-D to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => ctx.session.terminal_input(&format!("{}\r", line)).await?,
                None => break,
            },
            interrupt = tokio::signal::ctrl_c() => {
                interrupt?;
                ctx.session.send_interrupt(b"\x03").await;
            }
        }
    }

    ctx.sink.set_echo(false);
    Ok(())
}

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use cirrus_apps::{install, Copier, FileInfo, FsCopier, InstallOutcome, InstallResult};
use cirrus_backend::{connect, Backend, StorageUrl};
use cirrus_types::ContentHasher;
use cirrus_vfs::StorageConfig;
use colored::Colorize;
use serde_json::json;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Install(args) => cmd_install(&cli.storage, args, format),
        Command::Cat(args) => cmd_cat(&cli.storage, args),
        Command::Hash(args) => cmd_hash(args, format),
        Command::Config => cmd_config(&cli.storage, format),
    }
}

/// Directory used when neither `--config` nor `--storage` is given.
pub const DEFAULT_DATA_DIR: &str = ".cirrus-data";

fn default_storage_url() -> anyhow::Result<String> {
    let root: PathBuf = std::env::current_dir()
        .context("cannot resolve the working directory")?
        .join(DEFAULT_DATA_DIR);
    Ok(format!("file://{}", root.display()))
}

/// Config file first, then flags on top. Without either, storage lives in
/// `./.cirrus-data` so that installs survive the process.
fn resolve_config(args: &StorageArgs) -> anyhow::Result<StorageConfig> {
    let mut config = match &args.config {
        Some(path) => StorageConfig::load(path)?,
        None if args.storage.is_none() => StorageConfig {
            fs_url: default_storage_url()?,
            ..StorageConfig::default()
        },
        None => StorageConfig::default(),
    };
    if let Some(url) = &args.storage {
        config.fs_url = url.clone();
    }
    if let Some(domain) = &args.domain {
        config.domain = domain.clone();
    }
    Ok(config)
}

fn open_backend(args: &StorageArgs) -> anyhow::Result<Arc<dyn Backend>> {
    let config = resolve_config(args)?;
    let url = config.url()?;
    match &url {
        StorageUrl::Swift { .. } => anyhow::bail!(
            "{} is not available from the command line: swift storage needs an object store client",
            config.fs_url
        ),
        StorageUrl::Mem => warn!("mem:// storage is discarded when the command exits"),
        StorageUrl::File(_) => {}
    }
    let backend = connect(&url, &config.domain, None)
        .with_context(|| format!("cannot open storage {}", config.fs_url))?;
    backend.init()?;
    Ok(backend)
}

/// Every regular file under `dir`, named relative to it with `/` separators.
fn bundle_files(dir: &Path) -> anyhow::Result<Vec<(FileInfo, std::path::PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir)?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata()?.len();
        files.push((FileInfo::new(name, size), entry.path().to_path_buf()));
    }
    Ok(files)
}

fn cmd_install(storage: &StorageArgs, args: InstallArgs, format: OutputFormat) -> anyhow::Result<()> {
    let files = bundle_files(&args.dir)
        .with_context(|| format!("cannot read bundle {}", args.dir.display()))?;
    let backend = open_backend(storage)?;
    let mut copier = FsCopier::new(backend);
    debug!(files = files.len(), slug = %args.slug, version = %args.version, "installing");

    let sources = files.into_iter().map(|(info, path)| -> InstallResult<_> {
        let file = File::open(&path)?;
        Ok((info, file))
    });
    let outcome = install(&mut copier, &args.slug, &args.version, sources)?;

    let target = format!("{}/{}", args.slug, args.version);
    match (format, outcome) {
        (OutputFormat::Json, InstallOutcome::Installed { files }) => {
            println!("{}", json!({ "app": target, "installed": true, "files": files }));
        }
        (OutputFormat::Json, InstallOutcome::AlreadyInstalled) => {
            println!("{}", json!({ "app": target, "installed": false }));
        }
        (OutputFormat::Text, InstallOutcome::Installed { files }) => {
            println!("{} Installed {} ({} files)", "✓".green().bold(), target.bold(), files);
        }
        (OutputFormat::Text, InstallOutcome::AlreadyInstalled) => {
            println!("{} already installed.", target.yellow());
        }
    }
    Ok(())
}

fn cmd_cat(storage: &StorageArgs, args: CatArgs) -> anyhow::Result<()> {
    let backend = open_backend(storage)?;
    let copier = FsCopier::new(backend);
    let data = copier.read_file(&args.slug, &args.version, &args.name)?;
    io::stdout().lock().write_all(&data)?;
    Ok(())
}

fn cmd_hash(args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    for path in &args.files {
        let mut file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let mut hasher = ContentHasher::new();
        io::copy(&mut file, &mut hasher)?;
        let hash = hasher.finalize();
        match format {
            OutputFormat::Json => println!(
                "{}",
                json!({ "path": path.display().to_string(), "hash": hash.to_hex(), "size": hasher.len() })
            ),
            OutputFormat::Text => {
                println!("{}  {:>10}  {}", hash.to_hex().cyan(), hasher.len(), path.display())
            }
        }
    }
    Ok(())
}

fn cmd_config(storage: &StorageArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = resolve_config(storage)?;
    let url = config.url()?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "fs_url": config.fs_url, "domain": config.domain, "scheme": url.scheme() })
        ),
        OutputFormat::Text => {
            println!("Storage: {} ({})", config.fs_url.bold(), url.scheme());
            println!("Domain:  {}", config.domain.yellow());
        }
    }
    Ok(())
}

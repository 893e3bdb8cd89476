use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use colored::Colorize;
use serde_json::json;
use strata_fs::LockFile;
use strata_fsck::{ObjectChecker, TransferConfig};
use strata_repo::{
    CacheConfig, RepositoryBuilder, RepositoryCache, RepositoryConfig, RepositoryHandle,
    RepositoryKey,
};
use strata_store::ObjectDatabase;
use strata_types::{ObjectId, ObjectKind};
use tracing::debug;

use crate::cli::*;

struct Context {
    format: OutputFormat,
    cache: RepositoryCache,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let cache_config = load_cache_config(cli.cache_config.as_deref())?;
    debug!(?cache_config, "repository cache");
    let ctx = Context {
        format: cli.format,
        cache: RepositoryCache::new(cache_config),
    };

    match cli.command {
        Command::Discover(args) => cmd_discover(&ctx, args),
        Command::Init(args) => cmd_init(&ctx, args),
        Command::Write(args) => cmd_write(&ctx, args),
        Command::Unlock(args) => cmd_unlock(&ctx, args),
        Command::FsckPolicy(args) => cmd_fsck_policy(&ctx, args),
        Command::CheckObject(args) => cmd_check_object(&ctx, args),
        Command::HashObject(args) => cmd_hash_object(&ctx, args),
    }
}

fn load_cache_config(path: Option<&Path>) -> anyhow::Result<CacheConfig> {
    let Some(path) = path else {
        return Ok(CacheConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading cache config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing cache config {}", path.display()))
}

fn current_dir() -> anyhow::Result<PathBuf> {
    std::env::current_dir().context("cannot determine the current directory")
}

/// Open the repository at `path`, or the one containing the current
/// directory, through the cache.
fn open_repo(ctx: &Context, path: Option<&Path>) -> anyhow::Result<RepositoryHandle> {
    let key = match path {
        Some(path) => RepositoryKey::lenient(path),
        None => {
            let start = current_dir()?;
            let builder = RepositoryBuilder::new().read_environment().find_git_dir(&start);
            match builder.get_git_dir() {
                Some(dir) => RepositoryKey::exact(dir),
                None => bail!("not a git repository: {}", start.display()),
            }
        }
    };
    Ok(ctx.cache.open(&key, true)?)
}

fn discover(start: &Path, ceilings: &[PathBuf]) -> anyhow::Result<RepositoryConfig> {
    let mut builder = RepositoryBuilder::new().read_environment();
    for ceiling in ceilings {
        builder = builder.ceiling_dir(ceiling);
    }
    let builder = builder.find_git_dir(start);
    if builder.get_git_dir().is_none() {
        bail!(
            "not a git repository (or any parent up to a ceiling): {}",
            start.display()
        );
    }
    Ok(builder.must_exist(true).setup()?)
}

fn cmd_discover(ctx: &Context, args: DiscoverArgs) -> anyhow::Result<()> {
    let start = match args.path {
        Some(path) => path,
        None => current_dir()?,
    };
    let layout = discover(&start, &args.ceilings)?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&layout)?),
        OutputFormat::Text => {
            println!("{} {}", "git dir:".bold(), layout.git_dir().display());
            match layout.work_tree() {
                Some(wt) => println!("{} {}", "work tree:".bold(), wt.display()),
                None => println!("{} {}", "work tree:".bold(), "(bare)".dimmed()),
            }
            println!("{} {}", "objects:".bold(), layout.object_dir().display());
            if let Some(index) = layout.index_file() {
                println!("{} {}", "index:".bold(), index.display());
            }
            for alt in layout.alternates() {
                println!("{} {}", "alternate:".bold(), alt.display());
            }
        }
    }
    Ok(())
}

fn init_repository(path: &Path, bare: bool) -> anyhow::Result<PathBuf> {
    let builder = if bare {
        RepositoryBuilder::new().git_dir(path).bare()
    } else {
        RepositoryBuilder::new()
            .git_dir(path.join(".git"))
            .work_tree(path)
    };
    let mut repo = builder.build()?;
    repo.create(bare)?;
    Ok(repo.git_dir().to_path_buf())
}

fn cmd_init(ctx: &Context, args: InitArgs) -> anyhow::Result<()> {
    let path = match args.path {
        Some(path) => path,
        None => current_dir()?,
    };
    let git_dir = init_repository(&path, args.bare)?;

    match ctx.format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "git_dir": git_dir, "bare": args.bare })
        ),
        OutputFormat::Text => {
            let mode = if args.bare { "bare " } else { "" };
            println!(
                "{} Initialized empty {}repository in {}",
                "✓".green().bold(),
                mode,
                git_dir.display().to_string().bold()
            );
        }
    }
    Ok(())
}

/// Replace `target` with `content` through a lock file. Returns `false`
/// when another writer holds the lock.
fn write_atomically(target: &Path, content: &[u8], append: bool, fsync: bool) -> anyhow::Result<bool> {
    let mut lock = LockFile::new(target);
    lock.set_fsync(fsync);
    let locked = if append {
        lock.lock_for_append()?
    } else {
        lock.lock()?
    };
    if !locked {
        return Ok(false);
    }
    lock.write(content)?;
    if !lock.commit()? {
        bail!("could not commit {}", target.display());
    }
    Ok(true)
}

fn cmd_write(ctx: &Context, args: WriteArgs) -> anyhow::Result<()> {
    let mut content = Vec::new();
    io::stdin()
        .read_to_end(&mut content)
        .context("reading stdin")?;
    if !write_atomically(&args.target, &content, args.append, args.fsync)? {
        bail!("{} is locked by another writer", args.target.display());
    }

    match ctx.format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "target": args.target, "bytes": content.len(), "append": args.append })
        ),
        OutputFormat::Text => println!(
            "{} Wrote {} bytes to {}",
            "✓".green().bold(),
            content.len(),
            args.target.display()
        ),
    }
    Ok(())
}

fn cmd_unlock(ctx: &Context, args: UnlockArgs) -> anyhow::Result<()> {
    let removed = LockFile::unlock_path(&args.target);
    match ctx.format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "target": args.target, "removed": removed })
        ),
        OutputFormat::Text if removed => {
            println!("{} Removed lock for {}", "✓".green().bold(), args.target.display())
        }
        OutputFormat::Text => println!("Could not remove lock for {}", args.target.display()),
    }
    Ok(())
}

fn print_policy(tc: &TransferConfig) {
    let on_off = |on: bool| if on { "on".green() } else { "off".dimmed() };
    println!("{:<28} {}", "fetch fsck", on_off(tc.is_fetch_fsck()));
    println!("{:<28} {}", "receive fsck", on_off(tc.is_receive_fsck()));
    if let Some(path) = tc.skip_list_path() {
        println!("{:<28} {}", "skip list", path.display());
    }
    if !tc.ignored().is_empty() {
        let names: Vec<_> = tc.ignored().iter().map(|t| t.name()).collect();
        println!("{:<28} {}", "ignored", names.join(", ").yellow());
    }
    println!("{:<28} {}", "allow ref in want", on_off(tc.is_allow_ref_in_want()));
    println!("{:<28} {}", "allow tip sha1 in want", on_off(tc.is_allow_tip_sha1_in_want()));
    println!(
        "{:<28} {}",
        "allow reachable sha1 in want",
        on_off(tc.is_allow_reachable_sha1_in_want())
    );
    println!("{:<28} {}", "allow filter", on_off(tc.is_allow_filter()));
    match tc.protocol_version() {
        Some(v) => println!("{:<28} {}", "protocol version", v),
        None => println!("{:<28} {}", "protocol version", "(unset)".dimmed()),
    }
    let filter = tc.ref_filter();
    if !filter.is_default() {
        println!("{:<28} {}", "hidden refs", filter.patterns().join(", "));
    }
}

fn cmd_fsck_policy(ctx: &Context, args: FsckPolicyArgs) -> anyhow::Result<()> {
    let repo = open_repo(ctx, args.path.as_deref())?;
    let tc = repo.transfer_config()?;
    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(tc)?),
        OutputFormat::Text => print_policy(tc),
    }
    Ok(())
}

fn receive_checker(ctx: &Context, repo: Option<&Path>) -> anyhow::Result<ObjectChecker> {
    let Some(path) = repo else {
        return Ok(ObjectChecker::default());
    };
    let repo = open_repo(ctx, Some(path))?;
    match repo.transfer_config()?.new_receive_object_checker() {
        Some(checker) => Ok(checker),
        None => {
            debug!(repo = %path.display(), "receive.fsckObjects is off, checking strictly");
            Ok(ObjectChecker::default())
        }
    }
}

fn cmd_check_object(ctx: &Context, args: CheckObjectArgs) -> anyhow::Result<()> {
    let data = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let checker = receive_checker(ctx, args.repo.as_deref())?;
    let id = args
        .kind
        .parse::<ObjectKind>()
        .ok()
        .map(|kind| ObjectId::hash_object(kind, &data));
    let result = checker.check_raw(id.as_ref(), &args.kind, &data);

    match (ctx.format, result) {
        (OutputFormat::Json, Ok(())) => {
            println!("{}", json!({ "id": id, "kind": args.kind, "valid": true }));
            Ok(())
        }
        (OutputFormat::Json, Err(e)) => {
            println!(
                "{}",
                json!({
                    "id": id,
                    "kind": args.kind,
                    "valid": false,
                    "error_type": e.error_type(),
                    "message": e.to_string(),
                })
            );
            bail!("object is invalid")
        }
        (OutputFormat::Text, Ok(())) => {
            let shown = id.map(|id| id.to_hex()).unwrap_or_default();
            println!("{} {} {}", "✓".green().bold(), args.kind, shown.yellow());
            Ok(())
        }
        (OutputFormat::Text, Err(e)) => {
            println!("{} {}", "✗".red().bold(), e);
            bail!("object is invalid")
        }
    }
}

fn cmd_hash_object(ctx: &Context, args: HashObjectArgs) -> anyhow::Result<()> {
    let kind: ObjectKind = args
        .kind
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown object type: {}", args.kind))?;
    let data = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;

    let id = if args.write {
        let repo = open_repo(ctx, args.repo.as_deref())?;
        let checker = repo.transfer_config()?.new_receive_object_checker();
        let (id, result) = repo
            .object_database()?
            .insert_checked(checker.as_ref(), kind, &data)?;
        debug!(%id, ?result, "stored object");
        id
    } else {
        ObjectId::hash_object(kind, &data)
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", json!({ "id": id, "written": args.write })),
        OutputFormat::Text => println!("{id}"),
    }
    Ok(())
}

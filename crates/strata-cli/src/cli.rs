use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Repository plumbing: discovery, atomic writes and object checks",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with repository cache timing (`expire_after`, `cleanup_delay`)
    #[arg(long, global = true)]
    pub cache_config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Find the repository containing a directory and show its layout
    Discover(DiscoverArgs),
    /// Create an empty repository
    Init(InitArgs),
    /// Atomically replace a file with stdin
    Write(WriteArgs),
    /// Remove a stale lock left next to a file
    Unlock(UnlockArgs),
    /// Show the effective object validation and advertisement policy
    FsckPolicy(FsckPolicyArgs),
    /// Validate an object file with the receive checker
    CheckObject(CheckObjectArgs),
    /// Compute an object id, optionally storing the object
    HashObject(HashObjectArgs),
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Directory to start from (default: current directory)
    pub path: Option<PathBuf>,
    /// Stop the search before entering this directory
    #[arg(long = "ceiling")]
    pub ceilings: Vec<PathBuf>,
}

#[derive(Args)]
pub struct InitArgs {
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub bare: bool,
}

#[derive(Args)]
pub struct WriteArgs {
    pub target: PathBuf,
    /// Keep the current content and add stdin after it
    #[arg(long)]
    pub append: bool,
    #[arg(long)]
    pub fsync: bool,
}

#[derive(Args)]
pub struct UnlockArgs {
    pub target: PathBuf,
}

#[derive(Args)]
pub struct FsckPolicyArgs {
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckObjectArgs {
    /// commit, tree, blob or tag
    pub kind: String,
    pub file: PathBuf,
    /// Repository whose receive policy applies
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Args)]
pub struct HashObjectArgs {
    pub file: PathBuf,
    /// Store the object in the repository
    #[arg(short = 'w')]
    pub write: bool,
    #[arg(short = 't', long = "type", default_value = "blob")]
    pub kind: String,
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_discover_with_ceilings() {
        let cli = Cli::try_parse_from([
            "strata", "discover", "/a/b/c", "--ceiling", "/a", "--ceiling", "/x",
        ])
        .unwrap();
        if let Command::Discover(args) = cli.command {
            assert_eq!(args.path, Some(PathBuf::from("/a/b/c")));
            assert_eq!(args.ceilings, vec![PathBuf::from("/a"), PathBuf::from("/x")]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_discover_defaults() {
        let cli = Cli::try_parse_from(["strata", "discover"]).unwrap();
        if let Command::Discover(args) = cli.command {
            assert!(args.path.is_none());
            assert!(args.ceilings.is_empty());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_init_bare() {
        let cli = Cli::try_parse_from(["strata", "init", "--bare", "/tmp/r.git"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert!(args.bare);
            assert_eq!(args.path, Some(PathBuf::from("/tmp/r.git")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_write_append() {
        let cli = Cli::try_parse_from(["strata", "write", "--append", "notes.txt"]).unwrap();
        if let Command::Write(args) = cli.command {
            assert!(args.append);
            assert!(!args.fsync);
            assert_eq!(args.target, PathBuf::from("notes.txt"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_unlock() {
        let cli = Cli::try_parse_from(["strata", "unlock", "HEAD"]).unwrap();
        assert!(matches!(cli.command, Command::Unlock(_)));
    }

    #[test]
    fn parse_fsck_policy() {
        let cli = Cli::try_parse_from(["strata", "fsck-policy", "/srv/repo"]).unwrap();
        if let Command::FsckPolicy(args) = cli.command {
            assert_eq!(args.path, Some(PathBuf::from("/srv/repo")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_check_object() {
        let cli =
            Cli::try_parse_from(["strata", "check-object", "tree", "t.bin", "--repo", "/r"]).unwrap();
        if let Command::CheckObject(args) = cli.command {
            assert_eq!(args.kind, "tree");
            assert_eq!(args.repo, Some(PathBuf::from("/r")));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_hash_object() {
        let cli = Cli::try_parse_from(["strata", "hash-object", "-w", "f.txt"]).unwrap();
        if let Command::HashObject(args) = cli.command {
            assert!(args.write);
            assert_eq!(args.kind, "blob");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_options() {
        let cli = Cli::try_parse_from([
            "strata", "--verbose", "--format", "json", "--cache-config", "c.toml", "discover",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.cache_config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["strata", "commit"]).is_err());
    }
}

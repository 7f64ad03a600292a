use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use gitstat_rs::summary::summarize;
use gitstat_rs::{Repo, ThreadPool};

/// Default cap on index size for the working-tree scan; larger indexes
/// report unstaged/untracked as unknown instead of paying for the scan.
const DEFAULT_DIRTY_MAX_INDEX_SIZE: usize = usize::MAX;

fn usage(exe: &str) -> String {
    format!(
        "usage: {exe} [--threads=N] [--dirty-max-index-size=N] [<dir>]\n\
         \n\
         Prints a one-shot status summary of the repository containing <dir>\n\
         (default: the current directory) as key=value lines."
    )
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut args = env::args_os();
    let exe = args
        .next()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gitstat".to_string());
    let mut threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let mut dirty_max_index_size = DEFAULT_DIRTY_MAX_INDEX_SIZE;
    let mut dir: Option<PathBuf> = None;

    for arg in args {
        let text = arg.to_string_lossy();
        if let Some(value) = text.strip_prefix("--threads=") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => threads = n,
                _ => {
                    eprintln!("invalid --threads value: {value}");
                    return ExitCode::from(2);
                }
            }
        } else if let Some(value) = text.strip_prefix("--dirty-max-index-size=") {
            match value.parse::<usize>() {
                Ok(n) => dirty_max_index_size = n,
                Err(_) => {
                    eprintln!("invalid --dirty-max-index-size value: {value}");
                    return ExitCode::from(2);
                }
            }
        } else if text == "--help" || text == "-h" {
            eprintln!("{}", usage(&exe));
            return ExitCode::SUCCESS;
        } else if text.starts_with("--") {
            eprintln!("unknown flag: {text}");
            eprintln!("{}", usage(&exe));
            return ExitCode::from(2);
        } else {
            dir = Some(PathBuf::from(arg));
        }
    }

    let dir = dir.unwrap_or_else(|| PathBuf::from("."));
    let pool = Arc::new(ThreadPool::new(threads));

    let repo = match Repo::open(&dir, pool) {
        Ok(Some(repo)) => repo,
        Ok(None) => {
            eprintln!("{}: not a git repository", dir.display());
            return ExitCode::FAILURE;
        }
        Err(err) => {
            eprintln!("{}: {err}", dir.display());
            return ExitCode::FAILURE;
        }
    };
    let mut repo = repo;

    let summary = match summarize(&mut repo, dirty_max_index_size) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("{}: {err}", dir.display());
            return ExitCode::FAILURE;
        }
    };

    println!("branch={}", summary.branch);
    match summary.head_oid {
        Some(oid) => println!("head={oid}"),
        None => println!("head="),
    }
    match &summary.upstream {
        Some(up) => {
            println!("upstream={}", up.branch);
            println!("remote_url={}", up.remote_url);
        }
        None => {
            println!("upstream=");
            println!("remote_url=");
        }
    }
    println!("ahead={}", summary.ahead);
    println!("behind={}", summary.behind);
    println!("stashes={}", summary.stashes);
    println!("state={}", summary.state);
    println!("tag={}", summary.tag);
    println!("staged={}", if summary.stats.has_staged { "true" } else { "false" });
    println!("unstaged={}", summary.stats.has_unstaged.as_str());
    println!("untracked={}", summary.stats.has_untracked.as_str());

    ExitCode::SUCCESS
}

//! Query CLI: plans a pattern against the trigram index, then verifies
//! each candidate file line by line.
//!
//! Exit codes follow grep: 0 if anything matched, 1 if nothing did, 2 on
//! error.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, warn};
use rayon::prelude::*;

use trigrep::glob::PathFilter;
use trigrep::pattern::{search_lines, LineMatch, Matcher, Mode};
use trigrep::plan::Plan;
use trigrep::reader::{locate_index_dir, IndexReader};

/// Below this many candidates, verification stays on one thread.
const PARALLEL_VERIFY_THRESHOLD: usize = 10;

#[derive(Parser)]
#[command(name = "trigrep")]
#[command(about = "Search the trigram index like grep, without the scan")]
#[command(version)]
struct Cli {
    /// Pattern to search for
    pattern: String,

    /// Interpret the pattern as a fixed string (default)
    #[arg(short = 'F', long = "fixed-strings")]
    fixed: bool,

    /// Interpret the pattern as a basic regular expression
    #[arg(short = 'G', long = "basic-regexp", conflicts_with = "fixed")]
    basic: bool,

    /// Interpret the pattern as an extended regular expression
    #[arg(
        short = 'E',
        long = "extended-regexp",
        conflicts_with_all = ["fixed", "basic"]
    )]
    extended: bool,

    /// Case-insensitive matching (byte-wise ASCII)
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    /// Print only the names of matching files
    #[arg(short = 'l', long = "files-with-matches")]
    files_with_matches: bool,

    /// Only search files whose basename matches GLOB (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Skip files whose basename matches GLOB (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Index directory; found in the nearest ancestor if omitted
    #[arg(short = 'd', long = "index-dir", value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let mode = match (cli.fixed, cli.basic, cli.extended) {
        (_, _, true) => Mode::Extended,
        (_, true, _) => Mode::Basic,
        _ => Mode::Fixed,
    };
    let case_sensitive = !cli.ignore_case;

    let index_dir = match &cli.index_dir {
        Some(dir) => dir.clone(),
        None => locate_index_dir(&std::env::current_dir()?)?,
    };
    let mut reader = IndexReader::open(&index_dir)?;

    let plan = match mode {
        Mode::Fixed => Plan::parse_fixed(cli.pattern.as_bytes(), case_sensitive),
        Mode::Basic => Plan::parse_regex(cli.pattern.as_bytes(), false, case_sensitive)?,
        Mode::Extended => Plan::parse_regex(cli.pattern.as_bytes(), true, case_sensitive)?,
    };
    let candidates = plan.find_ids(&mut reader)?;
    debug!(
        "{} candidate files of {}",
        candidates.len(),
        reader.file_count()
    );

    let filter = PathFilter::new(&cli.include, &cli.exclude, cli.ignore_case)?;
    let matcher = Matcher::new(&cli.pattern, mode, case_sensitive)?;

    let paths: Vec<&str> = candidates
        .iter()
        .filter_map(|id| reader.file(id))
        .filter(|path| filter.matches(path))
        .collect();

    let limit = if cli.files_with_matches { 1 } else { usize::MAX };

    // Indexed paths are stored as given to the indexer; relative ones are
    // anchored at the index directory's parent.
    let base = index_dir.parent().unwrap_or(Path::new("")).to_path_buf();

    // Candidate sets are usually small; above the threshold, verify in
    // parallel. Collected results keep candidate (id) order either way.
    let verified: Vec<Vec<LineMatch>> = if paths.len() >= PARALLEL_VERIFY_THRESHOLD {
        paths
            .par_iter()
            .map(|path| verify(path, &base, &matcher, limit))
            .collect()
    } else {
        paths
            .iter()
            .map(|path| verify(path, &base, &matcher, limit))
            .collect()
    };

    let mut matched = false;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for matches in verified {
        for m in matches {
            matched = true;
            if cli.files_with_matches {
                writeln!(out, "{}", m.file)?;
            } else {
                writeln!(out, "{}:{}:{}", m.file, m.line, m.text)?;
            }
        }
    }
    Ok(matched)
}

/// Read one candidate and collect its verified matches. Unreadable files
/// are reported and skipped, matching the indexer's per-file policy.
fn verify(path: &str, base: &Path, matcher: &Matcher, limit: usize) -> Vec<LineMatch> {
    let resolved = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };
    match fs::read(&resolved) {
        Ok(content) => search_lines(path, &content, matcher, limit),
        Err(e) => {
            warn!("{path}: {e}");
            Vec::new()
        }
    }
}

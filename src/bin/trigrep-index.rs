//! Index builder CLI: reads a list of paths, tokenizes each file into
//! trigrams and writes the index directory.
//!
//! One producer thread feeds cleaned paths into a bounded queue; the main
//! thread consumes, indexes and flushes chunks when the memory budget is
//! reached. Exit codes: 0 success, 1 fatal indexer error, 2 producer error.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use log::debug;
use parking_lot::Mutex;

use trigrep::error::Error;
use trigrep::file_list::FileList;
use trigrep::format::{FILE_LIST, INDEX_DIR};
use trigrep::indexer::Indexer;
use trigrep::queue::WorkQueue;

#[derive(Parser)]
#[command(name = "trigrep-index")]
#[command(about = "Generate a trigram index for trigrep")]
#[command(version)]
struct Cli {
    /// File containing the list of paths to index, one per line.
    /// Reads standard input if omitted.
    #[arg(value_name = "LIST")]
    list: Option<PathBuf>,

    /// Reindex the files recorded in the existing index
    #[arg(short, long)]
    update: bool,

    /// In-memory budget in MiB before flushing a chunk to disk
    #[arg(long = "chunk-size", value_name = "MB", default_value_t = 64)]
    chunk_size: usize,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print nothing but fatal errors
    #[arg(short, long)]
    quiet: bool,

    /// Suppress per-file error messages
    #[arg(short = 's', long = "no-messages")]
    no_messages: bool,
}

/// What the producer thread reads paths from.
enum Input {
    Stdin,
    File(PathBuf),
    List(Vec<String>),
}

/// Serializes progress output between the producer and consumer. Progress
/// lines overwrite themselves with a carriage return; normal lines clear
/// any pending progress first.
struct Printer {
    state: Mutex<usize>,
    progress_enabled: bool,
}

impl Printer {
    fn new(progress_enabled: bool) -> Self {
        Printer {
            state: Mutex::new(0),
            progress_enabled,
        }
    }

    fn progress(&self, msg: &str) {
        if !self.progress_enabled {
            return;
        }
        let mut last_len = self.state.lock();
        let pad = last_len.saturating_sub(msg.len());
        eprint!("\r{msg}{:pad$}", "");
        let _ = io::stderr().flush();
        *last_len = msg.len();
    }

    fn line(&self, msg: &str) {
        let mut last_len = self.state.lock();
        if *last_len > 0 {
            eprint!("\r{:width$}\r", "", width = *last_len);
            *last_len = 0;
        }
        eprintln!("{msg}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let index_dir = PathBuf::from(INDEX_DIR);
    let chunk_budget = cli.chunk_size * 1024 * 1024;
    let show_progress = !cli.quiet;

    let input = if let Some(list) = &cli.list {
        debug!("reading list from file {}", list.display());
        Input::File(list.clone())
    } else if cli.update {
        debug!("updating existing index");
        // Read the old file list before the indexer truncates it.
        let existing = FileList::read(&index_dir.join(FILE_LIST))
            .context("no existing index to update")?;
        Input::List(existing.iter().map(str::to_string).collect())
    } else {
        debug!("reading list from standard input");
        Input::Stdin
    };

    let mut indexer = Indexer::open(&index_dir).context("cannot open index directory")?;

    let queue: Arc<WorkQueue<String>> = Arc::new(WorkQueue::new(1024));
    let stop = Arc::new(AtomicBool::new(false));
    let printer = Arc::new(Printer::new(show_progress));

    let producer = {
        let queue = Arc::clone(&queue);
        let stop = Arc::clone(&stop);
        thread::spawn(move || produce(input, &queue, &stop))
    };

    let start = Instant::now();
    let mut last_tick = start;
    let mut files_seen: u64 = 0;
    let mut skipped: u64 = 0;
    let mut fatal: Option<Error> = None;

    printer.progress("indexing...");

    while let Some(path) = queue.get() {
        files_seen += 1;

        if last_tick.elapsed() >= Duration::from_secs(1) {
            let rate = indexer.stats().files_indexed as f64 / start.elapsed().as_secs_f64();
            printer.progress(&format!(
                "indexing file {files_seen} ({rate:.0} files/sec): {path}"
            ));
            last_tick = Instant::now();
        }

        match indexer.index_file(&path) {
            Ok(true) => {}
            Ok(false) => skipped += 1,
            Err(Error::File { path, source }) => {
                skipped += 1;
                if !cli.no_messages && !cli.quiet {
                    printer.line(&format!("{}: {source}", path.display()));
                }
            }
            Err(e) => {
                fatal = Some(e);
            }
        }

        if fatal.is_none() && indexer.buffered_size() >= chunk_budget {
            printer.progress("writing chunk to database...");
            if let Err(e) = indexer.write_chunk() {
                fatal = Some(e);
            }
        }

        if fatal.is_some() {
            // Unblock and stop the producer, then drain for a clean join.
            stop.store(true, Ordering::Relaxed);
            while queue.get().is_some() {}
            break;
        }
    }

    let producer_result = producer
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("producer thread panicked")));

    if let Some(e) = fatal {
        return Err(e.into());
    }

    printer.progress("merging chunks...");
    let stats = indexer.finish().context("cannot finish index")?;

    if !cli.quiet {
        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let merged = if stats.chunks_written > 1 {
            format!("{} chunks (merged to 1)", stats.chunks_written)
        } else {
            "1 chunk".to_string()
        };
        printer.line("done");
        printer.line(&format!(
            " - files:    indexed {} ({}), skipped {}, total {}",
            stats.files_indexed,
            human_size(stats.bytes_indexed as f64),
            skipped,
            files_seen
        ));
        printer.line(&format!(
            " - speed:    {:.1} files/sec, {}/sec",
            stats.files_indexed as f64 / elapsed,
            human_size(stats.bytes_indexed as f64 / elapsed)
        ));
        printer.line(&format!(" - time:     {elapsed:.3} sec"));
        printer.line(&format!(
            " - database: {} in {merged}",
            human_size(stats.database_bytes as f64)
        ));
    }

    if let Err(e) = producer_result {
        printer.line(&format!("error: {e:#}"));
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

/// Producer: read paths, normalize them, drop anything inside the index
/// directory, enqueue the rest. Always signals `done`, even on error.
fn produce(input: Input, queue: &WorkQueue<String>, stop: &AtomicBool) -> anyhow::Result<()> {
    let result = (|| -> anyhow::Result<()> {
        match input {
            Input::Stdin => {
                for line in io::stdin().lock().lines() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    enqueue(&line?, queue);
                }
            }
            Input::File(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("cannot open list file {}", path.display()))?;
                for line in BufReader::new(file).lines() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    enqueue(&line?, queue);
                }
            }
            Input::List(paths) => {
                for path in paths {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    enqueue(&path, queue);
                }
            }
        }
        Ok(())
    })();
    queue.done();
    result
}

fn enqueue(line: &str, queue: &WorkQueue<String>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let cleaned = clean_path(line);
    if inside_index_dir(&cleaned) {
        return;
    }
    queue.put(cleaned);
}

/// Lexical path cleanup: strips `.` components and duplicate separators.
fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => parts.push(".."),
            Component::Normal(p) => {
                if let Some(s) = p.to_str() {
                    parts.push(s);
                }
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    let joined = parts.join("/");
    let mut out = String::new();
    if path.starts_with('/') {
        out.push('/');
    }
    out.push_str(&joined);
    if out.is_empty() {
        ".".to_string()
    } else {
        out
    }
}

fn inside_index_dir(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| matches!(c, Component::Normal(p) if p == INDEX_DIR))
}

fn human_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

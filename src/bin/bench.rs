//! blobstore Benchmark Binary
//!
//! Writes N random blobs into each selected backend, reads them back and
//! reports throughput for both passes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use blobstore::{BackendKind, BlobError, BlobStore, Config, Key, Store};
use clap::{Parser, ValueEnum};
use rand::RngCore;
use tracing_subscriber::{fmt, EnvFilter};

/// blobstore benchmark driver
#[derive(Parser, Debug)]
#[command(name = "blobstore-bench")]
#[command(about = "Measure create and read throughput of the blobstore backends")]
#[command(version)]
struct Args {
    /// Existing directory to benchmark in
    device: PathBuf,

    /// Number of blobs to write
    #[arg(short = 'n', long, default_value = "1000")]
    count: usize,

    /// Size of each blob in KiB
    #[arg(short = 's', long, default_value = "4")]
    size_kb: usize,

    /// Backend(s) to benchmark
    #[arg(short, long, value_enum, default_value = "all")]
    backend: BackendChoice,

    /// Worker threads for each pass
    #[arg(short, long, default_value = "1")]
    threads: usize,

    /// Keep the per-backend directories afterwards
    #[arg(long)]
    keep: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    LocalFs,
    Memmap,
    All,
}

impl BackendChoice {
    fn kinds(self) -> Vec<BackendKind> {
        match self {
            BackendChoice::LocalFs => vec![BackendKind::LocalFs],
            BackendChoice::Memmap => vec![BackendKind::MemMap],
            BackendChoice::All => vec![BackendKind::LocalFs, BackendKind::MemMap],
        }
    }
}

/// Why a backend run was aborted
#[derive(Debug, thiserror::Error)]
enum BenchError {
    #[error(transparent)]
    Store(#[from] BlobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error("only {done} of {expected} blobs were created")]
    Incomplete { done: usize, expected: usize },
}

/// Outcome of one backend run
#[derive(Debug)]
enum RunOutcome {
    Verified,
    Mismatch(usize),
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(msg) = validate(&args) {
        tracing::error!("{}", msg);
        std::process::exit(2);
    }

    tracing::info!("blobstore-bench v{}", blobstore::VERSION);
    tracing::info!(
        "Device: {} | {} blobs x {} KiB | {} thread(s)",
        args.device.display(),
        args.count,
        args.size_kb,
        args.threads
    );

    let payloads = generate_payloads(args.count, args.size_kb * 1024);

    let mut failed = false;
    for kind in args.backend.kinds() {
        let dir = args.device.join(dir_name(kind));
        match run_backend(kind, &dir, &payloads, args.threads) {
            Ok(RunOutcome::Verified) => {}
            Ok(RunOutcome::Mismatch(count)) => {
                tracing::error!("{:?}: {} blob(s) failed verification", kind, count);
                failed = true;
            }
            Err(e) => {
                tracing::error!("{:?}: benchmark aborted: {}", kind, e);
                failed = true;
            }
        }

        if !args.keep {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

fn validate(args: &Args) -> Result<(), String> {
    if !args.device.is_dir() {
        return Err(format!(
            "{} does not exist or is not a directory",
            args.device.display()
        ));
    }
    if args.count == 0 {
        return Err("--count must be greater than zero".into());
    }
    if args.size_kb == 0 {
        return Err("--size-kb must be greater than zero".into());
    }
    if args.threads == 0 {
        return Err("--threads must be greater than zero".into());
    }
    Ok(())
}

fn dir_name(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::LocalFs => "local-fs",
        BackendKind::MemMap => "memmap",
    }
}

fn generate_payloads(count: usize, size: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut payload = vec![0u8; size];
            rng.fill_bytes(&mut payload);
            payload
        })
        .collect()
}

fn run_backend(
    kind: BackendKind,
    dir: &Path,
    payloads: &[Vec<u8>],
    threads: usize,
) -> Result<RunOutcome, BenchError> {
    // Start from an empty directory every run
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }

    let config = Config::builder().root_dir(dir).backend(kind).build();
    let store = Store::connect(&config)?;
    let total_bytes: usize = payloads.iter().map(Vec::len).sum();

    // Create pass
    let start = Instant::now();
    let created = run_parallel(payloads, threads, |key, payload| {
        store.create(key, payload).map(|_| true)
    })?;
    store.sync()?;
    report(kind, "create", created, total_bytes, start.elapsed());
    if created != payloads.len() {
        return Err(BenchError::Incomplete {
            done: created,
            expected: payloads.len(),
        });
    }

    // Verification pass
    let start = Instant::now();
    let verified = run_parallel(payloads, threads, |key, payload| {
        let mut buf = vec![0u8; payload.len()];
        store.get_all(key, &mut buf)?;
        Ok(buf == *payload)
    })?;
    report(kind, "get_all", payloads.len(), total_bytes, start.elapsed());

    if verified == payloads.len() {
        Ok(RunOutcome::Verified)
    } else {
        Ok(RunOutcome::Mismatch(payloads.len() - verified))
    }
}

/// Apply `op` to every payload (key = index) across `threads` workers
///
/// Returns how many calls returned `Ok(true)`. The first error, or a
/// panicking worker, fails the whole pass.
fn run_parallel<F>(payloads: &[Vec<u8>], threads: usize, op: F) -> Result<usize, BenchError>
where
    F: Fn(Key, &[u8]) -> blobstore::Result<bool> + Sync,
{
    let chunk_size = payloads.len().div_ceil(threads);

    let results = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = payloads
            .chunks(chunk_size)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let op = &op;
                s.spawn(move |_| -> blobstore::Result<usize> {
                    let mut ok = 0;
                    for (i, payload) in chunk.iter().enumerate() {
                        let key = Key((chunk_idx * chunk_size + i) as u64);
                        if op(key, payload.as_slice())? {
                            ok += 1;
                        }
                    }
                    Ok(ok)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| BenchError::WorkerPanicked))
            .collect::<Vec<_>>()
    })
    .map_err(|_| BenchError::WorkerPanicked)?;

    let mut total = 0;
    for result in results {
        total += result??;
    }
    Ok(total)
}

fn report(kind: BackendKind, pass: &str, count: usize, bytes: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let mb_per_sec = if secs > 0.0 {
        bytes as f64 / (1024.0 * 1024.0) / secs
    } else {
        f64::INFINITY
    };
    tracing::info!(
        "{:?} {}: {} blobs in {:.3}s ({:.1} MB/s)",
        kind,
        pass,
        count,
        secs,
        mb_per_sec
    );
    println!(
        "{:<8} {:<8} {:>8} blobs {:>10.3} s {:>10.1} MB/s",
        dir_name(kind),
        pass,
        count,
        secs,
        mb_per_sec
    );
}

use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blob_store::LocalBlobStore;
use fs2::FileExt;
use fs_meta::SqliteMetaStore;
use fs_service::{OrphanReclaimer, DEFAULT_RECLAIM_BATCH_SIZE};
use log::{error, info};

const DEFAULT_DB_FILE: &str = "fs_meta.db";
const LOCK_FILE_NAME: &str = "gc.lock";

struct GcRunOptions {
    store_root: PathBuf,
    db_path: Option<PathBuf>,
    batch_size: u32,
    grace_secs: u64,
    interval_secs: Option<u64>,
}

fn usage() -> String {
    format!(
        "usage: fs_gc <store-root> [--db <path>] [--batch-size <n>] [--grace-secs <n>] [--interval-secs <n>]\n\
         defaults:\n\
         --db <store-root>/{}\n\
         --batch-size {}\n\
         --grace-secs 0\n\
         without --interval-secs a single sweep runs and the process exits",
        DEFAULT_DB_FILE, DEFAULT_RECLAIM_BATCH_SIZE
    )
}

fn parse_args() -> Result<GcRunOptions, String> {
    let args = env::args().skip(1).collect::<Vec<String>>();
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" {
        return Err(usage());
    }

    let store_root = PathBuf::from(args[0].clone());
    let mut db_path = None;
    let mut batch_size = DEFAULT_RECLAIM_BATCH_SIZE;
    let mut grace_secs = 0u64;
    let mut interval_secs = None;

    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --db".to_string())?;
                db_path = Some(PathBuf::from(value));
            }
            "--batch-size" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --batch-size".to_string())?;
                batch_size = value
                    .parse()
                    .map_err(|_| format!("invalid --batch-size: {}", value))?;
            }
            "--grace-secs" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --grace-secs".to_string())?;
                grace_secs = value
                    .parse()
                    .map_err(|_| format!("invalid --grace-secs: {}", value))?;
            }
            "--interval-secs" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "missing value for --interval-secs".to_string())?;
                interval_secs = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --interval-secs: {}", value))?,
                );
            }
            other => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
        }
        i += 1;
    }

    Ok(GcRunOptions {
        store_root,
        db_path,
        batch_size,
        grace_secs,
        interval_secs,
    })
}

fn main() {
    env_logger::init();
    let options = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };

    if let Err(err) = run_gc(options) {
        error!("run fs_gc failed: {}", err);
        eprintln!("fs_gc failed: {}", err);
        std::process::exit(1);
    }
}

fn run_gc(options: GcRunOptions) -> Result<(), String> {
    std::fs::create_dir_all(&options.store_root)
        .map_err(|e| format!("create store root failed: {}", e))?;

    // One sweep per store at a time.
    let lock_path = options.store_root.join(LOCK_FILE_NAME);
    let lock_file =
        File::create(&lock_path).map_err(|e| format!("open lock file failed: {}", e))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| "another sweep is already running for this store".to_string())?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("start runtime failed: {}", e))?;

    runtime.block_on(async move {
        let db_path = options
            .db_path
            .clone()
            .unwrap_or_else(|| options.store_root.join(DEFAULT_DB_FILE));
        let meta =
            Arc::new(SqliteMetaStore::open(&db_path).map_err(|e| e.to_string())?);
        let blobs = Arc::new(
            LocalBlobStore::open(options.store_root.clone())
                .await
                .map_err(|e| e.to_string())?,
        );
        let reclaimer = OrphanReclaimer::new(meta, blobs)
            .with_batch_size(options.batch_size)
            .with_grace(Duration::from_secs(options.grace_secs));

        match options.interval_secs {
            None => {
                let stats = reclaimer
                    .cleanup_in_batches()
                    .await
                    .map_err(|e| e.to_string())?;
                info!(
                    "orphan sweep done: scanned={}, reclaimed={}, failed={}, resurrected={}",
                    stats.scanned, stats.reclaimed, stats.failed, stats.resurrected
                );
                println!(
                    "reclaimed {} of {} orphan blobs ({} failed, {} resurrected)",
                    stats.reclaimed, stats.scanned, stats.failed, stats.resurrected
                );
                Ok(())
            }
            Some(secs) => {
                info!("running periodic sweep every {}s", secs);
                let worker = OrphanReclaimer::spawn_worker(
                    Arc::new(reclaimer),
                    Duration::from_secs(secs),
                );
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|e| format!("wait for ctrl-c failed: {}", e))?;
                worker.abort();
                info!("periodic sweep stopped");
                Ok(())
            }
        }
    })
}

//! Parallel decode driver (§4.D): schedules a batch of `.datc64` decodes
//! across worker threads that communicate only by message, never by
//! shared memory (§9 Design Note), with mtime-based decode caching and a
//! stall detector.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::Schema;
use crate::table::decode::derive_table_name;

const EMPTY_FILE_LIMIT: u64 = 0;
const TOO_LARGE_LIMIT: u64 = 100 * 1024 * 1024;
const STALL_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("a worker thread panicked mid-batch")]
    WorkerCrashed,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub filter: Option<String>,
    pub limit: Option<usize>,
    pub concurrency: usize,
    pub use_cache: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            filter: None,
            limit: None,
            concurrency: default_concurrency(),
            use_cache: true,
        }
    }
}

/// `max(1, cpu_count - 1)`, per §4.D.
pub fn default_concurrency() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

#[derive(Debug, Clone)]
pub enum TaskStatus {
    Decoded { row_count: usize, warning: Option<String> },
    Cached,
    Skipped(&'static str),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub input: PathBuf,
    pub table: String,
    pub status: TaskStatus,
}

#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<TaskResult>,
    pub elapsed_ms: u128,
}

enum WorkerMsg {
    Init { schema: Arc<Schema>, product_bit: u32 },
    Batch { tasks: Vec<PathBuf>, output_dir: PathBuf, check_cache: bool },
}

enum WorkerEvent {
    Ready,
    Progress { worker_id: usize, table: String, starting: bool },
    BatchResult { worker_id: usize, results: Vec<TaskResult> },
    WorkerPanic { worker_id: usize },
}

/// Decode every recognised `.datc64` file under `input_dir` into JSON
/// files under `output_dir`, using a dedicated worker pool.
pub fn run_batch(
    input_dir: &Path,
    output_dir: &Path,
    schema: Arc<Schema>,
    product_bit: u32,
    options: DriverOptions,
) -> Result<BatchReport, DriverError> {
    let start = Instant::now();
    std::fs::create_dir_all(output_dir)?;

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("datc64"))
        .collect();

    if let Some(pattern) = &options.filter {
        if let Ok(re) = regex::Regex::new(pattern) {
            files.retain(|p| re.is_match(&p.to_string_lossy()));
        }
    }
    if let Some(limit) = options.limit {
        files.truncate(limit);
    }

    let worker_count = options.concurrency.max(1).min(files.len().max(1));
    let batches = partition_ceiling(files, worker_count);

    let (event_tx, event_rx): (Sender<WorkerEvent>, Receiver<WorkerEvent>) = unbounded();
    let mut worker_senders = Vec::with_capacity(batches.len());
    let mut handles = Vec::with_capacity(batches.len());

    for (worker_id, batch) in batches.into_iter().enumerate() {
        let (msg_tx, msg_rx): (Sender<WorkerMsg>, Receiver<WorkerMsg>) = unbounded();
        let tx = event_tx.clone();
        let handle = std::thread::spawn(move || worker_loop(worker_id, msg_rx, tx));
        worker_senders.push((msg_tx, batch));
        handles.push(handle);
    }

    for (tx, _) in &worker_senders {
        let _ = tx.send(WorkerMsg::Init { schema: schema.clone(), product_bit });
    }
    // Wait for every worker to acknowledge readiness before dispatching.
    let mut ready = 0;
    while ready < worker_senders.len() {
        match event_rx.recv() {
            Ok(WorkerEvent::Ready) => ready += 1,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    for (tx, batch) in worker_senders {
        let _ = tx.send(WorkerMsg::Batch {
            tasks: batch,
            output_dir: output_dir.to_path_buf(),
            check_cache: options.use_cache,
        });
    }

    let mut results = Vec::new();
    let mut done_workers = 0;
    let mut last_progress = HashMap::new();
    let mut in_flight: HashMap<usize, String> = HashMap::new();
    let total_workers = handles.len();

    loop {
        match event_rx.recv_timeout(Duration::from_secs(1)) {
            Ok(WorkerEvent::Ready) => {}
            Ok(WorkerEvent::Progress { worker_id, table, starting }) => {
                last_progress.insert(worker_id, Instant::now());
                if starting {
                    in_flight.insert(worker_id, table);
                } else {
                    in_flight.remove(&worker_id);
                }
            }
            Ok(WorkerEvent::BatchResult { results: r, .. }) => {
                results.extend(r);
                done_workers += 1;
                if done_workers >= total_workers {
                    break;
                }
            }
            Ok(WorkerEvent::WorkerPanic { worker_id }) => {
                warn!(worker_id, "worker thread crashed mid-batch");
                return Err(DriverError::WorkerCrashed);
            }
            Err(_) => {
                // Timed out: check for a stall among in-flight tasks.
                for (worker_id, table) in &in_flight {
                    if let Some(last) = last_progress.get(worker_id) {
                        if last.elapsed() >= STALL_THRESHOLD {
                            warn!(worker_id, table = %table, "SLOW: no progress for 5s");
                        }
                    }
                }
                if done_workers >= total_workers {
                    break;
                }
            }
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    Ok(BatchReport { results, elapsed_ms: start.elapsed().as_millis() })
}

fn partition_ceiling<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let parts = parts.max(1);
    let chunk_size = (items.len() + parts - 1) / parts;
    let mut out = Vec::new();
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = (&mut iter).take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        out.push(chunk);
    }
    out
}

fn worker_loop(worker_id: usize, msg_rx: Receiver<WorkerMsg>, event_tx: Sender<WorkerEvent>) {
    let mut schema: Option<Arc<Schema>> = None;
    let mut product_bit = crate::schema::DEFAULT_PRODUCT_BIT;

    for msg in msg_rx.iter() {
        match msg {
            WorkerMsg::Init { schema: s, product_bit: pb } => {
                schema = Some(s);
                product_bit = pb;
                let _ = event_tx.send(WorkerEvent::Ready);
            }
            WorkerMsg::Batch { tasks, output_dir, check_cache } => {
                let Some(schema) = schema.as_ref() else {
                    let _ = event_tx.send(WorkerEvent::BatchResult { worker_id, results: Vec::new() });
                    continue;
                };
                let tables = schema.tables_for_product(product_bit);
                let mut results = Vec::with_capacity(tasks.len());
                let mut crashed = false;

                for input in tasks {
                    let table_name = derive_table_name(&input.to_string_lossy());
                    let _ = event_tx.send(WorkerEvent::Progress {
                        worker_id,
                        table: table_name.clone(),
                        starting: true,
                    });

                    let table_def = tables.get(&table_name).copied();
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        decode_one(&input, &output_dir, &table_name, table_def, check_cache)
                    }));

                    let _ = event_tx.send(WorkerEvent::Progress {
                        worker_id,
                        table: table_name.clone(),
                        starting: false,
                    });

                    match outcome {
                        Ok(status) => results.push(TaskResult { input, table: table_name, status }),
                        Err(_) => {
                            let _ = event_tx.send(WorkerEvent::WorkerPanic { worker_id });
                            crashed = true;
                            break;
                        }
                    }
                }

                if !crashed {
                    let _ = event_tx.send(WorkerEvent::BatchResult { worker_id, results });
                }
            }
        }
    }
}

fn decode_one(
    input: &Path,
    output_dir: &Path,
    table_name: &str,
    table_def: Option<&crate::schema::TableDef>,
    check_cache: bool,
) -> TaskStatus {
    let metadata = match std::fs::metadata(input) {
        Ok(m) => m,
        Err(e) => return TaskStatus::Failed(e.to_string()),
    };
    if metadata.len() == EMPTY_FILE_LIMIT {
        return TaskStatus::Skipped("empty");
    }
    if metadata.len() > TOO_LARGE_LIMIT {
        return TaskStatus::Skipped("too large");
    }

    let Some(table_def) = table_def else {
        return TaskStatus::Skipped("no schema");
    };

    let output_path = output_dir.join(format!("{table_name}.json"));
    if check_cache {
        if let Ok(out_meta) = std::fs::metadata(&output_path) {
            if let (Ok(out_mtime), Ok(in_mtime)) = (out_meta.modified(), metadata.modified()) {
                if out_mtime >= in_mtime {
                    return TaskStatus::Cached;
                }
            }
        }
    }

    let bytes = match std::fs::read(input) {
        Ok(b) => b,
        Err(e) => return TaskStatus::Failed(e.to_string()),
    };

    match crate::table::decode::decode(&bytes, table_def) {
        Ok(outcome) => {
            match std::fs::File::create(&output_path)
                .and_then(|f| serde_json::to_writer(f, &outcome.rows).map_err(std::io::Error::from))
            {
                Ok(()) => {
                    debug!(table = table_name, rows = outcome.row_count, "decoded table");
                    TaskStatus::Decoded { row_count: outcome.row_count, warning: outcome.warning }
                }
                Err(e) => TaskStatus::Failed(e.to_string()),
            }
        }
        Err(e) => TaskStatus::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_ceiling_equal_batches() {
        let items: Vec<i32> = (0..10).collect();
        let parts = partition_ceiling(items, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn empty_input_partitions_to_nothing() {
        let parts: Vec<Vec<i32>> = partition_ceiling(Vec::new(), 4);
        assert!(parts.is_empty());
    }
}

//! Line producers - one OS thread per input.
//!
//! Each line becomes a [`Record`] routed to every configured backend and is
//! pushed into the shared [`RecordBuffer`]. Producers stop at EOF or as soon
//! as the buffer is closed.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use contracts::{BackendSet, Record, RecordPayload};
use dispatcher::{DispatcherError, RecordBuffer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

/// Where a producer reads lines from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// Sources for the given paths; stdin when none are given
    pub fn from_paths(paths: &[PathBuf]) -> Vec<Self> {
        if paths.is_empty() {
            vec![Self::Stdin]
        } else {
            paths.iter().cloned().map(Self::File).collect()
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Stdin => "stdin".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }

    fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            Self::File(path) => {
                let file = File::open(path)
                    .map_err(|e| CliError::input_open(path.display().to_string(), e))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Per-producer counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub source: String,
    pub lines_read: u64,
    pub records_pushed: u64,
    pub records_rejected: u64,
    pub lossy_lines: u64,
}

/// Shared state handed to every producer thread
#[derive(Clone)]
pub struct ProducerContext {
    pub buffer: Arc<RecordBuffer>,
    pub routes: BackendSet,
    pub next_id: Arc<AtomicU64>,
}

/// Open the input and start a producer thread for it
///
/// The thread sends its stats on `done` when it finishes.
pub fn spawn_producer(
    source: InputSource,
    ctx: ProducerContext,
    done: mpsc::UnboundedSender<ProducerStats>,
) -> Result<()> {
    let reader = source.open()?;
    let name = source.name();

    thread::Builder::new()
        .name(format!("producer-{name}"))
        .spawn(move || {
            let stats = produce(reader, name, &ctx);
            // receiver gone means the pipeline already stopped
            let _ = done.send(stats);
        })
        .map_err(|e| CliError::pipeline_execution(format!("failed to spawn producer: {e}")))?;

    Ok(())
}

/// Read lines until EOF or until the buffer closes
pub fn produce(mut reader: impl BufRead, source: String, ctx: &ProducerContext) -> ProducerStats {
    let mut stats = ProducerStats {
        source,
        ..Default::default()
    };
    let mut line = Vec::with_capacity(1024);

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(source = %stats.source, error = %e, "input read failed");
                break;
            }
        }

        let trimmed = trim_line_ending(&line);
        if trimmed.is_empty() {
            continue;
        }
        stats.lines_read += 1;

        let payload = RecordPayload::from_line(Bytes::copy_from_slice(trimmed));
        if !payload.is_lossless() {
            stats.lossy_lines += 1;
            observability::record_lossy_line();
        }

        let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
        match ctx.buffer.push(Record::new(id, payload, ctx.routes)) {
            Ok(_) => stats.records_pushed += 1,
            Err(DispatcherError::BufferFull { .. }) => stats.records_rejected += 1,
            Err(DispatcherError::BufferClosed { .. }) => {
                debug!(source = %stats.source, "buffer closed, producer stopping");
                break;
            }
            Err(e) => {
                warn!(source = %stats.source, error = %e, "push failed");
                break;
            }
        }
    }

    info!(
        source = %stats.source,
        lines = stats.lines_read,
        pushed = stats.records_pushed,
        rejected = stats.records_rejected,
        "producer finished"
    );
    stats
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// crates/machina-wal/src/wal.rs
// ============================================================================
// Module: Write-Ahead Log
// Description: Segmented append-only JSONL with rotation and retention.
// Purpose: Durable record stream for queue, de-dup, and checkpoint callers.
// Dependencies: crc32fast, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`Wal`] owns one active segment file and its rotated predecessors.
//! Appends are serialized under a mutex; rotation triggers when the active
//! segment exceeds its byte cap or age, renaming it to
//! `<basename>.<epoch_ms>.jsonl` and opening a fresh file. Retention deletes
//! the oldest rotated segments until both the segment count and the total
//! byte ceilings hold. Each record may optionally be CRC-32 framed as
//! `{"crc":<u32>,"rec":"<line>"}` so a flipped bit is detectable on read.
//! Appends retry once on I/O failure before surfacing a durability error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default active-segment byte cap (16 MiB).
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 16 * 1024 * 1024;
/// Default active-segment age cap in seconds (1 hour).
pub const DEFAULT_MAX_SEGMENT_AGE_SEC: u64 = 3_600;
/// Default maximum number of segments kept, active included.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;
/// Default total byte ceiling across segments (256 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 256 * 1024 * 1024;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Rotation, retention, and durability policy for one WAL.
///
/// # Invariants
/// - Caps are inclusive ceilings checked on the append path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Rotate when the active segment exceeds this many bytes.
    pub max_segment_bytes: u64,
    /// Rotate when the active segment is older than this many seconds.
    pub max_segment_age_sec: u64,
    /// Retention: maximum number of segments, active included.
    pub max_segments: usize,
    /// Retention: maximum total bytes across segments.
    pub max_total_bytes: u64,
    /// Call `fsync` after every append.
    pub fsync: bool,
    /// Wrap each record in a CRC-32 frame.
    pub crc_framing: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            max_segment_age_sec: DEFAULT_MAX_SEGMENT_AGE_SEC,
            max_segments: DEFAULT_MAX_SEGMENTS,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            fsync: false,
            crc_framing: false,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Durability errors surfaced to WAL callers.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum WalError {
    /// Append, rotation, or retention I/O failed (after one retry for
    /// appends).
    #[error("wal io failure for {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// CRC frame could not be serialized.
    #[error("wal frame failure: {0}")]
    Frame(String),
}

// ============================================================================
// SECTION: Segments
// ============================================================================

/// One WAL segment as reported by [`Wal::list_segments`].
///
/// # Invariants
/// - `active` is true for exactly one listed segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment file path.
    pub path: PathBuf,
    /// Segment size in bytes.
    pub bytes: u64,
    /// Whether this is the active segment.
    pub active: bool,
}

/// CRC-32 frame wrapped around a record when framing is enabled.
///
/// # Invariants
/// - `crc` is the CRC-32 of the raw record bytes.
#[derive(Debug, Serialize, Deserialize)]
struct CrcFrame<'a> {
    /// CRC-32 of `rec`.
    crc: u32,
    /// Raw record line.
    rec: &'a str,
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Monotonic WAL counters.
///
/// # Invariants
/// - Counters only increase for the life of the handle.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Records appended.
    pub appends: AtomicU64,
    /// Appends that needed the single retry.
    pub append_retries: AtomicU64,
    /// Segment rotations performed.
    pub rotations: AtomicU64,
    /// fsync calls issued.
    pub fsyncs: AtomicU64,
    /// Segments deleted by retention.
    pub retention_deletes: AtomicU64,
}

/// Serializable snapshot of [`WalStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalStatsSnapshot {
    /// Records appended.
    pub appends: u64,
    /// Appends that needed the single retry.
    pub append_retries: u64,
    /// Segment rotations performed.
    pub rotations: u64,
    /// fsync calls issued.
    pub fsyncs: u64,
    /// Segments deleted by retention.
    pub retention_deletes: u64,
}

impl WalStats {
    /// Takes a consistent-enough snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            append_retries: self.append_retries.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            fsyncs: self.fsyncs.load(Ordering::Relaxed),
            retention_deletes: self.retention_deletes.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// SECTION: Active Segment State
// ============================================================================

/// Mutable active-segment state owned by the append mutex.
#[derive(Debug)]
struct Active {
    /// Open active file handle.
    file: File,
    /// Bytes written to the active segment.
    bytes: u64,
    /// Epoch milliseconds when the active segment was opened.
    opened_at_ms: u64,
}

// ============================================================================
// SECTION: WAL
// ============================================================================

/// Segmented append-only write-ahead log.
///
/// # Invariants
/// - Appends are atomic with respect to each other (mutex-serialized).
/// - Rotated segments are immutable; only retention may delete them.
#[derive(Debug)]
pub struct Wal {
    /// Directory holding all segments.
    dir: PathBuf,
    /// Base name of the active segment (`<basename>.jsonl`).
    basename: String,
    /// Policy.
    config: WalConfig,
    /// Active segment state.
    active: Mutex<Active>,
    /// Monotonic counters.
    stats: WalStats,
}

impl Wal {
    /// Opens (or creates) a WAL in `dir` with the given basename.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the directory or active file cannot be
    /// created.
    pub fn open(dir: &Path, basename: &str, config: WalConfig) -> Result<Self, WalError> {
        fs::create_dir_all(dir).map_err(|source| WalError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let active_path = dir.join(format!("{basename}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&active_path).map_err(
            |source| WalError::Io {
                path: active_path.display().to_string(),
                source,
            },
        )?;
        let bytes = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|source| WalError::Io {
                path: active_path.display().to_string(),
                source,
            })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            basename: basename.to_string(),
            config,
            active: Mutex::new(Active {
                file,
                bytes,
                opened_at_ms: now_ms(),
            }),
            stats: WalStats::default(),
        })
    }

    /// Returns the active segment path.
    #[must_use]
    pub fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.basename))
    }

    /// Returns the monotonic counters.
    #[must_use]
    pub const fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Appends one JSON line atomically with respect to other appends.
    ///
    /// Rotation is checked before the write. When framing is enabled the
    /// record is wrapped in a CRC-32 frame; otherwise `s` is written verbatim
    /// with a trailing newline. A failed write is retried once before the
    /// durability error surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`WalError`] when rotation or the (retried) write fails.
    pub fn append_json_line(&self, s: &str) -> Result<(), WalError> {
        let line = if self.config.crc_framing {
            let frame = CrcFrame {
                crc: crc32fast::hash(s.as_bytes()),
                rec: s,
            };
            let mut framed = serde_json::to_string(&frame)
                .map_err(|err| WalError::Frame(err.to_string()))?;
            framed.push('\n');
            framed
        } else {
            format!("{s}\n")
        };

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        self.rotate_if_needed(&mut active)?;

        if Self::write_line(&mut active.file, line.as_bytes()).is_err() {
            // One retry; the retried failure is the one that surfaces.
            self.stats.append_retries.fetch_add(1, Ordering::Relaxed);
            Self::write_line(&mut active.file, line.as_bytes()).map_err(|source| {
                WalError::Io {
                    path: self.active_path().display().to_string(),
                    source,
                }
            })?;
        }
        if self.config.fsync {
            active.file.sync_data().map_err(|source| WalError::Io {
                path: self.active_path().display().to_string(),
                source,
            })?;
            self.stats.fsyncs.fetch_add(1, Ordering::Relaxed);
        }
        active.bytes += line.len() as u64;
        self.stats.appends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Lists segments oldest-first, the active segment last.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when the directory cannot be read.
    pub fn list_segments(&self) -> Result<Vec<SegmentInfo>, WalError> {
        let mut rotated = self.rotated_segments()?;
        let active_path = self.active_path();
        let active_bytes = fs::metadata(&active_path).map(|meta| meta.len()).unwrap_or(0);
        rotated.push(SegmentInfo {
            path: active_path,
            bytes: active_bytes,
            active: true,
        });
        Ok(rotated)
    }

    /// Deletes the oldest rotated segments until both retention ceilings hold.
    ///
    /// The active segment is never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] when listing or deletion fails.
    pub fn enforce_retention(&self) -> Result<usize, WalError> {
        let segments = self.list_segments()?;
        let mut count = segments.len();
        let mut total: u64 = segments.iter().map(|segment| segment.bytes).sum();
        let mut deleted = 0;
        for segment in &segments {
            if segment.active {
                continue;
            }
            if count <= self.config.max_segments && total <= self.config.max_total_bytes {
                break;
            }
            fs::remove_file(&segment.path).map_err(|source| WalError::Io {
                path: segment.path.display().to_string(),
                source,
            })?;
            count -= 1;
            total = total.saturating_sub(segment.bytes);
            deleted += 1;
            self.stats.retention_deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    /// Writes one line and flushes it.
    fn write_line(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
        file.write_all(bytes)?;
        file.flush()
    }

    /// Rotates the active segment when size or age exceeds policy.
    fn rotate_if_needed(&self, active: &mut Active) -> Result<(), WalError> {
        let age_ms = now_ms().saturating_sub(active.opened_at_ms);
        let over_size = active.bytes > self.config.max_segment_bytes;
        let over_age = age_ms > self.config.max_segment_age_sec.saturating_mul(1_000);
        if active.bytes == 0 || (!over_size && !over_age) {
            return Ok(());
        }

        let active_path = self.active_path();
        let rotated_path = self.dir.join(format!("{}.{}.jsonl", self.basename, now_ms()));
        fs::rename(&active_path, &rotated_path).map_err(|source| WalError::Io {
            path: rotated_path.display().to_string(),
            source,
        })?;
        let file = OpenOptions::new().create(true).append(true).open(&active_path).map_err(
            |source| WalError::Io {
                path: active_path.display().to_string(),
                source,
            },
        )?;
        active.file = file;
        active.bytes = 0;
        active.opened_at_ms = now_ms();
        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Lists rotated segments oldest-first by their embedded epoch stamp.
    fn rotated_segments(&self) -> Result<Vec<SegmentInfo>, WalError> {
        let prefix = format!("{}.", self.basename);
        let mut rotated = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|source| WalError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| WalError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".jsonl"))
            else {
                continue;
            };
            let Ok(epoch_ms) = stamp.parse::<u64>() else {
                continue;
            };
            let bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            rotated.push((epoch_ms, SegmentInfo {
                path: entry.path(),
                bytes,
                active: false,
            }));
        }
        rotated.sort_by_key(|(epoch_ms, _)| *epoch_ms);
        Ok(rotated.into_iter().map(|(_, info)| info).collect())
    }
}

/// Reads the wall clock as epoch milliseconds, saturating before the epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

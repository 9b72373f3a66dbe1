//! Warm tier: file-backed overflow queue.
//!
//! Records demoted from the hot ring land here as length-prefixed frames in a
//! fixed-size file. The tier survives process restarts: on open the file is
//! scanned for its valid extent (a torn tail from a crash is discarded and
//! overwritten), and the read cursor starts back at zero so records from the
//! previous run are replayed first. Replay may re-send records the broker had
//! already accepted; the backend's idempotent insert absorbs the duplicates,
//! which is the deliberate trade of duplicates over loss.
//!
//! Crash consistency is at record granularity: writes are append-only and
//! length-prefixed, so an incomplete record is detectable and never replayed.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;
use telemetry_wire::{SensorRecord, HEADER_LEN};
use thiserror::Error;

/// Frames declaring more than this are treated as corruption and skipped.
pub const MAX_RECORD_LEN: usize = 1 << 20; // 1 MiB

/// Upper bound on bytes pulled into memory per drain pass.
const SCAN_CHUNK: u64 = 4 * 1024 * 1024;

/// Error types for warm buffer operations.
#[derive(Debug, Error)]
pub enum WarmError {
    /// The file has no room for the frame; caller demotes to cold.
    #[error("warm buffer full: {needed} bytes needed, {available} available")]
    Full { needed: u64, available: u64 },
    #[error("warm buffer io: {0}")]
    Io(#[from] std::io::Error),
}

/// Frames peeked from the warm file plus the cursor they extend to.
///
/// `frames` may be empty while the cursor still advanced (padding or a
/// corrupt region was skipped); committing the cursor then just drops the
/// garbage.
#[derive(Debug)]
pub struct WarmBatch {
    pub frames: Vec<Vec<u8>>,
    pub next_read_pos: u64,
}

struct Positions {
    write_pos: u64,
    read_pos: u64,
}

/// File-backed length-prefixed overflow queue.
///
/// Append rate is low (warm is a demotion sink, not the hot path), so a mutex
/// around the cursors is fine.
pub struct WarmBuffer {
    file: File,
    capacity: u64,
    positions: Mutex<Positions>,
}

impl WarmBuffer {
    /// Opens or creates the warm file with room for at least `size` bytes.
    ///
    /// The file grows with appends, so its length always marks the written
    /// extent; that is what makes a torn tail detectable. The write position
    /// resumes after the last complete record of the previous run (a torn
    /// tail is truncated away); the read position starts at zero (snapshot
    /// replay).
    pub fn open(path: &Path, size: u64) -> Result<Self, WarmError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let existing = file.metadata()?.len();
        let capacity = existing.max(size);

        let write_pos = scan_valid_end(&file, existing)?;
        if write_pos < existing {
            // Discard the torn or unparseable tail left by a crash.
            file.set_len(write_pos)?;
        }

        Ok(Self {
            file,
            capacity,
            positions: Mutex::new(Positions {
                write_pos,
                read_pos: 0,
            }),
        })
    }

    /// Returns the configured capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns true while unread bytes remain.
    pub fn needs_drain(&self) -> bool {
        let positions = self.positions.lock().unwrap();
        positions.read_pos < positions.write_pos
    }

    /// Bytes written but not yet read.
    pub fn unread_bytes(&self) -> u64 {
        let positions = self.positions.lock().unwrap();
        positions.write_pos - positions.read_pos
    }

    /// Appends one already-framed record.
    pub fn write(&self, frame: &[u8]) -> Result<(), WarmError> {
        let mut positions = self.positions.lock().unwrap();
        let needed = frame.len() as u64;
        let available = self.capacity - positions.write_pos;
        if needed > available {
            return Err(WarmError::Full { needed, available });
        }

        self.file.write_all_at(frame, positions.write_pos)?;
        positions.write_pos += needed;
        Ok(())
    }

    /// Reads up to `max_frames` complete frames from the read cursor without
    /// advancing it. The cursor moves only when the caller confirms delivery
    /// via [`commit_read`](Self::commit_read).
    pub fn peek(&self, max_frames: usize) -> Result<WarmBatch, WarmError> {
        let read_pos = self.positions.lock().unwrap().read_pos;
        self.peek_from(read_pos, max_frames)
    }

    /// Like [`peek`](Self::peek), but starting at `from` — a frame boundary a
    /// previous peek returned — so a caller can extend an uncommitted claim
    /// with frames written since.
    pub fn peek_from(&self, from: u64, max_frames: usize) -> Result<WarmBatch, WarmError> {
        let write_pos = self.positions.lock().unwrap().write_pos;

        if from >= write_pos {
            return Ok(WarmBatch {
                frames: Vec::new(),
                next_read_pos: from,
            });
        }

        let window_len = (write_pos - from).min(SCAN_CHUNK);
        let mut window = vec![0u8; window_len as usize];
        self.file.read_exact_at(&mut window, from)?;

        let scan = scan_frames(&window, max_frames);
        Ok(WarmBatch {
            frames: scan.frames,
            next_read_pos: (from + scan.consumed).min(write_pos),
        })
    }

    /// Advances the read cursor to a position previously returned by
    /// [`peek`](Self::peek).
    pub fn commit_read(&self, next_read_pos: u64) {
        let mut positions = self.positions.lock().unwrap();
        debug_assert!(
            next_read_pos >= positions.read_pos && next_read_pos <= positions.write_pos,
            "warm read cursor must advance monotonically within written data"
        );
        positions.read_pos = next_read_pos;
    }

    /// Scans all valid records for the machine's highest sequence number.
    ///
    /// Used at boot to resume sequence numbering after a restart; frames that
    /// fail to decode are ignored, they will be skipped by the drain anyway.
    pub fn recover_last_sequence(&self, machine_id: &str) -> Result<Option<u64>, WarmError> {
        let write_pos = self.positions.lock().unwrap().write_pos;
        let mut last = None;
        let mut pos = 0u64;

        while pos < write_pos {
            let window_len = (write_pos - pos).min(SCAN_CHUNK);
            let mut window = vec![0u8; window_len as usize];
            self.file.read_exact_at(&mut window, pos)?;

            let scan = scan_frames(&window, usize::MAX);
            for frame in &scan.frames {
                if let Ok(record) = serde_json::from_slice::<SensorRecord>(&frame[HEADER_LEN..]) {
                    if record.machine_id == machine_id {
                        last = last.max(Some(record.sequence_number));
                    }
                }
            }

            if scan.consumed == 0 {
                break; // partial record at the window edge; nothing more to learn
            }
            pos += scan.consumed;
        }

        Ok(last)
    }
}

pub(crate) struct ScanOutcome {
    pub(crate) frames: Vec<Vec<u8>>,
    /// Bytes the read cursor may advance by. Can exceed the window when a
    /// corrupt header declared a length past it; callers clamp to written data.
    pub(crate) consumed: u64,
}

/// Applies the drain rules to a window of written bytes.
///
/// - declared length 0: padding, advance by the header
/// - declared length above [`MAX_RECORD_LEN`]: corruption, advance past it
/// - incomplete record at the end: stop, it will be retried once complete
pub(crate) fn scan_frames(window: &[u8], max_frames: usize) -> ScanOutcome {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while frames.len() < max_frames && offset < window.len() {
        let remaining = window.len() - offset;
        if remaining < HEADER_LEN {
            break;
        }

        let declared = u32::from_be_bytes([
            window[offset],
            window[offset + 1],
            window[offset + 2],
            window[offset + 3],
        ]) as usize;

        if declared == 0 {
            offset += HEADER_LEN;
            continue;
        }

        if declared > MAX_RECORD_LEN {
            let skip = HEADER_LEN + declared;
            if offset + skip >= window.len() {
                return ScanOutcome {
                    frames,
                    consumed: (offset + skip) as u64,
                };
            }
            offset += skip;
            continue;
        }

        if remaining - HEADER_LEN < declared {
            break;
        }

        frames.push(window[offset..offset + HEADER_LEN + declared].to_vec());
        offset += HEADER_LEN + declared;
    }

    ScanOutcome {
        frames,
        consumed: offset as u64,
    }
}

/// Walks the file from the start, returning the end of the last record the
/// drain could reach. Padding and fully-contained corrupt regions are
/// stepped over like the drain does; an incomplete record is a torn tail
/// from a crash and everything from it on is unusable.
fn scan_valid_end(file: &File, limit: u64) -> Result<u64, std::io::Error> {
    let mut pos = 0u64;
    let mut header = [0u8; HEADER_LEN];

    while pos + HEADER_LEN as u64 <= limit {
        file.read_exact_at(&mut header, pos)?;
        let declared = u64::from(u32::from_be_bytes(header));

        if declared == 0 {
            pos += HEADER_LEN as u64;
            continue;
        }

        let end = pos + HEADER_LEN as u64 + declared;
        if declared > MAX_RECORD_LEN as u64 {
            if end >= limit {
                break;
            }
            pos = end;
            continue;
        }
        if end > limit {
            break;
        }
        pos = end;
    }

    Ok(pos)
}

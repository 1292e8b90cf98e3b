//! Structured event stream for attack runs.
//!
//! Discrete, typed events emitted while a run progresses. Events are
//! serialized as newline-delimited JSON (JSONL) and carry a monotonically
//! increasing sequence number for ordering.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A usable key was recovered.
    Success,
    /// An attack reported the public key as structurally invalid.
    BadKey,
    /// Every attack ran without recovering a key.
    AllExhausted,
    /// The engine could not be resolved.
    EngineUnavailable,
    /// Interrupted by a signal.
    Interrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::BadKey => "bad key",
            Self::AllExhausted => "all attacks exhausted",
            Self::EngineUnavailable => "engine unavailable",
            Self::Interrupted => "interrupted",
        })
    }
}

/// Per-run counters emitted when the run stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Attacks that were started.
    pub attacks_run: u64,
    /// Attacks that hit their time budget.
    pub timeouts: u64,
    /// Cleartexts reported by attacks.
    pub cleartexts: u64,
    /// Key records reported by attacks.
    pub keys: u64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attacks={} timeouts={} cleartexts={} keys={} duration={}ms",
            self.attacks_run, self.timeouts, self.cleartexts, self.keys, self.duration_ms,
        )
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a run.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A run was requested.
    RunStarted {
        timestamp: DateTime<Utc>,
        /// Attack names in the order they will be tried.
        attacks: Vec<String>,
        ciphertexts: usize,
        public_keys: usize,
    },

    /// The engine was resolved.
    EngineResolved {
        timestamp: DateTime<Utc>,
        executable: String,
        /// `major.minor`
        version: String,
        /// Whether invocations go through a compatibility shim.
        shimmed: bool,
    },

    /// An attack process was started.
    AttackStarted {
        timestamp: DateTime<Utc>,
        attack: String,
        index: usize,
    },

    /// An attack finished, one way or another.
    AttackFinished {
        timestamp: DateTime<Utc>,
        attack: String,
        /// `success`, `failure` or `bad_key`.
        outcome: String,
        /// Why the attack failed, if it did.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        duration_ms: u64,
    },

    /// An attack reported a cleartext.
    CleartextRecovered {
        timestamp: DateTime<Utc>,
        attack: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },

    /// An attack reported key material.
    KeyRecovered {
        timestamp: DateTime<Utc>,
        attack: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Whether the material completed into a usable key.
        complete: bool,
    },

    /// The run stopped.
    RunStopped {
        timestamp: DateTime<Utc>,
        reason: StopReason,
        summary: RunSummary,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// serializes the event as one JSON line, and flushes the writer.
/// Serialization or I/O failures are dropped; events never abort a run.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

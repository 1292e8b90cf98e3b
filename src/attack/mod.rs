//! Attack requests, outcomes and the driver that sequences them.

pub mod catalog;
pub mod driver;

use std::fmt;
use std::path::PathBuf;

use num_bigint_dig::BigUint;

use crate::error::{KeyError, ProtocolError};
use crate::key::CompleteKey;
use crate::observability::{RunSummary, StopReason};
use crate::protocol::{CleartextRecord, KeyRecord};

pub use catalog::{AttackScript, Catalog, StagedHelper};
pub use driver::{AttackDriver, DriverOptions};

/// Exit status an attack uses to declare the public key structurally invalid.
pub const BAD_KEY_STATUS: i32 = 2;

// ============================================================================
// Target
// ============================================================================

/// A ciphertext to recover, with an optional label.
///
/// The label travels to the attack and names the file the decryption is
/// written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub value: BigUint,
    pub label: Option<String>,
}

/// A public key to attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub n: BigUint,
    pub e: BigUint,
    pub label: Option<String>,
}

/// Everything one run attacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub ciphertexts: Vec<Ciphertext>,
    pub public_keys: Vec<PublicKey>,
}

impl Target {
    /// Positional engine arguments: `<c>:<label>` entries, then
    /// `<n>:<e>:<label>` entries. Absent labels are empty.
    #[must_use]
    pub fn wire_args(&self) -> Vec<String> {
        let label = |l: &Option<String>| l.clone().unwrap_or_default();
        self.ciphertexts
            .iter()
            .map(|c| format!("{}:{}", c.value, label(&c.label)))
            .chain(
                self.public_keys
                    .iter()
                    .map(|k| format!("{}:{}:{}", k.n, k.e, label(&k.label))),
            )
            .collect()
    }

    /// The public exponent paired with `n` in this target, if any.
    #[must_use]
    pub fn exponent_for(&self, n: &BigUint) -> Option<&BigUint> {
        self.public_keys.iter().find(|k| &k.n == n).map(|k| &k.e)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why an attack produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No script matched the attack name.
    UnknownAttack { suggestion: Option<String> },
    /// The engine process could not be started.
    Launch(String),
    /// The attack ran out of time and its process tree was killed.
    TimedOut,
    /// The attack exited non-zero (or was killed by a signal).
    ExitStatus(Option<i32>),
    /// The attack's output violated the result protocol.
    Malformed(ProtocolError),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAttack { suggestion: Some(s) } => {
                write!(f, "unknown attack (did you mean '{s}'?)")
            }
            Self::UnknownAttack { suggestion: None } => f.write_str("unknown attack"),
            Self::Launch(e) => write!(f, "engine could not be started: {e}"),
            Self::TimedOut => f.write_str("timed out"),
            Self::ExitStatus(Some(code)) => write!(f, "exited with status {code}"),
            Self::ExitStatus(None) => f.write_str("killed by a signal"),
            Self::Malformed(e) => write!(f, "{e}"),
        }
    }
}

/// Result of one attack invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    /// The attack ran and reported these records (possibly none).
    Success {
        cleartexts: Vec<CleartextRecord>,
        keys: Vec<KeyRecord>,
    },
    /// The attack found nothing usable.
    Failure(FailureReason),
    /// The public key is not RSA-shaped; nothing else should be tried.
    BadKey,
}

impl AttackOutcome {
    /// Short tag used in events.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure(_) => "failure",
            Self::BadKey => "bad_key",
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// A key record as it came out of the completion step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredKey {
    pub name: Option<String>,
    pub key: Result<CompleteKey, KeyError>,
    /// Files the key was written to.
    pub written: Vec<PathBuf>,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub stop: StopReason,
    /// Attack that ended the run, for `Success` and `BadKey`.
    pub decided_by: Option<String>,
    /// Every cleartext reported, in order.
    pub cleartexts: Vec<CleartextRecord>,
    pub keys: Vec<RecoveredKey>,
    /// Attacks that failed, with the reason.
    pub failures: Vec<(String, FailureReason)>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Recovered keys that completed successfully.
    pub fn complete_keys(&self) -> impl Iterator<Item = &CompleteKey> {
        self.keys.iter().filter_map(|k| k.key.as_ref().ok())
    }

    /// First completion error when no key completed.
    #[must_use]
    pub fn key_failure(&self) -> Option<&KeyError> {
        if self.complete_keys().next().is_some() {
            return None;
        }
        self.keys.iter().find_map(|k| k.key.as_ref().err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn wire_args_put_ciphertexts_first() {
        let target = Target {
            ciphertexts: vec![
                Ciphertext {
                    value: big(2),
                    label: None,
                },
                Ciphertext {
                    value: big(7),
                    label: Some("flag.bin".into()),
                },
            ],
            public_keys: vec![PublicKey {
                n: big(35),
                e: big(5),
                label: Some("alice".into()),
            }],
        };
        assert_eq!(target.wire_args(), vec!["2:", "7:flag.bin", "35:5:alice"]);
    }

    #[test]
    fn exponent_lookup() {
        let target = Target {
            ciphertexts: vec![],
            public_keys: vec![PublicKey {
                n: big(35),
                e: big(5),
                label: None,
            }],
        };
        assert_eq!(target.exponent_for(&big(35)), Some(&big(5)));
        assert_eq!(target.exponent_for(&big(33)), None);
    }

    #[test]
    fn failure_reasons_display() {
        assert_eq!(FailureReason::ExitStatus(Some(1)).to_string(), "exited with status 1");
        assert_eq!(
            FailureReason::UnknownAttack {
                suggestion: Some("wiener".into())
            }
            .to_string(),
            "unknown attack (did you mean 'wiener'?)"
        );
    }

    #[test]
    fn key_failure_only_without_complete_keys() {
        let failed = RecoveredKey {
            name: None,
            key: Err(KeyError::InsufficientKeyMaterial { missing: "d" }),
            written: vec![],
        };
        let report = RunReport {
            stop: StopReason::Success,
            decided_by: Some("x".into()),
            cleartexts: vec![],
            keys: vec![failed],
            failures: vec![],
            summary: RunSummary::default(),
        };
        assert!(report.key_failure().is_some());
        assert_eq!(report.complete_keys().count(), 0);
    }
}

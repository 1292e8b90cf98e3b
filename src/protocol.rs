//! Line protocol spoken by attack scripts on standard output.
//!
//! ```text
//! cleartext: <int>[,<destination>]
//! key: [n],[e],[d],[p],[q][,<name>]
//! ```
//!
//! Blank lines are ignored, surrounding whitespace is trimmed and empty key
//! fields mean "unknown". Anything else is a protocol violation.

use std::fmt;

use num_bigint_dig::BigUint;

use crate::error::ProtocolError;
use crate::key::PartialKey;

const CLEARTEXT: &str = "cleartext";
const KEY: &str = "key";

/// Positional key fields, in wire order.
const KEY_FIELDS: [&str; 5] = ["n", "e", "d", "p", "q"];

/// A recovered plaintext integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleartextRecord {
    pub value: BigUint,
    /// Where the script asked for it to go; `None` means the default sink.
    pub destination: Option<String>,
}

/// Recovered (possibly partial) key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: PartialKey,
    pub name: Option<String>,
}

/// One protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Cleartext(CleartextRecord),
    Key(KeyRecord),
}

/// All records of one attack run, split by kind, in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub cleartexts: Vec<CleartextRecord>,
    pub keys: Vec<KeyRecord>,
}

/// Parses an attack's standard output.
///
/// # Errors
///
/// Returns `ProtocolError::MalformedProtocolOutput` for the first line with
/// an unknown kind or a field that is not a non-negative decimal integer.
pub fn parse(text: &str) -> Result<ParsedOutput, ProtocolError> {
    let mut out = ParsedOutput::default();
    for record in parse_records(text)? {
        match record {
            Record::Cleartext(c) => out.cleartexts.push(c),
            Record::Key(k) => out.keys.push(k),
        }
    }
    Ok(out)
}

/// Parses an attack's standard output into records, preserving order.
///
/// # Errors
///
/// Same as [`parse`].
pub fn parse_records(text: &str) -> Result<Vec<Record>, ProtocolError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_line(idx + 1, line))
        .collect()
}

fn parse_line(line_no: usize, line: &str) -> Result<Record, ProtocolError> {
    let (kind, value) = line
        .split_once(':')
        .map_or((line.trim(), ""), |(k, v)| (k.trim(), v.trim()));
    let malformed = |reason: String| ProtocolError::MalformedProtocolOutput {
        line: line_no,
        kind: kind.to_string(),
        reason,
    };

    match kind {
        CLEARTEXT => {
            let (number, destination) = match value.split_once(',') {
                Some((number, dest)) => (number, label(dest)),
                None => (value, None),
            };
            let value = parse_int(number)
                .ok_or_else(|| malformed(format!("'{}' is not an integer", number.trim())))?;
            Ok(Record::Cleartext(CleartextRecord { value, destination }))
        }
        KEY => {
            let mut parts = value.splitn(KEY_FIELDS.len() + 1, ',');
            let mut fields: [Option<BigUint>; 5] = Default::default();
            for (slot, name) in fields.iter_mut().zip(KEY_FIELDS) {
                let Some(raw) = parts.next() else { break };
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                *slot = Some(
                    parse_int(raw)
                        .ok_or_else(|| malformed(format!("{name} '{raw}' is not an integer")))?,
                );
            }
            let name = parts.next().and_then(label);
            let [n, e, d, p, q] = fields;
            Ok(Record::Key(KeyRecord {
                key: PartialKey {
                    n,
                    e,
                    d,
                    p,
                    q,
                    phi: None,
                },
                name,
            }))
        }
        _ => Err(malformed("unexpected record kind".into())),
    }
}

fn parse_int(raw: &str) -> Option<BigUint> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn label(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleartext(c) => {
                write!(f, "{CLEARTEXT}: {}", c.value)?;
                if let Some(dest) = &c.destination {
                    write!(f, ",{dest}")?;
                }
                Ok(())
            }
            Self::Key(k) => {
                let show = |v: &Option<BigUint>| v.as_ref().map(ToString::to_string).unwrap_or_default();
                write!(
                    f,
                    "{KEY}: {},{},{},{},{}",
                    show(&k.key.n),
                    show(&k.key.e),
                    show(&k.key.d),
                    show(&k.key.p),
                    show(&k.key.q)
                )?;
                if let Some(name) = &k.name {
                    write!(f, ",{name}")?;
                }
                Ok(())
            }
        }
    }
}

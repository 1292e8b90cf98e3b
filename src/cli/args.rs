//! CLI argument definitions.
//!
//! All Clap derive structs for `rsarmageddon` command-line parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use num_bigint_dig::BigUint;
use num_traits::Num;

use crate::attack::{Ciphertext, PublicKey};
use crate::codec::{KeyFormat, Padding};
use crate::engine::EngineVersion;
use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// RSA attack orchestration over SageMath.
#[derive(Parser, Debug)]
#[command(name = "rsarmageddon", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "RSARMAGEDDON_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(
        long,
        default_value = "human",
        global = true,
        env = "RSARMAGEDDON_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Path to a YAML settings file.
    #[arg(long, global = true, env = "RSARMAGEDDON_CONFIG")]
    pub config: Option<PathBuf>,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run attacks against public keys and ciphertexts.
    Attack(AttackArgs),

    /// Complete partial RSA key material into a private key.
    Complete(CompleteArgs),

    /// Show the SageMath installation that would be used.
    Engine(EngineArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `attack`.
#[derive(Args, Debug)]
#[command(group = clap::ArgGroup::new("target").required(true).multiple(true))]
pub struct AttackArgs {
    /// Attacks to run in order: catalog names or script paths.
    #[arg(short, long = "attack", required = true, value_delimiter = ',')]
    pub attacks: Vec<String>,

    /// Ciphertext as `VALUE[:FILE]`; the decryption goes to FILE if given.
    #[arg(short, long = "ciphertext", group = "target", value_parser = parse_ciphertext)]
    pub ciphertexts: Vec<Ciphertext>,

    /// Public key as `N:E[:NAME]`.
    #[arg(short, long = "key", group = "target", value_parser = parse_public_key)]
    pub keys: Vec<PublicKey>,

    /// Time budget per attack (e.g. `90s`, `5m`).
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Directory holding attack scripts.
    #[arg(long, env = "RSARMAGEDDON_ATTACKS_DIR")]
    pub attacks_dir: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineOverride,

    /// Emit the recovered private key: to stdout, or to the given file.
    #[arg(long, num_args = 0..=1, default_missing_value = "-")]
    pub output_private: Option<PathBuf>,

    /// Write every recovered key (and named plaintexts) into this directory.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print plaintexts as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Padding scheme for decrypting the ciphertexts.
    #[arg(long)]
    pub padding: Option<Padding>,

    /// Encoding of emitted private keys.
    #[arg(long)]
    pub key_format: Option<KeyFormat>,

    /// Write structured run events (JSONL) to this file.
    #[arg(long, env = "RSARMAGEDDON_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,
}

/// Arguments for `complete`.
#[derive(Args, Debug)]
pub struct CompleteArgs {
    /// Modulus.
    #[arg(long, value_parser = parse_uint)]
    pub n: Option<BigUint>,

    /// Public exponent (65537 when absent and not derivable).
    #[arg(long, value_parser = parse_uint)]
    pub e: Option<BigUint>,

    /// Private exponent.
    #[arg(long, value_parser = parse_uint)]
    pub d: Option<BigUint>,

    /// First prime factor.
    #[arg(long, value_parser = parse_uint)]
    pub p: Option<BigUint>,

    /// Second prime factor.
    #[arg(long, value_parser = parse_uint)]
    pub q: Option<BigUint>,

    /// Euler's totient of n.
    #[arg(long, value_parser = parse_uint)]
    pub phi: Option<BigUint>,

    /// Output encoding.
    #[arg(short, long, default_value = "pem")]
    pub format: KeyOutputFormat,

    /// Write the key to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `engine`.
#[derive(Args, Debug)]
pub struct EngineArgs {
    #[command(flatten)]
    pub engine: EngineOverride,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Engine selection shared by `attack` and `engine`.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineOverride {
    /// SageMath executable to use instead of discovering one.
    #[arg(long = "engine", env = "RSARMAGEDDON_ENGINE")]
    pub executable: Option<PathBuf>,

    /// Version of `--engine` as `MAJOR.MINOR`, skipping the version query.
    #[arg(id = "engine_version", long = "engine-version", requires = "executable")]
    pub version: Option<EngineVersion>,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Output encoding for `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum KeyOutputFormat {
    /// PKCS#1 PEM.
    #[default]
    Pem,
    /// PKCS#1 DER.
    Der,
    /// Key parameters as a JSON object.
    Json,
}

// ============================================================================
// Value Parsers
// ============================================================================

/// Parses a non-negative integer in decimal or `0x` hexadecimal.
///
/// # Errors
///
/// Returns a message naming the offending text.
pub fn parse_uint(raw: &str) -> Result<BigUint, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            BigUint::from_str_radix(hex, 16).ok()
        }
        Some(_) => None,
        None if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => raw.parse().ok(),
        None => None,
    };
    parsed.ok_or_else(|| format!("'{raw}' is not a non-negative integer"))
}

/// Parses `VALUE[:FILE]`.
///
/// # Errors
///
/// Returns a message if VALUE is not an integer.
pub fn parse_ciphertext(raw: &str) -> Result<Ciphertext, String> {
    let (value, label) = match raw.split_once(':') {
        Some((value, label)) => (value, non_empty(label)),
        None => (raw, None),
    };
    Ok(Ciphertext {
        value: parse_uint(value)?,
        label,
    })
}

/// Parses `N:E[:NAME]`.
///
/// # Errors
///
/// Returns a message if N or E is missing or not an integer.
pub fn parse_public_key(raw: &str) -> Result<PublicKey, String> {
    let mut parts = raw.splitn(3, ':');
    let n = parts.next().unwrap_or_default();
    let e = parts
        .next()
        .ok_or_else(|| format!("'{raw}' is not of the form N:E[:NAME]"))?;
    Ok(PublicKey {
        n: parse_uint(n)?,
        e: parse_uint(e)?,
        label: parts.next().and_then(non_empty),
    })
}

fn non_empty(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

// ============================================================================
// Tests
// ============================================================================

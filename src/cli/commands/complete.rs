//! `complete`: turn partial key material into a full private key.

use std::io::Write;

use num_bigint_dig::BigUint;
use serde::Serialize;

use crate::cli::args::{CompleteArgs, KeyOutputFormat};
use crate::codec::{self, KeyFormat};
use crate::config::Settings;
use crate::error::{OutputError, RsarmageddonError};
use crate::key::{self, CompleteKey, PartialKey};

#[derive(Debug, Serialize)]
struct KeyParameters {
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
    dp: String,
    dq: String,
    qinv: String,
}

impl From<&CompleteKey> for KeyParameters {
    fn from(key: &CompleteKey) -> Self {
        Self {
            n: key.n.to_string(),
            e: key.e.to_string(),
            d: key.d.to_string(),
            p: key.p.to_string(),
            q: key.q.to_string(),
            dp: key.dp.to_string(),
            dq: key.dq.to_string(),
            qinv: key.qinv.to_string(),
        }
    }
}

/// Complete the key given on the command line and emit it.
///
/// # Errors
///
/// Returns `RsarmageddonError::Key` if the material is insufficient or
/// inconsistent, and `RsarmageddonError::Output` if writing fails.
pub fn run(args: &CompleteArgs, settings: &Settings) -> Result<(), RsarmageddonError> {
    let partial = PartialKey {
        n: args.n.clone(),
        e: args.e.clone(),
        d: args.d.clone(),
        p: args.p.clone(),
        q: args.q.clone(),
        phi: args.phi.clone(),
    };
    let key = key::complete(&partial, &BigUint::from(settings.attack.default_exponent))?;
    tracing::info!(bits = key.n.bits(), "key completed");

    let encoded = match args.format {
        KeyOutputFormat::Pem => codec::encode_private_key(&key, KeyFormat::Pem)?,
        KeyOutputFormat::Der => codec::encode_private_key(&key, KeyFormat::Der)?,
        KeyOutputFormat::Json => {
            let mut json = serde_json::to_vec_pretty(&KeyParameters::from(&key))?;
            json.push(b'\n');
            json
        }
    };

    match &args.output {
        Some(path) => std::fs::write(path, &encoded).map_err(|source| OutputError::Write {
            path: path.clone(),
            source,
        })?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&encoded)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

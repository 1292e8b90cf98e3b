//! `RSArmageddon` - RSA attack orchestration over SageMath
//!
//! Locates a SageMath installation, runs attack scripts against public keys
//! and ciphertexts under a per-attack time budget, parses what they report
//! and completes recovered key material into usable private keys.

pub mod attack;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod observability;
pub mod output;
pub mod protocol;
pub mod runner;

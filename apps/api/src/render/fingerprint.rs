//! Content key derivation for the video cache.
//!
//! The fingerprint is the cache's primary key: identical semantic input
//! under the same generation configuration always hashes to the same
//! digest, and any change to the voice, avatar or synthesis parameters
//! invalidates every previously cached key.

use sha2::{Digest, Sha256};

use crate::config::GenerationConfig;

/// Computes a 64-character hex digest from normalized question text plus
/// every configuration field that affects the generated artifact.
pub fn fingerprint(text: &str, config: &GenerationConfig) -> String {
    let normalized = normalize(text);

    let mut hasher = Sha256::new();
    for field in [
        normalized.as_str(),
        config.voice_id.as_str(),
        config.avatar_key.as_str(),
        &format!("{:.4}", config.speaking_rate),
        &format!("{:.4}", config.stability),
    ] {
        // Length-prefix each field so no delimiter can collide with content.
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Trims, lowercases, and collapses internal whitespace runs to one space.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

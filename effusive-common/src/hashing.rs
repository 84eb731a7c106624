//! Content hashing for reference audio
//!
//! The catalog key is the SHA-256 of the file bytes, so the same recording
//! stored under two names resolves to one record.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::Result;

const BLOCK_SIZE: usize = 4096;

/// Calculate SHA-256 hash of file contents (lowercase hex)
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];

    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculate SHA-256 hash of an in-memory payload (lowercase hex)
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// True if `hash` looks like a lowercase hex SHA-256 digest
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

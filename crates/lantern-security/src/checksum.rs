use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Folds labelled digests into one, so a set of files can be compared as a unit.
/// Callers must feed entries in a stable order.
#[derive(Default)]
pub struct Sha256Accumulator {
    hasher: Sha256,
}

impl Sha256Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: &str, digest_hex: &str) {
        self.hasher.update(label.as_bytes());
        self.hasher.update([0_u8]);
        self.hasher.update(digest_hex.as_bytes());
        self.hasher.update([0_u8]);
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_digest_matches_in_memory_digest() {
        let path = std::env::temp_dir().join(format!(
            "lantern-security-tests-{}-file-digest",
            std::process::id()
        ));
        std::fs::write(&path, b"lantern").expect("must write file");

        let digest = sha256_file_hex(&path).expect("must hash file");
        assert_eq!(digest, sha256_hex(b"lantern"));
        assert_ne!(digest, sha256_hex(b"lantern\n"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn accumulator_depends_on_order_and_labels() {
        let mut first = Sha256Accumulator::new();
        first.push("a", "11");
        first.push("b", "22");

        let mut swapped = Sha256Accumulator::new();
        swapped.push("b", "22");
        swapped.push("a", "11");

        let mut relabelled = Sha256Accumulator::new();
        relabelled.push("a", "11");
        relabelled.push("c", "22");

        let first = first.finish();
        assert_ne!(first, swapped.finish());
        assert_ne!(first, relabelled.finish());
    }
}

use sha2::{Digest, Sha256};

/// Content hash used as the data-file key.
///
/// Storage ETags are not used: they do not always match the content digest.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

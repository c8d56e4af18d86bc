use crate::idempotency::content_hash;
use std::fs;
use std::path::{Path, PathBuf};

/// Store raw workbook bytes under `root/sha256/ab/cd/<hex>` and return the
/// reference `cas:sha256:<hex>`. Existing objects are left untouched.
pub fn write_cas(root: &Path, bytes: &[u8]) -> anyhow::Result<String> {
    let hex = content_hash(bytes);
    let path = cas_path(root, &hex);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    if !path.exists() {
        fs::write(&path, bytes)?;
    }
    Ok(format!("cas:sha256:{}", hex))
}

/// Read back the bytes behind a `cas:sha256:<hex>` reference.
pub fn read_cas(root: &Path, payload_ref: &str) -> anyhow::Result<Vec<u8>> {
    let hex = payload_ref
        .strip_prefix("cas:sha256:")
        .ok_or_else(|| anyhow::anyhow!("not a CAS reference: {}", payload_ref))?;
    if hex.len() < 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow::anyhow!("malformed CAS reference: {}", payload_ref));
    }
    Ok(fs::read(cas_path(root, hex))?)
}

fn cas_path(root: &Path, hex: &str) -> PathBuf {
    root.join("sha256").join(&hex[0..2]).join(&hex[2..4]).join(hex)
}

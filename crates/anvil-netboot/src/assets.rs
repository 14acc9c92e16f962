//! Static iPXE binary set served by both the TFTP and HTTP binary
//! servers (spec.md §4.D surfaces 1/2). Grounded on `smee/tftp.go`'s
//! `tftpHandler.ReadFile` (fixed asset set plus `test.1mb`/`test.8mb`
//! fake files for link-MTU diagnostics).

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;

/// The known, real (non-fake) asset filenames this server ever hands
/// out (spec.md §4.C "a per-architecture iPXE binary name").
pub const KNOWN_ASSETS: &[&str] = &["ipxe.efi", "snp.efi", "undionly.kpxe"];

const FAKE_1MB: &str = "test.1mb";
const FAKE_8MB: &str = "test.8mb";

/// In-memory read-only asset store, loaded once at startup from a
/// directory of iPXE binaries. Write attempts are rejected by callers
/// before they ever reach this type (spec.md §4.D "Read-only; write
/// attempts return permission-denied").
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    assets: HashMap<String, Bytes>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file in `KNOWN_ASSETS` that exists under `dir`.
    /// Missing files are skipped rather than erroring — an operator may
    /// only care about a subset of architectures.
    pub fn load_dir(dir: &Path) -> std::io::Result<Self> {
        let mut assets = HashMap::new();
        for name in KNOWN_ASSETS {
            let path = dir.join(name);
            if path.exists() {
                assets.insert((*name).to_string(), Bytes::from(std::fs::read(path)?));
            }
        }
        Ok(Self { assets })
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Bytes) {
        self.assets.insert(name.into(), bytes);
    }

    /// A real asset's bytes, or the generated fake payload for
    /// `test.1mb`/`test.8mb` (spec.md §4.D "Optional 'fake' files ...
    /// return N zero bytes for link-MTU diagnostics").
    pub fn get(&self, name: &str) -> Option<Bytes> {
        match name {
            FAKE_1MB => Some(zero_bytes(1024 * 1024)),
            FAKE_8MB => Some(zero_bytes(8 * 1024 * 1024)),
            other => self.assets.get(other).cloned(),
        }
    }
}

fn zero_bytes(len: usize) -> Bytes {
    Bytes::from(vec![0u8; len])
}

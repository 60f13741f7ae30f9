//! GGUF container checks.

use std::io::Read;
use std::path::Path;

/// Magic bytes at the start of every GGUF file.
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Check the file header for the GGUF magic, independent of the extension.
pub fn has_gguf_magic(path: &Path) -> std::io::Result<bool> {
    let mut header = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == GGUF_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

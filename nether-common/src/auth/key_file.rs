use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use crate::crypto::keys::Keypair;

/// Loads a keypair from a file or generates a new one if the file does not exist.
///
/// The file holds the 32-byte secret scalar as a single hex line.
pub fn load_or_generate_keypair(path: &Path) -> io::Result<Keypair> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let bytes = hex::decode(contents.trim()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Keypair::from_secret_bytes(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    } else {
        let keypair = Keypair::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, hex::encode(keypair.secret_bytes()))?;
        info!("🔑 Generated new identity at {:?}", path);
        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("nether.key");

        let first = load_or_generate_keypair(&path).unwrap();
        assert!(path.exists());

        let second = load_or_generate_keypair(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nether.key");
        fs::write(&path, "zz-not-hex").unwrap();

        let err = load_or_generate_keypair(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

pub mod cipher;
pub mod format;

pub use cipher::{KdfParams, VaultKey};
pub use format::{copy_atomic, read_header, write_atomic, VaultFile, VaultHeader};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use format::Seal;

/// An opened database file: its header plus the key, if encrypted.
#[derive(Debug)]
pub struct Vault {
    path: PathBuf,
    header: VaultHeader,
    key: Option<VaultKey>,
}

impl Vault {
    /// Prepare a new vault at `path`. Nothing is written until `write`.
    pub fn create(path: &Path, passphrase: Option<&str>, kdf: KdfParams) -> Result<Self> {
        let (header, key) = match passphrase {
            Some(passphrase) => {
                let salt = cipher::random_salt();
                let key = cipher::derive_key(passphrase, &salt, &kdf)?;
                (VaultHeader::Encrypted { kdf, salt }, Some(key))
            }
            None => (VaultHeader::Plain, None),
        };

        Ok(Self {
            path: path.to_path_buf(),
            header,
            key,
        })
    }

    /// Read and decrypt (or checksum) the file. Returns the plaintext body.
    pub fn open(path: &Path, passphrase: Option<&str>) -> Result<(Self, Vec<u8>)> {
        let bytes = fs::read(path)?;
        let file = VaultFile::parse(&bytes)?;

        match (&file.header, &file.seal) {
            (VaultHeader::Plain, _) => {
                file.verify_digest()?;
                let vault = Self {
                    path: path.to_path_buf(),
                    header: VaultHeader::Plain,
                    key: None,
                };
                Ok((vault, file.body))
            }
            (VaultHeader::Encrypted { kdf, salt }, Seal::Nonce(nonce)) => {
                let passphrase = passphrase.ok_or(EngineError::Auth)?;
                let key = cipher::derive_key(passphrase, salt, kdf)?;
                let plaintext = cipher::open(&key, nonce, &file.header.encode(), &file.body)?;
                let vault = Self {
                    path: path.to_path_buf(),
                    header: file.header.clone(),
                    key: Some(key),
                };
                Ok((vault, plaintext))
            }
            (VaultHeader::Encrypted { .. }, Seal::Digest(_)) => {
                Err(EngineError::Storage("encrypted database without nonce".into()))
            }
        }
    }

    /// Seal `plaintext` and atomically replace the file
    pub fn write(&self, plaintext: &[u8]) -> Result<()> {
        let file = match (&self.header, &self.key) {
            (VaultHeader::Plain, _) => VaultFile::plain(plaintext.to_vec()),
            (VaultHeader::Encrypted { .. }, Some(key)) => {
                let (nonce, body) = cipher::seal(key, &self.header.encode(), plaintext)?;
                VaultFile {
                    header: self.header.clone(),
                    seal: Seal::Nonce(nonce),
                    body,
                }
            }
            (VaultHeader::Encrypted { .. }, None) => return Err(EngineError::Locked),
        };

        write_atomic(&self.path, &file.to_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &VaultHeader {
        &self.header
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.is_encrypted()
    }
}

//! On-disk container: a self-describing header followed by the store body.
//!
//! ```text
//! magic[8] | version u8 | flags u8 |
//!   encrypted: kdf_id u8 | m_cost u32 | t_cost u32 | p_cost u32 | salt[16] | nonce[12]
//!   plain:     sha256(body)[32]
//! body_len u64 | body
//! ```
//! Integers are little-endian. For encrypted files every byte before the
//! nonce is authenticated as AES-GCM associated data.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::cipher::{KdfParams, NONCE_LEN, SALT_LEN};
use crate::error::{EngineError, Result};

pub const MAGIC: &[u8; 8] = b"TJRNLDB\0";
pub const FORMAT_VERSION: u8 = 1;

const FLAG_ENCRYPTED: u8 = 0b0000_0001;
const KDF_ARGON2ID: u8 = 1;
const DIGEST_LEN: usize = 32;

// Longest possible prefix before body_len
const MAX_PREFIX_LEN: usize = 8 + 1 + 1 + 1 + 12 + SALT_LEN + NONCE_LEN + DIGEST_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultHeader {
    Plain,
    Encrypted { kdf: KdfParams, salt: [u8; SALT_LEN] },
}

impl VaultHeader {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, VaultHeader::Encrypted { .. })
    }

    /// Header bytes up to, not including, the seal
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        match self {
            VaultHeader::Plain => out.push(0),
            VaultHeader::Encrypted { kdf, salt } => {
                out.push(FLAG_ENCRYPTED);
                out.push(KDF_ARGON2ID);
                out.extend_from_slice(&kdf.m_cost_kib.to_le_bytes());
                out.extend_from_slice(&kdf.t_cost.to_le_bytes());
                out.extend_from_slice(&kdf.p_cost.to_le_bytes());
                out.extend_from_slice(salt);
            }
        }
        out
    }
}

/// Integrity material that sits between header and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seal {
    Digest([u8; DIGEST_LEN]),
    Nonce([u8; NONCE_LEN]),
}

#[derive(Debug, Clone)]
pub struct VaultFile {
    pub header: VaultHeader,
    pub seal: Seal,
    pub body: Vec<u8>,
}

impl VaultFile {
    pub fn plain(body: Vec<u8>) -> Self {
        let seal = Seal::Digest(digest(&body));
        Self {
            header: VaultHeader::Plain,
            seal,
            body,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        match &self.seal {
            Seal::Digest(d) => out.extend_from_slice(d),
            Seal::Nonce(n) => out.extend_from_slice(n),
        }
        out.extend_from_slice(&(self.body.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let header = parse_header(&mut cursor)?;

        let seal = match header {
            VaultHeader::Plain => Seal::Digest(cursor.array()?),
            VaultHeader::Encrypted { .. } => Seal::Nonce(cursor.array()?),
        };

        let body_len = cursor.u64()?;
        let body_len = usize::try_from(body_len)
            .map_err(|_| EngineError::Storage("database body too large".into()))?;
        let body = cursor.take(body_len)?.to_vec();
        if !cursor.is_empty() {
            return Err(EngineError::Storage("trailing bytes after database body".into()));
        }

        Ok(Self { header, seal, body })
    }

    /// For plain files, check the stored digest against the body
    pub fn verify_digest(&self) -> Result<()> {
        if let Seal::Digest(expected) = &self.seal {
            if digest(&self.body) != *expected {
                return Err(EngineError::Storage("database checksum mismatch".into()));
            }
        }
        Ok(())
    }
}

fn digest(body: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(body));
    out
}

fn parse_header(cursor: &mut Cursor<'_>) -> Result<VaultHeader> {
    let magic = cursor
        .take(MAGIC.len())
        .map_err(|_| EngineError::validation("not a trade journal database file"))?;
    if magic != MAGIC {
        return Err(EngineError::validation("not a trade journal database file"));
    }

    let version = cursor.u8()?;
    if version != FORMAT_VERSION {
        return Err(EngineError::validation(format!(
            "unsupported database format version {}",
            version
        )));
    }

    let flags = cursor.u8()?;
    if flags & FLAG_ENCRYPTED == 0 {
        return Ok(VaultHeader::Plain);
    }

    let kdf_id = cursor.u8()?;
    if kdf_id != KDF_ARGON2ID {
        return Err(EngineError::validation(format!("unknown KDF id {}", kdf_id)));
    }
    let kdf = KdfParams {
        m_cost_kib: cursor.u32()?,
        t_cost: cursor.u32()?,
        p_cost: cursor.u32()?,
    };
    let salt = cursor.array()?;
    Ok(VaultHeader::Encrypted { kdf, salt })
}

/// Read only the header of a database file. `None` if the file does not exist.
pub fn read_header(path: &Path) -> Result<Option<VaultHeader>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut prefix = Vec::with_capacity(MAX_PREFIX_LEN);
    file.take(MAX_PREFIX_LEN as u64).read_to_end(&mut prefix)?;
    let mut cursor = Cursor::new(&prefix);
    parse_header(&mut cursor).map(Some)
}

/// Replace `path` with `bytes` via a synced temp file and a rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Copy `src` over `dest` through a synced temp file beside `dest`
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(dest);
    let result = (|| -> std::io::Result<()> {
        fs::copy(src, &tmp)?;
        File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, dest)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| EngineError::Storage("truncated database file".into()))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

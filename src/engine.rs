//! Database lifecycle and the single lock every request goes through.
//!
//! ```text
//! Unconfigured --init--> Unlocked <--unlock/lock--> Locked
//! ```
//! A plain (unencrypted) file is loaded as soon as the engine opens it.
//! An encrypted file stays `Locked` until `unlock` derives the key.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::models::DbStatus;
use crate::vault::{copy_atomic, read_header, write_atomic, Vault, VaultFile, VaultHeader};

pub const MIN_PASSPHRASE_LEN: usize = 8;

enum Lifecycle {
    Unconfigured,
    Locked { encrypted: bool },
    Unlocked { vault: Vault, db: Database },
}

impl Lifecycle {
    fn status(&self) -> DbStatus {
        match self {
            Lifecycle::Unconfigured => DbStatus {
                configured: false,
                encrypted: false,
                unlocked: false,
            },
            Lifecycle::Locked { encrypted } => DbStatus {
                configured: true,
                encrypted: *encrypted,
                unlocked: false,
            },
            Lifecycle::Unlocked { vault, .. } => DbStatus {
                configured: true,
                encrypted: vault.is_encrypted(),
                unlocked: true,
            },
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    state: Mutex<Lifecycle>,
}

impl Engine {
    /// Look at the configured database file and pick the starting state
    pub fn open(config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::validation(format!("{:#}", e)))?;

        let path = config.db_path();
        let state = Self::evaluate(&path)?;
        log::info!("Opened journal engine at {} ({:?})", path.display(), state.status());

        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Only I/O errors other than a missing file are returned; an unreadable
    /// or foreign file leaves the engine `Locked` so status stays queryable.
    fn evaluate(path: &Path) -> Result<Lifecycle> {
        let header = match read_header(path) {
            Ok(header) => header,
            Err(EngineError::Io(e)) => return Err(EngineError::Io(e)),
            Err(e) => {
                log::error!("Unreadable database header at {}: {}", path.display(), e);
                return Ok(Lifecycle::Locked { encrypted: false });
            }
        };

        match header {
            None => Ok(Lifecycle::Unconfigured),
            Some(header) if header.is_encrypted() => Ok(Lifecycle::Locked { encrypted: true }),
            Some(_) => match Self::load(path, None) {
                Ok((vault, db)) => Ok(Lifecycle::Unlocked { vault, db }),
                Err(e) => {
                    log::error!("Failed to load unencrypted database: {}", e);
                    Ok(Lifecycle::Locked { encrypted: false })
                }
            },
        }
    }

    fn load(path: &Path, passphrase: Option<&str>) -> Result<(Vault, Database)> {
        let (vault, body) = Vault::open(path, passphrase)?;
        let db = Database::from_snapshot_bytes(&body)?;
        Ok((vault, db))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Lifecycle>> {
        self.state
            .lock()
            .map_err(|_| EngineError::Internal("engine state lock poisoned".into()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.db_path()
    }

    pub fn status(&self) -> Result<DbStatus> {
        Ok(self.lock_state()?.status())
    }

    /// Create the database file. Encrypted databases need a passphrase of
    /// at least `MIN_PASSPHRASE_LEN` characters.
    pub fn init(&self, encrypted: bool, passphrase: Option<&str>) -> Result<DbStatus> {
        let mut state = self.lock_state()?;
        let path = self.db_path();
        if !matches!(*state, Lifecycle::Unconfigured) || path.exists() {
            return Err(EngineError::Conflict("database already configured".into()));
        }

        let passphrase = if encrypted {
            let passphrase = passphrase
                .ok_or_else(|| EngineError::validation("passphrase is required for an encrypted database"))?;
            if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
                return Err(EngineError::validation(format!(
                    "passphrase must be at least {} characters",
                    MIN_PASSPHRASE_LEN
                )));
            }
            Some(passphrase)
        } else {
            None
        };

        let vault = Vault::create(&path, passphrase, self.config.kdf)?;
        let db = Database::create_new()?;
        vault.write(&Database::snapshot_bytes(db.conn())?)?;

        log::info!(
            "Initialized {} database at {}",
            if encrypted { "encrypted" } else { "unencrypted" },
            path.display()
        );
        *state = Lifecycle::Unlocked { vault, db };
        Ok(state.status())
    }

    pub fn unlock(&self, passphrase: &str) -> Result<DbStatus> {
        let mut state = self.lock_state()?;
        let encrypted = match &*state {
            Lifecycle::Unconfigured => {
                return Err(EngineError::validation("database is not configured"));
            }
            Lifecycle::Unlocked { .. } => return Ok(state.status()),
            Lifecycle::Locked { encrypted } => *encrypted,
        };

        let passphrase = encrypted.then_some(passphrase);
        match Self::load(&self.db_path(), passphrase) {
            Ok((vault, db)) => {
                *state = Lifecycle::Unlocked { vault, db };
                log::info!("Database unlocked");
                Ok(state.status())
            }
            Err(e) => {
                log::warn!("Unlock failed ({})", e.kind());
                Err(e)
            }
        }
    }

    /// Drop the key and the working copy. Unencrypted databases stay open.
    pub fn lock(&self) -> Result<DbStatus> {
        let mut state = self.lock_state()?;
        let holds_key = matches!(&*state, Lifecycle::Unlocked { vault, .. } if vault.is_encrypted());
        if holds_key {
            *state = Lifecycle::Locked { encrypted: true };
            log::info!("Database locked");
        }
        Ok(state.status())
    }

    /// Run a read-only query against the unlocked database
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let state = self.lock_state()?;
        match &*state {
            Lifecycle::Unlocked { db, .. } => f(db.conn()),
            _ => Err(EngineError::Locked),
        }
    }

    /// Run a mutation in one transaction and persist the result.
    /// The transaction commits only once the file has been written.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let state = self.lock_state()?;
        let Lifecycle::Unlocked { vault, db } = &*state else {
            return Err(EngineError::Locked);
        };

        let tx = db.conn().unchecked_transaction()?;
        let conn: &Connection = &tx;
        let value = f(conn)?;

        let body = Database::snapshot_bytes(conn)?;
        vault.write(&body)?;
        tx.commit()?;
        Ok(value)
    }

    /// Copy the database file, still sealed, to `dest`
    pub fn export_backup(&self, dest: &Path) -> Result<DbStatus> {
        let state = self.lock_state()?;
        if !matches!(*state, Lifecycle::Unlocked { .. }) {
            return Err(EngineError::Locked);
        }

        copy_atomic(&self.db_path(), dest)?;
        log::info!("Exported backup to {}", dest.display());
        Ok(state.status())
    }

    /// Replace the database file with `src` and start over from its header.
    /// The active file is untouched unless `src` is a readable journal file.
    pub fn import_backup(&self, src: &Path) -> Result<DbStatus> {
        let mut state = self.lock_state()?;
        if !matches!(*state, Lifecycle::Unlocked { .. }) {
            return Err(EngineError::Locked);
        }

        let bytes = fs::read(src)?;
        let file = VaultFile::parse(&bytes)?;
        match &file.header {
            VaultHeader::Plain => {
                file.verify_digest()?;
                Database::from_snapshot_bytes(&file.body)?;
            }
            VaultHeader::Encrypted { kdf, .. } => kdf.check_bounds()?,
        }

        let path = self.db_path();
        write_atomic(&path, &bytes)?;
        log::info!("Imported backup from {}", src.display());

        match Self::evaluate(&path) {
            Ok(next) => *state = next,
            Err(e) => {
                *state = Lifecycle::Locked {
                    encrypted: file.header.is_encrypted(),
                };
                return Err(e);
            }
        }
        Ok(state.status())
    }
}

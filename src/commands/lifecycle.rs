use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::Result;
use crate::models::AppStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInitRequest {
    pub encrypted: bool,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DbUnlockRequest {
    pub passphrase: String,
}

// Keep passphrases out of debug output
impl std::fmt::Debug for DbUnlockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbUnlockRequest")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

pub fn get_status(engine: &Engine) -> Result<AppStatus> {
    Ok(engine.status()?.into())
}

pub fn db_init(engine: &Engine, req: DbInitRequest) -> Result<AppStatus> {
    Ok(engine.init(req.encrypted, req.passphrase.as_deref())?.into())
}

pub fn db_unlock(engine: &Engine, req: DbUnlockRequest) -> Result<AppStatus> {
    Ok(engine.unlock(&req.passphrase)?.into())
}

pub fn db_lock(engine: &Engine) -> Result<AppStatus> {
    Ok(engine.lock()?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_config;
    use crate::error::EngineError;

    #[test]
    fn test_init_unlock_lock_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).unwrap();
        assert!(!get_status(&engine).unwrap().db.configured);

        let status = db_init(
            &engine,
            DbInitRequest {
                encrypted: true,
                passphrase: Some("hunter2hunter2".into()),
            },
        )
        .unwrap();
        assert!(status.db.configured && status.db.encrypted && status.db.unlocked);

        assert!(!db_lock(&engine).unwrap().db.unlocked);
        let err = db_unlock(
            &engine,
            DbUnlockRequest {
                passphrase: "hunter3hunter3".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Auth));
        assert!(!get_status(&engine).unwrap().db.unlocked);

        let status = db_unlock(
            &engine,
            DbUnlockRequest {
                passphrase: "hunter2hunter2".into(),
            },
        )
        .unwrap();
        assert!(status.db.unlocked);
    }

    #[test]
    fn test_unlock_request_debug_hides_passphrase() {
        let req = DbUnlockRequest {
            passphrase: "super secret".into(),
        };
        assert!(!format!("{:?}", req).contains("super secret"));
    }
}

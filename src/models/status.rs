use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStatus {
    pub configured: bool,
    pub encrypted: bool,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub db: DbStatus,
}

impl From<DbStatus> for AppStatus {
    fn from(db: DbStatus) -> Self {
        AppStatus { db }
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::Engine;
use crate::error::Result;
use crate::models::AppStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupExportRequest {
    #[serde(rename = "destPath", alias = "dest_path")]
    pub dest_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupImportRequest {
    #[serde(rename = "srcPath", alias = "src_path")]
    pub src_path: PathBuf,
}

pub fn backup_export(engine: &Engine, req: BackupExportRequest) -> Result<AppStatus> {
    Ok(engine.export_backup(&req.dest_path)?.into())
}

/// Destructive: the caller is expected to have confirmed the replacement
pub fn backup_import(engine: &Engine, req: BackupImportRequest) -> Result<AppStatus> {
    Ok(engine.import_backup(&req.src_path)?.into())
}

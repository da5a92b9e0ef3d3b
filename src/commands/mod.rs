pub mod backup;
pub mod import;
pub mod journal;
pub mod lifecycle;
pub mod rules;
pub mod settings;
pub mod trades;

pub use backup::*;
pub use import::*;
pub use journal::*;
pub use lifecycle::*;
pub use rules::*;
pub use settings::*;
pub use trades::*;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{Rule, TradeInput, UpdateSettingsInput};

/// One call into the engine, as sent over the JSON transport:
/// `{"cmd": "trades_get", "args": {"id": "..."}}`
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum Request {
    GetStatus,
    DbInit(DbInitRequest),
    DbUnlock(DbUnlockRequest),
    DbLock,
    SettingsGet,
    SettingsUpdate(UpdateSettingsInput),
    RulesList,
    RulesUpsert(Rule),
    RulesDelete(IdRequest),
    TradesList(TradesListRequest),
    TradesGet(IdRequest),
    TradesCreate(TradeInput),
    TradesUpdate(TradeUpdateRequest),
    TradesDelete(IdRequest),
    JournalMonthSummary(MonthSummaryRequest),
    JournalDayTrades(DayTradesRequest),
    CsvImportGeneric(CsvImportRequest),
    BackupExport(BackupExportRequest),
    BackupImport(BackupImportRequest),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetStatus => "get_status",
            Request::DbInit(_) => "db_init",
            Request::DbUnlock(_) => "db_unlock",
            Request::DbLock => "db_lock",
            Request::SettingsGet => "settings_get",
            Request::SettingsUpdate(_) => "settings_update",
            Request::RulesList => "rules_list",
            Request::RulesUpsert(_) => "rules_upsert",
            Request::RulesDelete(_) => "rules_delete",
            Request::TradesList(_) => "trades_list",
            Request::TradesGet(_) => "trades_get",
            Request::TradesCreate(_) => "trades_create",
            Request::TradesUpdate(_) => "trades_update",
            Request::TradesDelete(_) => "trades_delete",
            Request::JournalMonthSummary(_) => "journal_month_summary",
            Request::JournalDayTrades(_) => "journal_day_trades",
            Request::CsvImportGeneric(_) => "csv_import_generic",
            Request::BackupExport(_) => "backup_export",
            Request::BackupImport(_) => "backup_import",
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Dispatch a request. Operations with no result return `null`.
pub fn handle(engine: &Engine, req: Request) -> Result<Value> {
    match req {
        Request::GetStatus => to_value(get_status(engine)?),
        Request::DbInit(r) => to_value(db_init(engine, r)?),
        Request::DbUnlock(r) => to_value(db_unlock(engine, r)?),
        Request::DbLock => to_value(db_lock(engine)?),
        Request::SettingsGet => to_value(settings_get(engine)?),
        Request::SettingsUpdate(r) => to_value(settings_update(engine, r)?),
        Request::RulesList => to_value(rules_list(engine)?),
        Request::RulesUpsert(rule) => {
            rules_upsert(engine, rule)?;
            Ok(Value::Null)
        }
        Request::RulesDelete(r) => {
            rules_delete(engine, r)?;
            Ok(Value::Null)
        }
        Request::TradesList(r) => to_value(trades_list(engine, r)?),
        Request::TradesGet(r) => to_value(trades_get(engine, r)?),
        Request::TradesCreate(input) => to_value(trades_create(engine, input)?),
        Request::TradesUpdate(r) => to_value(trades_update(engine, r)?),
        Request::TradesDelete(r) => {
            trades_delete(engine, r)?;
            Ok(Value::Null)
        }
        Request::JournalMonthSummary(r) => to_value(journal_month_summary(engine, r)?),
        Request::JournalDayTrades(r) => to_value(journal_day_trades(engine, r)?),
        Request::CsvImportGeneric(r) => to_value(csv_import_generic(engine, r)?),
        Request::BackupExport(r) => to_value(backup_export(engine, r)?),
        Request::BackupImport(r) => to_value(backup_import(engine, r)?),
    }
}

/// Commands whose args are all optional; `args` may be left out
const OPTIONAL_ARGS: &[&str] = &["trades_list"];

fn parse_request(raw: &str) -> serde_json::Result<Request> {
    let mut value: Value = serde_json::from_str(raw)?;
    if let Some(obj) = value.as_object_mut() {
        let optional = obj
            .get("cmd")
            .and_then(Value::as_str)
            .is_some_and(|cmd| OPTIONAL_ARGS.contains(&cmd));
        if optional && !obj.contains_key("args") {
            obj.insert("args".into(), json!({}));
        }
    }
    serde_json::from_value(value)
}

/// JSON in, JSON out: `{"ok": <result>}` or `{"error": {"kind", "message"}}`
pub fn handle_json(engine: &Engine, raw: &str) -> String {
    let response = match parse_request(raw) {
        Ok(req) => {
            let name = req.name();
            match handle(engine, req) {
                Ok(value) => json!({ "ok": value }),
                Err(e) => {
                    log::debug!("{} failed: {}", name, e);
                    json!({ "error": e.to_payload() })
                }
            }
        }
        Err(e) => {
            let err = EngineError::validation(format!("malformed request: {}", e));
            json!({ "error": err.to_payload() })
        }
    };
    response.to_string()
}

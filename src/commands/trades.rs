use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::commands::rules::{list_rules, IdRequest};
use crate::commands::settings::{current_timezone, parse_timezone};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{Pnl, Trade, TradeInput, TradeWithRules};

pub const TRADE_COLUMNS: &str = "id, market, symbol, side, qty, entry_time_utc, exit_time_utc, timezone, session, \
     pnl_amount, pnl_includes_fees, fees, pnl_net, pnl_gross, notes, created_at_utc, updated_at_utc";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradesListRequest {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeUpdateRequest {
    pub id: String,
    pub input: TradeInput,
}

/// Helper function to map a database row to a Trade struct.
/// Column order must match `TRADE_COLUMNS`.
pub fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        market: row.get(1)?,
        symbol: row.get(2)?,
        side: row.get(3)?,
        qty: row.get(4)?,
        entry_time_utc: row.get(5)?,
        exit_time_utc: row.get(6)?,
        timezone: row.get(7)?,
        session: row.get(8)?,
        pnl_amount: row.get(9)?,
        pnl_includes_fees: row.get(10)?,
        fees: row.get(11)?,
        pnl_net: row.get(12)?,
        pnl_gross: row.get(13)?,
        notes: row.get(14)?,
        created_at_utc: row.get(15)?,
        updated_at_utc: row.get(16)?,
    })
}

pub fn list_trades(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Trade>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM trades
         ORDER BY exit_time_utc DESC, id ASC
         LIMIT ?1 OFFSET ?2",
        TRADE_COLUMNS
    ))?;

    let trades = stmt
        .query_map(params![limit, offset], map_row_to_trade)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(trades)
}

pub fn get_trade(conn: &Connection, id: &str) -> Result<Trade> {
    conn.query_row(
        &format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS),
        params![id],
        map_row_to_trade,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found(format!("trade {}", id)))
}

/// The trade, every current rule, and a checked flag for each of those rules.
/// Checks left behind by deleted rules are not returned.
pub fn get_trade_with_rules(conn: &Connection, id: &str) -> Result<TradeWithRules> {
    let trade = get_trade(conn, id)?;
    let rules = list_rules(conn)?;

    let mut stmt = conn.prepare(
        "SELECT r.id, COALESCE(tr.checked, 0)
         FROM rules r
         LEFT JOIN trade_rules tr ON tr.rule_id = r.id AND tr.trade_id = ?1",
    )?;
    let checked = stmt
        .query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;

    Ok(TradeWithRules {
        trade,
        rules,
        checked,
    })
}

pub fn create_trade(conn: &Connection, input: TradeInput, default_tz: &str) -> Result<Trade> {
    validate_trade(&input)?;
    let timezone = trade_timezone(&input, default_tz)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().timestamp_millis();
    let pnl = Pnl::derive(input.pnl_amount, input.fees, input.pnl_includes_fees);

    conn.execute(
        &format!(
            "INSERT INTO trades ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            TRADE_COLUMNS
        ),
        params![
            id,
            input.market,
            input.symbol.trim(),
            input.side,
            input.qty,
            input.entry_time_utc,
            input.exit_time_utc,
            timezone,
            trade_session(&input),
            input.pnl_amount,
            input.pnl_includes_fees,
            input.fees,
            pnl.net,
            pnl.gross,
            input.notes,
            now,
            now
        ],
    )?;

    write_rule_checks(conn, &id, input.rules_checked.as_ref())?;

    get_trade(conn, &id)
}

/// Full replace of the editable fields and of the rule-check set
pub fn update_trade(conn: &Connection, id: &str, input: TradeInput, default_tz: &str) -> Result<Trade> {
    validate_trade(&input)?;
    let timezone = trade_timezone(&input, default_tz)?;

    let now = Utc::now().timestamp_millis();
    let pnl = Pnl::derive(input.pnl_amount, input.fees, input.pnl_includes_fees);

    let updated = conn.execute(
        "UPDATE trades SET
            market=?2, symbol=?3, side=?4, qty=?5, entry_time_utc=?6, exit_time_utc=?7, timezone=?8, session=?9,
            pnl_amount=?10, pnl_includes_fees=?11, fees=?12, pnl_net=?13, pnl_gross=?14, notes=?15, updated_at_utc=?16
         WHERE id=?1",
        params![
            id,
            input.market,
            input.symbol.trim(),
            input.side,
            input.qty,
            input.entry_time_utc,
            input.exit_time_utc,
            timezone,
            trade_session(&input),
            input.pnl_amount,
            input.pnl_includes_fees,
            input.fees,
            pnl.net,
            pnl.gross,
            input.notes,
            now
        ],
    )?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("trade {}", id)));
    }

    conn.execute("DELETE FROM trade_rules WHERE trade_id = ?1", params![id])?;
    write_rule_checks(conn, id, input.rules_checked.as_ref())?;

    get_trade(conn, id)
}

pub fn delete_trade(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM trade_rules WHERE trade_id = ?1", params![id])?;
    let removed = conn.execute("DELETE FROM trades WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(EngineError::not_found(format!("trade {}", id)));
    }
    Ok(())
}

/// One row per rule that exists now; ids in the map with no rule are ignored
fn write_rule_checks(conn: &Connection, trade_id: &str, checked: Option<&HashMap<String, bool>>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM rules")?;
    let rule_ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for rule_id in rule_ids {
        let is_checked = checked
            .and_then(|m| m.get(&rule_id).copied())
            .unwrap_or(false);
        conn.execute(
            "INSERT INTO trade_rules (trade_id, rule_id, checked) VALUES (?1, ?2, ?3)",
            params![trade_id, rule_id, is_checked],
        )?;
    }
    Ok(())
}

/// Explicit zones must be known to chrono-tz and are stored by canonical name
fn trade_timezone(input: &TradeInput, default_tz: &str) -> Result<String> {
    match input.timezone.as_deref().map(str::trim) {
        Some(tz) if !tz.is_empty() => Ok(parse_timezone(tz)?.name().to_string()),
        _ => Ok(default_tz.to_string()),
    }
}

fn trade_session(input: &TradeInput) -> String {
    let session = input.session.trim();
    if session.is_empty() {
        "other".to_string()
    } else {
        session.to_string()
    }
}

fn validate_trade(input: &TradeInput) -> Result<()> {
    if input.symbol.trim().is_empty() {
        return Err(EngineError::validation("symbol is required"));
    }
    // Soft expectations: recorded, not enforced
    if input.qty <= 0.0 {
        log::warn!("Saving trade {} with non-positive qty {}", input.symbol.trim(), input.qty);
    }
    if input.fees < 0.0 {
        log::warn!("Saving trade {} with negative fees {}", input.symbol.trim(), input.fees);
    }
    if input.exit_time_utc < input.entry_time_utc {
        log::warn!("Saving trade {} with exit before entry", input.symbol.trim());
    }
    Ok(())
}

pub fn trades_list(engine: &Engine, req: TradesListRequest) -> Result<Vec<Trade>> {
    let config = engine.config();
    let limit = req.limit.unwrap_or(config.trades_page_default);
    let offset = req.offset.unwrap_or(0);

    if limit < 1 || limit > config.trades_page_max {
        return Err(EngineError::validation(format!(
            "limit must be between 1 and {}",
            config.trades_page_max
        )));
    }
    if offset < 0 {
        return Err(EngineError::validation("offset must not be negative"));
    }

    engine.read(|conn| list_trades(conn, limit, offset))
}

pub fn trades_get(engine: &Engine, req: IdRequest) -> Result<TradeWithRules> {
    engine.read(|conn| get_trade_with_rules(conn, &req.id))
}

pub fn trades_create(engine: &Engine, input: TradeInput) -> Result<Trade> {
    let default_tz = engine.config().default_timezone.clone();
    engine.write(|conn| {
        let tz = current_timezone(conn, &default_tz)?;
        let trade = create_trade(conn, input, &tz)?;
        log::info!("Created trade {} ({})", trade.id, trade.symbol);
        Ok(trade)
    })
}

pub fn trades_update(engine: &Engine, req: TradeUpdateRequest) -> Result<Trade> {
    let default_tz = engine.config().default_timezone.clone();
    engine.write(|conn| {
        let tz = current_timezone(conn, &default_tz)?;
        update_trade(conn, &req.id, req.input, &tz)
    })
}

pub fn trades_delete(engine: &Engine, req: IdRequest) -> Result<()> {
    engine.write(|conn| {
        delete_trade(conn, &req.id)?;
        log::info!("Deleted trade {}", req.id);
        Ok(())
    })
}

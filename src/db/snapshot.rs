use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::commands::trades::{map_row_to_trade, TRADE_COLUMNS};
use crate::error::Result;
use crate::models::{Rule, Trade, TradeRuleCheck};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value_json: String,
}

/// Full contents of the store, as persisted inside the database file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at_utc: i64,
    #[serde(default)]
    pub settings: Vec<SettingEntry>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub trade_rules: Vec<TradeRuleCheck>,
}

impl Snapshot {
    pub fn capture(conn: &Connection, schema_version: u32) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT key, value_json FROM settings ORDER BY key")?;
        let settings = stmt
            .query_map([], |row| {
                Ok(SettingEntry {
                    key: row.get(0)?,
                    value_json: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT id, label, sort_order FROM rules ORDER BY id")?;
        let rules = stmt
            .query_map([], |row| {
                Ok(Rule {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    sort_order: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!("SELECT {} FROM trades ORDER BY id", TRADE_COLUMNS))?;
        let trades = stmt
            .query_map([], map_row_to_trade)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt =
            conn.prepare("SELECT trade_id, rule_id, checked FROM trade_rules ORDER BY trade_id, rule_id")?;
        let trade_rules = stmt
            .query_map([], |row| {
                Ok(TradeRuleCheck {
                    trade_id: row.get(0)?,
                    rule_id: row.get(1)?,
                    checked: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Snapshot {
            schema_version,
            saved_at_utc: chrono::Utc::now().timestamp_millis(),
            settings,
            rules,
            trades,
            trade_rules,
        })
    }

    /// Load every row into an empty, migrated database
    pub fn restore(&self, conn: &Connection) -> Result<()> {
        let tx = conn.unchecked_transaction()?;

        for entry in &self.settings {
            tx.execute(
                "INSERT INTO settings (key, value_json) VALUES (?1, ?2)",
                params![entry.key, entry.value_json],
            )?;
        }

        for rule in &self.rules {
            tx.execute(
                "INSERT INTO rules (id, label, sort_order) VALUES (?1, ?2, ?3)",
                params![rule.id, rule.label, rule.sort_order],
            )?;
        }

        for t in &self.trades {
            tx.execute(
                &format!(
                    "INSERT INTO trades ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                    TRADE_COLUMNS
                ),
                params![
                    t.id,
                    t.market,
                    t.symbol,
                    t.side,
                    t.qty,
                    t.entry_time_utc,
                    t.exit_time_utc,
                    t.timezone,
                    t.session,
                    t.pnl_amount,
                    t.pnl_includes_fees,
                    t.fees,
                    t.pnl_net,
                    t.pnl_gross,
                    t.notes,
                    t.created_at_utc,
                    t.updated_at_utc
                ],
            )?;
        }

        for check in &self.trade_rules {
            tx.execute(
                "INSERT INTO trade_rules (trade_id, rule_id, checked) VALUES (?1, ?2, ?3)",
                params![check.trade_id, check.rule_id, check.checked],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

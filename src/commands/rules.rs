use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::Rule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare("SELECT id, label, sort_order FROM rules ORDER BY sort_order ASC, id ASC")?;
    let rules = stmt
        .query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                label: row.get(1)?,
                sort_order: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

pub fn upsert_rule(conn: &Connection, rule: &Rule) -> Result<()> {
    let id = rule.id.trim();
    if id.is_empty() {
        return Err(EngineError::validation("rule id is required"));
    }

    conn.execute(
        "INSERT INTO rules (id, label, sort_order) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET label = excluded.label, sort_order = excluded.sort_order",
        params![id, rule.label, rule.sort_order],
    )?;
    Ok(())
}

/// Removes the rule only. Existing checks for it stay behind as orphans.
pub fn delete_rule(conn: &Connection, id: &str) -> Result<()> {
    let removed = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(EngineError::not_found(format!("rule {}", id)));
    }
    Ok(())
}

pub fn rules_list(engine: &Engine) -> Result<Vec<Rule>> {
    engine.read(list_rules)
}

pub fn rules_upsert(engine: &Engine, rule: Rule) -> Result<()> {
    engine.write(|conn| upsert_rule(conn, &rule))
}

pub fn rules_delete(engine: &Engine, req: IdRequest) -> Result<()> {
    engine.write(|conn| delete_rule(conn, &req.id))
}

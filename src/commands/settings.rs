use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{Settings, UpdateSettingsInput};

const KEY_TIMEZONE: &str = "timezone";

/// Parse an IANA zone id, rejecting anything chrono-tz does not know
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::validation(format!("unknown timezone: {}", tz)))
}

pub fn read_timezone(conn: &Connection) -> Result<Option<String>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?1",
            params![KEY_TIMEZONE],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => {
            let tz: String = serde_json::from_str(&raw)
                .map_err(|e| EngineError::Storage(format!("parse timezone setting: {}", e)))?;
            Ok(Some(tz))
        }
        None => Ok(None),
    }
}

/// Zone used for aggregation and new trades; falls back without writing
pub fn current_timezone(conn: &Connection, default_tz: &str) -> Result<String> {
    Ok(read_timezone(conn)?.unwrap_or_else(|| default_tz.to_string()))
}

fn write_timezone(conn: &Connection, tz: &str) -> Result<()> {
    let raw = serde_json::to_string(tz)?;
    conn.execute(
        "INSERT INTO settings (key, value_json) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![KEY_TIMEZONE, raw],
    )?;
    Ok(())
}

pub fn settings_get(engine: &Engine) -> Result<Settings> {
    if let Some(timezone) = engine.read(read_timezone)? {
        return Ok(Settings { timezone });
    }

    let default_tz = engine.config().default_timezone.clone();
    engine.write(|conn| {
        // Another caller may have written it between the two lock scopes
        if let Some(timezone) = read_timezone(conn)? {
            return Ok(Settings { timezone });
        }
        let timezone = parse_timezone(&default_tz)?.name().to_string();
        write_timezone(conn, &timezone)?;
        log::info!("Initialized settings with default timezone {}", timezone);
        Ok(Settings { timezone })
    })
}

pub fn settings_update(engine: &Engine, req: UpdateSettingsInput) -> Result<Settings> {
    let timezone = parse_timezone(&req.timezone)?.name().to_string();
    engine.write(|conn| {
        write_timezone(conn, &timezone)?;
        log::info!("Timezone set to {}", timezone);
        Ok(Settings {
            timezone: timezone.clone(),
        })
    })
}

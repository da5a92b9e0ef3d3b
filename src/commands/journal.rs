use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::commands::settings::{current_timezone, parse_timezone};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{DaySummary, TradeHighlight};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthSummaryRequest {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayTradesRequest {
    pub date_local: String,
}

/// Local calendar date of a UTC instant under `tz`, DST rules included
fn local_date(tz: &Tz, utc_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(utc_ms).map(|dt| dt.with_timezone(tz).date_naive())
}

/// UTC millisecond window [first - 1 day, last + 2 days) around a local date range.
/// No zone is more than a day away from UTC, so the window always covers it.
fn padded_utc_window(first: NaiveDate, last: NaiveDate) -> Result<(i64, i64)> {
    let start = first
        .checked_sub_signed(Duration::days(1))
        .ok_or_else(|| EngineError::validation("date out of range"))?;
    let end = last
        .checked_add_signed(Duration::days(2))
        .ok_or_else(|| EngineError::validation("date out of range"))?;

    Ok((
        start.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
        end.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
    ))
}

fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=12).contains(&month) {
        return Err(EngineError::validation(format!("month must be 1-12, got {}", month)));
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| EngineError::validation(format!("invalid year {}", year)))?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| EngineError::validation(format!("invalid year {}", year)))?;
    Ok((first, last))
}

pub fn month_summary(conn: &Connection, tz: &Tz, year: i32, month: u32) -> Result<Vec<DaySummary>> {
    let (first, last) = month_bounds(year, month)?;
    let (start_ms, end_ms) = padded_utc_window(first, last)?;

    let mut stmt = conn.prepare(
        "SELECT exit_time_utc, pnl_net
         FROM trades
         WHERE exit_time_utc >= ?1 AND exit_time_utc < ?2",
    )?;
    let rows = stmt.query_map(params![start_ms, end_ms], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut days: BTreeMap<NaiveDate, (i64, f64)> = BTreeMap::new();
    for row in rows {
        let (exit_ms, pnl_net) = row?;
        let Some(date) = local_date(tz, exit_ms) else {
            continue;
        };
        if date.year() != year || date.month() != month {
            continue;
        }
        let entry = days.entry(date).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += pnl_net;
    }

    Ok(days
        .into_iter()
        .map(|(date, (trade_count, pnl_net_total))| DaySummary {
            date_local: date.format("%Y-%m-%d").to_string(),
            trade_count,
            pnl_net_total,
        })
        .collect())
}

pub fn day_trades(conn: &Connection, tz: &Tz, date_local: &str) -> Result<Vec<TradeHighlight>> {
    let date = NaiveDate::parse_from_str(date_local.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("invalid date_local: {}", date_local)))?;
    let (start_ms, end_ms) = padded_utc_window(date, date)?;

    let mut stmt = conn.prepare(
        "SELECT id, symbol, qty, pnl_net, notes, exit_time_utc
         FROM trades
         WHERE exit_time_utc >= ?1 AND exit_time_utc < ?2
         ORDER BY exit_time_utc ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![start_ms, end_ms], |row| {
        Ok(TradeHighlight {
            id: row.get(0)?,
            symbol: row.get(1)?,
            qty: row.get(2)?,
            pnl_net: row.get(3)?,
            notes: row.get(4)?,
            exit_time_utc: row.get(5)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        let highlight = row?;
        if local_date(tz, highlight.exit_time_utc) == Some(date) {
            out.push(highlight);
        }
    }
    Ok(out)
}

fn settings_zone(engine: &Engine, conn: &Connection) -> Result<Tz> {
    let tz = current_timezone(conn, &engine.config().default_timezone)?;
    parse_timezone(&tz)
}

pub fn journal_month_summary(engine: &Engine, req: MonthSummaryRequest) -> Result<Vec<DaySummary>> {
    engine.read(|conn| {
        let tz = settings_zone(engine, conn)?;
        month_summary(conn, &tz, req.year, req.month)
    })
}

pub fn journal_day_trades(engine: &Engine, req: DayTradesRequest) -> Result<Vec<TradeHighlight>> {
    engine.read(|conn| {
        let tz = settings_zone(engine, conn)?;
        day_trades(conn, &tz, &req.date_local)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::settings::settings_update;
    use crate::commands::trades::trades_create;
    use crate::engine::test_support::unlocked_engine;
    use crate::models::{Side, TradeInput, UpdateSettingsInput};
    use chrono::{TimeZone, Utc};

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap().timestamp_millis()
    }

    fn trade(symbol: &str, exit_time_utc: i64, pnl_amount: f64) -> TradeInput {
        TradeInput {
            market: "futures".into(),
            symbol: symbol.into(),
            side: Side::Short,
            qty: 1.0,
            entry_time_utc: exit_time_utc - 300_000,
            exit_time_utc,
            timezone: None,
            session: String::new(),
            pnl_amount,
            pnl_includes_fees: true,
            fees: 0.0,
            notes: String::new(),
            rules_checked: None,
        }
    }

    fn set_zone(engine: &Engine, tz: &str) {
        settings_update(engine, UpdateSettingsInput { timezone: tz.into() }).unwrap();
    }

    fn summary(engine: &Engine, year: i32, month: u32) -> Vec<DaySummary> {
        journal_month_summary(engine, MonthSummaryRequest { year, month }).unwrap()
    }

    #[test]
    fn test_late_evening_stays_on_local_day() {
        let (_dir, engine) = unlocked_engine();
        set_zone(&engine, "America/New_York");
        // 23:30 EST on Feb 7 is 04:30 UTC on Feb 8
        trades_create(&engine, trade("ES", utc_ms(2026, 2, 8, 4, 30), 50.0)).unwrap();

        let days = summary(&engine, 2026, 2);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date_local, "2026-02-07");
        assert_eq!(days[0].trade_count, 1);
        assert_eq!(days[0].pnl_net_total, 50.0);
    }

    #[test]
    fn test_zone_change_rebuckets() {
        let (_dir, engine) = unlocked_engine();
        trades_create(&engine, trade("ES", utc_ms(2026, 2, 8, 4, 30), 50.0)).unwrap();
        trades_create(&engine, trade("NQ", utc_ms(2026, 2, 8, 15, 0), -20.0)).unwrap();

        let days = summary(&engine, 2026, 2);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date_local, "2026-02-08");
        assert_eq!(days[0].trade_count, 2);
        assert_eq!(days[0].pnl_net_total, 30.0);

        set_zone(&engine, "America/New_York");
        let days = summary(&engine, 2026, 2);
        let dates: Vec<&str> = days.iter().map(|d| d.date_local.as_str()).collect();
        assert_eq!(dates, vec!["2026-02-07", "2026-02-08"]);
        assert_eq!(days[0].pnl_net_total, 50.0);
        assert_eq!(days[1].pnl_net_total, -20.0);
    }

    #[test]
    fn test_month_edges_follow_local_zone() {
        let (_dir, engine) = unlocked_engine();
        set_zone(&engine, "America/New_York");
        // Feb 28 22:00 EST
        trades_create(&engine, trade("ES", utc_ms(2026, 3, 1, 3, 0), 10.0)).unwrap();
        // Jan 31 20:00 EST, outside February locally
        trades_create(&engine, trade("ES", utc_ms(2026, 2, 1, 1, 0), 99.0)).unwrap();

        let feb = summary(&engine, 2026, 2);
        assert_eq!(feb.len(), 1);
        assert_eq!(feb[0].date_local, "2026-02-28");

        let jan = summary(&engine, 2026, 1);
        assert_eq!(jan.len(), 1);
        assert_eq!(jan[0].date_local, "2026-01-31");
        assert!(summary(&engine, 2026, 3).is_empty());
    }

    #[test]
    fn test_dst_transition_day() {
        let (_dir, engine) = unlocked_engine();
        set_zone(&engine, "America/New_York");
        // 2026-03-08 is spring-forward; 23:30 EDT is 03:30 UTC next day
        trades_create(&engine, trade("CL", utc_ms(2026, 3, 9, 3, 30), 5.0)).unwrap();
        // 23:30 EST the day before is 04:30 UTC
        trades_create(&engine, trade("CL", utc_ms(2026, 3, 8, 4, 30), 7.0)).unwrap();

        let dates: Vec<String> = summary(&engine, 2026, 3)
            .into_iter()
            .map(|d| d.date_local)
            .collect();
        assert_eq!(dates, vec!["2026-03-07", "2026-03-08"]);
    }

    #[test]
    fn test_invalid_month_rejected() {
        let (_dir, engine) = unlocked_engine();
        for month in [0, 13] {
            let err = journal_month_summary(&engine, MonthSummaryRequest { year: 2026, month }).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }
    }

    #[test]
    fn test_day_trades_lists_local_day_in_exit_order() {
        let (_dir, engine) = unlocked_engine();
        set_zone(&engine, "Asia/Tokyo");
        // 08:00 and 23:00 JST on Jan 10, then 00:30 JST on Jan 11
        let late = trades_create(&engine, trade("NK", utc_ms(2026, 1, 10, 14, 0), 1.0)).unwrap();
        let early = trades_create(&engine, trade("NK", utc_ms(2026, 1, 9, 23, 0), 2.0)).unwrap();
        trades_create(&engine, trade("NK", utc_ms(2026, 1, 10, 15, 30), 3.0)).unwrap();

        let day = journal_day_trades(
            &engine,
            DayTradesRequest {
                date_local: "2026-01-10".into(),
            },
        )
        .unwrap();
        let ids: Vec<&str> = day.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);
    }

    #[test]
    fn test_day_trades_rejects_bad_date() {
        let (_dir, engine) = unlocked_engine();
        let err = journal_day_trades(
            &engine,
            DayTradesRequest {
                date_local: "10/01/2026".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}

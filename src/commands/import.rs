use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::commands::settings::{current_timezone, parse_timezone};
use crate::commands::trades::create_trade;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{Side, TradeInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvImportRequest {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsvImportResult {
    pub created: i64,
    pub skipped: i64,
    pub errors: Vec<String>,
    /// Error messages dropped once the cap was reached
    #[serde(default)]
    pub errors_omitted: usize,
}

impl CsvImportResult {
    fn record_error(&mut self, line: u64, reason: impl std::fmt::Display, max_errors: usize) {
        if self.errors.len() < max_errors {
            self.errors.push(format!("line {}: {}", line, reason));
        } else {
            self.errors_omitted += 1;
        }
    }
}

const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// `Entry-Local`, ` entry local ` and `ENTRY_LOCAL` all map to `entry_local`
fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| header.matches(*d as char).count())
        .filter(|d| header.contains(*d as char))
        .unwrap_or(b',')
}

/// Positions of the accepted columns in the header row
#[derive(Debug, Default)]
struct ColumnMap {
    symbol: Option<usize>,
    side: Option<usize>,
    qty: Option<usize>,
    entry_local: Option<usize>,
    entry_utc_ms: Option<usize>,
    exit_local: Option<usize>,
    exit_utc_ms: Option<usize>,
    pnl_amount: Option<usize>,
    fees: Option<usize>,
    pnl_includes_fees: Option<usize>,
    session: Option<usize>,
    notes: Option<usize>,
    market: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let mut map = ColumnMap::default();
        for (idx, raw) in headers.iter().enumerate() {
            let slot = match normalize_header(raw).as_str() {
                "symbol" => &mut map.symbol,
                "side" => &mut map.side,
                "qty" => &mut map.qty,
                "entry_local" => &mut map.entry_local,
                "entry_time_utc_ms" => &mut map.entry_utc_ms,
                "exit_local" => &mut map.exit_local,
                "exit_time_utc_ms" => &mut map.exit_utc_ms,
                "pnl_amount" => &mut map.pnl_amount,
                "fees" => &mut map.fees,
                "pnl_includes_fees" => &mut map.pnl_includes_fees,
                "session" => &mut map.session,
                "notes" => &mut map.notes,
                "market" => &mut map.market,
                _ => continue,
            };
            // First occurrence wins
            slot.get_or_insert(idx);
        }

        let mut missing = Vec::new();
        if map.symbol.is_none() {
            missing.push("symbol");
        }
        if map.side.is_none() {
            missing.push("side");
        }
        if map.entry_local.is_none() && map.entry_utc_ms.is_none() {
            missing.push("entry_local|entry_time_utc_ms");
        }
        if map.exit_local.is_none() && map.exit_utc_ms.is_none() {
            missing.push("exit_local|exit_time_utc_ms");
        }
        if !missing.is_empty() {
            return Err(EngineError::validation(format!(
                "csv header is missing required columns: {}",
                missing.join(", ")
            )));
        }

        Ok(map)
    }
}

/// Tolerant cell parsing shared across all rows of one import
struct CellParser {
    number: Regex,
    grouped: Regex,
    plain: Regex,
    /// `;`-delimited exports write `1,5` for one and a half
    decimal_comma: bool,
}

impl CellParser {
    fn new(decimal_comma: bool) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| EngineError::Internal(format!("number pattern: {}", e)))
        };
        Ok(Self {
            // sign, currency prefix, sign, digits, then an optional unit made of letters only
            number: compile(r"^(?P<s1>[-+])?[^\d.,+\-]*?(?P<s2>[-+])?(?P<num>[\d.,]+)[A-Za-z]*$")?,
            grouped: compile(r"^\d{1,3}(?:,\d{3})+(?:\.\d*)?$")?,
            plain: compile(r"^(?:\d+(?:\.\d*)?|\.\d+)$")?,
            decimal_comma,
        })
    }

    /// "$1,234.50", "-90.354USDT", "(12.5)" and "€ 3" all parse
    fn number(&self, raw: &str) -> anyhow::Result<f64> {
        let invalid = || anyhow!("invalid number '{}'", raw.trim());
        let mut s = raw.trim();
        let mut negative = false;
        if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
            negative = true;
            s = inner.trim();
        }

        let cleaned: String = s.chars().filter(|c| !matches!(c, '_' | ' ')).collect();
        let caps = self.number.captures(&cleaned).ok_or_else(invalid)?;

        let num = &caps["num"];
        let digits = if !num.contains(',') {
            num.to_string()
        } else if self.decimal_comma && num.matches(',').count() == 1 && !num.contains('.') {
            num.replace(',', ".")
        } else if self.grouped.is_match(num) {
            num.replace(',', "")
        } else {
            return Err(invalid());
        };
        if !self.plain.is_match(&digits) {
            return Err(invalid());
        }

        let value: f64 = digits.parse().map_err(|_| invalid())?;
        let minus = [caps.name("s1"), caps.name("s2")]
            .into_iter()
            .flatten()
            .any(|m| m.as_str() == "-");
        if minus != negative {
            Ok(-value)
        } else {
            Ok(value)
        }
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        other => bail!("invalid boolean '{}'", other),
    }
}

/// Interpret a local timestamp in `tz`. Offsets in RFC 3339 input win over `tz`.
fn parse_local_dt(tz: &Tz, raw: &str) -> anyhow::Result<i64> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    for fmt in LOCAL_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            // fall-back hours resolve to the first occurrence; spring-forward gaps have none
            let local = tz
                .from_local_datetime(&ndt)
                .earliest()
                .ok_or_else(|| anyhow!("local time {} does not exist in {}", s, tz.name()))?;
            return Ok(local.with_timezone(&Utc).timestamp_millis());
        }
    }

    bail!("unsupported datetime format: {}", s)
}

fn cell<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> Option<&'r str> {
    idx.and_then(|i| record.get(i)).map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_time(
    record: &csv::StringRecord,
    utc_ms: Option<usize>,
    local: Option<usize>,
    tz: &Tz,
    label: &str,
) -> anyhow::Result<i64> {
    if let Some(raw) = cell(record, utc_ms) {
        return raw
            .parse::<i64>()
            .with_context(|| format!("invalid {}_time_utc_ms '{}'", label, raw));
    }
    if let Some(raw) = cell(record, local) {
        return parse_local_dt(tz, raw).with_context(|| format!("invalid {}_local", label));
    }
    bail!("missing {}_time_utc_ms or {}_local", label, label)
}

fn row_to_trade_input(
    record: &csv::StringRecord,
    cols: &ColumnMap,
    parser: &CellParser,
    tz: &Tz,
) -> anyhow::Result<TradeInput> {
    let symbol = cell(record, cols.symbol).context("missing symbol")?;

    let side_raw = cell(record, cols.side).context("missing side")?;
    let side = Side::parse_loose(side_raw).ok_or_else(|| anyhow!("invalid side '{}'", side_raw))?;

    let qty = parser.number(cell(record, cols.qty).context("missing qty")?)?;

    let entry_time_utc = resolve_time(record, cols.entry_utc_ms, cols.entry_local, tz, "entry")?;
    let exit_time_utc = resolve_time(record, cols.exit_utc_ms, cols.exit_local, tz, "exit")?;

    let optional_number = |idx: Option<usize>| -> anyhow::Result<f64> {
        cell(record, idx).map(|raw| parser.number(raw)).unwrap_or(Ok(0.0))
    };
    let pnl_amount = optional_number(cols.pnl_amount).context("pnl_amount")?;
    let fees = optional_number(cols.fees).context("fees")?;
    let pnl_includes_fees = match cell(record, cols.pnl_includes_fees) {
        Some(raw) => parse_bool(raw).context("pnl_includes_fees")?,
        None => true,
    };

    Ok(TradeInput {
        market: cell(record, cols.market).unwrap_or("futures").to_string(),
        symbol: symbol.to_string(),
        side,
        qty,
        entry_time_utc,
        exit_time_utc,
        timezone: Some(tz.name().to_string()),
        session: cell(record, cols.session).unwrap_or_default().to_string(),
        pnl_amount,
        pnl_includes_fees,
        fees,
        notes: cell(record, cols.notes).unwrap_or_default().to_string(),
        rules_checked: None,
    })
}

/// Duplicate key: symbol (case-insensitive) plus entry and exit instants
fn is_duplicate(conn: &Connection, input: &TradeInput) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM trades
            WHERE symbol = ?1 COLLATE NOCASE AND entry_time_utc = ?2 AND exit_time_utc = ?3
         )",
        params![input.symbol.trim(), input.entry_time_utc, input.exit_time_utc],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Create one trade inside a savepoint so a failure leaves nothing behind
fn create_in_savepoint(conn: &Connection, input: TradeInput, tz: &Tz) -> Result<()> {
    conn.execute_batch("SAVEPOINT csv_row")?;
    match create_trade(conn, input, tz.name()) {
        Ok(_) => {
            conn.execute_batch("RELEASE csv_row")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO csv_row; RELEASE csv_row")?;
            Err(e)
        }
    }
}

/// Best-effort import of `content`. Bad rows are reported, never fatal;
/// only an unusable header fails the whole file.
pub fn import_generic_csv(conn: &Connection, content: &str, tz: &Tz, max_errors: usize) -> Result<CsvImportResult> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(content);
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let cols = ColumnMap::from_headers(rdr.headers()?)?;
    let parser = CellParser::new(delimiter == b';')?;
    let mut result = CsvImportResult::default();

    for (i, rec) in rdr.records().enumerate() {
        // header is line 1
        let fallback_line = i as u64 + 2;
        let record = match rec {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(fallback_line);
                result.record_error(line, e, max_errors);
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);

        let input = match row_to_trade_input(&record, &cols, &parser, tz) {
            Ok(input) => input,
            Err(e) => {
                result.record_error(line, format!("{:#}", e), max_errors);
                continue;
            }
        };

        if is_duplicate(conn, &input)? {
            result.skipped += 1;
            continue;
        }

        match create_in_savepoint(conn, input, tz) {
            Ok(()) => result.created += 1,
            Err(e) => result.record_error(line, format!("failed to create trade: {}", e), max_errors),
        }
    }

    Ok(result)
}

pub fn csv_import_generic(engine: &Engine, req: CsvImportRequest) -> Result<CsvImportResult> {
    let config = engine.config();
    let default_tz = config.default_timezone.clone();
    let max_errors = config.csv_max_errors;

    engine.write(|conn| {
        let content = fs::read_to_string(&req.path)?;
        let tz = parse_timezone(&current_timezone(conn, &default_tz)?)?;

        let result = import_generic_csv(conn, &content, &tz, max_errors)?;
        log::info!(
            "CSV import from {}: {} created, {} skipped, {} errors",
            req.path.display(),
            result.created,
            result.skipped,
            result.errors.len() + result.errors_omitted
        );
        Ok(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::settings::settings_update;
    use crate::commands::trades::{list_trades, trades_list, TradesListRequest};
    use crate::db::Database;
    use crate::engine::test_support::unlocked_engine;
    use crate::models::UpdateSettingsInput;

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const MIXED: &str = "symbol,side,qty,entry_time_utc_ms,exit_time_utc_ms,pnl_amount,fees\n\
        ES,long,1,1000,2000,50,2.5\n\
        NQ,short,2,3000,4000,-20,1\n\
        ,long,1,5000,6000,10,0\n\
        CL,buy,3,7000,8000,12.5,0\n";

    #[test]
    fn test_partial_failure_reports_bad_row() {
        let (dir, engine) = unlocked_engine();
        let path = write_csv(&dir, "trades.csv", MIXED);

        let result = csv_import_generic(&engine, CsvImportRequest { path }).unwrap();
        assert_eq!(result.created, 3);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("line 4:"), "{:?}", result.errors);
        assert!(result.errors[0].contains("symbol"));

        let trades = trades_list(&engine, TradesListRequest::default()).unwrap();
        assert_eq!(trades.len(), 3);
        let es = trades.iter().find(|t| t.symbol == "ES").unwrap();
        // pnl_includes_fees defaults to true
        assert_eq!(es.pnl_net, 50.0);
        assert_eq!(es.pnl_gross, 52.5);
        assert_eq!(es.session, "other");
    }

    #[test]
    fn test_reimport_skips_duplicates() {
        let (dir, engine) = unlocked_engine();
        let path = write_csv(&dir, "trades.csv", MIXED);
        csv_import_generic(&engine, CsvImportRequest { path: path.clone() }).unwrap();

        let again = csv_import_generic(&engine, CsvImportRequest { path }).unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(again.errors.len(), 1);
    }

    #[test]
    fn test_duplicate_rows_within_one_file() {
        let db = Database::create_new().unwrap();
        let content = "symbol,side,qty,entry_time_utc_ms,exit_time_utc_ms\n\
            es,long,1,1000,2000\n\
            ES,long,1,1000,2000\n";
        let result = import_generic_csv(db.conn(), content, &utc(), 100).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_local_times_use_settings_zone() {
        let (dir, engine) = unlocked_engine();
        settings_update(
            &engine,
            UpdateSettingsInput {
                timezone: "America/New_York".into(),
            },
        )
        .unwrap();
        let path = write_csv(
            &dir,
            "local.csv",
            "Symbol;Side;Qty;Entry Local;Exit-Local\nES;Short;1;2026-02-07 23:00;2026-02-07T23:30\n",
        );

        let result = csv_import_generic(&engine, CsvImportRequest { path }).unwrap();
        assert_eq!(result.created, 1, "{:?}", result.errors);

        let trade = &trades_list(&engine, TradesListRequest::default()).unwrap()[0];
        let expected_entry = Utc.with_ymd_and_hms(2026, 2, 8, 4, 0, 0).unwrap().timestamp_millis();
        let expected_exit = Utc.with_ymd_and_hms(2026, 2, 8, 4, 30, 0).unwrap().timestamp_millis();
        assert_eq!(trade.entry_time_utc, expected_entry);
        assert_eq!(trade.exit_time_utc, expected_exit);
        assert_eq!(trade.timezone, "America/New_York");
        assert_eq!(trade.side, Side::Short);
    }

    #[test]
    fn test_missing_required_column_fails_whole_file() {
        let db = Database::create_new().unwrap();
        let content = "symbol,qty,entry_local,exit_local\nES,1,2026-01-01 10:00,2026-01-01 11:00\n";
        let err = import_generic_csv(db.conn(), content, &utc(), 100).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(list_trades(db.conn(), 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_error_list_is_capped() {
        let db = Database::create_new().unwrap();
        let mut content = String::from("symbol,side,qty,entry_time_utc_ms,exit_time_utc_ms\n");
        for i in 0..5 {
            content.push_str(&format!("ES,sideways,1,{},{}\n", i, i + 1));
        }

        let result = import_generic_csv(db.conn(), &content, &utc(), 2).unwrap();
        assert_eq!(result.created, 0);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors_omitted, 3);
        assert!(result.errors[1].starts_with("line 3:"));
    }

    #[test]
    fn test_dst_gap_is_row_error_and_overlap_takes_earliest() {
        let db = Database::create_new().unwrap();
        let tz: Tz = "America/New_York".parse().unwrap();
        let content = "symbol,side,qty,entry_local,exit_local\n\
            ES,long,1,2026-03-08 02:30,2026-03-08 04:00\n\
            NQ,long,1,2026-11-01 01:30,2026-11-01 03:00\n";

        let result = import_generic_csv(db.conn(), content, &tz, 100).unwrap();
        assert_eq!(result.created, 1);
        assert!(result.errors[0].starts_with("line 2:"));
        assert!(result.errors[0].contains("does not exist"));

        let trade = &list_trades(db.conn(), 10, 0).unwrap()[0];
        // 01:30 EDT, the first of the two 01:30s
        let expected = Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap().timestamp_millis();
        assert_eq!(trade.entry_time_utc, expected);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let (dir, engine) = unlocked_engine();
        let err = csv_import_generic(
            &engine,
            CsvImportRequest {
                path: dir.path().join("nope.csv"),
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_number_formats() {
        let parser = CellParser::new(false).unwrap();
        assert_eq!(parser.number("$1,234.50").unwrap(), 1234.5);
        assert_eq!(parser.number("12,345,678").unwrap(), 12345678.0);
        assert_eq!(parser.number("-90.354USDT").unwrap(), -90.354);
        assert_eq!(parser.number("(12.5)").unwrap(), -12.5);
        assert_eq!(parser.number("$-7").unwrap(), -7.0);
        assert_eq!(parser.number(".5").unwrap(), 0.5);
        assert!(parser.number("abc").is_err());
        assert_eq!(parser.number("€ 3").unwrap(), 3.0);
    }

    #[test]
    fn test_ambiguous_numbers_are_rejected() {
        let parser = CellParser::new(false).unwrap();
        for raw in ["1,5", "12,75", "1,2345", "1e2", "2.5e-3", "1.2.3", "5 USD1"] {
            assert!(parser.number(raw).is_err(), "{}", raw);
        }
    }

    #[test]
    fn test_decimal_comma_numbers() {
        let parser = CellParser::new(true).unwrap();
        assert_eq!(parser.number("1,5").unwrap(), 1.5);
        assert_eq!(parser.number("-12,75 EUR").unwrap(), -12.75);
        assert_eq!(parser.number("1,234.50").unwrap(), 1234.5);
        assert!(parser.number("1,2,3").is_err());
        assert!(parser.number("1e2").is_err());
    }

    #[test]
    fn test_semicolon_file_reads_decimal_commas() {
        let (dir, engine) = unlocked_engine();
        let content = "symbol;side;qty;entry_time_utc_ms;exit_time_utc_ms;pnl_amount;fees\n\
            ES;long;1,5;1000;2000;12,75;0,5\n\
            NQ;long;1,5;3000;4000;12,75;1e2\n";
        let path = write_csv(&dir, "semicolon.csv", content);

        let result = csv_import_generic(&engine, CsvImportRequest { path }).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("line 3:"), "{:?}", result.errors);
        assert!(result.errors[0].contains("fees"), "{:?}", result.errors);

        let trades = trades_list(&engine, TradesListRequest::default()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].qty, 1.5);
        assert_eq!(trades[0].pnl_net, 12.75);
        assert_eq!(trades[0].fees, 0.5);
    }

    #[test]
    fn test_header_normalization_and_delimiter() {
        assert_eq!(normalize_header("\u{feff} Entry-Time UTC ms"), "entry_time_utc_ms");
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a\tb\n"), b'\t');
        assert_eq!(sniff_delimiter("single"), b',');
    }

    #[test]
    fn test_bool_cells() {
        assert!(parse_bool("Yes").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}

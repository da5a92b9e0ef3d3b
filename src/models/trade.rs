use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Lenient parse used by imports: also accepts buy/sell
    pub fn parse_loose(s: &str) -> Option<Side> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Side::Long),
            "short" | "sell" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(format!("invalid side: {}", other)),
        }
    }
}

impl ToSql for Side {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Side {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse::<Side>()
            .map_err(|e| FromSqlError::Other(e.into()))
    }
}

/// Net and gross PnL derived from the entered amount.
///
/// `fees` always separates the two; the flag only decides which side the
/// entered amount lands on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pnl {
    pub net: f64,
    pub gross: f64,
}

impl Pnl {
    pub fn derive(pnl_amount: f64, fees: f64, includes_fees: bool) -> Self {
        if includes_fees {
            Pnl {
                net: pnl_amount,
                gross: pnl_amount + fees,
            }
        } else {
            Pnl {
                net: pnl_amount - fees,
                gross: pnl_amount,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub entry_time_utc: i64,
    pub exit_time_utc: i64,
    pub timezone: String,
    pub session: String,
    pub pnl_amount: f64,
    pub pnl_includes_fees: bool,
    pub fees: f64,
    pub pnl_net: f64,
    pub pnl_gross: f64,
    pub notes: String,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

fn default_market() -> String {
    "futures".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInput {
    #[serde(default = "default_market")]
    pub market: String,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub entry_time_utc: i64,
    pub exit_time_utc: i64,
    /// Blank or missing falls back to the current settings zone
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub session: String,
    pub pnl_amount: f64,
    #[serde(default = "default_true")]
    pub pnl_includes_fees: bool,
    #[serde(default)]
    pub fees: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rules_checked: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeWithRules {
    pub trade: Trade,
    pub rules: Vec<Rule>,
    pub checked: HashMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRuleCheck {
    pub trade_id: String,
    pub rule_id: String,
    pub checked: bool,
}

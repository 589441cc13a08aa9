use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One ordered unit of the pipeline.
///
/// The declaration order is the execution order; [`StageKind::ALL`] is the
/// canonical sequence used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Extract / transform / load of the landed files.
    Etl,
    /// Market basket analysis.
    BasketMining,
    /// Price elasticity of demand estimation.
    Elasticity,
    /// Non-linear price optimization.
    Optimization,
    /// Demand forecasting.
    Forecasting,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Etl,
        StageKind::BasketMining,
        StageKind::Elasticity,
        StageKind::Optimization,
        StageKind::Forecasting,
    ];

    /// Key used in `[stage.<key>]` config sections and in env vars.
    pub fn key(self) -> &'static str {
        match self {
            StageKind::Etl => "etl",
            StageKind::BasketMining => "basket_mining",
            StageKind::Elasticity => "elasticity",
            StageKind::Optimization => "optimization",
            StageKind::Forecasting => "forecasting",
        }
    }

    /// Human-facing label used in log lines.
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Etl => "ETL",
            StageKind::BasketMining => "basket mining",
            StageKind::Elasticity => "price elasticity",
            StageKind::Optimization => "price optimization",
            StageKind::Forecasting => "demand forecasting",
        }
    }

    /// 1-based position in the pipeline.
    pub fn position(self) -> usize {
        StageKind::ALL
            .iter()
            .position(|k| *k == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        StageKind::ALL
            .into_iter()
            .find(|k| k.key() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown stage '{wanted}' (expected one of: etl, basket_mining, elasticity, optimization, forecasting)"
                )
            })
    }
}

/// What the worker does at startup with a trigger or marker left behind by a
/// run that never reached cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Clear the leftovers and journal the interrupted run as failed.
    Clear,
    /// Keep the trigger so the startup scan re-runs the pipeline from the
    /// first stage.
    Resume,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        OrphanPolicy::Clear
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clear" => Ok(OrphanPolicy::Clear),
            "resume" => Ok(OrphanPolicy::Resume),
            other => Err(format!(
                "invalid orphan_policy: {other} (expected \"clear\" or \"resume\")"
            )),
        }
    }
}

/// Parse a compact duration string like `"500ms"`, `"5s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

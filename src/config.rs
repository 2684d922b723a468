use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{KpiError, Result};
use crate::ingest::{Sheet, AGENT_COLUMN, MONTH_COLUMN};
use crate::models::KPI_VOCABULARY;

/// Raw weight applied to every KPI when nothing else is configured.
pub const DEFAULT_RAW_WEIGHT: f64 = 20.0;

/// KPI weights normalized to sum to 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightConfig {
    weights: BTreeMap<String, f64>,
}

impl WeightConfig {
    /// Rescales raw (percent-style) weights proportionally so they sum to 1.
    pub fn normalize(raw: &BTreeMap<String, f64>) -> Result<Self> {
        if let Some((kpi, weight)) = raw.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(KpiError::contract(format!(
                "weight for {kpi} must be a non-negative number, got {weight}"
            )));
        }

        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return Err(KpiError::contract("KPI weights sum to zero"));
        }
        if (total - 100.0).abs() > 1e-9 {
            warn!(total, "weights do not sum to 100%, normalizing");
        }

        let weights = raw
            .iter()
            .map(|(kpi, weight)| (kpi.clone(), weight / total))
            .collect();
        Ok(Self { weights })
    }

    /// Weight of a KPI, zero when it carries none.
    pub fn weight(&self, kpi: &str) -> f64 {
        self.weights.get(kpi).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(kpi, weight)| (kpi.as_str(), *weight))
    }
}

/// Scope and weights for one evaluation of the deviation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub kpis: Vec<String>,
    pub months: Vec<String>,
    pub agents: Vec<String>,
    pub weights: WeightConfig,
}

/// On-disk analysis settings. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub kpi: Option<Vec<String>>,
    #[serde(default)]
    pub mois: Option<Vec<String>>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default, alias = "pondérations")]
    pub ponderations: Option<BTreeMap<String, f64>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

/// Command-line overrides, applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub kpis: Vec<String>,
    pub months: Vec<String>,
    pub agents: Vec<String>,
    pub weights: Vec<(String, f64)>,
}

/// Resolves the analysis config: results-derived defaults, then file, then overrides.
pub fn resolve(
    results: &Sheet,
    file: Option<ConfigFile>,
    overrides: Overrides,
) -> Result<AnalysisConfig> {
    let file = file.unwrap_or_default();

    let kpis = pick(overrides.kpis, file.kpi, || {
        KPI_VOCABULARY
            .iter()
            .filter(|kpi| results.column(kpi).is_some())
            .map(|kpi| kpi.to_string())
            .collect()
    });
    let months = pick(overrides.months, file.mois, || results.distinct(MONTH_COLUMN));
    let agents = pick(overrides.agents, file.agents, || results.distinct(AGENT_COLUMN));

    if kpis.is_empty() {
        return Err(KpiError::contract("no KPI selected for analysis"));
    }

    let mut raw: BTreeMap<String, f64> = match file.ponderations {
        Some(weights) => weights,
        None => kpis
            .iter()
            .map(|kpi| (kpi.clone(), DEFAULT_RAW_WEIGHT))
            .collect(),
    };
    for (kpi, weight) in overrides.weights {
        raw.insert(kpi, weight);
    }
    raw.retain(|kpi, _| kpis.contains(kpi));

    if let Some(missing) = kpis.iter().find(|kpi| !raw.contains_key(*kpi)) {
        return Err(KpiError::contract(format!("no weight configured for KPI {missing}")));
    }

    Ok(AnalysisConfig {
        kpis,
        months,
        agents,
        weights: WeightConfig::normalize(&raw)?,
    })
}

/// Parses a `KPI=VALUE` weight flag.
pub fn parse_weight(raw: &str) -> std::result::Result<(String, f64), String> {
    let (kpi, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected KPI=VALUE, got {raw}"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid weight value in {raw}"))?;
    Ok((kpi.trim().to_string(), value))
}

fn pick(
    cli: Vec<String>,
    file: Option<Vec<String>>,
    default: impl FnOnce() -> Vec<String>,
) -> Vec<String> {
    if !cli.is_empty() {
        cli
    } else if let Some(values) = file {
        values
    } else {
        default()
    }
}

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::error::{KpiError, Result};
use crate::models::{DeviationRow, KpiDeviation, KpiMode, ObjectiveRow, ObjectiveSheet, ResultsRow};
use crate::score;

/// Resolves the mode of every selected KPI from the `Type` row.
pub fn resolve_modes(objectives: &ObjectiveSheet, kpis: &[String]) -> Result<Vec<(String, KpiMode)>> {
    let type_row = objectives
        .type_row
        .as_ref()
        .ok_or_else(|| KpiError::contract("objectives sheet has no 'Type' row"))?;

    kpis.iter()
        .map(|kpi| -> Result<(String, KpiMode)> {
            let raw = type_row
                .get(kpi)
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .ok_or_else(|| KpiError::contract(format!("no mode declared for KPI {kpi}")))?;
            let mode = KpiMode::parse(raw).ok_or_else(|| {
                KpiError::contract(format!(
                    "KPI {kpi} has mode {raw:?}, expected min, max or target"
                ))
            })?;
            Ok((kpi.clone(), mode))
        })
        .collect()
}

/// Signed fractional deviation, rounded to 4 decimals.
///
/// A zero or missing objective, or a missing observed value, yields exactly 0.
pub fn deviation(mode: KpiMode, value: Option<f64>, objective: Option<f64>) -> f64 {
    let (Some(value), Some(objective)) = (value, objective) else {
        return 0.0;
    };
    if objective == 0.0 {
        return 0.0;
    }

    let raw = match mode {
        KpiMode::Min | KpiMode::Target => (value - objective) / objective,
        KpiMode::Max => (objective - value) / objective,
    };
    round4(raw)
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Builds the deviation table: one row per results line in scope whose month
/// has an objective. Weighted contributions and scores are left at zero.
pub fn compute_deviations(
    results: &[ResultsRow],
    objectives: &ObjectiveSheet,
    config: &AnalysisConfig,
) -> Result<Vec<DeviationRow>> {
    let modes = resolve_modes(objectives, &config.kpis)?;

    let mut by_month: HashMap<&str, &ObjectiveRow> = HashMap::new();
    for row in objectives
        .rows
        .iter()
        .filter(|row| config.months.contains(&row.month))
    {
        if by_month.contains_key(row.month.as_str()) {
            warn!(month = %row.month, "duplicate objective row, keeping the first");
            continue;
        }
        by_month.insert(row.month.as_str(), row);
    }

    let mut rows = Vec::new();
    for result in results
        .iter()
        .filter(|row| config.agents.contains(&row.agent) && config.months.contains(&row.month))
    {
        let Some(objective) = by_month.get(result.month.as_str()) else {
            debug!(agent = %result.agent, month = %result.month, "no objective for month, row dropped");
            continue;
        };

        let kpis = modes
            .iter()
            .map(|(kpi, mode)| {
                let value = result.value(kpi);
                let target = objective.value(kpi);
                KpiDeviation {
                    kpi: kpi.clone(),
                    value,
                    objective: target,
                    mode: *mode,
                    deviation: deviation(*mode, value, target),
                    weighted: 0.0,
                }
            })
            .collect();

        rows.push(DeviationRow {
            agent: result.agent.clone(),
            month: result.month.clone(),
            kpis,
            score_global: 0.0,
        });
    }

    debug!(rows = rows.len(), kpis = config.kpis.len(), "deviation table computed");
    Ok(rows)
}

/// Full pipeline: deviations, then weighted contributions and global score.
pub fn evaluate(
    results: &[ResultsRow],
    objectives: &ObjectiveSheet,
    config: &AnalysisConfig,
) -> Result<Vec<DeviationRow>> {
    let rows = compute_deviations(results, objectives, config)?;
    Ok(score::apply_weights(&rows, &config.weights))
}

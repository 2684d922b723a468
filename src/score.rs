use crate::config::WeightConfig;
use crate::models::{AgentScore, DeviationRow, SummaryCards, TeamSynthesis, TrendVerdict};

/// Score band, as a fraction, inside which an agent counts as stable.
pub const STABLE_BAND: f64 = 0.05;

/// Fills `weighted` on every KPI cell and recomputes `score_global`.
///
/// Weights are expected to be normalized already; they are not rescaled here.
pub fn apply_weights(rows: &[DeviationRow], weights: &WeightConfig) -> Vec<DeviationRow> {
    rows.iter()
        .map(|row| {
            let mut row = row.clone();
            for cell in row.kpis.iter_mut() {
                cell.weighted = cell.deviation * weights.weight(&cell.kpi);
            }
            row.score_global = row.kpis.iter().map(|cell| cell.weighted).sum();
            row
        })
        .collect()
}

/// Mean global score per agent, best first. Ties keep first-seen order.
pub fn rank_agents(rows: &[DeviationRow]) -> Vec<AgentScore> {
    let mut totals: Vec<(String, f64, usize)> = Vec::new();
    for row in rows {
        match totals.iter_mut().find(|(agent, _, _)| *agent == row.agent) {
            Some(entry) => {
                entry.1 += row.score_global;
                entry.2 += 1;
            }
            None => totals.push((row.agent.clone(), row.score_global, 1)),
        }
    }

    let mut scores: Vec<AgentScore> = totals
        .into_iter()
        .map(|(agent, total, months)| AgentScore {
            agent,
            mean_score: total / months as f64,
            months,
        })
        .collect();
    scores.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scores
}

/// Team-level reading: who improves, who is stable, who declines.
pub fn synthesize(rows: &[DeviationRow]) -> TeamSynthesis {
    let improving = agents_where(rows, |score| score > STABLE_BAND);
    let declining = agents_where(rows, |score| score < -STABLE_BAND);
    let stable = agents_where(rows, |score| (-STABLE_BAND..=STABLE_BAND).contains(&score));

    let mean_score_pct = round2(mean_score(rows) * 100.0);
    TeamSynthesis {
        improving,
        stable,
        declining,
        mean_score_pct,
        total_agents: distinct(rows.iter().map(|row| row.agent.as_str())).len(),
        verdict: verdict(mean_score_pct),
    }
}

pub fn verdict(mean_score_pct: f64) -> TrendVerdict {
    if mean_score_pct > 5.0 {
        TrendVerdict::StrongImprovement
    } else if mean_score_pct > 0.0 {
        TrendVerdict::SlightImprovement
    } else if mean_score_pct > -5.0 {
        TrendVerdict::ModerateDecline
    } else {
        TrendVerdict::SignificantDecline
    }
}

/// Headline figures for the dashboard cards.
pub fn summary_cards(rows: &[DeviationRow]) -> SummaryCards {
    let ranking = rank_agents(rows);
    SummaryCards {
        mean_score_pct: round2(mean_score(rows) * 100.0),
        agents: distinct(rows.iter().map(|row| row.agent.as_str())).len(),
        months: distinct(rows.iter().map(|row| row.month.as_str())).len(),
        best: ranking.first().cloned(),
        worst: ranking.last().cloned(),
    }
}

/// Mean deviation of one KPI across the given rows, zero when there are none.
pub fn mean_deviation<'a>(rows: impl IntoIterator<Item = &'a DeviationRow>, kpi: &str) -> f64 {
    let values: Vec<f64> = rows
        .into_iter()
        .filter_map(|row| row.kpi(kpi).map(|cell| cell.deviation))
        .collect();
    mean(&values)
}

pub fn mean_score(rows: &[DeviationRow]) -> f64 {
    let values: Vec<f64> = rows.iter().map(|row| row.score_global).collect();
    mean(&values)
}

pub fn round2(value: f64) -> f64 {
    // `+ 0.0` folds -0.0 into 0.0
    (value * 100.0).round() / 100.0 + 0.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn agents_where(rows: &[DeviationRow], predicate: impl Fn(f64) -> bool) -> Vec<String> {
    distinct(
        rows.iter()
            .filter(|row| predicate(row.score_global))
            .map(|row| row.agent.as_str()),
    )
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for value in values {
        if !seen.iter().any(|existing| existing == value) {
            seen.push(value.to_string());
        }
    }
    seen
}

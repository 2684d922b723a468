use std::fmt::Write;
use std::path::Path;

use csv::Writer;

use crate::config::AnalysisConfig;
use crate::error::{KpiError, Result};
use crate::models::{ActionRecord, DeviationRow};
use crate::score::{self, round2};

/// Markdown report for one agent over the configured scope.
pub fn build_agent_report(
    agent: &str,
    config: &AnalysisConfig,
    rows: &[DeviationRow],
    actions: &[ActionRecord],
) -> String {
    let mut agent_rows: Vec<&DeviationRow> = rows.iter().filter(|row| row.agent == agent).collect();
    agent_rows.sort_by(|a, b| a.month.cmp(&b.month));

    let mut output = String::new();
    let _ = writeln!(output, "# Rapport RH : Agent {agent}");
    let _ = writeln!(output);

    if agent_rows.is_empty() {
        let _ = writeln!(output, "Aucune donnée disponible.");
        return output;
    }

    let months: Vec<&str> = agent_rows.iter().map(|row| row.month.as_str()).collect();
    let _ = writeln!(output, "Période couverte : {}", months.join(", "));
    let _ = writeln!(output);

    let _ = writeln!(output, "## Écarts par KPI");
    for kpi in &config.kpis {
        let mean = score::mean_deviation(agent_rows.iter().copied(), kpi);
        let _ = writeln!(output, "- {kpi} : {:.2}%", round2(mean * 100.0));
    }

    let mean_score =
        agent_rows.iter().map(|row| row.score_global).sum::<f64>() / agent_rows.len() as f64;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Global Moyen");
    let _ = writeln!(output, "{:.2}%", round2(mean_score * 100.0));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Détail par mois");
    let _ = writeln!(output, "| Mois | {} | Score_Global |", config.kpis.join(" | "));
    let _ = writeln!(output, "|{}", "---|".repeat(config.kpis.len() + 2));
    for row in &agent_rows {
        let cells: Vec<String> = config
            .kpis
            .iter()
            .map(|kpi| match row.kpi(kpi) {
                Some(cell) => format!("{:.2}%", round2(cell.deviation * 100.0)),
                None => "-".to_string(),
            })
            .collect();
        let _ = writeln!(
            output,
            "| {} | {} | {:.2}% |",
            row.month,
            cells.join(" | "),
            round2(row.score_global * 100.0)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Plan d'action suivi");
    let tracked: Vec<&ActionRecord> = actions.iter().filter(|action| action.agent == agent).collect();
    if tracked.is_empty() {
        let _ = writeln!(output, "Aucune action enregistrée pour cet agent.");
    } else {
        for action in tracked {
            let _ = writeln!(
                output,
                "- [{}] {} ({}) : {} | owner {} | échéance {} | {}",
                action.priority.label(),
                action.kpi,
                action.mois_ref,
                action.description,
                action.owner,
                action.due_date,
                action.status.label()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Commentaire RH");
    let _ = writeln!(output, "À compléter...");
    output
}

fn optional(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Flattened deviation table, one column group per KPI.
pub fn write_deviation_csv(rows: &[DeviationRow], kpis: &[String], path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(path)?;

    let mut header = vec!["Agent".to_string(), "Mois".to_string()];
    for prefix in ["Val", "Obj", "Type", "Ecart", "Pond"] {
        header.extend(kpis.iter().map(|kpi| format!("{prefix}_{kpi}")));
    }
    header.push("Score_Global".to_string());
    writer.write_record(&header)?;

    for row in rows {
        let cells: Vec<_> = kpis.iter().map(|kpi| row.kpi(kpi)).collect();
        let mut record = vec![row.agent.clone(), row.month.clone()];
        record.extend(cells.iter().map(|cell| optional(cell.and_then(|c| c.value))));
        record.extend(cells.iter().map(|cell| optional(cell.and_then(|c| c.objective))));
        record.extend(
            cells
                .iter()
                .map(|cell| cell.map(|c| c.mode.to_string()).unwrap_or_default()),
        );
        record.extend(cells.iter().map(|cell| optional(cell.map(|c| c.deviation))));
        record.extend(cells.iter().map(|cell| optional(cell.map(|c| c.weighted))));
        record.push(row.score_global.to_string());
        writer.write_record(&record)?;
    }

    writer.flush().map_err(|err| KpiError::persistence(path, err))
}

/// The tracked action plan, one line per record.
pub fn write_actions_csv(actions: &[ActionRecord], path: &Path) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "id",
        "created_at",
        "updated_at",
        "agent",
        "kpi",
        "mois_ref",
        "ecart_pct",
        "action_type",
        "description",
        "owner",
        "due_date",
        "priority",
        "status",
        "preuve",
        "expected_impact",
        "tags",
    ])?;

    for action in actions {
        writer.write_record([
            action.id.clone(),
            action.created_at.to_rfc3339(),
            action
                .updated_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
            action.agent.clone(),
            action.kpi.clone(),
            action.mois_ref.clone(),
            action.ecart_pct.to_string(),
            action.action_type.clone(),
            action.description.clone(),
            action.owner.clone(),
            action.due_date.clone(),
            action.priority.label().to_string(),
            action.status.label().to_string(),
            action.preuve.clone(),
            action.expected_impact.clone(),
            action.tags.join(";"),
        ])?;
    }

    writer.flush().map_err(|err| KpiError::persistence(path, err))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::config::WeightConfig;
    use crate::models::{KpiDeviation, KpiMode, Priority, Status};

    fn config() -> AnalysisConfig {
        let raw: BTreeMap<String, f64> = [("Prod".to_string(), 50.0), ("DMT (sec)".to_string(), 50.0)]
            .into_iter()
            .collect();
        AnalysisConfig {
            kpis: vec!["Prod".to_string(), "DMT (sec)".to_string()],
            months: vec!["2024-01".to_string(), "2024-02".to_string()],
            agents: vec!["A1".to_string()],
            weights: WeightConfig::normalize(&raw).unwrap(),
        }
    }

    fn row(agent: &str, month: &str, prod: f64, dmt: f64) -> DeviationRow {
        let cell = |kpi: &str, mode, deviation: f64| KpiDeviation {
            kpi: kpi.to_string(),
            value: Some(100.0),
            objective: None,
            mode,
            deviation,
            weighted: deviation * 0.5,
        };
        DeviationRow {
            agent: agent.to_string(),
            month: month.to_string(),
            kpis: vec![cell("Prod", KpiMode::Max, prod), cell("DMT (sec)", KpiMode::Min, dmt)],
            score_global: (prod + dmt) * 0.5,
        }
    }

    fn action(agent: &str) -> ActionRecord {
        ActionRecord {
            id: "pda-1".to_string(),
            created_at: Utc::now(),
            updated_at: None,
            agent: agent.to_string(),
            kpi: "Prod".to_string(),
            mois_ref: "2024-02".to_string(),
            ecart_pct: -4.0,
            action_type: "Rappel process / script".to_string(),
            description: "Suivi quotidien".to_string(),
            owner: "TL".to_string(),
            due_date: "2024-03-01".to_string(),
            priority: Priority::P1,
            status: Status::InProgress,
            preuve: String::new(),
            expected_impact: String::new(),
            tags: vec!["prod".to_string(), "s1".to_string()],
        }
    }

    #[test]
    fn agent_report_summarizes_scope() {
        let rows = vec![
            row("A1", "2024-02", -0.04, 0.0),
            row("A2", "2024-01", 0.5, 0.5),
            row("A1", "2024-01", -0.02, 0.04),
        ];
        let report = build_agent_report("A1", &config(), &rows, &[action("A1"), action("A2")]);

        assert!(report.starts_with("# Rapport RH : Agent A1"));
        assert!(report.contains("Période couverte : 2024-01, 2024-02"));
        assert!(report.contains("- Prod : -3.00%"));
        assert!(report.contains("- DMT (sec) : 2.00%"));
        assert!(report.contains("## Score Global Moyen\n-0.50%"));
        assert!(report.contains("| 2024-01 | -2.00% | 4.00% | 1.00% |"));
        assert_eq!(report.matches("[P1] Prod (2024-02)").count(), 1);
        assert!(report.ends_with("À compléter...\n"));
    }

    #[test]
    fn agent_without_rows_gets_placeholder() {
        let report = build_agent_report("ghost", &config(), &[], &[]);
        assert!(report.contains("Aucune donnée disponible."));
    }

    #[test]
    fn deviation_csv_has_column_groups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deviations.csv");
        write_deviation_csv(&[row("A1", "2024-01", -0.02, 0.04)], &config().kpis, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Agent,Mois,Val_Prod,Val_DMT (sec),Obj_Prod,Obj_DMT (sec),Type_Prod,Type_DMT (sec),\
             Ecart_Prod,Ecart_DMT (sec),Pond_Prod,Pond_DMT (sec),Score_Global"
        );
        assert_eq!(
            lines.next().unwrap(),
            "A1,2024-01,100,100,,,max,min,-0.02,0.04,-0.01,0.02,0.01"
        );
    }

    #[test]
    fn actions_csv_flattens_tags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("actions.csv");
        write_actions_csv(&[action("A1")], &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let record = text.lines().nth(1).unwrap();
        assert!(record.starts_with("pda-1,"));
        assert!(record.contains(",P1,En cours,"));
        assert!(record.ends_with(",prod;s1"));
    }
}

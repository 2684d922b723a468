//! Action-plan (PDA) rule engine.
//!
//! Reads one agent/month deviation row, picks the worst adverse KPI as the
//! driver, and renders a coaching plan from the KPI's playbook.

use std::fmt::Write;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::error::{KpiError, Result};
use crate::models::{DeviationRow, KpiDeviation, KpiMode};
use crate::score::round2;

/// Tolerance band, as a fraction, for `target` KPIs.
pub const TARGET_TOLERANCE: f64 = 0.03;
pub const DEFAULT_STEPS: u32 = 3;
pub const DEFAULT_WINDOW_DAYS: u32 = 10;
pub const MAX_STEPS: u32 = 52;
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Remediation knowledge for one KPI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playbook {
    pub theme: &'static str,
    pub diagnostic: &'static str,
    /// Most probable first.
    pub root_causes: &'static [&'static str],
    /// Ranked, first is applied first.
    pub actions: &'static [&'static str],
    pub expected_impact: &'static str,
    pub owners: &'static [&'static str],
    /// KPI that must not regress while the driver is being fixed.
    pub guardrail: Option<&'static str>,
}

const PLAYBOOKS: &[(&str, Playbook)] = &[
    (
        "DMT (sec)",
        Playbook {
            theme: "Efficacité de traitement",
            diagnostic: "DMT au-dessus de l'objectif : impact direct sur l'expérience client et la fluidité du traitement.",
            root_causes: &[
                "After-call (ACW) trop long",
                "Recherche d'information / knowledge peu maîtrisé",
                "Mises en attente non standardisées",
            ],
            actions: &[
                "Coaching 1:1 : after-call (ACW) + reformulation + maîtrise du script",
                "2 écoutes ciblées + débrief structuré (faits / causes / actions)",
                "Contrôle mise en attente + standardisation du traitement",
            ],
            expected_impact: "Réduction du DMT sur la prochaine période",
            owners: &["TL", "Formateur"],
            guardrail: Some("Qualité (%)"),
        },
    ),
    (
        "Qualité (%)",
        Playbook {
            theme: "Qualité et conformité",
            diagnostic: "Qualité sous objectif : risque conformité et dégradation de la satisfaction.",
            root_causes: &[
                "Critères KO mal connus",
                "Erreurs récurrentes non corrigées",
                "Script ou process non appliqué",
            ],
            actions: &[
                "Calibration Qualité + rappel des critères KO",
                "Coaching sur 3 erreurs récurrentes (preuves à l'appui)",
                "Shadowing avec top performer (1 session) + débrief",
            ],
            expected_impact: "Remontée qualité au-dessus du seuil sur la prochaine période",
            owners: &["TL", "Référent Qualité"],
            guardrail: Some("DMT (sec)"),
        },
    ),
    (
        "Prod",
        Playbook {
            theme: "Productivité",
            diagnostic: "Productivité sous objectif : risque backlog et rendement faible.",
            root_causes: &[
                "Outil ou process bloquant",
                "Complexité des dossiers traités",
                "Rythme et organisation de la journée",
            ],
            actions: &[
                "Analyse cause racine : outil / process / complexité / rythme",
                "Coaching time-management + standardisation des cas",
                "Plan 1 semaine : objectifs journaliers + suivi TL",
            ],
            expected_impact: "Gain de productivité sur la prochaine période",
            owners: &["TL"],
            guardrail: Some("Qualité (%)"),
        },
    ),
    (
        "ABS (%)",
        Playbook {
            theme: "Présence et staffing",
            diagnostic: "Absentéisme au-dessus de la cible : risque staffing et instabilité d'équipe.",
            root_causes: &[
                "Désengagement ou baisse de motivation",
                "Contraintes personnelles ou de santé",
                "Organisation des plannings",
            ],
            actions: &[
                "Entretien TL : cause + engagement + plan de stabilisation",
                "Suivi RH si nécessaire (selon politique interne)",
                "Points hebdo + objectifs présence",
            ],
            expected_impact: "Stabilisation de la présence / réduction ABS",
            owners: &["TL", "RH"],
            guardrail: None,
        },
    ),
    (
        "TH prod (€)",
        Playbook {
            theme: "Rendement économique",
            diagnostic: "TH prod sous objectif : rendement économique en baisse.",
            root_causes: &[
                "Productivité insuffisante",
                "Reprises liées à la qualité",
                "DMT élevée",
            ],
            actions: &[
                "Identifier levier prioritaire : Prod / Qualité / DMT",
                "Coaching ciblé sur le KPI le plus impactant",
                "Plan court : 3 actions mesurables sur 7 jours",
            ],
            expected_impact: "Amélioration TH prod via leviers prioritaires",
            owners: &["TL", "Manager OPS"],
            guardrail: Some("Qualité (%)"),
        },
    ),
];

pub static DEFAULT_PLAYBOOK: Playbook = Playbook {
    theme: "Performance KPI",
    diagnostic: "Écart KPI défavorable : analyser cause racine et définir un plan d'action ciblé.",
    root_causes: &["Process", "Outil", "Connaissance", "Comportement"],
    actions: &[
        "Qualifier la cause (process, outil, connaissance, comportement)",
        "Coaching ciblé + suivi sur 1 semaine",
        "Mesurer l'effet sur la période suivante",
    ],
    expected_impact: "Réduction de l'écart sur la prochaine période",
    owners: &["TL"],
    guardrail: None,
};

/// Playbook registered for a KPI, or the generic one.
pub fn playbook(kpi: &str) -> &'static Playbook {
    PLAYBOOKS
        .iter()
        .find(|(name, _)| *name == kpi)
        .map(|(_, playbook)| playbook)
        .unwrap_or(&DEFAULT_PLAYBOOK)
}

/// Whether a KPI deviation is adverse for its mode.
pub fn is_bad(mode: KpiMode, deviation: f64) -> bool {
    match mode {
        KpiMode::Min => deviation > 0.0,
        KpiMode::Max => deviation < 0.0,
        KpiMode::Target => deviation.abs() > TARGET_TOLERANCE,
    }
}

/// Escalation message for critical KPI families.
pub fn blocking_hint(kpi: &str, mode: KpiMode, deviation: f64) -> Option<&'static str> {
    if !is_bad(mode, deviation) {
        return None;
    }
    let magnitude = deviation.abs();
    if kpi.contains("Qualité") && magnitude > 0.02 {
        Some("KPI critique : Qualité en baisse, action immédiate.")
    } else if kpi.contains("ABS") && magnitude > 0.05 {
        Some("Risque staffing : ABS dégradée, plan d'action RH.")
    } else if kpi.contains("DMT") && magnitude > 0.05 {
        Some("Risque CX : DMT dégradée, coaching + quick wins.")
    } else {
        None
    }
}

/// Planning window of one diagnosis, passed in by the caller.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub start: NaiveDate,
    pub window_days: u32,
    pub steps: u32,
}

impl PlanContext {
    pub fn new(start: NaiveDate) -> Self {
        Self {
            start,
            window_days: DEFAULT_WINDOW_DAYS,
            steps: DEFAULT_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub rank: usize,
    pub label: String,
    pub due: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Milestone {
    pub step: u32,
    pub due: NaiveDate,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchedKpi {
    pub kpi: String,
    pub deviation_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guardrail {
    pub kpi: String,
    pub deviation_pct: Option<f64>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionPlan {
    pub agent: String,
    pub month: String,
    pub theme: String,
    pub driver: String,
    pub value: Option<f64>,
    pub objective: Option<f64>,
    pub mode: KpiMode,
    pub deviation_pct: f64,
    pub diagnostic: String,
    pub root_causes: Vec<String>,
    pub actions: Vec<PlannedAction>,
    pub secondary: Vec<WatchedKpi>,
    pub guardrail: Option<Guardrail>,
    pub owners: Vec<String>,
    pub expected_impact: String,
    pub trajectory: Vec<Milestone>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnosis {
    NoActionRequired { agent: String, month: String },
    Plan(Box<ActionPlan>),
}

/// Adverse KPI cells of a row, in scope order.
fn bad_cells<'a>(row: &'a DeviationRow, scope: &[String]) -> Vec<&'a KpiDeviation> {
    scope
        .iter()
        .filter_map(|kpi| row.kpi(kpi))
        .filter(|cell| is_bad(cell.mode, cell.deviation))
        .collect()
}

/// Worst adverse KPI by magnitude; the first in scope order wins a tie.
pub fn select_driver<'a>(row: &'a DeviationRow, scope: &[String]) -> Option<&'a KpiDeviation> {
    let mut driver: Option<&KpiDeviation> = None;
    for cell in bad_cells(row, scope) {
        if driver.map_or(true, |best| cell.deviation.abs() > best.deviation.abs()) {
            driver = Some(cell);
        }
    }
    driver
}

/// Other adverse KPIs, sorted by signed deviation ascending.
pub fn secondary_kpis<'a>(
    row: &'a DeviationRow,
    scope: &[String],
    driver: &str,
) -> Vec<&'a KpiDeviation> {
    let mut cells: Vec<&KpiDeviation> = bad_cells(row, scope)
        .into_iter()
        .filter(|cell| cell.kpi != driver)
        .collect();
    cells.sort_by(|a, b| {
        a.deviation
            .partial_cmp(&b.deviation)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    cells
}

/// Due date of step `index` (1-based) out of `count` spread over the window.
fn due_date(start: NaiveDate, window_days: u32, index: u32, count: u32) -> Result<NaiveDate> {
    let count = u64::from(count.max(1));
    let offset = (u64::from(window_days) * u64::from(index)).div_ceil(count);
    start.checked_add_days(Days::new(offset)).ok_or_else(|| {
        KpiError::contract(format!(
            "a {window_days}-day plan starting {start} runs past the supported calendar"
        ))
    })
}

/// Evenly spaced milestones from the observed value to the objective.
pub fn trajectory(
    value: f64,
    objective: f64,
    steps: u32,
    window_days: u32,
    start: NaiveDate,
) -> Result<Vec<Milestone>> {
    if steps > MAX_STEPS {
        return Err(KpiError::contract(format!(
            "a trajectory has at most {MAX_STEPS} steps, got {steps}"
        )));
    }
    let steps = steps.max(1);
    (1..=steps)
        .map(|step| -> Result<Milestone> {
            let target = if step == steps {
                objective
            } else {
                value + (objective - value) * f64::from(step) / f64::from(steps)
            };
            Ok(Milestone {
                step,
                due: due_date(start, window_days, step, steps)?,
                target,
            })
        })
        .collect()
}

/// Diagnoses one agent/month row over the given KPI scope.
pub fn diagnose(row: &DeviationRow, scope: &[String], context: &PlanContext) -> Result<Diagnosis> {
    let Some(driver) = select_driver(row, scope) else {
        debug!(agent = %row.agent, month = %row.month, "no adverse KPI");
        return Ok(Diagnosis::NoActionRequired {
            agent: row.agent.clone(),
            month: row.month.clone(),
        });
    };
    let book = playbook(&driver.kpi);
    debug!(agent = %row.agent, month = %row.month, driver = %driver.kpi, "driver selected");

    let count = book.actions.len() as u32;
    let actions = book
        .actions
        .iter()
        .enumerate()
        .map(|(index, label)| -> Result<PlannedAction> {
            let rank = index + 1;
            Ok(PlannedAction {
                rank,
                label: label.to_string(),
                due: due_date(context.start, context.window_days, rank as u32, count)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let secondary = secondary_kpis(row, scope, &driver.kpi)
        .into_iter()
        .map(|cell| WatchedKpi {
            kpi: cell.kpi.clone(),
            deviation_pct: round2(cell.deviation * 100.0),
        })
        .collect();

    let guardrail = book.guardrail.filter(|kpi| *kpi != driver.kpi).map(|kpi| {
        let deviation_pct = row.kpi(kpi).map(|cell| round2(cell.deviation * 100.0));
        Guardrail {
            kpi: kpi.to_string(),
            deviation_pct,
            note: format!("Ne pas dégrader {kpi} en corrigeant {}.", driver.kpi),
        }
    });

    let trajectory = match (driver.value, driver.objective) {
        (Some(value), Some(objective)) => trajectory(
            value,
            objective,
            context.steps,
            context.window_days,
            context.start,
        )?,
        _ => Vec::new(),
    };

    Ok(Diagnosis::Plan(Box::new(ActionPlan {
        agent: row.agent.clone(),
        month: row.month.clone(),
        theme: book.theme.to_string(),
        driver: driver.kpi.clone(),
        value: driver.value,
        objective: driver.objective,
        mode: driver.mode,
        deviation_pct: round2(driver.deviation * 100.0),
        diagnostic: book.diagnostic.to_string(),
        root_causes: book.root_causes.iter().map(|cause| cause.to_string()).collect(),
        actions,
        secondary,
        guardrail,
        owners: book.owners.iter().map(|owner| owner.to_string()).collect(),
        expected_impact: book.expected_impact.to_string(),
        trajectory,
        hint: blocking_hint(&driver.kpi, driver.mode, driver.deviation).map(str::to_string),
    })))
}

fn format_number(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}"),
        None => "n/a".to_string(),
    }
}

/// Copy-paste text block of a diagnosis.
pub fn render_text(diagnosis: &Diagnosis) -> String {
    let mut output = String::new();
    let plan = match diagnosis {
        Diagnosis::NoActionRequired { agent, month } => {
            let _ = writeln!(output, "Agent: {agent} | Période: {month}");
            let _ = writeln!(
                output,
                "Aucun écart défavorable détecté : PDA non requis sur cette période."
            );
            return output;
        }
        Diagnosis::Plan(plan) => plan,
    };

    let _ = writeln!(output, "PerformTrack 360 | TL Command Center | PDA");
    let _ = writeln!(output, "Agent: {} | Période: {}", plan.agent, plan.month);
    let _ = writeln!(output, "Thème: {}", plan.theme);
    let _ = writeln!(
        output,
        "Déclencheur principal: {} ({:.2}%)",
        plan.driver, plan.deviation_pct
    );
    let _ = writeln!(
        output,
        "Valeur: {} | Objectif: {} | Mode: {}",
        format_number(plan.value),
        format_number(plan.objective),
        plan.mode
    );
    if let Some(hint) = &plan.hint {
        let _ = writeln!(output, "Alerte: {hint}");
    }
    let _ = writeln!(output, "Diagnostic: {}", plan.diagnostic);

    let _ = writeln!(output, "Causes probables:");
    for (index, cause) in plan.root_causes.iter().enumerate() {
        let _ = writeln!(output, "{}. {cause}", index + 1);
    }

    let _ = writeln!(output, "Actions:");
    for action in &plan.actions {
        let _ = writeln!(output, "- {} (avant le {})", action.label, action.due);
    }

    if !plan.secondary.is_empty() {
        let watched: Vec<String> = plan
            .secondary
            .iter()
            .map(|kpi| format!("{} ({:.2}%)", kpi.kpi, kpi.deviation_pct))
            .collect();
        let _ = writeln!(output, "KPI secondaires: {}", watched.join(", "));
    }

    if let Some(guardrail) = &plan.guardrail {
        match guardrail.deviation_pct {
            Some(pct) => {
                let _ = writeln!(output, "Garde-fou: {} (écart actuel {pct:.2}%)", guardrail.note);
            }
            None => {
                let _ = writeln!(output, "Garde-fou: {}", guardrail.note);
            }
        }
    }

    if !plan.trajectory.is_empty() {
        let steps: Vec<String> = plan
            .trajectory
            .iter()
            .map(|milestone| format!("{} → {:.2}", milestone.due, milestone.target))
            .collect();
        let _ = writeln!(output, "Trajectoire: {}", steps.join(" | "));
    }

    let _ = writeln!(output, "Responsables: {}", plan.owners.join(", "));
    let _ = writeln!(output, "Impact attendu: {}", plan.expected_impact);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(kpi: &str, mode: KpiMode, deviation: f64) -> KpiDeviation {
        KpiDeviation {
            kpi: kpi.to_string(),
            value: Some(250.0),
            objective: Some(200.0),
            mode,
            deviation,
            weighted: 0.0,
        }
    }

    fn row(cells: Vec<KpiDeviation>) -> DeviationRow {
        DeviationRow {
            agent: "A1".to_string(),
            month: "2024-01".to_string(),
            kpis: cells,
            score_global: 0.0,
        }
    }

    fn scope(kpis: &[&str]) -> Vec<String> {
        kpis.iter().map(|kpi| kpi.to_string()).collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn plan(diagnosis: Result<Diagnosis>) -> ActionPlan {
        match diagnosis.unwrap() {
            Diagnosis::Plan(plan) => *plan,
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    #[test]
    fn bad_predicate_depends_on_mode() {
        assert!(is_bad(KpiMode::Min, 0.01));
        assert!(!is_bad(KpiMode::Min, -0.2));
        assert!(is_bad(KpiMode::Max, -0.01));
        assert!(!is_bad(KpiMode::Max, 0.2));
        assert!(is_bad(KpiMode::Target, -0.031));
        assert!(is_bad(KpiMode::Target, 0.05));
        assert!(!is_bad(KpiMode::Target, 0.03));
        assert!(!is_bad(KpiMode::Target, -0.02));
    }

    #[test]
    fn driver_is_largest_adverse_magnitude() {
        let row = row(vec![
            cell("DMT (sec)", KpiMode::Max, -0.06),
            cell("Qualité (%)", KpiMode::Min, 0.04),
        ]);
        let scope = scope(&["DMT (sec)", "Qualité (%)"]);

        let driver = select_driver(&row, &scope).unwrap();
        assert_eq!(driver.kpi, "DMT (sec)");
    }

    #[test]
    fn ties_go_to_first_kpi_in_scope_order() {
        let row = row(vec![
            cell("Prod", KpiMode::Max, -0.05),
            cell("ABS (%)", KpiMode::Min, 0.05),
        ]);

        let driver = select_driver(&row, &scope(&["Prod", "ABS (%)"])).unwrap();
        assert_eq!(driver.kpi, "Prod");
        let driver = select_driver(&row, &scope(&["ABS (%)", "Prod"])).unwrap();
        assert_eq!(driver.kpi, "ABS (%)");
    }

    #[test]
    fn no_adverse_kpi_means_no_action() {
        let row = row(vec![
            cell("Prod", KpiMode::Max, 0.1),
            cell("DMT (sec)", KpiMode::Min, -0.02),
            cell("Qualité (%)", KpiMode::Target, 0.01),
        ]);
        let diagnosis = diagnose(
            &row,
            &scope(&["Prod", "DMT (sec)", "Qualité (%)"]),
            &PlanContext::new(start()),
        )
        .unwrap();
        assert_eq!(
            diagnosis,
            Diagnosis::NoActionRequired {
                agent: "A1".to_string(),
                month: "2024-01".to_string(),
            }
        );
        assert!(render_text(&diagnosis).contains("PDA non requis"));
    }

    #[test]
    fn kpis_outside_scope_are_ignored() {
        let row = row(vec![
            cell("Prod", KpiMode::Max, -0.5),
            cell("ABS (%)", KpiMode::Min, 0.01),
        ]);
        let driver = select_driver(&row, &scope(&["ABS (%)"])).unwrap();
        assert_eq!(driver.kpi, "ABS (%)");
    }

    #[test]
    fn secondary_kpis_sorted_by_signed_deviation() {
        let row = row(vec![
            cell("ABS (%)", KpiMode::Min, 0.09),
            cell("Prod", KpiMode::Max, -0.04),
            cell("DMT (sec)", KpiMode::Max, -0.12),
            cell("Qualité (%)", KpiMode::Target, 0.05),
        ]);
        let scope = scope(&["ABS (%)", "Prod", "DMT (sec)", "Qualité (%)"]);

        let plan = plan(diagnose(&row, &scope, &PlanContext::new(start())));
        assert_eq!(plan.driver, "DMT (sec)");
        let watched: Vec<&str> = plan.secondary.iter().map(|kpi| kpi.kpi.as_str()).collect();
        assert_eq!(watched, vec!["Prod", "Qualité (%)", "ABS (%)"]);
        assert_eq!(plan.secondary[0].deviation_pct, -4.0);
    }

    #[test]
    fn plan_uses_driver_playbook_and_guardrail() {
        let row = row(vec![
            cell("DMT (sec)", KpiMode::Max, -0.06),
            cell("Qualité (%)", KpiMode::Min, 0.04),
        ]);
        let plan = plan(diagnose(
            &row,
            &scope(&["DMT (sec)", "Qualité (%)"]),
            &PlanContext::new(start()),
        ));

        assert_eq!(plan.theme, "Efficacité de traitement");
        assert_eq!(plan.deviation_pct, -6.0);
        assert_eq!(plan.actions.len(), 3);
        assert_eq!(plan.actions[0].rank, 1);
        assert_eq!(plan.actions[0].due, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(plan.actions[2].due, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        let guardrail = plan.guardrail.unwrap();
        assert_eq!(guardrail.kpi, "Qualité (%)");
        assert_eq!(guardrail.deviation_pct, Some(4.0));
        assert_eq!(plan.hint.as_deref(), Some("Risque CX : DMT dégradée, coaching + quick wins."));
    }

    #[test]
    fn unknown_kpi_falls_back_to_generic_playbook() {
        let row = row(vec![cell("NPS", KpiMode::Max, -0.2)]);
        let plan = plan(diagnose(&row, &scope(&["NPS"]), &PlanContext::new(start())));
        assert_eq!(plan.diagnostic, DEFAULT_PLAYBOOK.diagnostic);
        assert!(plan.guardrail.is_none());
        assert!(plan.hint.is_none());
        assert_eq!(playbook("Prod").theme, "Productivité");
    }

    #[test]
    fn trajectory_ends_on_objective() {
        let steps = trajectory(250.0, 200.0, 3, 10, start()).unwrap();
        assert_eq!(steps.len(), 3);
        assert!((steps[0].target - 233.333_333).abs() < 1e-3);
        assert!((steps[1].target - 216.666_667).abs() < 1e-3);
        assert_eq!(steps[2].target, 200.0);
        assert_eq!(steps[2].due, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());

        let single = trajectory(0.1, 0.3, 1, 10, start()).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].target, 0.3);
    }

    #[test]
    fn oversized_plans_are_rejected_instead_of_overflowing() {
        let err = trajectory(250.0, 200.0, 3, 2_000_000_000, start()).unwrap_err();
        assert!(matches!(err, KpiError::InputContractViolation(_)));
        assert!(trajectory(250.0, 200.0, 4_000_000_000, 10, start()).is_err());

        let row = row(vec![cell("DMT (sec)", KpiMode::Min, 0.25)]);
        let context = PlanContext {
            window_days: u32::MAX,
            ..PlanContext::new(start())
        };
        assert!(diagnose(&row, &scope(&["DMT (sec)"]), &context).is_err());

        let widest = trajectory(250.0, 200.0, MAX_STEPS, MAX_WINDOW_DAYS, start()).unwrap();
        assert_eq!(widest.last().unwrap().due, NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
    }

    #[test]
    fn blocking_hints_require_adverse_direction() {
        assert!(blocking_hint("Qualité (%)", KpiMode::Max, -0.03).is_some());
        assert!(blocking_hint("Qualité (%)", KpiMode::Max, 0.03).is_none());
        assert!(blocking_hint("ABS (%)", KpiMode::Min, 0.04).is_none());
        assert!(blocking_hint("ABS (%)", KpiMode::Min, 0.06).is_some());
        assert!(blocking_hint("Prod", KpiMode::Max, -0.5).is_none());
    }

    #[test]
    fn text_block_lists_plan_sections() {
        let row = row(vec![
            cell("Prod", KpiMode::Max, -0.1),
            cell("ABS (%)", KpiMode::Min, 0.02),
        ]);
        let diagnosis =
            diagnose(&row, &scope(&["Prod", "ABS (%)"]), &PlanContext::new(start())).unwrap();
        let text = render_text(&diagnosis);

        assert!(text.contains("Agent: A1 | Période: 2024-01"));
        assert!(text.contains("Déclencheur principal: Prod (-10.00%)"));
        assert!(text.contains("KPI secondaires: ABS (%) (2.00%)"));
        assert!(text.contains("Garde-fou: Ne pas dégrader Qualité (%) en corrigeant Prod."));
        assert!(text.contains("Impact attendu: Gain de productivité"));
    }
}

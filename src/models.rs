use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// KPI columns recognized by default, in display order.
pub const KPI_VOCABULARY: [&str; 5] = ["ABS (%)", "Prod", "Qualité (%)", "DMT (sec)", "TH prod (€)"];

/// Month label of the objectives row that carries each KPI's mode.
pub const TYPE_SENTINEL: &str = "Type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiMode {
    /// Lower observed is better.
    Min,
    /// Higher observed is better.
    Max,
    /// Closest to the objective is better.
    Target,
}

impl KpiMode {
    /// Case-insensitive, whitespace-trimmed parse of a `Type` cell.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "min" => Some(KpiMode::Min),
            "max" => Some(KpiMode::Max),
            "target" => Some(KpiMode::Target),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KpiMode::Min => "min",
            KpiMode::Max => "max",
            KpiMode::Target => "target",
        }
    }
}

impl fmt::Display for KpiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One results line: an agent's observed KPI values for a month.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsRow {
    pub agent: String,
    pub month: String,
    pub values: BTreeMap<String, Option<f64>>,
}

impl ResultsRow {
    pub fn value(&self, kpi: &str) -> Option<f64> {
        self.values.get(kpi).copied().flatten()
    }
}

/// One objectives line: the monthly target for every KPI.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveRow {
    pub month: String,
    pub values: BTreeMap<String, Option<f64>>,
}

impl ObjectiveRow {
    pub fn value(&self, kpi: &str) -> Option<f64> {
        self.values.get(kpi).copied().flatten()
    }
}

/// The objectives input with its `Type` row kept apart from the monthly rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveSheet {
    /// Raw cells of the `Type` row, keyed by KPI column. `None` if the row is absent.
    pub type_row: Option<BTreeMap<String, String>>,
    pub rows: Vec<ObjectiveRow>,
}

/// Per-KPI cell of a deviation row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiDeviation {
    pub kpi: String,
    pub value: Option<f64>,
    pub objective: Option<f64>,
    pub mode: KpiMode,
    /// Signed fraction, rounded to 4 decimals.
    pub deviation: f64,
    /// `deviation * weight`, filled by the score aggregator.
    pub weighted: f64,
}

/// One agent/month line of the deviation table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationRow {
    pub agent: String,
    pub month: String,
    /// In scope order.
    pub kpis: Vec<KpiDeviation>,
    pub score_global: f64,
}

impl DeviationRow {
    pub fn kpi(&self, name: &str) -> Option<&KpiDeviation> {
        self.kpis.iter().find(|cell| cell.kpi == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentScore {
    pub agent: String,
    pub mean_score: f64,
    pub months: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendVerdict {
    StrongImprovement,
    SlightImprovement,
    ModerateDecline,
    SignificantDecline,
}

impl TrendVerdict {
    pub fn label(self) -> &'static str {
        match self {
            TrendVerdict::StrongImprovement => "Tendance très positive.",
            TrendVerdict::SlightImprovement => "Légère amélioration.",
            TrendVerdict::ModerateDecline => "Baisse modérée à surveiller.",
            TrendVerdict::SignificantDecline => "Baisse significative : action recommandée.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSynthesis {
    pub improving: Vec<String>,
    pub stable: Vec<String>,
    pub declining: Vec<String>,
    /// Mean `Score_Global` in percent, 2 decimals.
    pub mean_score_pct: f64,
    pub total_agents: usize,
    pub verdict: TrendVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryCards {
    pub mean_score_pct: f64,
    pub agents: usize,
    pub months: usize,
    pub best: Option<AgentScore>,
    pub worst: Option<AgentScore>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::P1, Priority::P2, Priority::P3];

    pub fn label(self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|priority| priority.label().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| format!("unknown priority {raw:?}, expected P1, P2 or P3"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "À faire")]
    Todo,
    #[serde(rename = "En cours")]
    InProgress,
    #[serde(rename = "Fait")]
    Done,
    #[serde(rename = "Bloqué")]
    Blocked,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Todo, Status::InProgress, Status::Done, Status::Blocked];

    pub fn label(self) -> &'static str {
        match self {
            Status::Todo => "À faire",
            Status::InProgress => "En cours",
            Status::Done => "Fait",
            Status::Blocked => "Bloqué",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    /// Accepts the French labels or `todo`, `in-progress`, `done`, `blocked`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let alias = match raw.to_lowercase().as_str() {
            "todo" | "a faire" => Some(Status::Todo),
            "in-progress" | "en cours" => Some(Status::InProgress),
            "done" | "fait" => Some(Status::Done),
            "blocked" | "bloque" => Some(Status::Blocked),
            _ => None,
        };
        alias
            .or_else(|| {
                Status::ALL
                    .into_iter()
                    .find(|status| status.label().to_lowercase() == raw.to_lowercase())
            })
            .ok_or_else(|| format!("unknown status {raw:?}"))
    }
}

/// Coaching action types offered when creating a tracked action.
pub const ACTION_TYPES: [&str; 7] = [
    "Coaching 1:1 (écoute ciblée)",
    "Rappel process / script",
    "Shadowing / double écoute",
    "Plan de montée en compétence",
    "Calibration Qualité",
    "Réglage organisation (pause, after-call, etc.)",
    "Escalade OPS (blocage outil / flux / knowledge)",
];

/// A tracked coaching action, as persisted in the action plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub kpi: String,
    #[serde(default)]
    pub mois_ref: String,
    #[serde(default)]
    pub ecart_pct: f64,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub preuve: String,
    #[serde(default)]
    pub expected_impact: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Action timestamps are written as RFC 3339. Older files carry naive ISO
/// timestamps without an offset, which are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .into_iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|at| at.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}"))),
            None => Ok(None),
        }
    }
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod deviation;
mod error;
mod ingest;
mod models;
mod pda;
mod report;
mod score;
mod store;

use config::{AnalysisConfig, ConfigFile, Overrides};
use models::{DeviationRow, Priority, Status, ACTION_TYPES};
use pda::{Diagnosis, PlanContext};
use store::{ActionFilter, ActionPatch, ActionPlanStore, NewAction};

#[derive(Parser)]
#[command(name = "kpi-coaching")]
#[command(about = "KPI deviation scoring and coaching action plans for team leaders", long_about = None)]
struct Cli {
    /// Action plan file
    #[arg(long, global = true, env = "PERFORMTRACK_PDA_PATH", default_value = store::DEFAULT_STORE_PATH)]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Monthly results per agent
    #[arg(long, default_value = "kpi_resultats.csv")]
    results: PathBuf,
    /// Monthly objectives, with the `Type` mode row
    #[arg(long, default_value = "kpi_objectifs.csv")]
    objectives: PathBuf,
    /// JSON settings file (kpi, mois, agents, ponderations)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long = "kpi")]
    kpis: Vec<String>,
    #[arg(long = "month")]
    months: Vec<String>,
    #[arg(long = "agent")]
    agents: Vec<String>,
    /// Raw KPI weight, e.g. `--weight Prod=30`
    #[arg(long = "weight", value_parser = config::parse_weight)]
    weights: Vec<(String, f64)>,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank agents by mean global score
    Score {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Team synthesis: improving, stable and declining agents
    Synthese {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Generate the action plan of one agent for one month
    Pda {
        #[command(flatten)]
        input: InputArgs,
        agent: String,
        month: String,
        /// First day of the plan, defaults to today
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(
            long,
            default_value_t = pda::DEFAULT_WINDOW_DAYS,
            value_parser = clap::value_parser!(u32).range(0..=i64::from(pda::MAX_WINDOW_DAYS))
        )]
        window_days: u32,
        #[arg(
            long,
            default_value_t = pda::DEFAULT_STEPS,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(pda::MAX_STEPS))
        )]
        steps: u32,
        /// Print the plan as JSON instead of the text block
        #[arg(long)]
        json: bool,
    },
    /// Write the markdown HR report of one agent
    Report {
        #[command(flatten)]
        input: InputArgs,
        agent: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export the deviation table and the tracked actions as CSV
    Export {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value = "exports")]
        out_dir: PathBuf,
    },
    /// Manage tracked actions
    Actions {
        #[command(subcommand)]
        command: ActionCommands,
    },
}

#[derive(Subcommand)]
enum ActionCommands {
    /// List actions, highest priority and earliest due date first
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        kpi: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Record a new action
    Add {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        kpi: String,
        #[arg(long)]
        month: String,
        /// Deviation at creation time, in percent
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        ecart_pct: f64,
        #[arg(long, default_value = ACTION_TYPES[0])]
        action_type: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "TL")]
        owner: String,
        /// Defaults to today
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long, default_value = "P1")]
        priority: Priority,
        #[arg(long, default_value = "todo")]
        status: Status,
        #[arg(long, default_value = "")]
        expected_impact: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Change fields of an existing action
    Update {
        id: String,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        due_date: Option<NaiveDate>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        preuve: Option<String>,
        #[arg(long)]
        expected_impact: Option<String>,
    },
    /// Remove an action
    Delete { id: String },
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!("{err}");
        for cause in err.chain().skip(1) {
            error!("caused by: {cause}");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Score { input, limit } => {
            let (_, rows) = load_table(&input)?;
            if rows.is_empty() {
                println!("No KPI rows in scope.");
                return Ok(());
            }

            let cards = score::summary_cards(&rows);
            println!(
                "Mean global score {:.2}% across {} agents and {} months.",
                cards.mean_score_pct, cards.agents, cards.months
            );
            if let (Some(best), Some(worst)) = (&cards.best, &cards.worst) {
                println!(
                    "Best agent {} ({:.2}%), weakest agent {} ({:.2}%).",
                    best.agent,
                    score::round2(best.mean_score * 100.0),
                    worst.agent,
                    score::round2(worst.mean_score * 100.0)
                );
            }

            println!("Top agents by global score:");
            for agent in score::rank_agents(&rows).iter().take(limit) {
                println!(
                    "- {} score {:.2}% across {} months",
                    agent.agent,
                    score::round2(agent.mean_score * 100.0),
                    agent.months
                );
            }
        }
        Commands::Synthese { input } => {
            let (config, rows) = load_table(&input)?;
            let synthesis = score::synthesize(&rows);

            println!("Synthèse équipe ({} agents)", synthesis.total_agents);
            println!("Période : {}", config.months.join(", "));
            println!("Progression : {}", list_or_dash(&synthesis.improving));
            println!("Stables : {}", list_or_dash(&synthesis.stable));
            println!("En baisse : {}", list_or_dash(&synthesis.declining));
            println!("Score global moyen : {:.2}%", synthesis.mean_score_pct);
            println!("{}", synthesis.verdict.label());

            for kpi in &config.kpis {
                let mean = score::mean_deviation(&rows, kpi);
                println!(
                    "- {kpi} : écart moyen {:.2}% (poids {:.0}%)",
                    score::round2(mean * 100.0),
                    config.weights.weight(kpi) * 100.0
                );
            }
        }
        Commands::Pda {
            input,
            agent,
            month,
            start_date,
            window_days,
            steps,
            json,
        } => {
            let (config, rows) = load_table(&input)?;
            let row = find_row(&rows, &agent, &month)?;
            let context = PlanContext {
                window_days,
                steps,
                ..PlanContext::new(start_date.unwrap_or_else(|| Utc::now().date_naive()))
            };

            let diagnosis = pda::diagnose(row, &config.kpis, &context)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&diagnosis)?);
            } else {
                print!("{}", pda::render_text(&diagnosis));
            }
            if let Diagnosis::Plan(plan) = &diagnosis {
                info!(agent = %plan.agent, month = %plan.month, driver = %plan.driver, "action plan generated");
            }
        }
        Commands::Report { input, agent, out } => {
            let (config, rows) = load_table(&input)?;
            let actions = ActionPlanStore::open(&cli.store)?.list()?;
            let report = report::build_agent_report(&agent, &config, &rows, &actions);

            let out = out.unwrap_or_else(|| PathBuf::from(format!("rapport_{agent}.md")));
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { input, out_dir } => {
            let (config, rows) = load_table(&input)?;
            let mut actions = ActionPlanStore::open(&cli.store)?.list()?;
            store::sort_for_display(&mut actions);

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;
            let deviations = out_dir.join("ecarts_kpi.csv");
            report::write_deviation_csv(&rows, &config.kpis, &deviations)?;
            let tracked = out_dir.join("plan_actions.csv");
            report::write_actions_csv(&actions, &tracked)?;

            println!(
                "Exported {} deviation rows to {} and {} actions to {}.",
                rows.len(),
                deviations.display(),
                actions.len(),
                tracked.display()
            );
        }
        Commands::Actions { command } => run_actions(&cli.store, command)?,
    }

    Ok(())
}

fn run_actions(path: &Path, command: ActionCommands) -> anyhow::Result<()> {
    let store = ActionPlanStore::open(path)
        .with_context(|| format!("failed to open action plan {}", path.display()))?;

    match command {
        ActionCommands::List {
            agent,
            status,
            kpi,
            priority,
        } => {
            let filter = ActionFilter {
                agent,
                status,
                kpi,
                priority,
            };
            let mut actions: Vec<_> = store
                .list()?
                .into_iter()
                .filter(|action| filter.matches(action))
                .collect();
            store::sort_for_display(&mut actions);

            if actions.is_empty() {
                println!("No actions in {}.", store.path().display());
                return Ok(());
            }
            for action in &actions {
                println!(
                    "{} [{}] {} {} ({}) {} | {} | échéance {} | {}",
                    action.id,
                    action.priority.label(),
                    action.agent,
                    action.kpi,
                    action.mois_ref,
                    action.action_type,
                    action.owner,
                    action.due_date,
                    action.status.label()
                );
            }
            let done = actions.iter().filter(|a| a.status == Status::Done).count();
            println!("{} actions, {done} done.", actions.len());
        }
        ActionCommands::Add {
            agent,
            kpi,
            month,
            ecart_pct,
            action_type,
            description,
            owner,
            due_date,
            priority,
            status,
            expected_impact,
            tags,
        } => {
            if !ACTION_TYPES.contains(&action_type.as_str()) {
                info!(%action_type, "action type outside the standard catalogue");
            }
            let due_date = due_date.unwrap_or_else(|| Utc::now().date_naive());
            let id = store.create(NewAction {
                agent,
                kpi,
                mois_ref: month,
                ecart_pct,
                action_type,
                description,
                owner,
                due_date: due_date.to_string(),
                priority,
                status,
                preuve: String::new(),
                expected_impact,
                tags,
            })?;
            println!("Action {id} recorded in {}.", store.path().display());
        }
        ActionCommands::Update {
            id,
            status,
            owner,
            priority,
            due_date,
            description,
            preuve,
            expected_impact,
        } => {
            let patch = ActionPatch {
                status,
                owner,
                priority,
                due_date: due_date.map(|date| date.to_string()),
                description,
                preuve,
                expected_impact,
                ..ActionPatch::default()
            };
            if store.update(&id, patch)? {
                println!("Action {id} updated.");
            } else {
                warn!(%id, "no action with this id, nothing updated");
            }
        }
        ActionCommands::Delete { id } => {
            if store.delete(&id)? {
                println!("Action {id} deleted.");
            } else {
                warn!(%id, "no action with this id, nothing deleted");
            }
        }
    }

    Ok(())
}

/// Loads both sheets, resolves the scope and computes the scored deviation table.
fn load_table(input: &InputArgs) -> anyhow::Result<(AnalysisConfig, Vec<DeviationRow>)> {
    let delimiter =
        u8::try_from(input.delimiter).context("--delimiter must be a single-byte character")?;

    let results = ingest::load_sheet(&input.results, delimiter)
        .with_context(|| format!("failed to load results {}", input.results.display()))?;
    let objectives = ingest::load_sheet(&input.objectives, delimiter)
        .with_context(|| format!("failed to load objectives {}", input.objectives.display()))?;
    let file = input.config.as_deref().map(ConfigFile::load).transpose()?;

    let overrides = Overrides {
        kpis: input.kpis.clone(),
        months: input.months.clone(),
        agents: input.agents.clone(),
        weights: input.weights.clone(),
    };
    let config = config::resolve(&results, file, overrides)?;
    for (kpi, weight) in config.weights.iter() {
        info!(kpi, weight, "normalized weight");
    }

    let rows = deviation::evaluate(
        &results.to_results(&config.kpis)?,
        &objectives.to_objectives(&config.kpis)?,
        &config,
    )?;
    info!(
        rows = rows.len(),
        agents = config.agents.len(),
        months = config.months.len(),
        "deviation table ready"
    );
    Ok((config, rows))
}

fn find_row<'a>(rows: &'a [DeviationRow], agent: &str, month: &str) -> anyhow::Result<&'a DeviationRow> {
    rows.iter()
        .find(|row| row.agent == agent && row.month == month)
        .with_context(|| format!("no KPI data for agent {agent} in {month}"))
}

fn list_or_dash(agents: &[String]) -> String {
    if agents.is_empty() {
        "-".to_string()
    } else {
        agents.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_ids_are_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pda_actions.json");

        run_actions(
            &path,
            ActionCommands::Update {
                id: "missing".to_string(),
                status: Some(Status::Done),
                owner: None,
                priority: None,
                due_date: None,
                description: None,
                preuve: None,
                expected_impact: None,
            },
        )
        .unwrap();
        run_actions(&path, ActionCommands::Delete { id: "missing".to_string() }).unwrap();

        assert!(ActionPlanStore::open(&path).unwrap().list().unwrap().is_empty());
    }

    #[test]
    fn plan_bounds_are_enforced_at_parse_time() {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(["kpi-coaching", "pda", "A1", "2024-01"].iter().chain(args))
        };
        assert!(parse(&["--window-days", "366", "--steps", "52"]).is_ok());
        assert!(parse(&["--window-days", "2000000000"]).is_err());
        assert!(parse(&["--steps", "4000000000"]).is_err());
        assert!(parse(&["--steps", "0"]).is_err());
    }
}

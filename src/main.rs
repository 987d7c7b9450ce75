mod cli;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use juri::JudgeSession;
use juri::services::backend::FileBackend;
use juri::services::config_loader::load_juri_config;
use juri::services::persistence::PersistenceGateway;
use juri::services::rubric_repository::{RubricRepository, load_fallback_rubric};
use juri::services::store::JsonFileStore;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

fn init_tracing() -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output, so the console layer writes to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let _ = fs::create_dir_all("logs");
    let file_appender = tracing_appender::rolling::daily("logs", "juri.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_target(true);

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(err) = init_result {
        eprintln!("tracing init failed: {err}");
        return None;
    }

    Some(file_guard)
}

fn open_session(cli: &Cli) -> Result<JudgeSession> {
    let data = cli.data.as_path();
    let config = load_juri_config(data)?;

    let store_path = data.join(&config.store_file);
    if let Some(parent) = store_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Arc::new(JsonFileStore::open(store_path));
    let backend = Arc::new(FileBackend::new(data, &config.submissions_file));

    let fallback_path = config.fallback.rubric_file.as_ref().map(|p| data.join(p));
    let fallback = load_fallback_rubric(fallback_path.as_deref());
    let rubrics = Arc::new(RubricRepository::with_fallback(backend.clone(), fallback));
    let gateway = PersistenceGateway::with_window(store, config.save_debounce());

    Ok(JudgeSession::new(
        cli.judge.clone(),
        backend,
        rubrics,
        gateway,
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let mut session = open_session(&cli)?;
    session.load_reference_data().await;
    if let Some(event_id) = cli.event.as_deref() {
        session.select_event(event_id);
    }
    if let Some(form_id) = cli.form.as_deref() {
        session.select_form(form_id).await;
    }

    let result = execute(&cli.command, &mut session).await;
    session.flush();
    result
}

async fn execute(command: &Commands, session: &mut JudgeSession) -> Result<()> {
    match command {
        Commands::Show => print_sheet(session),
        Commands::Events => {
            for event in session.events() {
                let dates = match (event.start_date, event.end_date) {
                    (Some(start), Some(end)) => format!("{start} - {end}"),
                    (Some(start), None) => start.to_string(),
                    _ => String::new(),
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    event.id,
                    event.name,
                    event.location.as_deref().unwrap_or("-"),
                    dates
                );
            }
        }
        Commands::Teams => {
            if session.sheet().event_id.is_none() {
                bail!("select an event with --event first");
            }
            let selected = session.sheet().team_id.clone();
            for team in session.visible_teams() {
                let marker = if selected.as_deref() == Some(team.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}\t{}", team.id, team.school_name);
            }
        }
        Commands::SelectTeam { id } => {
            session.select_team(id)?;
            println!(
                "Scoring {}",
                session.team_name().unwrap_or(id.as_str())
            );
        }
        Commands::Set { aspect, value } => {
            session.set_score_input(aspect, value)?;
            println!("{aspect} = {}", session.sheet().get_score(aspect));
        }
        Commands::Fill {
            tier,
            aspect,
            category,
        } => {
            if let Some(aspect_id) = aspect {
                match session.quick_fill_aspect(aspect_id, *tier)? {
                    Some(value) => println!("{aspect_id} = {value}"),
                    None => println!("{aspect_id} declares no {} values", tier),
                }
            } else {
                let outcome = match category {
                    Some(name) => session.quick_fill_category(name, *tier)?,
                    None => session.quick_fill_all(*tier)?,
                };
                for (aspect_id, value) in &outcome.applied {
                    println!("{aspect_id} = {value}");
                }
                for aspect_id in &outcome.skipped {
                    println!("{aspect_id} skipped: no {} values", tier);
                }
            }
        }
        Commands::Reset => {
            session.reset()?;
            println!("Sheet cleared");
        }
        Commands::Submit => {
            let receipt = session.submit().await?;
            info!("Submission accepted for team {}", receipt.team_id);
            println!(
                "Submitted team {}: {} points ({}%)",
                receipt.team_id, receipt.total_score, receipt.percentage
            );
            if let Some(message) = receipt.message {
                println!("{message}");
            }
        }
    }
    Ok(())
}

fn print_sheet(session: &JudgeSession) {
    let (Some(rubric), Some(summary)) = (session.rubric(), session.summary()) else {
        println!("No form selected");
        return;
    };
    let team = session
        .team_name()
        .or(session.sheet().team_id.as_deref())
        .unwrap_or("-");
    println!("{} | team: {}", summary.form_name, team);

    for (category, totals) in rubric.categories.iter().zip(&summary.categories) {
        println!(
            "\n{}  {}/{} ({}%, {})",
            category.name, totals.total, totals.max, totals.percentage, totals.quality
        );
        for aspect in &category.aspects {
            let score = session.sheet().get_score(&aspect.id);
            let band = aspect
                .band_of(score)
                .map(|band| band.label())
                .unwrap_or("-");
            println!(
                "  {:<20} {:<28} {:>3}/{:<3} {}",
                aspect.id, aspect.label, score, aspect.max_score, band
            );
        }
    }
    println!(
        "\nTotal {}/{} ({}%, {})",
        summary.total, summary.max, summary.percentage, summary.quality
    );
}

fn main() -> Result<()> {
    let _log_guard = init_tracing();
    let cli = Cli::parse();
    info!("Starting juri for judge {}", cli.judge);

    if !cli.data.is_dir() {
        bail!("data folder {} does not exist", cli.data.display());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use juri::models::QualityBand;

/// Juri - rubric scoring for judged drill competitions
#[derive(Parser, Debug)]
#[command(name = "juri")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Data folder holding forms/, events.json, participants.json and config.toml
    #[arg(long, global = true, env = "JURI_DATA", default_value = ".")]
    pub data: PathBuf,

    /// Judge scoring this session
    #[arg(long, env = "JURI_JUDGE")]
    pub judge: String,

    /// Active form (rubric) id
    #[arg(long, global = true, env = "JURI_FORM")]
    pub form: Option<String>,

    /// Active event id
    #[arg(long, global = true, env = "JURI_EVENT")]
    pub event: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the sheet with per-category and form totals
    Show,

    /// List events from the data folder
    Events,

    /// List teams registered for the active event
    Teams,

    /// Choose the team to score
    SelectTeam {
        /// Participant id
        id: String,
    },

    /// Set one aspect's score
    Set {
        /// Aspect id
        aspect: String,
        /// Score, as typed
        value: String,
    },

    /// Fill scores with the representative value of a quality tier
    Fill {
        /// poor, fair, good or excellent (Indonesian labels accepted)
        #[arg(value_parser = parse_tier)]
        tier: QualityBand,

        /// Only this aspect
        #[arg(long, conflicts_with = "category")]
        aspect: Option<String>,

        /// Only this category
        #[arg(long)]
        category: Option<String>,
    },

    /// Discard the current scores
    Reset,

    /// Send the sheet for the selected team
    Submit,
}

fn parse_tier(input: &str) -> Result<QualityBand, String> {
    input.parse::<QualityBand>().map_err(|err| err.to_string())
}

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use revise_core::model::DocumentId;

/// Top-level CLI parser for the `revise` binary.
#[derive(Debug, Parser)]
#[command(name = "revise", version, about = "Plan revision sessions ahead of exams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store root URL (overrides `api.base_url`)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Logged-in user id (overrides `auth.user_id`)
    #[arg(long, global = true)]
    pub user_id: Option<u64>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage exams
    Exams {
        #[command(subcommand)]
        action: ExamCommands,
    },
    /// Manage the revision plan of an exam
    Plan {
        #[command(subcommand)]
        action: PlanCommands,
    },
    /// Show the user's exams and revision calendar
    Board,
}

#[derive(Debug, Subcommand)]
pub enum ExamCommands {
    /// List exams, soonest first
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Show one exam with its sessions
    Show { id: DocumentId },
    /// Create an exam
    Add(ExamFields),
    /// Change fields of an exam
    Edit {
        id: DocumentId,
        #[command(flatten)]
        fields: ExamFieldChanges,
    },
    /// Delete an exam (its revision plan first)
    Delete { id: DocumentId },
}

#[derive(Debug, Args)]
pub struct ExamFields {
    /// Course code
    #[arg(long)]
    pub code: String,
    #[arg(long)]
    pub name: String,
    /// RFC 3339, `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD` (UTC)
    #[arg(long, value_parser = parse_datetime)]
    pub date: DateTime<Utc>,
    #[arg(long)]
    pub weight: f64,
}

#[derive(Debug, Args)]
pub struct ExamFieldChanges {
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, value_parser = parse_datetime)]
    pub date: Option<DateTime<Utc>>,
    #[arg(long)]
    pub weight: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum PlanCommands {
    /// Print the sessions that would be generated
    Preview { id: DocumentId },
    /// Create and link the sessions
    Generate { id: DocumentId },
    /// Unlink and delete the sessions
    Delete { id: DocumentId },
}

pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Ok(at.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|day| day.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| format!("invalid date `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn clap_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exam_add_parses_fields() {
        let cli = Cli::try_parse_from([
            "revise", "exams", "add", "--code", "PHY", "--name", "Physics", "--date",
            "2024-06-10", "--weight", "25",
        ])
        .expect("cli should parse");
        let Commands::Exams {
            action: ExamCommands::Add(fields),
        } = cli.command
        else {
            panic!("expected exams add");
        };
        assert_eq!(fields.name, "Physics");
        assert_eq!(fields.date, Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap());
        assert!((fields.weight - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["revise", "plan", "generate", "abc123", "--json", "--user-id", "7"])
            .expect("cli should parse");
        assert!(cli.json);
        assert_eq!(cli.user_id, Some(7));
        assert!(matches!(
            cli.command,
            Commands::Plan {
                action: PlanCommands::Generate { ref id }
            } if id.as_str() == "abc123"
        ));
    }

    #[test]
    fn blank_document_id_is_rejected() {
        assert!(Cli::try_parse_from(["revise", "exams", "show", " "]).is_err());
    }

    #[test]
    fn dates_accept_three_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-06-10T10:30:00+02:00"), Ok(expected));
        assert_eq!(parse_datetime("2024-06-10T08:30"), Ok(expected));
        assert!(parse_datetime("10/06/2024").is_err());
    }
}

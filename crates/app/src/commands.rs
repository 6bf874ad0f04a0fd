use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use revise_core::model::{DocumentId, Exam, ExamChanges, ExamDraft};
use revise_core::planner::StudyWindow;
use services::{BoardError, Notice, OwnerScope, Severity};

use crate::cli::{Commands, ExamCommands, PlanCommands};
use crate::context::AppContext;

/// Output options shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    fn print<T: Serialize>(self, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }

    /// Print a notice and turn error notices into a failing exit.
    fn notice(self, notice: &Notice) -> anyhow::Result<()> {
        self.print(notice, || notice.message.clone())?;
        if notice.severity == Severity::Error {
            anyhow::bail!("{}", notice.message);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ExamRow<'a> {
    document_id: &'a str,
    code: &'a str,
    name: &'a str,
    date: Option<DateTime<Utc>>,
    weight: Option<f64>,
    sessions: Vec<SessionRow<'a>>,
}

#[derive(Debug, Serialize)]
struct SessionRow<'a> {
    document_id: &'a str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl<'a> ExamRow<'a> {
    fn new(exam: &'a Exam) -> Self {
        Self {
            document_id: exam.document_id().as_str(),
            code: exam.code(),
            name: exam.name(),
            date: exam.scheduled_at(),
            weight: exam.weight(),
            sessions: exam
                .sessions()
                .iter()
                .map(|link| SessionRow {
                    document_id: link.document_id.as_str(),
                    start: link.start,
                    end: link.end,
                })
                .collect(),
        }
    }

    fn line(&self) -> String {
        let date = self.date.map_or_else(|| "no date".to_string(), local);
        let weight = self
            .weight
            .map_or_else(|| "no weight".to_string(), |w| format!("weight {w}"));
        format!(
            "{}  {:<10} {:<24} {date:<16} {weight:<12} {} sessions",
            self.document_id,
            self.code,
            self.name,
            self.sessions.len()
        )
    }
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn window_line(window: &StudyWindow) -> String {
    format!(
        "{} -> {}",
        local(window.start),
        window.end.with_timezone(&Local).format("%H:%M")
    )
}

/// Run one parsed command.
///
/// # Errors
///
/// Returns the service error, or an error for failed plan notices.
pub async fn dispatch(command: Commands, ctx: &mut AppContext, out: Output) -> anyhow::Result<()> {
    match command {
        Commands::Exams { action } => exams(action, ctx, out).await,
        Commands::Plan { action } => plan(action, ctx, out).await,
        Commands::Board => board(ctx, out).await,
    }
}

async fn exams(action: ExamCommands, ctx: &mut AppContext, out: Output) -> anyhow::Result<()> {
    match action {
        ExamCommands::List { page, page_size } => {
            let page = ctx.exams.list_page(page, page_size).await?;
            let rows: Vec<_> = page.exams.iter().map(ExamRow::new).collect();
            out.print(&rows, || {
                let mut lines: Vec<String> = rows.iter().map(ExamRow::line).collect();
                lines.push(format!(
                    "page {}/{} ({} exams)",
                    page.pagination.page, page.pagination.page_count, page.pagination.total
                ));
                lines.join("\n")
            })
        }
        ExamCommands::Show { id } => {
            let exam = ctx.exams.get(&id).await?;
            let row = ExamRow::new(&exam);
            out.print(&row, || {
                let mut lines = vec![row.line()];
                lines.extend(row.sessions.iter().filter_map(|s| {
                    s.start.map(|start| format!("  revision {}  {}", local(start), s.document_id))
                }));
                lines.join("\n")
            })
        }
        ExamCommands::Add(fields) => {
            let exam = ctx
                .exams
                .create(ExamDraft {
                    code: fields.code,
                    name: fields.name,
                    scheduled_at: Some(fields.date),
                    weight: Some(fields.weight),
                })
                .await?;
            let row = ExamRow::new(&exam);
            out.print(&row, || format!("created {}", row.line()))
        }
        ExamCommands::Edit { id, fields } => {
            let changes = ExamChanges {
                code: fields.code,
                name: fields.name,
                scheduled_at: fields.date,
                weight: fields.weight,
            };
            let exam = ctx.exams.update(&id, changes).await?;
            let row = ExamRow::new(&exam);
            out.print(&row, || format!("updated {}", row.line()))
        }
        ExamCommands::Delete { id } => {
            load_board(ctx).await?;
            let result = ctx.board.delete_exam(&id).await;
            report(out, result)
        }
    }
}

async fn plan(action: PlanCommands, ctx: &mut AppContext, out: Output) -> anyhow::Result<()> {
    match action {
        PlanCommands::Preview { id } => {
            let exam = fetch(ctx, &id).await?;
            let windows = ctx.board.plans().preview(&exam);
            out.print(&windows, || {
                if windows.is_empty() {
                    return format!("{} needs a date and a weight before planning", exam.name());
                }
                windows.iter().map(window_line).collect::<Vec<_>>().join("\n")
            })
        }
        PlanCommands::Generate { id } => {
            load_board(ctx).await?;
            let result = ctx.board.generate_plan(&id).await;
            report(out, result)
        }
        PlanCommands::Delete { id } => {
            load_board(ctx).await?;
            let result = ctx.board.delete_plan(&id).await;
            report(out, result)
        }
    }
}

async fn fetch(ctx: &AppContext, id: &DocumentId) -> anyhow::Result<Exam> {
    ctx.exams
        .get(id)
        .await
        .with_context(|| format!("failed to load exam {id}"))
}

/// Load the configured user's board. Actions only apply to exams on it.
async fn load_board(ctx: &mut AppContext) -> anyhow::Result<()> {
    let user_id = ctx
        .user_id
        .context("no user configured: set auth.user_id or pass --user-id")?;
    ctx.board.load(user_id).await?;
    match ctx.board.owner_scope() {
        Some(OwnerScope::Client(relation)) => {
            tracing::warn!(%relation, "store refused the owner filter, exams were filtered locally");
        }
        Some(OwnerScope::Unavailable) => {
            tracing::warn!("no owner relation could be read, no exams are shown");
        }
        Some(OwnerScope::Server(_)) | None => {}
    }
    Ok(())
}

/// Print the notice of a board action, including one whose reload failed.
fn report(out: Output, result: Result<Notice, BoardError>) -> anyhow::Result<()> {
    match result {
        Ok(notice) => out.notice(&notice),
        Err(BoardError::ReloadFailed { notice, source }) => {
            out.notice(&notice)?;
            Err(anyhow::Error::new(source).context("the board could not be reloaded"))
        }
        Err(err) => Err(err.into()),
    }
}

async fn board(ctx: &mut AppContext, out: Output) -> anyhow::Result<()> {
    load_board(ctx).await?;

    let calendar = ctx.board.calendar();
    let rows: Vec<_> = ctx.board.exams().iter().map(ExamRow::new).collect();
    out.print(&calendar, || {
        let mut lines: Vec<String> = rows.iter().map(ExamRow::line).collect();
        lines.push(String::new());
        lines.extend(calendar.iter().map(|entry| {
            format!("{}  {}", local(entry.start), entry.title)
        }));
        lines.join("\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::StorageError;

    fn notice(severity: Severity, message: &str) -> Notice {
        Notice {
            severity,
            message: message.into(),
        }
    }

    #[test]
    fn success_notice_is_ok_and_error_notice_fails() {
        let out = Output { json: false };
        assert!(report(out, Ok(notice(Severity::Success, "Created 2 revision sessions for bio"))).is_ok());
        assert!(report(out, Ok(notice(Severity::Error, "Could not create the revision plan"))).is_err());
    }

    #[test]
    fn failed_reload_still_fails_the_command() {
        let err = report(
            Output { json: true },
            Err(BoardError::ReloadFailed {
                notice: notice(Severity::Success, "Deleted exam bio"),
                source: StorageError::Transport("connection refused".into()),
            }),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "the board could not be reloaded");
        assert_eq!(err.root_cause().to_string(), "transport error: connection refused");
    }
}

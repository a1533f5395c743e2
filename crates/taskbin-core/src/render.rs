use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::board::{Notice, NoticeLevel};
use crate::config::Config;
use crate::filter::PageWindow;
use crate::task::{DATE_FORMAT, Status, TaskRecord};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let wanted = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self {
            color: wanted && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(rows = window.rows.len(), total = window.total))]
    pub fn print_window(&self, window: &PageWindow<TaskRecord>, address: &str) -> anyhow::Result<()> {
        self.write_window(io::stdout().lock(), window, address)
    }

    pub fn write_window<W: Write>(
        &self,
        mut out: W,
        window: &PageWindow<TaskRecord>,
        address: &str,
    ) -> anyhow::Result<()> {
        let headers = [
            "No",
            "Name",
            "Description",
            "Project",
            "Date",
            "Deploy",
            "Status",
            "Note",
            "Key",
        ]
        .map(String::from)
        .to_vec();

        let rows = window
            .rows
            .iter()
            .map(|row| {
                let task = &row.item;
                vec![
                    row.number.to_string(),
                    task.name.clone(),
                    task.description.clone(),
                    display_opt(task.project.as_ref()),
                    deadline_text(task),
                    task.deploy
                        .as_ref()
                        .map(|deploy| self.paint(deploy.as_str(), "94"))
                        .unwrap_or_default(),
                    task.status
                        .as_ref()
                        .map(|status| self.status_badge(status))
                        .unwrap_or_default(),
                    task.note.clone().unwrap_or_default(),
                    self.paint(task.key.as_str(), "2"),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "{}  (page {} of {})",
            window.summary(),
            window.page_index,
            window.page_count().max(1)
        )?;
        if !address.is_empty() {
            writeln!(out, "address: ?{address}")?;
        }
        Ok(())
    }

    pub fn write_record<W: Write>(&self, mut out: W, task: &TaskRecord) -> anyhow::Result<()> {
        writeln!(out, "key          {}", task.key)?;
        writeln!(out, "name         {}", task.name)?;
        writeln!(out, "description  {}", task.description)?;
        writeln!(out, "project      {}", display_opt(task.project.as_ref()))?;
        writeln!(out, "deploy       {}", display_opt(task.deploy.as_ref()))?;
        writeln!(out, "deadline     {}", deadline_text(task))?;
        writeln!(
            out,
            "status       {}",
            task.status
                .as_ref()
                .map(|status| self.status_badge(status))
                .unwrap_or_default()
        )?;
        if let Some(note) = task.note.as_deref() {
            writeln!(out, "note         {note}")?;
        }
        Ok(())
    }

    pub fn print_record(&self, task: &TaskRecord) -> anyhow::Result<()> {
        self.write_record(io::stdout().lock(), task)
    }

    /// Notices go to stderr so piped table output stays clean.
    pub fn print_notices(&self, notices: &[Notice]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for notice in notices {
            let code = match notice.level {
                NoticeLevel::Success => "32",
                NoticeLevel::Info => "36",
                NoticeLevel::Error => "31",
            };
            writeln!(err, "{}", self.paint(&notice.message, code))?;
        }
        Ok(())
    }

    fn status_badge(&self, status: &Status) -> String {
        let code = match status {
            Status::Completed => "32",
            Status::InProgress => "34",
            Status::Pending => "33",
            Status::NotStarted => "36",
            Status::Other(_) => "31",
        };
        self.paint(&status.as_str().to_uppercase(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn display_opt<T: ToString>(value: Option<&T>) -> String {
    value.map(ToString::to_string).unwrap_or_default()
}

fn deadline_text(task: &TaskRecord) -> String {
    match task.deadline_date() {
        Some(date) => date.format(DATE_FORMAT).to_string(),
        None => task.deadline.clone().unwrap_or_default(),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            write!(writer, "{}{} ", cell, " ".repeat(width.saturating_sub(visible)))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        match (escaped, ch) {
            (true, 'm') => escaped = false,
            (true, _) => {}
            (false, '\x1b') => escaped = true,
            (false, _) => out.push(ch),
        }
    }

    out
}

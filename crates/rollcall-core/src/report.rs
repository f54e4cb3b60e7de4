//! Attendance report rendering and CSV export.
//!
//! Two views over the report endpoints: a flat list of check-ins, and a
//! person × date sheet. Both render to a [`Table`] for display and to CSV
//! text for export.

use chrono::{Duration, NaiveDate};

use crate::types::{AttendanceRecord, AttendanceReport, AttendanceSheet, Role};

pub const EMPTY_REPORT_MESSAGE: &str = "No records found. Start monitoring to mark attendance.";
pub const EMPTY_SHEET_MESSAGE: &str = "No records found.";

const PRESENT_MARK: &str = "✓";
const ABSENT_MARK: &str = "✗";
const ABSENT_CSV: &str = "Absent";

/// Report query filters. Empty optional filters are left out of the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFilter {
    pub role: Role,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub person_id: Option<String>,
}

impl ReportFilter {
    /// The last seven days through `today`.
    pub fn last_week(role: Role, today: NaiveDate) -> Self {
        Self {
            role,
            from: Some(today - Duration::days(7)),
            to: Some(today),
            person_id: None,
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("role", self.role.as_str().to_string())];
        if let Some(from) = self.from {
            pairs.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            pairs.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        if let Some(id) = self.person_id.as_deref().filter(|id| !id.trim().is_empty()) {
            pairs.push(("id", id.trim().to_string()));
        }
        pairs
    }
}

/// Which report view is active. Export follows the active view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    List,
    Sheet,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::List => ViewMode::Sheet,
            ViewMode::Sheet => ViewMode::List,
        }
    }

    /// Label of the button that switches away from this view.
    pub fn toggle_label(self) -> &'static str {
        match self {
            ViewMode::List => "Sheet View",
            ViewMode::Sheet => "List View",
        }
    }

    pub fn file_stem(self) -> &'static str {
        match self {
            ViewMode::List => "attendance_list",
            ViewMode::Sheet => "attendance_sheet",
        }
    }
}

/// Date-stamped export file name, e.g. `attendance_sheet_2026-10-16.csv`.
pub fn csv_filename(mode: ViewMode, today: NaiveDate) -> String {
    format!("{}_{}.csv", mode.file_stem(), today.format("%Y-%m-%d"))
}

/// Rendered table: header cells, body rows, and a message shown when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub empty_message: Option<&'static str>,
}

impl Table {
    /// Plain-text rendering with columns padded to their widest cell.
    pub fn render_text(&self) -> String {
        if let Some(msg) = self.empty_message {
            return format!("{msg}\n");
        }
        let cols = self.headers.len();
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate().take(cols) {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let line = |cells: &[String]| -> String {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c}{}", " ".repeat(w - c.chars().count())))
                .collect();
            padded.join("  ").trim_end().to_string()
        };

        let mut out = line(&self.headers);
        out.push('\n');
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&rule.join("  "));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&line(row));
            out.push('\n');
        }
        out
    }
}

/// Role-specific rows of the flat report.
pub fn render_report(report: &AttendanceReport) -> Table {
    let headers = ["ID", "Name", report.role.group_label(), "Date", "Check In", "Check Out"]
        .map(String::from)
        .to_vec();

    if report.data.is_empty() {
        return Table { headers, rows: Vec::new(), empty_message: Some(EMPTY_REPORT_MESSAGE) };
    }

    let rows = report
        .data
        .iter()
        .map(|r| match report.role {
            Role::Student => vec![
                r.id.clone(),
                r.name.clone(),
                format!("{} - Sem {}", opt(&r.course), opt(&r.sem)),
                r.date.clone(),
                opt(&r.check_in).to_string(),
                "-".to_string(),
            ],
            Role::Staff => vec![
                r.id.clone(),
                r.name.clone(),
                opt(&r.dep).to_string(),
                r.date.clone(),
                dash(&r.check_in),
                dash(&r.check_out),
            ],
        })
        .collect();

    Table { headers, rows, empty_message: None }
}

/// One row per person, one column per date, plus a `present/total` column.
pub fn render_sheet(sheet: &AttendanceSheet) -> Table {
    let mut headers = vec!["ID".to_string(), "Name".to_string(), sheet.role.group_label().to_string()];
    headers.extend(sheet.dates.iter().map(|d| date_header(d)));
    headers.push("Total".to_string());

    if sheet.persons.is_empty() {
        return Table { headers, rows: Vec::new(), empty_message: Some(EMPTY_SHEET_MESSAGE) };
    }

    let rows = sheet
        .persons
        .iter()
        .map(|person| {
            let mut row = vec![person.id.clone(), person.name.clone(), person.group().to_string()];
            let mut present = 0usize;
            for date in &sheet.dates {
                match sheet.check_in(&person.id, date) {
                    Some(check_in) => {
                        present += 1;
                        let hhmm: String = check_in.chars().take(5).collect();
                        row.push(format!("{PRESENT_MARK} {hhmm}"));
                    }
                    None => row.push(ABSENT_MARK.to_string()),
                }
            }
            row.push(format!("{present}/{}", sheet.dates.len()));
            row
        })
        .collect();

    Table { headers, rows, empty_message: None }
}

/// `Oct 16 Fri` for an ISO date; the raw string when it does not parse.
pub fn date_header(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d.format("%b %-d %a").to_string(),
        Err(_) => date.to_string(),
    }
}

/// CSV of the flat report. `None` when there is nothing to export.
pub fn report_to_csv(role: Role, records: &[AttendanceRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }

    let mut csv = String::new();
    match role {
        Role::Student => {
            csv.push_str("ID,Name,Course,Semester,Date,Check In\n");
            for r in records {
                push_row(
                    &mut csv,
                    &[r.id.as_str(), r.name.as_str(), opt(&r.course), opt(&r.sem), r.date.as_str(), opt(&r.check_in)],
                );
            }
        }
        Role::Staff => {
            csv.push_str("ID,Name,Department,Date,Check In,Check Out\n");
            for r in records {
                push_row(
                    &mut csv,
                    &[r.id.as_str(), r.name.as_str(), opt(&r.dep), r.date.as_str(), opt(&r.check_in), opt(&r.check_out)],
                );
            }
        }
    }
    Some(csv)
}

/// CSV of the sheet view. `None` when there are no persons.
pub fn sheet_to_csv(sheet: &AttendanceSheet) -> Option<String> {
    if sheet.persons.is_empty() {
        return None;
    }

    let mut header: Vec<&str> = vec!["ID", "Name", sheet.role.group_label()];
    header.extend(sheet.dates.iter().map(String::as_str));
    header.push("Total Present");

    let mut csv = String::new();
    push_row(&mut csv, &header);

    for person in &sheet.persons {
        let mut present = 0usize;
        let mut cells: Vec<String> = vec![person.id.clone(), person.name.clone(), person.group().to_string()];
        for date in &sheet.dates {
            match sheet.check_in(&person.id, date) {
                Some(check_in) => {
                    present += 1;
                    cells.push(check_in.to_string());
                }
                None => cells.push(ABSENT_CSV.to_string()),
            }
        }
        cells.push(present.to_string());
        let refs: Vec<&str> = cells.iter().map(String::as_str).collect();
        push_row(&mut csv, &refs);
    }
    Some(csv)
}

fn push_row(csv: &mut String, fields: &[&str]) {
    let escaped: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    csv.push_str(&escaped.join(","));
    csv.push('\n');
}

/// Quote fields that would otherwise break the row.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or_default()
}

fn dash(v: &Option<String>) -> String {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or("-").to_string()
}

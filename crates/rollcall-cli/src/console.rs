//! Interactive tabbed console over [`Shell`].

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use rollcall_client::dashboard::DashboardView;
use rollcall_client::enrollment::{EnrolledFilter, Phase};
use rollcall_client::monitoring::MonitoringState;
use rollcall_client::{EnrollmentForm, Shell, Tab};
use rollcall_core::report::ReportFilter;
use rollcall_core::Role;

use crate::App;

const HELP: &str = "\
commands:
  tab <monitoring|enrollment|reports>   switch tab and reload it
  show                                  redraw the current tab
  dashboard                             today's summary
  toggle                                start or stop monitoring
  enroll student <id> <course> <sem> <name...>
  enroll staff <id> <dep> <name...>     start an enrollment session
  complete | cancel                     finish or abandon enrollment
  filter <all|student|staff>            filter the enrolled list
  delete <id> <role>                    remove an enrolled person
  report <student|staff> [from] [to]    set the report range and load it
  view                                  switch list/sheet view
  export <dir>                          write the current view as CSV
  logout | quit";

pub fn print_dashboard(view: &DashboardView) {
    let s = &view.summary;
    println!("Monitoring:     {}", view.badge());
    println!("Students:       {}/{}", s.students_present, s.students_total);
    println!("Staff:          {}/{}", s.staff_present, s.staff_total);
    println!("Total enrolled: {}{}", s.total_enrolled, if view.cached { "  (cached)" } else { "" });
}

pub fn print_monitoring(state: &MonitoringState) {
    println!("Status:      {}", state.status_text());
    println!("Known faces: {}", state.known_faces_count);
    if let Some(since) = &state.monitoring_since {
        println!("Since:       {since}");
    }
    match &state.stream_url {
        Some(url) if state.is_monitoring => println!("Stream:      [{}] {url}", state.stream_badge()),
        _ => println!("Stream:      [{}]", state.stream_badge()),
    }
    if let Some(text) = state.overlay_text() {
        println!("             {text}");
    }
    let button = state.toggle_button();
    println!("Action:      {}{}", button.label, if button.enabled { "" } else { " (disabled)" });
}

fn render(shell: &Shell) {
    println!("== {} ==", shell.current_tab());
    match shell.current_tab() {
        Tab::Monitoring => {
            if let Some(view) = shell.dashboard.subscribe().borrow().clone() {
                print_dashboard(&view);
            }
            print_monitoring(&shell.monitoring.state());
        }
        Tab::Enrollment => {
            let state = shell.enrollment.state();
            if state.phase != Phase::Idle {
                let p = &state.progress;
                println!("Session: {:?}  {}  {}", state.phase, p.label(), p.message);
            }
            let view = shell.enrollment.enrolled();
            println!("Filter: {}", view.filter);
            print!("{}", view.table().render_text());
        }
        Tab::Reports => {
            let filter = shell.reports.filter();
            let day = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
            println!(
                "{} {}..{}  (`view` for {})",
                filter.role,
                day(filter.from),
                day(filter.to),
                shell.reports.mode().toggle_label()
            );
            match shell.reports.table() {
                Some(table) => print!("{}", table.render_text()),
                None => println!("(not loaded)"),
            }
        }
    }
}

fn enrollment_form(args: &[&str]) -> Option<EnrollmentForm> {
    let (&role, rest) = args.split_first()?;
    let role: Role = role.parse().ok()?;
    let (form, name) = match (role, rest) {
        (Role::Student, [id, course, sem, name @ ..]) => (
            EnrollmentForm {
                id: id.to_string(),
                role,
                course: Some(course.to_string()),
                sem: Some(sem.to_string()),
                ..Default::default()
            },
            name,
        ),
        (Role::Staff, [id, dep, name @ ..]) => (
            EnrollmentForm { id: id.to_string(), role, dep: Some(dep.to_string()), ..Default::default() },
            name,
        ),
        _ => return None,
    };
    Some(EnrollmentForm { name: name.join(" "), ..form })
}

fn parse_date(arg: Option<&&str>) -> Result<Option<NaiveDate>> {
    match arg {
        Some(s) => Ok(Some(s.parse()?)),
        None => Ok(None),
    }
}

/// Run one command line. `Ok(false)` ends the session.
async fn dispatch(shell: &Shell, line: &str) -> Result<bool> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&cmd, args)) = words.split_first() else {
        return Ok(true);
    };

    match (cmd, args) {
        ("help" | "?", _) => println!("{HELP}"),
        ("quit" | "exit", _) => return Ok(false),
        ("logout", _) => {
            shell.logout().await;
            return Ok(false);
        }
        ("tab", [name]) => {
            let tab: Tab = name.parse().map_err(anyhow::Error::msg)?;
            shell.switch_tab(tab).await?;
            render(shell);
        }
        ("show", _) => render(shell),
        ("dashboard", _) => print_dashboard(&shell.dashboard.load_dashboard_data().await?),
        ("toggle", _) => {
            shell.monitoring.toggle().await?;
            print_monitoring(&shell.monitoring.state());
        }
        ("enroll", rest) => {
            let Some(form) = enrollment_form(rest) else {
                bail!("usage: enroll student <id> <course> <sem> <name...> | enroll staff <id> <dep> <name...>");
            };
            let mode = shell.enrollment.start(&form).await?;
            println!("Capturing {} ({mode}); `complete` when ready, `cancel` to abandon", form.id);
        }
        ("complete", _) => {
            shell.enrollment.complete().await?;
        }
        ("cancel", _) => {
            shell.enrollment.cancel().await;
            println!("Enrollment canceled");
        }
        ("filter", [filter]) => {
            let filter: EnrolledFilter = filter.parse().map_err(anyhow::Error::msg)?;
            print!("{}", shell.enrollment.load_enrolled(filter).await?.table().render_text());
        }
        ("delete", [id, role]) => {
            let role: Role = role.parse().map_err(anyhow::Error::msg)?;
            shell.enrollment.delete_person(id, role).await?;
            print!("{}", shell.enrollment.enrolled().table().render_text());
        }
        ("report", [role, dates @ ..]) if dates.len() <= 2 => {
            let role: Role = role.parse().map_err(anyhow::Error::msg)?;
            let mut filter = ReportFilter::last_week(role, Local::now().date_naive());
            filter.from = parse_date(dates.first())?.or(filter.from);
            filter.to = parse_date(dates.get(1))?.or(filter.to);
            shell.reports.set_filter(filter);
            print!("{}", shell.reports.load_active().await?.render_text());
        }
        ("view", _) => print!("{}", shell.reports.toggle_view().await?.render_text()),
        ("export", [dir]) => {
            if let Some(path) = shell.reports.export_csv(Path::new(dir), Local::now().date_naive()).await? {
                println!("Exported {}", path.display());
            }
        }
        _ => println!("unknown command, try `help`"),
    }
    Ok(true)
}

async fn read_line() -> Result<Option<String>> {
    print!("rollcall> ");
    io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|n| (n > 0).then_some(line))
    })
    .await??;
    Ok(line)
}

pub async fn run(app: &App) -> Result<()> {
    if !app.api.verify().await {
        bail!("not logged in; run `rollcall login` first");
    }

    let shell = Shell::new(&app.config, app.api.clone(), app.dialogs.clone(), app.frame_source()?);
    shell.start_background();

    let mut progress = shell.enrollment.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            if let Phase::Capturing(_) | Phase::ReadyToComplete = state.phase {
                let p = &state.progress;
                println!("\n[enroll] {:>3.0}%  {}  {}", p.percentage(), p.label(), p.message);
            }
        }
    });

    shell.switch_tab(Tab::Monitoring).await?;
    render(&shell);
    println!("type `help` for commands");

    loop {
        let line = tokio::select! {
            line = read_line() => line?,
            _ = shell.logged_out() => {
                println!("Session ended");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };

        match dispatch(&shell, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    printer.abort();
    shell.shutdown().await;
    Ok(())
}

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_client::api::LOGIN_FAILED_MESSAGE;
use rollcall_client::dashboard::Dashboard;
use rollcall_client::enrollment::{EnrolledFilter, EnrollmentSettings, Phase};
use rollcall_client::monitoring::MonitoringSettings;
use rollcall_client::reports::ReportsController;
use rollcall_client::{
    spawn_engine, ApiClient, CameraSource, Config, Dialogs, EnrollmentController, EnrollmentForm, FrameSource,
    MonitoringController, Navigator, Route, TokenStore,
};
use rollcall_core::report::ReportFilter;
use rollcall_core::Role;
use rollcall_hw::camera::device_path;
use rollcall_hw::frame::{encode_jpeg, JPEG_QUALITY};
use rollcall_hw::Camera;
use tracing_subscriber::EnvFilter;

mod console;
mod presenter;

use presenter::TerminalPresenter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance console")]
struct Cli {
    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        username: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// End the session
    Logout,
    /// Check that the stored session is still valid
    Verify,
    /// Show the recognition process status
    Status,
    /// Show today's attendance summary
    Dashboard,
    /// Control the recognition process
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
    /// Enroll a person's face
    Enroll {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "student")]
        role: Role,
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        sem: Option<String>,
        #[arg(long)]
        dep: Option<String>,
        /// Capture with the server's camera even if a local one is configured
        #[arg(long)]
        server_camera: bool,
        /// Write the latest local frame here when capture ends
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// List or delete enrolled persons
    Enrolled {
        #[command(subcommand)]
        action: EnrolledAction,
    },
    /// Attendance reports
    Report {
        #[command(subcommand)]
        view: ReportView,
    },
    /// List local capture devices
    Cameras,
    /// Interactive tabbed console
    Console,
}

#[derive(Subcommand)]
enum MonitorAction {
    Start {
        /// Camera index or stream URL; defaults to the configured source
        #[arg(long)]
        source: Option<String>,
    },
    Stop,
    Toggle,
    /// Follow status until interrupted
    Watch,
}

#[derive(Subcommand)]
enum EnrolledAction {
    List {
        #[arg(long, default_value = "all")]
        filter: EnrolledFilter,
    },
    Delete {
        id: String,
        #[arg(long)]
        role: Role,
    },
}

#[derive(clap::Args)]
struct ReportArgs {
    #[arg(long, default_value = "student")]
    role: Role,
    /// Defaults to seven days ago
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Defaults to today
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    id: Option<String>,
    /// Also write the report as CSV into this directory
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ReportView {
    /// Flat list of check-ins
    List(ReportArgs),
    /// Person by date attendance sheet
    Sheet(ReportArgs),
}

pub struct App {
    pub config: Config,
    pub api: ApiClient,
    pub dialogs: Dialogs,
}

impl App {
    fn build(assume_yes: bool) -> Result<Self> {
        let config = Config::load().context("loading configuration")?;
        tracing::debug!(api = %config.api_base_url, data_dir = %config.data_dir.display(), "configuration loaded");

        let tokens = TokenStore::open(config.session_file());
        let initial = if tokens.get().is_some() { Route::Dashboard } else { Route::Login };
        let api = ApiClient::new(
            &config.api_base_url,
            Arc::new(tokens),
            Navigator::new(initial),
            config.request_timeout(),
        )?;
        let dialogs = Dialogs::spawn(TerminalPresenter { assume_yes }).context("starting dialog thread")?;
        Ok(Self { config, api, dialogs })
    }

    /// The local enrollment camera, unless disabled or not configured.
    pub fn frame_source(&self) -> Result<Option<Arc<dyn FrameSource>>> {
        let Some(device) = self.config.local_camera.as_deref() else {
            return Ok(None);
        };
        let engine = spawn_engine(self.config.model_paths(), device_path(device))?;
        Ok(Some(Arc::new(engine)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::build(cli.yes)?;

    match cli.command {
        Commands::Login { username, password } => login(&app, &username, password).await?,
        Commands::Logout => {
            app.api.logout().await;
            println!("Logged out");
        }
        Commands::Verify => {
            if app.api.verify().await {
                println!("Session valid");
            } else {
                bail!("not logged in");
            }
        }
        Commands::Status => {
            let status = app.api.status().await?;
            println!("Status:      {}", if status.is_running { "Running" } else { "Stopped" });
            if status.is_busy {
                println!("             (initializing)");
            }
            println!("Known faces: {}", status.known_faces_count);
            if let Some(since) = status.monitoring_since {
                println!("Since:       {since}");
            }
        }
        Commands::Dashboard => {
            let dashboard = Dashboard::new(app.api.clone(), app.config.cache_ttl());
            console::print_dashboard(&dashboard.load_dashboard_data().await?);
        }
        Commands::Monitor { action } => monitor(&app, action).await?,
        Commands::Enroll { id, name, role, course, sem, dep, server_camera, preview } => {
            let form = EnrollmentForm { id, name, role, course, sem, dep };
            enroll(&app, form, server_camera, preview).await?;
        }
        Commands::Enrolled { action } => {
            let ctl = EnrollmentController::new(
                app.api.clone(),
                app.dialogs.clone(),
                None,
                EnrollmentSettings::from_config(&app.config),
            );
            match action {
                EnrolledAction::List { filter } => {
                    print!("{}", ctl.load_enrolled(filter).await?.table().render_text());
                }
                EnrolledAction::Delete { id, role } => {
                    ctl.load_enrolled(EnrolledFilter::All).await?;
                    if !ctl.delete_person(&id, role).await? {
                        println!("Not deleted");
                    }
                }
            }
        }
        Commands::Report { view } => report(&app, view).await?,
        Commands::Cameras => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Console => console::run(&app).await?,
    }

    Ok(())
}

async fn login(app: &App, username: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            eprint!("Password: ");
            io::stderr().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    match app.api.login(username, &password).await {
        Ok(()) => {
            println!("Logged in as {username}");
            Ok(())
        }
        Err(e) => bail!(e.user_message(LOGIN_FAILED_MESSAGE)),
    }
}

async fn monitor(app: &App, action: MonitorAction) -> Result<()> {
    let mut settings = MonitoringSettings::from_config(&app.config);
    if let MonitorAction::Start { source: Some(source) } = &action {
        settings.camera_source = CameraSource::parse(source);
    }
    let dashboard = Arc::new(Dashboard::new(app.api.clone(), app.config.cache_ttl()));
    let ctl = Arc::new(MonitoringController::new(app.api.clone(), dashboard, app.dialogs.clone(), settings));
    ctl.refresh_status().await?;

    let running = ctl.state().is_monitoring;
    match action {
        MonitorAction::Start { .. } if running => println!("Already running"),
        MonitorAction::Stop if !running => println!("Already stopped"),
        MonitorAction::Start { .. } | MonitorAction::Stop | MonitorAction::Toggle => {
            ctl.toggle().await?;
            console::print_monitoring(&ctl.state());
        }
        MonitorAction::Watch => {
            let poll = ctl.spawn_status_poll(std::time::Duration::from_secs(app.config.status_poll_secs));
            let mut rx = ctl.subscribe();
            console::print_monitoring(&rx.borrow_and_update());
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        console::print_monitoring(&rx.borrow_and_update());
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poll.stop().await;
        }
    }
    Ok(())
}

async fn enroll(app: &App, form: EnrollmentForm, server_camera: bool, preview: Option<PathBuf>) -> Result<()> {
    let frames = if server_camera { None } else { app.frame_source()? };
    let ctl = EnrollmentController::new(
        app.api.clone(),
        app.dialogs.clone(),
        frames,
        EnrollmentSettings::from_config(&app.config),
    );

    let mode = ctl.start(&form).await?;
    println!("Capturing {} ({mode})", form.id);

    let mut rx = ctl.subscribe();
    loop {
        let state = rx.borrow_and_update().clone();
        let p = &state.progress;
        println!("{:>3.0}%  {}  {}", p.percentage(), p.label(), p.message);
        if state.can_complete() {
            break;
        }
        if state.phase == Phase::Idle {
            bail!("enrollment ended before capture finished");
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    bail!("enrollment state closed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                ctl.cancel().await;
                println!("Enrollment canceled");
                return Ok(());
            }
        }
    }

    if let Some(path) = preview {
        let frame = ctl.subscribe_preview().borrow().clone();
        if let Some(frame) = frame {
            std::fs::write(&path, encode_jpeg(&frame.image, JPEG_QUALITY)?)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    ctl.complete().await?;
    Ok(())
}

async fn report(app: &App, view: ReportView) -> Result<()> {
    let (sheet, args) = match view {
        ReportView::List(args) => (false, args),
        ReportView::Sheet(args) => (true, args),
    };
    let today = Local::now().date_naive();
    let mut filter = ReportFilter::last_week(args.role, today);
    filter.from = args.from.or(filter.from);
    filter.to = args.to.or(filter.to);
    filter.person_id = args.id;

    let reports = ReportsController::new(app.api.clone(), app.dialogs.clone(), filter);
    let table = if sheet { reports.toggle_view().await? } else { reports.load_report().await? };
    print!("{}", table.render_text());

    if let Some(dir) = args.export {
        if let Some(path) = reports.export_csv(&dir, today).await? {
            println!("Exported {}", path.display());
        }
    }
    Ok(())
}

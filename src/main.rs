use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use backoffice_harness::config::{
    ENV_ARTIFACT_DIR, ENV_BASE_URL, ENV_EMAIL, ENV_PASSWORD, TimingSettings, parse_breakpoints,
    preset_breakpoints,
};
use backoffice_harness::driver::{
    ControlEffect, MockControl, MockPage, MockSite, MockView, ScreenshotMode,
};
use backoffice_harness::health::StaticProbe;
use backoffice_harness::runner::{RunOutcome, run_load, run_suite, run_suites, run_with_page};
use backoffice_harness::workspace::{RunWorkspace, cleanup_old_runs, list_runs};
use backoffice_harness::{Config, Credentials, logging};

/// Backoffice harness - adaptive browser validation for admin backoffices
#[derive(Parser, Debug)]
#[command(
    name = "backoffice-harness",
    about = "Validate a role-gated admin backoffice in a real browser",
    after_help = "ENVIRONMENT VARIABLES:\n\
        BACKOFFICE_HARNESS_BASE_URL      Target base URL\n\
        BACKOFFICE_HARNESS_EMAIL         Login email\n\
        BACKOFFICE_HARNESS_PASSWORD      Login password\n\
        BACKOFFICE_HARNESS_BREAKPOINTS   Breakpoint list (presets or WxH)\n\
        BACKOFFICE_HARNESS_FAIL_FAST     Stop after the first critical failure\n\
        BACKOFFICE_HARNESS_ARTIFACT_DIR  Base directory for run artifacts\n\
        RUST_LOG                         Log filter"
)]
struct Args {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, env = ENV_BASE_URL)]
    base_url: Option<String>,

    #[arg(long, env = ENV_EMAIL)]
    email: Option<String>,

    #[arg(long, env = ENV_PASSWORD, hide_env_values = true)]
    password: Option<String>,

    /// Comma separated presets or WxH, e.g. mobile,1024x768
    #[arg(short, long)]
    breakpoints: Option<String>,

    /// Artifact base directory
    #[arg(short, long, env = ENV_ARTIFACT_DIR)]
    output: Option<PathBuf>,

    /// Keep running after a critical failure
    #[arg(long)]
    no_fail_fast: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Try an existing browser session before logging in
    #[arg(long)]
    reuse_session: bool,
}

impl TargetArgs {
    fn resolve(&self) -> Result<Config, Box<dyn Error>> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(url) = &self.base_url {
            config.target.base_url = url.clone();
        }
        if let Some(email) = &self.email {
            config.target.credentials.email = email.clone();
        }
        if let Some(password) = &self.password {
            config.target.credentials.password = password.clone();
        }
        if let Some(list) = &self.breakpoints {
            config.breakpoints = parse_breakpoints(list)?;
        }
        if let Some(dir) = &self.output {
            config.artifacts.base_dir = dir.clone();
        }
        if self.no_fail_fast {
            config.policy.fail_fast = false;
        }
        if self.headed {
            config.policy.headless = false;
        }
        if self.reuse_session {
            config.policy.reuse_session = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DemoScenario {
    /// Every phase passes
    Healthy,
    /// The environment probe fails and everything else is skipped
    Unreachable,
    /// Screenshots come out empty
    BrokenScreenshots,
    /// Every sampled control is inert
    InertButtons,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run all phases against a live target
    Run {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run several configuration files one after another
    Suite {
        /// TOML configuration files, one suite each
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },

    /// Run concurrent independent sessions against one target
    Load {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of concurrent sessions
        #[arg(short = 'n', long, default_value = "2")]
        sessions: usize,
    },

    /// Run the full pipeline against the built-in scripted backoffice
    Demo {
        #[arg(short, long, default_value = "./test-results")]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "healthy")]
        scenario: DemoScenario,

        /// Keep running after a critical failure
        #[arg(long)]
        no_fail_fast: bool,
    },

    /// List breakpoint presets
    Breakpoints,

    /// Delete old run directories
    Clean {
        #[arg(short, long, default_value = "./test-results")]
        output: PathBuf,

        /// Remove runs older than this many hours
        #[arg(long, default_value = "24")]
        max_age_hours: u64,

        /// List runs without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_outcome(outcome: &RunOutcome) {
    let s = &outcome.summary;
    println!("Run {}: {}", outcome.report.run_id, outcome.state);
    println!(
        "  passed {} / failed {} / errors {} / skipped {} (total {}), critical failures {}",
        s.passed, s.failed, s.errors, s.skipped, s.total, s.critical_failures
    );
    if let Some(reason) = &outcome.report.stop_reason {
        println!("  stopped: {}", reason);
    }
    println!("  report:  {}", outcome.reports.html.display());
    println!("  summary: {}", outcome.reports.summary.display());
}

fn exit_code(success: bool) -> ExitCode {
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn demo_site(config: &Config, scenario: DemoScenario) -> MockSite {
    let site = MockSite::backoffice(&config.target.base_url, config.target.credentials.clone());
    match scenario {
        DemoScenario::BrokenScreenshots => site.with_screenshot_mode(ScreenshotMode::Empty),
        DemoScenario::InertButtons => site.with_view(
            MockView::new("/admin", "Dashboard")
                .compile_ticks(2)
                .with_nav_links(&["/admin/users", "/admin/orders"])
                .with_controls(vec![
                    MockControl::new("Refresh", ControlEffect::Inert),
                    MockControl::new("Export", ControlEffect::Inert),
                ]),
        ),
        _ => site,
    }
}

async fn run_demo(
    output: PathBuf,
    scenario: DemoScenario,
    no_fail_fast: bool,
) -> Result<ExitCode, Box<dyn Error>> {
    let mut config = Config::defaults();
    config.target.base_url = "http://backoffice.demo".to_string();
    config.target.credentials = Credentials {
        email: "admin@example.com".to_string(),
        password: "demo-password".to_string(),
    };
    config.artifacts.base_dir = output;
    config.timing = TimingSettings::fast();
    config.policy.fail_fast = !no_fail_fast;

    let page = Arc::new(MockPage::new(demo_site(&config, scenario)));
    let probe = Arc::new(StaticProbe(!matches!(scenario, DemoScenario::Unreachable)));
    let workspace = RunWorkspace::new(&config.artifacts.base_dir, "demo");
    let outcome = run_with_page(&config, page, probe, workspace).await?;
    print_outcome(&outcome);
    Ok(exit_code(outcome.success))
}

async fn dispatch(command: Commands) -> Result<ExitCode, Box<dyn Error>> {
    match command {
        Commands::Run { target } => {
            let config = target.resolve()?;
            let outcome = run_suite(&config).await?;
            print_outcome(&outcome);
            Ok(exit_code(outcome.success))
        }

        Commands::Suite { configs } => {
            let mut suites = Vec::with_capacity(configs.len());
            for path in &configs {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "suite".to_string());
                suites.push((name, Config::load(Some(path))?));
            }
            let outcome = run_suites(suites).await;
            for entry in &outcome.entries {
                match &entry.outcome {
                    Ok(run) => {
                        println!("[{}]", entry.name);
                        print_outcome(run);
                    }
                    Err(e) => println!("[{}] could not run: {}", entry.name, e),
                }
            }
            if !outcome.all_passed() {
                eprintln!("Failed suites: {}", outcome.failed_names().join(", "));
            }
            Ok(exit_code(outcome.all_passed()))
        }

        Commands::Load { target, sessions } => {
            let config = target.resolve()?;
            let outcome = run_load(&config, sessions).await?;
            for session in &outcome.sessions {
                match (&session.state, &session.error) {
                    (Some(state), _) => println!(
                        "  session {}: {} (success: {})",
                        session.index, state, session.success
                    ),
                    (None, Some(e)) => {
                        println!("  session {}: failed to run: {}", session.index, e)
                    }
                    (None, None) => println!("  session {}: no result", session.index),
                }
            }
            println!(
                "{}/{} sessions passed, results in {}",
                outcome.passed(),
                outcome.sessions.len(),
                outcome.run_dir.display()
            );
            Ok(exit_code(outcome.all_passed()))
        }

        Commands::Demo {
            output,
            scenario,
            no_fail_fast,
        } => run_demo(output, scenario, no_fail_fast).await,

        Commands::Breakpoints => {
            println!("Breakpoint presets:");
            for bp in preset_breakpoints() {
                println!(
                    "  {:<8} {:>4}x{:<4} {:?}  {}",
                    bp.name,
                    bp.width,
                    bp.height,
                    bp.class(),
                    bp.description
                );
            }
            println!("\nCustom sizes: WxH (e.g., 1024x768)");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Clean { output, max_age_hours, dry_run } => {
            if dry_run {
                for run in list_runs(&output)? {
                    println!("{}", run.display());
                }
                return Ok(ExitCode::SUCCESS);
            }
            let removed = cleanup_old_runs(&output, Duration::from_secs(max_age_hours * 3600))?;
            println!("Removed {} run(s) from {}", removed, output.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    logging::init(args.verbose);

    match dispatch(args.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

pub mod process;
pub mod show;

use std::{
    env,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use process::{kill_previous_servers, restart_server};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::start_daemon,
    settings::Settings,
    usage::log::UsageLog,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Timescape", version, long_about = None)]
#[command(about = "Journal of application switches and power events", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into the per-user application data directory"
        )]
        dir: Option<PathBuf>,
    },
    #[command(
        about = "Run a daemon directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into the per-user application data directory"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Print the path of the usage log file")]
    Path {},
    #[command(about = "Print logged entries")]
    Show {
        #[arg(short = 'n', long, help = "Only show the last N entries")]
        last: Option<usize>,
        #[arg(long, help = "Keep printing entries as they are appended")]
        follow: bool,
    },
    #[command(about = "Archive the current usage log and start a new one")]
    Clear {
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
    },
    #[command(about = "Control whether the daemon starts at login")]
    Autostart {
        #[command(subcommand)]
        command: AutostartCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AutostartCommand {
    #[command(about = "Record that the daemon should start at login")]
    On,
    #[command(about = "Record that the daemon should not start at login")]
    Off,
    #[command(about = "Print the stored preference")]
    Status,
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = create_application_default_path()?;
    if args.log {
        enable_logging(CLI_PREFIX, &dir, Some(LevelFilter::TRACE), true)?;
    }

    match args.commands {
        Commands::Init { dir: daemon_dir } => {
            restart_server(daemon_dir.as_deref())?;
            Ok(())
        }
        Commands::Stop {} => {
            let process_name = env::current_exe().expect("Can't operate without an executable");
            kill_previous_servers(&process_name);
            Ok(())
        }
        Commands::Serve { dir: daemon_dir } => {
            start_daemon(daemon_dir.unwrap_or(dir)).await?;
            Ok(())
        }
        Commands::Path {} => {
            println!("{}", UsageLog::new(&dir).path().display());
            Ok(())
        }
        Commands::Show { last, follow } => show::process_show_command(&dir, last, follow).await,
        Commands::Clear { yes } => {
            if !yes && !confirm("Archive the current usage log and start a new one?")? {
                println!("Aborted");
                return Ok(());
            }
            let log = UsageLog::new(&dir);
            // A failed clear is a deliberate user action, so the error goes
            // back to the caller instead of the diagnostic log.
            match log.rotate().context("Failed to clear the usage log")? {
                Some(backup) => println!("Archived usage log to {}", backup.display()),
                None => println!("No usage log yet, started a fresh one"),
            }
            Ok(())
        }
        Commands::Autostart { command } => {
            let mut settings = Settings::load(&dir)?;
            match command {
                AutostartCommand::On => {
                    settings.launch_at_login = true;
                    settings.store(&dir)?;
                }
                AutostartCommand::Off => {
                    settings.launch_at_login = false;
                    settings.store(&dir)?;
                }
                AutostartCommand::Status => {}
            }
            println!(
                "Launch at login: {}",
                if settings.launch_at_login { "on" } else { "off" }
            );
            Ok(())
        }
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

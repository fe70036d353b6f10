use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use ssh_tint::config::Config;
use ssh_tint::destination;
use ssh_tint::logging;
use ssh_tint::resolver::Source;
use ssh_tint::session::{Launch, Session};
use ssh_tint::supervisor::LOCAL_FAILURE_EXIT;
use ssh_tint::terminal::{self, TerminalController};

#[derive(Parser)]
#[command(
    name = "ssh-tint",
    about = "ssh, with the pane painted per host.",
    long_about = "Runs ssh with your arguments and tints the Ghostty pane background\n\
                  according to the host you connect to. The original colour comes\n\
                  back when the session ends, however it ends.\n\n\
                  Everything that is not an ssh-tint option goes to ssh verbatim.\n\
                  -h/--help and -V/--version in front of the ssh arguments are\n\
                  answered by ssh-tint itself; `ssh-tint -- -V` asks ssh instead.\n\
                  Use `--` as well if the host is called like a subcommand.",
    version,
    subcommand_negates_reqs = true
)]
struct Cli {
    /// Path to the config file (default: ~/.config/ssh-tint/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Run ssh without touching the pane colour
    #[arg(long)]
    no_color: bool,

    /// Arguments for ssh, destination included
    #[arg(
        value_name = "SSH_ARGS",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    ssh_args: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which colour a host would get, without connecting
    Resolve {
        /// Host name or ssh destination (user@host, ssh://host:port)
        host: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset the pane background (after a session was killed hard)
    Reset,
    /// Generate shell completions
    Completions {
        #[arg(value_name = "SHELL")]
        shell: Shell,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match Config::default_path() {
            Some(path) => path,
            None => return Ok(Config::default()),
        },
    };
    let config = Config::load(&path).with_context(|| format!("Config {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        rules = config.rules.rules.len(),
        "loaded config"
    );
    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    logging::init(&logging::log_path());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");

    match run(cli) {
        Ok(code) => {
            tracing::info!(code, "done");
            std::process::exit(code);
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("ssh-tint: {:#}", e);
            std::process::exit(LOCAL_FAILURE_EXIT);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ssh-tint", &mut std::io::stdout());
            Ok(0)
        }
        Some(Commands::Reset) => {
            let config = load_config(cli.config.as_deref())?;
            let mut controller = TerminalController::new(terminal::open_device(), config.query_timeout);
            controller
                .reset_pane()
                .context("Failed to reset the pane background")?;
            Ok(0)
        }
        Some(Commands::Resolve { host, json }) => {
            let config = load_config(cli.config.as_deref())?;
            handle_resolve(&config, &host, json)?;
            Ok(0)
        }
        None => {
            let config = load_config(cli.config.as_deref())?;
            handle_connect(&config, cli.ssh_args, cli.no_color)
        }
    }
}

fn handle_connect(config: &Config, ssh_args: Vec<String>, no_color: bool) -> Result<i32> {
    let host = destination::destination(&ssh_args);
    let target = match (&host, no_color) {
        (Some(host), false) => config.resolve(host),
        _ => None,
    };
    tracing::info!(host = ?host, color = ?target.as_ref().map(|r| r.color.to_string()), "connecting");

    let controller = TerminalController::new(terminal::open_device(), config.query_timeout);
    let session = Session::new(controller, target.map(|r| r.color));
    let launch = Launch {
        program: config.ssh.clone(),
        args: ssh_args,
    };
    let report = session.run(&launch)?;
    Ok(report.exit_code())
}

fn handle_resolve(config: &Config, host: &str, json: bool) -> Result<()> {
    let host = destination::host_of(host);
    let resolution = config.resolve(&host);

    if json {
        let value = serde_json::json!({
            "host": host,
            "color": resolution.as_ref().map(|r| r.color.to_string()),
            "source": resolution.as_ref().map(|r| &r.source),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match resolution {
        Some(resolution) => {
            let source = match &resolution.source {
                Source::Rule { index, pattern } => format!("rule {} ({})", index, pattern),
                Source::SshConfig => "ssh config".to_string(),
                Source::Default => "default".to_string(),
            };
            println!("{:<20} {}  via {}", host, resolution.color, source);
        }
        None => println!("{:<20} no colour change", host),
    }
    Ok(())
}

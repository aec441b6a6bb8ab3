use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

/// Daemon options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Serve on the session bus instead of the system bus
    pub session_bus: bool,
    /// Number of `-v` flags
    pub verbose: u8,
}

/// CLI command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Options),
    Completions { shell: Shell },
}

/// Bus daemon for backlight, gamma, DPMS, and light sensors
#[derive(Parser, Debug)]
#[command(name = "clightd")]
#[command(version, about = "Bus daemon for backlight, gamma, DPMS, and light sensors", long_about = None)]
struct Cli {
    /// Serve on the session bus (for development)
    #[arg(long)]
    session: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a shell completion script
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Parse command-line arguments and return the Command
pub fn parse() -> Command {
    command_from_cli(Cli::parse())
}

fn command_from_cli(cli: Cli) -> Command {
    match cli.command {
        Some(Commands::Completions { shell }) => Command::Completions { shell },
        None => Command::Run(Options {
            session_bus: cli.session,
            verbose: cli.verbose,
        }),
    }
}

/// Write the completion script for `shell` to stdout
pub fn print_completions(shell: Shell) {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "clightd", &mut std::io::stdout());
}

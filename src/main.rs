//! conformance-images CLI - manage the images of the Kubernetes e2e conformance plugin

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use conformance_images::commands::images::{self, Credentials, ImageSelection, Runner};
use conformance_images::config::settings::Settings;
use conformance_images::engine::{ContainerRuntime, DryRunEngine, ImageEngine};
use conformance_images::utils::errors::{CliError, enhance_error};
use conformance_images::utils::{Cancellation, logger, prereqs};
use conformance_images::{commands, log_info};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "conformance-images")]
#[command(author, version, about = "Manage the container images of the Kubernetes e2e conformance plugin", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Dry-run mode: show what would be done without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every image command
#[derive(Args, Clone)]
struct ImageArgs {
    /// Path to kubeconfig file, used when the version is `auto`
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Plugin whose images to manage (only e2e is supported)
    #[arg(short, long)]
    plugin: Option<String>,

    /// Kubernetes version (e.g. v1.18.0), or `auto` to ask the cluster
    #[arg(long)]
    kubernetes_version: Option<String>,

    /// YAML file mapping image or registry names to private registries
    #[arg(long = "e2e-repo-config")]
    e2e_repo_config: Option<PathBuf>,
}

impl ImageArgs {
    fn selection(self, settings: &Settings) -> ImageSelection {
        ImageSelection::with_defaults(
            self.kubeconfig,
            self.plugin,
            self.kubernetes_version,
            self.e2e_repo_config,
            settings,
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the images the plugin needs
    List {
        #[command(flatten)]
        images: ImageArgs,
    },

    /// Pull the upstream images
    Pull {
        #[command(flatten)]
        images: ImageArgs,
    },

    /// Save the upstream images into a tar archive
    Download {
        #[command(flatten)]
        images: ImageArgs,

        /// Archive path (default: kubernetes_e2e_images_<version>.tar)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Tag the upstream images for a private registry and push them
    Push {
        #[command(flatten)]
        images: ImageArgs,

        /// Registry username
        #[arg(short, long)]
        username: Option<String>,

        /// Registry password (prompted for when a username is given without it)
        #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true, hide = true)]
        password: Option<String>,
    },

    /// Remove the images from the local engine
    Delete {
        #[command(flatten)]
        images: ImageArgs,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Check prerequisites
    Check,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective settings
    Show,

    /// Write an example config file
    Init {
        /// Destination (default: the per-user config location)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    if let Err(err) = run(cli) {
        enhance_error(err).display();
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;

    if cli.dry_run {
        log_info!("🔍 DRY RUN MODE: No changes will be made");
    }

    match cli.command {
        Commands::List { images: args } => images::list(&args.selection(&settings)),
        Commands::Pull { images: args } => {
            let selection = args.selection(&settings);
            with_runner(&settings, cli.dry_run, |runner| images::pull(&selection, runner))
        }
        Commands::Download {
            images: args,
            output,
        } => {
            let selection = args.selection(&settings);
            with_runner(&settings, cli.dry_run, |runner| {
                images::download(&selection, output, runner)
            })
        }
        Commands::Push {
            images: args,
            username,
            password,
        } => {
            let selection = args.selection(&settings);
            let credentials = Credentials { username, password };
            with_runner(&settings, cli.dry_run, |runner| {
                images::push(&selection, credentials, runner)
            })
        }
        Commands::Delete { images: args, yes } => {
            let selection = args.selection(&settings);
            with_runner(&settings, cli.dry_run, |runner| {
                images::delete(&selection, yes, runner)
            })
        }
        Commands::Check => commands::check::check(settings.engine.runtime.as_deref()),
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config::show(&settings),
            ConfigCommands::Init { path, force } => commands::config::init(path, force),
        },
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
    }
}

/// Build the engine and cancellation token, then run `f`
fn with_runner<F>(settings: &Settings, dry_run: bool, f: F) -> Result<()>
where
    F: FnOnce(&Runner) -> Result<()>,
{
    let engine: Box<dyn ImageEngine> = if dry_run {
        Box::new(DryRunEngine::new())
    } else {
        if !prereqs::check_container_engines().any_found() {
            return Err(CliError::engine_not_found().into());
        }
        Box::new(ContainerRuntime::detect_with(
            settings.engine.runtime.as_deref(),
        )?)
    };

    let cancel = Cancellation::new();
    cancel.install_ctrlc_handler()?;

    let runner = Runner {
        engine: engine.as_ref(),
        cancel,
        settings,
        dry_run,
    };
    f(&runner)
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "conformance-images", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("conformance-images {}", env!("CARGO_PKG_VERSION"));
    println!("Kubernetes e2e conformance image manager");
    Ok(())
}

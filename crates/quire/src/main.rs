//! Quire CLI - multi-entry static site builder.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quire_pipeline::{Pipeline, Project, PROJECT_FILE};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Build every section of a site as its own page, or serve them with live reload")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Build mode: development (serve from memory) or production (write to disk)
    #[arg(short, long, env = "QUIRE_MODE")]
    mode: Option<String>,

    /// Path to the project file
    #[arg(short, long, default_value = PROJECT_FILE)]
    config: PathBuf,

    /// Override the dev server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not open a browser when a server starts
    #[arg(long, global = true)]
    no_open: bool,

    /// Print the production build report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a project with one section
    Init {
        /// Name of the first section
        #[arg(short, long, default_value = "Home")]
        section: String,

        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },

    /// Preview a production build
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "4000")]
        port: u16,

        /// Directory to serve (defaults to the project's output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Some(Commands::Init { section, yes }) => commands::init::run(&cli.config, &section, yes)?,
        Some(Commands::Serve { port, dir }) => {
            // An explicit directory can be previewed without a project file.
            let (dir, project) = match dir {
                Some(dir) if !cli.config.exists() => (dir, None),
                dir => {
                    let project = Project::load(&cli.config)?;
                    (dir.unwrap_or_else(|| project.paths.output.clone()), Some(project))
                }
            };
            let default_section = project
                .as_ref()
                .and_then(|p| p.registry.default_section())
                .map(|s| s.as_str());
            let open = !cli.no_open && project.as_ref().map_or(true, |p| p.dev.open);

            commands::serve::run(commands::serve::Preview {
                dir: &dir,
                port,
                default_section,
                open,
            })
            .await?;
        }
        None => {
            let mut project = Project::load(&cli.config)?;
            if let Some(port) = cli.port {
                project.dev.port = port;
            }
            if cli.no_open {
                project.dev.open = false;
            }

            match Pipeline::select(cli.mode.as_deref(), &project)? {
                Pipeline::Development(pipeline) => commands::dev::run(pipeline).await?,
                Pipeline::Production(pipeline) => commands::build::run(pipeline, cli.json).await?,
            }
        }
    }

    Ok(())
}

//! Keel CLI - release lifecycle manager for templated Kubernetes packages

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod config;
mod display;
mod error;
mod exit_codes;

use app::App;
use commands::{PackArgs, ValuesArgs};
use config::{ConfigArgs, KeelConfig};

#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(about = "Release lifecycle manager for templated Kubernetes packages", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render revision 1 and show its hooks without deploying
    PreInstall {
        /// Release name
        name: String,

        #[command(flatten)]
        pack: PackArgs,

        #[command(flatten)]
        values: ValuesArgs,

        /// Print the rendered manifest
        #[arg(long)]
        show_manifest: bool,
    },

    /// Deploy a new release
    Install {
        /// Release name
        name: String,

        #[command(flatten)]
        pack: PackArgs,

        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Render the next revision and show its hooks without deploying
    PreUpgrade {
        /// Release name
        name: String,

        #[command(flatten)]
        pack: PackArgs,

        #[command(flatten)]
        values: ValuesArgs,

        /// Print the rendered manifest
        #[arg(long)]
        show_manifest: bool,
    },

    /// Deploy a new revision of an existing release
    Upgrade {
        /// Release name
        name: String,

        #[command(flatten)]
        pack: PackArgs,

        #[command(flatten)]
        values: ValuesArgs,
    },

    /// Redeploy the content of an earlier revision as a new revision
    Rollback {
        /// Release name
        name: String,

        /// Revision to restore
        revision: u32,
    },

    /// Delete a release and its cluster objects
    Delete {
        /// Release name
        name: String,

        /// Forget the release but leave its objects in the cluster
        #[arg(long)]
        keep_resources: bool,
    },

    /// Restore the workloads of a stopped release
    Start {
        /// Release name
        name: String,
    },

    /// Scale the workloads of a release to zero
    Stop {
        /// Release name
        name: String,
    },

    /// Show the current revision of a release
    Status {
        /// Release name
        name: String,

        /// Show the stored value overlay
        #[arg(long)]
        show_values: bool,

        /// Show the stored manifest
        #[arg(long)]
        show_manifest: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every revision of a release
    History {
        /// Release name
        name: String,

        /// Only the newest N revisions
        #[arg(long)]
        max: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List releases
    List {
        /// List releases of every namespace
        #[arg(short = 'A', long)]
        all_namespaces: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a pack locally
    Template {
        /// Release name (for template context)
        name: String,

        #[command(flatten)]
        pack: PackArgs,

        #[command(flatten)]
        values: ValuesArgs,

        /// Output directory (if not set, outputs to stdout)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Include hook documents
        #[arg(long)]
        show_hooks: bool,
    },
}

impl Commands {
    /// Whether the command needs a cluster behind the reconciler
    fn needs_cluster(&self) -> bool {
        !matches!(
            self,
            Commands::History { .. } | Commands::List { .. } | Commands::Template { .. }
        )
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("KEEL_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time(),
        )
        .init();
}

async fn run(cli: Cli) -> error::Result<()> {
    let config = KeelConfig::resolve(&cli.config)?;

    if let Commands::Template {
        name,
        pack,
        values,
        output_dir,
        show_hooks,
    } = &cli.command
    {
        return commands::template::run(
            &config,
            name,
            pack,
            values,
            output_dir.as_deref(),
            *show_hooks,
        )
        .await;
    }

    let app = App::connect(config, cli.command.needs_cluster()).await?;

    match cli.command {
        Commands::PreInstall {
            name,
            pack,
            values,
            show_manifest,
        } => commands::install::plan(&app, &name, &pack, &values, show_manifest).await,

        Commands::Install { name, pack, values } => {
            commands::install::run(&app, &name, &pack, &values).await
        }

        Commands::PreUpgrade {
            name,
            pack,
            values,
            show_manifest,
        } => commands::upgrade::plan(&app, &name, &pack, &values, show_manifest).await,

        Commands::Upgrade { name, pack, values } => {
            commands::upgrade::run(&app, &name, &pack, &values).await
        }

        Commands::Rollback { name, revision } => {
            commands::rollback::run(&app, &name, revision).await
        }

        Commands::Delete {
            name,
            keep_resources,
        } => commands::delete::run(&app, &name, keep_resources).await,

        Commands::Start { name } => commands::start::start(&app, &name).await,

        Commands::Stop { name } => commands::start::stop(&app, &name).await,

        Commands::Status {
            name,
            show_values,
            show_manifest,
            json,
        } => commands::status::run(&app, &name, show_values, show_manifest, json).await,

        Commands::History { name, max, json } => {
            commands::history::run(&app, &name, max, json).await
        }

        Commands::List {
            all_namespaces,
            json,
        } => commands::list::run(&app, all_namespaces, json).await,

        Commands::Template { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from([
            "keel",
            "install",
            "web",
            "app1",
            "--repo",
            "https://packs.example.com",
            "--pack-version",
            "^1.2",
            "-f",
            "prod.yaml",
            "--set",
            "replica=3",
            "-n",
            "prod",
        ])
        .unwrap();

        assert_eq!(cli.config.namespace.as_deref(), Some("prod"));
        match cli.command {
            Commands::Install { name, pack, values } => {
                assert_eq!(name, "web");
                assert_eq!(pack.to_ref(), keel_release::PackageRef::new("https://packs.example.com", "app1", "^1.2"));
                assert_eq!(values.files, vec![PathBuf::from("prod.yaml")]);
                assert_eq!(values.set, vec!["replica=3".to_string()]);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_pack_version_does_not_shadow_version_flag() {
        let cli = Cli::try_parse_from(["keel", "template", "web", "app1", "--pack-version", "1.0.0"])
            .unwrap();
        match cli.command {
            Commands::Template { pack, .. } => assert_eq!(pack.pack_version, "1.0.0"),
            _ => panic!("expected template"),
        }

        let err = Cli::try_parse_from(["keel", "install", "--version"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_store_only_commands_skip_the_cluster() {
        let cli = Cli::try_parse_from(["keel", "history", "web", "--max", "3"]).unwrap();
        assert!(!cli.command.needs_cluster());

        let cli = Cli::try_parse_from(["keel", "stop", "web"]).unwrap();
        assert!(cli.command.needs_cluster());

        let cli = Cli::try_parse_from(["keel", "rollback", "web", "2", "--timeout", "30s"]).unwrap();
        assert_eq!(cli.config.timeout, Some(std::time::Duration::from_secs(30)));
    }
}

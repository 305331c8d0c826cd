use anyhow::Result;
use clap::Parser;
use qpkg::install::{InstallConfig, PackageManager};
use std::path::PathBuf;

/// qpkg - mod package installer
///
/// Install `.qmod` bundles and their dependencies, keeping the shared
/// installation ledger in sync.
///
/// Examples:
///   qpkg install ./SomeMod.qmod     # Install a bundle from local storage
#[derive(Parser, Debug)]
#[command(author, version = env!("QPKG_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data root directory (overrides defaults; also via QPKG_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "QPKG_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,

    /// Host application package id (defaults to the runtime's)
    #[arg(long = "host-package", value_name = "ID", global = true)]
    pub host_package: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package bundle from a local path
    Install(InstallArgs),

    /// Download a package bundle from a URL and install it
    InstallUrl(InstallUrlArgs),

    /// List the packages recorded in the installation ledger
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Path to the `.qmod` bundle
    #[arg(value_name = "BUNDLE")]
    pub bundle: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct InstallUrlArgs {
    /// File name to store the download under
    #[arg(value_name = "FILE_NAME")]
    pub file_name: String,

    /// URL of the `.qmod` bundle
    #[arg(value_name = "URL")]
    pub url: String,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let runtime = qpkg::runtime::RealRuntime;
    let mut config = InstallConfig::new(&runtime, cli.root)?;
    config.host_package_id = cli.host_package;
    let manager = PackageManager::with_defaults(config)?;

    // On Ctrl-C, remove whatever scratch state is in flight before exiting
    let cleanup = manager.cleanup_context();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cleanup.lock().unwrap().cleanup();
            std::process::exit(130);
        }
    });

    match cli.command {
        Commands::Install(args) => {
            manager.scan_packages();
            let package = manager.load_package(&args.bundle)?;
            manager.install(&package).await?;
            println!("installed {} {}", package.id(), package.version());
        }
        Commands::InstallUrl(args) => {
            manager.scan_packages();
            let package = manager.install_from_url(&args.file_name, &args.url).await?;
            println!("installed {} {}", package.id(), package.version());
        }
        Commands::List(_args) => {
            let doc = manager.ledger().read();
            for entry in &doc.mods {
                println!(
                    "{} {} {}",
                    entry.id.as_deref().unwrap_or("?"),
                    entry.version.as_deref().unwrap_or("?"),
                    if entry.installed {
                        "installed"
                    } else {
                        "not installed"
                    },
                );
            }
        }
    }
    Ok(())
}

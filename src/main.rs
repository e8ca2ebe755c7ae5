// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cvtransfer::policy::TransferOption;
use cvtransfer::policy::options::{
    EnforceTransport, KeepGlobalAccess, LocalByValue, Overwrite, Plugin, PluginDir, Printer,
    Recursive, ResourcesByValue, ScriptFile, SkipUpdate, SourcesByValue, StopOnExistingVersion,
    Workers,
};
use cvtransfer::printer::StdoutPrinter;
use cvtransfer::repository::filesystem::FilesystemRepository;
use cvtransfer::repository::{Repository, find_component_version};
use cvtransfer::signing::{self, SigningKeyPair};
use cvtransfer::TransferConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "cvtransfer")]
#[command(author, version, about = "Transfer component versions between repositories", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/cvtransfer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer a component version and, optionally, its references
    Transfer {
        /// Source repository directory
        from: PathBuf,
        /// Target repository directory
        to: PathBuf,
        /// Component name
        component: String,
        /// Component version
        version: String,
        /// Follow component references
        #[arg(short, long)]
        recursive: bool,
        /// Copy all resources by value
        #[arg(long)]
        resources_by_value: bool,
        /// Copy resources with local relation by value
        #[arg(long)]
        local_by_value: bool,
        /// Copy all sources by value
        #[arg(long)]
        sources_by_value: bool,
        /// Overwrite diverging target versions
        #[arg(long)]
        overwrite: bool,
        /// Transfer versions already present in the target
        #[arg(long)]
        enforce: bool,
        /// Leave existing target versions alone
        #[arg(long)]
        skip_update: bool,
        /// Keep the original access as global access of copied blobs
        #[arg(long)]
        keep_global_access: bool,
        /// Do not descend into versions already in the target
        #[arg(long)]
        stop_on_existing: bool,
        /// Copy pool width per version
        #[arg(short, long)]
        workers: Option<usize>,
        /// Transfer script (TOML or JSON)
        #[arg(long, conflicts_with = "plugin")]
        script: Option<PathBuf>,
        /// Plugin deciding the transfer
        #[arg(long, requires = "plugin_handler")]
        plugin: Option<String>,
        /// Transfer handler of the plugin
        #[arg(long, requires = "plugin")]
        plugin_handler: Option<String>,
    },
    /// List component versions in a repository
    List {
        /// Repository directory
        dir: PathBuf,
    },
    /// Sign a component version in place
    Sign {
        /// Repository directory
        dir: PathBuf,
        component: String,
        version: String,
        /// Private key file
        #[arg(long)]
        key: PathBuf,
        /// Signature name
        #[arg(long)]
        name: String,
    },
    /// Verify a signature of a component version
    Verify {
        /// Repository directory
        dir: PathBuf,
        component: String,
        version: String,
        /// Public key file
        #[arg(long)]
        public_key: PathBuf,
        /// Signature name
        #[arg(long)]
        name: String,
    },
    /// Generate an Ed25519 key pair
    Keygen {
        /// Private key output file
        private: PathBuf,
        /// Public key output file
        public: PathBuf,
        /// Issuer recorded in signatures
        #[arg(long)]
        key_id: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<TransferConfig> {
    match path {
        Some(path) => TransferConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => TransferConfig::load_default().context("Failed to load default configuration"),
    }
}

fn open_repository(dir: &Path) -> Result<FilesystemRepository> {
    FilesystemRepository::open(dir)
        .with_context(|| format!("Failed to open repository {}", dir.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Transfer {
            from,
            to,
            component,
            version,
            recursive,
            resources_by_value,
            local_by_value,
            sources_by_value,
            overwrite,
            enforce,
            skip_update,
            keep_global_access,
            stop_on_existing,
            workers,
            script,
            plugin,
            plugin_handler,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let source = open_repository(&from)?;
            let target: Arc<dyn Repository> = Arc::new(open_repository(&to)?);

            let mut options = config.transfer_options();
            let flags: [(bool, Box<dyn TransferOption>); 9] = [
                (recursive, Box::new(Recursive(true))),
                (resources_by_value, Box::new(ResourcesByValue(true))),
                (local_by_value, Box::new(LocalByValue(true))),
                (sources_by_value, Box::new(SourcesByValue(true))),
                (overwrite, Box::new(Overwrite(true))),
                (enforce, Box::new(EnforceTransport(true))),
                (skip_update, Box::new(SkipUpdate(true))),
                (keep_global_access, Box::new(KeepGlobalAccess(true))),
                (stop_on_existing, Box::new(StopOnExistingVersion(true))),
            ];
            options.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, o)| o));
            if let Some(script) = script {
                options.push(Box::new(ScriptFile(script)));
            }
            if let (Some(name), Some(handler)) = (plugin, plugin_handler) {
                options.push(Box::new(Plugin::new(name, handler)));
                if let Some(dir) = config.plugin_dir() {
                    options.push(Box::new(PluginDir(dir)));
                }
            }
            options.push(Box::new(Workers(workers.unwrap_or_else(|| config.workers()))));
            options.push(Box::new(Printer(Arc::new(StdoutPrinter))));

            let src = find_component_version(&source, &component, &version)?
                .with_context(|| {
                    format!("Component version {}:{} not found in {}", component, version, from.display())
                })?;
            cvtransfer::transfer(src.as_ref(), &target, &options).with_context(|| {
                format!("Failed to transfer {}:{} to {}", component, version, to.display())
            })?;
            info!("Transferred {}:{} to {}", component, version, to.display());
        }
        Commands::List { dir } => {
            let repo = open_repository(&dir)?;
            let names = repo.component_names()?;
            if names.is_empty() {
                println!("No component versions in {}", dir.display());
            }
            for name in names {
                let component = repo.lookup_component(&name)?;
                for version in component.versions()? {
                    println!("{}:{}", name, version);
                }
            }
        }
        Commands::Sign {
            dir,
            component,
            version,
            key,
            name,
        } => {
            let repo = open_repository(&dir)?;
            let keypair = SigningKeyPair::load_from_file(&key)
                .with_context(|| format!("Failed to load signing key {}", key.display()))?;
            let Some(mut descriptor) = repo.read_descriptor(&component, &version)? else {
                bail!("Component version {}:{} not found in {}", component, version, dir.display());
            };
            let signature = keypair.sign_descriptor(&mut descriptor, &name)?;
            repo.write_descriptor(&descriptor)?;
            println!(
                "Signed {}:{} as {} (digest {})",
                component, version, name, signature.digest.value
            );
        }
        Commands::Verify {
            dir,
            component,
            version,
            public_key,
            name,
        } => {
            let repo = open_repository(&dir)?;
            let key = signing::load_public_key(&public_key)
                .with_context(|| format!("Failed to load public key {}", public_key.display()))?;
            let Some(descriptor) = repo.read_descriptor(&component, &version)? else {
                bail!("Component version {}:{} not found in {}", component, version, dir.display());
            };
            signing::verify_descriptor(&descriptor, &name, &key)
                .with_context(|| format!("Verification of {}:{} failed", component, version))?;
            println!("Signature {} of {}:{} is valid", name, component, version);
        }
        Commands::Keygen {
            private,
            public,
            key_id,
        } => {
            let mut keypair = SigningKeyPair::generate();
            if let Some(id) = key_id {
                keypair = keypair.with_key_id(&id);
            }
            keypair.save_to_files(&private, &public)?;
            println!("Wrote private key to {}", private.display());
            println!("Wrote public key to {}", public.display());
            println!("Public key: {}", keypair.public_key_base64());
        }
    }

    Ok(())
}

mod commands;

use cbsgen_core::{install_signal_handler, CancelToken, Config};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cbsgen",
    version,
    about = "Rebuild servicing packages from extracted device images and verify their checksums"
)]
struct Cli {
    /// Configuration file (default: ~/.config/cbsgen/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Number of worker threads (overrides the config file).
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rebuild every servicing package found on one or more extracted images.
    Build {
        /// Image roots: one subdirectory per partition, optional `<name>.bin` raw streams.
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Output directory for rebuilt containers.
        #[arg(short, long)]
        output: PathBuf,
        /// Rebuild containers that already exist in the output directory.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Expand side-by-side manifests before packing.
        #[arg(long, default_value_t = false)]
        use_uncompressed_manifests: bool,
    },
    /// List the package manifests that `build` would process.
    Packages {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Verify a container, or every container under a directory, against the
    /// digests declared by its component manifests.
    Verify {
        path: PathBuf,
        /// Per-file timeout in seconds (overrides the config file).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Pack the contents of a directory into a container.
    Pack {
        /// Container to create.
        dest: PathBuf,
        /// Directory whose files become the container entries.
        dir: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn load_config(path: Option<&Path>, jobs: Option<usize>) -> Result<Config, String> {
    let mut config = match path {
        Some(p) => Config::load(p),
        None => Config::load_default(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(jobs) = jobs {
        if jobs == 0 {
            return Err("configuration error: --jobs must be at least 1".to_owned());
        }
        config.jobs = Some(jobs);
    }
    tracing::debug!("effective config: {config:?}");
    Ok(config)
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CBSGEN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone());
    let json_output = cli.json;

    let config = || load_config(cli.config.as_deref(), cli.jobs);

    let result = match cli.command {
        Commands::Build {
            images,
            output,
            force,
            use_uncompressed_manifests,
        } => config().and_then(|mut config| {
            if force {
                config.skip_existing = false;
            }
            if use_uncompressed_manifests {
                config.use_uncompressed_manifests = true;
            }
            commands::build::run(&images, &output, config, &cancel, json_output)
        }),
        Commands::Packages { images } => {
            config().and_then(|config| commands::packages::run(&images, config, json_output))
        }
        Commands::Verify { path, timeout } => config().and_then(|mut config| {
            if timeout.is_some() {
                config.unit_timeout_secs = timeout;
            }
            commands::verify::run(&path, &config, &cancel, json_output)
        }),
        Commands::Pack { dest, dir } => commands::pack::run(&dest, &dir, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:")
                || msg.starts_with("failed to parse manifest")
                || msg.starts_with("configuration error:")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store I/O error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

mod commands;

use berth_core::CONFIG_FILE_NAME;
use clap::{Parser, Subcommand};
use commands::create::CreateOptions;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "berth",
    version,
    about = "Container lifecycle orchestration with validated configuration and rollback"
)]
struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, default_value = CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

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
    /// Write a config if missing, register pools, and create the default profile.
    Init {
        /// State directory for a newly written config.
        #[arg(long)]
        var_dir: Option<PathBuf>,
    },
    /// List containers.
    List,
    /// Validate a JSON container definition without creating it.
    Validate {
        /// Path to a JSON container definition.
        args: PathBuf,
    },
    /// Manage images.
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Create a container, empty or from an image.
    Create {
        name: String,
        /// Image fingerprint to create from.
        #[arg(long)]
        image: Option<String>,
        /// Profile to apply, in order. Defaults to `default`.
        #[arg(long = "profile")]
        profiles: Vec<String>,
        /// Configuration key, as key=value.
        #[arg(id = "config_key", long = "config-key", short = 'c')]
        config: Vec<String>,
        #[arg(long, default_value_t = false)]
        ephemeral: bool,
    },
    /// Copy a container, with its snapshots unless --container-only.
    Copy {
        source: String,
        target: String,
        #[arg(long, default_value_t = false)]
        container_only: bool,
    },
    /// Snapshot a container.
    Snapshot {
        container: String,
        name: String,
        /// Also dump the running container's state.
        #[arg(long, default_value_t = false)]
        stateful: bool,
    },
    /// Export a container to a backup archive.
    Backup {
        container: String,
        name: String,
        #[arg(long, default_value_t = false)]
        container_only: bool,
        /// Mark the archive as driver-native; it can only be imported into a
        /// pool of the same name.
        #[arg(long, default_value_t = false)]
        optimized: bool,
    },
    /// Restore a container from a backup archive.
    Import {
        archive: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ImageCommands {
    /// Add an image tarball to the local image store.
    Add {
        tarball: PathBuf,
        /// Image property, as key=value.
        #[arg(long = "property")]
        properties: Vec<String>,
    },
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
            tracing_subscriber::EnvFilter::try_from_env("BERTH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    let config = cli.config;
    let open = || commands::open_engine(&config);
    let result = match cli.command {
        Commands::Init { var_dir } => commands::init::run(&config, var_dir, json),
        Commands::List => open().and_then(|engine| commands::list::run(&engine, json)),
        Commands::Validate { args } => {
            open().and_then(|engine| commands::validate::run(&engine, &args, json))
        }
        Commands::Image {
            command:
                ImageCommands::Add {
                    tarball,
                    properties,
                },
        } => open().and_then(|engine| commands::image::add(&engine, &tarball, &properties, json)),
        Commands::Create {
            name,
            image,
            profiles,
            config: keys,
            ephemeral,
        } => open().and_then(|engine| {
            commands::create::run(
                &engine,
                &name,
                &CreateOptions {
                    image: image.as_deref(),
                    profiles: &profiles,
                    config: &keys,
                    ephemeral,
                },
                json,
            )
        }),
        Commands::Copy {
            source,
            target,
            container_only,
        } => open().and_then(|engine| {
            commands::copy::run(&engine, &source, &target, container_only, json)
        }),
        Commands::Snapshot {
            container,
            name,
            stateful,
        } => open().and_then(|engine| {
            commands::snapshot::run(&engine, &container, &name, stateful, json)
        }),
        Commands::Backup {
            container,
            name,
            container_only,
            optimized,
        } => open().and_then(|engine| {
            commands::backup::run(&engine, &container, &name, container_only, optimized, json)
        }),
        Commands::Import { archive } => {
            open().and_then(|engine| commands::import::run(&engine, &archive, json))
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::exit_code(&msg))
        }
    }
}

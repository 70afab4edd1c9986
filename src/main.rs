//! Photo Index CLI
//!
//! Lists a photo directory the way the wall frontend sees it and maintains the
//! persisted capture-time cache.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use photo_index::{
    IndexError, LibraryConfig, ListQuery, ListResponse, PhotoLibrary, SortBy, SortOrder,
};

const ABOUT: &str = r#"
Photo Index - photo directory listing with capture-time sorting

Examples:
  photo_index --root ./uploads list                      newest uploads first
  photo_index --root ./uploads list --sort taken --json  by capture time, as JSON
  photo_index --root ./uploads list trip --before 1700000000000
  photo_index --root ./uploads dirs trip                 subdirectories of trip/
  photo_index --root ./uploads -m index.json rescan      fill the capture-time cache
"#;

/// Photo directory indexer
#[derive(Parser)]
#[command(name = "photo_index")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON config file; flags override its values
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Photo root directory
    #[arg(short = 'r', long, global = true)]
    root: Option<PathBuf>,

    /// Capture-time cache document
    #[arg(short = 'm', long, global = true)]
    metadata: Option<PathBuf>,

    /// Scan cache lifetime in seconds (0 disables, max 3600)
    #[arg(long, global = true)]
    ttl: Option<u64>,

    /// Metadata extraction threads (0 = auto-detect)
    #[arg(short = 't', long, global = true)]
    threads: Option<usize>,

    /// Include dot-files and dot-directories
    #[arg(long, global = true)]
    include_hidden: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List images under one or more scopes
    List {
        /// Directories relative to the root (default: the root)
        scopes: Vec<String>,

        /// Sort key: upload or taken
        #[arg(short = 's', long, default_value = "upload")]
        sort: String,

        /// Sort direction: asc or desc
        #[arg(short = 'o', long, default_value = "desc")]
        order: String,

        /// Only images uploaded before this epoch-millisecond cursor
        #[arg(short = 'b', long)]
        before: Option<i64>,

        /// Maximum number of images (1-2000)
        #[arg(short = 'n', long, default_value = "200")]
        limit: usize,

        /// Only list direct children of each scope
        #[arg(long)]
        no_recursive: bool,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// List subdirectories of a scope
    Dirs {
        /// Directory relative to the root
        #[arg(default_value = "")]
        scope: String,
    },

    /// Print the file a key resolves to
    Resolve {
        /// Image path relative to the root
        key: String,
    },

    /// Extract capture times for every image missing from the cache
    Rescan {
        /// Directory relative to the root
        #[arg(default_value = "")]
        scope: String,
    },

    /// Forget the cached capture time of a deleted image
    Evict {
        /// Image path relative to the root
        key: String,
    },
}

fn build_config(cli: &Cli) -> Result<LibraryConfig, IndexError> {
    let mut config = match &cli.config {
        Some(path) => LibraryConfig::from_json_file(path)?,
        None => LibraryConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(metadata) = &cli.metadata {
        config.metadata_path = Some(metadata.clone());
    }
    if let Some(ttl) = cli.ttl {
        config.scan_cache_ttl_secs = ttl;
    }
    if let Some(threads) = cli.threads {
        config.num_threads = threads;
    }
    if cli.include_hidden {
        config.skip_hidden = false;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), IndexError> {
    let Some(command) = cli.command.as_ref() else {
        println!("{}", ABOUT);
        println!("Run 'photo_index --help' for all options");
        return Ok(());
    };

    let config = build_config(&cli)?;
    let library = PhotoLibrary::new(config)?;

    match command {
        Commands::List {
            scopes,
            sort,
            order,
            before,
            limit,
            no_recursive,
            json,
        } => {
            let mut query = ListQuery::new(scopes.clone())
                .sort_by(SortBy::parse_lenient(sort))
                .order(SortOrder::parse_lenient(order))
                .limit(*limit);
            if *no_recursive {
                query = query.recursive(false);
            }
            if let Some(before) = before {
                query = query.before(*before);
            }
            info!(
                "Listing {:?} by {} ({})",
                query.scopes,
                query.sort_by.as_str(),
                query.order.as_str()
            );

            let items = library.list_images(&query);
            if *json {
                println!("{}", serde_json::to_string_pretty(&ListResponse { items })?);
            } else {
                for item in &items {
                    let taken = item
                        .taken_time_ms
                        .map(|ms| ms.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}\t{}\t{}\t{}",
                        item.upload_time_ms, taken, item.relative_key, item.caption
                    );
                }
            }
        }
        Commands::Dirs { scope } => {
            for name in library.list_subdirectories(scope) {
                println!("{}", name);
            }
        }
        Commands::Resolve { key } => match library.resolve_servable_path(key) {
            Some(path) => println!("{}", path.display()),
            None => return Err(IndexError::not_found(PathBuf::from(key))),
        },
        Commands::Rescan { scope } => {
            let summary = library.rescan_metadata(scope);
            println!("{}", serde_json::to_string(&summary)?);
        }
        Commands::Evict { key } => {
            if library.evict_taken_time(key) {
                println!("Evicted {}", key);
            } else {
                println!("No cached capture time for {}", key);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skill_cache::{CacheConfig, Invalidation, KeyBuilder, SkillCache, DEFAULT_CATEGORY};

#[derive(Parser)]
#[command(name = "skill-cache")]
#[command(about = "Inspect and maintain assistant skill caches", long_about = None)]
struct Cli {
    /// Cache name (one database per name)
    #[arg(short, long, default_value = "default")]
    name: String,

    /// Base cache directory (defaults to SKILL_CACHE_DIR or ~/.assistant-skills/cache)
    #[arg(short = 'd', long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entry counts, sizes and hit rate
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a cached value
    Get {
        key: String,

        #[arg(short, long, default_value = DEFAULT_CATEGORY)]
        category: String,
    },

    /// Store a value (parsed as JSON, otherwise stored as a string)
    Set {
        key: String,

        value: String,

        #[arg(short, long, default_value = DEFAULT_CATEGORY)]
        category: String,

        /// Time-to-live in seconds
        #[arg(short, long)]
        ttl: Option<u64>,
    },

    /// Remove entries by key, glob pattern, or category
    Invalidate {
        #[arg(short, long)]
        key: Option<String>,

        /// Glob over keys, e.g. "user:*" or "file[1-2].txt"
        #[arg(short, long)]
        pattern: Option<String>,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Remove every entry
    Clear,

    /// Delete expired entries
    Purge,

    /// Print the cache key for the given components
    Key {
        category: String,

        parts: Vec<String>,

        /// Named component as name=value (repeatable)
        #[arg(long = "named", value_parser = parse_named)]
        named: Vec<(String, String)>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "skill_cache=info".into())
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { json } => {
            let cache = open_cache(&cli)?;
            let stats = cache.stats()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Cache: {} ({})", cache.name(), cache.database_path().display());
                println!("  Entries:  {}", stats.entry_count);
                println!("  Expired:  {}", stats.expired_count);
                println!("  Size:     {} bytes", stats.total_size_bytes);
                if !stats.by_category.is_empty() {
                    println!("\nCategories:");
                    for (category, summary) in &stats.by_category {
                        println!("  {:<20} {:>6} entries  {:>10} bytes",
                            category, summary.count, summary.total_size_bytes);
                    }
                }
            }
        }

        Commands::Get { ref key, ref category } => {
            let cache = open_cache(&cli)?;
            match cache.get_in::<serde_json::Value>(category, key)? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("Not cached: {}/{}", category, key);
                    std::process::exit(1);
                }
            }
        }

        Commands::Set { ref key, ref value, ref category, ttl } => {
            let cache = open_cache(&cli)?;
            let value = parse_value(value);

            match ttl {
                Some(secs) => cache.set_with_ttl(category, key, &value, Duration::from_secs(secs))?,
                None => cache.set_in(category, key, &value)?,
            }
            println!("Stored {}/{}", category, key);
        }

        Commands::Invalidate { ref key, ref pattern, ref category } => {
            let request = Invalidation {
                key: key.clone(),
                pattern: pattern.clone(),
                category: category.clone(),
            };
            if request.is_empty() {
                anyhow::bail!("Specify at least one of --key, --pattern or --category");
            }

            let cache = open_cache(&cli)?;
            let removed = cache.invalidate(&request)?;
            println!("Removed {} entries ({})", removed, request);
        }

        Commands::Clear => {
            let cache = open_cache(&cli)?;
            let removed = cache.clear()?;
            println!("Removed {} entries", removed);
        }

        Commands::Purge => {
            let cache = open_cache(&cli)?;
            let removed = cache.purge_expired()?;
            println!("Purged {} expired entries", removed);
        }

        Commands::Key { ref category, ref parts, ref named } => {
            println!("{}", build_key(category, parts, named));
        }
    }

    Ok(())
}

fn open_cache(cli: &Cli) -> Result<SkillCache> {
    let mut config = CacheConfig::from_env().context("Invalid cache configuration")?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }

    SkillCache::open(cli.name.as_str(), config)
        .with_context(|| format!("Failed to open cache '{}'", cli.name))
}

/// JSON if it parses, otherwise the raw text as a string
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn parse_named(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

fn build_key(category: &str, parts: &[String], named: &[(String, String)]) -> String {
    let builder = parts
        .iter()
        .fold(KeyBuilder::new(category), |builder, part| builder.part(part));
    named
        .iter()
        .fold(builder, |builder, (name, value)| builder.named(name.as_str(), value))
        .build()
}

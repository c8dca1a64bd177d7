//! Seed the entity store from the alias dictionaries and link every existing
//! external row to a canonical entity.
//!
//! Usage: `backfill_entities [config.json]`
//! Without an argument, reads `~/.millmatch/config.json` (defaults if absent).
//! Prints the migration stats as JSON on stdout. On failure, prints the
//! partial stats and the classified error as JSON on stderr.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use millmatch_lib::backfill::migrate_existing;
use millmatch_lib::config::{load_config, load_config_from};
use millmatch_lib::resolver::Resolver;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1).map(PathBuf::from) {
        Some(path) => load_config_from(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => load_config().context("loading default config")?,
    };

    let db = config.open_store().context("opening entity store")?;
    log::info!("Entity store: {}", db.path().display());
    let resolver = Resolver::new(&db, &config);

    match migrate_existing(&resolver, &config.dictionaries, &config.sources) {
        Ok(stats) => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", serde_json::to_string_pretty(&err.report())?);
            Err(err).context("backfill failed")
        }
    }
}

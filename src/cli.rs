//! Command-Line Interface (CLI) argument parsing.
//!
//! The arguments are parsed with `clap` and then merged on top of the file
//! and environment configuration through the figment [`Provider`] impl below.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Routes notification packages read from stdin to their delivery backends.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Maximum number of retries for a failed delivery.
    #[arg(long, value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Periodically log the delivery counters.
    #[arg(long)]
    pub log_metrics: bool,
}

fn insert_nested(dict: &mut Dict, path: &[&str], value: Value) {
    match path {
        [] => {}
        [key] => {
            dict.insert((*key).to_string(), value);
        }
        [key, rest @ ..] => {
            let entry = dict
                .entry((*key).to_string())
                .or_insert_with(|| Value::from(Dict::new()));
            if let Value::Dict(_, inner) = entry {
                insert_nested(inner, rest, value);
            }
        }
    }
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            insert_nested(&mut dict, &["log_level"], Value::from(level.clone()));
        }
        if let Some(retries) = self.max_retries {
            insert_nested(
                &mut dict,
                &["dispatch", "retry", "max_retries"],
                Value::from(retries),
            );
        }
        // Only an explicit flag overrides the file; absence keeps the configured value.
        if self.log_metrics {
            insert_nested(&mut dict, &["metrics", "log_metrics"], Value::from(true));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}

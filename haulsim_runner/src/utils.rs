use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use haulsim::prelude::*;
use serde_json::Value;

/// Haulage simulation command line options.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CLIArgs {
    /// Scenario file, JSON or YAML by extension.
    #[arg(long)]
    pub input: PathBuf,

    /// Run options as YAML. Flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// `auto` or `manual`.
    #[arg(long)]
    pub mode: Option<String>,

    /// Seeds to run, e.g. "3", "0..6" or "0..=7". Defaults to the scenario's own seed.
    #[arg(long)]
    pub seed: Option<String>,

    #[arg(long, default_value = "outputs/haulsim")]
    pub output_dir: PathBuf,

    /// Group telemetry into one-minute batches.
    #[arg(long)]
    pub batch: bool,

    /// Also write telemetry.csv and events.csv.
    #[arg(long)]
    pub csv: bool,
}

/// Parse a seed string such as "0..6" or "0..=7" into a vector of u64 values.
pub fn parse_seed_range(seed_str: &str) -> Result<Vec<u64>, String> {
    let bound = |s: &str, which: &str| -> Result<u64, String> {
        s.trim().parse().map_err(|e| format!("Invalid {} seed '{}': {}", which, s.trim(), e))
    };
    if let Some((start, end)) = seed_str.split_once("..=") {
        Ok((bound(start, "start")?..=bound(end, "end")?).collect())
    } else if let Some((start, end)) = seed_str.split_once("..") {
        Ok((bound(start, "start")?..bound(end, "end")?).collect())
    } else {
        seed_str
            .trim()
            .parse::<u64>()
            .map(|v| vec![v])
            .map_err(|e| format!("Invalid seed value '{}': {}", seed_str, e))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

/// Reads the scenario as a JSON value, whatever format it is stored in.
pub fn load_input(path: &Path) -> Result<Value, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if is_yaml(path) {
        serde_yaml::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

pub fn load_options(path: Option<&Path>) -> Result<SimOptions, ConfigError> {
    let Some(path) = path else {
        return Ok(SimOptions::default());
    };
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Yaml(format!("{}: {}", path.display(), e)))?;
    serde_yaml::from_str(&raw).map_err(|e| ConfigError::Yaml(e.to_string()))
}

/// The same scenario pinned to `seed`.
pub fn with_seed(input: &Value, seed: Option<u64>) -> Value {
    let mut input = input.clone();
    if let (Some(seed), Value::Object(map)) = (seed, &mut input) {
        map.insert("seed".into(), seed.into());
    }
    input
}

pub fn seed_dir(output_dir: &Path, seed: Option<u64>) -> PathBuf {
    match seed {
        Some(seed) => output_dir.join(format!("{:04}", seed)),
        None => output_dir.join("default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_ranges() {
        assert_eq!(parse_seed_range("3").unwrap(), vec![3]);
        assert_eq!(parse_seed_range("0..3").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_seed_range("1..=3").unwrap(), vec![1, 2, 3]);
        assert!(parse_seed_range("a..3").unwrap_err().contains("Invalid start seed 'a'"));
        assert!(parse_seed_range("x").is_err());
    }

    #[test]
    fn options_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "mode: manual\nlunch: false\nsolver: CBC\n").unwrap();
        let options = load_options(Some(&path)).unwrap();
        assert_eq!(options.mode.as_deref(), Some("manual"));
        assert!(!options.lunch);
        assert!(options.refuel);
        assert_eq!(options.solver, SolverKind::Cbc);
    }

    #[test]
    fn seed_is_pinned() {
        let input = serde_json::json!({"seed": 1, "quarry": {}});
        assert_eq!(with_seed(&input, Some(7))["seed"], 7);
        assert_eq!(with_seed(&input, None)["seed"], 1);
        assert_eq!(seed_dir(Path::new("out"), Some(7)), Path::new("out/0007"));
    }
}

// src/cli/args.rs
// Command-line flags of the mlaa binary

use std::fmt;
use std::path::PathBuf;

use crate::config::InputMode;
use crate::error::ErrorPolicy;

pub const USAGE: &str = "usage: mlaa <input.png> <output.png> --assets <dir> [--mode luma|color|depth] \
[--depth <depth.png>] [--threshold F] [--max-search-steps N] [--edges <edges.png>] \
[--policy strict|permissive] [--config <mlaa.json>]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliError {
    message: String,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

/// Parsed flags; tunables left `None` fall back to the config file or defaults
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub assets: PathBuf,
    pub mode: InputMode,
    /// Depth image for `--mode depth`, red channel
    pub depth: Option<PathBuf>,
    pub threshold: Option<f32>,
    pub max_search_steps: Option<u32>,
    pub edges: Option<PathBuf>,
    pub policy: Option<ErrorPolicy>,
    pub config: Option<PathBuf>,
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(idx + 1)
        .map(String::as_str)
        .ok_or_else(|| CliError::new(format!("missing value for {flag}")))
}

/// Parse a float argument value.
pub fn parse_f32(args: &[String], idx: usize, flag: &str) -> Result<f32, CliError> {
    let raw = value(args, idx, flag)?;
    raw.parse::<f32>()
        .map_err(|_| CliError::new(format!("invalid float value '{raw}' for {flag}")))
}

/// Parse an unsigned integer argument value.
pub fn parse_u32(args: &[String], idx: usize, flag: &str) -> Result<u32, CliError> {
    let raw = value(args, idx, flag)?;
    raw.parse::<u32>()
        .map_err(|_| CliError::new(format!("invalid integer value '{raw}' for {flag}")))
}

impl CliConfig {
    /// Parse a flat argument list (excluding argv[0]).
    pub fn parse(args: &[String]) -> Result<Self, CliError> {
        let mut positional = Vec::new();
        let mut assets = None;
        let mut mode = InputMode::Luma;
        let mut depth = None;
        let mut threshold = None;
        let mut max_search_steps = None;
        let mut edges = None;
        let mut policy = None;
        let mut config = None;

        let mut i = 0usize;
        while i < args.len() {
            match args[i].as_str() {
                "--assets" => {
                    assets = Some(PathBuf::from(value(args, i, "--assets")?));
                    i += 2;
                }
                "--mode" => {
                    let raw = value(args, i, "--mode")?;
                    mode = raw.parse().map_err(|_| {
                        CliError::new(format!(
                            "unknown --mode value '{raw}'; expected one of luma, color, depth"
                        ))
                    })?;
                    i += 2;
                }
                "--depth" => {
                    depth = Some(PathBuf::from(value(args, i, "--depth")?));
                    i += 2;
                }
                "--threshold" => {
                    threshold = Some(parse_f32(args, i, "--threshold")?);
                    i += 2;
                }
                "--max-search-steps" => {
                    max_search_steps = Some(parse_u32(args, i, "--max-search-steps")?);
                    i += 2;
                }
                "--edges" => {
                    edges = Some(PathBuf::from(value(args, i, "--edges")?));
                    i += 2;
                }
                "--policy" => {
                    let raw = value(args, i, "--policy")?;
                    policy = Some(raw.parse().map_err(|_| {
                        CliError::new(format!(
                            "unknown --policy value '{raw}'; expected strict or permissive"
                        ))
                    })?);
                    i += 2;
                }
                "--config" => {
                    config = Some(PathBuf::from(value(args, i, "--config")?));
                    i += 2;
                }
                flag if flag.starts_with("--") => {
                    return Err(CliError::new(format!("unknown flag '{flag}'")));
                }
                path => {
                    positional.push(PathBuf::from(path));
                    i += 1;
                }
            }
        }

        let [input, output]: [PathBuf; 2] = positional
            .try_into()
            .map_err(|_| CliError::new(format!("expected <input.png> <output.png>\n{USAGE}")))?;
        let assets = assets.ok_or_else(|| CliError::new(format!("missing --assets\n{USAGE}")))?;
        if mode == InputMode::Depth && depth.is_none() {
            return Err(CliError::new("--mode depth needs --depth <depth.png>"));
        }

        Ok(Self {
            input,
            output,
            assets,
            mode,
            depth,
            threshold,
            max_search_steps,
            edges,
            policy,
            config,
        })
    }
}

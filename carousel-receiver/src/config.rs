//! Command line arguments and the optional TOML configuration file.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::carousel::DEFAULT_SUPPORTED_DATA_COMPONENT_IDS;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "carousel-receiver.toml";

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
const DEFAULT_CHUNK_SIZE: usize = 188 * 1024;

/// carousel-receiver - ARIB data carousel receiver
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TS input file ("-" for stdin)
    pub input: Option<String>,

    /// Output file for JSON-lines notifications (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Service id to follow when the TS carries several programs
    #[arg(short, long)]
    pub service_id: Option<u16>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    pub log_retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub input: InputSection,
    #[serde(default)]
    pub carousel: CarouselSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub output: OutputSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct InputSection {
    pub path: Option<String>,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CarouselSection {
    pub service_id: Option<u16>,
    pub supported_data_component_ids: Option<Vec<u16>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputSection {
    pub path: Option<String>,
}

/// Where the TS is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

/// Effective settings after merging CLI, file and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub input: Input,
    pub chunk_size: usize,
    pub output: Option<PathBuf>,
    pub service_id: Option<u16>,
    pub supported_data_component_ids: Vec<u16>,
    pub verbose: bool,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    pub log_level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Config file path: explicit path > auto-detect > none.
pub fn config_path(args: &Args) -> Option<PathBuf> {
    args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    })
}

impl Settings {
    /// Merge settings; command line values take precedence over the file.
    pub fn merge(args: Args, file: ConfigFile) -> Self {
        let input = match args.input.or(file.input.path).as_deref() {
            None | Some("-") => Input::Stdin,
            Some(path) => Input::File(PathBuf::from(path)),
        };

        Self {
            input,
            chunk_size: file
                .input
                .chunk_size
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            output: args.output.or(file.output.path.map(PathBuf::from)),
            service_id: args.service_id.or(file.carousel.service_id),
            supported_data_component_ids: file
                .carousel
                .supported_data_component_ids
                .unwrap_or_else(|| DEFAULT_SUPPORTED_DATA_COMPONENT_IDS.to_vec()),
            verbose: args.verbose,
            log_dir: args
                .log_dir
                .or(file.logging.log_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_retention_days: args
                .log_retention_days
                .or(file.logging.retention_days)
                .unwrap_or(DEFAULT_LOG_RETENTION_DAYS),
            log_level: file.logging.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::merge(Args::default(), ConfigFile::default());
        assert_eq!(settings.input, Input::Stdin);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.output, None);
        assert_eq!(settings.supported_data_component_ids, vec![0x0C, 0x0D, 0x07, 0x0B]);
        assert_eq!(settings.log_dir, PathBuf::from("logs"));
        assert_eq!(settings.log_retention_days, 7);
    }

    #[test]
    fn test_file_values() {
        let file: ConfigFile = toml::from_str(
            r#"
            [input]
            path = "capture.ts"
            chunk_size = 18800

            [carousel]
            service_id = 1032
            supported_data_component_ids = [0x0C]

            [logging]
            level = "carousel_receiver=debug"

            [output]
            path = "out.jsonl"
            "#,
        )
        .unwrap();

        let settings = Settings::merge(Args::default(), file);
        assert_eq!(settings.input, Input::File(PathBuf::from("capture.ts")));
        assert_eq!(settings.chunk_size, 18800);
        assert_eq!(settings.service_id, Some(1032));
        assert_eq!(settings.supported_data_component_ids, vec![0x0C]);
        assert_eq!(settings.log_level.as_deref(), Some("carousel_receiver=debug"));
        assert_eq!(settings.output, Some(PathBuf::from("out.jsonl")));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let file: ConfigFile = toml::from_str(
            r#"
            [input]
            path = "capture.ts"
            [carousel]
            service_id = 1032
            [logging]
            retention_days = 30
            "#,
        )
        .unwrap();
        let args = Args::parse_from(["carousel-receiver", "-", "--service-id", "1040", "--log-retention-days", "3"]);

        let settings = Settings::merge(args, file);
        assert_eq!(settings.input, Input::Stdin);
        assert_eq!(settings.service_id, Some(1040));
        assert_eq!(settings.log_retention_days, 3);
    }
}

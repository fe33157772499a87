//! CLI argument definitions for the Scanshelf application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Scanshelf - upload scanned documents, extract their text, and discuss them.
#[derive(Parser, Debug)]
#[command(name = "scanshelf", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API server (the default).
    Serve(ServeArgs),
    /// Extract text from a local image and print or export it.
    Extract(ExtractArgs),
    /// Write a default configuration file to the config path.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the database and stored files.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Image to run OCR on.
    pub image: PathBuf,

    /// Language code (eng, fra, deu, spa, chi_sim, jpn).
    #[arg(long)]
    pub lang: Option<String>,

    /// OCR engine override ("tesseract" or "mock").
    #[arg(long)]
    pub engine: Option<String>,

    #[arg(long = "no-grayscale")]
    pub no_grayscale: bool,

    #[arg(long = "no-contrast")]
    pub no_contrast: bool,

    #[arg(long = "no-sharpen")]
    pub no_sharpen: bool,

    /// Write the text to this file instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Export format for `--output` (txt or pdf).
    #[arg(long, default_value = "txt")]
    pub format: String,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SCANSHELF_CONFIG env var > ~/.scanshelf/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SCANSHELF_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

impl ServeArgs {
    /// Resolve the API server port.
    ///
    /// Priority: --port flag > SCANSHELF_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = std::env::var("SCANSHELF_PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok())
        {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        3040
    }

    /// Returns `None` if the data directory is not overridden.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".scanshelf").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let args = CliArgs::parse_from(["scanshelf"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_port_flag_wins() {
        let args = CliArgs::parse_from(["scanshelf", "serve", "-p", "4000"]);
        match args.command {
            Some(Command::Serve(serve)) => assert_eq!(serve.resolve_port(3040), 4000),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_extract_flags() {
        let args = CliArgs::parse_from([
            "scanshelf",
            "extract",
            "scan.png",
            "--lang",
            "deu",
            "--no-sharpen",
            "-l",
            "debug",
        ]);
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
        match args.command {
            Some(Command::Extract(extract)) => {
                assert_eq!(extract.image, PathBuf::from("scan.png"));
                assert_eq!(extract.lang.as_deref(), Some("deu"));
                assert!(extract.no_sharpen);
                assert!(!extract.no_grayscale);
                assert_eq!(extract.format, "txt");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_flag_wins() {
        let args = CliArgs::parse_from(["scanshelf", "-c", "/tmp/custom.toml"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/custom.toml"));
    }
}

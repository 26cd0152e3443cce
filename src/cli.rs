use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{CliError, CliResult};

/// Path components skipped unless --skip is given
const DEFAULT_SKIP: &[&str] = &[".git", "node_modules", ".cache"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per change
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// Watch a filesystem for created and deleted entries
#[derive(Debug, Parser)]
#[command(name = "fanwatch", version, about)]
pub struct Args {
    /// Directory to watch; its whole filesystem is subscribed
    #[arg(default_value = "/")]
    pub root: PathBuf,

    /// Drop changes under this path prefix (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "PREFIX")]
    pub exclude: Vec<PathBuf>,

    /// Drop changes whose path contains this component, case-insensitive (repeatable)
    #[arg(short = 's', long = "skip", value_name = "NAME")]
    pub skip: Vec<String>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// When to color text output
    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Capacity of the queue between listener and printer
    #[arg(short = 'q', long = "queue", default_value_t = 1024)]
    pub queue: usize,

    /// Print nothing; only log
    #[arg(long)]
    pub quiet: bool,
}

impl Args {
    /// Component names to skip, lower-cased
    pub fn skip_dirs(&self) -> HashSet<String> {
        if self.skip.is_empty() {
            DEFAULT_SKIP.iter().map(|s| s.to_string()).collect()
        } else {
            self.skip.iter().map(|s| s.to_ascii_lowercase()).collect()
        }
    }

    pub fn validate(&self) -> CliResult<()> {
        if !self.root.is_dir() {
            return Err(CliError::NotADirectory(self.root.clone()));
        }
        if self.queue == 0 {
            return Err(CliError::InvalidArgument(
                "--queue must be at least 1".to_string(),
            ));
        }
        for prefix in &self.exclude {
            if !prefix.is_absolute() {
                return Err(CliError::InvalidArgument(format!(
                    "--exclude expects an absolute path, got {}",
                    prefix.display()
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["fanwatch"]);
        assert_eq!(args.root, PathBuf::from("/"));
        assert_eq!(args.format, OutputFormat::Text);
        assert_eq!(args.color, ColorMode::Auto);
        assert_eq!(args.queue, 1024);
        assert!(args.skip_dirs().contains(".git"));
    }

    #[test]
    fn test_repeated_flags() {
        let args = Args::parse_from([
            "fanwatch", "/data", "-x", "/data/tmp", "--exclude", "/data/logs", "-s", "Target",
            "--format", "json",
        ]);
        assert_eq!(args.exclude.len(), 2);
        assert_eq!(args.format, OutputFormat::Json);

        let skip = args.skip_dirs();
        assert_eq!(skip.len(), 1);
        assert!(skip.contains("target"));
    }

    #[test]
    fn test_relative_exclude_is_rejected() {
        let args = Args::parse_from(["fanwatch", "/", "-x", "relative/dir"]);
        assert!(matches!(args.validate(), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_queue_is_rejected() {
        let args = Args::parse_from(["fanwatch", "/", "--queue", "0"]);
        assert!(matches!(args.validate(), Err(CliError::InvalidArgument(_))));
    }
}

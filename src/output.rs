use anyhow::Result;
use chrono::{DateTime, Local};
use colored::Colorize;
use fanwatch_driver::{ChangeEvent, ChangeType};
use serde_json::json;

use crate::cli::OutputFormat;

/// Renders change events for the terminal
pub struct Printer {
    format: OutputFormat,
    use_colors: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, use_colors: bool) -> Self {
        Printer { format, use_colors }
    }

    pub fn render(&self, event: &ChangeEvent, at: DateTime<Local>) -> Result<String> {
        match self.format {
            OutputFormat::Text => Ok(self.render_text(event, at)),
            OutputFormat::Json => {
                let value = json!({
                    "time": at.to_rfc3339(),
                    "path": event.path,
                    "change_type": event.change_type,
                });
                Ok(serde_json::to_string(&value)?)
            }
        }
    }

    fn render_text(&self, event: &ChangeEvent, at: DateTime<Local>) -> String {
        let marker = match event.change_type {
            ChangeType::Creation => "+",
            ChangeType::Deletion => "-",
        };
        let time = at.format("%H:%M:%S%.3f").to_string();
        let path = event.path.display().to_string();

        if !self.use_colors {
            return format!("{} {} {}", time, marker, path);
        }

        let marker = match event.change_type {
            ChangeType::Creation => marker.green().bold(),
            ChangeType::Deletion => marker.red().bold(),
        };
        format!("{} {} {}", time.dimmed(), marker, path)
    }
}

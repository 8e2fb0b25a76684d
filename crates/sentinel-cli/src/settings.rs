//! Scoring configuration from file and command line

use crate::Cli;
use anyhow::Context;
use sentinel_core::ScoringConfig;

/// Load the YAML configuration if present and apply CLI overrides
pub fn load(cli: &Cli) -> anyhow::Result<ScoringConfig> {
    let mut config = if cli.config.exists() {
        ScoringConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        ScoringConfig::default()
    };

    if let Some(dir) = &cli.model_dir {
        config.model_dir = Some(dir.clone());
    }
    if let Some(device) = cli.device {
        config.device = device;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(overlap) = cli.overlap {
        config.overlap = overlap;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size_initial = batch_size;
        config.batch_size_min = config.batch_size_min.min(batch_size);
        config.batch_size_max = config.batch_size_max.max(batch_size);
    }
    if let Some(seconds) = cli.time_budget {
        config.time_budget_seconds = Some(seconds);
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    if let Some(tokens) = cli.min_paragraph_tokens {
        config.min_paragraph_tokens = tokens;
    }
    if cli.blank_line_paragraphs {
        config.single_newline_breaks = false;
    }

    config.validate()?;
    Ok(config)
}

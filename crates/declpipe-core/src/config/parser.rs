//! TOML parser with helpful error messages

use std::path::Path;

use anyhow::{Context, Result};
use toml::Table;

use super::DeclpipeConfig;

/// Read one configuration layer without applying defaults.
pub fn parse_config_layer(path: &Path) -> Result<Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_layer_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_layer_str(content: &str) -> Result<Table> {
    toml::from_str(content).map_err(|e| enhance_toml_error(e, content))
}

/// Parse a complete configuration from a string.
pub fn parse_config_str(content: &str) -> Result<DeclpipeConfig> {
    from_table(parse_layer_str(content)?)
}

/// Deserialize a merged table, filling defaults, and validate it.
pub fn from_table(table: Table) -> Result<DeclpipeConfig> {
    let config: DeclpipeConfig = toml::Value::Table(table)
        .try_into()
        .context("Invalid configuration")?;
    config.validate()?;
    Ok(config)
}

pub fn to_toml(config: &DeclpipeConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration to TOML")
}

/// Enhance TOML parsing errors with the offending lines
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();

    match error.span() {
        Some(span) => {
            let line_num = (content[..span.start.min(content.len())].matches('\n').count() + 1)
                .min(content.lines().count().max(1));
            anyhow::anyhow!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                get_line_context(content, line_num),
                message
            )
        }
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

/// Get context lines around an error
fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2).min(lines.len());
    let end = (line_num + 1).min(lines.len());

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config_str(
            r#"
[manifest]
max_attempts = 8

[git]
ignored_dirty_patterns = [".pyc"]
"#,
        )
        .unwrap();
        assert_eq!(config.manifest.max_attempts, 8);
        assert_eq!(config.git.ignored_dirty_patterns, vec![".pyc"]);
        assert_eq!(config.files.pipeline, "orchestration-pipeline.yaml");
    }

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(parse_config_str("").unwrap(), DeclpipeConfig::default());
    }

    #[test]
    fn test_syntax_error_points_at_line() {
        let err = parse_config_str("[manifest]\nmax_attempts = \n").unwrap_err();
        let rendered = format!("{err:#}");
        assert!(rendered.contains("TOML parsing error at line"), "{rendered}");
        assert!(rendered.contains(">>>"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config_str("[manifest]\nmax_attempt = 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("max_attempt"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(parse_config_str("[manifest]\nmax_attempts = 0\n").is_err());
    }

    #[test]
    fn test_to_toml_reparses() {
        let config = DeclpipeConfig::default();
        let rendered = to_toml(&config).unwrap();
        assert_eq!(parse_config_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_parse_layer_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[files]\njobs_dir = \"tasks\"").unwrap();
        let layer = parse_config_layer(file.path()).unwrap();
        assert_eq!(layer["files"]["jobs_dir"].as_str(), Some("tasks"));
    }

    #[test]
    fn test_parse_nonexistent_file() {
        let err = parse_config_layer(Path::new("/nonexistent/declpipe.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

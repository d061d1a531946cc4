use anyhow::{Context, Result};
use std::path::Path;

/// Split a newline-delimited key list, dropping blank lines and `#` comments.
pub fn parse_key_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn read_key_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read key file {}", path.display()))?;
    Ok(parse_key_list(&content))
}

//! Publisher configuration

use std::collections::HashMap;
use std::path::Path;

/// Default number of job events per outbound message. The marking UPDATE
/// covers one bunch, so this also bounds the identifier array it binds.
pub const DEFAULT_BUNCH: usize = 1000;

/// Accounting-message settings, resolved from CLI flags with environment
/// fallbacks in `main`.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Site name reported in every message.
    pub site: String,
    /// Fallback submit host for jobs with no resolved gateway identity.
    pub cluster: String,
    /// Service level type label (the unit of the scaling factor).
    pub unit: String,
    /// Multiplier applied to per-host scaling factors.
    pub factor_constant: f64,
    /// Field whitelist. Empty means every known field.
    pub fields: Vec<String>,
    /// Events per message.
    pub bunch: usize,
}

impl PublisherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.site.is_empty() {
            anyhow::bail!("Site name must not be empty");
        }
        if self.bunch == 0 {
            anyhow::bail!("Message bunch size must be at least 1");
        }
        if self.factor_constant <= 0.0 {
            anyhow::bail!("Scaling factor constant must be positive");
        }
        Ok(())
    }
}

/// Load the VO-group mapping file: one `group vo` pair per line, blank
/// lines and `#` comments skipped.
pub fn load_vo_groups(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Couldn't read VO file {}: {}", path.display(), e))?;

    let mut groups = HashMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(group), Some(vo)) => {
                groups.insert(group.to_string(), vo.to_string());
            },
            _ => anyhow::bail!("Bad VO file line {}: '{}'", n + 1, line),
        }
    }
    Ok(groups)
}

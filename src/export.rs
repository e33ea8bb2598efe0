//! Writing a [`ModelBundle`] to disk, as plain JSON or as the browser module
//! the static page loads with a `<script>` tag.

use std::path::Path;

use eyre::{Result, WrapErr};
use tracing::info;

use crate::params::{ModelBundle, BROWSER_CONFIG_PREFIX};

/// On-disk representation of an exported bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    /// `window.APP_CONFIG = {...};`
    BrowserModule,
}

impl ExportFormat {
    /// `.js` files get the browser module, everything else plain JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("js") => Self::BrowserModule,
            _ => Self::Json,
        }
    }
}

pub fn render(bundle: &ModelBundle, format: ExportFormat) -> Result<String> {
    let json = serde_json::to_string_pretty(bundle).wrap_err("Failed to serialize model bundle")?;
    Ok(match format {
        ExportFormat::Json => json + "\n",
        ExportFormat::BrowserModule => format!("{BROWSER_CONFIG_PREFIX}{json};\n"),
    })
}

/// Write `bundle` to `path`, creating parent directories as needed.
pub fn write_bundle(bundle: &ModelBundle, path: &Path, format: ExportFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = render(bundle, format)?;
    std::fs::write(path, content)
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), ?format, "model bundle exported");
    Ok(())
}

pub fn write_bundle_json(bundle: &ModelBundle, path: &Path) -> Result<()> {
    write_bundle(bundle, path, ExportFormat::Json)
}

pub fn write_browser_module(bundle: &ModelBundle, path: &Path) -> Result<()> {
    write_bundle(bundle, path, ExportFormat::BrowserModule)
}

use std::path::{Path, PathBuf};

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::browser::{BrowserOptions, Device};

pub const DEFAULT_FILE: &str = "gallery.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub channel: String,
    pub catalog_path: PathBuf,
    pub full_limit: usize,
    pub incremental_limit: usize,
    pub device: Device,
    #[serde(default)]
    pub chrome_bin: Option<PathBuf>,
    pub headless: bool,
    pub probe_dimensions: bool,
}

impl Settings {
    /// Defaults, then `gallery.toml` if present, then `GALLERY_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_file(Path::new(DEFAULT_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("channel", "PostSovietPhotography")?
            .set_default("catalog_path", "data/images.json")?
            .set_default("full_limit", 10_000)?
            .set_default("incremental_limit", 500)?
            .set_default("device", "iphone")?
            .set_default("headless", true)?
            .set_default("probe_dimensions", true)?
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("GALLERY").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            chrome_bin: self.chrome_bin.clone(),
            headless: self.headless,
            ..BrowserOptions::default()
        }
    }
}

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use vaultdav_common::names::DEFAULT_CHUNK_FOLDER_PATTERN;
use vaultdav_common::FilenameClassifier;

use crate::paths::RootLocation;

/// Folder inside the account's WebDAV home that holds all backup data.
pub const DIRECTORY_ROOT: &str = ".SeedVaultAndroidBackup";

#[derive(Clone, Deserialize)]
pub struct WebDavConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_chunk_folder_pattern")]
    pub chunk_folder_pattern: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_root_dir() -> String {
    DIRECTORY_ROOT.to_string()
}

fn default_chunk_folder_pattern() -> String {
    DEFAULT_CHUNK_FOLDER_PATTERN.to_string()
}

impl fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("root_dir", &self.root_dir)
            .field("chunk_folder_pattern", &self.chunk_folder_pattern)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl WebDavConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            root_dir: default_root_dir(),
            chunk_folder_pattern: default_chunk_folder_pattern(),
            timeout_secs: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: WebDavConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("url must not be empty");
        }
        RootLocation::parse(&self.url)?;
        if self.root_dir.is_empty() {
            anyhow::bail!("root_dir must not be empty");
        }
        if self.root_dir.contains('/') {
            anyhow::bail!("root_dir must be a single folder name: {}", self.root_dir);
        }
        if let Err(e) = FilenameClassifier::new(&self.chunk_folder_pattern) {
            anyhow::bail!("invalid chunk_folder_pattern: {}", e);
        }
        if self.timeout_secs == Some(0) {
            anyhow::bail!("timeout_secs must be positive");
        }
        Ok(())
    }

    /// Location of the backup folder: `{url}/{root_dir}`.
    pub fn root_location(&self) -> anyhow::Result<RootLocation> {
        Ok(RootLocation::parse(&self.url)?.child(&self.root_dir))
    }

    pub fn classifier(&self) -> anyhow::Result<FilenameClassifier> {
        Ok(FilenameClassifier::new(&self.chunk_folder_pattern)?)
    }
}

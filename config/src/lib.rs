//! MeshCrypt Configuration
//!
//! Shared configuration crate for the MeshCrypt engine and CLI.
//!
//! Handles loading configuration from:
//! 1. MC_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.meshcrypt/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::{env, fs};

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<MeshCryptConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".meshcrypt";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_NETWORK: &str = "testnet";
const DEFAULT_ROOT_HISTORY_SIZE: usize = 100;
/// 0.0001 coin
const DEFAULT_FEE: u64 = 10_000;
const DEFAULT_CHANGE_INDEX_BASE: u32 = 1 << 20;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshCryptConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

/// Network selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// `mainnet`, `testnet` or `regtest`
    #[serde(default = "default_network")]
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NETWORK.into(),
        }
    }
}

fn default_network() -> String {
    DEFAULT_NETWORK.into()
}

/// Wallet engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Number of recent commitment tree roots accepted as anchors
    #[serde(default = "default_root_history_size")]
    pub root_history_size: usize,
    /// Fee in base units when the caller does not name one
    #[serde(default = "default_fee")]
    pub default_fee: u64,
    /// First diversifier index used for change addresses
    #[serde(default = "default_change_index_base")]
    pub change_index_base: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            root_history_size: DEFAULT_ROOT_HISTORY_SIZE,
            default_fee: DEFAULT_FEE,
            change_index_base: DEFAULT_CHANGE_INDEX_BASE,
        }
    }
}

fn default_root_history_size() -> usize {
    DEFAULT_ROOT_HISTORY_SIZE
}
fn default_fee() -> u64 {
    DEFAULT_FEE
}
fn default_change_index_base() -> u32 {
    DEFAULT_CHANGE_INDEX_BASE
}

/// Trial-decryption scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Spread trial decryption over the rayon pool
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

fn default_parallel() -> bool {
    true
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable {key}={v}"),
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl MeshCryptConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check MC_CONFIG env var
        if let Ok(path) = env::var("MC_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("MC_CONFIG points at missing file {}", path.display());
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.meshcrypt/config.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        env_string("MC_NETWORK", &mut self.network.name);

        env_parse("MC_ROOT_HISTORY_SIZE", &mut self.wallet.root_history_size);
        env_parse("MC_DEFAULT_FEE", &mut self.wallet.default_fee);
        env_parse("MC_CHANGE_INDEX_BASE", &mut self.wallet.change_index_base);

        if let Some(v) = env_bool("MC_SCAN_PARALLEL") {
            self.scanner.parallel = v;
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static MeshCryptConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Initialize the global config with a specific instance.
    ///
    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: MeshCryptConfig) -> Result<(), MeshCryptConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

/// Shorthand for `MeshCryptConfig::global()`.
#[inline]
pub fn global_config() -> &'static MeshCryptConfig {
    MeshCryptConfig::global()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = MeshCryptConfig::default();
        assert_eq!(config.network.name, DEFAULT_NETWORK);
        assert_eq!(config.wallet.root_history_size, DEFAULT_ROOT_HISTORY_SIZE);
        assert_eq!(config.wallet.default_fee, DEFAULT_FEE);
        assert!(config.scanner.parallel);
    }

    #[test]
    fn test_generate_sample() {
        let sample = MeshCryptConfig::generate_sample();
        assert!(sample.contains("[network]"));
        assert!(sample.contains("[wallet]"));
        assert!(sample.contains("[scanner]"));

        let parsed: MeshCryptConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed, MeshCryptConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: MeshCryptConfig = toml::from_str(
            r#"
            [wallet]
            root_history_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(parsed.wallet.root_history_size, 8);
        assert_eq!(parsed.wallet.default_fee, DEFAULT_FEE);
        assert_eq!(parsed.network.name, DEFAULT_NETWORK);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[network]\nname = \"regtest\"\n\n[scanner]\nparallel = false"
        )
        .unwrap();

        let config = MeshCryptConfig::parse_file(file.path()).unwrap();
        assert_eq!(config.network.name, "regtest");
        assert!(!config.scanner.parallel);
    }

    #[test]
    fn test_load_from_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[wallet]\nroot_history_size = \"many\"").unwrap();

        let err = MeshCryptConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use dirs::config_dir;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, io::Read as _};

pub const APP_DIR_NAME: &str = "codewright";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "secret.key";
pub const SERVERS_FILE_NAME: &str = "servers.json";
pub const PIPELINES_FILE_NAME: &str = "pipelines.json";
pub const INSTALL_CACHE_FILE_NAME: &str = "install_cache.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: std::collections::BTreeMap<String, Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Profile {
    pub provider: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Credential sealed with the local key file; mutually exclusive with
    /// `api_key` in practice, opened only at this config boundary.
    pub sealed_api_key: Option<String>,
    pub model: Option<String>,
}

pub fn app_config_dir() -> Result<PathBuf> {
    let base = config_dir().context("unable to resolve OS config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn key_file_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(KEY_FILE_NAME))
}

pub fn servers_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(SERVERS_FILE_NAME))
}

pub fn pipelines_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(PIPELINES_FILE_NAME))
}

pub fn install_cache_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(INSTALL_CACHE_FILE_NAME))
}

pub fn ensure_config_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating config dir: {}", parent.display()))?;
    }
    Ok(())
}

pub fn load_config_if_exists(path: &PathBuf) -> Result<Option<AppConfig>> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&text).context("parsing config TOML")?;
        Ok(Some(cfg))
    } else {
        Ok(None)
    }
}

pub fn write_config(path: &PathBuf, cfg: &AppConfig) -> Result<()> {
    ensure_config_parent_exists(path)?;
    let text = toml::to_string_pretty(cfg).context("serializing config to TOML")?;
    fs::write(path, text).with_context(|| format!("writing config file: {}", path.display()))?;
    Ok(())
}

/// Load a JSON registry file (servers, pipelines, install cache). A missing
/// file is an empty registry, not an error.
pub fn load_json_registry<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading registry file: {}", path.display()))?;
    let items: Vec<T> =
        serde_json::from_str(&text).with_context(|| format!("parsing registry JSON: {}", path.display()))?;
    Ok(items)
}

pub fn save_json_registry<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    ensure_config_parent_exists(path)?;
    let text = serde_json::to_string_pretty(items).context("serializing registry to JSON")?;
    fs::write(path, text).with_context(|| format!("writing registry file: {}", path.display()))?;
    Ok(())
}

// --- credential sealing ---
//
// Credentials at rest are base64(nonce || AES-256-GCM ciphertext), keyed by a
// 32-byte key file beside the config. Seal/open are explicit calls at the
// config boundary.

fn load_or_create_key_at(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        let mut key = [0u8; 32];
        let mut f = fs::File::open(path).with_context(|| format!("opening key file: {}", path.display()))?;
        f.read_exact(&mut key)
            .with_context(|| format!("key file too short: {}", path.display()))?;
        Ok(key)
    } else {
        ensure_config_parent_exists(path)?;
        let key: [u8; 32] = rand::random();
        fs::write(path, key).with_context(|| format!("writing key file: {}", path.display()))?;
        Ok(key)
    }
}

pub fn load_or_create_key() -> Result<[u8; 32]> {
    load_or_create_key_at(&key_file_path()?)
}

pub fn seal_with_key(key: &[u8; 32], plain: &str) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("invalid sealing key: {}", e))?;
    let nonce_bytes: [u8; 12] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plain.as_bytes())
        .map_err(|e| anyhow!("sealing credential failed: {}", e))?;
    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
}

pub fn open_with_key(key: &[u8; 32], sealed: &str) -> Result<String> {
    let combined = base64::engine::general_purpose::STANDARD
        .decode(sealed)
        .context("sealed credential is not valid base64")?;
    if combined.len() < 13 {
        bail!("sealed credential too short");
    }
    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("invalid sealing key: {}", e))?;
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| anyhow!("opening credential failed (wrong key or corrupted value)"))?;
    String::from_utf8(plain).context("opened credential is not valid UTF-8")
}

pub fn seal_credential(plain: &str) -> Result<String> {
    let key = load_or_create_key()?;
    seal_with_key(&key, plain)
}

pub fn open_credential(sealed: &str) -> Result<String> {
    let key = load_or_create_key()?;
    open_with_key(&key, sealed)
}

#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub provider: String,
    pub api_base: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
}

pub fn resolve_effective_settings(
    profile_override: Option<&str>,
    cli_provider: Option<&str>,
    cli_model: Option<&str>,
) -> Result<EffectiveSettings> {
    let path = default_config_path()?;
    let cfg = load_config_if_exists(&path)?;

    let mut provider: Option<String> = None;
    let mut api_base: Option<String> = None;
    let mut model: Option<String> = None;
    let mut api_key: Option<String> = None;

    if let Some(cfg) = cfg {
        let profile_name = profile_override
            .map(|s| s.to_string())
            .or(cfg.default_profile)
            .unwrap_or_else(|| "default".to_string());
        if let Some(p) = cfg.profiles.get(&profile_name) {
            if let Some(pv) = &p.provider {
                provider = Some(pv.clone());
            }
            if let Some(b) = &p.api_base {
                api_base = Some(b.clone());
            }
            if let Some(m) = &p.model {
                model = Some(m.clone());
            }
            if let Some(k) = &p.api_key {
                api_key = Some(k.clone());
            } else if let Some(sealed) = &p.sealed_api_key {
                api_key = Some(open_credential(sealed)?);
            }
        }
    }

    if let Some(cp) = cli_provider {
        provider = Some(cp.to_string());
    }
    if let Some(cm) = cli_model {
        model = Some(cm.to_string());
    }

    let provider = provider.unwrap_or_else(|| "mistral".to_string());
    let model = model.unwrap_or_else(|| "mistral-large-latest".to_string());

    Ok(EffectiveSettings { provider, api_base, model, api_key })
}

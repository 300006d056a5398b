//! 配置管理模块
//!
//! 使用 TOML 文件存储配置，遵循 XDG 规范：
//! - Linux: ~/.config/altlens/config.toml
//! - macOS: ~/Library/Application Support/com.altlens.Altlens/config.toml
//! - Windows: %APPDATA%\altlens\Altlens\config\config.toml
//!
//! 环境变量（可写在 .env 中）优先于文件：AI_BACKEND、HUGGINGFACE_API_KEY、
//! OLLAMA_HOST、OLLAMA_PORT、OLLAMA_MODEL、IMAGE_DIR。

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// 重新导出各模块配置
pub use crate::ai::huggingface::HuggingFaceConfig;
pub use crate::ai::ollama::OllamaConfig;
pub use crate::pipeline::PipelineConfig;

use crate::ai::BackendKind;

/// 后端选择
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// huggingface 或 ollama
    #[serde(default)]
    pub kind: BackendKind,
}

/// 应用配置（顶层结构）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 后端选择
    #[serde(default)]
    pub backend: BackendConfig,
    /// 远程托管 API 配置
    #[serde(default)]
    pub huggingface: HuggingFaceConfig,
    /// 本地守护进程配置
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// 流水线配置
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// 获取配置目录路径
    pub fn config_dir() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("com", "altlens", "Altlens") {
            Ok(proj_dirs.config_dir().to_path_buf())
        } else {
            // 回退到 ~/.altlens
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot find home directory"))?;
            Ok(home.join(".altlens"))
        }
    }

    /// 获取配置文件完整路径
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// 加载配置：.env → 配置文件 → 环境变量覆盖
    ///
    /// 未指定路径且默认文件不存在时，创建默认配置文件
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(p) => debug!("Loaded environment from {}", p.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("Failed to load .env file: {}", e),
        }

        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => {
                let p = Self::config_path()?;
                if p.exists() {
                    Self::load_from(&p)?
                } else {
                    info!("Config file not found, creating default at: {}", p.display());
                    let config = Self::default();
                    config.save_to(&p)?;
                    config
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 从指定文件加载
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from: {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Config loaded from: {}", path.display());
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(kind) = var("AI_BACKEND") {
            self.backend.kind = kind
                .parse()
                .map_err(|e: String| anyhow!("Invalid AI_BACKEND: {}", e))?;
        }
        if let Some(key) = var("HUGGINGFACE_API_KEY") {
            self.huggingface.api_key = Some(key);
        }
        if let Some(host) = var("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Some(port) = var("OLLAMA_PORT") {
            self.ollama.port = port
                .parse()
                .with_context(|| format!("Invalid OLLAMA_PORT '{}'", port))?;
        }
        if let Some(model) = var("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Some(dir) = var("IMAGE_DIR") {
            self.pipeline.image_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let dir = path.parent().ok_or_else(|| anyhow!("Invalid config path"))?;

        // 确保目录存在
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            debug!("Created config directory: {}", dir.display());
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, &content)?;

        // 设置文件权限 (Unix only) - 可能包含 API 密钥，仅用户可读写
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        info!("Config saved to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.backend.kind, BackendKind::RemoteHosted);
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.ollama.model, "llava");
        assert_eq!(config.pipeline.concurrency, 1);
        assert!(config.huggingface.api_key.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[backend]"));
        assert!(toml_str.contains("[ollama]"));
        assert!(toml_str.contains("kind = \"huggingface\""));

        // 反序列化回来
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.ollama.model, config.ollama.model);
        assert_eq!(parsed.pipeline.image_dir, config.pipeline.image_dir);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [backend]
            kind = "ollama"

            [ollama]
            model = "moondream"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.backend.kind, BackendKind::LocalDaemon);
        assert_eq!(parsed.ollama.model, "moondream");
        assert_eq!(parsed.ollama.host, "127.0.0.1");
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        assert!(toml::from_str::<AppConfig>("[backend]\nkind = \"gpt\"").is_err());

        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [("AI_BACKEND", "gpt")].into();
        assert!(config.apply_env(|k| env.get(k).map(|v| v.to_string())).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("AI_BACKEND", "ollama"),
            ("HUGGINGFACE_API_KEY", "hf_test"),
            ("OLLAMA_HOST", "gpu-box"),
            ("OLLAMA_PORT", "8080"),
            ("IMAGE_DIR", "  "),
        ]
        .into();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.backend.kind, BackendKind::LocalDaemon);
        assert_eq!(config.huggingface.api_key.as_deref(), Some("hf_test"));
        assert_eq!(config.ollama.base_url(), "http://gpu-box:8080");
        // 空白值不覆盖
        assert_eq!(config.pipeline.image_dir, PathBuf::from("static/images"));
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.ollama.model = "qwen2.5vl:3b".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.ollama.model, "qwen2.5vl:3b");
    }
}

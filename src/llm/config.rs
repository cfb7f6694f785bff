//! Provider 配置加载
//!
//! YAML 中的 `providers` 段给出默认值，环境变量覆盖端点与凭据，格式：
//! ```text
//! BOT_PROVIDER_<ROLE>_MODEL=openai/gpt-4.1
//! BOT_PROVIDER_<ROLE>_BASEURL=https://models.github.ai/inference
//! BOT_PROVIDER_<ROLE>_APIKEY=ghp_...
//! BOT_PROVIDER_<ROLE>_LABEL=OpenAI
//! ```
//! `<ROLE>` 为 `PRIMARY` 或 `SECONDARY`，不区分大小写。未单独配置的凭据回落到 `GITHUB_TOKEN`。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

const PREFIX: &str = "BOT_PROVIDER_";
const SHARED_TOKEN_VAR: &str = "GITHUB_TOKEN";

/// 单个上游模型的连接与采样配置
///
/// YAML 中只写部分字段时，其余字段取该角色（主 / 备）的预设值。
#[derive(Debug, Serialize, Clone)]
pub struct ProviderConfig {
    /// 日志与回复标签中使用的展示名（如 `Grok-3`）
    pub label: String,
    /// LLM 接口中使用的模型名（如 `openai/gpt-4.1`）
    pub model: String,
    /// 接口根地址，请求发往 `<baseurl>/chat/completions`
    pub baseurl: String,
    #[serde(skip_serializing)]
    pub apikey: String,
    /// 是否随请求发送工具目录
    pub send_tools: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    /// 主 provider 默认值：带工具调用的 GPT-4.1
    pub fn primary() -> Self {
        Self {
            label: "OpenAI".to_string(),
            model: "openai/gpt-4.1".to_string(),
            baseurl: "https://models.github.ai/inference".to_string(),
            apikey: String::new(),
            send_tools: true,
            temperature: Some(0.7),
            top_p: None,
            max_tokens: Some(1000),
        }
    }

    /// 备用 provider 默认值：不带工具的 Grok-3
    pub fn secondary() -> Self {
        Self {
            label: "Grok-3".to_string(),
            model: "xai/grok-3".to_string(),
            baseurl: "https://models.github.ai/inference".to_string(),
            apikey: String::new(),
            send_tools: false,
            temperature: Some(1.0),
            top_p: Some(1.0),
            max_tokens: None,
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.baseurl.trim_end_matches('/'))
    }
}

/// YAML 中出现的字段，缺失的字段由角色预设补齐
#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialProviderConfig {
    label: Option<String>,
    model: Option<String>,
    baseurl: Option<String>,
    apikey: Option<String>,
    send_tools: Option<bool>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
}

impl PartialProviderConfig {
    fn over(self, mut preset: ProviderConfig) -> ProviderConfig {
        if let Some(label) = self.label {
            preset.label = label;
        }
        if let Some(model) = self.model {
            preset.model = model;
        }
        if let Some(baseurl) = self.baseurl {
            preset.baseurl = baseurl;
        }
        if let Some(apikey) = self.apikey {
            preset.apikey = apikey;
        }
        if let Some(send_tools) = self.send_tools {
            preset.send_tools = send_tools;
        }
        preset.temperature = self.temperature.or(preset.temperature);
        preset.top_p = self.top_p.or(preset.top_p);
        preset.max_tokens = self.max_tokens.or(preset.max_tokens);
        preset
    }
}

fn primary_over_preset<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialProviderConfig::deserialize(deserializer).map(|p| p.over(ProviderConfig::primary()))
}

fn secondary_over_preset<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialProviderConfig::deserialize(deserializer).map(|p| p.over(ProviderConfig::secondary()))
}

/// 主备两个 provider 的配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    #[serde(deserialize_with = "primary_over_preset")]
    pub primary: ProviderConfig,
    #[serde(deserialize_with = "secondary_over_preset")]
    pub secondary: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::primary(),
            secondary: ProviderConfig::secondary(),
        }
    }
}

impl ProvidersConfig {
    /// 用环境变量覆盖各 provider 的字段，并校验凭据存在
    pub fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        let mut overrides: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut shared_token = None;
        for (key, value) in vars {
            if key == SHARED_TOKEN_VAR {
                shared_token = Some(value);
                continue;
            }
            let Some(suffix) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let parts: Vec<&str> = suffix.split('_').collect();
            if parts.len() != 2 {
                return Err(ConfigError::EnvFormatError(key).into());
            }
            let role = parts[0].to_lowercase();
            let field = parts[1].to_lowercase();
            if !matches!(role.as_str(), "primary" | "secondary")
                || !matches!(field.as_str(), "model" | "baseurl" | "apikey" | "label")
            {
                return Err(ConfigError::EnvFormatError(key).into());
            }
            overrides.entry(role).or_default().insert(field, value);
        }

        for (role, provider) in [
            ("primary", &mut self.primary),
            ("secondary", &mut self.secondary),
        ] {
            if let Some(fields) = overrides.get(role) {
                for (field, value) in fields {
                    match field.as_str() {
                        "model" => provider.model = value.clone(),
                        "baseurl" => provider.baseurl = value.clone(),
                        "apikey" => provider.apikey = value.clone(),
                        "label" => provider.label = value.clone(),
                        _ => {}
                    }
                }
            }
            if provider.apikey.trim().is_empty()
                && let Some(token) = &shared_token
            {
                provider.apikey = token.clone();
            }
            if provider.apikey.trim().is_empty() {
                return Err(ConfigError::MissingCredential(provider.label.clone()).into());
            }
        }
        Ok(())
    }
}

use std::fmt;

/// brain_bot 的统一错误类型
///
/// 运行期的请求处理路径不会把错误抛给调用方（全部在内部记录日志后降级），
/// 只有配置加载、启动阶段才会以 `Err` 形式返回。
#[derive(Debug)]
pub enum BotError {
    /// LLM 相关错误
    Llm(LlmError),
    /// 工具执行错误
    Tool(ToolError),
    /// 记忆持久化错误
    Memory(MemoryError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// LLM 相关错误
#[derive(Debug)]
pub enum LlmError {
    /// 网络请求失败
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 被上游限流（429），附带尽力解析出的等待提示
    RateLimited { retry_after: String },
    /// 请求超时
    Timeout(u64),
    /// 响应格式无效
    InvalidResponse(String),
    /// 没有返回内容
    EmptyResponse,
}

/// 工具执行错误
#[derive(Debug)]
pub enum ToolError {
    /// 工具未找到
    NotFound(String),
    /// 参数缺失
    MissingParameter(String),
    /// 工具执行失败
    ExecutionFailed { tool: String, message: String },
    /// 工具执行超时
    Timeout(String),
}

/// 记忆持久化错误
#[derive(Debug)]
pub enum MemoryError {
    IoError(String),
    SerializationError(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 环境变量名格式不符合 `BOT_PROVIDER_<ROLE>_<KEY>`
    EnvFormatError(String),
    /// 缺少 provider 凭据，进程拒绝启动
    MissingCredential(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::Llm(e) => write!(f, "LLM Error: {}", e),
            BotError::Tool(e) => write!(f, "Tool Error: {}", e),
            BotError::Memory(e) => write!(f, "Memory Error: {}", e),
            BotError::Config(e) => write!(f, "Config Error: {}", e),
            BotError::Io(e) => write!(f, "IO Error: {}", e),
            BotError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            LlmError::RateLimited { retry_after } => {
                write!(f, "Rate limited, retry after {} seconds", retry_after)
            }
            LlmError::Timeout(secs) => write!(f, "Request timed out after {}s", secs),
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            LlmError::EmptyResponse => write!(f, "Empty response from LLM"),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool '{}' not found", name),
            ToolError::MissingParameter(name) => write!(f, "Missing parameter: {}", name),
            ToolError::ExecutionFailed { tool, message } => {
                write!(f, "Tool '{}' execution failed: {}", tool, message)
            }
            ToolError::Timeout(name) => write!(f, "Tool '{}' timed out", name),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::IoError(msg) => write!(f, "IO error: {}", msg),
            MemoryError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::EnvFormatError(key) => {
                write!(f, "Malformed environment variable: {}", key)
            }
            ConfigError::MissingCredential(provider) => {
                write!(f, "Missing API credential for provider '{}'", provider)
            }
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for BotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BotError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for LlmError {}
impl std::error::Error for ToolError {}
impl std::error::Error for MemoryError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Io(err)
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BotError::Llm(LlmError::NetworkError("Request timeout".to_string()))
        } else if err.is_connect() {
            BotError::Llm(LlmError::NetworkError(format!(
                "Connection failed: {}",
                err
            )))
        } else {
            BotError::Llm(LlmError::NetworkError(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Memory(MemoryError::SerializationError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for BotError {
    fn from(err: serde_yaml::Error) -> Self {
        BotError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<LlmError> for BotError {
    fn from(err: LlmError) -> Self {
        BotError::Llm(err)
    }
}

impl From<ToolError> for BotError {
    fn from(err: ToolError) -> Self {
        BotError::Tool(err)
    }
}

impl From<MemoryError> for BotError {
    fn from(err: MemoryError) -> Self {
        BotError::Memory(err)
    }
}

impl From<ConfigError> for BotError {
    fn from(err: ConfigError) -> Self {
        BotError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, BotError>;

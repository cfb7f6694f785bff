mod client;
pub mod config;
pub mod provider;
pub mod types;

use crate::error::{BotError, Result};
use crate::llm::config::ProviderConfig;
use reqwest::header::HeaderMap;

pub use client::parse_retry_hint;
pub use provider::{OpenAiCompatProvider, Provider, ProviderCallResult, RequestedToolCall};

pub fn assemble_req_header(provider: &ProviderConfig) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();

    header_map.insert(
        "Authorization",
        format!("Bearer {}", provider.apikey)
            .parse()
            .map_err(|_| BotError::Other("Invalid Authorization header".to_string()))?,
    );
    header_map.insert(
        "Content-Type",
        "application/json"
            .parse()
            .map_err(|e| BotError::Other(format!("Invalid Content-Type header: {}", e)))?,
    );
    Ok(header_map)
}

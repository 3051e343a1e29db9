//! Tools the forensic agent can call:
//! - `analyse-image-tool`: image description plus deepfake judgement
//! - `tavily_search`: web search

pub mod analyse_image;
pub mod tavily;

pub use analyse_image::{AnalyseImageTool, ANALYSE_IMAGE_TOOL};
pub use tavily::{SearchResponse, SearchResult, TavilySearchTool, TAVILY_SEARCH_TOOL};

use crate::config::AppConfig;
use crate::error::Result;
use crate::tool::ToolRegistry;

/// Registry with the agent's own tools. Both need their API keys configured.
pub fn forensic_toolkit(cfg: &AppConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(AnalyseImageTool::from_config(&cfg.forensics)?);
    registry.register(TavilySearchTool::from_config(&cfg.search)?);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForensicError;

    #[test]
    fn toolkit_registers_both_tools() {
        let mut cfg = AppConfig::default();
        cfg.forensics.mistral_api_key = Some("mistral-test".into());
        cfg.search.api_key = Some("tvly-test".into());

        let registry = forensic_toolkit(&cfg).unwrap();
        assert_eq!(registry.names(), vec![ANALYSE_IMAGE_TOOL, TAVILY_SEARCH_TOOL]);
    }

    #[test]
    fn toolkit_needs_credentials() {
        let err = forensic_toolkit(&AppConfig::default()).err().unwrap();
        assert!(matches!(err, ForensicError::Config(_)));
    }
}

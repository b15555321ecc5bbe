use std::net::IpAddr;
use std::path::PathBuf;

use super::target::LOOPBACK_HOST;

pub(crate) const DEFAULT_SUCCESS_HTML: &str = include_str!("html/success.html");
pub(crate) const DEFAULT_ERROR_HTML: &str = include_str!("html/error.html");

#[derive(Debug, Clone)]
pub struct LocalServerConfig {
    pub host: IpAddr,
    /// Directory holding `index.html` and its assets. Built-in pages are
    /// served when unset.
    pub serve_root: Option<PathBuf>,
    pub success_html: String,
    pub error_html: String,
}

impl Default for LocalServerConfig {
    fn default() -> Self {
        Self {
            host: LOOPBACK_HOST,
            serve_root: None,
            success_html: DEFAULT_SUCCESS_HTML.to_string(),
            error_html: DEFAULT_ERROR_HTML.to_string(),
        }
    }
}

impl LocalServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serve_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.serve_root = Some(root.into());
        self
    }

    pub fn with_success_html(mut self, html: impl Into<String>) -> Self {
        self.success_html = html.into();
        self
    }

    pub fn with_error_html(mut self, html: impl Into<String>) -> Self {
        self.error_html = html.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::LocalServerConfig;

    #[test]
    fn defaults_to_loopback_with_builtin_pages() {
        let config = LocalServerConfig::new();
        assert!(config.host.is_loopback());
        assert!(config.serve_root.is_none());
        assert!(config.success_html.contains("signed in"));
    }
}

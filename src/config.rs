use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub assemble: AssembleConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on `@odata.nextLink` pages followed per children listing.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base(),
            timeout_secs: default_timeout_secs(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_graph_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_pages() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Document-library folder that anchors site-navigation URLs.
    #[serde(default = "default_library_folder")]
    pub library_folder: String,
    /// Share-link marker letters; `"f"` matches a `/:f:/` path segment.
    #[serde(default = "default_share_markers")]
    pub share_markers: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            library_folder: default_library_folder(),
            share_markers: default_share_markers(),
        }
    }
}

fn default_library_folder() -> String {
    "Shared Documents".to_string()
}
fn default_share_markers() -> Vec<String> {
    vec!["f".to_string(), "u".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PermissionsConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssembleConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    #[default]
    Disabled,
    Tesseract,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default)]
    pub ocr: OcrMode,
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            ocr: OcrMode::Disabled,
            tesseract_path: default_tesseract_path(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}
fn default_max_file_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Character ceiling applied to the assembled context before the model call.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    120_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model id (`openai`) or deployment name (`azure`). Falls back to
    /// `AZURE_OPENAI_DEPLOYMENT` for Azure when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Azure resource endpoint. Falls back to `AZURE_OPENAI_ENDPOINT`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            endpoint: None,
            api_version: default_api_version(),
            base_url: default_openai_base(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_llm_provider() -> String {
    "azure".to_string()
}
fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_tokens() -> u32 {
    1500
}
fn default_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_system_prompt() -> String {
    "You answer questions using only the documents provided by the user. \
     Each document starts with a line of the form `--- file name ---`. \
     Cite the file names you relied on. If the documents do not contain the \
     answer, say so."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Loads and validates the TOML config at `path`.
///
/// A missing file is not an error: every section has defaults, so the
/// binary runs without any config when the environment provides the model
/// credentials.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parses and validates config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.permissions.concurrency == 0 {
        anyhow::bail!("permissions.concurrency must be >= 1");
    }
    if config.assemble.concurrency == 0 {
        anyhow::bail!("assemble.concurrency must be >= 1");
    }
    if config.context.max_chars == 0 {
        anyhow::bail!("context.max_chars must be > 0");
    }
    if config.graph.max_pages == 0 {
        anyhow::bail!("graph.max_pages must be >= 1");
    }
    if config.resolver.library_folder.trim().is_empty() {
        anyhow::bail!("resolver.library_folder must not be empty");
    }
    if config.resolver.share_markers.is_empty() {
        anyhow::bail!("resolver.share_markers must list at least one marker");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.llm.provider.as_str() {
        "azure" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be azure or openai.",
            other
        ),
    }

    Ok(config)
}

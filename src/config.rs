//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCRIBE__*` 覆盖（双下划线表示嵌套，如 `SCRIBE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub pipeline: PipelineSection,
    pub fetch: FetchSection,
    pub search: SearchSection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；实际选择还取决于是否设置了 API Key
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmModelOverride,
    #[serde(default)]
    pub openai: LlmModelOverride,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmModelOverride::default(),
            openai: LlmModelOverride::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelOverride {
    pub model: Option<String>,
}

/// [agent] 段：工具调用循环
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单次 Agent 运行的最大 LLM 调用次数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_max_steps() -> usize {
    8
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [pipeline] 段：并发、重试、超时与阶段指令
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// 同时运行的流水线上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 每个阶段失败后的额外重试次数（0 表示不重试）
    #[serde(default)]
    pub stage_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default)]
    pub instructions: InstructionsSection,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stage_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            instructions: InstructionsSection::default(),
        }
    }
}

fn default_max_concurrent() -> usize {
    8
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_stage_timeout_secs() -> u64 {
    300
}

/// [pipeline.instructions] 段：三个阶段的 Agent 指令。
/// extract 中的 `{query}` 会被替换为原始查询。
#[derive(Debug, Clone, Deserialize)]
pub struct InstructionsSection {
    #[serde(default = "default_discover_instructions")]
    pub discover: String,
    #[serde(default = "default_extract_instructions")]
    pub extract: String,
    #[serde(default = "default_synthesize_instructions")]
    pub synthesize: String,
}

impl Default for InstructionsSection {
    fn default() -> Self {
        Self {
            discover: default_discover_instructions(),
            extract: default_extract_instructions(),
            synthesize: default_synthesize_instructions(),
        }
    }
}

fn default_discover_instructions() -> String {
    "You are a web search agent. Browse the web for information about the user's request \
     and report what you found, including the URLs of the most relevant pages."
        .to_string()
}

fn default_extract_instructions() -> String {
    "You find one specific URL in the given input, then fetch that page with the fetch_page tool \
     to gather more information on: {query}"
        .to_string()
}

fn default_synthesize_instructions() -> String {
    "You are a tutorial writer. Generate a clear, step-by-step tutorial from the given scraped content."
        .to_string()
}

/// [fetch] 段：页面抓取
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// 抽取文本的最大字符数，超出截断
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_chars: default_max_chars(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_chars() -> usize {
    8000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

/// [search] 段：Discover 阶段可选的搜索端点；未配置时 Discover 不带工具
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// 如 https://html.duckduckgo.com/html/
    pub endpoint: Option<String>,
    #[serde(default = "default_query_param")]
    pub query_param: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            query_param: default_query_param(),
        }
    }
}

fn default_query_param() -> String {
    "q".to_string()
}

/// [storage] 段：持久化结果的 SQLite 路径；未设置时使用内存存储
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageSection {
    pub db_path: Option<PathBuf>,
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

/// 从 config 目录加载配置，环境变量 SCRIBE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCRIBE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCRIBE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

//! 工具箱：注册表、执行器、页面抓取与搜索

pub mod executor;
pub mod fetch;
pub mod registry;
pub mod schema;
pub mod search;

pub use executor::ToolExecutor;
pub use fetch::{FetchPageTool, FetchedSource, HttpFetcher, PageFetcher, SourceSlot};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use search::WebSearchTool;

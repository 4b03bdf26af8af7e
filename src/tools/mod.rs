//! 工具箱：注册表与本地工具（write_code / read_file / terminal_run）

pub mod read_file;
pub mod registry;
pub mod terminal_run;
pub mod write_code;

pub use read_file::ReadFileTool;
pub use registry::{Tool, ToolContext, ToolMeta, ToolRegistry, ToolSpec};
pub use terminal_run::TerminalRunTool;
pub use write_code::WriteCodeTool;

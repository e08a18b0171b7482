//! 核心模块
//!
//! 包含桥接层的核心功能：
//! - `engine` - `WebviewCore` 实例和生命周期
//! - `dispatcher` - 线程亲和调度
//! - `registry` - 绑定注册表
//! - `error` - 错误类型定义
//! - `environment` / `logging` - 运行环境检查和日志初始化

pub mod dispatcher;
pub mod engine;
pub mod environment;
pub mod error;
pub mod logging;
pub mod registry;

// 重新导出错误类型
pub use error::{EngineStatus, WebviewError, WebviewResult};

// 重新导出主要类型
pub use dispatcher::{Completion, ErrorHandler, LifecycleState, WebviewDispatcher};
pub use engine::{CoreOptions, WebviewCore};
pub use logging::initialize_logging;
pub use registry::BindingRegistry;

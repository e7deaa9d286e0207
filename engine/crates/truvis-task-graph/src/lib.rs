//! GPU 任务图编译器
//!
//! 根据任务声明的资源访问推导执行顺序，生成 barrier、队列族所有权转移和跨队列 semaphore。
//! 本 crate 只产生数据，不创建 vulkan 对象，也不提交命令。
//!
//! - `arena`: 带代数校验的节点存储
//! - `task_graph`: 构建、hazard 分析、拓扑排序、同步合成
//! - `config`: 可从 TOML 读取的配置

/// 打开 `profiling` feature 时创建 tracy span
#[cfg(feature = "profiling")]
macro_rules! profile_span {
    ($name:literal) => {
        tracy_client::span!($name)
    };
}

#[cfg(not(feature = "profiling"))]
macro_rules! profile_span {
    ($name:literal) => {
        ()
    };
}

pub mod arena;
pub mod config;
pub mod task_graph;

pub use config::TaskGraphConfig;

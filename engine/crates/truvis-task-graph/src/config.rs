use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 任务图的配置
///
/// 可以从 TOML 文件读取，缺失的字段使用默认值：
///
/// ```toml
/// node_capacity = 4096
/// print_execution_plan = true
/// validate_usages = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskGraphConfig {
    /// 节点 arena 的容量上限，`None` 时只受 handle 的 index 位宽限制
    pub node_capacity: Option<u32>,

    /// 编译成功后通过 `log::info!` 打印执行计划
    pub print_execution_plan: bool,

    /// `add_node` 时检查资源使用是否合法
    pub validate_usages: bool,
}

impl Default for TaskGraphConfig {
    fn default() -> Self {
        Self {
            node_capacity: None,
            print_execution_plan: false,
            validate_usages: true,
        }
    }
}

impl TaskGraphConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("解析任务图配置失败")
    }

    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

        toml::from_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置失败")
    }
}

//! Truvis 工具集
//!
//! 提供日志初始化等通用工具，供各个 crate 以及它们的测试共享。

pub mod init_log;

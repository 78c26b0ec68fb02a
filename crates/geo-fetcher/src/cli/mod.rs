//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `geocode` - 地址转坐标（多个地址时批量执行）
//! - `reverse` - 坐标转地点
//! - `weather` - 查询当前天气
//! - `invalidate` - 按前缀或单个键清除缓存
//!
//! # 使用示例
//!
//! ```bash
//! geo-fetcher geocode "Brandenburger Tor, Berlin" "Marienplatz, München"
//! geo-fetcher reverse 52.5163 13.3777
//! geo-fetcher weather -- -33.8688 151.2093
//! geo-fetcher invalidate "geocode:*"
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;

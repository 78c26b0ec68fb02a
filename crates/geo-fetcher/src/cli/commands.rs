//! CLI 命令定义

use clap::{Parser, Subcommand};

/// 地理编码与天气查询工具
///
/// 所有查询都经过缓存；配置从 `config/` 目录和 `QUESTLINE_` 前缀的环境变量加载。
#[derive(Parser, Debug)]
#[command(name = "geo-fetcher")]
#[command(version, about = "带缓存的地理编码与天气查询工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件中的设置 (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 地址转坐标
    ///
    /// 传入多个地址时按配置的并发上限分组执行，单个地址失败不影响其他地址。
    Geocode {
        /// 一个或多个地址
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// 坐标转地点
    Reverse {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },

    /// 查询当前天气
    Weather {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },

    /// 清除缓存
    ///
    /// 以 `*` 结尾时按前缀删除（如 `geocode:*`），否则删除单个键。
    Invalidate {
        /// 缓存键或前缀
        pattern: String,
    },
}

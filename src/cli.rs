use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "tracklink",
    version,
    about = "按链接或搜索词排队播放在线音频，带流地址缓存"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// 覆盖数据目录（默认走系统 data_local_dir）
    #[arg(long, env = "TRACKLINK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 覆盖日志目录（默认 `{data_dir}/logs`）
    #[arg(long, env = "TRACKLINK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// 覆盖日志过滤（等价于设置 RUST_LOG）
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// 覆盖缓存文件路径（默认 `{data_dir}/cache.json`）
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// 不出声，按时长模拟播放
    #[arg(long, env = "TRACKLINK_NO_AUDIO")]
    pub no_audio: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 交互式播放（默认）
    Play {
        /// 点歌人名字
        #[arg(long, default_value = "local")]
        requester: String,
    },

    /// 打印缓存统计
    Stats,

    /// 重新解析全部缓存条目
    Check {
        /// 同时核对搜索词别名
        #[arg(long)]
        search_keys: bool,

        /// 删除无法解析的条目
        #[arg(long)]
        prune: bool,
    },

    /// 从 JSON 数组导入缓存记录
    Import { file: PathBuf },

    /// 导出缓存到文件
    Export { file: PathBuf },

    /// 手动把搜索词绑定到视频链接
    AddKey { query: String, video_url: String },

    /// 删除一个缓存条目
    RemoveEntry { canonical_id: String },
}

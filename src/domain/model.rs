use std::fmt;

use chrono::{DateTime, Utc};

use super::alias;

/// 一次解析得到的曲目信息
///
/// 作为不可变值使用：刷新时整体替换，不在原值上修改字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    /// 视频页面地址，条目的主键
    pub canonical_id: String,
    /// 可直接播放的媒体地址，会过期
    pub stream_url: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: u64,
    pub resolved_at: DateTime<Utc>,
}

impl TrackMetadata {
    pub fn new(
        canonical_id: impl Into<String>,
        stream_url: impl Into<String>,
        title: impl Into<String>,
        uploader: impl Into<String>,
        duration_secs: u64,
    ) -> Self {
        Self {
            canonical_id: canonical_id.into(),
            stream_url: stream_url.into(),
            title: title.into(),
            uploader: uploader.into(),
            duration_secs,
            resolved_at: Utc::now(),
        }
    }
}

/// 用户输入的曲目引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Url(String),
    Search(String),
}

impl Reference {
    /// 去掉首尾空白后按形态分类，空输入返回 None
    pub fn parse(input: &str) -> Option<Self> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        if alias::is_url(text) {
            Some(Self::Url(text.to_owned()))
        } else {
            Some(Self::Search(text.to_owned()))
        }
    }

    /// 缓存查找用的别名，与 `normalize_alias` 一致
    pub fn alias_key(&self) -> String {
        alias::normalize_alias(self.as_str())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(s) | Self::Search(s) => s,
        }
    }
}

/// 点歌人
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester {
    pub id: String,
    pub display_name: String,
}

impl Requester {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// `1h 2m 3s` / `2m 3s` / `3s`
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

//! 缓存文件读写
//!
//! 当前格式是记录数组；旧格式是以别名为键的对象，加载时转换成单别名记录。
//! 写入先落到 `.tmp` 再 rename，失败时磁盘上的旧文件保持完整。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::TrackMetadata;
use crate::error::CacheError;

/// 缓存文件中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub keys: Vec<String>,
    pub url: String,
    pub webpage_url: String,
    pub title: String,
    #[serde(deserialize_with = "lenient_duration")]
    pub duration: u64,
    #[serde(deserialize_with = "nullable_string")]
    pub uploader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// 旧格式的值部分，别名在外层键上
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    url: String,
    webpage_url: String,
    title: String,
    #[serde(deserialize_with = "lenient_duration")]
    duration: u64,
    #[serde(deserialize_with = "nullable_string")]
    uploader: String,
}

impl CacheRecord {
    pub fn from_parts(meta: &TrackMetadata, keys: Vec<String>) -> Self {
        Self {
            keys,
            url: meta.stream_url.clone(),
            webpage_url: meta.canonical_id.clone(),
            title: meta.title.clone(),
            duration: meta.duration_secs,
            uploader: meta.uploader.clone(),
            resolved_at: Some(meta.resolved_at),
        }
    }

    pub fn to_metadata(&self) -> TrackMetadata {
        TrackMetadata {
            canonical_id: self.webpage_url.clone(),
            stream_url: self.url.clone(),
            title: self.title.clone(),
            uploader: self.uploader.clone(),
            duration_secs: self.duration,
            resolved_at: self.resolved_at.unwrap_or_else(Utc::now),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.webpage_url.trim().is_empty() {
            return Err("webpage_url 为空".to_owned());
        }
        if self.url.trim().is_empty() {
            return Err("url 为空".to_owned());
        }
        Ok(())
    }
}

/// 被跳过的记录：在输入中的下标和原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

/// 解析结果：有效记录 + 被跳过的记录
#[derive(Debug, Default)]
pub struct ParsedRecords {
    pub records: Vec<CacheRecord>,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在视为空缓存
    pub fn load(&self) -> Result<ParsedRecords, CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "缓存文件不存在，从空缓存开始");
                return Ok(ParsedRecords::default());
            }
            Err(e) => return Err(e.into()),
        };
        parse_records(&bytes)
    }

    pub fn save(&self, records: &[CacheRecord]) -> Result<(), CacheError> {
        write_atomic(&self.path, records)
    }
}

/// 接受数组或旧式对象
pub fn parse_records(bytes: &[u8]) -> Result<ParsedRecords, CacheError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(items) => Ok(parse_list(items)),
        Value::Object(map) => {
            let mut parsed = ParsedRecords::default();
            for (index, (key, value)) in map.into_iter().enumerate() {
                match serde_json::from_value::<LegacyRecord>(value) {
                    Ok(legacy) => {
                        let record = CacheRecord {
                            keys: vec![key],
                            url: legacy.url,
                            webpage_url: legacy.webpage_url,
                            title: legacy.title,
                            duration: legacy.duration,
                            uploader: legacy.uploader,
                            resolved_at: None,
                        };
                        push_validated(&mut parsed, index, record);
                    }
                    Err(e) => parsed.skipped.push(SkippedRecord {
                        index,
                        reason: format!("字段不匹配: {e}"),
                    }),
                }
            }
            Ok(parsed)
        }
        other => Err(CacheError::Format(format!(
            "顶层必须是数组或对象，实际是 {}",
            json_kind(&other)
        ))),
    }
}

/// 导入只接受数组
pub fn parse_import(bytes: &[u8]) -> Result<ParsedRecords, CacheError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(items) => Ok(parse_list(items)),
        other => Err(CacheError::Format(format!(
            "导入文件顶层必须是数组，实际是 {}",
            json_kind(&other)
        ))),
    }
}

fn parse_list(items: Vec<Value>) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<CacheRecord>(item) {
            Ok(record) => push_validated(&mut parsed, index, record),
            Err(e) => parsed.skipped.push(SkippedRecord {
                index,
                reason: format!("字段不匹配: {e}"),
            }),
        }
    }
    parsed
}

fn push_validated(parsed: &mut ParsedRecords, index: usize, record: CacheRecord) {
    match record.validate() {
        Ok(()) => parsed.records.push(record),
        Err(reason) => parsed.skipped.push(SkippedRecord { index, reason }),
    }
}

pub fn write_atomic(path: &Path, records: &[CacheRecord]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(records)?;
    let tmp = tmp_path(path);
    if let Err(e) = fs::write(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 时长可能是整数、小数或 null
fn lenient_duration<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<f64>::deserialize(de)?;
    Ok(v.filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
        .unwrap_or(0))
}

fn nullable_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str, keys: &[&str]) -> CacheRecord {
        CacheRecord {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            url: format!("https://stream.example/{id}"),
            webpage_url: format!("https://www.youtube.com/watch?v={id}"),
            title: format!("title {id}"),
            duration: 200,
            uploader: "someone".to_owned(),
            resolved_at: None,
        }
    }

    #[test]
    fn legacy_map_becomes_single_key_records() {
        let json = br#"{
            "rickroll": {
                "url": "https://stream.example/a",
                "webpage_url": "https://www.youtube.com/watch?v=a",
                "title": "Never Gonna Give You Up",
                "duration": 212,
                "uploader": "Rick Astley"
            }
        }"#;
        let parsed = parse_records(json).unwrap();
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].keys, vec!["rickroll".to_owned()]);
        assert_eq!(parsed.records[0].duration, 212);
    }

    #[test]
    fn list_accepts_null_duration_and_uploader() {
        let json = br#"[{
            "keys": ["q"],
            "url": "u",
            "webpage_url": "w",
            "title": "t",
            "duration": null,
            "uploader": null
        }]"#;
        let parsed = parse_records(json).unwrap();
        assert_eq!(parsed.records[0].duration, 0);
        assert_eq!(parsed.records[0].uploader, "");
    }

    #[test]
    fn import_skips_records_with_missing_fields() {
        let json = br#"[
            {"keys": ["a"], "url": "u", "webpage_url": "w", "title": "t", "duration": 1, "uploader": "x"},
            {"keys": ["b"], "url": "u", "title": "t", "duration": 1, "uploader": "x"},
            {"keys": ["c"], "url": "", "webpage_url": "w2", "title": "t", "duration": 1, "uploader": "x"}
        ]"#;
        let parsed = parse_import(json).unwrap();
        assert_eq!(parsed.records.len(), 1);
        let skipped: Vec<usize> = parsed.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![1, 2]);
    }

    #[test]
    fn import_rejects_top_level_object() {
        let err = parse_import(br#"{"a": {}}"#).unwrap_err();
        assert!(matches!(err, CacheError::Format(_)));
    }

    #[test]
    fn save_then_load_keeps_records_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let records = vec![sample_record("a", &["x", "y"]), sample_record("b", &["z"])];

        store.save(&records).unwrap();
        assert!(!dir.path().join("cache.json.tmp").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.records, records);
    }

    #[test]
    fn failed_save_leaves_previous_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = CacheStore::new(&path);
        store.save(&[sample_record("a", &["x"])]).unwrap();

        // 用一个同名目录占住 tmp 路径，让写 tmp 失败
        fs::create_dir(dir.path().join("cache.json.tmp")).unwrap();
        assert!(store.save(&[sample_record("b", &["y"])]).is_err());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.records[0].webpage_url, "https://www.youtube.com/watch?v=a");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().records.is_empty());
    }
}

//! uprobeイベント定義

use std::fmt;
use std::path::{Path, PathBuf};

/// pptraceが定義するイベントのグループ名
pub const GROUP: &str = "pptrace";

/// uprobeイベント
///
/// tracefsの `uprobe_events` に書き込む1行分の情報です。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UprobeEvent {
    pub group: String,
    pub event: String,
    pub path: PathBuf,
    /// ファイル先頭からのオフセット
    pub offset: u64,
}

impl UprobeEvent {
    /// pptraceグループのイベントを作成する
    pub fn new(event: impl Into<String>, path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            group: GROUP.to_string(),
            event: event.into(),
            path: path.into(),
            offset,
        }
    }

    /// 定義ルール（`p:<group>/<event> <path>:0x<offset>`）
    pub fn rule(&self) -> String {
        format!(
            "p:{}/{} {}:0x{:x}",
            self.group,
            self.event,
            self.path.display(),
            self.offset
        )
    }

    /// 削除ルール（`-:<group>/<event>`）
    pub fn remove_rule(&self) -> String {
        format!("-:{}/{}", self.group, self.event)
    }

    /// tracefsルートからの有効化ファイルの相対パス
    pub fn enable_path(&self) -> PathBuf {
        Path::new("events")
            .join(&self.group)
            .join(&self.event)
            .join("enable")
    }
}

impl fmt::Display for UprobeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.event)
    }
}

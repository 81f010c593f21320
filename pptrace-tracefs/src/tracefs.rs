//! tracefsによるuprobe制御

use crate::{list_instances, Instance, Result, StopSignal, TracePipe};
use anyhow::Context;
use pptrace_core::{TraceControl, UprobeEvent};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// tracefsの標準マウントポイント
pub const DEFAULT_TRACEFS: &str = "/sys/kernel/tracing";

/// tracefsのトップレベルインスタンス
#[derive(Debug, Clone)]
pub struct TraceFs {
    root: PathBuf,
}

impl TraceFs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// 標準マウントポイントのインスタンス
    pub fn default_instance() -> Self {
        Self::new(DEFAULT_TRACEFS)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uprobe_events_path(&self) -> PathBuf {
        self.root.join("uprobe_events")
    }

    pub fn trace_pipe_path(&self) -> PathBuf {
        self.root.join("trace_pipe")
    }

    /// イベントの有効化ファイル
    pub fn enable_path(&self, event: &UprobeEvent) -> PathBuf {
        self.root.join(event.enable_path())
    }

    /// trace_pipe を開く
    pub fn trace_pipe(&self, stop: StopSignal) -> Result<TracePipe> {
        let path = self.trace_pipe_path();
        info!("cat {}", path.display());
        TracePipe::open(&path, stop)
    }

    /// トップレベルと `instances/` 以下のインスタンス
    pub fn instances(&self) -> Result<Vec<Instance>> {
        list_instances(&self.root)
    }

    /// `>>` と同じく追記する（uprobe_eventsは上書きすると全定義が消える）
    fn append(&self, path: &Path, line: &str) -> Result<()> {
        info!("echo {:?} >> {}", line, path.display());
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .with_context(|| format!("Failed to write {:?} to {}", line, path.display()))?;
        Ok(())
    }

    fn write_flag(&self, path: &Path, value: &str) -> Result<()> {
        info!("echo {} > {}", value, path.display());
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(value.as_bytes())
            .with_context(|| format!("Failed to write {} to {}", value, path.display()))?;
        Ok(())
    }
}

impl TraceControl for TraceFs {
    fn add_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        self.append(&self.uprobe_events_path(), &event.rule())
    }

    fn enable_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        self.write_flag(&self.enable_path(event), "1")
    }

    fn disable_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        self.write_flag(&self.enable_path(event), "0")
    }

    fn remove_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        self.append(&self.uprobe_events_path(), &event.remove_rule())
    }
}

impl Default for TraceFs {
    fn default() -> Self {
        Self::default_instance()
    }
}

//! トレース制御の境界とプローブのライフサイクル管理

use crate::{Result, UprobeEvent};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// カーネルのトレース機構を操作する
///
/// 後始末の途中で呼ばれるため、`disable_uprobe` は有効化に失敗したイベントに対しても
/// 呼べる必要があります。
pub trait TraceControl {
    /// uprobeを定義する
    fn add_uprobe(&self, event: &UprobeEvent) -> Result<()>;
    /// 定義済みのuprobeを有効化する
    fn enable_uprobe(&self, event: &UprobeEvent) -> Result<()>;
    /// uprobeを無効化する
    fn disable_uprobe(&self, event: &UprobeEvent) -> Result<()>;
    /// uprobeの定義を削除する
    fn remove_uprobe(&self, event: &UprobeEvent) -> Result<()>;
}

/// 定義・有効化したプローブの集合
///
/// すべてのプローブを定義してから有効化します。途中で失敗した場合や
/// セッションを破棄した場合は、獲得したときと逆の順番で無効化と削除を行います。
/// 後始末のエラーはログに残して次の手順へ進みます。
pub struct ProbeSession<'a, C: TraceControl + ?Sized> {
    control: &'a C,
    defined: Vec<UprobeEvent>,
    enabled: Vec<UprobeEvent>,
}

impl<'a, C: TraceControl + ?Sized> ProbeSession<'a, C> {
    /// プローブを定義し、有効化する
    pub fn start(control: &'a C, events: &[UprobeEvent]) -> Result<Self> {
        let mut session = Self {
            control,
            defined: Vec::with_capacity(events.len()),
            enabled: Vec::with_capacity(events.len()),
        };

        for event in events {
            control
                .add_uprobe(event)
                .with_context(|| format!("add uprobe {} failed", event))?;
            session.defined.push(event.clone());
        }

        for event in events {
            control
                .enable_uprobe(event)
                .with_context(|| format!("enable uprobe {} failed", event))?;
            session.enabled.push(event.clone());
        }

        info!("{} probe(s) enabled", session.enabled.len());
        Ok(session)
    }

    /// 定義済みのイベント
    pub fn events(&self) -> &[UprobeEvent] {
        &self.defined
    }

    /// 明示的に後始末する
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        while let Some(event) = self.enabled.pop() {
            debug!("Disabling {}", event);
            if let Err(e) = self.control.disable_uprobe(&event) {
                warn!("disable uprobe {} failed: {:#}", event, e);
            }
        }

        while let Some(event) = self.defined.pop() {
            debug!("Removing {}", event);
            if let Err(e) = self.control.remove_uprobe(&event) {
                warn!("remove uprobe {} failed: {:#}", event, e);
            }
        }
    }
}

impl<C: TraceControl + ?Sized> Drop for ProbeSession<'_, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 実行される操作をシェルコマンドとしてログに出すだけの制御
pub struct DryRun {
    root: PathBuf,
}

impl DryRun {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// trace_pipe の読み出しをログに出す
    pub fn trace_pipe(&self) {
        info!("cat {}", self.root.join("trace_pipe").display());
    }

    fn uprobe_events(&self) -> PathBuf {
        self.root.join("uprobe_events")
    }
}

impl TraceControl for DryRun {
    fn add_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        info!("echo {:?} >> {}", event.rule(), self.uprobe_events().display());
        Ok(())
    }

    fn enable_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        info!("echo 1 > {}", self.root.join(event.enable_path()).display());
        Ok(())
    }

    fn disable_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        info!("echo 0 > {}", self.root.join(event.enable_path()).display());
        Ok(())
    }

    fn remove_uprobe(&self, event: &UprobeEvent) -> Result<()> {
        info!("echo {:?} >> {}", event.remove_rule(), self.uprobe_events().display());
        Ok(())
    }
}

//! pptrace トレースのコア機能
//!
//! このクレートは、トレース対象（バイナリと関数名）をuprobe定義へ変換し、
//! プローブの定義・有効化・後始末をまとめて管理します。
//! 実際のカーネルとのやり取りは [`TraceControl`] を実装する側が行います。

pub mod command;
pub mod control;
pub mod target;
pub mod uprobe;

pub use command::parse_trace_targets;
pub use control::{DryRun, ProbeSession, TraceControl};
pub use target::{CompiledTarget, EventNamer, TraceTarget};
pub use uprobe::{UprobeEvent, GROUP};

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;

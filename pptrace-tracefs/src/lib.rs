//! pptrace tracefs 制御
//!
//! このクレートは、tracefs（`/sys/kernel/tracing`）のファイル操作で
//! uprobeの定義・有効化・削除、trace_pipeの読み出し、トレーサー状態の取得を行います。

pub mod instance;
pub mod pipe;
pub mod signal;
pub mod tracefs;

pub use instance::{list_instances, Instance};
pub use pipe::{stop_channel, StopHandle, StopSignal, TracePipe};
pub use signal::stop_on_signals;
pub use tracefs::{TraceFs, DEFAULT_TRACEFS};

/// tracefs制御の結果型
pub type Result<T> = anyhow::Result<T>;

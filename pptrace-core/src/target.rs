//! トレース対象の解決

use crate::{Result, UprobeEvent};
use anyhow::Context;
use pptrace_dwarf::{ElfImage, SymbolTable};
use regex::Regex;
use std::path::PathBuf;
use tracing::debug;

/// トレース対象
///
/// コマンドラインの `<binary> <function> [arg_expression...]` 1組分です。
/// 引数式は保持するだけで、fetch-argsへのコンパイルは行いません。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTarget {
    pub binary: PathBuf,
    pub function: String,
    pub arg_exprs: Vec<String>,
}

/// オフセットとイベント名が確定したトレース対象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTarget {
    pub target: TraceTarget,
    pub event: String,
    pub offset: u64,
}

impl TraceTarget {
    pub fn new(binary: impl Into<PathBuf>, function: impl Into<String>, arg_exprs: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            function: function.into(),
            arg_exprs,
        }
    }

    /// バイナリを開いて関数のオフセットを解決する
    ///
    /// `idx` はコマンドライン上の順番で、イベント名の接尾辞になります。
    /// `namer` は全ターゲットで共有します。
    pub fn compile(&self, namer: &EventNamer, idx: usize) -> Result<CompiledTarget> {
        let image = ElfImage::open(&self.binary)?;
        let symbols = SymbolTable::read(&image)?;
        self.compile_with(&symbols, namer, idx)
    }

    /// 読み込み済みのシンボルテーブルで解決する
    pub fn compile_with(&self, symbols: &SymbolTable, namer: &EventNamer, idx: usize) -> Result<CompiledTarget> {
        let offset = symbols
            .function_offset(&self.function)
            .with_context(|| format!("Failed to compile trace target #{}", idx))?;
        let event = namer.name(&self.function, idx);
        debug!("{} in {} -> {} @ 0x{:x}", self.function, self.binary.display(), event, offset);

        Ok(CompiledTarget {
            target: self.clone(),
            event,
            offset,
        })
    }
}

impl CompiledTarget {
    /// tracefsに渡すuprobeイベント
    pub fn uprobe(&self) -> UprobeEvent {
        UprobeEvent::new(self.event.clone(), self.target.binary.clone(), self.offset)
    }
}

/// 関数名からtracefsで使えるイベント名を作る
pub struct EventNamer {
    unsafe_chars: Regex,
}

impl EventNamer {
    pub fn new() -> Result<Self> {
        // イベント名に使えるのは英数字と '_' のみ
        let unsafe_chars = Regex::new(r"[^A-Za-z0-9_]+")?;
        Ok(Self { unsafe_chars })
    }

    /// `<安全な名前>_<idx>` を返す
    pub fn name(&self, function: &str, idx: usize) -> String {
        let safe = self.unsafe_chars.replace_all(function, "");
        if safe.starts_with(|c: char| c.is_ascii_digit()) {
            format!("_{}_{}", safe, idx)
        } else {
            format!("{}_{}", safe, idx)
        }
    }
}

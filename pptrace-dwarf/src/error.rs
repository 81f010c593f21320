//! デバッグ情報解析のエラー型

use std::path::PathBuf;

/// ELF/DWARF解析のエラー
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// ファイルが存在しない、壊れている、またはELFではない
    #[error("failed to open {}: {reason}", path.display())]
    OpenFailed { path: PathBuf, reason: String },

    /// 静的・動的シンボルテーブルのどちらも存在しない
    #[error("no symbol table in {}", path.display())]
    NoSymbolTable { path: PathBuf },

    /// FUNCTION型シンボルの中に指定名が見つからない
    #[error("function {function} not found in {}", path.display())]
    SymbolNotFound { path: PathBuf, function: String },

    /// シンボルのアドレスが最初のPT_LOADより手前にある
    #[error("function {function} at 0x{value:x} lies below the load bias 0x{load_bias:x}")]
    AddressBelowLoadBias {
        function: String,
        value: u64,
        load_bias: u64,
    },

    /// 分離デバッグファイルの候補をすべて試したが見つからない
    #[error("no debug symbols found for {}", path.display())]
    NoDebugInfo { path: PathBuf },

    /// 終端レコードの対応が取れない、または型参照が循環している
    #[error("malformed debug info stream: {0}")]
    MalformedDebugStream(String),

    /// 属性が受け付けられないエンコーディングを持っている
    #[error("unexpected encoding for {attr} in record at 0x{offset:x}")]
    UnexpectedAttributeEncoding { attr: gimli::DwAt, offset: u64 },

    #[error(transparent)]
    Dwarf(#[from] gimli::Error),
}

impl Error {
    pub(crate) fn open_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::OpenFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

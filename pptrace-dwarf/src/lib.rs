//! pptrace ELF/DWARF 解析
//!
//! このクレートは、uprobeを張るための関数オフセットの解決と、
//! DWARFデバッグ情報からの関数シグネチャ・型情報の復元を提供します。
//! ストリップされたバイナリについては分離デバッグファイルを探索します。

pub mod error;
pub mod filter;
pub mod loader;
pub mod symbols;
pub mod record;
pub mod tree;
pub mod type_info;
pub mod debuglink;

pub use error::Error;
pub use filter::NameFilter;
pub use loader::{DebugLink, DwarfSlice, ElfImage};
pub use symbols::{ResolvedFunction, SymbolEntry, SymbolTable};
pub use record::{AttrValue, DebugExpr, DebugOffset, DebugRecord, DebugRecordReader};
pub use tree::{DebugNode, DebugTree, NodeId};
pub use type_info::{Argument, FunctionSignature, MemberInfo, TypeResolver, TypedefLayout};
pub use debuglink::{Candidate, CandidateSource, DebugFileLocator, LocatorConfig, DEFAULT_DEBUG_ROOT};

/// 解析の結果型
pub type Result<T> = std::result::Result<T, Error>;

/// バイナリ（または分離デバッグファイル）からデバッグ情報ツリーを構築する
///
/// 分離デバッグファイルの探索から型解決までをまとめて行う入口です。
pub fn load_debug_tree<P: AsRef<std::path::Path>>(path: P, config: &LocatorConfig) -> Result<DebugTree> {
    let debug_path = DebugFileLocator::new(config.clone()).locate(path)?;
    let image = ElfImage::open(&debug_path)?;
    DebugTree::build(image.records()?)
}

//! シンボル解決機能
//!
//! 静的・動的シンボルテーブルを読み取り、関数名からuprobe用のファイルオフセットを求めます。

use crate::{ElfImage, Error, NameFilter, Result};
use object::elf;
use object::read::elf::{ElfFile, FileHeader, ProgramHeader};
use object::{Endianness, Object, ObjectSymbol, SymbolFlags};
use std::path::{Path, PathBuf};
use tracing::debug;

/// シンボルテーブルのエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    /// 仮想アドレス
    pub value: u64,
    pub size: u64,
    /// `st_info`（下位4ビットがシンボル型、上位4ビットがバインド）
    pub info: u8,
}

impl SymbolEntry {
    /// シンボル型がSTT_FUNCかどうか
    pub fn is_function(&self) -> bool {
        self.info & 0xf == elf::STT_FUNC
    }
}

/// オフセットまで解決した関数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub name: String,
    /// 仮想アドレス
    pub address: u64,
    pub size: u64,
    /// uprobe用のファイル相対オフセット
    pub offset: u64,
}

/// ELFのシンボルテーブル
///
/// 静的シンボルを先に、動的シンボルを後に並べて保持します。
/// 両方に同じシンボルがあっても重複はそのまま残し、先に見つかった方を使います。
#[derive(Debug, Clone)]
pub struct SymbolTable {
    path: PathBuf,
    symbols: Vec<SymbolEntry>,
    load_bias: u64,
}

impl SymbolTable {
    /// ELFイメージからシンボルテーブルとロードバイアスを読み取る
    pub fn read(image: &ElfImage) -> Result<Self> {
        let object_file = image.object()?;

        if object_file.symbol_table().is_none() && object_file.dynamic_symbol_table().is_none() {
            return Err(Error::NoSymbolTable {
                path: image.path().to_path_buf(),
            });
        }

        let mut symbols = Vec::new();
        symbols.extend(object_file.symbols().filter_map(|s| to_entry(&s)));
        symbols.extend(object_file.dynamic_symbols().filter_map(|s| to_entry(&s)));

        let load_bias = first_load_vaddr(image)?.unwrap_or(0);
        debug!(
            "Read {} symbols from {}, load bias 0x{:x}",
            symbols.len(),
            image.path().display(),
            load_bias
        );

        Ok(Self::from_parts(image.path(), symbols, load_bias))
    }

    /// 読み取り済みのシンボルからテーブルを作成する
    pub fn from_parts<P: AsRef<Path>>(path: P, symbols: Vec<SymbolEntry>, load_bias: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            symbols,
            load_bias,
        }
    }

    /// 最初のPT_LOADセグメントの仮想アドレス
    ///
    /// ロードバイアスは1つだけと仮定しています。
    /// セグメントごとに異なるバイアスを持つレイアウトには対応しません。
    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// すべてのエントリを取得する（静的テーブルが先）
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.symbols
    }

    /// フィルタにマッチする関数シンボルを列挙する
    pub fn functions<'a>(&'a self, filter: &'a NameFilter) -> impl Iterator<Item = &'a SymbolEntry> + 'a {
        self.symbols
            .iter()
            .filter(move |s| s.is_function() && filter.matches(&s.name))
    }

    /// フィルタにマッチする関数をすべてオフセットまで解決する
    ///
    /// 1つもマッチしなければ `SymbolNotFound` を返します。
    pub fn resolve(&self, filter: &NameFilter) -> Result<Vec<ResolvedFunction>> {
        let resolved = self
            .functions(filter)
            .map(|symbol| {
                Ok(ResolvedFunction {
                    name: symbol.name.clone(),
                    address: symbol.value,
                    size: symbol.size,
                    offset: self.offset_of(symbol)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if resolved.is_empty() {
            return Err(Error::SymbolNotFound {
                path: self.path.clone(),
                function: filter.to_string(),
            });
        }
        Ok(resolved)
    }

    /// 関数名の完全一致でシンボルを検索する
    pub fn find_function(&self, name: &str) -> Option<&SymbolEntry> {
        self.symbols
            .iter()
            .find(|s| s.is_function() && s.name == name)
    }

    /// 関数のファイル相対オフセット（仮想アドレス - ロードバイアス）を求める
    pub fn function_offset(&self, name: &str) -> Result<u64> {
        let symbol = self.find_function(name).ok_or_else(|| Error::SymbolNotFound {
            path: self.path.clone(),
            function: name.to_string(),
        })?;

        let offset = self.offset_of(symbol)?;
        debug!("Resolved {} -> 0x{:x} (vaddr 0x{:x})", name, offset, symbol.value);
        Ok(offset)
    }

    fn offset_of(&self, symbol: &SymbolEntry) -> Result<u64> {
        symbol
            .value
            .checked_sub(self.load_bias)
            .ok_or_else(|| Error::AddressBelowLoadBias {
                function: symbol.name.clone(),
                value: symbol.value,
                load_bias: self.load_bias,
            })
    }
}

/// objectのシンボルをエントリに変換する
fn to_entry<'data, S: ObjectSymbol<'data>>(symbol: &S) -> Option<SymbolEntry> {
    let name = symbol.name().ok()?;
    if name.is_empty() {
        return None;
    }

    let info = match symbol.flags() {
        SymbolFlags::Elf { st_info, .. } => st_info,
        _ => return None,
    };

    Some(SymbolEntry {
        name: name.to_string(),
        value: symbol.address(),
        size: symbol.size(),
        info,
    })
}

/// プログラムヘッダ順で最初のPT_LOADの仮想アドレスを取得する
fn first_load_vaddr(image: &ElfImage) -> Result<Option<u64>> {
    match object::FileKind::parse(image.data()) {
        Ok(object::FileKind::Elf64) => {
            let file = object::read::elf::ElfFile64::<Endianness>::parse(image.data())
                .map_err(|e| Error::open_failed(image.path(), e))?;
            Ok(load_vaddr_of(&file))
        }
        Ok(object::FileKind::Elf32) => {
            let file = object::read::elf::ElfFile32::<Endianness>::parse(image.data())
                .map_err(|e| Error::open_failed(image.path(), e))?;
            Ok(load_vaddr_of(&file))
        }
        Ok(_) => Ok(None),
        Err(e) => Err(Error::open_failed(image.path(), e)),
    }
}

fn load_vaddr_of<Elf: FileHeader<Endian = Endianness>>(file: &ElfFile<'_, Elf>) -> Option<u64> {
    let endian = file.endian();
    file.elf_program_headers()
        .iter()
        .find(|ph| ph.p_type(endian) == elf::PT_LOAD)
        .map(|ph| ph.p_vaddr(endian).into())
}

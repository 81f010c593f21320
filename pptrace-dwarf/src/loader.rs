//! ELFファイルの読み込み機能

use crate::record::DebugRecordReader;
use crate::{Error, Result};
use object::{CompressionFormat, Object, ObjectSection};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// DWARFのセクションデータ
pub type DwarfSlice<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;

/// `.gnu_debuglink` セクションの内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLink {
    /// 分離デバッグファイルの名前
    pub name: String,
    /// 分離デバッグファイル全体のCRC-32
    pub crc: u32,
}

/// 開いたELFイメージ
///
/// ファイル全体をメモリに保持し、必要になるたびに `object` でパースします。
/// 圧縮されたデバッグセクションは開いた時点で展開して保持します。
pub struct ElfImage {
    path: PathBuf,
    data: Vec<u8>,
    /// 展開済みのデバッグセクション（キーは `.debug_*` 名）
    decompressed: HashMap<String, Vec<u8>>,
}

impl ElfImage {
    /// ELFファイルを開く
    ///
    /// ファイルが読めない場合やELFでない場合は `OpenFailed` を返します。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| Error::open_failed(path, e))?;
        Self::from_bytes(path, data)
    }

    /// メモリ上のバイト列からELFイメージを作成する
    pub fn from_bytes<P: AsRef<Path>>(path: P, data: Vec<u8>) -> Result<Self> {
        let path = path.as_ref();

        match object::FileKind::parse(&*data) {
            Ok(object::FileKind::Elf32) | Ok(object::FileKind::Elf64) => {}
            Ok(kind) => return Err(Error::open_failed(path, format!("not an ELF image ({:?})", kind))),
            Err(e) => return Err(Error::open_failed(path, e)),
        }

        // ヘッダが正しく読めることをここで確認しておく
        let decompressed = {
            let object_file = object::File::parse(&*data).map_err(|e| Error::open_failed(path, e))?;
            decompress_debug_sections(path, &object_file)
        };

        Ok(Self {
            path: path.to_path_buf(),
            data,
            decompressed,
        })
    }

    /// ファイルパスを取得する
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ファイルの生データを取得する
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// オブジェクトファイルとしてパースする
    pub fn object(&self) -> Result<object::File<'_>> {
        object::File::parse(&*self.data).map_err(|e| Error::open_failed(&self.path, e))
    }

    /// DWARFコンテキストを構築する
    ///
    /// 存在しないセクションは空として扱います。
    pub fn dwarf(&self) -> Result<gimli::Dwarf<DwarfSlice<'_>>> {
        let object_file = self.object()?;
        load_dwarf(&object_file, &self.decompressed)
    }

    /// 使用可能なデバッグ情報を持っているか
    ///
    /// `.debug_info` にデータがあり、最初のユニットヘッダが読めればtrue
    pub fn has_debug_info(&self) -> bool {
        let Ok(object_file) = self.object() else {
            return false;
        };

        let has_section = object_file
            .section_by_name(".debug_info")
            .is_some_and(|s| s.kind() != object::SectionKind::UninitializedData)
            && !section_bytes(&object_file, &self.decompressed, ".debug_info").is_empty();
        if !has_section {
            return false;
        }

        match self.dwarf() {
            Ok(dwarf) => matches!(dwarf.units().next(), Ok(Some(_))),
            Err(_) => false,
        }
    }

    /// ビルドIDを16進文字列で取得する
    pub fn build_id(&self) -> Option<String> {
        let object_file = self.object().ok()?;
        let id = object_file.build_id().ok()??;
        if id.is_empty() {
            return None;
        }
        Some(id.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// `.gnu_debuglink` を読み取る
    pub fn debug_link(&self) -> Option<DebugLink> {
        let object_file = self.object().ok()?;
        let (name, crc) = object_file.gnu_debuglink().ok()??;
        let name = std::str::from_utf8(name).ok()?;
        if name.is_empty() {
            return None;
        }
        Some(DebugLink {
            name: name.to_string(),
            crc,
        })
    }

    /// デバッグレコードを先頭から順に読むリーダーを作成する
    pub fn records(&self) -> Result<DebugRecordReader<DwarfSlice<'_>>> {
        Ok(DebugRecordReader::new(self.dwarf()?))
    }
}

/// セクションが圧縮されているか（SHF_COMPRESSED または `.zdebug_*`）
fn is_compressed(section: &object::Section<'_, '_>) -> bool {
    section
        .compressed_file_range()
        .is_ok_and(|range| range.format != CompressionFormat::None)
}

/// 圧縮されたデバッグセクションを展開する
///
/// 展開に失敗したセクションは警告を出して読み飛ばします。
fn decompress_debug_sections(path: &Path, object_file: &object::File<'_>) -> HashMap<String, Vec<u8>> {
    let mut decompressed = HashMap::new();

    for section in object_file.sections() {
        let Ok(name) = section.name() else {
            continue;
        };
        let name = match name.strip_prefix(".zdebug_") {
            Some(rest) => format!(".debug_{}", rest),
            None if name.starts_with(".debug_") => name.to_string(),
            None => continue,
        };
        if !is_compressed(&section) {
            continue;
        }

        match section.uncompressed_data() {
            Ok(data) => {
                debug!("Decompressed {} in {} ({} bytes)", name, path.display(), data.len());
                decompressed.insert(name, data.into_owned());
            }
            Err(e) => warn!("Failed to decompress {} in {}: {}", name, path.display(), e),
        }
    }

    decompressed
}

/// デバッグセクションのバイト列を取得する
///
/// 展開済みのデータがあればそれを返します。
/// 展開できなかった圧縮セクションと存在しないセクションは空になります。
fn section_bytes<'data>(
    object_file: &object::File<'data>,
    decompressed: &'data HashMap<String, Vec<u8>>,
    name: &str,
) -> &'data [u8] {
    if let Some(data) = decompressed.get(name) {
        return data;
    }
    object_file
        .section_by_name(name)
        .filter(|section| !is_compressed(section))
        .and_then(|section| section.data().ok())
        .unwrap_or(&[])
}

/// オブジェクトファイルからDWARFセクションを読み込む
fn load_dwarf<'data>(
    object_file: &object::File<'data>,
    decompressed: &'data HashMap<String, Vec<u8>>,
) -> Result<gimli::Dwarf<DwarfSlice<'data>>> {
    let endian = if object_file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> std::result::Result<DwarfSlice<'data>, gimli::Error> {
        let data = section_bytes(object_file, decompressed, id.name());
        Ok(gimli::EndianSlice::new(data, endian))
    };

    Ok(gimli::Dwarf::load(load_section)?)
}

//! フラットなデバッグレコード列
//!
//! gimliの生エントリカーソルを使って `.debug_info` を先頭から読み、
//! DIEごとに1つの [`DebugRecord`]、NULLエントリごとに1つの終端レコードを返します。

use crate::{Error, Result};
use gimli::{Endianity, Reader};
use std::collections::VecDeque;
use tracing::trace;

/// `.debug_info` セクション内の絶対オフセット
pub type DebugOffset = u64;

/// 属性値
///
/// ユニット相対の参照はセクション絶対オフセットに変換済みです。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Addr(u64),
    Udata(u64),
    Sdata(i64),
    /// 他のレコードへの参照
    Ref(DebugOffset),
    Flag(bool),
    /// DWARF式（DW_FORM_exprloc、DWARF 2/3のブロック形式の位置式）
    Expr(DebugExpr),
    /// 上記以外のエンコーディング
    Other,
}

/// 属性に埋め込まれたDWARF式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugExpr {
    pub bytes: Vec<u8>,
    pub encoding: gimli::Encoding,
    pub endian: gimli::RunTimeEndian,
}

impl DebugExpr {
    /// 式が `DW_OP_plus_uconst <n>` の1命令だけならその値を返す
    ///
    /// DWARF 2形式の DW_AT_data_member_location はこの形で書かれます。
    pub fn plus_uconst(&self) -> Option<u64> {
        let mut reader = gimli::EndianSlice::new(&self.bytes, self.endian);
        match gimli::Operation::parse(&mut reader, self.encoding) {
            Ok(gimli::Operation::PlusConstant { value }) if reader.is_empty() => Some(value),
            _ => None,
        }
    }
}

/// デバッグレコード（DIE 1個分）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRecord {
    pub tag: gimli::DwTag,
    pub offset: DebugOffset,
    pub has_children: bool,
    pub attrs: Vec<(gimli::DwAt, AttrValue)>,
}

impl DebugRecord {
    pub fn new(tag: gimli::DwTag, offset: DebugOffset, has_children: bool) -> Self {
        Self {
            tag,
            offset,
            has_children,
            attrs: Vec::new(),
        }
    }

    /// 兄弟リストの終わりを示す終端レコード
    pub fn terminator() -> Self {
        Self::new(gimli::DwTag(0), 0, false)
    }

    /// 属性を追加する
    pub fn with_attr(mut self, name: gimli::DwAt, value: AttrValue) -> Self {
        self.attrs.push((name, value));
        self
    }

    /// 終端レコードかどうか（tag 0, offset 0, 子なし）
    pub fn is_terminator(&self) -> bool {
        self.tag.0 == 0 && self.offset == 0 && !self.has_children
    }

    /// 属性値を取得する
    pub fn attr(&self, name: gimli::DwAt) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(at, _)| *at == name)
            .map(|(_, value)| value)
    }

    /// DW_AT_name を取得する
    pub fn name(&self) -> Option<&str> {
        match self.attr(gimli::DW_AT_name)? {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// DW_AT_type の参照先オフセットを取得する
    pub fn type_ref(&self) -> Result<Option<DebugOffset>> {
        match self.attr(gimli::DW_AT_type) {
            None => Ok(None),
            Some(AttrValue::Ref(offset)) => Ok(Some(*offset)),
            Some(_) => Err(Error::UnexpectedAttributeEncoding {
                attr: gimli::DW_AT_type,
                offset: self.offset,
            }),
        }
    }
}

/// `.debug_info` 全体を順に読むリーダー
///
/// ユニット単位でレコードを読み込み、1件ずつ返します。
/// ユニット最上位に置かれたパディングのNULLエントリは何も閉じないので返しません。
pub struct DebugRecordReader<R: Reader<Offset = usize>> {
    dwarf: gimli::Dwarf<R>,
    units: gimli::DebugInfoUnitHeadersIter<R>,
    pending: VecDeque<DebugRecord>,
    done: bool,
}

impl<R: Reader<Offset = usize>> DebugRecordReader<R> {
    pub fn new(dwarf: gimli::Dwarf<R>) -> Self {
        let units = dwarf.units();
        Self {
            dwarf,
            units,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// 1ユニット分のレコードを読み込む
    fn read_unit(&mut self, header: gimli::UnitHeader<R>) -> Result<()> {
        let unit = self.dwarf.unit(header)?;
        let mut entries = unit.entries_raw(None)?;
        let mut depth = 0usize;

        while !entries.is_empty() {
            let unit_offset = entries.next_offset();
            let Some(abbrev) = entries.read_abbreviation()? else {
                if depth == 0 {
                    trace!("Skipping padding entry at unit offset 0x{:x}", unit_offset.0);
                    continue;
                }
                depth -= 1;
                self.pending.push_back(DebugRecord::terminator());
                continue;
            };

            let offset = unit_offset
                .to_debug_info_offset(&unit.header)
                .ok_or_else(|| {
                    Error::MalformedDebugStream(format!(
                        "entry at unit offset 0x{:x} is outside .debug_info",
                        unit_offset.0
                    ))
                })?
                .0 as DebugOffset;

            let mut record = DebugRecord::new(abbrev.tag(), offset, abbrev.has_children());
            for spec in abbrev.attributes() {
                let attr = entries.read_attribute(*spec)?;
                let value = self.convert_value(&unit, attr.value())?;
                record.attrs.push((attr.name(), value));
            }

            if record.has_children {
                depth += 1;
            }
            self.pending.push_back(record);
        }

        if depth != 0 {
            return Err(Error::MalformedDebugStream(format!(
                "unit ends with {} unterminated sibling list(s)",
                depth
            )));
        }
        Ok(())
    }

    /// gimliの属性値を変換する
    fn convert_value(&self, unit: &gimli::Unit<R>, value: gimli::AttributeValue<R>) -> Result<AttrValue> {
        use gimli::AttributeValue as V;

        let converted = match value {
            V::Addr(addr) => AttrValue::Addr(addr),
            V::DebugAddrIndex(index) => AttrValue::Addr(self.dwarf.address(unit, index)?),
            V::Udata(v) => AttrValue::Udata(v),
            V::Data1(v) => AttrValue::Udata(u64::from(v)),
            V::Data2(v) => AttrValue::Udata(u64::from(v)),
            V::Data4(v) => AttrValue::Udata(u64::from(v)),
            V::Data8(v) => AttrValue::Udata(v),
            V::Sdata(v) => AttrValue::Sdata(v),
            V::Flag(v) => AttrValue::Flag(v),
            V::UnitRef(offset) => match offset.to_debug_info_offset(&unit.header) {
                Some(offset) => AttrValue::Ref(offset.0 as DebugOffset),
                None => AttrValue::Other,
            },
            V::DebugInfoRef(offset) => AttrValue::Ref(offset.0 as DebugOffset),
            V::Exprloc(expr) => AttrValue::Expr(DebugExpr {
                endian: if expr.0.endian().is_big_endian() {
                    gimli::RunTimeEndian::Big
                } else {
                    gimli::RunTimeEndian::Little
                },
                bytes: expr.0.to_slice()?.into_owned(),
                encoding: unit.encoding(),
            }),
            // DWARF 2/3 では位置式がブロック形式で書かれる
            V::Block(block) => AttrValue::Expr(DebugExpr {
                endian: if block.endian().is_big_endian() {
                    gimli::RunTimeEndian::Big
                } else {
                    gimli::RunTimeEndian::Little
                },
                bytes: block.to_slice()?.into_owned(),
                encoding: unit.encoding(),
            }),
            V::String(_)
            | V::DebugStrRef(_)
            | V::DebugStrOffsetsIndex(_)
            | V::DebugLineStrRef(_) => {
                let s = self.dwarf.attr_string(unit, value)?;
                AttrValue::Str(s.to_string_lossy()?.into_owned())
            }
            _ => AttrValue::Other,
        };

        Ok(converted)
    }
}

impl<R: Reader<Offset = usize>> Iterator for DebugRecordReader<R> {
    type Item = Result<DebugRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }

            match self.units.next() {
                Ok(Some(header)) => {
                    if let Err(e) = self.read_unit(header) {
                        self.done = true;
                        self.pending.clear();
                        return Some(Err(e));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

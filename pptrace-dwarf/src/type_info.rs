//! 関数の引数と型情報の解決
//!
//! [`DebugTree`] のオフセット索引をたどって型参照を解決し、
//! 人が読める型名（`*T`、`struct foo` など）を組み立てます。

use crate::record::{AttrValue, DebugOffset, DebugRecord};
use crate::tree::{DebugNode, DebugTree};
use crate::{Error, NameFilter, Result};
use std::collections::HashSet;
use tracing::warn;

/// 関数のシグネチャ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    /// 開始アドレス（DW_AT_low_pc）
    pub low_pc: u64,
    /// high_pc - low_pc
    pub size: u64,
    pub args: Vec<Argument>,
}

/// 関数の仮引数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    /// 型名（解決できなければ空文字列）
    pub type_name: String,
}

/// typedefと、その参照先の集約型のメンバ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedefLayout {
    pub name: String,
    pub members: Vec<MemberInfo>,
}

/// 集約型のメンバ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// 集約型先頭からのバイトオフセット
    pub offset: i64,
    pub name: String,
    pub type_name: String,
}

/// 型・引数の解決器
pub struct TypeResolver<'a> {
    tree: &'a DebugTree,
}

impl<'a> TypeResolver<'a> {
    pub fn new(tree: &'a DebugTree) -> Self {
        Self { tree }
    }

    /// フィルタにマッチする関数とその引数を列挙する
    ///
    /// コンパイルユニット直下の DW_TAG_subprogram だけを対象にします。
    pub fn functions(&self, filter: &NameFilter) -> Result<Vec<FunctionSignature>> {
        let mut functions = Vec::new();

        for node in self.top_level(gimli::DW_TAG_subprogram) {
            let Some(name) = node.name() else { continue };
            if !filter.matches(name) {
                continue;
            }

            let (low_pc, size) = pc_range(node.record())?;

            let mut args = Vec::new();
            for child in self.tree.children(node) {
                if child.tag() != gimli::DW_TAG_formal_parameter {
                    continue;
                }
                let type_name = match child.record().type_ref()? {
                    Some(offset) => self.type_name(offset)?,
                    None => String::new(),
                };
                args.push(Argument {
                    name: child.name().unwrap_or_default().to_string(),
                    type_name,
                });
            }

            functions.push(FunctionSignature {
                name: name.to_string(),
                low_pc,
                size,
                args,
            });
        }

        Ok(functions)
    }

    /// フィルタにマッチするtypedefと、その参照先のメンバを列挙する
    pub fn typedefs(&self, filter: &NameFilter) -> Result<Vec<TypedefLayout>> {
        let mut typedefs = Vec::new();

        for node in self.top_level(gimli::DW_TAG_typedef) {
            let Some(name) = node.name() else { continue };
            if !filter.matches(name) {
                continue;
            }

            let mut members = Vec::new();
            let aggregate = match node.record().type_ref()? {
                Some(offset) => self.tree.lookup(offset),
                None => None,
            };
            if let Some(aggregate) = aggregate {
                for child in self.tree.children(aggregate) {
                    if child.tag() != gimli::DW_TAG_member {
                        continue;
                    }
                    members.push(MemberInfo {
                        offset: member_offset(child.record()),
                        name: child.name().unwrap_or_default().to_string(),
                        type_name: self.direct_type_name(child.record())?,
                    });
                }
            }

            typedefs.push(TypedefLayout {
                name: name.to_string(),
                members,
            });
        }

        Ok(typedefs)
    }

    /// 型参照を最後までたどって型名を組み立てる
    ///
    /// 名前のある型に行き着かなければ空文字列を返します。
    /// 参照が循環している場合は `MalformedDebugStream` になります。
    pub fn type_name(&self, offset: DebugOffset) -> Result<String> {
        let mut visited = HashSet::new();
        Ok(self.resolve(offset, &mut visited)?.unwrap_or_default())
    }

    fn resolve(&self, offset: DebugOffset, visited: &mut HashSet<DebugOffset>) -> Result<Option<String>> {
        if !visited.insert(offset) {
            return Err(Error::MalformedDebugStream(format!(
                "type reference cycle through 0x{:x}",
                offset
            )));
        }

        // 参照先が存在しない不完全なデバッグ情報
        let Some(node) = self.tree.lookup(offset) else {
            return Ok(None);
        };

        let base = match node.name() {
            Some(name) => Some(name.to_string()),
            None => match node.record().type_ref()? {
                Some(next) => self.resolve(next, visited)?,
                None => None,
            },
        };

        Ok(base.map(|base| match node.tag() {
            gimli::DW_TAG_structure_type => format!("struct {}", base),
            // 型名自体に `*` を含める言語（Goなど）では重ねて付けない
            gimli::DW_TAG_pointer_type if base.starts_with('*') => base,
            gimli::DW_TAG_pointer_type => format!("*{}", base),
            _ => base,
        }))
    }

    /// 1段だけ参照をたどった型名
    fn direct_type_name(&self, record: &DebugRecord) -> Result<String> {
        let name = record
            .type_ref()?
            .and_then(|offset| self.tree.lookup(offset))
            .and_then(|node| node.name())
            .unwrap_or_default();
        Ok(name.to_string())
    }

    /// コンパイルユニット直下の指定タグのノード
    fn top_level(&self, tag: gimli::DwTag) -> impl Iterator<Item = &'a DebugNode> + 'a {
        let tree = self.tree;
        tree.compile_units()
            .flat_map(move |cu| tree.children(cu))
            .filter(move |node| node.tag() == tag)
    }
}

/// (low_pc, size) を取得する
///
/// high_pc がアドレス形式なら絶対アドレス、定数形式なら low_pc からのオフセットです。
fn pc_range(record: &DebugRecord) -> Result<(u64, u64)> {
    let unexpected = |attr: gimli::DwAt| Error::UnexpectedAttributeEncoding {
        attr,
        offset: record.offset,
    };

    let low = match record.attr(gimli::DW_AT_low_pc) {
        None => 0,
        Some(AttrValue::Addr(v)) | Some(AttrValue::Udata(v)) => *v,
        Some(AttrValue::Sdata(v)) => *v as u64,
        Some(_) => return Err(unexpected(gimli::DW_AT_low_pc)),
    };

    let high = match record.attr(gimli::DW_AT_high_pc) {
        None => low,
        Some(AttrValue::Addr(v)) => *v,
        Some(AttrValue::Udata(v)) => low.wrapping_add(*v),
        Some(AttrValue::Sdata(v)) => low.wrapping_add(*v as u64),
        Some(_) => return Err(unexpected(gimli::DW_AT_high_pc)),
    };

    Ok((low, high.saturating_sub(low)))
}

/// DW_AT_data_member_location
///
/// 定数形式と `DW_OP_plus_uconst` だけの位置式を読みます。
/// それ以外の位置式はオフセット0として扱います。
fn member_offset(record: &DebugRecord) -> i64 {
    match record.attr(gimli::DW_AT_data_member_location) {
        None => 0,
        Some(AttrValue::Udata(v)) => *v as i64,
        Some(AttrValue::Sdata(v)) => *v,
        Some(AttrValue::Expr(expr)) => match expr.plus_uconst() {
            Some(v) => v as i64,
            None => {
                warn!("Unsupported member location expression in record at 0x{:x}", record.offset);
                0
            }
        },
        Some(other) => {
            warn!("Unexpected member location {:?} in record at 0x{:x}", other, record.offset);
            0
        }
    }
}

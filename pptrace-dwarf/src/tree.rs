//! デバッグ情報ツリーの構築
//!
//! フラットなレコード列（前順走査、終端レコードで兄弟リストを閉じる）から
//! コンパイルユニット → 関数 → 引数 のような階層を復元します。
//! ノードはアリーナに格納し、オフセットからノードへの索引で型参照を解決します。

use crate::record::{DebugOffset, DebugRecord};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// アリーナ内のノード番号
pub type NodeId = usize;

/// ツリーのノード
#[derive(Debug, Clone)]
pub struct DebugNode {
    record: DebugRecord,
    children: Vec<NodeId>,
}

impl DebugNode {
    pub fn record(&self) -> &DebugRecord {
        &self.record
    }

    pub fn tag(&self) -> gimli::DwTag {
        self.record.tag
    }

    pub fn offset(&self) -> DebugOffset {
        self.record.offset
    }

    pub fn name(&self) -> Option<&str> {
        self.record.name()
    }

    /// 子ノードの番号（出現順）
    pub fn child_ids(&self) -> &[NodeId] {
        &self.children
    }
}

/// `.debug_info` セクション全体のツリー
///
/// ルートはセクションそのものを表すコンテナで、子はコンパイルユニットです。
/// ルート自身はレコードを持たず、索引にも含まれません。
#[derive(Debug, Clone, Default)]
pub struct DebugTree {
    nodes: Vec<DebugNode>,
    roots: Vec<NodeId>,
    index: HashMap<DebugOffset, NodeId>,
}

impl DebugTree {
    /// レコード列からツリーを構築する
    ///
    /// 開いていない兄弟リストに対する終端レコード、閉じられないまま終わる
    /// ストリーム、同じオフセットの重複は `MalformedDebugStream` になります。
    pub fn build<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<DebugRecord>>,
    {
        let mut tree = Self::default();
        // 現在の親ノードのスタック（空ならルート直下）
        let mut stack: Vec<NodeId> = Vec::new();

        for record in records {
            let record = record?;

            if record.is_terminator() {
                if stack.pop().is_none() {
                    return Err(Error::MalformedDebugStream(
                        "terminator record without an open sibling list".to_string(),
                    ));
                }
                continue;
            }

            let id = tree.nodes.len();
            let offset = record.offset;
            let has_children = record.has_children;

            if tree.index.insert(offset, id).is_some() {
                return Err(Error::MalformedDebugStream(format!(
                    "duplicate record offset 0x{:x}",
                    offset
                )));
            }

            tree.nodes.push(DebugNode {
                record,
                children: Vec::new(),
            });

            match stack.last() {
                Some(&parent) => tree.nodes[parent].children.push(id),
                None => tree.roots.push(id),
            }

            if has_children {
                stack.push(id);
            }
        }

        if !stack.is_empty() {
            return Err(Error::MalformedDebugStream(format!(
                "stream ended with {} unterminated sibling list(s)",
                stack.len()
            )));
        }

        debug!(
            "Built debug tree: {} nodes in {} compilation unit(s)",
            tree.nodes.len(),
            tree.roots.len()
        );
        Ok(tree)
    }

    /// ノード数（終端レコードは含まない）
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// ルート直下のノード（コンパイルユニット）
    pub fn compile_units(&self) -> impl Iterator<Item = &DebugNode> + '_ {
        self.roots.iter().map(move |&id| &self.nodes[id])
    }

    /// 番号からノードを取得する
    pub fn node(&self, id: NodeId) -> Option<&DebugNode> {
        self.nodes.get(id)
    }

    /// 子ノードを出現順に列挙する
    pub fn children<'a>(&'a self, node: &'a DebugNode) -> impl Iterator<Item = &'a DebugNode> + 'a {
        node.children.iter().map(move |&id| &self.nodes[id])
    }

    /// オフセットからノードを引く
    pub fn lookup(&self, offset: DebugOffset) -> Option<&DebugNode> {
        self.index.get(&offset).map(|&id| &self.nodes[id])
    }

    /// 索引の全エントリ
    pub fn offsets(&self) -> impl Iterator<Item = (DebugOffset, &DebugNode)> + '_ {
        self.index
            .iter()
            .map(move |(&offset, &id)| (offset, &self.nodes[id]))
    }
}

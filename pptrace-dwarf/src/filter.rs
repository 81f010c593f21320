//! 名前のマッチ方針

/// 関数名・型名の絞り込み条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// すべてにマッチ（`--all`）
    All,
    /// 完全一致（`--exact`）
    Exact(String),
    /// 部分一致
    Substring(String),
}

impl NameFilter {
    /// CLIの引数から絞り込み条件を作る
    ///
    /// `all` が指定された場合はパターンを無視します。
    pub fn new(pattern: Option<&str>, exact: bool, all: bool) -> Self {
        match pattern {
            _ if all => NameFilter::All,
            None => NameFilter::All,
            Some(p) if exact => NameFilter::Exact(p.to_string()),
            Some(p) => NameFilter::Substring(p.to_string()),
        }
    }

    /// 名前がマッチするか
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::All => true,
            NameFilter::Exact(p) => name == p,
            NameFilter::Substring(p) => name.contains(p.as_str()),
        }
    }
}

impl std::fmt::Display for NameFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NameFilter::All => write!(f, "*"),
            NameFilter::Exact(p) | NameFilter::Substring(p) => write!(f, "{}", p),
        }
    }
}

//! トレーサーインスタンス

use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// トップレベルインスタンスの表示名
pub const TOP_LEVEL_INSTANCE: &str = "default";

/// tracefsのインスタンス（トップレベルまたは `instances/<name>`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    name: String,
    path: PathBuf,
}

impl Instance {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `tracing_on` が1かどうか
    pub fn is_on(&self) -> Result<bool> {
        Ok(self.read("tracing_on")? == "1")
    }

    /// `current_tracer` の内容
    pub fn current_tracer(&self) -> Result<String> {
        self.read("current_tracer")
    }

    fn read(&self, file: &str) -> Result<String> {
        let path = self.path.join(file);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(contents.trim().to_string())
    }
}

/// トップレベルと `instances/` 以下のインスタンスを列挙する
///
/// `instances/` 以下は名前順に並べます。
pub fn list_instances<P: AsRef<Path>>(root: P) -> Result<Vec<Instance>> {
    let root = root.as_ref();
    let mut instances = vec![Instance::new(TOP_LEVEL_INSTANCE, root)];

    let dir = root.join("instances");
    if !dir.is_dir() {
        return Ok(instances);
    }

    let mut named = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            named.push(Instance::new(
                entry.file_name().to_string_lossy().into_owned(),
                entry.path(),
            ));
        }
    }
    named.sort_by(|a, b| a.name.cmp(&b.name));
    instances.extend(named);

    Ok(instances)
}

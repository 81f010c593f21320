//! 分離デバッグファイルの探索
//!
//! デバッグ情報がストリップされたバイナリについて、ビルドIDと `.gnu_debuglink` から
//! GDBと同じ規則で候補パスを作り、実際にデバッグ情報を持つファイルを探します。
//! <https://sourceware.org/gdb/onlinedocs/gdb/Separate-Debug-Files.html>

use crate::{ElfImage, Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// システムのデバッグファイル置き場
pub const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";

/// 探索の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorConfig {
    /// デバッグファイル置き場のルート（ビルドIDストアは `<root>/.build-id`）
    pub debug_root: PathBuf,
    /// debuglink候補のCRC-32を検証するか
    pub verify_crc: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            debug_root: PathBuf::from(DEFAULT_DEBUG_ROOT),
            verify_crc: false,
        }
    }
}

/// 候補がどの情報から作られたか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    BuildId,
    DebugLink { crc: u32 },
}

/// 分離デバッグファイルの候補
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub source: CandidateSource,
}

/// 分離デバッグファイルの探索器
pub struct DebugFileLocator {
    config: LocatorConfig,
}

impl DebugFileLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// デバッグ情報を持つファイルのパスを返す
    ///
    /// 入力自体がデバッグ情報を持っていればそのまま返し、それ以上ファイルシステムには触れません。
    pub fn locate<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        let image = ElfImage::open(path)?;

        if image.has_debug_info() {
            debug!("{} contains debug info", path.display());
            return Ok(path.to_path_buf());
        }

        for candidate in self.candidates(path, &image) {
            debug!("Checking debug file path: {}", candidate.path.display());
            if self.accept(&candidate) {
                info!(
                    "Using separate debug file {} for {}",
                    candidate.path.display(),
                    path.display()
                );
                return Ok(candidate.path);
            }
        }

        warn!("No separate debug file found for {}", path.display());
        Err(Error::NoDebugInfo {
            path: path.to_path_buf(),
        })
    }

    /// 探索順に並べた候補を作る
    ///
    /// 1. `<root>/.build-id/<先頭2文字>/<残り>.debug`
    /// 2. バイナリと同じディレクトリ
    /// 3. その `.debug` サブディレクトリ
    /// 4. `<root>` 配下の同じディレクトリ
    pub fn candidates(&self, path: &Path, image: &ElfImage) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if let Some(build_id) = image.build_id().filter(|id| id.len() > 2) {
            let (prefix, rest) = build_id.split_at(2);
            candidates.push(Candidate {
                path: self
                    .config
                    .debug_root
                    .join(".build-id")
                    .join(prefix)
                    .join(format!("{}.debug", rest)),
                source: CandidateSource::BuildId,
            });
        }

        if let Some(link) = image.debug_link() {
            let source = CandidateSource::DebugLink { crc: link.crc };
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let absolute_dir = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());

            for candidate in [
                dir.join(&link.name),
                dir.join(".debug").join(&link.name),
                self.config
                    .debug_root
                    .join(relative_to_root(&absolute_dir))
                    .join(&link.name),
            ] {
                candidates.push(Candidate {
                    path: candidate,
                    source,
                });
            }
        }

        candidates
    }

    /// 候補がELFとして開け、デバッグ情報を持つかを確認する
    fn accept(&self, candidate: &Candidate) -> bool {
        let image = match ElfImage::open(&candidate.path) {
            Ok(image) => image,
            Err(e) => {
                debug!("Rejecting {}: {}", candidate.path.display(), e);
                return false;
            }
        };

        if !image.has_debug_info() {
            debug!("Rejecting {}: no debug info", candidate.path.display());
            return false;
        }

        if let CandidateSource::DebugLink { crc } = candidate.source {
            if self.config.verify_crc {
                let actual = crc32fast::hash(image.data());
                if actual != crc {
                    warn!(
                        "CRC mismatch for {}: expected=0x{:08x}, actual=0x{:08x}",
                        candidate.path.display(),
                        crc,
                        actual
                    );
                    return false;
                }
            }
        }

        true
    }
}

impl Default for DebugFileLocator {
    fn default() -> Self {
        Self::new(LocatorConfig::default())
    }
}

/// 先頭のルート要素を取り除く（`Path::join` に絶対パスを渡すと置き換わるため）
fn relative_to_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

//! trace_pipe の読み出し
//!
//! trace_pipe の読み出しはイベントが来るまでブロックするため、停止用のパイプと一緒に
//! pollし、別スレッドから [`StopHandle::stop`] が呼ばれたら読み出しを終えます。

use crate::Result;
use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BUFFER_SIZE: usize = 64 * 1024;

/// 停止要求を送る側
#[derive(Debug, Clone)]
pub struct StopHandle {
    writer: Arc<File>,
}

/// 停止要求を受け取る側
#[derive(Debug)]
pub struct StopSignal {
    reader: File,
}

/// 停止用のパイプを作る
pub fn stop_channel() -> Result<(StopHandle, StopSignal)> {
    let (reader, writer) = nix::unistd::pipe().context("Failed to create stop pipe")?;
    Ok((
        StopHandle {
            writer: Arc::new(File::from(writer)),
        },
        StopSignal {
            reader: File::from(reader),
        },
    ))
}

impl StopHandle {
    /// 読み出し中の [`TracePipe::copy_to`] を終了させる
    pub fn stop(&self) -> Result<()> {
        (&*self.writer)
            .write_all(&[1])
            .context("Failed to signal stop")?;
        Ok(())
    }
}

/// trace_pipe のリーダー
pub struct TracePipe {
    pipe: File,
    stop: StopSignal,
}

impl TracePipe {
    pub fn open(path: &Path, stop: StopSignal) -> Result<Self> {
        let pipe = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self { pipe, stop })
    }

    /// 停止要求かEOFまで trace_pipe の内容を `out` へ流す
    ///
    /// 書き出したバイト数を返します。
    pub fn copy_to<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let (readable, stopped) = match self.wait() {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll on trace_pipe failed"),
            };

            if stopped {
                debug!("Stop requested after {} bytes", total);
                break;
            }
            if !readable {
                continue;
            }

            let n = match self.pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Failed to read trace_pipe"),
            };
            out.write_all(&buf[..n])?;
            out.flush()?;
            total += n as u64;
        }

        Ok(total)
    }

    /// trace_pipe と停止パイプのどちらかが読めるまで待つ
    fn wait(&self) -> nix::Result<(bool, bool)> {
        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let mut fds = [
            PollFd::new(self.pipe.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.stop.reader.as_fd(), PollFlags::POLLIN),
        ];
        poll(&mut fds, PollTimeout::NONE)?;

        let is_ready = |fd: &PollFd| fd.revents().map_or(false, |r| r.intersects(ready));
        Ok((is_ready(&fds[0]), is_ready(&fds[1])))
    }
}

//! 終了シグナルの待ち受け

use crate::{Result, StopHandle};
use nix::sys::signal::{SigSet, Signal};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// SIGINT/SIGTERMを受けたら `handle` で停止を要求するスレッドを起動する
///
/// 呼び出したスレッドでは両シグナルをブロックします。以降に作られるスレッドも
/// マスクを引き継ぐため、シグナルは待ち受けスレッドだけが受け取ります。
pub fn stop_on_signals(handle: StopHandle) -> Result<JoinHandle<()>> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;

    let waiter = thread::Builder::new()
        .name("pptrace-signal".to_string())
        .spawn(move || {
            match signals.wait() {
                Ok(signal) => debug!("Received {:?}, stopping", signal),
                Err(e) => warn!("sigwait failed: {}", e),
            }
            if let Err(e) = handle.stop() {
                warn!("Failed to stop trace pipe: {:#}", e);
            }
        })?;

    Ok(waiter)
}

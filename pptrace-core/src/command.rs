//! トレースコマンドの引数解析

use crate::{Result, TraceTarget};
use anyhow::bail;

/// 区切り文字
const SEPARATOR: &str = "--";

/// `<binary> <function> [arg_expression...] [-- <binary> <function> ...]` を分割する
pub fn parse_trace_targets<S: AsRef<str>>(args: &[S]) -> Result<Vec<TraceTarget>> {
    if args.is_empty() {
        bail!("usage: trace <binary> <function> [arg_expression...] [-- <binary> <function> [arg_expression...]]");
    }

    let mut targets = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for arg in args.iter().map(AsRef::as_ref) {
        if arg == SEPARATOR {
            targets.push(finish_group(&current)?);
            current.clear();
        } else {
            current.push(arg);
        }
    }

    if !current.is_empty() {
        targets.push(finish_group(&current)?);
    }

    Ok(targets)
}

fn finish_group(group: &[&str]) -> Result<TraceTarget> {
    match group {
        [binary, function, exprs @ ..] => Ok(TraceTarget::new(
            *binary,
            *function,
            exprs.iter().map(|s| s.to_string()).collect(),
        )),
        _ => bail!("Arg parse error: saw '--' without full trace definition <binary> <function>"),
    }
}

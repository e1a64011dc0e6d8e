//! ビルトイン: `exit`, `cd`, `history`, `delay`。
//!
//! 生の入力行の先頭ワードで判定する。[`try_exec`] が `Some` を返せばビルトインとして
//! 処理済み、`None` なら外部コマンドとして executor に委ねる。

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::history::{History, HISTORY_SHOWN};
use crate::parser;
use crate::scheduler::ScheduleError;
use crate::shell::Shell;

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("cd: missing argument")]
    MissingCdArgument,
    #[error("cd: HOME not set")]
    HomeNotSet,
    #[error("cd: {path}: {source}")]
    Cd {
        path: String,
        source: std::io::Error,
    },
    #[error("usage: delay <seconds> <command...>")]
    DelayUsage,
    #[error("delay: {0}: invalid number of seconds")]
    InvalidSeconds(String),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// ビルトインの実行を試みる。
///
/// - `Some(Ok(()))`: ビルトインとして実行済み
/// - `Some(Err(e))`: ビルトインだが失敗した（呼び出し側が報告する）
/// - `None`: ビルトインではない
pub fn try_exec(
    shell: &mut Shell,
    line: &str,
    history: &History,
) -> Option<Result<(), BuiltinError>> {
    let (name, rest) = split_word(line);
    let result = match name {
        "exit" => {
            shell.should_exit = true;
            Ok(())
        }
        "cd" => builtin_cd(rest),
        "history" => {
            print_history(history);
            Ok(())
        }
        "delay" => builtin_delay(shell, rest),
        _ => return None,
    };
    Some(result)
}

/// 先頭ワードと残り（先頭空白除去済み）に分ける。
fn split_word(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(end) => (&line[..end], line[end..].trim_start()),
        None => (line, ""),
    }
}

// ── cd ────────────────────────────────────────────────────────────

fn builtin_cd(rest: &str) -> Result<(), BuiltinError> {
    let stripped = parser::strip_quotes(rest);
    let arg = stripped.split_whitespace().next();
    let home = env::var("HOME").ok();
    let target = resolve_cd_target(arg, home.as_deref())?;
    env::set_current_dir(&target).map_err(|source| BuiltinError::Cd {
        path: target.display().to_string(),
        source,
    })
}

/// `cd` の移動先を決める。`~` と `~/...` は `home` で置き換える。
pub fn resolve_cd_target(arg: Option<&str>, home: Option<&str>) -> Result<PathBuf, BuiltinError> {
    let arg = arg.ok_or(BuiltinError::MissingCdArgument)?;
    match arg.strip_prefix('~') {
        Some(suffix) => {
            let home = home.ok_or(BuiltinError::HomeNotSet)?;
            Ok(PathBuf::from(format!("{}{}", home, suffix)))
        }
        None => Ok(PathBuf::from(arg)),
    }
}

// ── history ───────────────────────────────────────────────────────

/// 直近 [`HISTORY_SHOWN`] 件を 1 始まりの論理番号付きで表示する。
fn print_history(history: &History) {
    print!("{}", format_history(history));
}

fn format_history(history: &History) -> String {
    history
        .recent(HISTORY_SHOWN)
        .map(|(i, line)| format!("  {}  {}\n", i + 1, line))
        .collect()
}

// ── delay ─────────────────────────────────────────────────────────

fn builtin_delay(shell: &Shell, rest: &str) -> Result<(), BuiltinError> {
    let (seconds, command) = parse_delay(rest)?;
    shell.scheduler().schedule(seconds, command)?;
    Ok(())
}

/// `delay` の引数を秒数とコマンド文字列に分ける。コマンドは生のまま返す。
fn parse_delay(rest: &str) -> Result<(Duration, &str), BuiltinError> {
    let (secs, command) = split_word(rest);
    if secs.is_empty() || command.is_empty() {
        return Err(BuiltinError::DelayUsage);
    }
    let n: i64 = secs
        .parse()
        .map_err(|_| BuiltinError::InvalidSeconds(secs.to_string()))?;
    if n <= 0 {
        return Err(ScheduleError::NonPositiveDelay.into());
    }
    Ok((Duration::from_secs(n as u64), command))
}

//! コマンド実行: 単一コマンドとパイプライン、リダイレクト、フォアグラウンド / バックグラウンド。
//!
//! - [`run_line`]: 生の 1 行をパースして実行する（REPL と遅延実行ワーカーの共通入口）
//! - [`execute_command`]: 1 段だけのコマンド
//! - [`execute_pipeline`]: N 段を N-1 本のパイプで接続
//!
//! 子プロセスは [`spawn`](crate::spawn) で起動し、シグナル既定化と fd 差し替えは
//! 子側で行われる。リダイレクト先ファイルは親で開き、開けなければコマンドを起動しない。
//! 親が開いた fd（パイプ両端・リダイレクト先）は全段の起動後にまとめて閉じる。

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::pid_t;
use thiserror::Error;

use crate::job;
use crate::parser::{self, CommandLine, ParseError, Redirects, Stage};
use crate::spawn::{self, SpawnError, Stdio};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// リダイレクト先を開けなかった。
    #[error("{path}: {source}")]
    Redirect { path: String, source: io::Error },
    #[error("pipe: {0}")]
    Pipe(io::Error),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// 実行結果。
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// フォアグラウンドで終了まで待った。自動回収済みで取れなければ `None`。
    Finished(Option<i32>),
    /// バックグラウンドで起動した PID（パイプラインなら各段）。
    Background(Vec<pid_t>),
}

/// 1 行をパースして実行する。空行なら `Ok(None)`。
pub fn run_line(line: &str) -> Result<Option<Outcome>, ExecError> {
    match parser::parse(line) {
        Some(cmd) => execute(&cmd).map(Some),
        None => Ok(None),
    }
}

/// パース済みの行を段に分け、段数に応じて実行する。
pub fn execute(line: &CommandLine) -> Result<Outcome, ExecError> {
    let stages = parser::stages(&line.argv)?;
    match stages.as_slice() {
        [single] => execute_command(single, line.background),
        _ => execute_pipeline(&stages, line.background),
    }
}

/// 単一コマンドを実行する。
pub fn execute_command(stage: &Stage, background: bool) -> Result<Outcome, ExecError> {
    let files = RedirectFiles::open(&stage.redirects)?;
    let pid = spawn::spawn(&stage.argv, files.stdio(Stdio::default()), &[])?;
    drop(files);
    Ok(finish(vec![pid], background))
}

/// パイプラインを実行する。
///
/// 段 i の stdin は パイプ i-1 の読み端、stdout は パイプ i の書き端。
/// 段のリダイレクト指定はパイプより優先する。子には使わない端も含めて
/// 全パイプ fd の close を指示する（パイプは `make_pipe` で `FD_CLOEXEC` 付きで作るので、
/// 他スレッドが同時に起動した子にも漏れない）。
pub fn execute_pipeline(stages: &[Stage], background: bool) -> Result<Outcome, ExecError> {
    let n = stages.len();
    let mut pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(n.saturating_sub(1));
    for _ in 1..n {
        pipes.push(make_pipe().map_err(ExecError::Pipe)?);
    }
    let all_pipe_fds: Vec<RawFd> = pipes
        .iter()
        .flat_map(|(r, w)| [r.as_raw_fd(), w.as_raw_fd()])
        .collect();
    log::trace!("pipeline of {} stages, pipe fds {:?}", n, all_pipe_fds);

    let mut pids: Vec<pid_t> = Vec::with_capacity(n);
    let mut failure = None;

    for (i, stage) in stages.iter().enumerate() {
        let wired = Stdio {
            stdin: i.checked_sub(1).map(|p| pipes[p].0.as_raw_fd()),
            stdout: pipes.get(i).map(|(_, w)| w.as_raw_fd()),
        };
        let result = RedirectFiles::open(&stage.redirects).and_then(|files| {
            spawn::spawn(&stage.argv, files.stdio(wired), &all_pipe_fds).map_err(ExecError::from)
        });
        match result {
            Ok(pid) => pids.push(pid),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // 親側の全パイプ端を閉じる。これで最終段が EOF を受け取れる。
    drop(pipes);

    if let Some(e) = failure {
        // 起動済みの段を回収してからエラーを返す
        job::wait_all(&pids);
        return Err(e);
    }
    Ok(finish(pids, background))
}

/// 起動後の処理: フォアグラウンドなら待つ、バックグラウンドなら PID を表示して手放す。
fn finish(pids: Vec<pid_t>, background: bool) -> Outcome {
    if background {
        for pid in &pids {
            println!("[Background] Process ID: {}", pid);
        }
        if let Err(e) = job::disown_background() {
            eprintln!("dsh: sigaction: {}", e);
        }
        Outcome::Background(pids)
    } else {
        let status = job::wait_all(&pids);
        log::debug!("pids {:?} finished with {:?}", pids, status);
        Outcome::Finished(status)
    }
}

/// 両端に `FD_CLOEXEC` 付きのパイプを作る。
///
/// `pipe2` のある環境では生成と同時に付けるので、遅延実行ワーカーが並行して
/// 起動した子にパイプ端が継承される隙間がない。
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn make_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as RawFd; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // pipe2 が成功したので両 fd の所有権はここにある
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

// macOS には pipe2 がない
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn make_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in fds {
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(pair)
}

// ── リダイレクト ──────────────────────────────────────────────────

/// 段のリダイレクト先として開いたファイル。Drop で親側の fd を閉じる。
struct RedirectFiles {
    input: Option<File>,
    truncate: Option<File>,
    append: Option<File>,
}

impl RedirectFiles {
    /// `<` は既存ファイルを読み込み、`>` は作成 / 切り詰め、`>>` は作成 / 追記で開く。
    fn open(redirects: &Redirects) -> Result<Self, ExecError> {
        fn opened(path: &str, result: io::Result<File>) -> Result<File, ExecError> {
            result.map_err(|source| ExecError::Redirect {
                path: path.to_string(),
                source,
            })
        }

        let input = match &redirects.input {
            Some(p) => Some(opened(p, File::open(p))?),
            None => None,
        };
        let truncate = match &redirects.truncate {
            Some(p) => Some(opened(p, File::create(p))?),
            None => None,
        };
        let append = match &redirects.append {
            Some(p) => Some(opened(
                p,
                OpenOptions::new().create(true).append(true).open(p),
            )?),
            None => None,
        };
        Ok(Self {
            input,
            truncate,
            append,
        })
    }

    /// パイプ接続 `base` にリダイレクトを上書きした入出力指定。
    fn stdio(&self, base: Stdio) -> Stdio {
        let stdout = self.append.as_ref().or(self.truncate.as_ref());
        Stdio {
            stdin: self.input.as_ref().map(|f| f.as_raw_fd()).or(base.stdin),
            stdout: stdout.map(|f| f.as_raw_fd()).or(base.stdout),
        }
    }
}

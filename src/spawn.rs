//! `posix_spawnp()` の安全な Rust ラッパー。
//!
//! 子プロセスの生成・シグナル既定化・fd 差し替え・プログラム置換を 1 回の呼び出しで行う。
//! fork 後の子で任意のコードを走らせないため、遅延実行ワーカーなど
//! 複数スレッドから同時に起動しても安全。
//!
//! ## 構成
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（シグナル既定化） |
//! | [`FileActions`] | `posix_spawn_file_actions_t` の RAII ラッパー（dup2 / close） |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`spawn`] | 上記を組み合わせて `posix_spawnp` を呼ぶ公開関数 |

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

/// 子プロセスで `SIG_DFL` に戻すシグナル。シェル側の無視設定を持ち込ませない。
const RESET_SIGNALS: [libc::c_int; 4] = [libc::SIGINT, libc::SIGQUIT, libc::SIGTSTP, libc::SIGCHLD];

// ── エラー型 ──────────────────────────────────────────────────────

/// `posix_spawnp` の失敗。
#[derive(Debug, Error)]
#[error("{}: {}", .command, describe(.errno))]
pub struct SpawnError {
    /// errno 値。
    pub errno: i32,
    /// コマンド名（エラーメッセージ用）。
    pub command: String,
}

fn describe(errno: &i32) -> String {
    match *errno {
        libc::ENOENT => "command not found".to_string(),
        libc::EACCES => "permission denied".to_string(),
        _ => io::Error::from_raw_os_error(*errno).to_string(),
    }
}

impl SpawnError {
    /// 対応する終了ステータス。127 = not found, 126 = permission denied, 1 = その他。
    pub fn exit_status(&self) -> i32 {
        match self.errno {
            libc::ENOENT => 127,
            libc::EACCES => 126,
            _ => 1,
        }
    }
}

// ── SpawnAttr ─────────────────────────────────────────────────────

struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    /// `POSIX_SPAWN_SETSIGDEF` で [`RESET_SIGNALS`] を `SIG_DFL` にする。
    fn set_sigdefault(&mut self) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= libc::POSIX_SPAWN_SETSIGDEF as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);

            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            for sig in RESET_SIGNALS {
                libc::sigaddset(&mut sigset, sig);
            }
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── FileActions ───────────────────────────────────────────────────

struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    fn add_dup2(&mut self, fd: RawFd, newfd: RawFd) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, fd, newfd);
        }
    }

    fn add_close(&mut self, fd: RawFd) {
        unsafe {
            libc::posix_spawn_file_actions_addclose(&mut self.inner, fd);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    /// 内部に NUL を含む引数があれば `EINVAL` を返す。
    fn from_args(args: &[String]) -> Result<Self, i32> {
        let strings = args
            .iter()
            .map(|s| CString::new(s.as_str()).map_err(|_| libc::EINVAL))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut());
        Ok(Self {
            _strings: strings,
            ptrs,
        })
    }

    fn program(&self) -> *const libc::c_char {
        self.ptrs[0]
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── spawn 関数 ────────────────────────────────────────────────────

/// 子プロセスの標準入出力の差し替え指定。
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdio {
    /// stdin に複製する fd（`None` なら継承）。
    pub stdin: Option<RawFd>,
    /// stdout に複製する fd（`None` なら継承）。
    pub stdout: Option<RawFd>,
}

/// `posix_spawnp` で子プロセスを起動し、PID を返す。
///
/// - `args[0]` は `$PATH` 検索される
/// - `stdio` の fd は dup2 後に子側で close する
/// - `close_fds` は子側で close する（パイプの未使用端など）
pub fn spawn(args: &[String], stdio: Stdio, close_fds: &[RawFd]) -> Result<libc::pid_t, SpawnError> {
    let command = args.first().cloned().unwrap_or_default();
    if args.is_empty() {
        return Err(SpawnError {
            errno: libc::EINVAL,
            command,
        });
    }
    let argv = CStringVec::from_args(args).map_err(|errno| SpawnError {
        errno,
        command: command.clone(),
    })?;

    let mut attr = SpawnAttr::new();
    attr.set_sigdefault();

    let mut actions = FileActions::new();
    let targets = [(stdio.stdin, libc::STDIN_FILENO), (stdio.stdout, libc::STDOUT_FILENO)];
    for (fd, target) in targets {
        if let Some(fd) = fd {
            actions.add_dup2(fd, target);
        }
    }
    // dup2 を全部済ませてから元 fd を閉じる（stdin と stdout が同じ fd の場合に備える）
    let mut closed: Vec<RawFd> = Vec::new();
    for (fd, target) in targets {
        if let Some(fd) = fd {
            if fd != target && !closed.contains(&fd) {
                actions.add_close(fd);
                closed.push(fd);
            }
        }
    }
    for &fd in close_fds {
        if !closed.contains(&fd) {
            actions.add_close(fd);
            closed.push(fd);
        }
    }

    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: libc::pid_t = 0;
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv.program(),
            actions.as_ptr(),
            attr.as_ptr(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(SpawnError {
            errno: ret,
            command,
        });
    }

    log::debug!("spawned pid {} for {:?}", pid, args);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_reports_not_found() {
        let args = vec!["dsh-no-such-program-xyz".to_string()];
        let err = spawn(&args, Stdio::default(), &[]).unwrap_err();
        assert_eq!(err.errno, libc::ENOENT);
        assert_eq!(err.exit_status(), 127);
        assert_eq!(
            err.to_string(),
            "dsh-no-such-program-xyz: command not found"
        );
    }

    #[test]
    fn nul_byte_is_rejected() {
        let args = vec!["ec\0ho".to_string()];
        let err = spawn(&args, Stdio::default(), &[]).unwrap_err();
        assert_eq!(err.errno, libc::EINVAL);
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = spawn(&[], Stdio::default(), &[]).unwrap_err();
        assert_eq!(err.errno, libc::EINVAL);
        assert_eq!(err.exit_status(), 1);
    }
}

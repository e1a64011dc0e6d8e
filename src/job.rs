//! シグナル設定と子プロセスの待機。
//!
//! ジョブテーブルは持たない。フォアグラウンドは起動した PID だけを `waitpid` で待ち、
//! バックグラウンドは PID を表示したあと [`disown_background`] で自動回収に任せる。

use std::io;

use libc::pid_t;

/// シェル自身のシグナル設定。Ctrl+C / Ctrl+\ / Ctrl+Z でシェルが止まらないようにする。
/// 子プロセスでは [`spawn`](crate::spawn) が既定動作に戻す。
pub fn init_shell_signals() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        libc::signal(libc::SIGQUIT, libc::SIG_IGN);
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGCHLD, libc::SIG_DFL);
    }
}

/// `SIGCHLD` を `SIG_IGN` + `SA_NOCLDSTOP` にし、終了した子をカーネルに自動回収させる。
///
/// 以後フォアグラウンドの `waitpid` は子の終了まで待ったのち `ECHILD` を返す
/// （終了ステータスは取れない）。[`wait_for`] はこれを `None` として扱う。
pub fn disown_background() -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_IGN;
        sa.sa_flags = libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    log::debug!("SIGCHLD ignored; background children are reaped automatically");
    Ok(())
}

/// 指定 PID の終了を待ち、終了コードを返す。自動回収済みなら `None`。
///
/// シグナルで終了した場合は `128 + signo`。
pub fn wait_for(pid: pid_t) -> Option<i32> {
    let mut raw = 0i32;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut raw, 0) };
        if ret == pid {
            return Some(decode_status(raw));
        }
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => return None,
            _ => {
                log::warn!("waitpid({}): {}", pid, io::Error::last_os_error());
                return None;
            }
        }
    }
}

/// 全 PID を待つ。戻り値は最後の PID の終了コード。
pub fn wait_all(pids: &[pid_t]) -> Option<i32> {
    let mut last = None;
    for &pid in pids {
        last = wait_for(pid);
    }
    last
}

fn decode_status(raw: i32) -> i32 {
    if libc::WIFEXITED(raw) {
        libc::WEXITSTATUS(raw)
    } else if libc::WIFSIGNALED(raw) {
        128 + libc::WTERMSIG(raw)
    } else {
        1
    }
}

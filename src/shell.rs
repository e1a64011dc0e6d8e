//! REPL 全体で共有するシェルの状態。
//!
//! 遅延実行ワーカーのハンドルと終了フラグだけを持つ。履歴は行エディタが所有し、
//! [`Shell::run`] には参照で渡される。

use std::io;

use crate::builtins;
use crate::executor::{self, ExecError};
use crate::history::History;
use crate::scheduler::Scheduler;

pub struct Shell {
    scheduler: Scheduler,
    /// `exit` で true になり、REPL ループを終了させる。
    pub should_exit: bool,
}

impl Shell {
    /// 遅延実行ワーカーを起動する。期限の来た行はワーカースレッド上で
    /// 対話入力と同じ経路（パース → 実行）を通る。
    pub fn new() -> io::Result<Self> {
        let scheduler = Scheduler::start(run_external)?;
        Ok(Self {
            scheduler,
            should_exit: false,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// 1 行を実行する。ビルトインを先に試し、それ以外は外部コマンドとして実行する。
    /// エラーは標準エラーに報告して戻る。
    pub fn run(&mut self, line: &str, history: &History) {
        match builtins::try_exec(self, line, history) {
            Some(Err(e)) => eprintln!("dsh: {}", e),
            Some(Ok(())) => {}
            None => run_external(line),
        }
    }

    /// ワーカーを止める。未実行の遅延コマンドは破棄される。
    pub fn shutdown(&mut self) {
        let pending = self.scheduler.pending();
        if pending > 0 {
            log::debug!("discarding {} pending delayed commands", pending);
        }
        self.scheduler.shutdown();
    }
}

fn run_external(line: &str) {
    if let Err(e) = executor::run_line(line) {
        log::debug!("{:?} failed with status {}", line, exit_status(&e));
        eprintln!("dsh: {}", e);
    }
}

/// 起動前に失敗したコマンドの終了ステータス。
fn exit_status(err: &ExecError) -> i32 {
    match err {
        ExecError::Spawn(e) => e.exit_status(),
        ExecError::Parse(_) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseError;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn exit_sets_flag() {
        let mut shell = Shell::new().unwrap();
        shell.run("exit", &History::new());
        assert!(shell.should_exit);
        shell.shutdown();
    }

    #[test]
    fn delay_enqueues_and_fires() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("late.txt");
        let mut shell = Shell::new().unwrap();
        shell.run(&format!("delay 1 echo late > {}", out.display()), &History::new());
        assert_eq!(shell.scheduler().pending(), 1);
        assert!(!out.exists());

        let deadline = Instant::now() + Duration::from_secs(5);
        while shell.scheduler().pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        // キューから外れた後、実行完了まで少し待つ
        while fs::read_to_string(&out).map_or(true, |s| s.is_empty()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(fs::read_to_string(&out).unwrap(), "late\n");
        shell.shutdown();
    }

    #[test]
    fn invalid_delay_is_not_queued() {
        let mut shell = Shell::new().unwrap();
        shell.run("delay 0 echo hi", &History::new());
        shell.run("delay x echo hi", &History::new());
        shell.run("delay 3", &History::new());
        shell.run("delay 9223372036854775807 echo hi", &History::new());
        assert_eq!(shell.scheduler().pending(), 0);
        assert!(!shell.should_exit);
    }

    #[test]
    fn status_of_launch_failures() {
        let err = executor::run_line("dsh-no-such-program-xyz").unwrap_err();
        assert_eq!(exit_status(&err), 127);
        assert_eq!(exit_status(&ExecError::Parse(ParseError::EmptyPipelineSegment)), 2);
    }
}

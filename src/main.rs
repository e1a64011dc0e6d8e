//! dsh — 遅延実行付きの対話シェル
//!
//! REPLループ: プロンプト表示 → 行エディタで入力読み取り → 履歴追加 →
//! ビルトイン（`exit`, `cd`, `history`, `delay`）または外部コマンドとして実行 → ループ
//!
//! モジュール構成は `lib.rs` を参照。

use dsh::editor::LineEditor;
use dsh::job;
use dsh::shell::Shell;

const PROMPT: &str = "dsh> ";

fn main() {
    env_logger::init();

    // シェル自身は SIGINT/SIGQUIT/SIGTSTP を無視する。
    // 子プロセスは posix_spawnattr の POSIX_SPAWN_SETSIGDEF で SIG_DFL に戻る。
    job::init_shell_signals();

    let mut shell = match Shell::new() {
        Ok(shell) => shell,
        Err(e) => {
            eprintln!("dsh: cannot start delay worker: {}", e);
            std::process::exit(1);
        }
    };
    let mut editor = LineEditor::new();

    println!("Welcome to dsh. Type `exit` to leave, `delay <seconds> <command>` to run later.");

    loop {
        // 行エディタで 1 行読み取る（raw モード → Enter で確定 → cooked モードに復帰）
        let line = match editor.read_line(PROMPT) {
            Some(line) => line,
            None => break, // EOF / 空行での Ctrl+D
        };
        if line.trim().is_empty() {
            continue;
        }
        editor.add_history(&line);
        shell.run(&line, editor.history());
        if shell.should_exit {
            break;
        }
    }

    shell.shutdown();
    println!("Goodbye.");
    std::process::exit(0);
}

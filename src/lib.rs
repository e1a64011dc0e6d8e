//! dsh ライブラリ — バイナリ・テスト・ベンチマーク共通のモジュール群。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`editor`] | 行エディタ（raw モード、キー入力、インライン補完の循環、↑↓ 履歴呼び出し） |
//! | [`history`] | コマンド履歴（固定容量リングバッファ、論理インデックス参照） |
//! | [`complete`] | Tab 補完（ファイル名、先頭ワードでは `$PATH` の実行可能ファイル） |
//! | [`parser`] | 引数構築（クォート除去、空白分割、末尾 `&`、glob 展開）と段・リダイレクト抽出 |
//! | [`glob`] | パス名展開（`*`, `?`, `[...]`） |
//! | [`executor`] | コマンド実行（単一コマンド、パイプライン、リダイレクト、バックグラウンド） |
//! | [`scheduler`] | 遅延実行キューとワーカースレッド（`Mutex` + `Condvar`、協調的停止） |
//! | [`builtins`] | ビルトイン（`exit`, `cd`, `history`, `delay`） |
//! | [`job`] | シグナル設定、バックグラウンドの自動回収、子プロセスの待機 |
//! | [`shell`] | シェルの状態（遅延実行ワーカー、終了フラグ） |
//! | [`spawn`] | `posix_spawnp` ラッパー（子側でのシグナル既定化と fd 差し替え） |

pub mod builtins;
pub mod complete;
pub mod editor;
pub mod executor;
pub mod glob;
pub mod history;
pub mod job;
pub mod parser;
pub mod scheduler;
pub mod shell;
pub mod spawn;

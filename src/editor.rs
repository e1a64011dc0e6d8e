//! 行エディタ: raw モード、1 バイト単位のキー入力、インライン補完、履歴呼び出し。
//!
//! `libc`（termios, `read(2)`, `write(2)`, `poll(2)`）のみで実装する。
//!
//! ## バッファモデル
//!
//! 入力バッファは ASCII バイト列で、長さがそのまま編集位置になる（追記と末尾削除のみ）。
//! ←→ は補完候補がないとき端末上のカーソル表示を動かすだけで、バッファには影響しない。
//!
//! ## 状態遷移
//!
//! ```text
//!   Tab ──▶ 補完セット生成 ─(0 件)─▶ ベル
//!             │
//!             ▼
//!        候補[0] を適用 ◀──┐  Tab / → : 次の候補
//!             │            │  ←       : 前の候補
//!             └────────────┘
//!   文字入力で prefix 長を超える / Backspace で prefix 長を下回る / ↑↓ / Enter
//!        ──▶ 補完セット破棄
//! ```
//!
//! ## raw モードの範囲
//!
//! raw モードは [`LineEditor::read_line`] 内でのみ有効。[`RawMode`] の Drop で
//! どの経路で抜けても元の termios に戻る。

use crate::complete::{self, Completions};
use crate::history::History;

/// 入力バッファの容量（終端分を含む。実際に入るのは `MAX_LINE - 1` バイト）。
pub const MAX_LINE: usize = 256;

const BOLD_WHITE: &str = "\x1b[37m\x1b[1m";
const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\x1b[2K\r";

// ── RawMode ガード ────────────────────────────────────────────────

/// RAII ガード。Drop で元の termios を復元する。
///
/// | フラグ | 操作 |
/// |--------|------|
/// | `c_iflag` | `ICRNL\|IXON` OFF |
/// | `c_lflag` | `ECHO\|ICANON\|IEXTEN\|ISIG` OFF |
/// | `VMIN`/`VTIME` | `1` / `0` |
///
/// `OPOST` は ON のまま（`\n` → `\r\n` 変換を維持）。
/// `tcgetattr` に失敗した場合（端末でない stdin など）は何も変更せず、復元もしない。
struct RawMode {
    orig: Option<libc::termios>,
    fd: i32,
}

impl RawMode {
    fn enable(fd: i32) -> Self {
        let mut orig: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut orig) } != 0 {
            report_termios_error("tcgetattr");
            return Self { orig: None, fd };
        }

        let mut raw = orig;
        raw.c_iflag &= !(libc::ICRNL | libc::IXON);
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            // 現在のモードのまま続行する
            report_termios_error("tcsetattr");
        }
        Self {
            orig: Some(orig),
            fd,
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Some(orig) = &self.orig {
            if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, orig) } != 0 {
                report_termios_error("tcsetattr");
            }
        }
    }
}

fn report_termios_error(call: &str) {
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOTTY) {
        log::debug!("{}: stdin is not a terminal", call);
    } else {
        eprintln!("dsh: {}: {}", call, err);
    }
}

// ── Key 入力 ──────────────────────────────────────────────────────

/// raw モードで読み取った 1 キー。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Key {
    /// 印字可能 ASCII（`0x20`〜`0x7e`）。
    Char(u8),
    /// `\r` / `\n`。
    Enter,
    /// DEL `0x7f` / BS `0x08`。
    Backspace,
    Tab,
    /// `ESC [ A`
    Up,
    /// `ESC [ B`
    Down,
    /// `ESC [ D`
    Left,
    /// `ESC [ C`
    Right,
    /// `0x03`
    CtrlC,
    /// `0x04`
    CtrlD,
    /// 入力終端（`read` が 0 またはエラー）。
    Eof,
    Unknown,
}

fn read_byte(fd: i32) -> Option<u8> {
    let mut buf = [0u8; 1];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        if n == 1 {
            return Some(buf[0]);
        }
        if n < 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return None;
    }
}

/// ESC 後のシーケンスを読む。50ms 以内に後続がなければ ESC 単独とみなす。
fn read_escape_seq(fd: i32) -> Key {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    if unsafe { libc::poll(&mut pfd, 1, 50) } <= 0 {
        return Key::Unknown;
    }
    if read_byte(fd) != Some(b'[') {
        return Key::Unknown;
    }
    decode_csi(|| read_byte(fd))
}

/// `ESC [` 以降を終端バイトまで読む。矢印以外（`ESC [ 3 ~` など）は
/// パラメータごと読み捨てて `Unknown` にする。
fn decode_csi(mut next: impl FnMut() -> Option<u8>) -> Key {
    loop {
        match next() {
            Some(b'A') => return Key::Up,
            Some(b'B') => return Key::Down,
            Some(b'C') => return Key::Right,
            Some(b'D') => return Key::Left,
            Some(b'0'..=b'9' | b';') => continue,
            _ => return Key::Unknown,
        }
    }
}

fn read_key(fd: i32) -> Key {
    match read_byte(fd) {
        None => Key::Eof,
        Some(b'\r' | b'\n') => Key::Enter,
        Some(0x7f | 0x08) => Key::Backspace,
        Some(0x09) => Key::Tab,
        Some(0x1b) => read_escape_seq(fd),
        Some(0x03) => Key::CtrlC,
        Some(0x04) => Key::CtrlD,
        Some(b) if (0x20..0x7f).contains(&b) => Key::Char(b),
        Some(_) => Key::Unknown,
    }
}

// ── LineEditor ────────────────────────────────────────────────────

/// 1 回の [`LineEditor::handle_key`] の結果。
#[derive(Debug, PartialEq)]
pub enum Step {
    Continue,
    /// Enter で行確定。
    Done,
    /// 入力終端（Ctrl+D on empty / EOF）。
    Eof,
}

/// 表示中の補完セットと巡回位置。
struct Cycle {
    set: Completions,
    index: usize,
    /// 生成時のバッファ。ここから先の候補部分を強調表示する。
    base: String,
}

impl Cycle {
    /// 生成時のバッファ長。これを超えて入力する／下回って削除すると破棄する。
    fn prefix_len(&self) -> usize {
        self.base.len()
    }

    /// 現在の候補を適用したバッファ全体。
    fn full_line(&self) -> String {
        let word_start = self.set.word_start.min(self.base.len());
        format!("{}{}", &self.base[..word_start], self.set.candidates[self.index])
    }
}

/// 行エディタ本体。入力バッファ、履歴、補完状態を保持する。
pub struct LineEditor {
    buf: String,
    capacity: usize,
    history: History,
    /// 履歴ナビゲーション位置（論理インデックス）。`history.total()` は新規行。
    nav: usize,
    cycle: Option<Cycle>,
    /// 直前のキーが補完候補の生成・巡回だったか。Tab はこのときだけ次の候補へ進む。
    cycling: bool,
    /// 端末上の表示カーソル列（バッファ先頭からの位置）。
    col: usize,
    fd: i32,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::with_history(History::new())
    }

    pub fn with_history(history: History) -> Self {
        Self {
            buf: String::new(),
            capacity: MAX_LINE,
            nav: history.total(),
            history,
            cycle: None,
            cycling: false,
            col: 0,
            fd: libc::STDIN_FILENO,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// 確定した行を履歴に追加する。空行は追加しない。
    pub fn add_history(&mut self, line: &str) {
        if !line.trim().is_empty() {
            self.history.push(line);
        }
    }

    /// プロンプトを表示して 1 行読む。入力終端なら `None`。
    pub fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.reset();
        let _raw = RawMode::enable(self.fd);

        let mut out = String::new();
        self.refresh(prompt, &mut out);
        write_all(&out);

        loop {
            let key = read_key(self.fd);
            out.clear();
            let step = self.handle_key(key, prompt, &mut out);
            write_all(&out);
            match step {
                Step::Continue => {}
                Step::Done => return Some(std::mem::take(&mut self.buf)),
                Step::Eof => {
                    write_all("\n");
                    return None;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.col = 0;
        self.nav = self.history.total();
        self.cycle = None;
        self.cycling = false;
    }

    /// 1 キーを処理し、端末への出力を `out` に積む。
    pub fn handle_key(&mut self, key: Key, prompt: &str, out: &mut String) -> Step {
        let was_cycling = std::mem::take(&mut self.cycling);
        let cycle_key = match key {
            Key::Tab => true,
            Key::Left | Key::Right => self.cycle.is_some(),
            _ => false,
        };
        match key {
            Key::Enter => {
                self.cycle = None;
                out.push('\n');
                return Step::Done;
            }
            Key::Eof => return Step::Eof,
            Key::CtrlD if self.buf.is_empty() => return Step::Eof,
            Key::CtrlD | Key::Unknown => {}
            Key::CtrlC => {
                out.push_str("^C\n");
                self.reset();
                self.refresh(prompt, out);
            }
            Key::Tab => self.complete(was_cycling, prompt, out),
            Key::Up => self.history_prev(prompt, out),
            Key::Down => self.history_next(prompt, out),
            Key::Left => {
                if self.cycle.is_some() {
                    self.rotate(false, prompt, out);
                } else if self.col > 0 {
                    self.col -= 1;
                    out.push('\x08');
                }
            }
            Key::Right => {
                if self.cycle.is_some() {
                    self.rotate(true, prompt, out);
                } else if self.col < self.buf.len() {
                    self.col += 1;
                    out.push_str("\x1b[C");
                }
            }
            Key::Backspace => {
                if self.buf.pop().is_some() {
                    if self
                        .cycle
                        .as_ref()
                        .is_some_and(|c| self.buf.len() < c.prefix_len())
                    {
                        self.cycle = None;
                    }
                    self.refresh(prompt, out);
                }
            }
            Key::Char(b) => {
                if self.buf.len() + 1 < self.capacity {
                    self.buf.push(b as char);
                    if self
                        .cycle
                        .as_ref()
                        .is_some_and(|c| self.buf.len() > c.prefix_len())
                    {
                        self.cycle = None;
                    }
                    self.refresh(prompt, out);
                }
            }
        }
        self.cycling = cycle_key && self.cycle.is_some();
        Step::Continue
    }

    // ── 補完 ──────────────────────────────────────────────────────

    /// Tab: 直前も補完キーなら次の候補へ。それ以外は現在のバッファから作り直す。
    fn complete(&mut self, continue_cycle: bool, prompt: &str, out: &mut String) {
        if continue_cycle && self.cycle.is_some() {
            self.rotate(true, prompt, out);
            return;
        }
        self.cycle = None;

        let set = complete::generate(&self.buf, self.buf.len());
        if set.is_empty() {
            out.push('\x07');
            return;
        }
        self.cycle = Some(Cycle {
            set,
            index: 0,
            base: self.buf.clone(),
        });
        self.apply_candidate(prompt, out);
    }

    fn rotate(&mut self, forward: bool, prompt: &str, out: &mut String) {
        if let Some(cycle) = self.cycle.as_mut() {
            let n = cycle.set.candidates.len();
            cycle.index = if forward {
                (cycle.index + 1) % n
            } else {
                (cycle.index + n - 1) % n
            };
        }
        self.apply_candidate(prompt, out);
    }

    /// 現在の候補でバッファを置き換え、候補の未入力部分を強調表示する。
    fn apply_candidate(&mut self, prompt: &str, out: &mut String) {
        let Some(cycle) = self.cycle.as_ref() else {
            return;
        };
        let mut line = cycle.full_line();
        truncate_ascii(&mut line, self.capacity - 1);
        let suffix = line.strip_prefix(cycle.base.as_str()).unwrap_or(&line);

        out.push_str(CLEAR_LINE);
        out.push_str(prompt);
        if suffix.len() < line.len() {
            out.push_str(&cycle.base);
        }
        out.push_str(BOLD_WHITE);
        out.push_str(suffix);
        out.push_str(RESET);

        self.buf = line;
        self.col = self.buf.len();
    }

    // ── 履歴 ──────────────────────────────────────────────────────

    fn history_prev(&mut self, prompt: &str, out: &mut String) {
        if self.nav <= self.history.oldest() {
            return;
        }
        let Some(entry) = self.history.get(self.nav - 1) else {
            return;
        };
        let mut entry = entry.to_string();
        truncate_ascii(&mut entry, self.capacity - 1);
        self.nav -= 1;
        self.buf = entry;
        self.cycle = None;
        self.refresh(prompt, out);
    }

    fn history_next(&mut self, prompt: &str, out: &mut String) {
        let total = self.history.total();
        if self.nav >= total {
            return;
        }
        self.nav += 1;
        match self.history.get(self.nav) {
            Some(entry) if self.nav < total => {
                let mut entry = entry.to_string();
                truncate_ascii(&mut entry, self.capacity - 1);
                self.buf = entry;
            }
            _ => self.buf.clear(),
        }
        self.cycle = None;
        self.refresh(prompt, out);
    }

    // ── 表示更新 ──────────────────────────────────────────────────

    /// 行全体を再描画する。カーソルは行末。
    fn refresh(&mut self, prompt: &str, out: &mut String) {
        out.push_str(CLEAR_LINE);
        out.push_str(prompt);
        out.push_str(&self.buf);
        self.col = self.buf.len();
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// 履歴・補完候補は ASCII 以外を含みうるので、文字境界を守って切り詰める。
fn truncate_ascii(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// `libc::write` で直接出力する（Rust の stdout バッファをバイパス）。
fn write_all(s: &str) {
    let bytes = s.as_bytes();
    let mut written = 0;
    while written < bytes.len() {
        let n = unsafe {
            libc::write(
                libc::STDOUT_FILENO,
                bytes[written..].as_ptr() as *const libc::c_void,
                bytes.len() - written,
            )
        };
        if n <= 0 {
            break;
        }
        written += n as usize;
    }
}

// ── Tests ─────────────────────────────────────────────────────────

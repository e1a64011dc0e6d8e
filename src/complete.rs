//! Tab 補完の候補生成（ファイルシステムエントリ + `$PATH` 内の実行ファイル）。
//!
//! 補完対象はカーソル直前の単語（最後の空白より後ろ）。
//!
//! 1. 単語を最後の `/` で分割する。`/` がなければ検索ディレクトリはカレント、
//!    あれば `/` より前が検索ディレクトリ、後ろがプレフィックス
//! 2. 検索ディレクトリ内でプレフィックスに前方一致するエントリを列挙順に集める
//!    （`.` と `..` は除外、ディレクトリには末尾 `/`、`/` があればディレクトリ部で修飾）
//! 3. `/` がなくコマンド位置（行頭 or `|` の直後）なら、`$PATH` の各ディレクトリを
//!    記載順に走査し、所有者実行可能な通常ファイルを追加する。同名は先勝ち
//!
//! 読めないディレクトリは候補 0 件として扱い、エラーにはしない。

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// 補完結果。候補と、置換対象となる単語の開始位置を持つ。
#[derive(Debug, Default)]
pub struct Completions {
    /// 候補（重複なし、生成順）。各候補は単語全体を置き換える文字列。
    pub candidates: Vec<String>,
    /// 置換対象の単語の開始バイトオフセット。
    pub word_start: usize,
}

impl Completions {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// `buf[..cursor]` の末尾の単語に対する補完候補を生成する。`$PATH` は環境から読む。
pub fn generate(buf: &str, cursor: usize) -> Completions {
    let path = std::env::var("PATH").ok();
    generate_with_path(buf, cursor, path.as_deref())
}

/// [`generate`] の `$PATH` 明示版。
pub fn generate_with_path(buf: &str, cursor: usize, path_var: Option<&str>) -> Completions {
    let cursor = cursor.min(buf.len());
    let (word_start, word, command_position) = current_word(buf, cursor);

    let mut candidates = Vec::new();
    let mut seen = HashSet::new();

    let has_slash = word.contains('/');
    scan_filesystem(word, &mut candidates, &mut seen);
    if !has_slash && command_position {
        if let Some(path_var) = path_var {
            scan_path(word, path_var, &mut candidates, &mut seen);
        }
    }
    log::trace!("complete {:?}: {} candidates", word, candidates.len());

    Completions {
        candidates,
        word_start,
    }
}

/// カーソル直前の単語を取り出す。
/// 戻り値: (単語開始位置, 単語, コマンド位置か)
fn current_word(buf: &str, cursor: usize) -> (usize, &str, bool) {
    let before = &buf[..cursor];
    let word_start = before
        .rfind(|c: char| c == ' ' || c == '\t')
        .map(|i| i + 1)
        .unwrap_or(0);
    let leading = before[..word_start].trim_end();
    let command_position = leading.is_empty() || leading.ends_with('|');
    (word_start, &before[word_start..], command_position)
}

fn push_unique(name: String, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    if seen.insert(name.clone()) {
        out.push(name);
    }
}

fn scan_filesystem(word: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    let (dir, prefix, qualifier) = match word.rfind('/') {
        None => (".", word, None),
        Some(pos) => {
            let dir = &word[..pos];
            let search = if dir.is_empty() { "/" } else { dir };
            (search, &word[pos + 1..], Some(dir))
        }
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::trace!("complete: cannot read {}: {}", dir, e);
            return;
        }
    };

    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == "." || name == ".." || !name.starts_with(prefix) {
            continue;
        }
        // シンボリックリンク先がディレクトリでも `/` を付ける
        let is_dir = std::fs::metadata(entry.path()).map_or(false, |m| m.is_dir());
        let mut candidate = match qualifier {
            Some(q) => format!("{}/{}", q, name),
            None => name,
        };
        if is_dir {
            candidate.push('/');
        }
        push_unique(candidate, out, seen);
    }
}

fn scan_path(prefix: &str, path_var: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(prefix) && is_owner_executable(&entry.path()) {
                push_unique(name, out, seen);
            }
        }
    }
}

/// 通常ファイルかつ所有者実行ビット（`S_IXUSR`）が立っているか。
fn is_owner_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o100 != 0,
        Err(_) => false,
    }
}

//! ワイルドカード展開: `*`, `?`, `[...]` を含むトークンをファイルパス列に置き換える。
//!
//! ## 展開規則
//!
//! - パスは `/` でセグメントに分割し、グロブ文字を含むセグメントだけをディレクトリ走査で照合する
//! - マッチ結果は辞書順ソート
//! - マッチなし → トークン自身を 1 要素で返す（空にはならない）
//! - `.` で始まるエントリは、セグメントが `.` で始まる場合のみマッチ
//!
//! ## パターン構文
//!
//! | 記号 | 意味 |
//! |------|------|
//! | `*` | 0 文字以上 |
//! | `?` | 任意の 1 文字 |
//! | `[abc]` / `[a-z]` | 文字クラス / 範囲 |
//! | `[!...]` / `[^...]` | 否定クラス |

use std::path::Path;

/// トークンにワイルドカード文字が含まれるか。
pub fn is_pattern(token: &str) -> bool {
    token.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
}

/// トークンを展開する。ワイルドカードなしのトークンはそのまま返す。
pub fn expand(token: &str) -> Vec<String> {
    if !is_pattern(token) {
        return vec![token.to_string()];
    }

    let absolute = token.starts_with('/');
    let segments: Vec<&str> = token.split('/').filter(|s| !s.is_empty()).collect();

    // 途中経過: 照合済みプレフィックスの一覧。空文字列はカレントディレクトリを表す。
    let mut prefixes = vec![if absolute { "/".to_string() } else { String::new() }];
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let mut next = Vec::new();
        for prefix in &prefixes {
            if is_pattern(segment) {
                next.extend(match_segment(prefix, segment, last));
            } else {
                let candidate = join(prefix, segment);
                if last || Path::new(&candidate).is_dir() {
                    next.push(candidate);
                }
            }
        }
        prefixes = next;
        if prefixes.is_empty() {
            break;
        }
    }

    // 末尾がリテラルのセグメントは存在確認が必要（`*/nosuch` など）
    prefixes.retain(|p| Path::new(p).symlink_metadata().is_ok());
    if prefixes.is_empty() {
        return vec![token.to_string()];
    }
    prefixes.sort();
    prefixes
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// `prefix` ディレクトリ内で `segment` にマッチするエントリを返す。
/// 最終セグメントでなければディレクトリのみ残す。
fn match_segment(prefix: &str, segment: &str, last: bool) -> Vec<String> {
    let dir = if prefix.is_empty() { "." } else { prefix };
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') && !segment.starts_with('.') {
            continue;
        }
        if !matches(segment, &name) {
            continue;
        }
        let path = join(prefix, &name);
        if last || Path::new(&path).is_dir() {
            found.push(path);
        }
    }
    found
}

/// パターンと名前を照合する。
///
/// `*` はバックトラック位置を 1 つだけ記憶する反復アルゴリズムで処理する
/// （直近の `*` からやり直せば十分なため、再帰は不要）。
pub fn matches(pattern: &str, name: &str) -> bool {
    let pat = pattern.as_bytes();
    let nam = name.as_bytes();
    let (mut p, mut n) = (0usize, 0usize);
    // (star の直後のパターン位置, そのとき star が吸収し始めた名前位置)
    let mut backtrack: Option<(usize, usize)> = None;

    while n < nam.len() {
        let step = match pat.get(p) {
            Some(b'*') => {
                backtrack = Some((p + 1, n));
                p += 1;
                continue;
            }
            Some(b'?') => Some(p + 1),
            Some(b'[') => match match_class(pat, p, nam[n]) {
                Some((true, end)) => Some(end),
                Some((false, _)) => None,
                // 閉じ括弧なし → `[` をリテラルとして扱う
                None if nam[n] == b'[' => Some(p + 1),
                None => None,
            },
            Some(&c) if c == nam[n] => Some(p + 1),
            _ => None,
        };

        match step {
            Some(next) => {
                p = next;
                n += 1;
            }
            None => match backtrack {
                Some((bp, bn)) => {
                    p = bp;
                    n = bn + 1;
                    backtrack = Some((bp, bn + 1));
                }
                None => return false,
            },
        }
    }

    pat[p..].iter().all(|&b| b == b'*')
}

/// `pat[start]` の `[` から始まる文字クラスを `ch` と照合する。
/// 戻り値: `Some((一致したか, クラス直後の位置))`、閉じ括弧がなければ `None`。
fn match_class(pat: &[u8], start: usize, ch: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pat.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }

    let mut hit = false;
    let mut first = true;
    loop {
        let c = *pat.get(i)?;
        // 先頭の `]` はリテラル
        if c == b']' && !first {
            return Some((hit != negate, i + 1));
        }
        first = false;
        match (pat.get(i + 1), pat.get(i + 2)) {
            (Some(b'-'), Some(&hi)) if hi != b']' => {
                let (lo, hi) = if c <= hi { (c, hi) } else { (hi, c) };
                hit |= (lo..=hi).contains(&ch);
                i += 3;
            }
            _ => {
                hit |= c == ch;
                i += 1;
            }
        }
    }
}

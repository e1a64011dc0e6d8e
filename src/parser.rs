//! 入力行 → 引数ベクタ → パイプライン段の構築。
//!
//! ## 処理順
//!
//! 1. ダブルクォートを全て除去する（クォート内の空白でも分割される。グルーピングはしない）
//! 2. 空白で分割する。[`MAX_ARGS`]` - 1` 個を超えるトークンは捨てる
//! 3. 末尾トークンがちょうど `&` ならバックグラウンド指定として取り除く
//! 4. `*`, `?`, `[` を含むトークンを [`glob::expand`] で展開する
//!
//! ここまでが [`parse`]。構造トークン `<`, `>`, `>>`, `|` は残したまま返し、
//! [`stages`] が `|` で段に分け、各段からリダイレクト指定を取り出す。

use thiserror::Error;

use crate::glob;

/// 引数ベクタの上限（終端分を含む。実際に保持するのは `MAX_ARGS - 1` 個）。
pub const MAX_ARGS: usize = 25;

/// トークン化とワイルドカード展開を終えた 1 行。
#[derive(Debug, PartialEq)]
pub struct CommandLine {
    /// 構造トークンを含む引数ベクタ。
    pub argv: Vec<String>,
    /// 末尾 `&` が付いていたか。
    pub background: bool,
}

/// パイプラインの 1 段。`argv` からはリダイレクト演算子とファイル名が取り除かれている。
#[derive(Debug, Default, PartialEq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub redirects: Redirects,
}

/// 段ごとのリダイレクト指定。各演算子は 1 回まで。
#[derive(Debug, Default, PartialEq)]
pub struct Redirects {
    /// `< file`
    pub input: Option<String>,
    /// `> file`（作成 / 切り詰め）
    pub truncate: Option<String>,
    /// `>> file`（作成 / 追記）。`>` と両方あれば stdout はこちら。
    pub append: Option<String>,
}

impl Redirects {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.truncate.is_none() && self.append.is_none()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// `|` の前後にコマンドがない。
    #[error("syntax error: empty pipeline segment")]
    EmptyPipelineSegment,
    /// リダイレクト演算子の後にファイル名がない。
    #[error("syntax error: missing file name after `{0}`")]
    MissingRedirectTarget(&'static str),
    /// 同じ段に同じリダイレクト演算子が 2 回以上ある。
    #[error("syntax error: duplicate `{0}` redirection")]
    DuplicateRedirect(&'static str),
}

/// ダブルクォートを全て取り除く。
pub fn strip_quotes(line: &str) -> String {
    line.chars().filter(|&c| c != '"').collect()
}

/// 1 行を引数ベクタにする。トークンが残らなければ `None`。
pub fn parse(line: &str) -> Option<CommandLine> {
    let stripped = strip_quotes(line);
    let mut tokens: Vec<&str> = stripped.split_whitespace().take(MAX_ARGS - 1).collect();

    let background = tokens.last() == Some(&"&");
    if background {
        tokens.pop();
    }
    if tokens.is_empty() {
        return None;
    }

    let argv = tokens.into_iter().flat_map(glob::expand).collect();
    Some(CommandLine { argv, background })
}

fn is_structural(token: &str) -> bool {
    matches!(token, "<" | ">" | ">>" | "|" | "&")
}

/// 引数ベクタを `|` で段に分け、各段のリダイレクトを取り出す。
pub fn stages(argv: &[String]) -> Result<Vec<Stage>, ParseError> {
    argv.split(|t| t == "|").map(stage).collect()
}

fn stage(tokens: &[String]) -> Result<Stage, ParseError> {
    let mut out = Stage::default();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        let (op, slot): (&'static str, &mut Option<String>) = match token.as_str() {
            "<" => ("<", &mut out.redirects.input),
            ">" => (">", &mut out.redirects.truncate),
            ">>" => (">>", &mut out.redirects.append),
            _ => {
                out.argv.push(token.clone());
                continue;
            }
        };
        let target = match iter.next() {
            Some(t) if !is_structural(t) => t.clone(),
            _ => return Err(ParseError::MissingRedirectTarget(op)),
        };
        if slot.is_some() {
            return Err(ParseError::DuplicateRedirect(op));
        }
        *slot = Some(target);
    }

    if out.argv.is_empty() {
        return Err(ParseError::EmptyPipelineSegment);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn argv(line: &str) -> Vec<String> {
        parse(line).unwrap().argv
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(argv("ls   -l\t/tmp "), words(&["ls", "-l", "/tmp"]));
    }

    #[test]
    fn empty_and_blank_lines() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("   "), None);
        assert_eq!(parse("&"), None);
    }

    #[test]
    fn quotes_are_removed_not_grouped() {
        assert_eq!(argv("echo \"a b\""), words(&["echo", "a", "b"]));
        assert_eq!(argv("echo x\"y\"z"), words(&["echo", "xyz"]));
    }

    #[test]
    fn trailing_ampersand_sets_background() {
        let line = parse("sleep 5 &").unwrap();
        assert!(line.background);
        assert_eq!(line.argv, words(&["sleep", "5"]));

        let line = parse("sleep 5&").unwrap();
        assert!(!line.background);

        let line = parse("a & b").unwrap();
        assert!(!line.background);
        assert_eq!(line.argv, words(&["a", "&", "b"]));
    }

    #[test]
    fn excess_tokens_dropped() {
        let line: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let got = argv(&line.join(" "));
        assert_eq!(got.len(), MAX_ARGS - 1);
        assert_eq!(got.last().map(String::as_str), Some("23"));
    }

    #[test]
    fn wildcard_without_match_kept() {
        assert_eq!(argv("ls nomatch*xyz"), words(&["ls", "nomatch*xyz"]));
    }

    #[test]
    fn single_stage_with_redirects() {
        let st = stages(&words(&["sort", "<", "in", ">", "out", "-r"])).unwrap();
        assert_eq!(st.len(), 1);
        assert_eq!(st[0].argv, words(&["sort", "-r"]));
        assert_eq!(st[0].redirects.input.as_deref(), Some("in"));
        assert_eq!(st[0].redirects.truncate.as_deref(), Some("out"));
        assert_eq!(st[0].redirects.append, None);
    }

    #[test]
    fn append_redirect() {
        let st = stages(&words(&["echo", "hi", ">>", "log"])).unwrap();
        assert_eq!(st[0].argv, words(&["echo", "hi"]));
        assert_eq!(st[0].redirects.append.as_deref(), Some("log"));
    }

    #[test]
    fn pipeline_segments() {
        let st = stages(&words(&["echo", "hi", "|", "wc", "-c"])).unwrap();
        assert_eq!(st.len(), 2);
        assert_eq!(st[0].argv, words(&["echo", "hi"]));
        assert_eq!(st[1].argv, words(&["wc", "-c"]));
        assert!(st[1].redirects.is_empty());
    }

    #[test]
    fn empty_segments_rejected() {
        for v in [
            &["|", "wc"][..],
            &["ls", "|"][..],
            &["ls", "|", "|", "wc"][..],
            &["<", "in"][..],
        ] {
            assert_eq!(stages(&words(v)), Err(ParseError::EmptyPipelineSegment));
        }
    }

    #[test]
    fn redirect_without_target() {
        assert_eq!(
            stages(&words(&["echo", ">"])),
            Err(ParseError::MissingRedirectTarget(">"))
        );
        assert_eq!(
            stages(&words(&["cat", "<", "|", "wc"])),
            Err(ParseError::MissingRedirectTarget("<"))
        );
    }

    #[test]
    fn duplicate_redirect_rejected() {
        assert_eq!(
            stages(&words(&["echo", ">", "a", ">", "b"])),
            Err(ParseError::DuplicateRedirect(">"))
        );
    }
}

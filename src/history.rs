//! コマンド履歴（プロセス存続中のみ、ディスク永続化なし）。
//!
//! 固定容量のリングバッファ。論理インデックス（0 起点の通算挿入番号）は
//! 容量を超えても増え続け、物理スロットは `logical % capacity` で求める。
//! 上書き済みの古い論理インデックスを引くと `None` になるため、
//! 呼び出し側が剰余計算を持つ必要はない。

/// 既定の保持件数。
pub const HISTORY_CAPACITY: usize = 100;

/// `history` ビルトインが表示する件数。
pub const HISTORY_SHOWN: usize = 10;

/// 固定容量の履歴リングバッファ。
pub struct History {
    /// 物理スロット。`total < capacity` の間は末尾追加、以後は上書き。
    slots: Vec<String>,
    capacity: usize,
    /// これまでに挿入された総数（= 次に割り当てる論理インデックス）。
    total: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    /// エントリを追加する。容量到達後は最古のスロットを上書きする。
    pub fn push(&mut self, line: &str) {
        if self.slots.len() < self.capacity {
            self.slots.push(line.to_string());
        } else {
            let slot = self.total % self.capacity;
            self.slots[slot] = line.to_string();
        }
        self.total += 1;
    }

    /// 通算挿入数。
    pub fn total(&self) -> usize {
        self.total
    }

    /// まだ保持されている最古の論理インデックス。
    pub fn oldest(&self) -> usize {
        self.total.saturating_sub(self.capacity)
    }

    /// 論理インデックスでエントリを引く。範囲外・上書き済みなら `None`。
    pub fn get(&self, logical: usize) -> Option<&str> {
        if logical < self.oldest() || logical >= self.total {
            return None;
        }
        self.slots.get(logical % self.capacity).map(String::as_str)
    }

    /// 直近 `n` 件を `(論理インデックス, エントリ)` の古い順で返す。
    pub fn recent(&self, n: usize) -> impl Iterator<Item = (usize, &str)> + '_ {
        let start = self.total.saturating_sub(n).max(self.oldest());
        (start..self.total).filter_map(move |i| self.get(i).map(|e| (i, e)))
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_before_wrap() {
        let mut h = History::with_capacity(4);
        h.push("a");
        h.push("b");
        assert_eq!(h.total(), 2);
        assert_eq!(h.oldest(), 0);
        assert_eq!(h.get(0), Some("a"));
        assert_eq!(h.get(1), Some("b"));
        assert_eq!(h.get(2), None);
    }

    #[test]
    fn wrap_overwrites_oldest() {
        let mut h = History::with_capacity(3);
        for s in ["a", "b", "c", "d", "e"] {
            h.push(s);
        }
        assert_eq!(h.total(), 5);
        assert_eq!(h.oldest(), 2);
        assert_eq!(h.get(1), None);
        assert_eq!(h.get(2), Some("c"));
        assert_eq!(h.get(4), Some("e"));
    }

    #[test]
    fn recent_after_overflow_shows_last_ten() {
        let mut h = History::new();
        for i in 1..=105 {
            h.push(&format!("cmd{}", i));
        }
        let shown: Vec<(usize, String)> = h
            .recent(HISTORY_SHOWN)
            .map(|(i, e)| (i + 1, e.to_string()))
            .collect();
        assert_eq!(shown.len(), 10);
        assert_eq!(shown[0], (96, "cmd96".to_string()));
        assert_eq!(shown[9], (105, "cmd105".to_string()));
    }

    #[test]
    fn recent_clamped_by_capacity() {
        let mut h = History::with_capacity(2);
        for s in ["x", "y", "z"] {
            h.push(s);
        }
        let got: Vec<&str> = h.recent(10).map(|(_, e)| e).collect();
        assert_eq!(got, vec!["y", "z"]);
    }
}

//! 滚动对话记录
//!
//! 每次交互渲染为一行固定格式文本：
//!
//! ```text
//! [2024-05-07 10:00:00] alice (42): hello | Bot: hi there | Reply: 1234
//! ```
//!
//! 记录条数有上限，超出后从最旧的一端淘汰（FIFO）。

use chrono::NaiveDateTime;
use std::collections::VecDeque;

const ELLIPSIS: &str = "...";

/// 一次交互，渲染前的结构化形态
#[derive(Debug, Clone)]
pub struct TranscriptEntry<'a> {
    pub timestamp: NaiveDateTime,
    pub author_id: &'a str,
    pub author_name: &'a str,
    pub message: &'a str,
    pub response: &'a str,
    pub replied_to: Option<&'a str>,
}

impl TranscriptEntry<'_> {
    /// 渲染为单行：字段内换行压平为空格，消息/回复各截断到 `field_cap` 个字符，
    /// 整行超过 `line_cap` 时截断并以 `...` 结尾（结尾标记计入上限）。
    pub fn render(&self, field_cap: usize, line_cap: usize) -> String {
        let message = truncate_chars(&flatten(self.message), field_cap);
        let response = truncate_chars(&flatten(self.response), field_cap);
        let mut line = format!(
            "[{}] {} ({}): {} | Bot: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            flatten(self.author_name),
            flatten(self.author_id),
            message,
            response,
        );
        if let Some(id) = self.replied_to {
            line.push_str(" | Reply: ");
            line.push_str(&flatten(id));
        }

        if line.chars().count() > line_cap {
            let keep = line_cap.saturating_sub(ELLIPSIS.len());
            let mut cut: String = line.chars().take(keep).collect();
            cut.push_str(ELLIPSIS);
            cut
        } else {
            line
        }
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// 有界的行记录，最旧的在前
#[derive(Debug, Default)]
pub struct Transcript {
    lines: VecDeque<String>,
    max_entries: usize,
}

impl Transcript {
    pub fn new(max_entries: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_entries,
        }
    }

    /// 从已持久化的行恢复；空白行跳过，超出上限时保留最新的部分
    pub fn from_lines<I, S>(lines: I, max_entries: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut transcript = Self::new(max_entries);
        for line in lines {
            let line = line.as_ref().trim();
            if !line.is_empty() {
                transcript.push(line.to_string());
            }
        }
        transcript
    }

    pub fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_entries {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// 最近 `limit` 行，最新的在最后
    pub fn recent(&self, limit: usize) -> Vec<&str> {
        let skip = self.lines.len().saturating_sub(limit);
        self.iter().skip(skip).collect()
    }

    fn window(&self, window: usize) -> impl Iterator<Item = &str> {
        let skip = self.lines.len().saturating_sub(window);
        self.iter().skip(skip)
    }

    /// 在最近 `window` 行里找该用户的记录，窗口内最早的 `limit` 条（按时间顺序）
    pub fn user_history(&self, user_id: &str, window: usize, limit: usize) -> Vec<&str> {
        let marker = format!("({user_id})");
        self.window(window)
            .filter(|line| line.contains(&marker))
            .take(limit)
            .collect()
    }

    /// 在最近 `window` 行里找提到 `message_id` 的记录，窗口内最早的 `limit` 条
    pub fn thread(&self, message_id: &str, window: usize, limit: usize) -> Vec<&str> {
        if message_id.is_empty() {
            return Vec::new();
        }
        self.window(window)
            .filter(|line| line.contains(message_id))
            .take(limit)
            .collect()
    }

    /// 只保留最新的一半，返回删除的行数
    pub fn halve(&mut self) -> usize {
        let before = self.lines.len();
        let keep = before / 2;
        self.lines.drain(..before - keep);
        before - keep
    }
}

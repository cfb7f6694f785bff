//! 用户画像
//!
//! 每个用户一份，首次出现时惰性创建。话题和性格特征都来自固定关键词表的
//! 大小写不敏感子串匹配：话题按命中次数累加，特征只增不减。

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 话题 → 关键词（声明顺序即并列时的排序依据）
pub const TOPIC_TABLE: &[(&str, &[&str])] = &[
    (
        "technology",
        &["tech", "computer", "programming", "code", "software", "ai", "bot"],
    ),
    ("gaming", &["game", "play", "gaming", "player", "level", "score"]),
    ("music", &["music", "song", "artist", "band", "concert", "album"]),
    ("movies", &["movie", "film", "watch", "cinema", "actor", "director"]),
    ("food", &["food", "eat", "cook", "restaurant", "meal", "hungry"]),
    ("travel", &["travel", "trip", "vacation", "visit", "country", "city"]),
    ("sports", &["sport", "game", "team", "player", "match", "win"]),
    (
        "education",
        &["study", "learn", "school", "university", "course", "book"],
    ),
];

/// 性格特征 → 关键词
pub const TRAIT_TABLE: &[(&str, &[&str])] = &[
    (
        "friendly",
        &["hello", "hi", "thanks", "thank you", "please", "nice"],
    ),
    ("curious", &["what", "how", "why", "when", "where", "question"]),
    (
        "creative",
        &["imagine", "create", "design", "art", "creative", "idea"],
    ),
    (
        "technical",
        &["how to", "tutorial", "guide", "explain", "technical"],
    ),
    ("humorous", &["joke", "funny", "lol", "haha", "humor", "comedy"]),
];

const DIGEST_TOP_N: usize = 3;

fn matching<'t>(table: &'t [(&'t str, &'t [&'t str])], text: &str) -> Vec<&'t str> {
    let lower = text.to_lowercase();
    table
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(name, _)| *name)
        .collect()
}

fn table_rank(table: &[(&str, &[&str])], name: &str) -> usize {
    table
        .iter()
        .position(|(n, _)| *n == name)
        .unwrap_or(usize::MAX)
}

pub(crate) fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// 解析持久化的时间戳；接受带 / 不带小数秒、RFC 3339 以及纯日期
pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at);
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// 单个用户的画像，字段名即持久化 JSON 的键名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_seen: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub topics: HashMap<String, u64>,
    #[serde(default)]
    pub personality_traits: Vec<String>,
    #[serde(default)]
    pub last_interaction: String,
}

impl UserProfile {
    fn new(username: &str, now: NaiveDateTime) -> Self {
        let stamp = format_timestamp(now);
        Self {
            username: username.to_string(),
            first_seen: stamp.clone(),
            message_count: 0,
            topics: HashMap::new(),
            personality_traits: Vec::new(),
            last_interaction: stamp,
        }
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.last_interaction)
    }

    fn observe(&mut self, username: &str, message: &str, now: NaiveDateTime) {
        self.message_count += 1;
        self.last_interaction = format_timestamp(now);
        self.username = username.to_string();

        for topic in matching(TOPIC_TABLE, message) {
            *self.topics.entry(topic.to_string()).or_insert(0) += 1;
        }
        for trait_name in matching(TRAIT_TABLE, message) {
            if !self.personality_traits.iter().any(|t| t == trait_name) {
                self.personality_traits.push(trait_name.to_string());
            }
        }
    }

    /// 最多 3 个特征（按特征表顺序）
    pub fn top_traits(&self) -> Vec<&str> {
        let mut traits: Vec<&str> = self.personality_traits.iter().map(String::as_str).collect();
        traits.sort_by_key(|t| table_rank(TRAIT_TABLE, t));
        traits.truncate(DIGEST_TOP_N);
        traits
    }

    /// 最多 3 个话题，按次数降序，并列时按话题表顺序
    pub fn top_topics(&self) -> Vec<(&str, u64)> {
        let mut topics: Vec<(&str, u64)> = self
            .topics
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        topics.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| table_rank(TOPIC_TABLE, a.0).cmp(&table_rank(TOPIC_TABLE, b.0)))
                .then_with(|| a.0.cmp(b.0))
        });
        topics.truncate(DIGEST_TOP_N);
        topics
    }

    /// 注入系统提示的确定性摘要
    pub fn digest(&self) -> String {
        let mut parts = vec![
            format!("User: {}", self.username),
            format!("Messages: {}", self.message_count),
        ];
        let traits = self.top_traits();
        if !traits.is_empty() {
            parts.push(format!("Personality: {}", traits.join(", ")));
        }
        let topics = self.top_topics();
        if !topics.is_empty() {
            let rendered: Vec<String> = topics
                .iter()
                .map(|(topic, count)| format!("{topic} ({count})"))
                .collect();
            parts.push(format!("Interests: {}", rendered.join(", ")));
        }
        parts.join(" | ")
    }
}

/// user id → 画像；序列化为一个 JSON 对象
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: BTreeMap<String, UserProfile>,
}

impl ProfileTable {
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&UserProfile> {
        self.profiles.get(user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut UserProfile> {
        self.profiles.get_mut(user_id)
    }

    pub fn remove(&mut self, user_id: &str) -> Option<UserProfile> {
        self.profiles.remove(user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UserProfile)> {
        self.profiles.iter()
    }

    /// 记录一条消息；画像不存在时创建，必要时先淘汰最久未活跃的画像。
    /// 返回被淘汰的 user id。
    pub fn observe(
        &mut self,
        user_id: &str,
        username: &str,
        message: &str,
        now: NaiveDateTime,
        max_profiles: usize,
    ) -> Option<String> {
        let mut evicted = None;
        if !self.profiles.contains_key(user_id) {
            if max_profiles > 0 && self.profiles.len() >= max_profiles {
                evicted = self.stalest();
                if let Some(id) = &evicted {
                    self.profiles.remove(id);
                }
            }
            self.profiles
                .insert(user_id.to_string(), UserProfile::new(username, now));
        }
        if let Some(profile) = self.profiles.get_mut(user_id) {
            profile.observe(username, message, now);
        }
        evicted
    }

    /// `last_interaction` 最早的画像，无法解析的视为最早
    fn stalest(&self) -> Option<String> {
        self.profiles
            .iter()
            .min_by_key(|(_, p)| p.last_seen())
            .map(|(id, _)| id.clone())
    }

    /// 超过上限时淘汰最久未活跃的画像，返回淘汰数量
    pub fn enforce_cap(&mut self, max_profiles: usize) -> usize {
        let mut removed = 0;
        while max_profiles > 0 && self.profiles.len() > max_profiles {
            match self.stalest() {
                Some(id) => {
                    self.profiles.remove(&id);
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    /// 删除超过 `inactivity_days` 天未活跃或时间戳无法解析的画像，返回被删除的 id
    pub fn prune_inactive(&mut self, now: NaiveDateTime, inactivity_days: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .profiles
            .iter()
            .filter(|(_, p)| match p.last_seen() {
                Some(at) => (now - at).num_days() > inactivity_days,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.profiles.remove(id);
        }
        stale
    }

    /// 消息数最多的用户（名字, 次数）
    pub fn most_active(&self) -> Option<(String, u64)> {
        self.profiles
            .values()
            .max_by_key(|p| p.message_count)
            .map(|p| (p.username.clone(), p.message_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 7)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_repeated_observation_counts_messages() {
        let mut table = ProfileTable::default();
        for _ in 0..5 {
            table.observe("1", "alice", "plain words", now(), 20);
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("1").unwrap().message_count, 5);
    }

    #[test]
    fn test_name_is_last_write_wins_first_seen_fixed() {
        let mut table = ProfileTable::default();
        table.observe("1", "alice", "x", now(), 20);
        let first_seen = table.get("1").unwrap().first_seen.clone();
        table.observe("1", "alicia", "x", now() + Duration::hours(1), 20);
        let profile = table.get("1").unwrap();
        assert_eq!(profile.username, "alicia");
        assert_eq!(profile.first_seen, first_seen);
        assert_ne!(profile.last_interaction, first_seen);
    }

    #[test]
    fn test_topics_count_and_traits_are_monotone() {
        let mut table = ProfileTable::default();
        table.observe("1", "a", "I love this GAME and music", now(), 20);
        table.observe("1", "a", "another game please", now(), 20);
        table.observe("1", "a", "zzz", now(), 20);

        let p = table.get("1").unwrap();
        assert_eq!(p.topics["gaming"], 2);
        assert_eq!(p.topics["sports"], 2);
        assert_eq!(p.topics["music"], 1);
        assert_eq!(p.personality_traits, vec!["friendly"]);
    }

    #[test]
    fn test_traits_not_duplicated() {
        let mut table = ProfileTable::default();
        table.observe("1", "a", "hello", now(), 20);
        table.observe("1", "a", "hello again", now(), 20);
        assert_eq!(table.get("1").unwrap().personality_traits.len(), 1);
    }

    #[test]
    fn test_digest_ordering() {
        let mut table = ProfileTable::default();
        table.observe("1", "alice", "why does the movie about a city trip matter, lol", now(), 20);
        table.observe("1", "alice", "new trip soon", now(), 20);
        table.observe("1", "alice", "hello, that software is funny", now(), 20);

        let digest = table.get("1").unwrap().digest();
        assert_eq!(
            digest,
            "User: alice | Messages: 3 | Personality: friendly, curious, humorous | Interests: travel (2), technology (1), movies (1)"
        );
    }

    #[test]
    fn test_cap_evicts_stalest() {
        let mut table = ProfileTable::default();
        table.observe("old", "o", "x", now() - Duration::days(3), 2);
        table.observe("mid", "m", "x", now() - Duration::days(1), 2);
        let evicted = table.observe("new", "n", "x", now(), 2);
        assert_eq!(evicted.as_deref(), Some("old"));
        assert_eq!(table.len(), 2);
        assert!(table.get("mid").is_some());
    }

    #[test]
    fn test_cap_prefers_unparseable_for_eviction() {
        let mut table = ProfileTable::default();
        table.observe("a", "a", "x", now() - Duration::days(3), 0);
        table.observe("b", "b", "x", now(), 0);
        table.get_mut("b").unwrap().last_interaction = "garbage".to_string();
        assert_eq!(table.enforce_cap(1), 1);
        assert!(table.get("a").is_some());
    }

    #[test]
    fn test_prune_inactive_removes_exactly_stale() {
        let mut table = ProfileTable::default();
        table.observe("fresh", "f", "x", now() - Duration::days(2), 0);
        table.observe("edge", "e", "x", now() - Duration::days(30), 0);
        table.observe("stale", "s", "x", now() - Duration::days(31), 0);
        table.observe("broken", "b", "x", now(), 0);
        table.get_mut("broken").unwrap().last_interaction = "not a date".to_string();

        let mut removed = table.prune_inactive(now(), 30);
        removed.sort();
        assert_eq!(removed, vec!["broken", "stale"]);
        assert!(table.get("fresh").is_some());
        assert!(table.get("edge").is_some());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-07T10:00:00.123456").is_some());
        assert!(parse_timestamp("2024-05-07T10:00:00").is_some());
        assert!(parse_timestamp("2024-05-07T10:00:00+07:00").is_some());
        assert!(parse_timestamp("2000-01-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert_eq!(parse_timestamp(&format_timestamp(now())), Some(now()));
    }

    #[test]
    fn test_table_round_trips_as_json_object() {
        let mut table = ProfileTable::default();
        table.observe("1", "alice", "hello", now(), 20);
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["1"]["username"], "alice");
        assert_eq!(json["1"]["message_count"], 1);
    }
}

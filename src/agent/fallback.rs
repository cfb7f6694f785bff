//! 本地兜底回复
//!
//! 所有 provider 都不可用时使用：按固定顺序匹配意图关键词（先命中先用），
//! 都不命中则从道歉语中随机挑一句。

use chrono::Local;
use rand::seq::SliceRandom;

/// 兜底回复的前缀，表明回复并非来自模型
pub const OFFLINE_TAG: &str = "⚠️ [offline] ";

/// 无意图命中时的候选回复
pub const APOLOGIES: &[&str] = &[
    "Sorry, the AI is not available right now 😅",
    "Sorry, the AI system is being upgraded 🛠️",
    "Sorry, I can't answer at the moment 😔",
    "Sorry, the AI system is overloaded right now 🥵",
    "Sorry, I'm not ready to reply just yet 😴",
];

enum IntentReply {
    Fixed(&'static str),
    CurrentTime,
}

struct Intent {
    name: &'static str,
    keywords: &'static [&'static str],
    reply: IntentReply,
}

const INTENTS: &[Intent] = &[
    Intent {
        name: "greeting",
        keywords: &["hello", "hi", "สวัสดี", "หวัดดี"],
        reply: IntentReply::Fixed("Hello! 👋"),
    },
    Intent {
        name: "well_being",
        keywords: &["how are you", "เป็นไง", "สบายดีไหม"],
        reply: IntentReply::Fixed("I'm doing well, thanks! 😊"),
    },
    Intent {
        name: "farewell",
        keywords: &["bye", "goodbye", "ลาก่อน", "บ๊ายบาย"],
        reply: IntentReply::Fixed("Goodbye! 👋"),
    },
    Intent {
        name: "thanks",
        keywords: &["thanks", "thank you", "ขอบคุณ"],
        reply: IntentReply::Fixed("You're welcome! 😊"),
    },
    Intent {
        name: "help",
        keywords: &["help", "ช่วย", "ช่วยเหลือ"],
        reply: IntentReply::Fixed("Type /help to see the available commands! 📚"),
    },
    Intent {
        name: "weather",
        keywords: &["weather", "อากาศ", "ฝน"],
        reply: IntentReply::Fixed("Sorry, I can't check the weather right now 😅"),
    },
    Intent {
        name: "time",
        keywords: &["time", "เวลา", "กี่โมง"],
        reply: IntentReply::CurrentTime,
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFallback;

impl LocalFallback {
    /// 第一个命中的意图名
    pub fn classify(&self, message: &str) -> Option<&'static str> {
        find_intent(message).map(|intent| intent.name)
    }

    pub fn respond(&self, message: &str) -> String {
        match find_intent(message) {
            Some(Intent {
                reply: IntentReply::Fixed(text),
                ..
            }) => text.to_string(),
            Some(Intent {
                reply: IntentReply::CurrentTime,
                ..
            }) => format!("Current time: {} ⏰", Local::now().format("%H:%M:%S")),
            None => APOLOGIES
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(APOLOGIES[0])
                .to_string(),
        }
    }
}

fn find_intent(message: &str) -> Option<&'static Intent> {
    let lower = message.to_lowercase();
    INTENTS
        .iter()
        .find(|intent| intent.keywords.iter().any(|kw| lower.contains(kw)))
}

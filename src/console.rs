//! 终端聊天界面的命令解析
//!
//! 以 `/` 开头的行是命令，其余都作为聊天消息交给 [`BotService::handle`](crate::service::BotService::handle)。

pub const HELP: &str = "\
/help                 show this list
/stats                memory statistics
/profile [user_id]    show a user profile (default: you)
/forget [user_id]     delete a user profile (default: you)
/thread <message_id>  transcript lines mentioning a message
/recent [n]           last n transcript lines (default 5)
/prompt <text>        replace the system prompt
/reply <id> <text>    reply to an earlier message
/quit                 flush memory and exit";

const DEFAULT_RECENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    Help,
    Stats,
    Profile(Option<String>),
    Forget(Option<String>),
    Thread(String),
    Recent(usize),
    Prompt(String),
    Reply { message_id: String, text: String },
    Quit,
    /// 参数缺失或未知命令，附带提示
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Chat(line.to_string());
        };
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let optional = || (!args.is_empty()).then(|| args.to_string());

        match name {
            "help" => Command::Help,
            "stats" => Command::Stats,
            "profile" => Command::Profile(optional()),
            "forget" => Command::Forget(optional()),
            "thread" if !args.is_empty() => Command::Thread(args.to_string()),
            "thread" => Command::Invalid("usage: /thread <message_id>".to_string()),
            "recent" if args.is_empty() => Command::Recent(DEFAULT_RECENT),
            "recent" => match args.parse() {
                Ok(n) => Command::Recent(n),
                Err(_) => Command::Invalid("usage: /recent [n]".to_string()),
            },
            "prompt" if !args.is_empty() => Command::Prompt(args.to_string()),
            "prompt" => Command::Invalid("usage: /prompt <text>".to_string()),
            "reply" => match args.split_once(char::is_whitespace) {
                Some((id, text)) if !text.trim().is_empty() => Command::Reply {
                    message_id: id.to_string(),
                    text: text.trim().to_string(),
                },
                _ => Command::Invalid("usage: /reply <id> <text>".to_string()),
            },
            "quit" | "exit" => Command::Quit,
            other => Command::Invalid(format!("unknown command /{other}, try /help")),
        }
    }
}

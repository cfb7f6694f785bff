use brain_bot::agent::{InboundMessage, RepliedMessage};
use brain_bot::config::BotConfig;
use brain_bot::console::{Command, HELP};
use brain_bot::logging::init_logging;
use brain_bot::service::BotService;
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const BOT_ID: &str = "bot";
const BOT_NAME: &str = "Bot";
const THREAD_LIMIT: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "brain_bot", version, about = "Chat with the bot from a terminal")]
struct Cli {
    /// YAML 配置文件
    #[arg(long, env = "BOT_CONFIG")]
    config: Option<PathBuf>,

    /// 记忆文件目录（同时作为磁盘监控目录）
    #[arg(long, env = "BOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "BOT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = "console")]
    user_id: String,

    #[arg(long, default_value = "you")]
    user_name: String,
}

/// 读行线程交给主循环的输入
enum Input {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = BotConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.memory.data_dir = dir.clone();
        config.monitor.watch_dir = dir.clone();
    }
    if let Some(dir) = &cli.log_dir {
        config.monitor.log_dir = dir.clone();
    }

    let _guard = init_logging(&config.monitor.log_dir)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(config.runtime.worker_pool_size)
        .build()?;

    let outcome = runtime.block_on(run(cli, config));
    runtime.shutdown_timeout(Duration::from_secs(1));
    outcome
}

async fn run(cli: Cli, config: BotConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(BotService::from_config(config).await?);
    service.start();
    info!(user = %cli.user_id, "Console session started");

    println!("🤖 brain_bot is ready. Type /help for commands, Ctrl-D to quit.");

    let (line_tx, mut line_rx) = mpsc::channel::<Input>(1);
    let (ack_tx, ack_rx) = mpsc::channel::<()>(1);
    tokio::task::spawn_blocking(move || read_lines(line_tx, ack_rx));

    let mut console = Console::new(service.clone(), cli.user_id, cli.user_name);

    while let Some(input) = line_rx.recv().await {
        let line = match input {
            Input::Line(line) => line,
            Input::Interrupted | Input::Eof => break,
            Input::Failed(reason) => {
                error!(error = %reason, "Line editor failed");
                break;
            }
        };

        let keep_going = tokio::select! {
            keep_going = console.dispatch(&line) => keep_going,
            _ = tokio::signal::ctrl_c() => false,
        };
        if !keep_going || ack_tx.send(()).await.is_err() {
            break;
        }
    }
    drop(ack_tx);

    service.shutdown().await;
    println!("👋 Bye!");
    Ok(())
}

/// 在阻塞线程里持有行编辑器；每读一行等待主循环确认后再显示下一个提示符
fn read_lines(tx: mpsc::Sender<Input>, mut ack: mpsc::Receiver<()>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            let _ = tx.blocking_send(Input::Failed(e.to_string()));
            return;
        }
    };

    loop {
        let input = match editor.readline("you> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(e) => Input::Failed(e.to_string()),
        };
        let last = !matches!(input, Input::Line(_));
        if tx.blocking_send(input).is_err() || last {
            break;
        }
        if ack.blocking_recv().is_none() {
            break;
        }
    }
}

struct Console {
    service: Arc<BotService>,
    user_id: String,
    user_name: String,
    /// 本次会话中显示过的消息，供 /reply 引用
    seen: HashMap<String, RepliedMessage>,
}

impl Console {
    fn new(service: Arc<BotService>, user_id: String, user_name: String) -> Self {
        Self {
            service,
            user_id,
            user_name,
            seen: HashMap::new(),
        }
    }

    /// 返回 false 表示退出
    async fn dispatch(&mut self, line: &str) -> bool {
        match Command::parse(line) {
            Command::Chat(text) => {
                let inbound = InboundMessage::new(&self.user_id, &self.user_name, &text);
                self.chat(inbound).await;
            }
            Command::Reply { message_id, text } => match self.seen.get(&message_id) {
                Some(replied) => {
                    let inbound = InboundMessage::new(&self.user_id, &self.user_name, &text)
                        .replying_to(replied.clone());
                    self.chat(inbound).await;
                }
                None => println!("⚠️ No message with id {message_id} in this session"),
            },
            Command::Help => println!("{HELP}"),
            Command::Stats => {
                let stats = self.service.stats().await;
                println!("📊 Users: {} | Entries: {}", stats.users, stats.entries);
                if let Some((name, count)) = stats.most_active {
                    println!("   Most active: {name} ({count} messages)");
                }
            }
            Command::Profile(user_id) => {
                let user_id = user_id.unwrap_or_else(|| self.user_id.clone());
                match self.service.profile(&user_id).await {
                    Some(profile) => {
                        println!("👤 {}", profile.digest());
                        println!(
                            "   First seen: {} | Last interaction: {}",
                            profile.first_seen, profile.last_interaction
                        );
                    }
                    None => println!("No profile for {user_id}"),
                }
            }
            Command::Forget(user_id) => {
                let user_id = user_id.unwrap_or_else(|| self.user_id.clone());
                if self.service.forget_user(&user_id).await {
                    println!("🗑️ Forgot {user_id}");
                } else {
                    println!("No profile for {user_id}");
                }
            }
            Command::Thread(message_id) => {
                let lines = self.service.thread(&message_id, THREAD_LIMIT).await;
                if lines.is_empty() {
                    println!("Nothing recorded for {message_id}");
                }
                for line in lines {
                    println!("{line}");
                }
            }
            Command::Recent(limit) => {
                let recent = self.service.recent(limit).await;
                if recent.is_empty() {
                    println!("Transcript is empty");
                } else {
                    println!("{recent}");
                }
            }
            Command::Prompt(prompt) => {
                self.service.set_system_prompt(&prompt).await;
                println!("✅ System prompt updated");
            }
            Command::Invalid(hint) => println!("⚠️ {hint}"),
            Command::Quit => return false,
        }
        true
    }

    async fn chat(&mut self, inbound: InboundMessage) {
        let user_message_id = self.remember(&inbound.user_id, &inbound.user_name, &inbound.text);
        let chunks = self.service.handle(inbound).await;
        if chunks.is_empty() {
            return;
        }
        let reply_id = self.remember(BOT_ID, BOT_NAME, &chunks.concat());
        println!("   (your message: {user_message_id})");
        for chunk in &chunks {
            println!("bot> {chunk}");
        }
        println!("   (reply: {reply_id})");
    }

    fn remember(&mut self, author_id: &str, author_name: &str, text: &str) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        self.seen.insert(
            id.clone(),
            RepliedMessage {
                message_id: id.clone(),
                author_id: author_id.to_string(),
                author_name: author_name.to_string(),
                text: text.to_string(),
            },
        );
        id
    }
}

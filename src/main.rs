use std::io::Write;
use std::sync::Arc;

use chat_relay::config::{load_config, AppConfig};
use chat_relay::error::ChatError;
use chat_relay::exchange::Conversation;
use chat_relay::observability::init_tracing;
use chat_relay::session::{
    ChatStore, FeedbackKind, MemoryChatStore, SessionSummary, SqliteChatStore,
};
use chat_relay::transcript::{Attachment, Message, Role};
use chat_relay::transport::HttpTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    // One exchange at a time on a single thread; stream reads are the only
    // suspension points.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(run(config)) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), ChatError> {
    let transport = HttpTransport::from_config(&config.api)?;
    tracing::info!(
        mode = %config.api.mode,
        endpoint = config.api.endpoint(),
        routing = config.api.routing_label().unwrap_or("-"),
        "chat-relay ready"
    );
    match config.store.path.as_deref() {
        Some(path) => {
            let store = Arc::new(SqliteChatStore::open(path).await?);
            chat_loop(&config, store, &transport).await;
        }
        None => chat_loop(&config, Arc::new(MemoryChatStore::new()), &transport).await,
    }
    Ok(())
}

enum Command<'a> {
    Ask(&'a str),
    Image(&'a str),
    Resume(&'a str),
    Feedback(&'a str),
    Sessions,
    New,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line.split_once(char::is_whitespace) {
        Some(("/image", url)) => Command::Image(url.trim()),
        Some(("/resume", session)) => Command::Resume(session.trim()),
        Some(("/feedback", kind)) => Command::Feedback(kind.trim()),
        _ => match line {
            "/new" => Command::New,
            "/sessions" => Command::Sessions,
            "/quit" | "/exit" => Command::Quit,
            text => Command::Ask(text),
        },
    }
}

/// Prints assistant text incrementally, reprinting when content is replaced.
#[derive(Default)]
struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    fn show(&mut self, message: &Message) {
        let mut stdout = std::io::stdout().lock();
        if let Some(suffix) = message.content.strip_prefix(self.printed.as_str()) {
            let _ = write!(stdout, "{suffix}");
        } else {
            let _ = write!(stdout, "\n{}", message.content);
        }
        let _ = stdout.flush();
        self.printed.clone_from(&message.content);
    }

    fn finish(&mut self) {
        if !self.printed.is_empty() {
            println!();
        }
        self.printed.clear();
    }
}

fn prompt() {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "> ");
    let _ = stdout.flush();
}

fn print_sessions(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("no stored sessions");
        return;
    }
    for session in sessions {
        println!(
            "{}  {}  ({} messages, {})",
            session.id,
            session.display_name(),
            session.message_count,
            session.age()
        );
    }
}

/// What the user asked for while an exchange was running.
#[derive(Default)]
struct Interrupt {
    new_chat: bool,
    quit: bool,
}

async fn chat_loop<S: ChatStore>(config: &AppConfig, store: Arc<S>, transport: &HttpTransport) {
    let mut conversation = Conversation::from_config(store, config);
    let mut pending: Vec<Attachment> = Vec::new();
    let mut last_record: Option<i64> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stdin");
                break;
            }
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::New => {
                conversation.new_chat();
                pending.clear();
                last_record = None;
                println!("-- new chat --");
            }
            Command::Image(url) if url.is_empty() => println!("usage: /image <url>"),
            Command::Image(url) => {
                pending.push(Attachment::from_url(url));
                println!("queued image ({} pending)", pending.len());
            }
            Command::Sessions => match conversation.sessions().await {
                Ok(sessions) => print_sessions(&sessions),
                Err(e) => eprintln!("could not list sessions: {e}"),
            },
            Command::Feedback(kind) => match (last_record, kind.parse::<FeedbackKind>()) {
                (None, _) => println!("no stored answer to rate yet"),
                (Some(_), Err(_)) => println!("usage: /feedback up|down"),
                (Some(record), Ok(kind)) => match conversation.rate(record, kind).await {
                    Ok(_) if kind == FeedbackKind::Helpful => {
                        println!("Thanks for the positive feedback!");
                    }
                    Ok(_) => println!("Thanks for the feedback! We'll use it to improve."),
                    Err(e) => eprintln!("failed to submit feedback: {e}"),
                },
            },
            Command::Resume(session_id) => match conversation.resume(session_id).await {
                Ok(count) => {
                    for message in conversation.transcript().messages() {
                        let who = match message.role {
                            Role::User => "you",
                            Role::Assistant => "assistant",
                        };
                        println!("{who}: {}", message.content);
                    }
                    last_record = None;
                    println!("-- resumed {session_id} ({count} exchanges) --");
                }
                Err(e) => eprintln!("could not resume {session_id}: {e}"),
            },
            Command::Ask(text) => {
                let exchange = match conversation.submit(text, &mut pending, &config.api) {
                    Ok(exchange) => exchange,
                    Err(e) => {
                        eprintln!("{e}");
                        prompt();
                        continue;
                    }
                };

                let handle = exchange.handle();
                let ctrl_c = {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            handle.cancel();
                        }
                    })
                };
                let mut interrupt = Interrupt::default();
                let mut printer = StreamPrinter::default();
                let report = {
                    let run = conversation.run_with(exchange, transport, |message| {
                        printer.show(message);
                    });
                    tokio::pin!(run);
                    let mut stdin_open = true;
                    loop {
                        tokio::select! {
                            report = &mut run => break report,
                            line = lines.next_line(), if stdin_open => match line {
                                Ok(Some(line)) => match parse_command(&line) {
                                    Command::New => {
                                        handle.cancel();
                                        interrupt.new_chat = true;
                                    }
                                    Command::Quit => {
                                        handle.cancel();
                                        interrupt.quit = true;
                                    }
                                    Command::Image(url) if !url.is_empty() => {
                                        pending.push(Attachment::from_url(url));
                                    }
                                    Command::Empty => {}
                                    _ => eprintln!("(still answering; /new to abandon it)"),
                                },
                                // piped input may end before the answer does
                                Ok(None) | Err(_) => stdin_open = false,
                            },
                        }
                    }
                };
                ctrl_c.abort();
                printer.finish();

                if let Some(notification) = &report.notification {
                    eprintln!("[{}] {}", notification.title, notification.description);
                }
                if report.record_id.is_some() {
                    last_record = report.record_id;
                }
                if interrupt.quit {
                    break;
                }
                if interrupt.new_chat {
                    conversation.new_chat();
                    pending.clear();
                    last_record = None;
                    println!("-- new chat --");
                }
            }
        }
        prompt();
    }
}

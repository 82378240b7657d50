use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use moot::cli::{self, Args};
use moot::config::AppConfig;
use moot::profile::ProfileCache;
use moot::protocol::{ChatMessage, CreateDebateRequest, JurorVerdict};
use moot::session::{now_ms, short_address};
use moot::verdicts::{self, VerdictBoard, Vote, UNDECIDED_LABEL};
use moot::{BackendClient, DebateRoom, Identity, RoomOptions, RoomUpdate, Session};

// ---------------------------------------------------------------------------
// Slash commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Stance(String),
    Standing,
    Help,
    Unknown(String),
}

/// `None` when the line is ordinary chat, `Some(command)` for `/...` input.
fn parse_command(line: &str) -> Option<Command> {
    let body = line.strip_prefix('/')?;
    let mut parts = body.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();
    Some(match name {
        "quit" | "q" | "leave" => Command::Quit,
        "stance" if rest.is_empty() => Command::Help,
        "stance" => Command::Stance(rest.to_string()),
        "standing" => Command::Standing,
        "help" => Command::Help,
        other => Command::Unknown(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn message_line(msg: &ChatMessage) -> String {
    let mut who = format!("{} ({})", msg.username, short_address(&msg.user_address));
    if let Some(stance) = msg.stance.as_deref() {
        who.push_str(&format!(" [{stance}]"));
    }
    if let Some(reply) = msg.reply_to {
        who.push_str(&format!(" re #{reply}"));
    }
    format!("{who}: {}", msg.message)
}

fn verdict_line(sides: &[String], v: &JurorVerdict) -> String {
    let label = match verdicts::interpret_result(&v.result, sides.len()) {
        Some(Vote::Side(i)) => sides.get(i).map(String::as_str).unwrap_or("?").to_string(),
        Some(Vote::Undecided) => UNDECIDED_LABEL.to_string(),
        None => format!("({})", v.result),
    };
    if v.reasoning.is_empty() {
        format!("juror {} goes {} on #{}", v.juror_id, label, v.latest_msg_id)
    } else {
        format!(
            "juror {} goes {} on #{}: {}",
            v.juror_id, label, v.latest_msg_id, v.reasoning
        )
    }
}

fn standing_line(sides: &[String], board: &VerdictBoard) -> String {
    let standing = board.standing();
    let parts: Vec<String> = standing
        .named(sides)
        .into_iter()
        .map(|(name, n)| format!("{name} {n}"))
        .collect();
    format!("{} ({} voting)", parts.join(" | "), standing.total())
}

fn print_message(msg: &ChatMessage) {
    println!(
        "{} {}",
        format!("#{:>4}", msg.id).bright_black(),
        message_line(msg)
    );
}

fn print_banner(session: &Session) {
    println!("{}", "MOOT COURTROOM".bright_cyan().bold());
    println!("{}: {}", "Debate".bright_yellow(), session.discussion_id());
    println!(
        "{}: {}",
        "Topic".bright_yellow(),
        session.topic().bright_white()
    );
    println!(
        "{}: {}",
        "Sides".bright_yellow(),
        session.sides().join(" vs ")
    );
    if !session.jurors().is_empty() {
        println!("{}: {}", "Jurors".bright_yellow(), session.jurors().len());
    }
    println!("{}", "=".repeat(50).bright_blue());
}

fn print_help() {
    println!("  /stance <side>   tag your next messages with a side");
    println!("  /standing        show where the jury stands");
    println!("  /quit            close the live channel and exit");
}

// ---------------------------------------------------------------------------
// History mode
// ---------------------------------------------------------------------------

/// Fetch everything once over REST and print it, no live channel.
async fn print_history(
    api: &BackendClient,
    discussion_id: u64,
    as_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = api.fetch_debate(discussion_id).await?;
    let mut session = Session::new(info);
    session.merge_history(api.fetch_messages(discussion_id).await?);
    match api.fetch_juror_results(discussion_id).await {
        Ok(rows) => {
            session.merge_verdict_history(rows);
        }
        Err(e) => warn!(error = %e, "juror results unavailable"),
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        return Ok(());
    }

    print_banner(&session);
    for msg in session.messages() {
        print_message(msg);
    }
    if !session.board().is_empty() {
        println!(
            "{} {}",
            "[standing]".bright_blue(),
            standing_line(session.sides(), session.board())
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("moot=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = AppConfig::load_or_default(args.config.as_deref())?;
    cfg.apply_env();
    cli::apply_overrides(&mut cfg, &args);

    let api = BackendClient::builder(cfg.backend_url.clone()).build();

    // Identity: explicit flags win, then the profile cache, then a guest.
    let (guest_name, guest_address) = cli::guest_identity();
    let address = args.address.clone().unwrap_or(guest_address);
    let profiles = match cfg.profile_db.as_deref() {
        Some(path) => ProfileCache::open(path),
        None => ProfileCache::open_default(),
    };
    let profiles = match profiles {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "profile cache unavailable");
            None
        }
    };
    let cached_name = profiles
        .as_ref()
        .and_then(|p| p.lookup(&address).ok().flatten());
    let username = args.username.clone().or(cached_name).unwrap_or(guest_name);

    if let Err(e) = api.register_user(&username, &address).await {
        warn!(error = %e, "user registration failed, continuing anyway");
    }
    if let Some(cache) = &profiles {
        if let Err(e) = cache.remember(&address, &username) {
            warn!(error = %e, "could not persist identity");
        }
    }

    let discussion_id = if args.create {
        let sides = cli::parse_sides(&args.sides);
        if sides.len() < 2 {
            return Err("a debate needs at least two sides".into());
        }
        let req = CreateDebateRequest {
            discussion_id: now_ms(),
            topic: args.topic.clone(),
            sides,
            jurors: cli::parse_jurors(&args.jurors),
            funding: args.funding,
            action: args.action.clone(),
            creator_address: address.clone(),
        };
        let debate = api.create_debate(&req).await?;
        println!(
            "{} {}",
            "Created debate".bright_green(),
            debate.discussion_id.to_string().bright_white().bold()
        );
        debate.discussion_id
    } else {
        match args.debate {
            Some(id) => id,
            None => return Err("pass a debate id, or --create to start one".into()),
        }
    };

    if args.history_only {
        return print_history(&api, discussion_id, args.json).await;
    }

    let identity = Identity::new(username.clone(), address.clone());
    let (room, mut events) = DebateRoom::join(
        api,
        discussion_id,
        identity,
        RoomOptions::from_config(&cfg),
    )
    .await?;

    {
        let session = room.session();
        let guard = session.lock().unwrap();
        print_banner(&guard);
        println!(
            "{}: {} ({})",
            "You".bright_yellow(),
            username,
            short_address(&address)
        );
        println!(
            "{}",
            "Type to argue; /stance <side>, /standing, /quit. Ctrl-C leaves.".bright_black()
        );
        for msg in guard.messages() {
            print_message(msg);
        }
        if !guard.board().is_empty() {
            println!(
                "{} {}",
                "[standing]".bright_blue(),
                standing_line(guard.sides(), guard.board())
            );
        }
    }

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut stdin_open = true;
    let mut stance: Option<String> = None;

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                match room.handle_event(event).await {
                    RoomUpdate::Message(msg) => print_message(&msg),
                    RoomUpdate::Verdict { verdict, .. } => {
                        let session = room.session();
                        let guard = session.lock().unwrap();
                        println!(
                            "{} {}",
                            "[juror]".bright_magenta().bold(),
                            verdict_line(guard.sides(), &verdict)
                        );
                        println!(
                            "{} {}",
                            "[standing]".bright_blue(),
                            standing_line(guard.sides(), guard.board())
                        );
                    }
                    RoomUpdate::Announcement(a) => {
                        println!("{} {}", "[judge]".bright_magenta().bold(), a.message);
                    }
                    RoomUpdate::Synced { new_messages } => {
                        if new_messages > 0 {
                            println!(
                                "{} caught up on {new_messages} message(s)",
                                "[sync]".bright_green()
                            );
                            let session = room.session();
                            let guard = session.lock().unwrap();
                            let shown = guard.messages().len();
                            for msg in &guard.messages()[shown - new_messages..] {
                                print_message(msg);
                            }
                        }
                    }
                    RoomUpdate::Offline { will_retry: true } => {
                        println!("{}", "[offline] connection lost, retrying".bright_red());
                    }
                    RoomUpdate::Offline { will_retry: false } => {
                        println!("{}", "left the courtroom".bright_black());
                        break;
                    }
                    RoomUpdate::Gone => {
                        return Err("live channel gave up after repeated failures".into());
                    }
                    RoomUpdate::Noop => {}
                }
            }
            maybe_line = lines.next(), if stdin_open => {
                match maybe_line {
                    Some(Ok(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match parse_command(line) {
                            Some(Command::Quit) => room.leave(),
                            Some(Command::Stance(side)) => {
                                let session = room.session();
                                let sides = session.lock().unwrap().sides().to_vec();
                                match sides.iter().find(|s| s.eq_ignore_ascii_case(&side)) {
                                    Some(matched) => {
                                        stance = Some(matched.clone());
                                        println!(
                                            "{} arguing for {}",
                                            "[stance]".bright_yellow(),
                                            matched.bright_white().bold()
                                        );
                                    }
                                    None => println!(
                                        "{} no side called {side:?}; sides: {}",
                                        "[stance]".bright_red(),
                                        sides.join(", ")
                                    ),
                                }
                            }
                            Some(Command::Standing) => {
                                let session = room.session();
                                let guard = session.lock().unwrap();
                                println!(
                                    "{} {}",
                                    "[standing]".bright_blue(),
                                    standing_line(guard.sides(), guard.board())
                                );
                            }
                            Some(Command::Help) => print_help(),
                            Some(Command::Unknown(name)) => {
                                println!("unknown command /{name}, try /help");
                            }
                            None => {
                                if let Err(e) = room.submit(line, stance.clone(), None).await {
                                    println!("{} {e}", "[send failed]".bright_red());
                                }
                            }
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "stdin read error"),
                    None => {
                        // EOF is a quit: close cleanly, the Offline update ends the loop.
                        stdin_open = false;
                        room.leave();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving");
                room.leave();
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

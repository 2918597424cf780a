//! # parley
//!
//! Terminal chat client. Joins one room, prints everything that arrives on
//! it and on the private channels, and sends each stdin line as a chat
//! message. `/pm <user-id> <text>` sends a private message instead.

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_client::{ClientConfig, MessagingClient};
use parley_shared::constants::{APP_NAME, STREAM_CAPACITY};
use parley_shared::protocol::InboundMessage;
use parley_shared::{ChannelKey, RoomId, UserId};

/// Parley - terminal client for the Parley messaging server
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL (overrides PARLEY_SERVER_URL)
    #[arg(short = 'u', long = "url")]
    url: Option<String>,

    /// Bearer token obtained from the REST login
    #[arg(long = "token", env = "PARLEY_TOKEN")]
    token: String,

    /// Numeric id of the logged-in user
    #[arg(long = "user-id")]
    user_id: Option<i64>,

    #[arg(long = "username")]
    username: Option<String>,

    /// Room to join
    #[arg(short = 'r', long = "room", default_value_t = 1)]
    room: i64,

    /// Reconnect automatically when the connection drops
    #[arg(long = "reconnect")]
    reconnect: bool,

    /// Do not send presence keepalives
    #[arg(long = "no-heartbeat")]
    no_heartbeat: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_net=info,warn")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = args.url {
        config.server_url = url;
    }
    if args.reconnect {
        config.reconnect.enabled = true;
    }
    info!(server = %config.server_url, reconnect = config.reconnect.enabled, "Starting {APP_NAME}");

    let client = MessagingClient::with_websocket(config);
    if let Some(id) = args.user_id {
        client.set_identity(UserId(id), args.username.clone());
    }

    let session = client
        .connect(&args.token)
        .await
        .context("Failed to connect")?;
    match (&session.username, session.user_id) {
        (Some(name), _) => eprintln!("connected as {name}"),
        (None, Some(id)) => eprintln!("connected as user {id}"),
        (None, None) => eprintln!("connected"),
    }

    let room = RoomId(args.room);
    client.subscribe(ChannelKey::room(room), print_message).await;
    client.subscribe(ChannelKey::recalls(room), print_message).await;
    client.subscribe(ChannelKey::private_messages(), print_message).await;
    if session.user_id.is_some() {
        client.subscribe(ChannelKey::private_fallback(), print_message).await;
    }

    if let Some(mut invites) = client
        .subscribe_stream(ChannelKey::room_invites(), STREAM_CAPACITY)
        .await
    {
        tokio::spawn(async move {
            while let Some(invite) = invites.recv().await {
                print_message(invite);
            }
        });
    }

    if !args.no_heartbeat {
        client.start_heartbeat();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = send_line(&client, room, line).await {
                    eprintln!("! {e}");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn send_line(client: &MessagingClient, room: RoomId, line: &str) -> anyhow::Result<()> {
    if let Some(rest) = line.strip_prefix("/pm ") {
        let (recipient, text) = rest
            .split_once(' ')
            .context("usage: /pm <user-id> <text>")?;
        let recipient: i64 = recipient.parse().context("user id must be a number")?;
        client.send_private(UserId(recipient), text).await?;
    } else {
        client.send_chat(room, line).await?;
    }
    Ok(())
}

fn print_message(message: InboundMessage) {
    match message {
        InboundMessage::Chat(m) if m.recalled => println!("[room {}] (recalled)", m.room_id),
        InboundMessage::Chat(m) => println!(
            "{} [room {}] {}: {}",
            clock(m.timestamp),
            m.room_id,
            display_name(&m.sender_name),
            m.content
        ),
        InboundMessage::Private(m) => println!(
            "{} [pm] {}: {}",
            clock(m.timestamp),
            display_name(&m.sender_name),
            m.content
        ),
        InboundMessage::Recall(r) => println!("[room {}] message {} was recalled", r.room_id, r.message_id),
        InboundMessage::Status(s) => {
            println!("* user {} is {}", s.user_id, if s.is_online { "online" } else { "offline" })
        }
        InboundMessage::FriendRequest(e) => println!("* friend request from {}: {:?}", e.sender_id, e.event_type),
        InboundMessage::RoomInvite(e) => println!("* invited to room {} by {}", e.room_id, e.inviter_id),
    }
}

fn clock(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "?"
    } else {
        name
    }
}

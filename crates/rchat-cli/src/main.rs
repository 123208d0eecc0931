//! `rchat` — a line-oriented REPL/CLI driving a `rchat-core::node::Node`.
//!
//! Stands in for the out-of-scope graphical client: every command below
//! maps directly onto one `Node` method, so this binary doubles as a
//! worked example of the whole command surface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rchat_core::config::AppPaths;
use rchat_core::crypto::hash::FileHash;
use rchat_core::crypto::identity::PeerId;
use rchat_core::event::Event;
use rchat_core::node::Node;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "rchat")]
struct Args {
    /// Overrides the per-OS app data directory (vault.bin, store.db, ...).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let paths = match args.data_dir {
        Some(dir) => AppPaths::at(dir),
        None => AppPaths::discover(),
    };
    let node = Node::new(paths).context("failed to open vault/store")?;

    let mut events = node.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("rchat ops console — type `help` for commands");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match dispatch(&node, line).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}

/// Runs one REPL line against `node`. Returns `Ok(true)` on `quit`/`exit`.
async fn dispatch(node: &Node, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(false);
    };
    let rest: Vec<&str> = parts.collect();

    match cmd {
        "help" => print_help(),
        "quit" | "exit" => return Ok(true),

        "status" => {
            let status = node.check_auth_status().await;
            println!("{status:?}");
        }
        "init" => {
            let password = rest.first().context("usage: init <password>")?;
            node.init_vault(password).await?;
            println!("vault created");
        }
        "unlock" => {
            let password = rest.first().context("usage: unlock <password>")?;
            node.unlock_vault(password).await?;
            println!("vault unlocked");
        }
        "reset" => {
            node.reset_vault().await?;
            println!("vault reset");
        }
        "online" => {
            let enabled = rest.first().map(|s| *s != "off").unwrap_or(true);
            node.toggle_online_status(enabled).await?;
            println!("online = {enabled}");
        }

        "profile" => {
            let profile = node.get_user_profile()?;
            println!("{profile:?}");
        }
        "set-alias" => {
            let alias = rest.first().context("usage: set-alias <name>")?;
            node.update_user_profile(Some(alias), None)?;
        }

        "peers" => {
            for peer in node.get_trusted_peers()? {
                println!("{}  {}  pinned={}", peer.peer_id, peer.display_handle, peer.pinned);
            }
        }
        "forget" => {
            let peer = parse_peer(&rest, 0)?;
            node.delete_peer(peer).await?;
        }
        "pin" => {
            let peer = parse_peer(&rest, 0)?;
            node.set_peer_pinned(peer, true)?;
        }
        "unpin" => {
            let peer = parse_peer(&rest, 0)?;
            node.set_peer_pinned(peer, false)?;
        }

        "envelopes" => {
            for envelope in node.get_envelopes()? {
                println!("{} {} {}", envelope.id, envelope.name, envelope.icon);
            }
        }
        "mkenv" => {
            let [id, name, icon] = rest_n::<3>(&rest, "usage: mkenv <id> <name> <icon>")?;
            node.create_envelope(id, name, icon)?;
        }
        "rmenv" => {
            let id = rest.first().context("usage: rmenv <id>")?;
            node.delete_envelope(id)?;
        }

        "history" => {
            let chat_id = rest.first().context("usage: history <chat_id|self>")?;
            for msg in node.get_chat_history(chat_id)? {
                println!(
                    "[{}] {:?} {:?}: {}",
                    msg.created_at,
                    msg.direction,
                    msg.status,
                    msg.text.as_deref().unwrap_or("<file>")
                );
            }
        }
        "send" => {
            let peer = parse_peer(&rest, 0)?;
            let text = rest.get(1..).context("usage: send <peer> <text...>")?.join(" ");
            let msg_id = node.send_message(peer, &text).await?;
            println!("queued {msg_id}");
        }
        "note" => {
            let text = rest.join(" ");
            node.send_message_to_self(&text)?;
        }
        "read" => {
            let chat_id = rest.first().context("usage: read <chat_id>")?;
            node.mark_messages_read(chat_id).await?;
        }
        "connect" => {
            let peer = parse_peer(&rest, 0)?;
            node.request_connection(peer).await?;
            println!("connected to {peer}");
        }

        "invite" => {
            let handle = rest.first().context("usage: invite <handle>")?;
            let password = node.generate_invite_password();
            println!("share this password with {handle}: {password}");
            node.create_invite(handle, &password).await?;
            println!("{handle} redeemed the invite");
        }
        "redeem" => {
            let [handle, password] = rest_n::<2>(&rest, "usage: redeem <handle> <password>")?;
            let peer = node.redeem_and_connect(handle, password).await?;
            println!("connected to {peer}");
        }

        "stickers" => {
            for sticker in node.get_stickers()? {
                println!("{} {} ({} bytes)", sticker.file_hash, sticker.name, sticker.size_bytes);
            }
        }
        "rmsticker" => {
            let hash = parse_hash(&rest, 0)?;
            node.delete_sticker(hash)?;
        }

        "theme" => {
            println!("{:?}", node.get_theme()?);
        }
        "presets" => {
            for preset in node.list_theme_presets() {
                println!("{} — {} ({})", preset.key, preset.name, preset.description);
            }
        }
        "preset" => {
            let key = rest.first().context("usage: preset <key>")?;
            let theme = node.apply_preset(key)?;
            println!("{theme:?}");
        }

        other => println!("unknown command: {other} (try `help`)"),
    }
    Ok(false)
}

fn rest_n<'a, const N: usize>(rest: &[&'a str], usage: &str) -> Result<[&'a str; N]> {
    rest.get(..N)
        .and_then(|s| s.try_into().ok())
        .with_context(|| usage.to_string())
}

fn parse_peer(rest: &[&str], idx: usize) -> Result<PeerId> {
    let raw = rest.get(idx).context("expected a peer id")?;
    PeerId::from_hex(raw).with_context(|| format!("not a valid peer id: {raw}"))
}

fn parse_hash(rest: &[&str], idx: usize) -> Result<FileHash> {
    let raw = rest.get(idx).context("expected a file hash")?;
    FileHash::from_hex(raw).with_context(|| format!("not a valid file hash: {raw}"))
}

fn print_event(event: &Event) {
    match event {
        Event::MessageReceived { message } => {
            println!(
                "\n<< {} ({:?}): {}",
                message.sender_peer_id,
                message.content_type,
                message.text.as_deref().unwrap_or("<file>")
            );
        }
        Event::PeerConnected { peer_id } => println!("\n-- {peer_id} connected"),
        Event::PeerDisconnected { peer_id } => println!("\n-- {peer_id} disconnected"),
        Event::LocalPeerDiscovered { peer_id } => println!("\n-- {peer_id} discovered nearby"),
        _ => {}
    }
}

fn print_help() {
    println!(
        "\
status | init <pw> | unlock <pw> | reset | online [on|off]
profile | set-alias <name>
peers | forget <peer> | pin <peer> | unpin <peer>
envelopes | mkenv <id> <name> <icon> | rmenv <id>
history <chat> | send <peer> <text> | note <text> | read <chat> | connect <peer>
invite <handle> | redeem <handle> <password>
stickers | rmsticker <hash>
theme | presets | preset <key>
quit"
    );
}

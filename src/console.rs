//! Line-driven admin surface
//!
//! Reads one command per line and runs it through the local store. The
//! status view is rendered from the same snapshots every other surface sees.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::roster::parse_delegates;
use crate::session::{
    format_clock, ActiveSlot, Delegate, Responder, SessionState, SessionStore, SlotKind,
};
use crate::sync::{Command, LiveSync};

pub const HELP: &str = "\
add <nr> [kind]             queue a registered delegate
say <kind> <name> [| org]   queue someone by name
rm <id>                     remove a queue entry
next                        start the next queued speaker
start <id>                  start a specific queue entry now
pause | resume | reset      timer control
skip                        drop the current speaker
done                        complete the active slot
slot opening|rebuttal <1-2>|reply
rebuttal <1-2> <name> [| org] | rebuttal <1-2> clear
reply <name> [| org] | reply clear
duration <kind> <secs>      default length of a slot kind
delegate <nr> <name> [| org]
forget <nr>
import <file>               load a delegate roster
answer <blob>               finish hosting with the joiner's answer
remote <next|pause|resume|reset|start <id>|duration <kind> <secs>>
status | help | quit";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Add { number: String, kind: SlotKind },
    Say { kind: SlotKind, name: String, organization: String },
    Remove { id: String },
    Next,
    Start { id: String },
    Pause,
    Resume,
    Reset,
    Skip,
    Done,
    Slot(ActiveSlot),
    Rebuttal { index: usize, responder: Option<Responder> },
    Reply(Option<Responder>),
    Duration { kind: SlotKind, secs: u32 },
    Delegate(Delegate),
    Forget { number: String },
    Import { path: String },
    Answer { blob: String },
    Remote(Command),
    Status,
    Help,
    Quit,
}

fn parse_kind(raw: &str) -> Result<SlotKind> {
    SlotKind::normalize(raw).ok_or_else(|| anyhow!("Unknown slot kind: {}", raw))
}

/// Split `name | org`; the organization may be left out
fn name_and_org(rest: &str) -> Result<(String, String)> {
    let (name, org) = match rest.split_once('|') {
        Some((name, org)) => (name.trim(), org.trim()),
        None => (rest.trim(), ""),
    };
    if name.is_empty() {
        bail!("A name is required");
    }
    Ok((name.to_string(), org.to_string()))
}

/// 1-based rebuttal slot number as typed by the operator
fn parse_rebuttal_index(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(n @ 1..=2) => Ok(n - 1),
        _ => bail!("Rebuttal slot must be 1 or 2, got {}", raw),
    }
}

fn parse_slot(rest: &str) -> Result<ActiveSlot> {
    let mut words = rest.split_whitespace();
    let kind = parse_kind(words.next().unwrap_or_default())?;
    Ok(match kind {
        SlotKind::Opening => ActiveSlot::Opening,
        SlotKind::ReplyToRebuttal => ActiveSlot::ReplyToRebuttal,
        SlotKind::Rebuttal => ActiveSlot::Rebuttal(parse_rebuttal_index(words.next().unwrap_or("1"))?),
    })
}

fn parse_duration(rest: &str) -> Result<(SlotKind, u32)> {
    let (kind, secs) = rest
        .trim()
        .split_once(char::is_whitespace)
        .context("Usage: duration <kind> <secs>")?;
    let secs = secs
        .trim()
        .parse()
        .with_context(|| format!("Not a number of seconds: {}", secs.trim()))?;
    Ok((parse_kind(kind)?, secs))
}

fn parse_remote(rest: &str) -> Result<Command> {
    let (head, tail) = rest.trim().split_once(char::is_whitespace).unwrap_or((rest.trim(), ""));
    Ok(match head {
        "next" => Command::StartNext,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "reset" => Command::Reset,
        "start" if !tail.trim().is_empty() => Command::StartSpecific {
            id: tail.trim().to_string(),
        },
        "duration" => {
            let (kind, secs) = parse_duration(tail)?;
            Command::SetTypeDuration { kind, secs }
        }
        _ => bail!("Unknown remote command: {}", rest.trim()),
    })
}

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let arg = |usage: &str| -> Result<String> {
            if rest.is_empty() {
                bail!("Usage: {}", usage);
            }
            Ok(rest.to_string())
        };

        let command = match head.to_lowercase().as_str() {
            "add" => {
                let mut words = rest.split_whitespace();
                let number = words.next().context("Usage: add <nr> [kind]")?.to_string();
                let kind = match words.next() {
                    Some(k) => parse_kind(k)?,
                    None => SlotKind::Opening,
                };
                ConsoleCommand::Add { number, kind }
            }
            "say" => {
                let (kind, who) = rest
                    .split_once(char::is_whitespace)
                    .context("Usage: say <kind> <name> [| org]")?;
                let (name, organization) = name_and_org(who)?;
                ConsoleCommand::Say {
                    kind: parse_kind(kind)?,
                    name,
                    organization,
                }
            }
            "rm" => ConsoleCommand::Remove { id: arg("rm <id>")? },
            "next" => ConsoleCommand::Next,
            "start" => ConsoleCommand::Start { id: arg("start <id>")? },
            "pause" => ConsoleCommand::Pause,
            "resume" => ConsoleCommand::Resume,
            "reset" => ConsoleCommand::Reset,
            "skip" => ConsoleCommand::Skip,
            "done" => ConsoleCommand::Done,
            "slot" => ConsoleCommand::Slot(parse_slot(rest)?),
            "rebuttal" => {
                let (index, who) = rest
                    .split_once(char::is_whitespace)
                    .context("Usage: rebuttal <1-2> <name> [| org]")?;
                let index = parse_rebuttal_index(index)?;
                let responder = if who.trim() == "clear" {
                    None
                } else {
                    let (name, org) = name_and_org(who)?;
                    Some(Responder::new(name, org))
                };
                ConsoleCommand::Rebuttal { index, responder }
            }
            "reply" => {
                let who = arg("reply <name> [| org]")?;
                if who == "clear" {
                    ConsoleCommand::Reply(None)
                } else {
                    let (name, org) = name_and_org(&who)?;
                    ConsoleCommand::Reply(Some(Responder::new(name, org)))
                }
            }
            "duration" => {
                let (kind, secs) = parse_duration(rest)?;
                ConsoleCommand::Duration { kind, secs }
            }
            "delegate" => {
                let (number, who) = rest
                    .split_once(char::is_whitespace)
                    .context("Usage: delegate <nr> <name> [| org]")?;
                let (name, organization) = name_and_org(who)?;
                ConsoleCommand::Delegate(Delegate {
                    number: number.to_string(),
                    name,
                    organization,
                })
            }
            "forget" => ConsoleCommand::Forget { number: arg("forget <nr>")? },
            "import" => ConsoleCommand::Import { path: arg("import <file>")? },
            "answer" => ConsoleCommand::Answer { blob: arg("answer <blob>")? },
            "remote" => ConsoleCommand::Remote(parse_remote(rest)?),
            "status" | "ls" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("Unknown command: {} (try help)", other),
        };
        Ok(Some(command))
    }
}

fn slot_label(slot: ActiveSlot) -> String {
    match slot {
        ActiveSlot::Rebuttal(i) => format!("{} {}", slot.kind().label(), i + 1),
        other => other.kind().label().to_string(),
    }
}

/// Text view of the session as an operator sees it
pub fn render_status(state: &SessionState, now_ms: i64) -> String {
    let mut out = String::new();
    match &state.current_speaker {
        Some(turn) => {
            let _ = writeln!(
                out,
                "Speaking: {} ({}) - {} {}{}",
                turn.entry.name,
                turn.entry.organization,
                slot_label(turn.slot),
                format_clock(turn.timer.remaining_secs(now_ms)),
                if turn.timer.paused { " [paused]" } else { "" },
            );
            for (i, responder) in turn.rebuttals.iter().enumerate() {
                if let Some(r) = responder {
                    let _ = writeln!(out, "  Replikk {}: {} ({})", i + 1, r.name, r.organization);
                }
            }
            if let Some(r) = &turn.reply_to_rebuttal {
                let _ = writeln!(out, "  Svar-replikk: {} ({})", r.name, r.organization);
            }
        }
        None => {
            let _ = writeln!(out, "Nobody is speaking");
        }
    }

    if state.queue.is_empty() {
        let _ = writeln!(out, "Queue is empty");
    } else {
        let _ = writeln!(out, "Queue:");
        for (i, entry) in state.queue.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. [{}] {} ({}) {}",
                i + 1,
                entry.kind.label(),
                entry.name,
                entry.organization,
                entry.id,
            );
        }
    }

    let d = &state.type_durations;
    let _ = write!(
        out,
        "Durations: Innlegg {}s, Replikk {}s, Svar-replikk {}s (version {})",
        d.opening, d.rebuttal, d.reply_to_rebuttal, state.version
    );
    out
}

/// Run one command. Returns `false` when the console should stop.
pub async fn run_command(
    command: ConsoleCommand,
    store: &SessionStore,
    peer: Option<&Arc<LiveSync>>,
) -> Result<bool> {
    let applied = match command {
        ConsoleCommand::Add { number, kind } => store.enqueue_delegate(&number, kind).await,
        ConsoleCommand::Say { kind, name, organization } => {
            store.enqueue_direct(&name, &organization, kind).await
        }
        ConsoleCommand::Remove { id } => store.dequeue(&id).await,
        ConsoleCommand::Next => store.start_next().await,
        ConsoleCommand::Start { id } => store.start_specific(&id).await,
        ConsoleCommand::Pause => store.pause().await,
        ConsoleCommand::Resume => store.resume().await,
        ConsoleCommand::Reset => store.reset().await,
        ConsoleCommand::Skip => store.skip().await,
        ConsoleCommand::Done => store.complete_slot().await,
        ConsoleCommand::Slot(slot) => store.jump_to_slot(slot).await,
        ConsoleCommand::Rebuttal { index, responder: Some(r) } => store.attach_rebuttal(index, r).await,
        ConsoleCommand::Rebuttal { index, responder: None } => store.clear_rebuttal(index).await,
        ConsoleCommand::Reply(Some(r)) => store.attach_reply(r).await,
        ConsoleCommand::Reply(None) => store.clear_reply().await,
        ConsoleCommand::Duration { kind, secs } => store.set_type_duration(kind, secs).await,
        ConsoleCommand::Delegate(delegate) => store.upsert_delegate(delegate).await,
        ConsoleCommand::Forget { number } => store.remove_delegate(&number).await,
        ConsoleCommand::Import { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read roster {}", path))?;
            let delegates = parse_delegates(&text).with_context(|| format!("Invalid roster {}", path))?;
            info!("Importing {} delegates from {}", delegates.len(), path);
            store.import_delegates(delegates).await
        }
        ConsoleCommand::Answer { blob } => {
            let peer = peer.context("Peer sync is not enabled in this console")?;
            peer.accept_answer(&blob).await?;
            println!("Answer accepted; waiting for the channel to open");
            return Ok(true);
        }
        ConsoleCommand::Remote(command) => {
            let peer = peer.context("Peer sync is not enabled in this console")?;
            if !peer.is_connected() {
                println!("Not connected");
                return Ok(true);
            }
            peer.send_command(command).await?;
            return Ok(true);
        }
        ConsoleCommand::Status => {
            println!("{}", render_status(&store.snapshot().await, store.now_ms()));
            return Ok(true);
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            return Ok(true);
        }
        ConsoleCommand::Quit => return Ok(false),
    };

    match applied {
        Some(version) => println!("ok (version {})", version),
        None => println!("nothing changed"),
    }
    Ok(true)
}

/// Read commands from `input` until it ends or `quit` is entered
pub async fn run_console<R>(input: R, store: Arc<SessionStore>, peer: Option<Arc<LiveSync>>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{:#}", e);
                continue;
            }
        };
        match run_command(command, &store, peer.as_ref()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                warn!("Command failed: {:#}", e);
                println!("error: {:#}", e);
            }
        }
    }
    info!("Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        ConsoleCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_queue_commands() {
        assert_eq!(
            parse("add 12 replikk"),
            ConsoleCommand::Add {
                number: "12".to_string(),
                kind: SlotKind::Rebuttal
            }
        );
        assert_eq!(
            parse("add 7"),
            ConsoleCommand::Add {
                number: "7".to_string(),
                kind: SlotKind::Opening
            }
        );
        assert_eq!(
            parse("say innlegg Kari Nordmann | Oslo"),
            ConsoleCommand::Say {
                kind: SlotKind::Opening,
                name: "Kari Nordmann".to_string(),
                organization: "Oslo".to_string()
            }
        );
        assert!(ConsoleCommand::parse("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_slot_commands() {
        assert_eq!(parse("slot rebuttal 2"), ConsoleCommand::Slot(ActiveSlot::Rebuttal(1)));
        assert_eq!(parse("slot svar"), ConsoleCommand::Slot(ActiveSlot::ReplyToRebuttal));
        assert_eq!(
            parse("rebuttal 1 Ola | Bergen"),
            ConsoleCommand::Rebuttal {
                index: 0,
                responder: Some(Responder::new("Ola", "Bergen"))
            }
        );
        assert_eq!(
            parse("rebuttal 2 clear"),
            ConsoleCommand::Rebuttal {
                index: 1,
                responder: None
            }
        );
        assert_eq!(parse("reply clear"), ConsoleCommand::Reply(None));
        assert!(ConsoleCommand::parse("rebuttal 3 Ola").is_err());
    }

    #[test]
    fn test_parse_remote_commands() {
        assert_eq!(parse("remote next"), ConsoleCommand::Remote(Command::StartNext));
        assert_eq!(
            parse("remote duration replikk 45"),
            ConsoleCommand::Remote(Command::SetTypeDuration {
                kind: SlotKind::Rebuttal,
                secs: 45
            })
        );
        assert!(ConsoleCommand::parse("remote dance").is_err());
        assert!(ConsoleCommand::parse("duration innlegg soon").is_err());
        assert!(ConsoleCommand::parse("fly").is_err());
    }

    #[test]
    fn test_render_idle_status() {
        let status = render_status(&SessionState::default(), 0);
        assert!(status.contains("Nobody is speaking"));
        assert!(status.contains("Queue is empty"));
        assert!(status.contains("Innlegg 180s"));
    }
}

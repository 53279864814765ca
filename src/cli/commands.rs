use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::app::App;
use crate::config::AppConfig;
use crate::coordinator::{CycleOutcome, Mutation, MutationCycle};
use crate::export::{self, CancelFlag};
use crate::storage::StorageHandle;
use crate::timeline::{time_label, LocalZone, TimelineEntry};

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Message text. If omitted, reads from stdin (or prompts when interactive).
    #[arg()]
    pub text: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Message identifier, as shown by `list`
    pub id: String,
    /// Replacement text
    pub text: String,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Message identifier, as shown by `list`
    pub id: String,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Destination file or directory (defaults to the configured export directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn send_message(cycle: &MutationCycle<StorageHandle>, args: SendArgs) -> Result<()> {
    let text = match args.text {
        Some(text) => text,
        None => match read_stdin()? {
            Some(text) => text.trim_end_matches(['\r', '\n']).to_string(),
            None => prompt("Message")?,
        },
    };
    let output = run_send(cycle, text)?;
    println!("{output}");
    Ok(())
}

fn run_send(cycle: &MutationCycle<StorageHandle>, text: String) -> Result<String> {
    match cycle
        .apply(Mutation::Send { text })
        .context("storing message")?
    {
        CycleOutcome::Published(timeline) => Ok(format!(
            "Saved. {} message(s) in the journal.",
            timeline.messages().count()
        )),
        CycleOutcome::Skipped => Ok("Nothing saved: the message is blank.".to_string()),
        CycleOutcome::UndoUnavailable => bail!("unexpected outcome while sending"),
    }
}

pub fn list_messages(cycle: &MutationCycle<StorageHandle>) -> Result<()> {
    let output = run_list(cycle)?;
    print!("{output}");
    Ok(())
}

fn run_list(cycle: &MutationCycle<StorageHandle>) -> Result<String> {
    match cycle.apply(Mutation::Reload).context("loading messages")? {
        CycleOutcome::Published(timeline) => Ok(format_timeline(&timeline.entries, cycle.zone())),
        other => bail!("unexpected outcome while listing: {other:?}"),
    }
}

fn format_timeline(entries: &[TimelineEntry], zone: &LocalZone) -> String {
    if entries.is_empty() {
        return "No messages yet.\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        match entry {
            TimelineEntry::DateHeader(header) => {
                if !out.is_empty() {
                    out.push('\n');
                }
                let _ = writeln!(&mut out, "--- {} ---", header.label);
            }
            TimelineEntry::Message(message) => {
                let mut lines = message.text.lines();
                let first = lines.next().unwrap_or_default();
                let _ = writeln!(
                    &mut out,
                    "{}  {}  (#{})",
                    time_label(message.timestamp, zone),
                    first,
                    message.id
                );
                for line in lines {
                    let _ = writeln!(&mut out, "       {line}");
                }
            }
        }
    }
    out
}

pub fn edit_message(cycle: &MutationCycle<StorageHandle>, args: EditArgs) -> Result<()> {
    let output = run_edit(cycle, args)?;
    println!("{output}");
    Ok(())
}

fn run_edit(cycle: &MutationCycle<StorageHandle>, args: EditArgs) -> Result<String> {
    let original = cycle
        .store()
        .fetch_message(&args.id)
        .context("looking up message")?
        .with_context(|| format!("no message with id {}", args.id))?;
    match cycle
        .apply(Mutation::Edit {
            original,
            text: args.text,
        })
        .context("editing message")?
    {
        CycleOutcome::Published(_) => Ok(format!("Updated message #{}", args.id)),
        CycleOutcome::Skipped => bail!("message text cannot be empty"),
        CycleOutcome::UndoUnavailable => bail!("unexpected outcome while editing"),
    }
}

pub fn delete_message(cycle: &MutationCycle<StorageHandle>, args: DeleteArgs) -> Result<()> {
    if !args.yes {
        let answer = prompt("Are you sure you want to delete this message? [y/N]")?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Cancelled.");
            return Ok(());
        }
    }
    let output = run_delete(cycle, &args.id)?;
    println!("{output}");
    Ok(())
}

fn run_delete(cycle: &MutationCycle<StorageHandle>, id: &str) -> Result<String> {
    let message = cycle
        .store()
        .fetch_message(id)
        .context("looking up message")?
        .with_context(|| format!("no message with id {id}"))?;
    cycle
        .apply(Mutation::Delete(message))
        .context("deleting message")?;
    Ok(format!("Deleted message #{id}"))
}

pub fn export_messages(
    config: &AppConfig,
    storage: &StorageHandle,
    zone: &LocalZone,
    args: ExportArgs,
) -> Result<()> {
    let output = run_export(config, storage, zone, args)?;
    println!("{output}");
    Ok(())
}

fn run_export(
    config: &AppConfig,
    storage: &StorageHandle,
    zone: &LocalZone,
    args: ExportArgs,
) -> Result<String> {
    let today = zone.today();
    let destination = export::resolve_destination(args.out.as_deref(), &config.export, today);
    let report = export::export_messages(storage, zone, &destination, &CancelFlag::new())
        .context("Failed to export data")?;
    Ok(format!(
        "Exported {} message(s) to {}",
        report.rows,
        report.path.display()
    ))
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

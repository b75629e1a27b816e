//! Sketchsync terminal view (`sketch`)
//!
//! Opens a document on a sketchsync host and edits it from the terminal.
//! Other views of the same document see every stroke drawn here, and the
//! log shown here follows theirs.
//!
//! # Usage
//!
//! ```bash
//! # Open cat.png on a local host
//! sketch cat.png
//!
//! # Remote host
//! sketch cat.png --host sketches.example.com --port 7380
//!
//! # Execute single command
//! sketch cat.png -c "export out.png"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Runtime;

use sketchsync_core::{DocumentId, Point};
use sketchsync_view::{ReplicaEvent, ViewClient};

/// Sketchsync terminal view
#[derive(Parser, Debug)]
#[command(name = "sketch")]
#[command(author, version, about = "sketch - terminal view for sketchsync documents")]
struct Args {
    /// Document to open, relative to the host's document root
    document: String,

    /// Server hostname
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "SKETCHSYNC_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "7380", env = "SKETCHSYNC_PORT")]
    port: u16,

    /// Initial drawing color
    #[arg(long, default_value = "black")]
    color: String,

    /// Execute command and exit
    #[arg(short, long)]
    command: Option<String>,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

/// A terminal command
#[derive(Debug, PartialEq)]
enum Command {
    Color(String),
    Draw(Vec<Point>),
    Undo,
    Redo,
    Log,
    Export(PathBuf),
    Save(Option<DocumentId>),
    Revert,
    Status,
    Ping,
    Help,
    Clear,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            bail!("empty command");
        };
        let rest: Vec<&str> = parts.collect();

        let command = match name.to_lowercase().as_str() {
            "color" => match rest.as_slice() {
                [color] => {
                    sketchsync_core::parse_color(color)?;
                    Command::Color(color.to_string())
                }
                _ => bail!("usage: color <name|#rrggbb>"),
            },
            "draw" => Command::Draw(parse_points(&rest)?),
            "undo" => Command::Undo,
            "redo" => Command::Redo,
            "log" => Command::Log,
            "export" => match rest.as_slice() {
                [path] => Command::Export(PathBuf::from(path)),
                _ => bail!("usage: export <file>"),
            },
            "save" => match rest.as_slice() {
                [] => Command::Save(None),
                [target] => Command::Save(Some(DocumentId::new(*target)?)),
                _ => bail!("usage: save [target]"),
            },
            "revert" => Command::Revert,
            "status" => Command::Status,
            "ping" => Command::Ping,
            "help" => Command::Help,
            "clear" => Command::Clear,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{}', type 'help' for commands", other),
        };
        Ok(command)
    }
}

/// Parse `x,y` pairs
fn parse_points(args: &[&str]) -> Result<Vec<Point>> {
    if args.is_empty() {
        bail!("usage: draw <x,y> [x,y ...]");
    }

    args.iter()
        .map(|arg| {
            let (x, y) = arg
                .split_once(',')
                .with_context(|| format!("expected x,y but got '{}'", arg))?;
            let x: f64 = x.trim().parse().with_context(|| format!("bad x coordinate in '{}'", arg))?;
            let y: f64 = y.trim().parse().with_context(|| format!("bad y coordinate in '{}'", arg))?;
            Ok(Point(x, y))
        })
        .collect()
}

/// A connected terminal view
struct Terminal {
    runtime: Runtime,
    client: ViewClient,
    color: String,
}

impl Terminal {
    /// Execute one command; returns false when the user quits
    fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Color(color) => {
                println!("Drawing in {}", color.bold());
                self.color = color;
            }
            Command::Draw(points) => {
                let replica = self.client.replica_mut();
                replica.begin_stroke(self.color.clone())?;
                for point in points {
                    replica.add_point(point)?;
                }
                if replica.end_stroke()?.is_none() {
                    println!("{}", "Nothing to submit".dimmed());
                    return Ok(true);
                }
                let revision = self.runtime.block_on(self.client.sync())?;
                println!("{}", format!("OK (revision {})", revision).green());
            }
            Command::Undo => {
                self.client.replica_mut().undo()?;
                let revision = self.runtime.block_on(self.client.sync())?;
                println!("{}", format!("OK (revision {})", revision).green());
            }
            Command::Redo => {
                self.client.replica_mut().redo()?;
                let revision = self.runtime.block_on(self.client.sync())?;
                println!("{}", format!("OK (revision {})", revision).green());
            }
            Command::Log => self.print_log(),
            Command::Export(path) => {
                let data = self.runtime.block_on(self.client.materialize())?;
                std::fs::write(&path, &data)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!(
                    "{}",
                    format!("Wrote {} bytes to {}", data.len(), path.display()).green()
                );
            }
            Command::Save(target) => {
                let label = target
                    .as_ref()
                    .unwrap_or_else(|| self.client.replica().document())
                    .to_string();
                let revision = self.runtime.block_on(self.client.save(target))?;
                println!("{}", format!("Saved {} at revision {}", label, revision).green());
            }
            Command::Revert => {
                let revision = self.runtime.block_on(self.client.revert())?;
                println!("{}", format!("Reverted (revision {})", revision).green());
            }
            Command::Status => {
                let replica = self.client.replica();
                println!("document  {}", replica.document());
                if let Some(view) = replica.view_id() {
                    println!("view      {}", view);
                }
                println!("phase     {:?}", replica.phase());
                println!("revision  {}", replica.revision());
                println!("strokes   {}", replica.log().len());
                println!("color     {}", self.color);
                println!("content   {} bytes", replica.initial_content().len());
            }
            Command::Ping => {
                let elapsed = self.runtime.block_on(self.client.ping())?;
                println!("{}", format!("PONG ({:.1} ms)", elapsed.as_secs_f64() * 1000.0).green());
            }
            Command::Help => print_help(),
            Command::Clear => print!("\x1B[2J\x1B[1;1H"),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Print updates that arrived from other views since the last prompt
    fn drain_updates(&mut self) -> Result<()> {
        while let Some(event) = self
            .runtime
            .block_on(self.client.try_next_event(Duration::ZERO))?
        {
            match event {
                ReplicaEvent::LogReplaced { revision } => {
                    println!(
                        "{}",
                        format!("Log updated: {} strokes (revision {})", self.client.replica().log().len(), revision)
                            .blue()
                    );
                }
                ReplicaEvent::StateLoaded { revision } => {
                    println!("{}", format!("Document reloaded (revision {})", revision).blue());
                }
                ReplicaEvent::Failed { code, message, .. } => {
                    println!("{}", format!("-ERR {} {}", code, message).red());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn print_log(&self) {
        let replica = self.client.replica();
        if replica.log().is_empty() {
            println!("{}", "(empty)".dimmed());
            return;
        }

        for (i, stroke) in replica.log().iter().enumerate() {
            let points = stroke.points();
            let (Some(first), Some(last)) = (points.first(), points.last()) else {
                continue;
            };
            println!(
                "{}) {} {} points ({:.0},{:.0}) -> ({:.0},{:.0})",
                i + 1,
                stroke.color().bold(),
                points.len(),
                first.x(),
                first.y(),
                last.x(),
                last.y()
            );
        }
    }

    fn close(self) -> Result<()> {
        let Terminal { runtime, client, .. } = self;
        runtime.block_on(client.close())?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let document = DocumentId::new(args.document.as_str())?;

    let runtime = Runtime::new()?;
    let client = runtime
        .block_on(ViewClient::connect(addr.as_str(), document.clone()))
        .with_context(|| format!("Failed to open {} on {}", document, addr))?;

    let mut terminal = Terminal {
        runtime,
        client,
        color: args.color,
    };

    if !args.quiet {
        println!(
            "{}",
            format!(
                r#"
  sketch    Connected to {}
            Editing {} ({} strokes, revision {})
            Type 'help' for commands, 'quit' to exit
"#,
                addr,
                document,
                terminal.client.replica().log().len(),
                terminal.client.replica().revision()
            )
            .cyan()
        );
    }

    // Single command mode
    if let Some(line) = args.command {
        terminal.execute(Command::parse(&line)?)?;
        return terminal.close();
    }

    // Interactive mode
    let mut rl = DefaultEditor::new()?;
    let history_path = dirs_next::home_dir()
        .map(|p| p.join(".sketch_history"))
        .unwrap_or_default();

    let _ = rl.load_history(&history_path);

    loop {
        if let Err(e) = terminal.drain_updates() {
            eprintln!("{} {}", "Connection lost:".red(), e);
            break;
        }

        let prompt = format!("{}> ", document.to_string().green());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                let command = match Command::parse(line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{} {}", "Error:".red(), e);
                        continue;
                    }
                };

                match terminal.execute(command) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("{} {}", "Error:".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                if terminal.client.replica_mut().cancel_stroke() {
                    println!("{}", "Stroke discarded".dimmed());
                }
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    terminal.close()
}

fn print_help() {
    println!(
        r#"
{}

{}
  color <name|#rrggbb>                   Set the drawing color
  draw <x,y> [x,y ...]                   Draw a stroke through the points
  undo                                   Undo the last stroke (any view)
  redo                                   Redo the last undone stroke

{}
  log                                    Show the strokes on the document
  status                                 Show view and document state
  export <file>                          Write the rendered image to a file

{}
  save [target]                          Save, or save a copy as target
  revert                                 Drop all edits and reload

{}
  ping                                   Check connection
  help                                   Show this help
  clear                                  Clear screen
  quit/exit                              Close the view and exit
"#,
        "sketch Commands".cyan().bold(),
        "Drawing".yellow().bold(),
        "Viewing".yellow().bold(),
        "Document".yellow().bold(),
        "Session".yellow().bold(),
    );
}

// Minimal dirs_next replacement for home directory
mod dirs_next {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_draw() {
        let command = Command::parse("draw 0,0 10.5,3").unwrap();
        assert_eq!(command, Command::Draw(vec![Point(0.0, 0.0), Point(10.5, 3.0)]));
    }

    #[test]
    fn test_parse_draw_errors() {
        assert!(Command::parse("draw").is_err());
        assert!(Command::parse("draw 1;2").is_err());
        assert!(Command::parse("draw x,2").is_err());
    }

    #[test]
    fn test_parse_save() {
        assert_eq!(Command::parse("save").unwrap(), Command::Save(None));
        assert_eq!(
            Command::parse("save copy.png").unwrap(),
            Command::Save(Some(DocumentId::new("copy.png").unwrap()))
        );
        assert!(Command::parse("save a b").is_err());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Command::parse("UNDO").unwrap(), Command::Undo);
        assert_eq!(Command::parse("Exit").unwrap(), Command::Quit);
        assert_eq!(Command::parse("color red").unwrap(), Command::Color("red".into()));
    }

    #[test]
    fn test_parse_rejects_undrawable_color() {
        assert!(Command::parse("color chartreuse").is_err());
        assert_eq!(Command::parse("color #0f0").unwrap(), Command::Color("#0f0".into()));
    }

    #[test]
    fn test_parse_unknown() {
        assert!(Command::parse("erase").is_err());
        assert!(Command::parse("   ").is_err());
    }
}

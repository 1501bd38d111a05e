use std::env;
use std::fs::metadata;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use larch::config::StoreConfig;
use larch::tree::delete_backing_file;
use larch::tree::FormatError;
use larch::tree::Side;
use larch::tree::Store;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::EnumString;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store location
    #[arg(default_value = "larch.dat")]
    store: String,

    /// Reset the store (will delete any existing file)
    #[arg(short, long, default_value_t = false)]
    reset: bool,

    #[command(subcommand)]
    parameter: Option<Parameter>,
}

#[derive(Debug, EnumString, Subcommand)]
#[strum(ascii_case_insensitive)]
enum Parameter {
    /// Add a node, as the root or as a child of the first node holding parent
    Add {
        value: char,
        parent: Option<char>,
        /// Side (Left or Right)
        side: Option<Side>,
    },
    /// Close the store and delete its file
    Delete,
    /// Interactive Help
    Help,
    /// Log store details
    Info,
    /// (Re)open the store
    Init,
    /// List slots which can't be reached from the root
    Orphans,
    /// Print each node with its children
    Print,
    /// Change the value of the first node holding old
    Update { old: char, new: char },
    /// List node values in traversal order
    Values,
}

struct App {
    config: StoreConfig,
    store: Option<Store>,
}

impl App {
    fn open(&mut self) -> Result<()> {
        self.close();
        self.store = Some(Store::try_open_with(self.config.clone())?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.close() {
                tracing::warn!(error = %format!("{e:#}"), "close failed");
                println!("error when closing: {e:#}");
            }
        }
    }

    fn store(&mut self) -> Option<&mut Store> {
        if self.store.is_none() {
            println!("no store open, try: init");
        }
        self.store.as_mut()
    }
}

fn get_history_file() -> Option<PathBuf> {
    dirs::preference_dir()
        .and_then(|mut base| {
            base.push("larch");
            // Note: Not create_dir_all(), because we don't want to create preference
            // dirs if they don't exist.
            if metadata(base.clone()).ok().is_none() {
                std::fs::create_dir(base.clone()).ok()?
            }
            Some(base)
        })
        .map(|mut base| {
            base.push("history.txt");
            base
        })
}

fn parse_char(word: &str) -> Option<char> {
    let value = char::from_str(word).ok();
    if value.is_none() {
        println!("must be a single character: {word}");
    }
    value
}

fn parse_line(line: &str) -> Option<Parameter> {
    // EnumString doesn't deal with variant parameters, so...
    let words = line.split_whitespace().collect::<Vec<&str>>();
    let parameter = match Parameter::from_str(words[0]) {
        Ok(p) => p,
        Err(e) => {
            println!("error: {e}");
            return None;
        }
    };
    match parameter {
        Parameter::Add { .. } => match words.len() {
            2 => Some(Parameter::Add {
                value: parse_char(words[1])?,
                parent: None,
                side: None,
            }),
            4 => {
                let side = Side::from_str(words[3]).ok();
                if side.is_none() {
                    println!("usage: add <value> [<parent> <side>]");
                    return None;
                }
                Some(Parameter::Add {
                    value: parse_char(words[1])?,
                    parent: Some(parse_char(words[2])?),
                    side,
                })
            }
            _ => {
                println!("usage: add <value> [<parent> <side>]");
                None
            }
        },
        Parameter::Update { .. } => {
            if words.len() != 3 {
                println!("usage: update <old> <new>");
                return None;
            }
            Some(Parameter::Update {
                old: parse_char(words[1])?,
                new: parse_char(words[2])?,
            })
        }
        p => {
            if words.len() != 1 {
                println!("usage: {}", words[0]);
                return None;
            }
            Some(p)
        }
    }
}

fn interactive(app: &mut App) -> Result<()> {
    // `()` can be used when no completer is required
    let mut rl = DefaultEditor::new()?;
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.load_history(&file_location) {
            println!("error loading history: {e}");
        }
    }
    println!("terminate with ctrl-c or ctrl-d");
    loop {
        let readline = rl.readline("?) ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(parameter) = parse_line(&line) {
                    process_parameter(app, &parameter);
                }
                rl.add_history_entry(line.as_str())?;
            }
            Err(ReadlineError::Interrupted) => {
                println!("terminating...");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("terminating...");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
    if let Some(file_location) = get_history_file() {
        if let Err(e) = rl.save_history(&file_location) {
            println!("error saving history: {e}");
        }
    }
    Ok(())
}

fn process_parameter(app: &mut App, parameter: &Parameter) {
    tracing::info!(?parameter, "processing command");
    match parameter {
        Parameter::Add {
            value,
            parent,
            side,
        } => {
            let Some(store) = app.store() else { return };
            let parent = parent.map(|p| (p, side.unwrap_or(Side::Left)));
            match store.add(*value, parent) {
                Ok(offset) => match parent {
                    Some((p, side)) => match store.find(p) {
                        Ok(Some(_)) => println!("added: {value} at {offset}, {side} of {p}"),
                        Ok(None) => println!("added: {value} at {offset}, orphaned: no {p}"),
                        Err(e) => println!("added: {value} at {offset}: {e}"),
                    },
                    None => println!("added: {value} at {offset} as root"),
                },
                Err(e) => println!("add failed: {e:#}"),
            }
        }
        Parameter::Delete => {
            app.close();
            match delete_backing_file(app.config.path()) {
                Ok(_) => println!("deleted"),
                Err(e) => println!("could not delete file: {e:#}"),
            }
        }
        Parameter::Help => {
            let help = Cli::command().render_help().to_string();

            let mut print_it = false;

            for line in help.lines() {
                if line.starts_with("Arguments:") {
                    print_it = false;
                }
                if print_it && !line.is_empty() {
                    println!("{}", line);
                }
                if line.starts_with("Commands:") {
                    print_it = true;
                }
            }
        }
        Parameter::Info => {
            let Some(store) = app.store() else { return };
            match store.header() {
                Ok(header) => {
                    println!("path: {}", store.path().display());
                    println!("length: {}", header.length());
                    println!("nodes: {}", header.slot_count());
                    println!("root: {}", header.root());
                    if let Err(e) = store.info() {
                        println!("error: {e:#}");
                    }
                }
                Err(e) => println!("error: {e:#}"),
            }
        }
        Parameter::Init => match app.open() {
            Ok(_) => println!("opened: {}", app.config.path().display()),
            Err(e) => report_open_error(&e),
        },
        Parameter::Orphans => {
            let Some(store) = app.store() else { return };
            match store.detect_orphans() {
                Ok(slots) => {
                    for slot in slots {
                        if slot.reachable {
                            println!("node {} is reachable", slot.index);
                        } else {
                            println!(
                                "node {} at {} with value {} is not reachable",
                                slot.index, slot.offset, slot.value
                            );
                        }
                    }
                }
                Err(e) => println!("scan failed: {e:#}"),
            }
        }
        Parameter::Print => {
            let Some(store) = app.store() else { return };
            match store.describe() {
                Ok(lines) => lines.iter().for_each(|line| println!("{line}")),
                Err(e) => println!("print failed: {e:#}"),
            }
        }
        Parameter::Update { old, new } => {
            let Some(store) = app.store() else { return };
            match store.update_value(*old, *new) {
                Ok(true) => println!("updated: {old} -> {new}"),
                Ok(false) => println!("not found"),
                Err(e) => println!("update failed: {e:#}"),
            }
        }
        Parameter::Values => {
            let Some(store) = app.store() else { return };
            match store.values() {
                Ok(values) => {
                    let mut sep = "";
                    for value in values {
                        print!("{sep}{value}");
                        sep = ", ";
                    }
                    println!();
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }
}

fn report_open_error(err: &anyhow::Error) {
    tracing::error!(error = %format!("{err:#}"), "open failed");
    println!("could not open store: {err:#}");
    if err.downcast_ref::<FormatError>().is_some() {
        println!("the file is not a compatible store, use --reset to reinitialize it");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = match env::var("TMPDIR") {
        Ok(d) => d,
        Err(_e) => ".".to_string(),
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "larch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt().with_writer(non_blocking).init();

    let mut app = App {
        config: StoreConfig::new(&cli.store).reset(cli.reset),
        store: None,
    };
    if let Err(e) = app.open() {
        report_open_error(&e);
        return Err(e);
    }
    // Only reset on the first open
    app.config = app.config.clone().reset(false);

    match cli.parameter {
        Some(parameter) => process_parameter(&mut app, &parameter),
        None => interactive(&mut app)?,
    }
    app.close();
    Ok(())
}

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use log::LevelFilter;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use secd::heap::DEFAULT_CAPACITY;
use secd::reader;
use secd::{Image, SecdResult, Session, Value};

#[derive(Parser)]
#[command(name = "secd", about = "A small Lisp compiled to SECD machine code")]
struct Cli {
    /// Source files to load, in order
    files: Vec<PathBuf>,

    /// Evaluate an expression and print its value
    #[arg(short, long)]
    eval: Option<String>,

    /// Print the compiled code of each form before running it
    #[arg(long)]
    show_code: bool,

    /// Restore the global environment from an image before anything else
    #[arg(long, value_name = "PATH")]
    load_image: Option<PathBuf>,

    /// Save the global environment to an image after all input is evaluated
    #[arg(long, value_name = "PATH")]
    save_image: Option<PathBuf>,

    /// Maximum number of cons cells
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    heap_cells: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut session = match Session::with_capacity(cli.heap_cells) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &cli.load_image {
        if let Err(e) = load_image(&mut session, path) {
            eprintln!("Error loading image {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    for path in &cli.files {
        load_file(&mut session, path, cli.show_code);
    }

    if let Some(expr) = &cli.eval {
        if !eval_and_print(&mut session, expr, cli.show_code) {
            std::process::exit(1);
        }
    } else if cli.files.is_empty() {
        if io::stdin().is_terminal() {
            run_interactive(&mut session, cli.show_code);
        } else {
            run_piped(&mut session, cli.show_code);
        }
    }

    if let Some(path) = &cli.save_image {
        if let Err(e) = save_image(&session, path) {
            eprintln!("Error saving image {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

/// `SECD_LOG` (a level name) wins over `-v` flags.
fn init_logging(verbose: u8) {
    let from_env = std::env::var("SECD_LOG")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok());
    let level = from_env.unwrap_or(match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    if let Err(e) = simple_logger::SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn load_image(session: &mut Session, path: &Path) -> SecdResult<()> {
    let image = Image::load(path)?;
    session.restore_image(&image)?;
    log::info!("loaded image {} ({} cells)", path.display(), image.cell_count());
    Ok(())
}

fn save_image(session: &Session, path: &Path) -> SecdResult<()> {
    let image = session.capture_image()?;
    image.save(path)?;
    log::info!("saved image {} ({} cells)", path.display(), image.cell_count());
    Ok(())
}

/// Compile and run one form, optionally printing its code first.
fn eval_form(session: &mut Session, expr: Value, show_code: bool) -> SecdResult<Value> {
    let code = session.compile(expr)?;
    if show_code {
        println!("{}", session.print(code));
    }
    session.run(code)
}

/// Load a source file silently. Any error aborts the process, since later
/// forms usually depend on earlier definitions.
fn load_file(session: &mut Session, path: &Path, show_code: bool) {
    let input = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    let mut pos = 0;
    let mut count = 0;
    loop {
        match reader::read_one_at(&input, pos, &mut session.heap, &mut session.symbols) {
            Ok(Some((expr, new_pos))) => {
                pos = new_pos;
                count += 1;
                if let Err(e) = eval_form(session, expr, show_code) {
                    eprintln!(
                        "Error in {} at expression {}: {}",
                        path.display(),
                        count,
                        session.describe_error(&e)
                    );
                    std::process::exit(1);
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error in {} at byte {}: {}", path.display(), pos, e);
                std::process::exit(1);
            }
        }
    }

    log::info!(
        "loaded {} expressions from {} in {:.2}s ({} cells)",
        count,
        path.display(),
        start.elapsed().as_secs_f64(),
        session.heap.total_cells()
    );
}

/// Interactive REPL: accumulate lines until parens are balanced.
fn run_interactive(session: &mut Session, show_code: bool) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            log::warn!("line editor unavailable ({}), reading stdin", e);
            run_piped(session, show_code);
            return;
        }
    };

    println!("SECD Lisp");
    println!("Type :help for help, :quit to exit\n");

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { "  " };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim_start().starts_with(':') {
                    if !run_command(session, line.trim()) {
                        break;
                    }
                    continue;
                }

                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);
                if !is_balanced(&buffer) {
                    continue;
                }

                let input = std::mem::take(&mut buffer);
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);
                eval_and_print(session, input, show_code);
            }
            Err(ReadlineError::Interrupted) => {
                if !buffer.is_empty() {
                    buffer.clear();
                    println!("^C");
                    continue;
                }
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}

/// Handle a `:command` line. Returns false to leave the REPL.
fn run_command(session: &mut Session, line: &str) -> bool {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };
    match command {
        ":quit" | ":q" => return false,
        ":help" | ":h" => print_help(),
        ":code" => {
            let compiled = session.read(arg).and_then(|expr| session.compile(expr));
            match compiled {
                Ok(code) => println!("{}", session.print(code)),
                Err(e) => eprintln!("{}", e),
            }
        }
        ":save" if !arg.is_empty() => match save_image(session, Path::new(arg)) {
            Ok(()) => println!("saved {}", arg),
            Err(e) => eprintln!("{}", e),
        },
        ":load" if !arg.is_empty() => match load_image(session, Path::new(arg)) {
            Ok(()) => println!("loaded {}", arg),
            Err(e) => eprintln!("{}", e),
        },
        ":save" | ":load" => eprintln!("{} needs a file path", command),
        other => eprintln!("Unknown command {} (try :help)", other),
    }
    true
}

fn print_help() {
    println!("REPL commands:");
    println!("  :quit / :q      Exit the REPL");
    println!("  :help / :h      Show this help");
    println!("  :code EXPR      Show the compiled code of EXPR without running it");
    println!("  :save PATH      Save the global environment to an image");
    println!("  :load PATH      Restore the global environment from an image");
    println!();
    println!("Special forms:");
    println!("  (fn (params) body)  (lambda ...)  (if test then else)");
    println!("  (let (names) (values) body)  (letrec (names) (values) body)");
    println!("  (quote x)  'x  `(a ,b)  (set name value)  (defm name (params) body)");
    println!("Builtins: + - * / car cdr cons eq < > <= >= list");
    println!("Rest parameters: (fn (a &rest more) ...)");
}

/// Piped mode: read all input, then evaluate one form at a time.
fn run_piped(session: &mut Session, show_code: bool) {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        eprintln!("Error reading stdin: {}", e);
        std::process::exit(1);
    }
    eval_and_print(session, &input, show_code);
}

/// Evaluate every form in `input`, printing each value or error. An error
/// does not stop later forms, except a parse error, which ends the input.
/// Returns false if anything failed.
fn eval_and_print(session: &mut Session, input: &str, show_code: bool) -> bool {
    let mut ok = true;
    session.eval_str_with(
        input,
        |session, code| {
            if show_code {
                println!("{}", session.print(code));
            }
        },
        |session, result| match result {
            Ok(val) => println!("{}", session.print(val)),
            Err(e) => {
                eprintln!("{}", session.describe_error(&e));
                ok = false;
            }
        },
    );
    ok
}

/// True once every open paren has been closed. Comments are skipped.
fn is_balanced(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_comment = false;
    for ch in input.chars() {
        match ch {
            '\n' => in_comment = false,
            _ if in_comment => {}
            ';' => in_comment = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0
}

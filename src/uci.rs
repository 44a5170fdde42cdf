//! The "Universal Chess Interface" protocol adapter: a thin line
//! splitter that turns stdin into engine calls and engine replies into
//! stdout lines.
//!
//! Grounded on `En-En-Code-alcibiades/src/uci.rs`'s `Server`/
//! `parse_uci_command` shape (reader thread feeding an `mpsc::Receiver`
//! so `stop`/`quit` can interrupt a running search, regex-based command
//! tokenizing), collapsed from that module's generic `UciEngine`/
//! `UciEngineFactory` trait pair down to calling this crate's concrete
//! [`Search`] directly, since there is only ever one engine type here.

use crate::chess::Position;
use crate::config::EngineOptions;
use crate::inference::InferenceManager;
use crate::search::Search;
use crate::types::Move;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

enum UciCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: String },
    Position { fen: String, moves: String },
    Go { movetime: Duration },
    Stop,
    Quit,
}

struct ParseError;

fn parse_uci_command(line: &str) -> Result<UciCommand, ParseError> {
    lazy_static! {
        static ref RE: Regex =
            Regex::new(r"^\s*(uci|isready|ucinewgame|setoption|position|go|stop|quit)\b\s*(.*)$").unwrap();
    }
    let captures = RE.captures(line.trim()).ok_or(ParseError)?;
    let command = captures.get(1).unwrap().as_str();
    let rest = captures.get(2).map(|m| m.as_str()).unwrap_or("");
    match command {
        "uci" => Ok(UciCommand::Uci),
        "isready" => Ok(UciCommand::IsReady),
        "ucinewgame" => Ok(UciCommand::UciNewGame),
        "stop" => Ok(UciCommand::Stop),
        "quit" => Ok(UciCommand::Quit),
        "setoption" => parse_setoption(rest),
        "position" => parse_position(rest),
        "go" => Ok(parse_go(rest)),
        _ => Err(ParseError),
    }
}

fn parse_setoption(s: &str) -> Result<UciCommand, ParseError> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^name\s+(\S.*?)(?:\s+value\s+(.*?))?\s*$").unwrap();
    }
    let captures = RE.captures(s).ok_or(ParseError)?;
    Ok(UciCommand::SetOption {
        name: captures.get(1).unwrap().as_str().to_string(),
        value: captures.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

fn parse_position(s: &str) -> Result<UciCommand, ParseError> {
    const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^(?:fen\s+(?P<fen>.+?)|startpos)(?:\s+moves\s+(?P<moves>.*))?$").unwrap();
    }
    let captures = RE.captures(s).ok_or(ParseError)?;
    Ok(UciCommand::Position {
        fen: captures.name("fen").map(|m| m.as_str().to_string()).unwrap_or_else(|| STARTPOS.to_string()),
        moves: captures.name("moves").map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

/// Parses the `go` subcommands this engine actually honors
/// (`movetime`, `wtime`/`btime`/`winc`/`binc`) into a single search
/// budget. Other GUI-sent keywords (`depth`, `nodes`, `mate`,
/// `searchmoves`, `ponder`, `infinite`) are accepted syntactically but
/// do not change the budget, matching spec.md's "no move ordering
/// heuristics beyond PUCT" scope.
fn parse_go(s: &str) -> UciCommand {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"\b(movetime|wtime|btime|winc|binc|movestogo)\s+(\d+)").unwrap();
    }
    let mut movetime = None;
    let mut wtime = None;
    let mut btime = None;
    let mut winc = None;
    let mut binc = None;
    for captures in RE.captures_iter(s) {
        let value: u64 = captures.get(2).unwrap().as_str().parse().unwrap_or(0);
        match captures.get(1).unwrap().as_str() {
            "movetime" => movetime = Some(value),
            "wtime" => wtime = Some(value),
            "btime" => btime = Some(value),
            "winc" => winc = Some(value),
            "binc" => binc = Some(value),
            _ => {}
        }
    }
    let budget = movetime.unwrap_or_else(|| estimate_time_budget(wtime, btime, winc, binc));
    UciCommand::Go { movetime: Duration::from_millis(budget.max(1)) }
}

/// A simple remaining-time/40 plus increment heuristic, used only when
/// the GUI didn't send an explicit `movetime` -- the search core itself
/// has no clock awareness, so this adapter owns all of it.
fn estimate_time_budget(wtime: Option<u64>, btime: Option<u64>, winc: Option<u64>, binc: Option<u64>) -> u64 {
    let (time, inc) = (wtime.or(btime), winc.or(binc).unwrap_or(0));
    match time {
        Some(t) => (t / 40 + inc / 2).max(50),
        None => 1000,
    }
}

/// Runs the UCI session to completion, reading commands from stdin and
/// writing replies to stdout, until `quit` or end-of-input.
pub fn run(inference: Arc<InferenceManager>, options: EngineOptions) -> io::Result<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "id name firecastle")?;
    writeln!(stdout, "id author the firecastle contributors")?;
    writeln!(stdout, "option name Threads type spin default {} min 1 max 512", options.threads)?;
    writeln!(stdout, "option name CPuct type string default {}", options.c_puct)?;
    writeln!(stdout, "uciok")?;
    stdout.flush()?;

    let (tx, rx): (Sender<UciCommand>, Receiver<UciCommand>) = channel();
    let reader = thread::spawn(move || read_commands(tx));

    let mut search = Search::new(inference, options);
    let mut position_history = Position::startpos();

    'mainloop: loop {
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(cmd) => match cmd {
                UciCommand::Uci => {}
                UciCommand::IsReady => {
                    writeln!(stdout, "readyok")?;
                    stdout.flush()?;
                }
                UciCommand::UciNewGame => {
                    search.initialize(Position::startpos());
                }
                UciCommand::SetOption { name, value } => {
                    search.set_option(&name, &value);
                }
                UciCommand::Position { fen, moves } => {
                    position_history = apply_position(&fen, &moves);
                    search.initialize(position_history.clone());
                }
                UciCommand::Go { movetime } => match search.go(movetime) {
                    Ok(mv) => {
                        writeln!(stdout, "bestmove {}", mv.to_uci())?;
                        stdout.flush()?;
                    }
                    Err(err) => {
                        warn!("search failed: {err}");
                        writeln!(stdout, "bestmove 0000")?;
                        stdout.flush()?;
                    }
                },
                UciCommand::Stop => {
                    search.stop();
                }
                UciCommand::Quit => break 'mainloop,
            },
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break 'mainloop,
        }
    }

    search.stop();
    info!("uci session ended");
    let _ = reader.join();
    Ok(())
}

fn apply_position(fen: &str, moves: &str) -> Position {
    let mut position = Position::from_fen(fen).unwrap_or_else(|_| Position::startpos());
    for token in moves.split_whitespace() {
        if let Some(mv) = resolve_move(&position, token) {
            position.make_move(mv);
        }
    }
    position
}

/// The GUI sends moves in plain long algebraic notation (`e2e4`,
/// `e7e8q`) without disambiguating promotion letter case or which
/// piece moved, so a raw UCI move is matched against the legal move
/// list by (source, destination, promotion) rather than parsed in
/// isolation -- mirrors `position::forsyth` taking already-generated
/// moves in the teacher, instead of constructing an unchecked move.
fn resolve_move(position: &Position, token: &str) -> Option<Move> {
    let candidate = Move::from_uci(token)?;
    position.legal_moves().into_iter().find(|&mv| mv == candidate)
}

fn read_commands(tx: Sender<UciCommand>) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                if let Ok(cmd) = parse_uci_command(&line) {
                    let is_quit = matches!(cmd, UciCommand::Quit);
                    if tx.send(cmd).is_err() {
                        return;
                    }
                    if is_quit {
                        return;
                    }
                }
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_position_startpos_with_moves() {
        match parse_uci_command("position startpos moves e2e4 e7e5").unwrap() {
            UciCommand::Position { fen, moves } => {
                assert!(fen.starts_with("rnbqkbnr"));
                assert_eq!(moves, "e2e4 e7e5");
            }
            _ => panic!("expected Position command"),
        }
    }

    #[test]
    fn test_parse_go_movetime() {
        match parse_uci_command("go movetime 500").unwrap() {
            UciCommand::Go { movetime } => assert_eq!(movetime, Duration::from_millis(500)),
            _ => panic!("expected Go command"),
        }
    }

    #[test]
    fn test_parse_setoption() {
        match parse_uci_command("setoption name Threads value 4").unwrap() {
            UciCommand::SetOption { name, value } => {
                assert_eq!(name, "Threads");
                assert_eq!(value, "4");
            }
            _ => panic!("expected SetOption command"),
        }
    }

    #[test]
    fn test_estimate_time_budget_uses_fraction_of_clock() {
        assert_eq!(estimate_time_budget(Some(40_000), None, Some(0), None), 1000);
    }
}

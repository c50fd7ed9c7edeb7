//! Line-oriented control console on stdin.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{Receiver, unbounded};
use log::warn;

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleCommand {
    Pause,
    Resume,
    Reset,
    Advance,
    Save(Option<u32>),
    Load(Option<u32>),
    Slot(u32),
    Speed(i32),
    Gameshark(bool),
    SaveFile(PathBuf),
    LoadFile(PathBuf),
    Crc(PathBuf),
    Name(PathBuf),
    Status,
    Stop,
    Quit,
}

pub const HELP: &str = "commands: pause, resume, reset, advance, save [slot], load [slot], \
slot <n>, speed <percent>, gameshark on|off, savefile <path>, loadfile <path>, \
crc <rom>, name <rom>, status, stop, quit";

pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let number = |what: &str| -> Result<i64, String> {
        rest.parse::<i64>()
            .map_err(|_| format!("{word}: expected {what}, got '{rest}'"))
    };
    let slot = || -> Result<Option<u32>, String> {
        if rest.is_empty() {
            return Ok(None);
        }
        let n = number("a slot number")?;
        u32::try_from(n)
            .map(Some)
            .map_err(|_| format!("{word}: invalid slot {n}"))
    };
    let path = || -> Result<PathBuf, String> {
        if rest.is_empty() {
            Err(format!("{word}: expected a path"))
        } else {
            Ok(PathBuf::from(rest))
        }
    };

    Ok(match word.to_ascii_lowercase().as_str() {
        "pause" | "p" => ConsoleCommand::Pause,
        "resume" | "r" => ConsoleCommand::Resume,
        "reset" => ConsoleCommand::Reset,
        "advance" | "a" => ConsoleCommand::Advance,
        "save" => ConsoleCommand::Save(slot()?),
        "load" => ConsoleCommand::Load(slot()?),
        "slot" => ConsoleCommand::Slot(slot()?.ok_or("slot: expected a slot number")?),
        "speed" => {
            let n = number("a percentage")?;
            let n = i32::try_from(n).map_err(|_| format!("speed: {n} out of range"))?;
            ConsoleCommand::Speed(n)
        }
        "gameshark" => match rest {
            "on" | "1" => ConsoleCommand::Gameshark(true),
            "off" | "0" => ConsoleCommand::Gameshark(false),
            _ => return Err("gameshark: expected on or off".into()),
        },
        "savefile" => ConsoleCommand::SaveFile(path()?),
        "loadfile" => ConsoleCommand::LoadFile(path()?),
        "crc" => ConsoleCommand::Crc(path()?),
        "name" => ConsoleCommand::Name(path()?),
        "status" => ConsoleCommand::Status,
        "stop" => ConsoleCommand::Stop,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        "" => return Err(String::new()),
        other => return Err(format!("unknown command '{other}'; {HELP}")),
    })
}

/// Reads stdin on a background thread. The channel closes at end of input.
pub fn spawn() -> Receiver<ConsoleCommand> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("ultra-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse(&line) {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_empty() => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("console unavailable: {e}");
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(parse("pause"), Ok(ConsoleCommand::Pause));
        assert_eq!(parse("  save  "), Ok(ConsoleCommand::Save(None)));
        assert_eq!(parse("load 3"), Ok(ConsoleCommand::Load(Some(3))));
        assert_eq!(parse("slot 9"), Ok(ConsoleCommand::Slot(9)));
        assert_eq!(parse("speed 250"), Ok(ConsoleCommand::Speed(250)));
        assert_eq!(parse("gameshark on"), Ok(ConsoleCommand::Gameshark(true)));
        assert_eq!(
            parse("crc roms/My Game.zip"),
            Ok(ConsoleCommand::Crc(PathBuf::from("roms/My Game.zip")))
        );
        assert_eq!(parse("QUIT"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn rejects_malformed_arguments() {
        assert!(parse("slot").is_err());
        assert!(parse("slot -1").is_err());
        assert!(parse("speed fast").is_err());
        assert!(parse("gameshark maybe").is_err());
        assert!(parse("loadfile").is_err());
        assert!(parse("dance").unwrap_err().contains("unknown command"));
        assert_eq!(parse("   "), Err(String::new()));
    }
}

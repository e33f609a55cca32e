use regex::Regex;
use std::path::PathBuf;

use super::layout::{BlockId, SwitchPosition, Aspect, GateState};

/// One line of operator input to the maintenance console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Maintenance(bool),
    Switch(BlockId, SwitchPosition),
    Light(BlockId, Aspect),
    Gate(BlockId, GateState),
    Upload(PathBuf),
    Wait(f64),
}

#[derive(Debug, Fail)]
pub enum CommandError {
    #[fail(display = "error in regular expression: {}", _0)]
    RegexError(String),
    #[fail(display = "error converting number")]
    NumberError,
    #[fail(display = "unrecognized command: {}", _0)]
    Unrecognized(String),
}

pub struct CommandParser {
    maintenance_re: Regex,
    switch_re: Regex,
    light_re: Regex,
    gate_re: Regex,
    upload_re: Regex,
    wait_re: Regex,
}

fn re(s: &str) -> Result<Regex, CommandError> {
    Regex::new(s).map_err(|e| CommandError::RegexError(format!("{:?}", e)))
}

fn block(s: &str) -> Result<BlockId, CommandError> {
    s.parse::<BlockId>().map_err(|_e| CommandError::NumberError)
}

impl CommandParser {
    pub fn new() -> Result<CommandParser, CommandError> {
        Ok(CommandParser {
            maintenance_re: re(r"^\s*maintenance\s+(on|off)\s*$")?,
            switch_re: re(r"^\s*switch\s+(\d+)\s+(a|b)\s*$")?,
            light_re: re(r"^\s*light\s+(\d+)\s+(red|yellow|green|supergreen)\s*$")?,
            gate_re: re(r"^\s*gate\s+(\d+)\s+(open|closed)\s*$")?,
            upload_re: re(r"^\s*upload\s+(\S+)\s*$")?,
            wait_re: re(r"^\s*wait\s+([\d\.]+)\s*$")?,
        })
    }

    /// Parses console commands
    ///
    /// * maintenance on
    /// * switch 13 b
    /// * light 7 green
    /// * gate 19 closed
    /// * upload crossing.plc
    /// * wait 1.5
    ///
    /// Blank lines and lines starting with `#` give `None`.
    pub fn parse(&self, line: &str) -> Result<Option<Command>, CommandError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        if let Some(groups) = self.maintenance_re.captures(line) {
            return Ok(Some(Command::Maintenance(&groups[1] == "on")));
        }
        if let Some(groups) = self.switch_re.captures(line) {
            let pos = groups[2].parse().map_err(|_e| CommandError::Unrecognized(line.to_string()))?;
            return Ok(Some(Command::Switch(block(&groups[1])?, pos)));
        }
        if let Some(groups) = self.light_re.captures(line) {
            let aspect = groups[2].parse().map_err(|_e| CommandError::Unrecognized(line.to_string()))?;
            return Ok(Some(Command::Light(block(&groups[1])?, aspect)));
        }
        if let Some(groups) = self.gate_re.captures(line) {
            let state = groups[2].parse().map_err(|_e| CommandError::Unrecognized(line.to_string()))?;
            return Ok(Some(Command::Gate(block(&groups[1])?, state)));
        }
        if let Some(groups) = self.upload_re.captures(line) {
            return Ok(Some(Command::Upload(PathBuf::from(&groups[1]))));
        }
        if let Some(groups) = self.wait_re.captures(line) {
            let secs = groups[1].parse::<f64>().map_err(|_e| CommandError::NumberError)?;
            return Ok(Some(Command::Wait(secs)));
        }
        Err(CommandError::Unrecognized(line.to_string()))
    }
}

#[cfg(test)]
fn parse_commands(input: &str) -> Result<Vec<Command>, CommandError> {
    let parser = CommandParser::new()?;
    let mut commands = Vec::new();
    for line in input.lines() {
        if let Some(c) = parser.parse(line)? {
            commands.push(c);
        }
    }
    Ok(commands)
}

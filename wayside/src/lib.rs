#[macro_use] extern crate failure_derive;

pub mod error;
pub mod config;
pub mod input;
pub mod output;
pub mod plc;
pub mod railway;
pub mod surface;


use std::path::Path;

pub use crate::config::{EngineConfig, Partition, AuthorityModel, RetryPolicy};
pub use crate::error::EngineError;
pub use crate::input::layout::{Layout, Route, BlockId, SwitchPosition, Aspect, GateState, Fault};
pub use crate::plc::Program;
pub use crate::railway::control::{Controller, CycleReport};
pub use crate::railway::maintenance::{MaintenanceHandle, Mode, Reply};
pub use crate::railway::registry::{Block, BlockRegistry, ProposedChange, Setting, Attribute};
pub use crate::railway::vital::SafetyReport;
pub use crate::surface::{StateSurface, FileSurface, MemorySurface, ExternalInputs, Outputs, TrainCommand};

pub type AppResult<T> = Result<T, failure::Error>;

pub fn read_file(f :&Path) -> AppResult<String> {
  use std::fs::File;
  use std::io::prelude::*;
  use std::io::BufReader;

  let file = File::open(f)?;
  let mut file = BufReader::new(&file);
  let mut contents = String::new();
  file.read_to_string(&mut contents)?;
  Ok(contents)
}

pub fn get_layout(s :&Path) -> AppResult<Layout> {
    let contents = read_file(s)?;
    get_layout_string(&contents)
}

pub fn get_layout_string(s :&str) -> AppResult<Layout> {
    use crate::input::parser_utils::lexer;
    use crate::input::layout_parser::parse;
    let lex = lexer(&mut s.chars())?;
    let layout = parse(&lex)?;
    layout.check()?;
    Ok(layout)
}

pub fn get_program(s :&Path) -> AppResult<Program> {
    let contents = read_file(s)?;
    get_program_string(&contents)
}

pub fn get_program_string(s :&str) -> AppResult<Program> {
    use crate::input::parser_utils::lexer;
    let lex = lexer(&mut s.chars())?;
    let program = plc::parser::parse(&lex)?;
    Ok(program)
}

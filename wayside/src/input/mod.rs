//! Static layout, program and operator input formats.

pub mod layout;
pub mod parser_utils;
pub mod layout_parser;
pub mod command;

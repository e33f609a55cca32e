use super::layout::*;
use super::parser_utils::*;

use std::collections::BTreeMap;

// Layout file format:
//
//   block 3 { length 150 next [4] light }
//   block 4 { length 100 switch [5, 12] }
//   block 9 { length 50 gate [7, 8, 10] light }
//   route main { blocks [1, 2, 3, 4] distances [100, 250, 400, 500] }
//
// A route without `distances` sums the block lengths.

enum Statement {
    Block(BlockId, StaticBlock),
    Route(String, RouteDecl),
}

pub fn parse(t: &[Token]) -> Result<Layout, ParseError> {
    let mut i = 0;
    let mut blocks = BTreeMap::new();
    let mut routes = Vec::new();
    while !matches(&mut i, t, Token::EOF) {
        let start = i;
        match alt(&mut i, t, &[&parse_block, &parse_route])? {
            Statement::Block(id, block) => {
                if blocks.insert(id, block).is_some() {
                    return Err(ParseError::Invalid(start, format!("block {} defined twice", id)));
                }
            }
            Statement::Route(name, decl) => routes.push((name, decl)),
        }
    }
    Layout::new(blocks, routes).map_err(|e| ParseError::Invalid(i, e.to_string()))
}

fn parse_block(i: &mut usize, t: &[Token]) -> Result<Statement, ParseError> {
    symbol(i, t, "block")?;
    let id = block_id(i, t)?;
    must_match(i, t, Token::BraceOpen)?;
    let mut block = StaticBlock::default();
    let mut length = None;
    while !matches(i, t, Token::BraceClose) {
        let start = *i;
        match identifier(i, t)?.as_str() {
            "length" => length = Some(number(i, t)?),
            "next" => block.next = list(i, t, block_id)?.into(),
            "switch" => {
                let legs = list(i, t, block_id)?;
                if legs.len() != 2 {
                    return Err(ParseError::Invalid(start, format!("switch {} needs two legs", id)));
                }
                block.switch = Some((legs[0], legs[1]));
            }
            "light" => block.light = true,
            "gate" => block.gate = Some(list(i, t, block_id)?.into()),
            x => return Err(ParseError::UnexpectedToken(start, x.to_string())),
        }
    }
    block.length = length.ok_or_else(|| ParseError::Invalid(*i, format!("block {} has no length", id)))?;
    Ok(Statement::Block(id, block))
}

fn parse_route(i: &mut usize, t: &[Token]) -> Result<Statement, ParseError> {
    symbol(i, t, "route")?;
    let name = identifier(i, t)?;
    must_match(i, t, Token::BraceOpen)?;
    symbol(i, t, "blocks")?;
    let blocks = list(i, t, block_id)?;
    let mut distances = None;
    if keyword(i, t, "distances") {
        distances = Some(list(i, t, number)?);
    }
    must_match(i, t, Token::BraceClose)?;
    Ok(Statement::Route(name, RouteDecl { blocks, distances }))
}

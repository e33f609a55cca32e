use super::*;
use crate::input::parser_utils::*;
use crate::input::layout::{SwitchPosition, Aspect, GateState};

// program  := [ "program" name ] rule*
// rule     := ("switch" | "light" | "gate") id "{" (value "if" cond)* "else" value "}"
// cond     := "occupied" set | "clear" set | "not" cond
//           | "all" "[" cond, .. "]" | "any" "[" cond, .. "]"
//           | "true" | "false" | "(" cond ")"
// set      := id [ "to" id ] | "[" id, .. "]"

pub fn parse(t: &[Token]) -> Result<Program, ParseError> {
    let mut i = 0;
    let mut name = None;
    if keyword(&mut i, t, "program") {
        name = Some(identifier(&mut i, t)?);
    }
    let mut rules = Vec::new();
    while !matches(&mut i, t, Token::EOF) {
        rules.push(rule(&mut i, t)?);
    }
    Ok(Program { name, rules })
}

fn rule(i: &mut usize, t: &[Token]) -> Result<Rule, ParseError> {
    let start = *i;
    let kind = identifier(i, t)?;
    let value: fn(&mut usize, &[Token]) -> Result<Setting, ParseError> = match kind.as_str() {
        "switch" => switch_value,
        "light" => light_value,
        "gate" => gate_value,
        x => return Err(ParseError::UnexpectedToken(start, format!("{} is not an output", x))),
    };
    let block = block_id(i, t)?;
    must_match(i, t, Token::BraceOpen)?;
    let mut arms = Vec::new();
    while !keyword(i, t, "else") {
        let v = value(i, t)?;
        symbol(i, t, "if")?;
        arms.push((v, cond(i, t)?));
    }
    let otherwise = value(i, t)?;
    must_match(i, t, Token::BraceClose)?;
    Ok(Rule { block, arms, otherwise })
}

fn named<T: std::str::FromStr>(i: &mut usize, t: &[Token]) -> Result<T, ParseError> {
    let start = *i;
    let s = identifier(i, t)?;
    s.parse::<T>().map_err(|_| ParseError::Invalid(start, format!("unexpected value {:?}", s)))
}

fn switch_value(i: &mut usize, t: &[Token]) -> Result<Setting, ParseError> {
    Ok(Setting::Switch(named::<SwitchPosition>(i, t)?))
}

fn light_value(i: &mut usize, t: &[Token]) -> Result<Setting, ParseError> {
    Ok(Setting::Light(named::<Aspect>(i, t)?))
}

fn gate_value(i: &mut usize, t: &[Token]) -> Result<Setting, ParseError> {
    Ok(Setting::Gate(named::<GateState>(i, t)?))
}

fn cond(i: &mut usize, t: &[Token]) -> Result<Expr, ParseError> {
    if matches(i, t, Token::ParensOpen) {
        let e = cond(i, t)?;
        must_match(i, t, Token::ParensClose)?;
        return Ok(e);
    }
    let start = *i;
    match identifier(i, t)?.as_str() {
        "occupied" => Ok(Expr::Occupied(set(i, t)?)),
        "clear" => Ok(Expr::Clear(set(i, t)?)),
        "not" => Ok(Expr::Not(Box::new(cond(i, t)?))),
        "all" => Ok(Expr::All(list(i, t, cond)?)),
        "any" => Ok(Expr::Any(list(i, t, cond)?)),
        "true" => Ok(Expr::Const(true)),
        "false" => Ok(Expr::Const(false)),
        x => Err(ParseError::UnexpectedToken(start, format!("{} is not a condition", x))),
    }
}

fn set(i: &mut usize, t: &[Token]) -> Result<BlockSet, ParseError> {
    if let Some(&Token::ListOpen) = t.get(*i) {
        return Ok(BlockSet::List(list(i, t, block_id)?));
    }
    let first = block_id(i, t)?;
    if keyword(i, t, "to") {
        Ok(BlockSet::Span(first, block_id(i, t)?))
    } else {
        Ok(BlockSet::One(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_program_string;

    #[test]
    fn test_parse_program() {
        let p = get_program_string("
            program east
            // crossing at 19
            gate 19 { closed if occupied 17 to 21 else open }
            switch 13 { b if (any [occupied [12, 14], not clear 15]) else a }
        ").unwrap();
        assert_eq!(p.name, Some("east".to_string()));
        assert_eq!(p.rules.len(), 2);
        assert_eq!(p.rules[0], Rule {
            block: 19,
            arms: vec![(Setting::Gate(GateState::Closed), Expr::Occupied(BlockSet::Span(17, 21)))],
            otherwise: Setting::Gate(GateState::Open),
        });
        assert_eq!(p.rules[1].arms[0].1, Expr::Any(vec![
            Expr::Occupied(BlockSet::List(vec![12, 14])),
            Expr::Not(Box::new(Expr::Clear(BlockSet::One(15)))),
        ]));
    }

    #[test]
    fn test_program_errors() {
        // light aspect on a switch
        assert!(get_program_string("switch 1 { red if true else a }").is_err());
        // no default arm
        assert!(get_program_string("light 1 { red if true }").is_err());
        assert!(get_program_string("horn 1 { else loud }").is_err());
        assert!(get_program_string("gate 1 { closed if maybe 3 else open }").is_err());
    }
}

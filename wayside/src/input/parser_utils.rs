use std::iter::Peekable;
use std::fmt::Debug;

use super::layout::BlockId;

#[derive(Debug, Clone, Fail)]
pub enum LexerError {
    #[fail(display = "unexpected character {:?} on line {}", c, i)]
    UnexpectedChar { i: usize, c: String },
    #[fail(display = "malformed number {:?} on line {}", _1, _0)]
    BadNumber(usize, String),
}

#[derive(Debug, Clone, Fail)]
pub enum ParseError {
    #[fail(display = "unexpected token at {}: {}", _0, _1)]
    UnexpectedToken(usize, String),
    #[fail(display = "unexpected end of input")]
    UnexpectedEOF,
    #[fail(display = "no alternative matched: {:?}", _0)]
    Many(Vec<ParseError>),
    #[fail(display = "{} at {}", _1, _0)]
    Invalid(usize, String),
}

// LEXER
//
//
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    BraceOpen,
    BraceClose,
    ListOpen,
    ListClose,
    ListSep,
    ParensOpen,
    ParensClose,
    Number(f64),
    Identifier(String),
    EOF,
}

pub fn lexer(x: &mut dyn Iterator<Item = char>) -> Result<Vec<Token>, LexerError> {
    let mut tokens = Vec::new();
    let mut input = x.peekable();
    let mut line = 1;
    while let Some(&ch) = input.peek() {
        match ch {
            x if x.is_numeric() => {
                let num: String = consume_while(&mut input, |a| {
                        a.is_numeric() || a == 'e' || a == 'E' || a == '.'
                    })
                    .into_iter()
                    .collect();
                let n = num.parse::<f64>().map_err(|_| LexerError::BadNumber(line, num.clone()))?;
                tokens.push(Token::Number(n));
            }
            x if x.is_alphabetic() => {
                let s: String = consume_while(&mut input, |a| a == '_' || a.is_alphanumeric())
                    .into_iter()
                    .collect();
                tokens.push(Token::Identifier(s));
            }
            '/' => {
                input.next();
                if input.peek() != Some(&'/') {
                    return Err(LexerError::UnexpectedChar { i: line, c: "/".to_string() });
                }
                consume_while(&mut input, |a| a != '\n');
            }
            '[' => {
                input.next();
                tokens.push(Token::ListOpen);
            }
            ']' => {
                input.next();
                tokens.push(Token::ListClose);
            }
            ',' => {
                input.next();
                tokens.push(Token::ListSep);
            }
            '(' => {
                input.next();
                tokens.push(Token::ParensOpen);
            }
            ')' => {
                input.next();
                tokens.push(Token::ParensClose);
            }
            '{' => {
                input.next();
                tokens.push(Token::BraceOpen);
            }
            '}' => {
                input.next();
                tokens.push(Token::BraceClose);
            }
            ' ' | '\r' | '\t' | ';' => {
                input.next();
            }
            '\n' => {
                input.next();
                line += 1;
            }
            c => {
                return Err(LexerError::UnexpectedChar {
                    i: line,
                    c: c.to_string(),
                });
            }
        }
    }
    tokens.push(Token::EOF);
    Ok(tokens)
}

fn consume_while<F>(it: &mut Peekable<&mut dyn Iterator<Item = char>>, x: F) -> Vec<char>
    where F: Fn(char) -> bool
{
    let mut v: Vec<char> = vec![];
    while let Some(&ch) = it.peek() {
        if x(ch) {
            it.next();
            v.push(ch);
        } else {
            break;
        }
    }
    v
}

// PARSER COMBINATORS
//
//

fn peek<'a, Token>(i: usize, tokens: &'a [Token]) -> Result<&'a Token, ParseError> {
    tokens.get(i).ok_or(ParseError::UnexpectedEOF)
}

pub fn alt<T, Token: PartialEq + Debug + Clone>(i: &mut usize,
              tokens: &[Token],
              alts: &[&dyn Fn(&mut usize, &[Token]) -> Result<T, ParseError>])
              -> Result<T, ParseError> {
    let start = *i;
    let mut errs = Vec::new();
    for alt in alts {
        *i = start;
        match alt(i, tokens) {
            Ok(x) => return Ok(x),
            Err(y) => errs.push(y),
        }
    }
    Err(ParseError::Many(errs))
}

pub fn must_match<Token: PartialEq + Debug + Clone>(i: &mut usize, tokens: &[Token], tok: Token) -> Result<(), ParseError> {
    if matches(i, tokens, tok) {
        Ok(())
    } else {
        Err(ParseError::UnexpectedToken(*i, format!("{:?}", peek(*i, tokens)?)))
    }
}

pub fn matches<Token: PartialEq + Debug + Clone>(i: &mut usize, tokens: &[Token], tok: Token) -> bool {
    let r = tokens.get(*i) == Some(&tok);
    if r {
        *i += 1;
    }
    r
}

pub fn list<F, O>(i: &mut usize, t: &[Token], f: F) -> Result<Vec<O>, ParseError>
    where F: Fn(&mut usize, &[Token]) -> Result<O, ParseError>
{
    must_match(i, t, Token::ListOpen)?;
    let mut v = Vec::new();
    if matches(i, t, Token::ListClose) {
        return Ok(v);
    }
    loop {
        v.push(f(i, t)?);
        if !matches(i, t, Token::ListSep) {
            break;
        }
    }
    must_match(i, t, Token::ListClose)?;
    Ok(v)
}

pub fn symbol(i: &mut usize, t: &[Token], s: &str) -> Result<(), ParseError> {
    let start = *i;
    if identifier(i, t)? != s {
        *i = start;
        Err(ParseError::UnexpectedToken(start, format!("expected {:?}", s)))
    } else {
        Ok(())
    }
}

/// Consumes the identifier `s` if it is next, leaving the position alone otherwise.
pub fn keyword(i: &mut usize, t: &[Token], s: &str) -> bool {
    matches(i, t, Token::Identifier(s.to_string()))
}

pub fn identifier(i: &mut usize, tokens: &[Token]) -> Result<String, ParseError> {
    let r = match *peek(*i, tokens)? {
        Token::Identifier(ref s) => s.clone(),
        ref x => return Err(ParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

pub fn number(i: &mut usize, tokens: &[Token]) -> Result<f64, ParseError> {
    let r = match *peek(*i, tokens)? {
        Token::Number(x) => x,
        ref x => return Err(ParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

pub fn block_id(i: &mut usize, tokens: &[Token]) -> Result<BlockId, ParseError> {
    let start = *i;
    let x = number(i, tokens)?;
    if x < 0.0 || x.fract() != 0.0 {
        *i = start;
        return Err(ParseError::Invalid(start, format!("{} is not a block id", x)));
    }
    Ok(x as BlockId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexer() {
        let t = lexer(&mut "block 12 { length 1.5e2 } // trailing\nnext [1, 2]".chars()).unwrap();
        assert_eq!(t, vec![
            Token::Identifier("block".to_string()),
            Token::Number(12.0),
            Token::BraceOpen,
            Token::Identifier("length".to_string()),
            Token::Number(150.0),
            Token::BraceClose,
            Token::Identifier("next".to_string()),
            Token::ListOpen,
            Token::Number(1.0),
            Token::ListSep,
            Token::Number(2.0),
            Token::ListClose,
            Token::EOF,
        ]);
    }

    #[test]
    fn test_lexer_errors() {
        match lexer(&mut "block 1\n  $".chars()) {
            Err(LexerError::UnexpectedChar { i, .. }) => assert_eq!(i, 2),
            x => panic!("expected lexer error, got {:?}", x),
        }
        assert!(lexer(&mut "1.2.3".chars()).is_err());
    }

    #[test]
    fn test_block_list() {
        let t = lexer(&mut "[3, 4.5]".chars()).unwrap();
        let mut i = 0;
        assert!(list(&mut i, &t, block_id).is_err());
        let t = lexer(&mut "[3, 4]".chars()).unwrap();
        let mut i = 0;
        assert_eq!(list(&mut i, &t, block_id).unwrap(), vec![3, 4]);
        assert_eq!(t[i], Token::EOF);
    }
}

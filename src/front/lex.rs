//! The lexer.

use derive_more::Display;
use regex::Regex;
use thiserror::Error;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("const")]
    Const,
    #[display("int")]
    Int,
    #[display("void")]
    Void,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("break")]
    Break,
    #[display("continue")]
    Continue,
    #[display("return")]
    Return,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(",")]
    Comma,
    #[display(";")]
    Semi,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("!")]
    Not,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
}

/// Keywords are lexed as identifiers first, then reclassified here.
const KEYWORDS: [(&str, TokenKind); 9] = [
    ("const", TokenKind::Const),
    ("int", TokenKind::Int),
    ("void", TokenKind::Void),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
];

#[derive(Error, Debug, PartialEq)]
#[error("Lexer error: unexpected character {1:?} at {0}")]
pub struct LexError(pub usize, pub char);

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        let matcher = |pat: &str, kind| (Regex::new(&format!(r"\A(?:{pat})")).unwrap(), kind);
        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*)|(?s:/\*.*?\*/))*").unwrap(),
            // Multi-character operators come before their one-character
            // prefixes; hex literals before octal/decimal.
            matchers: vec![
                matcher(r"[A-Za-z_][A-Za-z0-9_]*", Id),
                matcher(r"0[xX][0-9a-fA-F]+|[0-9]+", Num),
                matcher(r"&&", AndAnd),
                matcher(r"\|\|", OrOr),
                matcher(r"==", EqEq),
                matcher(r"!=", NotEq),
                matcher(r"<=", Le),
                matcher(r">=", Ge),
                matcher(r"<", Lt),
                matcher(r">", Gt),
                matcher(r"=", Assign),
                matcher(r"\+", Plus),
                matcher(r"-", Minus),
                matcher(r"\*", Mul),
                matcher(r"/", Div),
                matcher(r"%", Mod),
                matcher(r"!", Not),
                matcher(r"\(", LParen),
                matcher(r"\)", RParen),
                matcher(r"\{", LBrace),
                matcher(r"\}", RBrace),
                matcher(r"\[", LBracket),
                matcher(r"\]", RBracket),
                matcher(r",", Comma),
                matcher(r";", Semi),
            ],
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (regex, kind) in &self.matchers {
            if let Some(m) = regex.find(rest) {
                let text = m.as_str();
                self.pos += m.end();
                let kind = if *kind == TokenKind::Id {
                    KEYWORDS
                        .iter()
                        .find(|(word, _)| *word == text)
                        .map_or(TokenKind::Id, |(_, k)| *k)
                } else {
                    *kind
                };
                return Ok(Some(Token { kind, text }));
            }
        }
        Err(LexError(self.pos, rest.chars().next().unwrap_or('\0')))
    }
}

/// Lex the whole input into a token vector.
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = vec![];
    while let Some(token) = lexer.next()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("const int whiled while"),
            vec![Const, Int, Id, While]
        );
    }

    #[test]
    fn operators_longest_first() {
        assert_eq!(kinds("<= < == = ! != && ||"), vec![Le, Lt, EqEq, Assign, Not, NotEq, AndAnd, OrOr]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("a // line\n /* block\n still */ b"), vec![Id, Id]);
    }

    #[test]
    fn numbers() {
        let tokens = lex("0 123 0x1F").unwrap();
        assert!(tokens.iter().all(|t| t.kind == Num));
        assert_eq!(tokens[2].text, "0x1F");
    }

    #[test]
    fn error_position() {
        assert_eq!(lex("a #"), Err(LexError(2, '#')));
    }
}

//! The parser

use thiserror::Error;

use crate::common::Id;

use super::ast::*;
use super::lex::{lex, LexError, Token, TokenKind};

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("Parse error: expected {expected}, found '{found}'")]
    Unexpected { expected: String, found: String },
    #[error("Parse error: unexpected end of input, expected {expected}")]
    Eof { expected: String },
    #[error("Parse error: {0}")]
    Invalid(String),
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = lex(input)?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    /// Consume the next token if it has the given kind.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(token) if token.kind == kind => Ok(self.advance().unwrap()),
            Some(token) => Err(ParseError::Unexpected {
                expected: kind.to_string(),
                found: token.text.to_string(),
            }),
            None => Err(ParseError::Eof {
                expected: kind.to_string(),
            }),
        }
    }

    fn ident(&mut self) -> Result<Id, ParseError> {
        let token = self.expect(TokenKind::Id)?;
        Ok(Id::from_ref(token.text))
    }

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut globals = vec![];
        let mut functions = vec![];
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::Const => {
                    self.advance();
                    self.expect(TokenKind::Int)?;
                    globals.extend(self.decl_list(true)?);
                }
                TokenKind::Int | TokenKind::Void => {
                    let ret = if token.kind == TokenKind::Int {
                        FuncType::Int
                    } else {
                        FuncType::Void
                    };
                    self.advance();
                    let ident = self.ident()?;
                    if self.at(TokenKind::LParen) {
                        functions.push(self.func_def(ret, ident)?);
                    } else if ret == FuncType::Void {
                        return Err(ParseError::Invalid(format!(
                            "variable '{ident}' cannot have type void"
                        )));
                    } else {
                        globals.extend(self.decl_list_from(false, ident)?);
                    }
                }
                _ => {
                    return Err(ParseError::Unexpected {
                        expected: "declaration or function definition".to_string(),
                        found: token.text.to_string(),
                    })
                }
            }
        }
        Ok(Program { globals, functions })
    }

    fn func_def(&mut self, ret: FuncType, ident: Id) -> Result<FuncDef, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = vec![];
        if !self.at(TokenKind::RParen) {
            loop {
                self.expect(TokenKind::Int)?;
                let name = self.ident()?;
                let mut dims = vec![];
                if self.eat(TokenKind::LBracket) {
                    self.expect(TokenKind::RBracket)?;
                    dims.push(None);
                    while self.eat(TokenKind::LBracket) {
                        dims.push(Some(self.expr()?));
                        self.expect(TokenKind::RBracket)?;
                    }
                }
                params.push(FuncParam { ident: name, dims });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(FuncDef {
            ret,
            ident,
            params,
            body,
        })
    }

    /// A declaration statement after its `const? int` prefix.
    fn decl_list(&mut self, is_const: bool) -> Result<Vec<Decl>, ParseError> {
        let ident = self.ident()?;
        self.decl_list_from(is_const, ident)
    }

    /// Rest of a declaration statement once the first declarator's name is
    /// known (the caller may have had to read it to tell declarations from
    /// function definitions).
    fn decl_list_from(&mut self, is_const: bool, first: Id) -> Result<Vec<Decl>, ParseError> {
        let mut decls = vec![self.declarator(is_const, first)?];
        while self.eat(TokenKind::Comma) {
            let ident = self.ident()?;
            decls.push(self.declarator(is_const, ident)?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(decls)
    }

    fn declarator(&mut self, is_const: bool, ident: Id) -> Result<Decl, ParseError> {
        let mut dims = vec![];
        while self.eat(TokenKind::LBracket) {
            dims.push(self.expr()?);
            self.expect(TokenKind::RBracket)?;
        }
        let init = if self.eat(TokenKind::Assign) {
            Some(self.init()?)
        } else {
            None
        };
        Ok(Decl {
            is_const,
            ident,
            dims,
            init,
        })
    }

    fn init(&mut self) -> Result<Init, ParseError> {
        if self.eat(TokenKind::LBrace) {
            let mut items = vec![];
            if !self.at(TokenKind::RBrace) {
                loop {
                    items.push(self.init()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Init::List(items))
        } else {
            Ok(Init::Expr(self.expr()?))
        }
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = vec![];
        while !self.eat(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(ParseError::Eof {
                    expected: TokenKind::RBrace.to_string(),
                });
            }
            stmts.extend(self.stmt()?);
        }
        Ok(Block { stmts })
    }

    /// A single statement; declaration statements may expand to several.
    fn stmt(&mut self) -> Result<Vec<Stmt>, ParseError> {
        use TokenKind::*;
        let Some(token) = self.peek() else {
            return Err(ParseError::Eof {
                expected: "statement".to_string(),
            });
        };
        match token.kind {
            LBrace => Ok(vec![Stmt::Block(self.block()?)]),
            Semi => {
                self.advance();
                Ok(vec![Stmt::Expr(None)])
            }
            Const => {
                self.advance();
                self.expect(Int)?;
                Ok(self.decl_list(true)?.into_iter().map(Stmt::Decl).collect())
            }
            Int => {
                self.advance();
                Ok(self.decl_list(false)?.into_iter().map(Stmt::Decl).collect())
            }
            If => {
                self.advance();
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let then = self.stmt_as_block()?;
                let alt = if self.eat(Else) {
                    Some(self.stmt_as_block()?)
                } else {
                    None
                };
                Ok(vec![Stmt::If { cond, then, alt }])
            }
            While => {
                self.advance();
                self.expect(LParen)?;
                let cond = self.expr()?;
                self.expect(RParen)?;
                let body = self.stmt_as_block()?;
                Ok(vec![Stmt::While { cond, body }])
            }
            Break => {
                self.advance();
                self.expect(Semi)?;
                Ok(vec![Stmt::Break])
            }
            Continue => {
                self.advance();
                self.expect(Semi)?;
                Ok(vec![Stmt::Continue])
            }
            Return => {
                self.advance();
                let value = if self.at(Semi) { None } else { Some(self.expr()?) };
                self.expect(Semi)?;
                Ok(vec![Stmt::Return(value)])
            }
            _ => {
                let expr = self.expr()?;
                let stmt = if self.eat(Assign) {
                    let (ident, indices) = match expr {
                        Expr::Var(ident) => (ident, vec![]),
                        Expr::Index { array, indices, .. } => (array, indices),
                        _ => {
                            return Err(ParseError::Invalid(
                                "assignment target is not a variable or array element".to_string(),
                            ))
                        }
                    };
                    Stmt::Assign {
                        ident,
                        indices,
                        value: self.expr()?,
                    }
                } else {
                    Stmt::Expr(Some(expr))
                };
                self.expect(Semi)?;
                Ok(vec![stmt])
            }
        }
    }

    /// `if`/`while` bodies become blocks so each body opens its own scope.
    fn stmt_as_block(&mut self) -> Result<Block, ParseError> {
        if self.at(TokenKind::LBrace) {
            self.block()
        } else {
            Ok(Block {
                stmts: self.stmt()?,
            })
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.binary_expr(0)
    }

    /// Precedence-climbing over the binary operator tiers.
    fn binary_expr(&mut self, tier: usize) -> Result<Expr, ParseError> {
        use TokenKind::*;
        const TIERS: [&[(TokenKind, BinOp)]; 6] = [
            &[(OrOr, BinOp::Or)],
            &[(AndAnd, BinOp::And)],
            &[(EqEq, BinOp::Eq), (NotEq, BinOp::Ne)],
            &[
                (Lt, BinOp::Lt),
                (Gt, BinOp::Gt),
                (Le, BinOp::Le),
                (Ge, BinOp::Ge),
            ],
            &[(Plus, BinOp::Add), (Minus, BinOp::Sub)],
            &[(Mul, BinOp::Mul), (Div, BinOp::Div), (Mod, BinOp::Mod)],
        ];
        if tier == TIERS.len() {
            return self.unary();
        }
        let mut lhs = self.binary_expr(tier + 1)?;
        'outer: loop {
            for (kind, op) in TIERS[tier] {
                if self.at(*kind) {
                    self.advance();
                    let rhs = self.binary_expr(tier + 1)?;
                    lhs = Expr::binary(*op, lhs, rhs);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        match self.peek_kind() {
            Some(Plus) => {
                self.advance();
                self.unary()
            }
            Some(Minus) => {
                self.advance();
                Ok(Expr::binary(BinOp::Sub, Expr::num(0), self.unary()?))
            }
            Some(Not) => {
                self.advance();
                Ok(Expr::binary(BinOp::Eq, self.unary()?, Expr::num(0)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind::*;
        let Some(token) = self.advance() else {
            return Err(ParseError::Eof {
                expected: "expression".to_string(),
            });
        };
        match token.kind {
            LParen => {
                let expr = self.expr()?;
                self.expect(RParen)?;
                Ok(expr)
            }
            Num => Ok(Expr::Num(parse_number(token.text)?)),
            Id => {
                let ident = crate::common::Id::from_ref(token.text);
                if self.eat(LParen) {
                    let mut args = vec![];
                    if !self.at(RParen) {
                        loop {
                            args.push(self.expr()?);
                            if !self.eat(Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(RParen)?;
                    Ok(Expr::Call {
                        callee: ident,
                        args,
                    })
                } else if self.at(LBracket) {
                    let mut indices = vec![];
                    while self.eat(LBracket) {
                        indices.push(self.expr()?);
                        self.expect(RBracket)?;
                    }
                    Ok(Expr::Index {
                        array: ident,
                        indices,
                        deref: true,
                    })
                } else {
                    Ok(Expr::Var(ident))
                }
            }
            _ => Err(ParseError::Unexpected {
                expected: "expression".to_string(),
                found: token.text.to_string(),
            }),
        }
    }
}

/// Integer literals: hex (`0x`), octal (leading `0`), or decimal.  Values
/// wrap into `i32`, so `2147483648` round-trips through unary minus to
/// `INT_MIN`.
fn parse_number(text: &str) -> Result<i32, ParseError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8)
    } else {
        text.parse::<i64>()
    };
    match parsed {
        Ok(value) => Ok(value as i32),
        Err(_) => Err(ParseError::Invalid(format!("bad integer literal '{text}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        let program = parse("int main() { return 1 + 2 * 3 < 4 && 5; }").unwrap();
        let Stmt::Return(Some(expr)) = &program.functions[0].body.stmts[0] else {
            panic!("expected return");
        };
        // and(lt(add(1, mul(2, 3)), 4), 5)
        let Expr::Binary { op: BinOp::And, lhs, .. } = expr else {
            panic!("expected &&, got {expr:?}");
        };
        assert!(matches!(**lhs, Expr::Binary { op: BinOp::Lt, .. }));
    }

    #[test]
    fn unary_desugars() {
        let program = parse("int main() { return -!x; }").unwrap();
        let Stmt::Return(Some(expr)) = &program.functions[0].body.stmts[0] else {
            panic!("expected return");
        };
        let Expr::Binary { op: BinOp::Sub, lhs, rhs } = expr else {
            panic!("expected sub, got {expr:?}");
        };
        assert!(matches!(**lhs, Expr::Num(0)));
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Eq, .. }));
    }

    #[test]
    fn declarations_and_arrays() {
        let program = parse("const int n = 4; int a[2][3]; int f(int x, int p[][3]) { return p[x][0]; }").unwrap();
        assert_eq!(program.globals.len(), 2);
        assert!(program.globals[0].is_const);
        assert_eq!(program.globals[1].dims.len(), 2);
        let f = &program.functions[0];
        assert_eq!(f.params.len(), 2);
        assert!(f.params[0].dims.is_empty());
        assert_eq!(f.params[1].dims.len(), 2);
        assert!(f.params[1].dims[0].is_none());
    }

    #[test]
    fn assignment_vs_expression() {
        let program = parse("int main() { a[1] = 2; f(3); ; }").unwrap();
        let stmts = &program.functions[0].body.stmts;
        assert!(matches!(stmts[0], Stmt::Assign { .. }));
        assert!(matches!(stmts[1], Stmt::Expr(Some(Expr::Call { .. }))));
        assert!(matches!(stmts[2], Stmt::Expr(None)));
    }

    #[test]
    fn dangling_else_binds_inner() {
        let program = parse("int main() { if (a) if (b) return 1; else return 2; }").unwrap();
        let Stmt::If { alt, then, .. } = &program.functions[0].body.stmts[0] else {
            panic!("expected if");
        };
        assert!(alt.is_none());
        assert!(matches!(then.stmts[0], Stmt::If { alt: Some(_), .. }));
    }

    #[test]
    fn literal_radixes() {
        assert_eq!(parse_number("0x10"), Ok(16));
        assert_eq!(parse_number("010"), Ok(8));
        assert_eq!(parse_number("10"), Ok(10));
        assert_eq!(parse_number("2147483648"), Ok(i32::MIN));
    }

    #[test]
    fn parse_failures() {
        assert!(parse("int main() { return 1 }").is_err());
        assert!(parse("void x;").is_err());
        assert!(parse("int main() { 1 = 2; }").is_err());
    }
}

use crate::error::{CalcError, ParseError};
use crate::lexer::tokenize;
use crate::types::expr::*;
use crate::types::token::*;

/// A parsed formula. The registry is empty unless the formula references dice by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub root: Node,
    pub registry: DiceRegistry,
}

impl ParsedFormula {
    pub fn has_dice_reuse(&self) -> bool {
        !self.registry.is_empty()
    }
}

// ==========================================
// Entry points
// ==========================================

pub fn parse_formula(formula: &str) -> Result<ParsedFormula, CalcError> {
    let tokens = tokenize(formula)?;
    Ok(parse(&tokens)?)
}

pub fn parse(tokens: &[Token]) -> Result<ParsedFormula, ParseError> {
    if tokens.is_empty() {
        return Err(ParseError::EmptyFormula);
    }
    let reuse_mode = tokens
        .iter()
        .any(|t| matches!(t.kind, TokenKind::DiceRef { .. }));
    let mut parser = TokenParser {
        tokens,
        pos: 0,
        registry: reuse_mode.then(DiceRegistry::new),
    };
    let root = parser.parse_conditional()?;
    if let Some(token) = parser.peek_token() {
        return Err(ParseError::UnexpectedToken {
            expected: "an operator or the end of the formula",
            found: token.kind.to_string(),
            offset: token.offset,
        });
    }
    Ok(ParsedFormula {
        root,
        registry: parser.registry.unwrap_or_default(),
    })
}

// ==========================================
// Recursive descent over the token slice
// ==========================================

struct TokenParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    registry: Option<DiceRegistry>, // Some(..) in dice-reuse mode
}

impl<'t> TokenParser<'t> {
    fn peek_token(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&'t TokenKind> {
        self.peek_token().map(|t| &t.kind)
    }

    fn next_token(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn offset(&self) -> usize {
        match self.peek_token() {
            Some(token) => token.offset,
            None => self.tokens.last().map(|t| t.offset + 1).unwrap_or(0),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_close(&mut self, close: &TokenKind, open: char, open_offset: usize) -> Result<(), ParseError> {
        if self.eat(close) {
            Ok(())
        } else {
            Err(ParseError::Unclosed {
                open,
                offset: open_offset,
            })
        }
    }

    // Level 1: `cond ? a : b`, branches nest to the right
    fn parse_conditional(&mut self) -> Result<Node, ParseError> {
        let start = self.offset();
        let condition = self.parse_comparison()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }
        if condition.as_comparison().is_none() {
            return Err(ParseError::ConditionNotComparison { offset: start });
        }
        let if_true = self.parse_conditional()?;
        if !self.eat(&TokenKind::Colon) {
            return Err(self.unexpected("':'"));
        }
        let if_false = self.parse_conditional()?;
        Ok(Node::conditional(condition, if_true, if_false))
    }

    // Level 2: a single, non-associative comparison
    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_additive()?;
        let Some(TokenKind::Compare(op)) = self.peek() else {
            return Ok(left);
        };
        let op = *op;
        self.pos += 1;
        let right = self.parse_additive()?;
        if let Some(TokenKind::Compare(_)) = self.peek() {
            return Err(ParseError::ChainedComparison {
                offset: self.offset(),
            });
        }
        Ok(Node::comparison(left, op, right))
    }

    // Level 3: + -
    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Node::binary(left, op, right);
        }
    }

    // Level 4: * /
    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_factor()?;
            left = Node::binary(left, op, right);
        }
    }

    // Level 5: atom with an optional reroll / exploding suffix
    fn parse_factor(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_critical_atom()?;
        while let Some(token) = self.peek_token() {
            if !token.kind.is_postfix_modifier() {
                break;
            }
            self.pos += 1;
            let Node::Dice(dice) = node else {
                return Err(ParseError::ModifierTarget {
                    offset: token.offset,
                });
            };
            node = apply_modifier(dice, &token.kind);
        }
        Ok(node)
    }

    // Level 6: `#e#`, `|a|b|`, `[e]`
    fn parse_critical_atom(&mut self) -> Result<Node, ParseError> {
        let offset = self.offset();
        match self.peek() {
            Some(TokenKind::Hash) => {
                self.pos += 1;
                let inner = self.parse_conditional()?;
                self.expect_close(&TokenKind::Hash, '#', offset)?;
                Ok(Node::CriticalDouble(Box::new(inner)))
            }
            Some(TokenKind::Pipe) => {
                self.pos += 1;
                let normal = self.parse_conditional()?;
                self.expect_close(&TokenKind::Pipe, '|', offset)?;
                let critical = self.parse_conditional()?;
                self.expect_close(&TokenKind::Pipe, '|', offset)?;
                Ok(Node::CriticalSwitch {
                    normal: Box::new(normal),
                    critical: Box::new(critical),
                })
            }
            Some(TokenKind::LeftBracket) => {
                self.pos += 1;
                let inner = self.parse_conditional()?;
                self.expect_close(&TokenKind::RightBracket, '[', offset)?;
                Ok(Node::CriticalOnly(Box::new(inner)))
            }
            _ => self.parse_primary(),
        }
    }

    // Level 7: literals, references, keep lists, groups, function calls
    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let Some(token) = self.next_token() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "a number, dice or '('",
            });
        };
        match &token.kind {
            TokenKind::Number(n) => Ok(Node::number(*n)),
            TokenKind::Dice {
                count,
                sides,
                is_critical,
            } => {
                let id = self
                    .registry
                    .as_mut()
                    .map(|registry| registry.register(*count, *sides, *is_critical));
                Ok(Node::Dice(DiceNode {
                    count: *count,
                    sides: *sides,
                    is_critical: *is_critical,
                    id,
                }))
            }
            TokenKind::DiceRef { id, is_critical } => Ok(Node::dice_ref(*id, *is_critical)),
            TokenKind::Keep { kind, count } => {
                let exprs = self.parse_argument_list(&TokenKind::Semicolon, token.offset)?;
                Ok(Node::keep(*kind, *count, exprs))
            }
            TokenKind::Function(name) => {
                let args = self.parse_argument_list(&TokenKind::Comma, token.offset)?;
                if args.len() != 2 {
                    return Err(ParseError::WrongArity {
                        name: name.to_string(),
                        expected: 2,
                        found: args.len(),
                    });
                }
                Ok(Node::function(*name, args))
            }
            TokenKind::LeftParen => {
                let inner = self.parse_conditional()?;
                self.expect_close(&TokenKind::RightParen, '(', token.offset)?;
                Ok(Node::group(inner))
            }
            kind if kind.is_postfix_modifier() => Err(ParseError::ModifierTarget {
                offset: token.offset,
            }),
            kind => Err(ParseError::UnexpectedToken {
                expected: "a number, dice or '('",
                found: kind.to_string(),
                offset: token.offset,
            }),
        }
    }

    // `( e sep e sep ... )`
    fn parse_argument_list(&mut self, separator: &TokenKind, owner_offset: usize) -> Result<Vec<Node>, ParseError> {
        if !self.eat(&TokenKind::LeftParen) {
            return Err(self.unexpected("'('"));
        }
        let mut items = vec![self.parse_conditional()?];
        while self.eat(separator) {
            items.push(self.parse_conditional()?);
        }
        self.expect_close(&TokenKind::RightParen, '(', owner_offset)?;
        Ok(items)
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.peek_token() {
            Some(token) => ParseError::UnexpectedToken {
                expected,
                found: token.kind.to_string(),
                offset: token.offset,
            },
            None => ParseError::UnexpectedEnd { expected },
        }
    }
}

// ==========================================
// Postfix modifiers
// ==========================================

fn apply_modifier(dice: DiceNode, modifier: &TokenKind) -> Node {
    let sides = dice.sides;
    match modifier {
        TokenKind::Reroll(spec) => Node::Reroll(RerollNode {
            dice,
            range: FaceRange::new(spec.min, spec.max.unwrap_or(spec.min)),
            limit: spec.limit.unwrap_or(DEFAULT_REROLL_LIMIT),
        }),
        TokenKind::SuccessExplode(spec) => Node::Exploding(ExplodingNode {
            dice,
            success: Some(FaceRange::up_to(spec.success_min, spec.success_max, sides)),
            explode: spec
                .explode
                .map(|(min, max)| FaceRange::up_to(min, max, sides)),
            limit: spec.limit.unwrap_or(DEFAULT_EXPLODE_LIMIT),
            kind: ExplodeKind::Count,
        }),
        TokenKind::SumExplode(spec) => Node::Exploding(ExplodingNode {
            dice,
            success: None,
            explode: Some(FaceRange::up_to(spec.min, spec.max, sides)),
            limit: spec.limit.unwrap_or(DEFAULT_EXPLODE_LIMIT),
            kind: ExplodeKind::Sum,
        }),
        _ => Node::Dice(dice),
    }
}

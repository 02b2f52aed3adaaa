use super::token::FaceRange;
use std::fmt;

// ==========================================
// AST data structures
// ==========================================

/// Default number of rerolls granted by `rX` when no `eZ` is given.
pub const DEFAULT_REROLL_LIMIT: u32 = 1;
/// Default number of explosions per die for `sX...` and `eX...`.
pub const DEFAULT_EXPLODE_LIMIT: u32 = 5;

// Operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
}

impl CompareOp {
    pub fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Greater => lhs > rhs,
            CompareOp::GreaterEqual => lhs >= rhs,
            CompareOp::Less => lhs < rhs,
            CompareOp::LessEqual => lhs <= rhs,
            CompareOp::Equal => lhs == rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplodeKind {
    Count, // number of successes, `sX...`
    Sum,   // running total, `eX...`
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    Min,
    Max,
    MinEach,
    MaxEach,
}

impl FunctionName {
    pub fn is_per_die(&self) -> bool {
        matches!(self, FunctionName::MinEach | FunctionName::MaxEach)
    }
}

/// Identifier of a dice literal in reuse mode, 1-based in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiceId(pub u32);

impl DiceId {
    pub fn to_index(&self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }
}

// Dice
#[derive(Debug, Clone, PartialEq)]
pub struct DiceNode {
    pub count: u32,
    pub sides: u32,
    pub is_critical: bool,
    pub id: Option<DiceId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiceRefNode {
    pub id: DiceId,
    pub is_critical: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepNode {
    pub count: u32,
    pub kind: KeepKind,
    pub exprs: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerollNode {
    pub dice: DiceNode,
    pub range: FaceRange,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplodingNode {
    pub dice: DiceNode,
    pub success: Option<FaceRange>, // only for `ExplodeKind::Count`
    pub explode: Option<FaceRange>,
    pub limit: u32,
    pub kind: ExplodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub left: Box<Node>,
    pub op: CompareOp,
    pub right: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub condition: Box<Node>,
    pub if_true: Box<Node>,
    pub if_false: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub lhs: Box<Node>,
    pub op: BinOp,
    pub rhs: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: FunctionName,
    pub args: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Dice(DiceNode),
    DiceRef(DiceRefNode),
    Keep(KeepNode),
    Reroll(RerollNode),
    Exploding(ExplodingNode),
    Comparison(Comparison),
    Conditional(Conditional),
    Binary(BinaryOp),
    CriticalDouble(Box<Node>),
    CriticalSwitch { normal: Box<Node>, critical: Box<Node> },
    CriticalOnly(Box<Node>),
    Function(FunctionCall),
    Group(Box<Node>),
}

impl Node {
    pub fn number(value: f64) -> Self {
        Node::Number(value)
    }

    pub fn dice(count: u32, sides: u32) -> Self {
        Node::Dice(DiceNode {
            count,
            sides,
            is_critical: false,
            id: None,
        })
    }

    pub fn critical_dice(count: u32, sides: u32) -> Self {
        Node::Dice(DiceNode {
            count,
            sides,
            is_critical: true,
            id: None,
        })
    }

    pub fn dice_ref(id: u32, is_critical: bool) -> Self {
        Node::DiceRef(DiceRefNode {
            id: DiceId(id),
            is_critical,
        })
    }

    pub fn keep(kind: KeepKind, count: u32, exprs: Vec<Node>) -> Self {
        Node::Keep(KeepNode { count, kind, exprs })
    }

    pub fn binary(lhs: Node, op: BinOp, rhs: Node) -> Self {
        Node::Binary(BinaryOp {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        })
    }

    pub fn comparison(left: Node, op: CompareOp, right: Node) -> Self {
        Node::Comparison(Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    pub fn conditional(condition: Node, if_true: Node, if_false: Node) -> Self {
        Node::Conditional(Conditional {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    pub fn function(name: FunctionName, args: Vec<Node>) -> Self {
        Node::Function(FunctionCall { name, args })
    }

    pub fn group(inner: Node) -> Self {
        Node::Group(Box::new(inner))
    }

    /// Skips any number of enclosing parentheses.
    pub fn strip_groups(&self) -> &Node {
        let mut node = self;
        while let Node::Group(inner) = node {
            node = inner;
        }
        node
    }

    pub fn as_comparison(&self) -> Option<&Comparison> {
        match self.strip_groups() {
            Node::Comparison(cmp) => Some(cmp),
            _ => None,
        }
    }

    /// Direct children, in source order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Number(_) | Node::Dice(_) | Node::DiceRef(_) => Vec::new(),
            Node::Reroll(_) | Node::Exploding(_) => Vec::new(),
            Node::Keep(keep) => keep.exprs.iter().collect(),
            Node::Comparison(cmp) => vec![cmp.left.as_ref(), cmp.right.as_ref()],
            Node::Conditional(cond) => vec![
                cond.condition.as_ref(),
                cond.if_true.as_ref(),
                cond.if_false.as_ref(),
            ],
            Node::Binary(bin) => vec![bin.lhs.as_ref(), bin.rhs.as_ref()],
            Node::CriticalDouble(inner) | Node::CriticalOnly(inner) | Node::Group(inner) => {
                vec![inner.as_ref()]
            }
            Node::CriticalSwitch { normal, critical } => vec![normal.as_ref(), critical.as_ref()],
            Node::Function(call) => call.args.iter().collect(),
        }
    }

    /// The dice literal a node rolls, looking through reroll and exploding modifiers.
    pub fn dice_literal(&self) -> Option<&DiceNode> {
        match self {
            Node::Dice(dice) => Some(dice),
            Node::Reroll(reroll) => Some(&reroll.dice),
            Node::Exploding(exploding) => Some(&exploding.dice),
            _ => None,
        }
    }

    /// Id of the dice group this node rolls as a whole: a dice literal, a
    /// rerolled or exploding literal, or a keep over a single such literal.
    pub fn defining_id(&self) -> Option<DiceId> {
        match self {
            Node::Keep(keep) if keep.exprs.len() == 1 => {
                keep.exprs[0].dice_literal().and_then(|dice| dice.id)
            }
            other => other.dice_literal().and_then(|dice| dice.id),
        }
    }

    pub fn contains_critical_wrapper(&self) -> bool {
        match self {
            Node::CriticalDouble(_) | Node::CriticalSwitch { .. } | Node::CriticalOnly(_) => true,
            other => other
                .children()
                .into_iter()
                .any(|child| child.contains_critical_wrapper()),
        }
    }

    /// Whether any dice literal below this node is marked `D`.
    pub fn contains_critical_dice(&self) -> bool {
        match self.dice_literal() {
            Some(dice) => dice.is_critical,
            None => self
                .children()
                .into_iter()
                .any(|child| child.contains_critical_dice()),
        }
    }
}

// ==========================================
// Dice registry
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredDice {
    pub count: u32,
    pub sides: u32,
    pub is_critical: bool,
}

/// Dice literals by id, filled by the parser only when a formula references dice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiceRegistry {
    entries: Vec<RegisteredDice>,
}

impl DiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, count: u32, sides: u32, is_critical: bool) -> DiceId {
        self.entries.push(RegisteredDice {
            count,
            sides,
            is_critical,
        });
        DiceId(self.entries.len() as u32)
    }

    pub fn get(&self, id: DiceId) -> Option<&RegisteredDice> {
        id.to_index().and_then(|idx| self.entries.get(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiceId, &RegisteredDice)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (DiceId(idx as u32 + 1), entry))
    }
}

// ==========================================
// Rendering back to formula text
// ==========================================

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Equal => "=",
        };
        f.write_str(symbol)
    }
}

impl fmt::Display for KeepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepKind::High => f.write_str("kh"),
            KeepKind::Low => f.write_str("kl"),
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionName::Min => "min",
            FunctionName::Max => "max",
            FunctionName::MinEach => "min_each",
            FunctionName::MaxEach => "max_each",
        };
        f.write_str(name)
    }
}

impl fmt::Display for DiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = if self.is_critical { 'D' } else { 'd' };
        if self.count == 1 {
            write!(f, "{}{}", letter, self.sides)
        } else {
            write!(f, "{}{}{}", self.count, letter, self.sides)
        }
    }
}

impl fmt::Display for DiceRefNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", if self.is_critical { 'D' } else { 'd' }, self.id.0)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.left, self.op, self.right)
    }
}

// Optional upper bound of a range, omitted when it equals the implied default.
fn write_range_tail(f: &mut fmt::Formatter<'_>, range: &FaceRange, implied_max: u32) -> fmt::Result {
    if range.max != implied_max {
        write!(f, "~{}", range.max)?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "{}", n),
            Node::Dice(dice) => write!(f, "{}", dice),
            Node::DiceRef(reference) => write!(f, "{}", reference),
            Node::Keep(keep) => {
                write!(f, "{}", keep.kind)?;
                if keep.count != 1 {
                    write!(f, "{}", keep.count)?;
                }
                f.write_str("(")?;
                for (i, expr) in keep.exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    write!(f, "{}", expr)?;
                }
                f.write_str(")")
            }
            Node::Reroll(reroll) => {
                write!(f, "{}r{}", reroll.dice, reroll.range.min)?;
                write_range_tail(f, &reroll.range, reroll.range.min)?;
                if reroll.limit != DEFAULT_REROLL_LIMIT {
                    write!(f, "e{}", reroll.limit)?;
                }
                Ok(())
            }
            Node::Exploding(exploding) => {
                let sides = exploding.dice.sides;
                write!(f, "{}", exploding.dice)?;
                match exploding.kind {
                    ExplodeKind::Count => {
                        if let Some(success) = &exploding.success {
                            write!(f, "s{}", success.min)?;
                            write_range_tail(f, success, sides)?;
                        }
                        if let Some(explode) = &exploding.explode {
                            write!(f, "x{}", explode.min)?;
                            write_range_tail(f, explode, sides)?;
                        }
                    }
                    ExplodeKind::Sum => {
                        if let Some(explode) = &exploding.explode {
                            write!(f, "e{}", explode.min)?;
                            write_range_tail(f, explode, sides)?;
                        }
                    }
                }
                if exploding.limit != DEFAULT_EXPLODE_LIMIT {
                    write!(f, "l{}", exploding.limit)?;
                }
                Ok(())
            }
            Node::Comparison(cmp) => write!(f, "{}", cmp),
            Node::Conditional(cond) => {
                write!(f, "{}?{}:{}", cond.condition, cond.if_true, cond.if_false)
            }
            Node::Binary(bin) => write!(f, "{}{}{}", bin.lhs, bin.op, bin.rhs),
            Node::CriticalDouble(inner) => write!(f, "#{}#", inner),
            Node::CriticalSwitch { normal, critical } => write!(f, "|{}|{}|", normal, critical),
            Node::CriticalOnly(inner) => write!(f, "[{}]", inner),
            Node::Function(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Node::Group(inner) => write!(f, "({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_conditional_with_critical_wrappers() {
        let node = Node::conditional(
            Node::comparison(
                Node::binary(Node::critical_dice(1, 20), BinOp::Add, Node::number(5.0)),
                CompareOp::GreaterEqual,
                Node::number(15.0),
            ),
            Node::CriticalDouble(Box::new(Node::dice(2, 6))),
            Node::number(0.0),
        );
        assert_eq!(node.to_string(), "D20+5>=15?#2d6#:0");
    }

    #[test]
    fn renders_keep_and_functions() {
        let keep = Node::keep(KeepKind::Low, 2, vec![Node::dice(1, 20), Node::dice(1, 8)]);
        assert_eq!(keep.to_string(), "kl2(d20;d8)");
        let call = Node::function(FunctionName::MaxEach, vec![Node::dice(3, 6), Node::number(2.0)]);
        assert_eq!(call.to_string(), "max_each(3d6,2)");
    }

    #[test]
    fn registry_ids_are_one_based() {
        let mut registry = DiceRegistry::new();
        let first = registry.register(2, 6, false);
        let second = registry.register(1, 20, true);
        assert_eq!(first, DiceId(1));
        assert_eq!(second, DiceId(2));
        assert_eq!(registry.get(DiceId(2)).map(|d| d.sides), Some(20));
        assert!(registry.get(DiceId(0)).is_none());
        assert!(registry.get(DiceId(3)).is_none());
    }

    #[test]
    fn strip_groups_looks_through_parentheses() {
        let node = Node::group(Node::group(Node::comparison(
            Node::dice(1, 20),
            CompareOp::Greater,
            Node::number(10.0),
        )));
        assert!(node.as_comparison().is_some());
        assert!(Node::dice(1, 6).as_comparison().is_none());
    }
}

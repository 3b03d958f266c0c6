//! AST for compiled bytebeat expressions.

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `~x` (bitwise not, through ToInt32 coercion)
    BitNot,
    /// `!x` (logical not, yields 0.0 or 1.0)
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<` (ToInt32 coercion)
    Shl,
    /// `>>` sign-propagating (ToInt32 coercion)
    Shr,
    /// `>>>` zero-fill (ToUint32 coercion)
    UShr,
    /// `&` (ToInt32 coercion)
    BitAnd,
    /// `|` (ToInt32 coercion)
    BitOr,
    /// `^` (ToInt32 coercion)
    BitXor,
    /// `==`, yields 0.0 or 1.0
    Eq,
    /// `!=`, yields 0.0 or 1.0
    Ne,
    /// `<`, yields 0.0 or 1.0
    Lt,
    /// `<=`, yields 0.0 or 1.0
    Le,
    /// `>`, yields 0.0 or 1.0
    Gt,
    /// `>=`, yields 0.0 or 1.0
    Ge,
    /// `&&` short-circuit, yields an operand value
    And,
    /// `||` short-circuit, yields an operand value
    Or,
}

/// Builtin functions callable from expressions.
///
/// Arity is fixed and checked at compile time. `Random` is the one
/// intentionally non-deterministic primitive; everything else is a pure
/// function of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // names mirror their source-level spelling
pub enum Builtin {
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Exp,
    Log,
    Min,
    Max,
    Pow,
    Sign,
    Int,
    Random,
}

impl Builtin {
    /// Look up a builtin by its source-level name.
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "round" => Builtin::Round,
            "abs" => Builtin::Abs,
            "sqrt" => Builtin::Sqrt,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "pow" => Builtin::Pow,
            "sign" => Builtin::Sign,
            "int" => Builtin::Int,
            "random" => Builtin::Random,
            _ => return None,
        })
    }

    /// Number of arguments the builtin expects.
    pub fn arity(self) -> usize {
        match self {
            Builtin::Min | Builtin::Max | Builtin::Pow => 2,
            Builtin::Random => 0,
            _ => 1,
        }
    }

    /// Source-level name, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Abs => "abs",
            Builtin::Sqrt => "sqrt",
            Builtin::Exp => "exp",
            Builtin::Log => "log",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Pow => "pow",
            Builtin::Sign => "sign",
            Builtin::Int => "int",
            Builtin::Random => "random",
        }
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// The time variable `t`
    Time,
    /// Unary operation
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Ternary conditional `cond ? a : b`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Builtin function call
    Call(Builtin, Vec<Expr>),
}

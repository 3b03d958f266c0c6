//! Fuel-bounded evaluator for compiled bytebeat expressions.
//!
//! Arithmetic runs in `f64`; bitwise and shift operators coerce their
//! operands through JS-style `ToInt32`/`ToUint32` wrapping so that the
//! classic `t*(t>>8&t>>13)` family of expressions behaves as authored.
//! Every evaluation is charged against a fuel budget; exhausting it is
//! the interpreter's runtime failure mode and is reported per call
//! instead of aborting the stream.

use super::ast::{BinaryOp, Builtin, Expr, UnaryOp};
use super::EvalError;

/// Default per-call operation budget. Generous for real expressions
/// (a few hundred nodes deep at most) while bounding hostile ones.
pub const DEFAULT_FUEL_BUDGET: u64 = 100_000;

const TWO_POW_32: f64 = 4_294_967_296.0;

/// Mutable evaluation state carried across samples: the fuel meter and
/// the RNG backing `random()`.
#[derive(Debug)]
pub struct EvalState {
    fuel_budget: u64,
    fuel: u64,
    rng: u64,
}

impl EvalState {
    /// Fresh state with the given per-call fuel budget.
    pub fn new(fuel_budget: u64) -> Self {
        // Seed from the clock; expressions using random() are
        // intentionally non-deterministic (the render signature
        // fingerprints configuration, not output bytes).
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        EvalState {
            fuel_budget,
            fuel: 0,
            rng: seed | 1,
        }
    }

    /// Replace the per-call fuel budget.
    pub fn set_fuel_budget(&mut self, budget: u64) {
        self.fuel_budget = budget;
    }

    fn charge(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::BudgetExhausted {
                budget: self.fuel_budget,
            });
        }
        self.fuel -= 1;
        Ok(())
    }

    /// xorshift64*, uniform in [0, 1).
    fn next_random(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for EvalState {
    fn default() -> Self {
        EvalState::new(DEFAULT_FUEL_BUDGET)
    }
}

/// Evaluate an expression at sample index `t`.
///
/// The walk borrows the AST and allocates nothing; per-sample cost is
/// proportional to the node count.
pub fn eval(expr: &Expr, t: f64, state: &mut EvalState) -> Result<f64, EvalError> {
    state.fuel = state.fuel_budget;
    eval_node(expr, t, state)
}

fn eval_node(expr: &Expr, t: f64, state: &mut EvalState) -> Result<f64, EvalError> {
    state.charge()?;
    let value = match expr {
        Expr::Number(n) => *n,
        Expr::Time => t,
        Expr::Unary(op, inner) => {
            let v = eval_node(inner, t, state)?;
            match op {
                UnaryOp::Neg => -v,
                UnaryOp::BitNot => !to_i32(v) as f64,
                UnaryOp::Not => bool_to_f64(!is_truthy(v)),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit forms evaluate the right side lazily.
            match op {
                BinaryOp::And => {
                    let l = eval_node(lhs, t, state)?;
                    if !is_truthy(l) {
                        return Ok(l);
                    }
                    return eval_node(rhs, t, state);
                }
                BinaryOp::Or => {
                    let l = eval_node(lhs, t, state)?;
                    if is_truthy(l) {
                        return Ok(l);
                    }
                    return eval_node(rhs, t, state);
                }
                _ => {}
            }

            let l = eval_node(lhs, t, state)?;
            let r = eval_node(rhs, t, state)?;
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Rem => l % r,
                BinaryOp::Shl => (to_i32(l).wrapping_shl(shift_amount(r))) as f64,
                BinaryOp::Shr => (to_i32(l).wrapping_shr(shift_amount(r))) as f64,
                BinaryOp::UShr => (to_u32(l).wrapping_shr(shift_amount(r))) as f64,
                BinaryOp::BitAnd => (to_i32(l) & to_i32(r)) as f64,
                BinaryOp::BitOr => (to_i32(l) | to_i32(r)) as f64,
                BinaryOp::BitXor => (to_i32(l) ^ to_i32(r)) as f64,
                BinaryOp::Eq => bool_to_f64(l == r),
                BinaryOp::Ne => bool_to_f64(l != r),
                BinaryOp::Lt => bool_to_f64(l < r),
                BinaryOp::Le => bool_to_f64(l <= r),
                BinaryOp::Gt => bool_to_f64(l > r),
                BinaryOp::Ge => bool_to_f64(l >= r),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
        Expr::Ternary(cond, then, alt) => {
            let c = eval_node(cond, t, state)?;
            if is_truthy(c) {
                eval_node(then, t, state)?
            } else {
                eval_node(alt, t, state)?
            }
        }
        Expr::Call(builtin, args) => match builtin {
            Builtin::Random => state.next_random(),
            Builtin::Min | Builtin::Max | Builtin::Pow => {
                let a = eval_node(&args[0], t, state)?;
                let b = eval_node(&args[1], t, state)?;
                match builtin {
                    Builtin::Min => a.min(b),
                    Builtin::Max => a.max(b),
                    Builtin::Pow => a.powf(b),
                    _ => unreachable!(),
                }
            }
            _ => {
                let a = eval_node(&args[0], t, state)?;
                match builtin {
                    Builtin::Sin => a.sin(),
                    Builtin::Cos => a.cos(),
                    Builtin::Tan => a.tan(),
                    Builtin::Floor => a.floor(),
                    Builtin::Ceil => a.ceil(),
                    Builtin::Round => a.round(),
                    Builtin::Abs => a.abs(),
                    Builtin::Sqrt => a.sqrt(),
                    Builtin::Exp => a.exp(),
                    Builtin::Log => a.ln(),
                    Builtin::Sign => {
                        if a.is_nan() || a == 0.0 {
                            a
                        } else {
                            a.signum()
                        }
                    }
                    Builtin::Int => a.trunc(),
                    _ => unreachable!(),
                }
            }
        },
    };
    Ok(value)
}

fn is_truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// JS ToUint32: truncate toward zero, wrap modulo 2^32. NaN/Inf map to 0.
fn to_u32(v: f64) -> u32 {
    if !v.is_finite() || v == 0.0 {
        return 0;
    }
    v.trunc().rem_euclid(TWO_POW_32) as u32
}

/// JS ToInt32: same wrap, reinterpreted as signed.
fn to_i32(v: f64) -> i32 {
    to_u32(v) as i32
}

fn shift_amount(v: f64) -> u32 {
    to_u32(v) & 31
}

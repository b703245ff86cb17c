//! Expression parsing and code emission: operator-precedence climbing over
//! the 14 C-like levels, lvalue loading, implicit promotions, swizzles and
//! swizzled stores.
use anyhow::bail;
use spirv::Op;

use crate::error::Result;
use crate::instr::InstructionBuilder;
use crate::line::Loc;
use crate::sym::{VariableScope, VariableStack};
use crate::token::{Literal, Token, TokenKind};
use crate::ty::Type;

use super::Compiler;

/// The currency of the expression evaluator: a typed id plus how it may be
/// used. A `Pointer` needs an `OpLoad` before its value participates in
/// arithmetic; a `Constant` keeps composite construction foldable.
#[derive(Debug, Clone)]
pub struct Operand {
    pub ty: Type,
    pub id: u32,
    pub kind: OperandKind,
    /// Component indices recorded by a swizzle selector, empty otherwise.
    pub swizzle: Vec<u32>,
    /// Writable iff all swizzle lanes are distinct.
    pub swizzle_writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandKind {
    Pointer { scope: VariableScope, is_const: bool },
    Rvalue,
    Constant,
}

impl Operand {
    pub fn rvalue(ty: Type, id: u32) -> Self {
        Operand {
            ty,
            id,
            kind: OperandKind::Rvalue,
            swizzle: Vec::new(),
            swizzle_writable: false,
        }
    }

    pub fn constant(ty: Type, id: u32) -> Self {
        Operand {
            ty,
            id,
            kind: OperandKind::Constant,
            swizzle: Vec::new(),
            swizzle_writable: false,
        }
    }

    pub fn pointer(ty: Type, id: u32, scope: VariableScope, is_const: bool) -> Self {
        Operand {
            ty,
            id,
            kind: OperandKind::Pointer { scope, is_const },
            swizzle: Vec::new(),
            swizzle_writable: false,
        }
    }

    /// The type the operand has once its swizzle is applied.
    pub fn effective_ty(&self) -> Type {
        match self.swizzle.len() {
            0 => self.ty.clone(),
            1 => self.ty.component().clone(),
            n => Type::vector(self.ty.component().clone(), n as u8),
        }
    }
}

/// Binding power of a binary operator; levels 3 through 12 of the C table.
fn binary_prec(kind: TokenKind) -> Option<u8> {
    let p = match kind {
        TokenKind::Mul | TokenKind::Div => 10,
        TokenKind::Add | TokenKind::Sub => 9,
        TokenKind::Shl | TokenKind::Shr => 8,
        TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => 7,
        TokenKind::EqEq | TokenKind::Ne => 6,
        TokenKind::BitAnd => 5,
        TokenKind::BitXor => 4,
        TokenKind::BitOr => 3,
        TokenKind::LogicalAnd => 2,
        TokenKind::LogicalOr => 1,
        _ => return None,
    };
    Some(p)
}

fn is_assign_op(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Assign
            | TokenKind::AddAssign
            | TokenKind::SubAssign
            | TokenKind::MulAssign
            | TokenKind::DivAssign
    )
}

impl<'a> Compiler<'a> {
    /// Parse one full expression. Post-increment stores queued inside it
    /// are flushed to the instruction stream when it ends.
    pub(crate) fn parse_expression(&mut self, stack: &mut VariableStack) -> Result<Operand> {
        let mark = self.deferred.len();
        let result = self.parse_assign(stack);
        while self.deferred.len() > mark {
            let inst = self.deferred.remove(mark);
            self.module.functions.push(inst);
        }
        result
    }

    /// Level 14: `=` and the compound assignments, right-associative.
    fn parse_assign(&mut self, stack: &mut VariableStack) -> Result<Operand> {
        let lhs = self.parse_binary(1, stack)?;
        match self.peek_kind() {
            Some(kind) if is_assign_op(kind) => {
                let tok = self.advance()?;
                let rhs = self.parse_assign(stack)?;
                self.store_into(&lhs, kind, rhs, &tok.loc)
            }
            Some(TokenKind::Question) => {
                let tok = self.advance()?;
                bail!("{}: the ternary operator is not supported", tok.loc)
            }
            _ => Ok(lhs),
        }
    }

    fn parse_binary(&mut self, min_prec: u8, stack: &mut VariableStack) -> Result<Operand> {
        let mut lhs = self.parse_unary(stack)?;
        while let Some(prec) = self.peek_kind().and_then(binary_prec) {
            if prec < min_prec {
                break;
            }
            let tok = self.advance()?;
            let rhs = self.parse_binary(prec + 1, stack)?;
            lhs = self.apply_binary(tok.kind, lhs, rhs, &tok.loc)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, stack: &mut VariableStack) -> Result<Operand> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => bail!("expression ends abruptly"),
        };
        match tok.kind {
            TokenKind::Increment | TokenKind::Decrement => {
                self.advance()?;
                let operand = self.parse_unary(stack)?;
                self.pre_incdec(tok.kind == TokenKind::Increment, operand, &tok.loc)
            }
            TokenKind::Negate | TokenKind::Sub => {
                self.advance()?;
                let operand = self.parse_unary(stack)?;
                self.negate(operand, &tok.loc)
            }
            TokenKind::LogicalNot => {
                self.advance()?;
                let operand = self.parse_unary(stack)?;
                self.logical_not(operand, &tok.loc)
            }
            TokenKind::BitNot => {
                self.advance()?;
                let operand = self.parse_unary(stack)?;
                self.bit_not(operand, &tok.loc)
            }
            TokenKind::ParenOpen => {
                if self.cast_ahead() {
                    self.advance()?;
                    let ty_tok = self.advance()?;
                    let cast_ty = match ty_tok.kind {
                        TokenKind::TypeInt { bits, signed } => Type::Int { bits, signed },
                        TokenKind::TypeFloat { bits } => Type::Float { bits },
                        _ => bail!(
                            "{}: cast type must be a scalar integer or float",
                            ty_tok.loc
                        ),
                    };
                    self.expect(TokenKind::ParenClose, "\")\"")?;
                    let operand = self.parse_unary(stack)?;
                    return self.explicit_cast(cast_ty, operand, &tok.loc);
                }
                self.advance()?;
                let inner = self.parse_assign(stack)?;
                self.expect(TokenKind::ParenClose, "\")\"")?;
                Ok(inner)
            }
            _ => {
                let primary = self.parse_primary(stack)?;
                self.parse_postfix(primary, &tok.loc)
            }
        }
    }

    /// `(int32)`-style cast ahead of the cursor?
    fn cast_ahead(&self) -> bool {
        matches!(
            self.nth_kind(1),
            Some(TokenKind::TypeInt { .. }) | Some(TokenKind::TypeFloat { .. })
        ) && self.nth_kind(2) == Some(TokenKind::ParenClose)
    }

    fn parse_primary(&mut self, stack: &mut VariableStack) -> Result<Operand> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => bail!("expression ends abruptly"),
        };
        if tok.kind.starts_type() {
            let ty = self.parse_type()?;
            return self.parse_constructor(ty, &tok.loc, stack);
        }
        match tok.kind {
            TokenKind::Value(lit) => {
                self.advance()?;
                let operand = match lit {
                    Literal::Int { value, signed } => {
                        let ty = Type::Int { bits: 32, signed };
                        let id = self.module.constant(&ty, &[value as u32]);
                        Operand::constant(ty, id)
                    }
                    Literal::Float(value) => {
                        let ty = Type::float(self.opts.default_fp_bits());
                        let id = self.module.scalar(&ty, 0, value);
                        Operand::constant(ty, id)
                    }
                };
                Ok(operand)
            }
            TokenKind::Name if tok.lexeme == "true" || tok.lexeme == "false" => {
                self.advance()?;
                let id = self.module.constant_bool(tok.lexeme == "true");
                Ok(Operand::constant(Type::Bool, id))
            }
            TokenKind::Name if self.nth_kind(1) == Some(TokenKind::ParenOpen) => {
                self.advance()?;
                self.parse_call(tok, stack)
            }
            TokenKind::Name => {
                self.advance()?;
                self.parse_name(tok, stack)
            }
            _ => bail!(
                "{}: unexpected symbol \"{}\" expected an expression",
                tok.loc,
                tok.lexeme
            ),
        }
    }

    /// Postfix `++`/`--`: yields the old value; the store is deferred to
    /// the end of the enclosing expression.
    fn parse_postfix(&mut self, operand: Operand, loc: &Loc) -> Result<Operand> {
        let mut current = operand;
        while let Some(kind) = self.peek_kind() {
            if kind != TokenKind::Increment && kind != TokenKind::Decrement {
                break;
            }
            self.advance()?;
            let inc = kind == TokenKind::Increment;
            self.check_incdec_target(&current, loc)?;
            let (ty, old) = self.load(&current)?;
            let new = self.emit_incdec(&ty, old, inc);
            let store = InstructionBuilder::new(Op::Store)
                .push(current.id)
                .push(new)
                .build();
            self.deferred.push(store);
            current = Operand::rvalue(ty, old);
        }
        Ok(current)
    }

    fn check_incdec_target(&self, operand: &Operand, loc: &Loc) -> Result<()> {
        match operand.kind {
            OperandKind::Pointer { is_const: false, .. } => {}
            OperandKind::Pointer { is_const: true, .. } => {
                bail!("{}: operand must be a modifiable value", loc)
            }
            _ => bail!("{}: operand must be an lvalue", loc),
        }
        if !operand.swizzle.is_empty() || !operand.ty.is_scalar() {
            bail!("{}: operand must be an integer or float scalar", loc);
        }
        Ok(())
    }

    fn emit_incdec(&mut self, ty: &Type, id: u32, inc: bool) -> u32 {
        let (op, int_value, float_value) = if inc {
            (Op::IAdd, 1u64, 1.0f64)
        } else {
            (Op::IAdd, u64::MAX, -1.0f64)
        };
        let one = self.module.scalar(ty, int_value, float_value);
        let op = match ty {
            Type::Float { .. } => Op::FAdd,
            _ => op,
        };
        self.result_op(op, ty, &[id, one])
    }

    fn pre_incdec(&mut self, inc: bool, operand: Operand, loc: &Loc) -> Result<Operand> {
        self.check_incdec_target(&operand, loc)?;
        let (ty, old) = self.load(&operand)?;
        let new = self.emit_incdec(&ty, old, inc);
        self.void_op(Op::Store, &[operand.id, new]);
        // Reading the operand again observes the new value.
        Ok(operand)
    }

    fn negate(&mut self, operand: Operand, loc: &Loc) -> Result<Operand> {
        let (ty, id) = self.load(&operand)?;
        if !ty.is_scalar() && !ty.is_vector() {
            bail!(
                "{}: operand must be a scalar or vector of type integer or float",
                loc
            );
        }
        let result_ty = match ty.component() {
            // Negating an unsigned operand flips it to the signed type.
            Type::Int {
                bits,
                signed: false,
            } => match &ty {
                Type::Vector { rows, .. } => Type::vector(Type::int(*bits), *rows),
                _ => Type::int(*bits),
            },
            _ => ty.clone(),
        };
        let op = match result_ty.component() {
            Type::Int { .. } => Op::SNegate,
            Type::Float { .. } => Op::FNegate,
            _ => bail!(
                "{}: operand must be a scalar or vector of type integer or float",
                loc
            ),
        };
        let id = self.result_op(op, &result_ty, &[id]);
        Ok(Operand::rvalue(result_ty, id))
    }

    /// `!x`: logical negation; ints and floats test equal to zero.
    fn logical_not(&mut self, operand: Operand, loc: &Loc) -> Result<Operand> {
        let (ty, id) = self.load(&operand)?;
        let result = match ty {
            Type::Bool => self.result_op(Op::LogicalNot, &Type::Bool, &[id]),
            Type::Int { .. } => {
                let zero = self.module.zero(&ty);
                self.result_op(Op::IEqual, &Type::Bool, &[id, zero])
            }
            Type::Float { .. } => {
                let zero = self.module.zero(&ty);
                self.result_op(Op::FOrdEqual, &Type::Bool, &[id, zero])
            }
            _ => bail!(
                "{}: operand must be a scalar of type bool, integer or float",
                loc
            ),
        };
        Ok(Operand::rvalue(Type::Bool, result))
    }

    fn bit_not(&mut self, operand: Operand, loc: &Loc) -> Result<Operand> {
        let (ty, id) = self.load(&operand)?;
        if !matches!(ty.component(), Type::Int { .. }) || ty.is_matrix() {
            bail!("{}: operand must be a scalar or vector of type integer", loc);
        }
        let id = self.result_op(Op::Not, &ty, &[id]);
        Ok(Operand::rvalue(ty, id))
    }

    // ---- loads and conversions -------------------------------------------

    /// Load the operand's base value: an `OpLoad` for pointers, a no-op for
    /// values and constants. The swizzle is not applied.
    pub(crate) fn load_base(&mut self, operand: &Operand) -> (Type, u32) {
        match operand.kind {
            OperandKind::Pointer { .. } => {
                let id = self.result_op(Op::Load, &operand.ty, &[operand.id]);
                (operand.ty.clone(), id)
            }
            _ => (operand.ty.clone(), operand.id),
        }
    }

    /// Load the operand's value with its swizzle applied: one lane becomes
    /// a `CompositeExtract`, several become a self-`VectorShuffle`.
    pub(crate) fn load(&mut self, operand: &Operand) -> Result<(Type, u32)> {
        let (ty, id) = self.load_base(operand);
        if operand.swizzle.is_empty() {
            return Ok((ty, id));
        }
        let component = ty.component().clone();
        if operand.swizzle.len() == 1 {
            let id = self.result_op(Op::CompositeExtract, &component, &[id, operand.swizzle[0]]);
            Ok((component, id))
        } else {
            let vty = Type::vector(component, operand.swizzle.len() as u8);
            let mut operands = vec![id, id];
            operands.extend_from_slice(&operand.swizzle);
            let id = self.result_op(Op::VectorShuffle, &vty, &operands);
            Ok((vty, id))
        }
    }

    /// Implicit conversion of `id` from `src` to `dst`, warning on
    /// narrowing and sign mixes; fatal when conversions are disabled or no
    /// conversion exists.
    pub(crate) fn implicit_cast(
        &mut self,
        dst: &Type,
        src: &Type,
        id: u32,
        loc: &Loc,
    ) -> Result<u32> {
        if dst == src {
            return Ok(id);
        }
        if !self.opts.implicit_conversions {
            bail!(
                "{}: type mismatch: expected {}, found {} (implicit conversions are disabled)",
                loc,
                dst,
                src
            );
        }
        let compatible = (dst.is_numeric() && src.is_numeric() && dst.rows() == src.rows()
            && dst.is_vector() == src.is_vector()
            && !dst.is_matrix()
            && !src.is_matrix())
            || (*dst == Type::Bool && src.is_scalar());
        if !compatible {
            bail!("{}: no conversion available from {} to {}", loc, src, dst);
        }
        match (dst.component(), src.component()) {
            (Type::Int { bits: db, .. }, Type::Int { bits: sb, signed }) => {
                if db < sb {
                    self.diags.warning(
                        loc,
                        format!("implicit conversion from {} to {} narrows", src, dst),
                    );
                } else if db != sb {
                    self.diags
                        .warning(loc, format!("implicit conversion from {} to {}", src, dst));
                }
                let dst_signed = matches!(dst.component(), Type::Int { signed: true, .. });
                if *signed != dst_signed {
                    self.diags.warning(loc, "sign mismatch in implicit conversion");
                }
            }
            (Type::Int { .. }, Type::Float { .. }) => {
                self.diags.warning(
                    loc,
                    format!("implicit conversion from {} to {} truncates", src, dst),
                );
            }
            _ => {}
        }
        self.cast(dst, src, id, loc)
    }

    /// The conversion matrix of the code generator: cross-kind converts,
    /// width converts, and zero-compares for casts to bool.
    pub(crate) fn cast(&mut self, dst: &Type, src: &Type, id: u32, loc: &Loc) -> Result<u32> {
        if dst == src {
            return Ok(id);
        }
        let op = match (dst.component(), src.component()) {
            (
                Type::Int {
                    bits: db,
                    signed: ds,
                },
                Type::Int { bits: sb, .. },
            ) => {
                if db == sb {
                    // Sign-only conversions share the OpTypeInt and need no
                    // instruction.
                    return Ok(id);
                }
                match ds {
                    true => Op::SConvert,
                    false => Op::UConvert,
                }
            }
            (Type::Int { signed: true, .. }, Type::Float { .. }) => Op::ConvertFToS,
            (Type::Int { signed: false, .. }, Type::Float { .. }) => Op::ConvertFToU,
            (Type::Float { .. }, Type::Int { signed: true, .. }) => Op::ConvertSToF,
            (Type::Float { .. }, Type::Int { signed: false, .. }) => Op::ConvertUToF,
            (Type::Float { .. }, Type::Float { .. }) => Op::FConvert,
            (Type::Bool, Type::Int { .. }) => {
                let zero = self.module.zero(src);
                return Ok(self.result_op(Op::INotEqual, &Type::Bool, &[id, zero]));
            }
            (Type::Bool, Type::Float { .. }) => {
                let zero = self.module.zero(src);
                return Ok(self.result_op(Op::FOrdNotEqual, &Type::Bool, &[id, zero]));
            }
            _ => bail!("{}: no conversion available from {} to {}", loc, src, dst),
        };
        Ok(self.result_op(op, dst, &[id]))
    }

    fn explicit_cast(&mut self, dst: Type, operand: Operand, loc: &Loc) -> Result<Operand> {
        let (src, id) = self.load(&operand)?;
        if !src.is_scalar() {
            bail!(
                "{}: only scalar integers and floats can be cast",
                loc
            );
        }
        if dst == src {
            self.diags.warning(loc, "unnecessary cast");
            return Ok(Operand::rvalue(src, id));
        }
        let id = self.cast(&dst, &src, id, loc)?;
        Ok(Operand::rvalue(dst, id))
    }

    // ---- binary operators -------------------------------------------------

    fn apply_binary(
        &mut self,
        kind: TokenKind,
        lhs: Operand,
        rhs: Operand,
        loc: &Loc,
    ) -> Result<Operand> {
        let left = self.load(&lhs)?;
        let right = self.load(&rhs)?;
        match kind {
            TokenKind::Mul => self.multiply(left, right, loc),
            TokenKind::Div => self.divide(left, right, loc),
            TokenKind::Add => self.add_sub(true, left, right, loc),
            TokenKind::Sub => self.add_sub(false, left, right, loc),
            TokenKind::Shl | TokenKind::Shr => self.shift(kind, left, right, loc),
            TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => {
                self.relational(kind, left, right, loc)
            }
            TokenKind::EqEq | TokenKind::Ne => self.equality(kind, left, right, loc),
            TokenKind::BitAnd | TokenKind::BitOr | TokenKind::BitXor => {
                self.bitwise(kind, left, right, loc)
            }
            TokenKind::LogicalAnd | TokenKind::LogicalOr => {
                self.logical(kind, left, right, loc)
            }
            _ => unreachable!(),
        }
    }

    /// Usual-arithmetic-conversion style unification of two same-shape
    /// numeric operands: mixed kinds promote integer to float, mixed widths
    /// widen, sign mixes warn.
    fn unify(
        &mut self,
        (lty, lid): (Type, u32),
        (rty, rid): (Type, u32),
        loc: &Loc,
    ) -> Result<(Type, u32, u32)> {
        if lty == rty {
            return Ok((lty, lid, rid));
        }
        if lty.rows() != rty.rows() || lty.is_vector() != rty.is_vector() {
            bail!("{}: operand types {} and {} do not match", loc, lty, rty);
        }
        let target = match (lty.component(), rty.component()) {
            (Type::Float { bits: lb }, Type::Float { bits: rb }) => {
                Type::float(*lb.max(rb))
            }
            (Type::Float { .. }, Type::Int { .. }) => lty.component().clone(),
            (Type::Int { .. }, Type::Float { .. }) => rty.component().clone(),
            (
                Type::Int {
                    bits: lb,
                    signed: ls,
                },
                Type::Int {
                    bits: rb,
                    signed: rs,
                },
            ) => {
                if ls != rs {
                    self.diags.warning(loc, "sign mismatch");
                }
                // The wider side's type wins; equal widths keep the left's.
                if rb > lb {
                    rty.component().clone()
                } else {
                    lty.component().clone()
                }
            }
            _ => bail!("{}: operand types {} and {} do not match", loc, lty, rty),
        };
        let target_ty = if lty.is_vector() {
            Type::vector(target, lty.rows())
        } else {
            target
        };
        let lid = if lty != target_ty {
            self.cast(&target_ty, &lty, lid, loc)?
        } else {
            lid
        };
        let rid = if rty != target_ty {
            self.cast(&target_ty, &rty, rid, loc)?
        } else {
            rid
        };
        Ok((target_ty, lid, rid))
    }

    fn add_sub(
        &mut self,
        add: bool,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        if !left.0.is_numeric() || left.0.is_matrix() || !right.0.is_numeric()
            || right.0.is_matrix()
        {
            bail!(
                "{}: operands must be scalars or vectors of type integer or float",
                loc
            );
        }
        let (ty, lid, rid) = self.unify(left, right, loc)?;
        let op = match (add, ty.component()) {
            (true, Type::Float { .. }) => Op::FAdd,
            (true, _) => Op::IAdd,
            (false, Type::Float { .. }) => Op::FSub,
            (false, _) => Op::ISub,
        };
        let id = self.result_op(op, &ty, &[lid, rid]);
        Ok(Operand::rvalue(ty, id))
    }

    /// `*` selects by shape: matrix and vector products map onto the
    /// dedicated SPIR-V opcodes, everything else is componentwise.
    pub(crate) fn multiply(
        &mut self,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        let (lty, lid) = left;
        let (rty, rid) = right;

        let float_component = |ty: &Type| matches!(ty.component(), Type::Float { .. });

        match (lty.is_matrix(), rty.is_matrix()) {
            (true, true) => {
                if !float_component(&lty) || lty.component() != rty.component()
                    || lty.columns() != rty.rows()
                {
                    bail!("{}: cannot multiply {} by {}", loc, lty, rty);
                }
                let ty = Type::matrix(lty.component().clone(), lty.rows(), rty.columns());
                let id = self.result_op(Op::MatrixTimesMatrix, &ty, &[lid, rid]);
                return Ok(Operand::rvalue(ty, id));
            }
            (true, false) if rty.is_vector() => {
                if !float_component(&lty) || lty.component() != rty.component()
                    || rty.rows() != lty.columns()
                {
                    bail!("{}: cannot multiply {} by {}", loc, lty, rty);
                }
                let ty = Type::vector(lty.component().clone(), lty.rows());
                let id = self.result_op(Op::MatrixTimesVector, &ty, &[lid, rid]);
                return Ok(Operand::rvalue(ty, id));
            }
            (false, true) if lty.is_vector() => {
                if !float_component(&rty) || lty.component() != rty.component()
                    || lty.rows() != rty.rows()
                {
                    bail!("{}: cannot multiply {} by {}", loc, lty, rty);
                }
                let ty = Type::vector(rty.component().clone(), rty.columns());
                let id = self.result_op(Op::VectorTimesMatrix, &ty, &[lid, rid]);
                return Ok(Operand::rvalue(ty, id));
            }
            (true, false) => {
                let sid = self.implicit_cast(lty.component(), &rty, rid, loc)?;
                let id = self.result_op(Op::MatrixTimesScalar, &lty, &[lid, sid]);
                return Ok(Operand::rvalue(lty, id));
            }
            (false, true) => {
                let sid = self.implicit_cast(rty.component(), &lty, lid, loc)?;
                let id = self.result_op(Op::MatrixTimesScalar, &rty, &[rid, sid]);
                return Ok(Operand::rvalue(rty, id));
            }
            (false, false) => {}
        }

        // Vector-scalar products of float components use VectorTimesScalar.
        if lty.is_vector() && rty.is_scalar() && float_component(&lty) {
            let sid = self.implicit_cast(lty.component(), &rty, rid, loc)?;
            let id = self.result_op(Op::VectorTimesScalar, &lty, &[lid, sid]);
            return Ok(Operand::rvalue(lty, id));
        }
        if lty.is_scalar() && rty.is_vector() && float_component(&rty) {
            let sid = self.implicit_cast(rty.component(), &lty, lid, loc)?;
            let id = self.result_op(Op::VectorTimesScalar, &rty, &[rid, sid]);
            return Ok(Operand::rvalue(rty, id));
        }

        if !lty.is_numeric() || !rty.is_numeric() {
            bail!("{}: cannot multiply {} by {}", loc, lty, rty);
        }
        let (ty, lid, rid) = self.unify((lty, lid), (rty, rid), loc)?;
        let op = match ty.component() {
            Type::Float { .. } => Op::FMul,
            _ => Op::IMul,
        };
        let id = self.result_op(op, &ty, &[lid, rid]);
        Ok(Operand::rvalue(ty, id))
    }

    pub(crate) fn divide(
        &mut self,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        if !left.0.is_numeric() || left.0.is_matrix() || !right.0.is_numeric()
            || right.0.is_matrix()
        {
            bail!(
                "{}: operands must be scalars or vectors of type integer or float",
                loc
            );
        }
        let (ty, lid, rid) = self.unify(left, right, loc)?;
        let op = match ty.component() {
            Type::Float { .. } => Op::FDiv,
            Type::Int { signed: true, .. } => Op::SDiv,
            _ => Op::UDiv,
        };
        let id = self.result_op(op, &ty, &[lid, rid]);
        Ok(Operand::rvalue(ty, id))
    }

    fn shift(
        &mut self,
        kind: TokenKind,
        (lty, lid): (Type, u32),
        (rty, rid): (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        if !matches!(lty, Type::Int { .. }) || !matches!(rty, Type::Int { .. }) {
            bail!("{}: shift operands must be integers", loc);
        }
        let rid = if lty.size() != rty.size() {
            self.implicit_cast(&lty, &rty, rid, loc)?
        } else {
            rid
        };
        let op = match kind {
            TokenKind::Shl => Op::ShiftLeftLogical,
            _ => Op::ShiftRightLogical,
        };
        let id = self.result_op(op, &lty, &[lid, rid]);
        Ok(Operand::rvalue(lty, id))
    }

    fn relational(
        &mut self,
        kind: TokenKind,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        if !left.0.is_scalar() || !right.0.is_scalar() {
            bail!("{}: operands must be scalars of type integer or float", loc);
        }
        let (ty, lid, rid) = self.unify(left, right, loc)?;
        let op = match (kind, ty.component()) {
            (TokenKind::Lt, Type::Float { .. }) => Op::FOrdLessThan,
            (TokenKind::Le, Type::Float { .. }) => Op::FOrdLessThanEqual,
            (TokenKind::Gt, Type::Float { .. }) => Op::FOrdGreaterThan,
            (TokenKind::Ge, Type::Float { .. }) => Op::FOrdGreaterThanEqual,
            (TokenKind::Lt, Type::Int { signed: true, .. }) => Op::SLessThan,
            (TokenKind::Le, Type::Int { signed: true, .. }) => Op::SLessThanEqual,
            (TokenKind::Gt, Type::Int { signed: true, .. }) => Op::SGreaterThan,
            (TokenKind::Ge, Type::Int { signed: true, .. }) => Op::SGreaterThanEqual,
            (TokenKind::Lt, _) => Op::ULessThan,
            (TokenKind::Le, _) => Op::ULessThanEqual,
            (TokenKind::Gt, _) => Op::UGreaterThan,
            (TokenKind::Ge, _) => Op::UGreaterThanEqual,
            _ => unreachable!(),
        };
        let id = self.result_op(op, &Type::Bool, &[lid, rid]);
        Ok(Operand::rvalue(Type::Bool, id))
    }

    fn equality(
        &mut self,
        kind: TokenKind,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        let eq = kind == TokenKind::EqEq;
        if left.0 == Type::Bool || right.0 == Type::Bool {
            if left.0 != right.0 {
                bail!(
                    "{}: type mismatch, cannot compare {} to {}",
                    loc,
                    left.0,
                    right.0
                );
            }
            let op = if eq { Op::LogicalEqual } else { Op::LogicalNotEqual };
            let id = self.result_op(op, &Type::Bool, &[left.1, right.1]);
            return Ok(Operand::rvalue(Type::Bool, id));
        }
        if !left.0.is_scalar() || !right.0.is_scalar() {
            bail!(
                "{}: operands must be scalars of type bool, integer or float",
                loc
            );
        }
        let (ty, lid, rid) = self.unify(left, right, loc)?;
        let op = match (eq, ty.component()) {
            (true, Type::Float { .. }) => Op::FOrdEqual,
            (false, Type::Float { .. }) => Op::FOrdNotEqual,
            (true, _) => Op::IEqual,
            (false, _) => Op::INotEqual,
        };
        let id = self.result_op(op, &Type::Bool, &[lid, rid]);
        Ok(Operand::rvalue(Type::Bool, id))
    }

    fn bitwise(
        &mut self,
        kind: TokenKind,
        (lty, lid): (Type, u32),
        (rty, rid): (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        if !matches!(lty, Type::Int { .. }) || !matches!(rty, Type::Int { .. }) {
            bail!("{}: operands must be scalars of type integer", loc);
        }
        let rid = if lty.size() != rty.size() {
            self.implicit_cast(&lty, &rty, rid, loc)?
        } else {
            rid
        };
        let op = match kind {
            TokenKind::BitAnd => Op::BitwiseAnd,
            TokenKind::BitOr => Op::BitwiseOr,
            _ => Op::BitwiseXor,
        };
        let id = self.result_op(op, &lty, &[lid, rid]);
        Ok(Operand::rvalue(lty, id))
    }

    fn logical(
        &mut self,
        kind: TokenKind,
        left: (Type, u32),
        right: (Type, u32),
        loc: &Loc,
    ) -> Result<Operand> {
        let lid = self.to_bool(left, loc)?;
        let rid = self.to_bool(right, loc)?;
        let op = match kind {
            TokenKind::LogicalAnd => Op::LogicalAnd,
            _ => Op::LogicalOr,
        };
        let id = self.result_op(op, &Type::Bool, &[lid, rid]);
        Ok(Operand::rvalue(Type::Bool, id))
    }

    fn to_bool(&mut self, (ty, id): (Type, u32), loc: &Loc) -> Result<u32> {
        match ty {
            Type::Bool => Ok(id),
            Type::Int { .. } | Type::Float { .. } => self.cast(&Type::Bool, &ty, id, loc),
            _ => bail!(
                "{}: operands must be scalars of type bool, integer or float",
                loc
            ),
        }
    }

    // ---- assignment -------------------------------------------------------

    /// Store `rhs` into the lvalue `lhs`. Swizzled destinations write
    /// through a `VectorShuffle` that takes the written lanes from the new
    /// value and keeps the rest, or a `CompositeInsert` for one lane.
    fn store_into(
        &mut self,
        lhs: &Operand,
        kind: TokenKind,
        rhs: Operand,
        loc: &Loc,
    ) -> Result<Operand> {
        match lhs.kind {
            OperandKind::Pointer { is_const: true, .. } => {
                bail!("{}: cannot assign to a constant value", loc)
            }
            OperandKind::Pointer { .. } => {}
            _ => bail!("{}: left hand operand must be an lvalue", loc),
        }
        if !lhs.swizzle.is_empty() && !lhs.swizzle_writable {
            bail!(
                "{}: left hand operand must be an lvalue (swizzle repeats a component)",
                loc
            );
        }

        let target_ty = lhs.effective_ty();
        let value = match kind {
            TokenKind::Assign => {
                let (rty, rid) = self.load(&rhs)?;
                self.implicit_cast(&target_ty, &rty, rid, loc)?
            }
            _ => {
                let current = self.load(lhs)?;
                let right = self.load(&rhs)?;
                let combined = match kind {
                    TokenKind::AddAssign => self.add_sub(true, current, right, loc)?,
                    TokenKind::SubAssign => self.add_sub(false, current, right, loc)?,
                    TokenKind::MulAssign => self.multiply(current, right, loc)?,
                    _ => self.divide(current, right, loc)?,
                };
                self.implicit_cast(&target_ty, &combined.ty, combined.id, loc)?
            }
        };

        if lhs.swizzle.is_empty() {
            self.void_op(Op::Store, &[lhs.id, value]);
        } else {
            let (base_ty, base_id) = self.load_base(lhs);
            let new = if lhs.swizzle.len() == 1 {
                self.result_op(
                    Op::CompositeInsert,
                    &base_ty,
                    &[value, base_id, lhs.swizzle[0]],
                )
            } else {
                let rows = base_ty.rows() as u32;
                let mut indices = Vec::with_capacity(rows as usize);
                for lane in 0..rows {
                    match lhs.swizzle.iter().position(|&s| s == lane) {
                        Some(p) => indices.push(rows + p as u32),
                        None => indices.push(lane),
                    }
                }
                let mut operands = vec![base_id, value];
                operands.extend_from_slice(&indices);
                self.result_op(Op::VectorShuffle, &base_ty, &operands)
            };
            self.void_op(Op::Store, &[lhs.id, new]);
        }
        Ok(Operand::rvalue(target_ty, value))
    }

    // ---- names, members, subscripts, swizzles -----------------------------

    /// Resolve a name and its selector chain. Struct members and array
    /// subscripts accumulate into one `OpInBoundsAccessChain`; a trailing
    /// vector swizzle is recorded on the operand.
    pub(crate) fn parse_name(
        &mut self,
        name: Token,
        stack: &mut VariableStack,
    ) -> Result<Operand> {
        let mut base = self.resolve(&name, stack)?;

        let mut access: Vec<u32> = Vec::new();
        let mut current = base.ty.clone();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Selector) => match &current {
                    Type::Struct(st) => {
                        let st = st.clone();
                        self.advance()?;
                        let member = self.expect_name()?;
                        let index = match st.member_index(&member.lexeme) {
                            Some(index) => index,
                            None => bail!(
                                "{}: \"{}\" doesn't have a member named \"{}\"",
                                member.loc,
                                st.name,
                                member.lexeme
                            ),
                        };
                        access.push(self.module.constant_i32(index as i32));
                        current = st.members[index].ty.clone();
                    }
                    Type::Vector { rows, .. } => {
                        let rows = *rows;
                        self.advance()?;
                        let member = self.expect_name()?;
                        let indices = swizzle_indices(&member, rows)?;
                        base.swizzle_writable = all_distinct(&indices);
                        base.swizzle = indices;
                        break;
                    }
                    _ => bail!(
                        "{}: left of operator \".\" must be a struct or vector",
                        name.loc
                    ),
                },
                Some(TokenKind::BracketOpen) => {
                    let open = self.advance()?;
                    let element = match &current {
                        Type::Array { element, .. } => (**element).clone(),
                        _ => bail!("{}: \"{}\" is not an array", open.loc, name.lexeme),
                    };
                    let index = self.parse_assign(stack)?;
                    self.expect(TokenKind::BracketClose, "\"]\"")?;
                    match index.effective_ty() {
                        Type::Int { signed: true, .. } => {}
                        Type::Int { signed: false, .. } => self.diags.warning(
                            &open.loc,
                            "array index is unsigned but will be treated as signed",
                        ),
                        other => bail!(
                            "{}: array index must be an integer scalar, is {}",
                            open.loc,
                            other
                        ),
                    }
                    let (_, iid) = self.load(&index)?;
                    access.push(iid);
                    current = element;
                }
                _ => break,
            }
        }

        if !access.is_empty() {
            let (scope, is_const) = match base.kind {
                OperandKind::Pointer { scope, is_const } => (scope, is_const),
                _ => bail!(
                    "{}: \"{}\" cannot be indexed, it is not an addressable variable",
                    name.loc,
                    name.lexeme
                ),
            };
            let ptr = self.module.pointer_type_id(&current, scope.storage_class());
            let mut operands = vec![base.id];
            operands.extend_from_slice(&access);
            let id = self.result_op_id(Op::InBoundsAccessChain, ptr, &operands);
            let swizzle = std::mem::take(&mut base.swizzle);
            let writable = base.swizzle_writable;
            base = Operand::pointer(current, id, scope, is_const);
            base.swizzle = swizzle;
            base.swizzle_writable = writable;
        }
        Ok(base)
    }

    fn resolve(&mut self, name: &Token, stack: &VariableStack) -> Result<Operand> {
        if let Some(var) = stack.get(&name.lexeme) {
            return Ok(Operand::pointer(
                var.ty.clone(),
                var.id,
                var.scope,
                var.is_const,
            ));
        }
        if let Some(param) = stack.param(&name.lexeme) {
            let operand = if param.by_ref {
                Operand::pointer(
                    param.ty.clone(),
                    param.id,
                    VariableScope::Function,
                    param.is_const,
                )
            } else {
                // By-value parameters are plain values inside the body.
                Operand::rvalue(param.ty.clone(), param.id)
            };
            return Ok(operand);
        }
        if let Some(var) = self.globals.iter().find(|v| v.name == name.lexeme) {
            return Ok(Operand::pointer(
                var.ty.clone(),
                var.id,
                var.scope,
                var.is_const,
            ));
        }
        bail!(
            "{}: unexpected symbol \"{}\" expected a variable or constant",
            name.loc,
            name.lexeme
        );
    }
}

fn all_distinct(indices: &[u32]) -> bool {
    for (i, a) in indices.iter().enumerate() {
        if indices[i + 1..].contains(a) {
            return false;
        }
    }
    true
}

/// Map swizzle letters to lane indices: `xyzw` and the parallel `rgba`.
fn swizzle_indices(member: &Token, rows: u8) -> Result<Vec<u32>> {
    if member.lexeme.is_empty() || member.lexeme.len() > 4 {
        bail!(
            "{}: \"{}\" is not a valid swizzle",
            member.loc,
            member.lexeme
        );
    }
    let mut indices = Vec::with_capacity(member.lexeme.len());
    for c in member.lexeme.chars() {
        let index = match c {
            'x' | 'r' => 0u32,
            'y' | 'g' => 1,
            'z' | 'b' => 2,
            'w' | 'a' => 3,
            _ => bail!(
                "{}: \"{}\" is not a valid swizzle component",
                member.loc,
                c
            ),
        };
        if index >= rows as u32 {
            bail!(
                "{}: swizzle component \"{}\" is out of range for a {}-component vector",
                member.loc,
                c,
                rows
            );
        }
        indices.push(index);
    }
    Ok(indices)
}

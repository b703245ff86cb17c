//! Function headers, bodies, overload resolution, calls and type
//! constructors.
use anyhow::bail;
use spirv::Op;

use crate::error::Result;
use crate::line::Loc;
use crate::sym::{signature, FunctionDecl, Param, VariableScope, VariableStack};
use crate::token::{Token, TokenKind};
use crate::ty::Type;

use super::expr::{Operand, OperandKind};
use super::Compiler;

impl<'a> Compiler<'a> {
    /// Parse a function declaration or definition; the return type and name
    /// are already consumed and the cursor stands on `(`.
    pub(crate) fn parse_function(&mut self, return_ty: Type, name: Token) -> Result<()> {
        self.expect(TokenKind::ParenOpen, "\"(\"")?;
        let mut params: Vec<Param> = Vec::new();
        if !self.eat(TokenKind::ParenClose) {
            loop {
                let is_const = self.eat(TokenKind::Const);
                let ty = self.parse_type()?;
                let by_ref = self.eat(TokenKind::BitAnd);
                let pname = if self.peek_kind() == Some(TokenKind::Name) {
                    let tok = self.advance()?;
                    if self.globals.iter().any(|v| v.name == tok.lexeme) {
                        self.diags.warning(
                            &tok.loc,
                            format!("parameter \"{}\" overrides a global variable", tok.lexeme),
                        );
                    }
                    tok.lexeme
                } else {
                    String::new()
                };
                params.push(Param {
                    name: pname,
                    ty,
                    is_const,
                    by_ref,
                    id: 0,
                });
                let delim = self.advance()?;
                match delim.kind {
                    TokenKind::ParenClose => break,
                    TokenKind::Comma => continue,
                    _ => bail!(
                        "{}: unexpected symbol \"{}\" expected \")\" or \",\"",
                        delim.loc,
                        delim.lexeme
                    ),
                }
            }
        }

        let sig = signature(&name.lexeme, &params);
        let existing = self
            .funcs
            .iter()
            .position(|d| d.name == name.lexeme && d.signature() == sig);

        let next = self.advance()?;
        match next.kind {
            TokenKind::Semicolon => {
                if existing.is_some() {
                    bail!("{}: redeclaration of function \"{}\"", name.loc, sig);
                }
                self.create_function_decl(&name.lexeme, return_ty, params);
                Ok(())
            }
            TokenKind::BraceOpen => {
                let index = match existing {
                    Some(index) => {
                        if self.funcs[index].defined {
                            bail!("{}: redefinition of function \"{}\"", name.loc, sig);
                        }
                        if self.funcs[index].return_ty != return_ty {
                            bail!(
                                "{}: mismatched redeclaration of \"{}\": return type {} was declared {}",
                                name.loc,
                                sig,
                                return_ty,
                                self.funcs[index].return_ty
                            );
                        }
                        // The definition's parameter names win.
                        for (have, brought) in
                            self.funcs[index].params.iter_mut().zip(params.into_iter())
                        {
                            have.name = brought.name;
                        }
                        index
                    }
                    None => self.create_function_decl(&name.lexeme, return_ty, params),
                };
                for (i, param) in self.funcs[index].params.iter().enumerate() {
                    if param.name.is_empty() {
                        bail!("{}: parameter {} needs a name", name.loc, i);
                    }
                }
                self.parse_function_body(index)
            }
            _ => bail!(
                "{}: unexpected symbol \"{}\" expected \";\" or \"{{\"",
                next.loc,
                next.lexeme
            ),
        }
    }

    /// Register the declaration: function type, `OpFunction` and
    /// `OpFunctionParameter` instructions held back until definition.
    fn create_function_decl(
        &mut self,
        name: &str,
        return_ty: Type,
        mut params: Vec<Param>,
    ) -> usize {
        let ret_id = self.module.type_id(&return_ty);
        let param_ty_ids = params
            .iter()
            .map(|p| {
                if p.by_ref {
                    self.module
                        .pointer_type_id(&p.ty, VariableScope::Function.storage_class())
                } else {
                    self.module.type_id(&p.ty)
                }
            })
            .collect::<Vec<_>>();
        let type_id = self.module.function_type_id(ret_id, &param_ty_ids);

        let id = self.module.alloc_id();
        let mut decl_instrs = Vec::new();
        decl_instrs.push(
            crate::instr::InstructionBuilder::new(Op::Function)
                .push(ret_id)
                .push(id)
                .push(0) // FunctionControl None
                .push(type_id)
                .build(),
        );
        self.module.debug_name(id, name);

        for (param, &pty) in params.iter_mut().zip(param_ty_ids.iter()) {
            let pid = self.module.alloc_id();
            param.id = pid;
            decl_instrs.push(
                crate::instr::InstructionBuilder::new(Op::FunctionParameter)
                    .push(pty)
                    .push(pid)
                    .build(),
            );
            if !param.name.is_empty() {
                self.module
                    .debug_name(pid, &format!("{}_{}", name, param.name));
            }
        }

        self.funcs.push(FunctionDecl {
            name: name.to_owned(),
            return_ty,
            params,
            type_id,
            id,
            defined: false,
            decl_instrs,
        });
        self.funcs.len() - 1
    }

    /// Emit the body: prologue, entry label, statements with all local
    /// `OpVariable`s hoisted to the top of the entry block, implicit
    /// `OpReturn` for void functions, `OpFunctionEnd`.
    fn parse_function_body(&mut self, index: usize) -> Result<()> {
        let decl = self.funcs[index].clone();
        self.module
            .functions
            .extend(decl.decl_instrs.iter().cloned());
        let entry = self.module.alloc_id();
        self.label(entry);
        let mark = self.module.functions.len();

        let mut stack = VariableStack::new(decl.params.clone());
        self.parse_block(&decl.return_ty, &mut stack)?;

        let hoisted = std::mem::take(&mut stack.var_instrs);
        let tail = self.module.functions.split_off(mark);
        self.module.functions.extend(hoisted);
        self.module.functions.extend(tail);

        if !self.last_is_terminator() {
            if decl.return_ty == Type::Void {
                self.void_op(Op::Return, &[]);
            } else {
                // Falling off the end of a value-returning function: the
                // open block is the merge of a fully-returning conditional.
                self.void_op(Op::Unreachable, &[]);
            }
        }
        self.void_op(Op::FunctionEnd, &[]);
        self.funcs[index].defined = true;
        Ok(())
    }

    // ---- calls ------------------------------------------------------------

    /// `name(args...)`: extended-set intrinsics first, then the `texture`
    /// builtin, then user functions by overload signature.
    pub(crate) fn parse_call(
        &mut self,
        name: Token,
        stack: &mut VariableStack,
    ) -> Result<Operand> {
        let args = self.parse_args(stack)?;
        if let Some(result) = self.ext_call(&name, &args)? {
            return Ok(result);
        }
        if name.lexeme == "texture" {
            return self.texture_call(&name, &args);
        }
        self.user_call(&name, &args)
    }

    fn parse_args(&mut self, stack: &mut VariableStack) -> Result<Vec<Operand>> {
        self.expect(TokenKind::ParenOpen, "\"(\"")?;
        let mut args = Vec::new();
        if self.eat(TokenKind::ParenClose) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression(stack)?);
            let delim = self.advance()?;
            match delim.kind {
                TokenKind::ParenClose => break,
                TokenKind::Comma => continue,
                _ => bail!(
                    "{}: unexpected symbol \"{}\" expected \")\" or \",\"",
                    delim.loc,
                    delim.lexeme
                ),
            }
        }
        Ok(args)
    }

    fn user_call(&mut self, name: &Token, args: &[Operand]) -> Result<Operand> {
        let candidates = self
            .funcs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.name == name.lexeme)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            bail!(
                "{}: no function called \"{}\" exists",
                name.loc,
                name.lexeme
            );
        }

        let arg_tys = args.iter().map(|a| a.effective_ty()).collect::<Vec<_>>();
        let chosen = candidates.iter().copied().find(|&i| {
            let d = &self.funcs[i];
            d.params.len() == args.len()
                && d.params.iter().zip(args.iter().zip(arg_tys.iter())).all(
                    |(p, (a, aty))| {
                        if p.by_ref {
                            p.ty == a.ty && a.swizzle.is_empty()
                        } else {
                            p.ty == *aty
                        }
                    },
                )
        });
        let index = match chosen {
            Some(index) => index,
            None => {
                let wanted = arg_tys
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!(
                    "{}: no overload of \"{}\" matches ({})",
                    name.loc,
                    name.lexeme,
                    wanted
                );
            }
        };
        let decl = self.funcs[index].clone();

        let mut ids = Vec::with_capacity(args.len() + 1);
        ids.push(decl.id);
        for (i, (param, arg)) in decl.params.iter().zip(args.iter()).enumerate() {
            if param.by_ref {
                let (scope, is_const) = match arg.kind {
                    OperandKind::Pointer { scope, is_const } => (scope, is_const),
                    _ => bail!(
                        "{}: argument {} of \"{}\" must be an lvalue",
                        name.loc,
                        i,
                        decl.signature()
                    ),
                };
                if is_const && !param.is_const {
                    bail!(
                        "{}: argument {} of \"{}\" is const",
                        name.loc,
                        i,
                        decl.signature()
                    );
                }
                if scope != VariableScope::Function {
                    bail!(
                        "{}: argument {} of \"{}\" must be a local variable",
                        name.loc,
                        i,
                        decl.signature()
                    );
                }
                ids.push(arg.id);
            } else {
                let (_, id) = self.load(arg)?;
                ids.push(id);
            }
        }

        let id = self.result_op(Op::FunctionCall, &decl.return_ty, &ids);
        Ok(Operand::rvalue(decl.return_ty, id))
    }

    // ---- type constructors -------------------------------------------------

    /// `TYPE(args...)` for vectors and matrices. An all-constant argument
    /// list folds to an `OpConstantComposite`; otherwise an
    /// `OpCompositeConstruct` is emitted.
    pub(crate) fn parse_constructor(
        &mut self,
        ty: Type,
        loc: &Loc,
        stack: &mut VariableStack,
    ) -> Result<Operand> {
        let args = self.parse_args(stack)?;
        match ty {
            Type::Vector { .. } => self.construct_vector(ty, loc, &args),
            Type::Matrix { .. } => self.construct_matrix(ty, loc, &args),
            _ => bail!("{}: \"{}\" doesn't have a constructor", loc, ty),
        }
    }

    fn construct_vector(&mut self, ty: Type, loc: &Loc, args: &[Operand]) -> Result<Operand> {
        let rows = ty.rows();
        let mut total = 0u8;
        for arg in args.iter() {
            let ety = arg.effective_ty();
            if !same_component(ty.component(), ety.component()) || ety.is_matrix() {
                bail!(
                    "{}: argument of type \"{}\" is not compatible with \"{}\"",
                    loc,
                    ety,
                    ty
                );
            }
            total += ety.rows();
        }
        if total != rows {
            bail!(
                "{}: total component count must be {}, is {}",
                loc,
                rows,
                total
            );
        }
        self.construct(ty, args)
    }

    fn construct_matrix(&mut self, ty: Type, loc: &Loc, args: &[Operand]) -> Result<Operand> {
        if args.len() != ty.columns() as usize {
            bail!(
                "{}: constructor of \"{}\" takes {} column vectors, got {}",
                loc,
                ty,
                ty.columns(),
                args.len()
            );
        }
        for arg in args.iter() {
            let ety = arg.effective_ty();
            if !ety.is_vector()
                || ety.rows() != ty.rows()
                || !same_component(ty.component(), ety.component())
            {
                bail!(
                    "{}: argument of type \"{}\" is not compatible with \"{}\"",
                    loc,
                    ety,
                    ty
                );
            }
        }
        self.construct(ty, args)
    }

    fn construct(&mut self, ty: Type, args: &[Operand]) -> Result<Operand> {
        let foldable = args
            .iter()
            .all(|a| a.kind == OperandKind::Constant && a.swizzle.is_empty());
        let mut ids = Vec::with_capacity(args.len());
        for arg in args.iter() {
            let (_, id) = self.load(arg)?;
            ids.push(id);
        }
        if ids.len() == 1 && args[0].effective_ty() == ty {
            // vec4(v) of an existing vec4 passes through.
            return Ok(match foldable {
                true => Operand::constant(ty, ids[0]),
                false => Operand::rvalue(ty, ids[0]),
            });
        }
        let operand = if foldable {
            let id = self.module.constant_composite(&ty, &ids);
            Operand::constant(ty, id)
        } else {
            let id = self.result_op(Op::CompositeConstruct, &ty, &ids);
            Operand::rvalue(ty, id)
        };
        Ok(operand)
    }
}

/// Scalar component compatibility for constructors: same kind and width;
/// signedness is not considered.
fn same_component(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Int { bits: ab, .. }, Type::Int { bits: bb, .. }) => ab == bb,
        (Type::Float { bits: ab }, Type::Float { bits: bb }) => ab == bb,
        _ => false,
    }
}

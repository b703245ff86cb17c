//! The compiler driver: token cursor, top-level declaration dispatch,
//! statement parsing and structured control flow. Expression evaluation
//! lives in [`expr`], functions and calls in [`func`], interface
//! declarations in [`pipeline`], intrinsics in [`ext`].
use std::rc::Rc;

use anyhow::bail;
use spirv::{Decoration, Op};

use crate::diag::Diagnostics;
use crate::error::Result;
use crate::instr::{Instruction, InstructionBuilder};
use crate::line::Loc;
use crate::module::{Module, SpirvBinary};
use crate::opts::CompileOptions;
use crate::preprocessor::Preprocessor;
use crate::sym::{FunctionDecl, Variable, VariableScope, VariableStack};
use crate::token::{Literal, Token, TokenKind};
use crate::tokenizer::tokenize;
use crate::ty::{StructMember, StructType, Type};

pub mod expr;
pub mod ext;
pub mod func;
pub mod pipeline;

pub use expr::{Operand, OperandKind};

/// Result of a successful compilation. The warning count lets the caller
/// upgrade warnings to a failed exit under `--soE`.
#[derive(Debug)]
pub struct CompileOutput {
    pub spv: SpirvBinary,
    pub warnings: usize,
}

struct LoopCtx {
    merge: u32,
    cont: u32,
}

pub struct Compiler<'a> {
    pub(crate) opts: &'a CompileOptions,
    pub(crate) diags: Diagnostics,
    pub(crate) module: Module,
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) structs: Vec<Rc<StructType>>,
    pub(crate) globals: Vec<Variable>,
    pub(crate) funcs: Vec<FunctionDecl>,
    loops: Vec<LoopCtx>,
    /// Post-increment stores held back until the end of the enclosing
    /// expression.
    pub(crate) deferred: Vec<Instruction>,
}

impl<'a> Compiler<'a> {
    /// Compile one THSL source into a SPIR-V binary.
    pub fn compile(source: &str, file: &str, opts: &'a CompileOptions) -> Result<CompileOutput> {
        let mut diags = Diagnostics::new(opts.warnings);
        let lines = Preprocessor::run(source, file, opts, &mut diags)?;
        let tokens = tokenize(&lines, opts.default_fp_bits())?;
        let mut compiler = Compiler {
            opts,
            diags,
            module: Module::new(),
            tokens,
            pos: 0,
            structs: Vec::new(),
            globals: Vec::new(),
            funcs: Vec::new(),
            loops: Vec::new(),
            deferred: Vec::new(),
        };
        compiler.parse_program()?;
        compiler.finish()
    }

    /// Run only the preprocessor and return the expanded source text.
    pub fn preprocess(source: &str, file: &str, opts: &CompileOptions) -> Result<String> {
        let mut diags = Diagnostics::new(opts.warnings);
        let lines = Preprocessor::run(source, file, opts, &mut diags)?;
        let mut out = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        out.push('\n');
        Ok(out)
    }

    // ---- token cursor -----------------------------------------------------

    fn eof_loc(&self) -> Loc {
        match self.tokens.last() {
            Some(tok) => tok.loc.clone(),
            None => Loc {
                file: Rc::from("<source>"),
                line: 0,
                col: 0,
            },
        }
    }

    /// Location of the token under the cursor, falling back to the end of
    /// the input.
    pub(crate) fn cur_loc(&self) -> Loc {
        match self.tokens.get(self.pos) {
            Some(tok) => tok.loc.clone(),
            None => self.eof_loc(),
        }
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    pub(crate) fn nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }

    pub(crate) fn advance(&mut self) -> Result<Token> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                let tok = tok.clone();
                self.pos += 1;
                Ok(tok)
            }
            None => bail!("{}: unexpected end of input", self.eof_loc()),
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind != kind {
            bail!(
                "{}: unexpected symbol \"{}\" expected {}",
                tok.loc,
                tok.lexeme,
                what
            );
        }
        Ok(tok)
    }

    pub(crate) fn expect_name(&mut self) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind != TokenKind::Name {
            bail!(
                "{}: unexpected symbol \"{}\" expected a valid name",
                tok.loc,
                tok.lexeme
            );
        }
        Ok(tok)
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ---- instruction emission --------------------------------------------

    /// Append an instruction of shape `op <type> <result> operands...` to
    /// the current function and return the fresh result id.
    pub(crate) fn result_op(&mut self, op: Op, ty: &Type, operands: &[u32]) -> u32 {
        let ty_id = self.module.type_id(ty);
        self.result_op_id(op, ty_id, operands)
    }

    pub(crate) fn result_op_id(&mut self, op: Op, ty_id: u32, operands: &[u32]) -> u32 {
        let id = self.module.alloc_id();
        let instr = InstructionBuilder::new(op)
            .push(ty_id)
            .push(id)
            .push_list(operands)
            .build();
        self.module.functions.push(instr);
        id
    }

    /// Append an instruction with no result.
    pub(crate) fn void_op(&mut self, op: Op, operands: &[u32]) {
        let instr = InstructionBuilder::new(op).push_list(operands).build();
        self.module.functions.push(instr);
    }

    pub(crate) fn label(&mut self, id: u32) {
        let instr = InstructionBuilder::new(Op::Label).push(id).build();
        self.module.functions.push(instr);
    }

    pub(crate) fn last_is_terminator(&self) -> bool {
        matches!(
            self.module.functions.last().and_then(|i| i.op()),
            Some(Op::Return)
                | Some(Op::ReturnValue)
                | Some(Op::Branch)
                | Some(Op::BranchConditional)
                | Some(Op::Switch)
                | Some(Op::Kill)
                | Some(Op::Unreachable)
        )
    }

    /// Branch to `target` unless the current block already ended, which
    /// happens after `return`, `break` and `continue`.
    pub(crate) fn branch_if_open(&mut self, target: u32) {
        if !self.last_is_terminator() {
            self.void_op(Op::Branch, &[target]);
        }
    }

    // ---- types ------------------------------------------------------------

    pub(crate) fn struct_type(&self, name: &str) -> Option<Type> {
        self.structs
            .iter()
            .find(|st| st.name == name)
            .map(|st| Type::Struct(st.clone()))
    }

    /// True if the cursor stands on something that begins a type: a
    /// primitive keyword or a known struct name.
    pub(crate) fn at_type(&self) -> bool {
        match self.peek() {
            Some(tok) if tok.kind.starts_type() => true,
            Some(tok) if tok.kind == TokenKind::Name => self.struct_type(&tok.lexeme).is_some(),
            _ => false,
        }
    }

    /// Parse a type: a primitive keyword with optional `<component>` shape
    /// argument, a struct name, or either with an `[N]` array suffix.
    pub(crate) fn parse_type(&mut self) -> Result<Type> {
        let tok = self.advance()?;
        let base = match tok.kind {
            TokenKind::TypeVoid => Type::Void,
            TokenKind::TypeBool => Type::Bool,
            TokenKind::TypeInt { bits, signed } => Type::Int { bits, signed },
            TokenKind::TypeFloat { bits } => Type::Float { bits },
            TokenKind::TypeVec { rows } => {
                let component = self.parse_shape_component()?;
                Type::vector(component, rows)
            }
            TokenKind::TypeMat { rows, columns } => {
                let component = self.parse_shape_component()?;
                Type::matrix(component, rows, columns)
            }
            TokenKind::TypeSampler { dim } => Type::SampledImage {
                image: Box::new(Type::Image { dim }),
            },
            TokenKind::Name => match self.struct_type(&tok.lexeme) {
                Some(ty) => ty,
                None => bail!(
                    "{}: unexpected symbol \"{}\" expected a valid type",
                    tok.loc,
                    tok.lexeme
                ),
            },
            _ => bail!(
                "{}: unexpected symbol \"{}\" expected a valid type",
                tok.loc,
                tok.lexeme
            ),
        };

        if self.eat(TokenKind::BracketOpen) {
            let count = self.advance()?;
            let count_value = match count.kind {
                TokenKind::Value(Literal::Int { value, .. }) => value as u32,
                _ => bail!(
                    "{}: unexpected symbol \"{}\" expected a valid integer value",
                    count.loc,
                    count.lexeme
                ),
            };
            self.expect(TokenKind::BracketClose, "\"]\"")?;
            return Ok(Type::Array {
                element: Box::new(base),
                count: count_value,
            });
        }
        Ok(base)
    }

    /// The optional `<int32>`-style component of a vector or matrix
    /// keyword; defaults to `float` at the configured precision.
    fn parse_shape_component(&mut self) -> Result<Type> {
        if !self.eat(TokenKind::Lt) {
            return Ok(Type::float(self.opts.default_fp_bits()));
        }
        let tok = self.advance()?;
        let component = match tok.kind {
            TokenKind::TypeInt { bits, signed } => Type::Int { bits, signed },
            TokenKind::TypeFloat { bits } => Type::Float { bits },
            _ => bail!(
                "{}: unexpected symbol \"{}\" expected a valid type",
                tok.loc,
                tok.lexeme
            ),
        };
        self.expect(TokenKind::Gt, "\">\"")?;
        Ok(component)
    }

    /// Parse a struct body `{ TYPE MEMBER; ... };` and register the type
    /// under `registry_name`. Member offsets accumulate by natural size.
    pub(crate) fn parse_struct_body(
        &mut self,
        registry_name: &str,
        loc: &Loc,
    ) -> Result<Rc<StructType>> {
        if self.struct_type(registry_name).is_some() {
            bail!("{}: struct \"{}\" redefinition", loc, registry_name);
        }
        self.expect(TokenKind::BraceOpen, "\"{\"")?;

        let mut members: Vec<StructMember> = Vec::new();
        while !self.eat(TokenKind::BraceClose) {
            let ty = self.parse_type()?;
            let name = self.expect_name()?;
            if members.iter().any(|m| m.name == name.lexeme) {
                bail!(
                    "{}: there is already a member called \"{}\" in \"{}\"",
                    name.loc,
                    name.lexeme,
                    registry_name
                );
            }
            self.expect(TokenKind::Semicolon, "\";\"")?;
            members.push(StructMember {
                name: name.lexeme,
                ty,
            });
        }
        self.expect(TokenKind::Semicolon, "\";\"")?;

        let st = Rc::new(StructType {
            name: registry_name.to_owned(),
            members,
        });
        let type_id = self.module.type_id(&Type::Struct(st.clone()));
        let mut offset = 0u32;
        for (i, member) in st.members.iter().enumerate() {
            self.module
                .member_decorate(type_id, i as u32, Decoration::Offset, &[offset]);
            offset += member.ty.size();
        }
        self.structs.push(st.clone());
        Ok(st)
    }

    // ---- top level --------------------------------------------------------

    fn parse_program(&mut self) -> Result<()> {
        while let Some(tok) = self.peek() {
            let tok = tok.clone();
            match tok.kind {
                TokenKind::Layout => self.parse_layout()?,
                TokenKind::In => self.parse_stage_builtin(VariableScope::In)?,
                TokenKind::Out => self.parse_stage_builtin(VariableScope::Out)?,
                TokenKind::Struct => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    self.parse_struct_body(&name.lexeme, &name.loc)?;
                }
                _ => self.parse_function_or_global(&tok)?,
            }
        }
        Ok(())
    }

    fn parse_function_or_global(&mut self, at: &Token) -> Result<()> {
        let is_const = self.eat(TokenKind::Const);
        if !self.at_type() {
            bail!(
                "{}: unexpected symbol \"{}\" expected a declaration",
                at.loc,
                at.lexeme
            );
        }
        let ty = self.parse_type()?;
        let name = self.expect_name()?;

        if self.peek_kind() == Some(TokenKind::ParenOpen) {
            if is_const {
                bail!("{}: functions cannot be declared const", name.loc);
            }
            return self.parse_function(ty, name);
        }

        // Global variable in private storage.
        let init = if self.eat(TokenKind::Assign) {
            Some(self.parse_const_initializer(&ty)?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "\";\"")?;
        self.declare_global(ty, VariableScope::Private, &name, init)?;
        if is_const {
            self.globals.last_mut().unwrap().is_const = true;
        }
        Ok(())
    }

    /// Global initializers must be constants: a literal, `true`/`false`,
    /// or a negated literal.
    fn parse_const_initializer(&mut self, ty: &Type) -> Result<u32> {
        let negate = self.eat(TokenKind::Negate);
        let tok = self.advance()?;
        let id = match (tok.kind, ty) {
            (TokenKind::Value(Literal::Int { value, .. }), Type::Int { .. }) => {
                let value = if negate { value.wrapping_neg() } else { value };
                self.module.scalar(ty, value, 0.0)
            }
            (TokenKind::Value(Literal::Float(value)), Type::Float { .. }) => {
                let value = if negate { -value } else { value };
                self.module.scalar(ty, 0, value)
            }
            (TokenKind::Value(Literal::Int { value, .. }), Type::Float { .. }) => {
                let value = if negate { -(value as f64) } else { value as f64 };
                self.module.scalar(ty, 0, value)
            }
            (TokenKind::Name, Type::Bool) if tok.lexeme == "true" && !negate => {
                self.module.constant_bool(true)
            }
            (TokenKind::Name, Type::Bool) if tok.lexeme == "false" && !negate => {
                self.module.constant_bool(false)
            }
            _ => bail!(
                "{}: global initializer must be a constant of type {}",
                tok.loc,
                ty
            ),
        };
        Ok(id)
    }

    pub(crate) fn declare_global(
        &mut self,
        ty: Type,
        scope: VariableScope,
        name: &Token,
        init: Option<u32>,
    ) -> Result<Variable> {
        if self.globals.iter().any(|v| v.name == name.lexeme) {
            bail!(
                "{}: redefinition of global variable \"{}\"",
                name.loc,
                name.lexeme
            );
        }
        let id = self.module.global_variable(&ty, scope.storage_class(), init);
        self.module.debug_name(id, &name.lexeme);
        let var = Variable {
            name: name.lexeme.clone(),
            ty,
            scope,
            is_const: false,
            id,
        };
        self.globals.push(var.clone());
        Ok(var)
    }

    // ---- statements -------------------------------------------------------

    pub(crate) fn parse_block(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        stack.push_frame();
        loop {
            match self.peek_kind() {
                Some(TokenKind::BraceClose) => {
                    self.advance()?;
                    break;
                }
                Some(_) => self.parse_statement(ret, stack)?,
                None => bail!("{}: missing \"}}\"", self.eof_loc()),
            }
        }
        stack.pop_frame();
        Ok(())
    }

    fn parse_statement(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => bail!("{}: unexpected end of input", self.eof_loc()),
        };
        match tok.kind {
            TokenKind::BraceOpen => {
                self.advance()?;
                self.parse_block(ret, stack)
            }
            kind if kind.starts_type() => self.parse_local_decl(stack),
            TokenKind::Name
                if self.struct_type(&tok.lexeme).is_some()
                    && self.nth_kind(1) == Some(TokenKind::Name) =>
            {
                self.parse_local_decl(stack)
            }
            TokenKind::Return => self.parse_return(ret, stack),
            TokenKind::If => self.parse_if(ret, stack),
            TokenKind::While => self.parse_while(ret, stack),
            TokenKind::For => self.parse_for(ret, stack),
            TokenKind::Break | TokenKind::Continue => self.parse_loop_jump(&tok),
            TokenKind::Switch => {
                bail!("{}: \"switch\" statements are not supported", tok.loc)
            }
            TokenKind::Semicolon => {
                bail!("{}: unexpected symbol \";\"", tok.loc)
            }
            _ => {
                self.parse_expression(stack)?;
                self.expect(TokenKind::Semicolon, "\";\"")?;
                Ok(())
            }
        }
    }

    fn parse_local_decl(&mut self, stack: &mut VariableStack) -> Result<()> {
        let at = self.cur_loc();
        let ty = self.parse_type()?;
        if ty == Type::Void {
            bail!("{}: variables cannot have type void", at);
        }
        let name = self.expect_name()?;
        let var = self.declare_local(&ty, &name, stack)?;
        if self.eat(TokenKind::Assign) {
            let rhs = self.parse_expression(stack)?;
            let (rty, rid) = self.load(&rhs)?;
            let value = self.implicit_cast(&ty, &rty, rid, &name.loc)?;
            self.void_op(Op::Store, &[var.id, value]);
        }
        self.expect(TokenKind::Semicolon, "\";\"")?;
        Ok(())
    }

    pub(crate) fn declare_local(
        &mut self,
        ty: &Type,
        name: &Token,
        stack: &mut VariableStack,
    ) -> Result<Variable> {
        if stack.defined_in_current_frame(&name.lexeme) {
            bail!("{}: redefinition of variable \"{}\"", name.loc, name.lexeme);
        }
        if stack.shadows_outer(&name.lexeme) {
            self.diags.warning(
                &name.loc,
                format!("overriding local variable \"{}\"", name.lexeme),
            );
        }
        if stack.shadows_param(&name.lexeme) {
            self.diags
                .warning(&name.loc, format!("overriding parameter \"{}\"", name.lexeme));
        }
        if self.globals.iter().any(|v| v.name == name.lexeme) {
            self.diags.warning(
                &name.loc,
                format!("overriding global variable \"{}\"", name.lexeme),
            );
        }

        let ptr = self
            .module
            .pointer_type_id(ty, VariableScope::Function.storage_class());
        let id = self.module.alloc_id();
        let inst = InstructionBuilder::new(Op::Variable)
            .push(ptr)
            .push(id)
            .push(VariableScope::Function.storage_class() as u32)
            .build();
        let var = Variable {
            name: name.lexeme.clone(),
            ty: ty.clone(),
            scope: VariableScope::Function,
            is_const: false,
            id,
        };
        stack.declare(var.clone(), inst);
        Ok(var)
    }

    fn parse_return(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        let kw = self.advance()?;
        if self.eat(TokenKind::Semicolon) {
            if *ret != Type::Void {
                bail!(
                    "{}: function must return a value matching its return type {}",
                    kw.loc,
                    ret
                );
            }
            self.void_op(Op::Return, &[]);
            return Ok(());
        }
        if *ret == Type::Void {
            bail!(
                "{}: unexpected expression, function has return type void",
                kw.loc
            );
        }
        let value = self.parse_expression(stack)?;
        self.expect(TokenKind::Semicolon, "\";\"")?;
        let (vty, vid) = self.load(&value)?;
        let vid = self.implicit_cast(ret, &vty, vid, &kw.loc)?;
        self.void_op(Op::ReturnValue, &[vid]);
        Ok(())
    }

    /// Parse `(EXPR)` and coerce the result to `Bool` through a zero
    /// compare when it is an `Int` or `Float` scalar.
    fn parse_condition(&mut self, stack: &mut VariableStack) -> Result<u32> {
        let open = self.expect(TokenKind::ParenOpen, "\"(\"")?;
        let cond = self.parse_expression(stack)?;
        self.expect(TokenKind::ParenClose, "\")\"")?;
        self.coerce_condition(cond, &open.loc)
    }

    fn coerce_condition(&mut self, cond: Operand, loc: &Loc) -> Result<u32> {
        let (cty, cid) = self.load(&cond)?;
        match cty {
            Type::Bool => Ok(cid),
            Type::Int { .. } | Type::Float { .. } => self.cast(&Type::Bool, &cty, cid, loc),
            _ => bail!(
                "{}: expression must result in a scalar bool, int or float type, is \"{}\"",
                loc,
                cty
            ),
        }
    }

    /// `if (cond) ...` with a selection merge; labels are emitted in
    /// true/false/merge order.
    fn parse_if(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        self.advance()?;
        let cond = self.parse_condition(stack)?;

        let true_label = self.module.alloc_id();
        let false_label = self.module.alloc_id();
        let merge = self.module.alloc_id();

        self.void_op(Op::SelectionMerge, &[merge, 0]);
        self.void_op(Op::BranchConditional, &[cond, true_label, false_label]);
        self.label(true_label);
        self.parse_branch_body(ret, stack)?;
        self.branch_if_open(merge);

        self.label(false_label);
        if self.eat(TokenKind::Else) {
            self.parse_branch_body(ret, stack)?;
        }
        self.branch_if_open(merge);

        self.label(merge);
        Ok(())
    }

    fn parse_branch_body(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        if self.peek_kind() == Some(TokenKind::BraceOpen) {
            self.advance()?;
            self.parse_block(ret, stack)
        } else {
            self.parse_statement(ret, stack)
        }
    }

    /// `while (cond) ...` as a structured loop: header with the merge
    /// declaration, a condition block, the body, a continue block that
    /// branches back to the header, and the merge block.
    fn parse_while(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        self.advance()?;

        let header = self.module.alloc_id();
        let cond_label = self.module.alloc_id();
        let body = self.module.alloc_id();
        let cont = self.module.alloc_id();
        let merge = self.module.alloc_id();

        self.branch_if_open(header);
        self.label(header);
        self.void_op(Op::LoopMerge, &[merge, cont, 0]);
        self.void_op(Op::Branch, &[cond_label]);
        self.label(cond_label);
        let cond = self.parse_condition(stack)?;
        self.void_op(Op::BranchConditional, &[cond, body, merge]);

        self.label(body);
        self.loops.push(LoopCtx { merge, cont });
        let result = self.parse_branch_body(ret, stack);
        self.loops.pop();
        result?;
        self.branch_if_open(cont);

        self.label(cont);
        self.void_op(Op::Branch, &[header]);
        self.label(merge);
        Ok(())
    }

    /// `for (init; cond; step) ...`. The step expression textually precedes
    /// the body but belongs in the continue block, so its token range is
    /// skipped and replayed after the body.
    fn parse_for(&mut self, ret: &Type, stack: &mut VariableStack) -> Result<()> {
        self.advance()?;
        self.expect(TokenKind::ParenOpen, "\"(\"")?;
        stack.push_frame();

        if !self.eat(TokenKind::Semicolon) {
            if self.at_type() {
                self.parse_local_decl(stack)?;
            } else {
                self.parse_expression(stack)?;
                self.expect(TokenKind::Semicolon, "\";\"")?;
            }
        }

        let header = self.module.alloc_id();
        let cond_label = self.module.alloc_id();
        let body = self.module.alloc_id();
        let cont = self.module.alloc_id();
        let merge = self.module.alloc_id();

        self.branch_if_open(header);
        self.label(header);
        self.void_op(Op::LoopMerge, &[merge, cont, 0]);
        self.void_op(Op::Branch, &[cond_label]);
        self.label(cond_label);
        let cond = if self.eat(TokenKind::Semicolon) {
            self.module.constant_bool(true)
        } else {
            let loc = self.cur_loc();
            let cond = self.parse_expression(stack)?;
            self.expect(TokenKind::Semicolon, "\";\"")?;
            self.coerce_condition(cond, &loc)?
        };
        self.void_op(Op::BranchConditional, &[cond, body, merge]);

        // Remember the step tokens, then skip to the closing parenthesis.
        let step_start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                Some(TokenKind::ParenOpen) => depth += 1,
                Some(TokenKind::ParenClose) if depth == 0 => break,
                Some(TokenKind::ParenClose) => depth -= 1,
                Some(_) => {}
                None => bail!("{}: \"(\" needs a closing \")\"", self.eof_loc()),
            }
            self.pos += 1;
        }
        let step_end = self.pos;
        self.advance()?; // the ')'

        self.label(body);
        self.loops.push(LoopCtx { merge, cont });
        let result = self.parse_branch_body(ret, stack);
        self.loops.pop();
        result?;
        self.branch_if_open(cont);

        self.label(cont);
        if step_end > step_start {
            let saved = self.pos;
            self.pos = step_start;
            self.parse_expression(stack)?;
            self.pos = saved;
        }
        self.void_op(Op::Branch, &[header]);
        self.label(merge);
        stack.pop_frame();
        Ok(())
    }

    fn parse_loop_jump(&mut self, tok: &Token) -> Result<()> {
        self.advance()?;
        self.expect(TokenKind::Semicolon, "\";\"")?;
        let target = match self.loops.last() {
            Some(ctx) if tok.kind == TokenKind::Break => ctx.merge,
            Some(ctx) => ctx.cont,
            None => bail!(
                "{}: \"{}\" outside of a loop",
                tok.loc,
                tok.lexeme
            ),
        };
        self.void_op(Op::Branch, &[target]);
        // Anything that follows in this block is unreachable but still needs
        // a block to live in.
        let dead = self.module.alloc_id();
        self.label(dead);
        Ok(())
    }

    // ---- finalization -----------------------------------------------------

    fn finish(self) -> Result<CompileOutput> {
        let mains = self
            .funcs
            .iter()
            .filter(|f| f.name == "main")
            .collect::<Vec<_>>();
        let main = match mains.len() {
            0 => bail!("no main function defined"),
            1 => mains[0],
            _ => bail!("multiple main functions defined"),
        };
        if !main.defined {
            bail!("main function is declared but not defined");
        }

        let mut interface = Vec::new();
        for scope in [VariableScope::Out, VariableScope::In].iter() {
            for var in self.globals.iter().filter(|v| v.scope == *scope) {
                interface.push(var.id);
            }
        }

        let spv = self
            .module
            .serialize(self.opts.stage, main.id, &interface, self.opts.debug_info);
        Ok(CompileOutput {
            spv,
            warnings: self.diags.warning_count(),
        })
    }
}

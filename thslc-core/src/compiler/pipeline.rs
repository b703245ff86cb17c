//! Shader interface declarations: `layout(...)` blocks, uniform buffers,
//! samplers, `in`/`out` variables and stage builtin bindings.
use anyhow::bail;
use spirv::{BuiltIn, Decoration};

use crate::error::Result;
use crate::opts::Stage;
use crate::sym::{Variable, VariableScope};
use crate::token::{Literal, TokenKind};
use crate::ty::Type;

use super::Compiler;

struct Builtin {
    name: &'static str,
    scope: VariableScope,
    stage: Stage,
    builtin: BuiltIn,
}

#[rustfmt::skip]
const BUILTINS: &[Builtin] = &[
    Builtin { name: "THSL_Position",    scope: VariableScope::Out, stage: Stage::Vertex,   builtin: BuiltIn::Position },
    Builtin { name: "THSL_PointSize",   scope: VariableScope::Out, stage: Stage::Vertex,   builtin: BuiltIn::PointSize },
    Builtin { name: "THSL_VertexId",    scope: VariableScope::In,  stage: Stage::Vertex,   builtin: BuiltIn::VertexId },
    Builtin { name: "THSL_InstanceId",  scope: VariableScope::In,  stage: Stage::Vertex,   builtin: BuiltIn::InstanceId },
    Builtin { name: "THSL_FragCoord",   scope: VariableScope::In,  stage: Stage::Fragment, builtin: BuiltIn::FragCoord },
    Builtin { name: "THSL_PointCoord",  scope: VariableScope::In,  stage: Stage::Fragment, builtin: BuiltIn::PointCoord },
    Builtin { name: "THSL_FrontFacing", scope: VariableScope::In,  stage: Stage::Fragment, builtin: BuiltIn::FrontFacing },
    Builtin { name: "THSL_FragDepth",   scope: VariableScope::Out, stage: Stage::Fragment, builtin: BuiltIn::FragDepth },
];

impl<'a> Compiler<'a> {
    /// `layout(spec, ...) in|out|uniform ...;` — the specifier set is
    /// validated against the scope: `in`/`out` take exactly `location`,
    /// `uniform` takes exactly `binding` and `set`.
    pub(crate) fn parse_layout(&mut self) -> Result<()> {
        self.advance()?; // layout
        self.expect(TokenKind::ParenOpen, "\"(\"")?;

        let mut location: Option<u32> = None;
        let mut binding: Option<u32> = None;
        let mut set: Option<u32> = None;
        loop {
            let spec = self.expect_name()?;
            let slot = match spec.lexeme.as_str() {
                "location" => &mut location,
                "binding" => &mut binding,
                "set" => &mut set,
                _ => bail!(
                    "{}: unexpected symbol \"{}\" expected \"location\", \"binding\" or \"set\"",
                    spec.loc,
                    spec.lexeme
                ),
            };
            if slot.is_some() {
                bail!(
                    "{}: specifier \"{}\" already specified once",
                    spec.loc,
                    spec.lexeme
                );
            }
            self.expect(TokenKind::Assign, "\"=\"")?;
            let value = self.advance()?;
            match value.kind {
                TokenKind::Value(Literal::Int { value: v, .. }) => *slot = Some(v as u32),
                _ => bail!(
                    "{}: unexpected symbol \"{}\" expected a valid value",
                    value.loc,
                    value.lexeme
                ),
            }
            let delim = self.advance()?;
            match delim.kind {
                TokenKind::Comma => continue,
                TokenKind::ParenClose => break,
                _ => bail!(
                    "{}: unexpected symbol \"{}\" expected \")\"",
                    delim.loc,
                    delim.lexeme
                ),
            }
        }

        let scope_tok = self.advance()?;
        match scope_tok.kind {
            TokenKind::In | TokenKind::Out => {
                let scope = if scope_tok.kind == TokenKind::In {
                    VariableScope::In
                } else {
                    VariableScope::Out
                };
                if binding.is_some() {
                    bail!(
                        "{}: specifier \"binding\" cannot be used on \"{}\"",
                        scope_tok.loc,
                        scope_tok.lexeme
                    );
                }
                if set.is_some() {
                    bail!(
                        "{}: specifier \"set\" cannot be used on \"{}\"",
                        scope_tok.loc,
                        scope_tok.lexeme
                    );
                }
                let location = match location {
                    Some(location) => location,
                    None => bail!(
                        "{}: specifier \"location\" must be set",
                        scope_tok.loc
                    ),
                };
                let ty = self.parse_type()?;
                let name = self.expect_name()?;
                self.expect(TokenKind::Semicolon, "\";\"")?;
                let var = self.declare_global(ty, scope, &name, None)?;
                self.module
                    .decorate(var.id, Decoration::Location, &[location]);
            }
            TokenKind::Uniform => {
                if location.is_some() {
                    bail!(
                        "{}: specifier \"location\" cannot be used on \"uniform\"",
                        scope_tok.loc
                    );
                }
                let binding = match binding {
                    Some(binding) => binding,
                    None => bail!("{}: specifier \"binding\" must be set", scope_tok.loc),
                };
                let set = match set {
                    Some(set) => set,
                    None => bail!("{}: specifier \"set\" must be set", scope_tok.loc),
                };

                let var = if matches!(self.peek_kind(), Some(TokenKind::TypeSampler { .. })) {
                    let ty = self.parse_type()?;
                    let name = self.expect_name()?;
                    self.expect(TokenKind::Semicolon, "\";\"")?;
                    self.declare_global(ty, VariableScope::UniformConstant, &name, None)?
                } else {
                    self.parse_uniform_block()?
                };
                self.module.decorate(var.id, Decoration::Binding, &[binding]);
                self.module
                    .decorate(var.id, Decoration::DescriptorSet, &[set]);
            }
            _ => bail!(
                "{}: unexpected symbol \"{}\" expected \"in\", \"out\" or \"uniform\"",
                scope_tok.loc,
                scope_tok.lexeme
            ),
        }
        Ok(())
    }

    /// `uniform NAME { TYPE MEMBER; ... };` — the block's struct type is
    /// registered under a `_uniform_type` suffix so the variable itself can
    /// carry the block's name.
    fn parse_uniform_block(&mut self) -> Result<Variable> {
        let name = self.expect_name()?;
        let registry_name = format!("{}_uniform_type", name.lexeme);
        let st = self.parse_struct_body(&registry_name, &name.loc)?;
        let ty = Type::Struct(st);
        let type_id = self.module.type_id(&ty);
        self.module.decorate(type_id, Decoration::Block, &[]);
        let var = self.declare_global(ty, VariableScope::Uniform, &name, None)?;
        Ok(var)
    }

    /// `in|out TYPE NAME = THSL_*;` — binds a stage builtin; the builtin's
    /// direction and stage must match the declaration and the compile.
    pub(crate) fn parse_stage_builtin(&mut self, scope: VariableScope) -> Result<()> {
        self.advance()?; // in | out
        let ty = self.parse_type()?;
        let name = self.expect_name()?;
        self.expect(TokenKind::Assign, "\"=\"")?;
        let intrin = self.expect_name()?;
        self.expect(TokenKind::Semicolon, "\";\"")?;

        let var = self.declare_global(ty, scope, &name, None)?;
        let builtin = match BUILTINS.iter().find(|b| b.name == intrin.lexeme) {
            Some(builtin) => builtin,
            None => bail!(
                "{}: \"{}\" is not a valid stage builtin",
                intrin.loc,
                intrin.lexeme
            ),
        };
        if builtin.scope != var.scope {
            bail!(
                "{}: builtin {} must be an {} variable",
                intrin.loc,
                builtin.name,
                match builtin.scope {
                    VariableScope::Out => "output",
                    _ => "input",
                }
            );
        }
        if builtin.stage != self.opts.stage {
            bail!(
                "{}: builtin {} cannot be used in a {} shader",
                intrin.loc,
                builtin.name,
                match self.opts.stage {
                    Stage::Vertex => "vertex",
                    Stage::Fragment => "fragment",
                }
            );
        }
        self.module
            .decorate(var.id, Decoration::BuiltIn, &[builtin.builtin as u32]);
        Ok(())
    }
}

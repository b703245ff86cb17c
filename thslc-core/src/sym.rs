//! Symbols: variables, function parameters, function declarations and the
//! frame-structured local variable stack.
use spirv::StorageClass;

use crate::instr::Instruction;
use crate::ty::Type;

/// Where a variable lives. Maps 1:1 onto a SPIR-V storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    In,
    Out,
    Uniform,
    /// Combined image/samplers.
    UniformConstant,
    Private,
    Function,
}

impl VariableScope {
    pub fn storage_class(self) -> StorageClass {
        match self {
            VariableScope::In => StorageClass::Input,
            VariableScope::Out => StorageClass::Output,
            VariableScope::Uniform => StorageClass::Uniform,
            VariableScope::UniformConstant => StorageClass::UniformConstant,
            VariableScope::Private => StorageClass::Private,
            VariableScope::Function => StorageClass::Function,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub scope: VariableScope,
    pub is_const: bool,
    /// Id of the OpVariable.
    pub id: u32,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub is_const: bool,
    pub by_ref: bool,
    /// Id of the OpFunctionParameter.
    pub id: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub return_ty: Type,
    pub params: Vec<Param>,
    pub type_id: u32,
    pub id: u32,
    pub defined: bool,
    /// OpFunction and OpFunctionParameter instructions, held back until the
    /// function is defined.
    pub decl_instrs: Vec<Instruction>,
}

impl FunctionDecl {
    /// Canonical signature used for overload matching and diagnostics:
    /// name, parameter type strings, const and reference qualifiers.
    pub fn signature(&self) -> String {
        signature(&self.name, &self.params)
    }
}

pub fn signature(name: &str, params: &[Param]) -> String {
    let mut out = String::from(name);
    out.push('(');
    for (i, p) in params.iter().enumerate() {
        if i != 0 {
            out.push_str(", ");
        }
        if p.is_const {
            out.push_str("const ");
        }
        out.push_str(&p.ty.to_string());
        if p.by_ref {
            out.push('&');
        }
    }
    out.push(')');
    out
}

/// Stack of lexical frames holding the local variables of the function being
/// parsed. `OpVariable` instructions are collected aside so the function
/// prologue can hoist them into the entry block.
pub struct VariableStack {
    vars: Vec<Variable>,
    frames: Vec<usize>,
    params: Vec<Param>,
    pub var_instrs: Vec<Instruction>,
}

impl VariableStack {
    pub fn new(params: Vec<Param>) -> Self {
        VariableStack {
            vars: Vec::new(),
            frames: vec![0],
            params,
            var_instrs: Vec::new(),
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(self.vars.len());
    }

    pub fn pop_frame(&mut self) {
        let offset = self.frames.pop().unwrap_or(0);
        self.vars.truncate(offset);
    }

    pub fn declare(&mut self, var: Variable, inst: Instruction) {
        self.vars.push(var);
        self.var_instrs.push(inst);
    }

    /// Innermost-outward lookup over live frames.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().rev().find(|v| v.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// True if `name` is already taken in the current frame (an error at the
    /// caller); outer-frame and parameter hits are shadowing only.
    pub fn defined_in_current_frame(&self, name: &str) -> bool {
        let offset = *self.frames.last().unwrap_or(&0);
        self.vars[offset..].iter().any(|v| v.name == name)
    }

    pub fn shadows_outer(&self, name: &str) -> bool {
        let offset = *self.frames.last().unwrap_or(&0);
        self.vars[..offset].iter().any(|v| v.name == name)
    }

    pub fn shadows_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dummy_var(name: &str) -> Variable {
        Variable {
            name: name.to_owned(),
            ty: Type::i32(),
            scope: VariableScope::Function,
            is_const: false,
            id: 1,
        }
    }

    fn dummy_inst() -> Instruction {
        crate::instr::InstructionBuilder::new(spirv::Op::Nop).build()
    }

    #[test]
    fn test_frames_bound_lifetime() {
        let mut stack = VariableStack::new(Vec::new());
        stack.push_frame();
        stack.declare(dummy_var("a"), dummy_inst());
        assert!(stack.get("a").is_some());
        stack.push_frame();
        stack.declare(dummy_var("b"), dummy_inst());
        assert!(stack.get("a").is_some());
        assert!(stack.get("b").is_some());
        assert!(!stack.defined_in_current_frame("a"));
        assert!(stack.shadows_outer("a"));
        stack.pop_frame();
        assert!(stack.get("b").is_none());
        stack.pop_frame();
        assert!(stack.get("a").is_none());
    }

    #[test]
    fn test_signature_strings() {
        let params = vec![
            Param {
                name: "a".to_owned(),
                ty: Type::vector(Type::f32(), 3),
                is_const: true,
                by_ref: false,
                id: 0,
            },
            Param {
                name: "b".to_owned(),
                ty: Type::f32(),
                is_const: false,
                by_ref: true,
                id: 0,
            },
        ];
        assert_eq!(signature("f", &params), "f(const vec3<f32>, f32&)");
        assert_eq!(signature("g", &[]), "g()");
    }
}

//! GLSL.std.450 extended instructions and the `texture` builtin.
use anyhow::bail;
use spirv::{Dim, Op};

use crate::error::Result;
use crate::token::Token;
use crate::ty::Type;

use super::expr::{Operand, OperandKind};
use super::Compiler;

/// Per-argument category of an extended instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ArgCat {
    None,
    /// Float scalar or float vector.
    FloatVS,
    /// Integer scalar or integer vector.
    IntVS,
    /// Square float matrix.
    FloatMat,
    /// Float scalar only.
    FloatScalar,
    /// Pointer to a float scalar or vector (out parameter).
    FloatVSRef,
    /// Pointer to an integer scalar or vector (out parameter).
    IntVSRef,
}

struct ExtFn {
    name: &'static str,
    opcode: u32,
    args: [ArgCat; 3],
}

/// The GLSL.std.450 instruction numbers are not exported by the `spirv`
/// crate, so they live here next to their argument categories.
#[rustfmt::skip]
const EXT_FNS: &[ExtFn] = &[
    ExtFn { name: "round",       opcode: 1,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "roundeven",   opcode: 2,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "trunc",       opcode: 3,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "fabs",        opcode: 4,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "sabs",        opcode: 5,  args: [ArgCat::IntVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "fsign",       opcode: 6,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "ssign",       opcode: 7,  args: [ArgCat::IntVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "floor",       opcode: 8,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "ceil",        opcode: 9,  args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "fract",       opcode: 10, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "radians",     opcode: 11, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "degrees",     opcode: 12, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "sin",         opcode: 13, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "cos",         opcode: 14, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "tan",         opcode: 15, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "asin",        opcode: 16, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "acos",        opcode: 17, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "atan",        opcode: 18, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "sinh",        opcode: 19, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "cosh",        opcode: 20, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "tanh",        opcode: 21, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "asinh",       opcode: 22, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "acosh",       opcode: 23, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "atanh",       opcode: 24, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "atan2",       opcode: 25, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "pow",         opcode: 26, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "exp",         opcode: 27, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "log",         opcode: 28, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "exp2",        opcode: 29, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "log2",        opcode: 30, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "sqrt",        opcode: 31, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "invsqrt",     opcode: 32, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "determinant", opcode: 33, args: [ArgCat::FloatMat, ArgCat::None, ArgCat::None] },
    ExtFn { name: "inverse",     opcode: 34, args: [ArgCat::FloatMat, ArgCat::None, ArgCat::None] },
    ExtFn { name: "modf",        opcode: 35, args: [ArgCat::FloatVS, ArgCat::FloatVSRef, ArgCat::None] },
    ExtFn { name: "fmin",        opcode: 37, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "umin",        opcode: 38, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::None] },
    ExtFn { name: "smin",        opcode: 39, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::None] },
    ExtFn { name: "fmax",        opcode: 40, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "umax",        opcode: 41, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::None] },
    ExtFn { name: "smax",        opcode: 42, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::None] },
    ExtFn { name: "fclamp",      opcode: 43, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatVS] },
    ExtFn { name: "uclamp",      opcode: 44, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::IntVS] },
    ExtFn { name: "sclamp",      opcode: 45, args: [ArgCat::IntVS, ArgCat::IntVS, ArgCat::IntVS] },
    ExtFn { name: "fmix",        opcode: 46, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatVS] },
    ExtFn { name: "step",        opcode: 48, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "sstep",       opcode: 49, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatVS] },
    ExtFn { name: "fma",         opcode: 50, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatVS] },
    ExtFn { name: "frexp",       opcode: 51, args: [ArgCat::FloatVS, ArgCat::IntVSRef, ArgCat::None] },
    ExtFn { name: "ldexp",       opcode: 53, args: [ArgCat::FloatVS, ArgCat::IntVS, ArgCat::None] },
    ExtFn { name: "length",      opcode: 66, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "distance",    opcode: 67, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "cross",       opcode: 68, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "normalize",   opcode: 69, args: [ArgCat::FloatVS, ArgCat::None, ArgCat::None] },
    ExtFn { name: "fforward",    opcode: 70, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatVS] },
    ExtFn { name: "reflect",     opcode: 71, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::None] },
    ExtFn { name: "refract",     opcode: 72, args: [ArgCat::FloatVS, ArgCat::FloatVS, ArgCat::FloatScalar] },
];

impl ExtFn {
    fn arity(&self) -> usize {
        self.args.iter().filter(|c| **c != ArgCat::None).count()
    }

    /// Result type of the call: `length` and `distance` collapse to the
    /// component scalar, `determinant` to the matrix component; everything
    /// else returns its first argument's type.
    fn result_ty(&self, first: &Type) -> Type {
        match self.opcode {
            33 | 66 | 67 => first.component().clone(),
            _ => first.clone(),
        }
    }
}

impl<'a> Compiler<'a> {
    /// Dispatch `name(args...)` against the extended instruction table.
    /// Returns `None` when the name is not an intrinsic so user-function
    /// dispatch can take over.
    pub(crate) fn ext_call(
        &mut self,
        name: &Token,
        args: &[Operand],
    ) -> Result<Option<Operand>> {
        let decl = match EXT_FNS.iter().find(|f| f.name == name.lexeme) {
            Some(decl) => decl,
            None => return Ok(None),
        };
        if decl.arity() != args.len() {
            bail!(
                "{}: function \"{}\" doesn't take {} arguments",
                name.loc,
                name.lexeme,
                args.len()
            );
        }

        let mut ids = Vec::with_capacity(args.len());
        let mut result_ty = None;
        for (i, (arg, cat)) in args.iter().zip(decl.args.iter()).enumerate() {
            let ety = arg.effective_ty();
            match cat {
                ArgCat::FloatVS => {
                    if !matches!(ety.component(), Type::Float { .. }) || ety.is_matrix() {
                        bail!(
                            "{}: argument {} of \"{}\" must be a vector or scalar of type float",
                            name.loc,
                            i,
                            name.lexeme
                        );
                    }
                }
                ArgCat::IntVS => {
                    if !matches!(ety.component(), Type::Int { .. }) || ety.is_matrix() {
                        bail!(
                            "{}: argument {} of \"{}\" must be a vector or scalar of type integer",
                            name.loc,
                            i,
                            name.lexeme
                        );
                    }
                }
                ArgCat::FloatScalar => {
                    if !matches!(ety, Type::Float { .. }) {
                        bail!(
                            "{}: argument {} of \"{}\" must be a scalar of type float",
                            name.loc,
                            i,
                            name.lexeme
                        );
                    }
                }
                ArgCat::FloatMat => {
                    if !ety.is_matrix()
                        || !matches!(ety.component(), Type::Float { .. })
                        || ety.rows() != ety.columns()
                    {
                        bail!(
                            "{}: argument {} of \"{}\" must be a square matrix of type float",
                            name.loc,
                            i,
                            name.lexeme
                        );
                    }
                }
                ArgCat::FloatVSRef | ArgCat::IntVSRef => {
                    let want_int = *cat == ArgCat::IntVSRef;
                    let is_int = matches!(arg.ty.component(), Type::Int { .. });
                    if !matches!(arg.kind, OperandKind::Pointer { is_const: false, .. })
                        || !arg.swizzle.is_empty()
                        || arg.ty.is_matrix()
                        || want_int != is_int
                    {
                        bail!(
                            "{}: argument {} of \"{}\" must be a writable variable",
                            name.loc,
                            i,
                            name.lexeme
                        );
                    }
                    // Out parameters pass the pointer itself.
                    ids.push(arg.id);
                    if result_ty.is_none() {
                        result_ty = Some(arg.ty.clone());
                    }
                    continue;
                }
                ArgCat::None => unreachable!(),
            }
            let (ty, id) = self.load(arg)?;
            ids.push(id);
            if result_ty.is_none() {
                result_ty = Some(ty);
            }
        }

        let first_ty = match result_ty {
            Some(ty) => ty,
            None => bail!(
                "{}: function \"{}\" takes at least one argument",
                name.loc,
                name.lexeme
            ),
        };
        let result_ty = decl.result_ty(&first_ty);
        let set = self.module.glsl_ext_id();
        let mut operands = vec![set, decl.opcode];
        operands.extend_from_slice(&ids);
        let id = self.result_op(Op::ExtInst, &result_ty, &operands);
        Ok(Some(Operand::rvalue(result_ty, id)))
    }

    /// `texture(sampler, coord)`: an implicit-lod sample returning
    /// `vec4<f32>`; the coordinate arity follows the sampler dimension.
    pub(crate) fn texture_call(&mut self, name: &Token, args: &[Operand]) -> Result<Operand> {
        if args.len() != 2 {
            bail!(
                "{}: function \"texture\" does not take {} arguments",
                name.loc,
                args.len()
            );
        }
        let sampler = &args[0];
        let dim = match (&sampler.ty, &sampler.kind) {
            (Type::SampledImage { image }, OperandKind::Pointer { .. }) => match **image {
                Type::Image { dim } => dim,
                _ => bail!("{}: argument 0 of \"texture\" must be a sampler", name.loc),
            },
            _ => bail!("{}: argument 0 of \"texture\" must be a sampler", name.loc),
        };
        let rows = match dim {
            Dim::Dim1D => 1u8,
            Dim::Dim2D => 2,
            Dim::Dim3D | Dim::DimCube => 3,
            _ => bail!("{}: invalid sampler type", name.loc),
        };

        let coord = &args[1];
        let coord_ty = coord.effective_ty();
        let coord_ok = match rows {
            1 => matches!(coord_ty, Type::Float { .. }),
            n => coord_ty.is_vector()
                && coord_ty.rows() == n
                && matches!(coord_ty.component(), Type::Float { .. }),
        };
        if !coord_ok {
            bail!(
                "{}: argument 1 of \"texture\" must have {} float component(s)",
                name.loc,
                rows
            );
        }

        let (_, sampler_id) = self.load(sampler)?;
        let (_, coord_id) = self.load(coord)?;
        let result_ty = Type::vector(Type::f32(), 4);
        let id = self.result_op(
            Op::ImageSampleImplicitLod,
            &result_ty,
            &[sampler_id, coord_id],
        );
        Ok(Operand::rvalue(result_ty, id))
    }
}

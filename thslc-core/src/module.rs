//! Per-compilation module state: the id allocator, the type/constant
//! interning tables, the ordered instruction sections and the final binary
//! serialization.
use fnv::FnvHashMap;
use spirv::{
    AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, ImageFormat,
    MemoryModel, Op,
};

use crate::error::Result;
use crate::instr::{Instruction, InstructionBuilder, Instrs};
use crate::opts::Stage;
use crate::ty::Type;

/// SPIR-V module magic number.
pub const MAGIC: u32 = 0x0723_0203;
/// Generator magic carried in the module header word 2.
pub const GENERATOR: u32 = 0;
/// SPIR-V 1.3.
pub const VERSION: u32 = 0x0001_0300;

/// Structural fingerprint of a type or constant instruction: the opcode plus
/// every operand word except the result id slot. Two structurally equal
/// definitions hash to the same key and share one id.
#[derive(PartialEq, Eq, Hash)]
struct DedupKey {
    op: u32,
    pre: Vec<u32>,
    post: Vec<u32>,
}

/// All state of one compilation that outlives a single phase. Ids are
/// allocated serially starting at 1 and never reused; `bound()` is the
/// header id-bound.
pub struct Module {
    next_id: u32,
    dedup: FnvHashMap<DedupKey, u32>,
    ty_ids: FnvHashMap<Type, u32>,
    glsl_ext: Option<u32>,
    /// Debug (OpName) instructions, emitted only with debug info enabled.
    pub debug: Vec<Instruction>,
    /// Annotation (decoration) instructions.
    pub annotations: Vec<Instruction>,
    /// Types, constants and global variables, in insertion order.
    pub globals: Vec<Instruction>,
    /// Function declarations and bodies, in definition order.
    pub functions: Vec<Instruction>,
}

impl Default for Module {
    fn default() -> Self {
        Module {
            next_id: 1,
            dedup: FnvHashMap::default(),
            ty_ids: FnvHashMap::default(),
            glsl_ext: None,
            debug: Vec::new(),
            annotations: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Header id-bound: one more than the largest id handed out.
    pub fn bound(&self) -> u32 {
        self.next_id
    }

    /// Intern an instruction of shape `op pre... <result-id> post...` into
    /// the globals section. On a structural hit the existing id is returned
    /// and nothing is emitted.
    fn intern(&mut self, op: Op, pre: &[u32], post: &[u32]) -> u32 {
        let key = DedupKey {
            op: op as u32,
            pre: pre.to_vec(),
            post: post.to_vec(),
        };
        if let Some(&id) = self.dedup.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        let mut b = InstructionBuilder::new(op);
        for &w in pre {
            b = b.push(w);
        }
        b = b.push(id);
        for &w in post {
            b = b.push(w);
        }
        self.globals.push(b.build());
        self.dedup.insert(key, id);
        id
    }

    /// Id of the unique `OpType*` instruction for `ty`, creating it (and its
    /// constituents, depth-first) on first use.
    pub fn type_id(&mut self, ty: &Type) -> u32 {
        if let Some(&id) = self.ty_ids.get(ty) {
            return id;
        }
        let id = match ty {
            Type::Void => self.intern(Op::TypeVoid, &[], &[]),
            Type::Bool => self.intern(Op::TypeBool, &[], &[]),
            // Signedness is dropped here and handled by opcode selection, so
            // i32 and u32 share one OpTypeInt.
            Type::Int { bits, .. } => self.intern(Op::TypeInt, &[], &[*bits as u32, 0]),
            Type::Float { bits } => self.intern(Op::TypeFloat, &[], &[*bits as u32]),
            Type::Vector { component, rows } => {
                let c = self.type_id(component);
                self.intern(Op::TypeVector, &[], &[c, *rows as u32])
            }
            Type::Matrix { column, columns } => {
                let c = self.type_id(column);
                self.intern(Op::TypeMatrix, &[], &[c, *columns as u32])
            }
            Type::Array { element, count } => {
                let e = self.type_id(element);
                let len = self.constant_i32(*count as i32);
                self.intern(Op::TypeArray, &[], &[e, len])
            }
            Type::Struct(st) => {
                let members = st
                    .members
                    .iter()
                    .map(|m| self.type_id(&m.ty))
                    .collect::<Vec<_>>();
                self.intern(Op::TypeStruct, &[], &members)
            }
            Type::Pointer { pointee, storage } => {
                let p = self.type_id(pointee);
                self.intern(Op::TypePointer, &[], &[*storage as u32, p])
            }
            Type::Image { dim } => {
                let sampled = self.type_id(&Type::f32());
                self.intern(
                    Op::TypeImage,
                    &[],
                    &[
                        sampled,
                        *dim as u32,
                        0, // depth
                        0, // arrayed
                        0, // multisampled
                        1, // sampled
                        ImageFormat::Unknown as u32,
                    ],
                )
            }
            Type::SampledImage { image } => {
                let im = self.type_id(image);
                self.intern(Op::TypeSampledImage, &[], &[im])
            }
        };
        self.ty_ids.insert(ty.clone(), id);
        id
    }

    pub fn pointer_type_id(&mut self, pointee: &Type, storage: spirv::StorageClass) -> u32 {
        self.type_id(&Type::pointer(pointee.clone(), storage))
    }

    pub fn function_type_id(&mut self, return_ty: u32, params: &[u32]) -> u32 {
        let mut post = vec![return_ty];
        post.extend_from_slice(params);
        self.intern(Op::TypeFunction, &[], &post)
    }

    /// Scalar constant from its raw words (one word, or two for 64-bit
    /// values, low word first).
    pub fn constant(&mut self, ty: &Type, words: &[u32]) -> u32 {
        let t = self.type_id(ty);
        self.intern(Op::Constant, &[t], words)
    }

    pub fn constant_bool(&mut self, value: bool) -> u32 {
        let t = self.type_id(&Type::Bool);
        let op = if value {
            Op::ConstantTrue
        } else {
            Op::ConstantFalse
        };
        self.intern(op, &[t], &[])
    }

    pub fn constant_i32(&mut self, value: i32) -> u32 {
        self.constant(&Type::i32(), &[value as u32])
    }

    pub fn constant_u32(&mut self, value: u32) -> u32 {
        self.constant(&Type::u32(), &[value])
    }

    pub fn constant_f32(&mut self, value: f32) -> u32 {
        self.constant(&Type::f32(), &[value.to_bits()])
    }

    /// Zero constant of a scalar type, used by bool coercions.
    pub fn zero(&mut self, ty: &Type) -> u32 {
        let words = scalar_words(ty, 0, 0.0);
        self.constant(ty, &words)
    }

    /// One constant of a scalar type, used by increment and decrement. For
    /// decrement pass `int_value = !0` (two's complement -1) or `-1.0`.
    pub fn scalar(&mut self, ty: &Type, int_value: u64, float_value: f64) -> u32 {
        let words = scalar_words(ty, int_value, float_value);
        self.constant(ty, &words)
    }

    pub fn constant_composite(&mut self, ty: &Type, constituents: &[u32]) -> u32 {
        let t = self.type_id(ty);
        self.intern(Op::ConstantComposite, &[t], constituents)
    }

    /// A global `OpVariable` in the globals section. Variables are never
    /// deduplicated.
    pub fn global_variable(
        &mut self,
        ty: &Type,
        storage: spirv::StorageClass,
        init: Option<u32>,
    ) -> u32 {
        let ptr = self.pointer_type_id(ty, storage);
        let id = self.alloc_id();
        let mut b = InstructionBuilder::new(Op::Variable)
            .push(ptr)
            .push(id)
            .push(storage as u32);
        if let Some(init) = init {
            b = b.push(init);
        }
        self.globals.push(b.build());
        id
    }

    pub fn decorate(&mut self, target: u32, decoration: Decoration, operands: &[u32]) {
        let instr = InstructionBuilder::new(Op::Decorate)
            .push(target)
            .push(decoration as u32)
            .push_list(operands)
            .build();
        self.annotations.push(instr);
    }

    pub fn member_decorate(
        &mut self,
        ty: u32,
        member: u32,
        decoration: Decoration,
        operands: &[u32],
    ) {
        let instr = InstructionBuilder::new(Op::MemberDecorate)
            .push(ty)
            .push(member)
            .push(decoration as u32)
            .push_list(operands)
            .build();
        self.annotations.push(instr);
    }

    pub fn debug_name(&mut self, target: u32, name: &str) {
        let instr = InstructionBuilder::new(Op::Name)
            .push(target)
            .push_str(name)
            .build();
        self.debug.push(instr);
    }

    /// Id of the GLSL.std.450 extended instruction set import, allocated on
    /// first use; the OpExtInstImport itself is materialized at
    /// serialization time so it lands before the entry point.
    pub fn glsl_ext_id(&mut self) -> u32 {
        match self.glsl_ext {
            Some(id) => id,
            None => {
                let id = self.alloc_id();
                self.glsl_ext = Some(id);
                id
            }
        }
    }

    /// Assemble the final module: 5-word header, then capabilities / memory
    /// model / entry point / execution modes, debug, annotations, types and
    /// constants and globals, functions.
    pub fn serialize(
        &self,
        stage: Stage,
        main_id: u32,
        interface: &[u32],
        debug_info: bool,
    ) -> SpirvBinary {
        let mut spv = vec![MAGIC, VERSION, GENERATOR, self.bound(), 0];

        let mut push = |instr: Instruction| spv.extend(instr.into_words());

        push(
            InstructionBuilder::new(Op::Capability)
                .push(Capability::Shader as u32)
                .build(),
        );
        if let Some(ext) = self.glsl_ext {
            push(
                InstructionBuilder::new(Op::ExtInstImport)
                    .push(ext)
                    .push_str("GLSL.std.450")
                    .build(),
            );
        }
        push(
            InstructionBuilder::new(Op::MemoryModel)
                .push(AddressingModel::Logical as u32)
                .push(MemoryModel::GLSL450 as u32)
                .build(),
        );
        let model = match stage {
            Stage::Vertex => ExecutionModel::Vertex,
            Stage::Fragment => ExecutionModel::Fragment,
        };
        push(
            InstructionBuilder::new(Op::EntryPoint)
                .push(model as u32)
                .push(main_id)
                .push_str("main")
                .push_list(interface)
                .build(),
        );
        if stage == Stage::Fragment {
            push(
                InstructionBuilder::new(Op::ExecutionMode)
                    .push(main_id)
                    .push(ExecutionMode::OriginLowerLeft as u32)
                    .build(),
            );
        }

        let sections = [
            if debug_info { &self.debug[..] } else { &[] },
            &self.annotations[..],
            &self.globals[..],
            &self.functions[..],
        ];
        for section in sections.iter() {
            for instr in section.iter() {
                spv.extend_from_slice(instr.words());
            }
        }

        SpirvBinary(spv)
    }
}

fn scalar_words(ty: &Type, int_value: u64, float_value: f64) -> Vec<u32> {
    match ty {
        Type::Int { bits: 64, .. } => {
            vec![int_value as u32, (int_value >> 32) as u32]
        }
        Type::Int { .. } => vec![int_value as u32],
        Type::Float { bits: 64 } => {
            let bits = float_value.to_bits();
            vec![bits as u32, (bits >> 32) as u32]
        }
        Type::Float { .. } => vec![(float_value as f32).to_bits()],
        _ => vec![int_value as u32],
    }
}

/// Finished SPIR-V program binary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpirvBinary(Vec<u32>);

impl From<Vec<u32>> for SpirvBinary {
    fn from(x: Vec<u32>) -> Self {
        SpirvBinary(x)
    }
}

impl SpirvBinary {
    pub fn words(&self) -> &[u32] {
        &self.0
    }
    pub fn into_words(self) -> Vec<u32> {
        self.0
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
            .into_iter()
            .flat_map(|w| w.to_le_bytes().to_vec())
            .collect()
    }

    pub fn magic(&self) -> u32 {
        self.0[0]
    }
    pub fn version(&self) -> u32 {
        self.0[1]
    }
    pub fn id_bound(&self) -> u32 {
        self.0[3]
    }

    /// Iterate the instructions after the 5-word header.
    pub fn instrs(&self) -> Result<Instrs> {
        const HEADER_LEN: usize = 5;
        if self.0.len() < HEADER_LEN {
            crate::error::bail!("module is shorter than its header");
        }
        Ok(Instrs::new(&self.0[HEADER_LEN..]))
    }
}

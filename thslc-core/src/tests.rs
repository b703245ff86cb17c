//! End-to-end tests: compile complete shaders and walk the emitted words.
use std::collections::HashSet;

use pretty_assertions::assert_eq;
use spirv::{Decoration, ExecutionMode, ExecutionModel, Op, StorageClass};

use crate::instr::decode_str;
use crate::module::SpirvBinary;
use crate::{CompileOptions, Compiler, Stage};

fn options(stage: Stage) -> CompileOptions {
    CompileOptions {
        stage,
        ..CompileOptions::default()
    }
}

fn compile(stage: Stage, source: &str) -> SpirvBinary {
    Compiler::compile(source, "test.thsl", &options(stage))
        .unwrap_or_else(|e| panic!("compile failed: {}", e))
        .spv
}

fn compile_err(stage: Stage, source: &str) -> String {
    match Compiler::compile(source, "test.thsl", &options(stage)) {
        Ok(_) => panic!("compile unexpectedly succeeded"),
        Err(e) => e.to_string(),
    }
}

/// All instructions of the module as (op, operand words).
fn instrs(spv: &SpirvBinary) -> Vec<(Op, Vec<u32>)> {
    spv.instrs()
        .unwrap()
        .map(|i| {
            let i = i.unwrap();
            (i.op().unwrap(), i.operands().to_vec())
        })
        .collect()
}

fn count(instrs: &[(Op, Vec<u32>)], op: Op) -> usize {
    instrs.iter().filter(|(o, _)| *o == op).count()
}

fn find<'a>(instrs: &'a [(Op, Vec<u32>)], op: Op) -> &'a (Op, Vec<u32>) {
    instrs
        .iter()
        .find(|(o, _)| *o == op)
        .unwrap_or_else(|| panic!("no {:?} in module", op))
}

/// Result id of an instruction, for the instruction shapes this compiler
/// emits.
fn result_id(op: Op, operands: &[u32]) -> Option<u32> {
    match op {
        Op::TypeVoid
        | Op::TypeBool
        | Op::TypeInt
        | Op::TypeFloat
        | Op::TypeVector
        | Op::TypeMatrix
        | Op::TypeArray
        | Op::TypeStruct
        | Op::TypePointer
        | Op::TypeFunction
        | Op::TypeImage
        | Op::TypeSampledImage
        | Op::Label
        | Op::ExtInstImport => Some(operands[0]),
        Op::Capability
        | Op::MemoryModel
        | Op::EntryPoint
        | Op::ExecutionMode
        | Op::Decorate
        | Op::MemberDecorate
        | Op::Name
        | Op::MemberName
        | Op::Store
        | Op::Branch
        | Op::BranchConditional
        | Op::SelectionMerge
        | Op::LoopMerge
        | Op::Return
        | Op::ReturnValue
        | Op::FunctionEnd
        | Op::Unreachable => None,
        _ => Some(operands[1]),
    }
}

const EMPTY_MAIN: &str = "void main() { }";

#[test]
fn test_empty_main_is_minimal() {
    let spv = compile(Stage::Vertex, EMPTY_MAIN);
    let instrs = instrs(&spv);
    assert_eq!(count(&instrs, Op::Label), 1);
    assert_eq!(count(&instrs, Op::Return), 1);
    assert_eq!(count(&instrs, Op::FunctionEnd), 1);
    assert_eq!(count(&instrs, Op::EntryPoint), 1);
    assert_eq!(count(&instrs, Op::Capability), 1);
}

#[test]
fn test_header_fields() {
    let spv = compile(Stage::Vertex, EMPTY_MAIN);
    assert_eq!(spv.magic(), 0x0723_0203);
    assert_eq!(spv.version(), 0x0001_0300);
}

#[test]
fn test_entry_point_names_main() {
    let spv = compile(Stage::Vertex, EMPTY_MAIN);
    let instrs = instrs(&spv);
    let (_, operands) = find(&instrs, Op::EntryPoint);
    assert_eq!(operands[0], ExecutionModel::Vertex as u32);
    let (name, _) = decode_str(&operands[2..]).unwrap();
    assert_eq!(name, "main");
}

#[test]
fn test_fragment_emits_origin_lower_left() {
    let spv = compile(Stage::Fragment, EMPTY_MAIN);
    let fs = instrs(&spv);
    let (_, operands) = find(&fs, Op::ExecutionMode);
    assert_eq!(operands[1], ExecutionMode::OriginLowerLeft as u32);

    let vs = compile(Stage::Vertex, EMPTY_MAIN);
    assert_eq!(count(&instrs(&vs), Op::ExecutionMode), 0);
}

#[test]
fn test_id_bound_is_max_plus_one() {
    let spv = compile(
        Stage::Vertex,
        "layout(location=0) in vec4 pos;\nvoid main() { }",
    );
    let mut max = 0;
    for (op, operands) in instrs(&spv) {
        if let Some(id) = result_id(op, &operands) {
            max = max.max(id);
        }
    }
    assert_eq!(spv.id_bound(), max + 1);
}

#[test]
fn test_result_ids_are_unique() {
    let spv = compile(
        Stage::Vertex,
        "layout(location=0) in vec4 pos;\n\
         out vec4 outPos = THSL_Position;\n\
         void main() { outPos = pos * 2.0; }",
    );
    let mut seen = HashSet::new();
    for (op, operands) in instrs(&spv) {
        if let Some(id) = result_id(op, &operands) {
            assert!(seen.insert(id), "id {} defined twice", id);
        }
    }
}

#[test]
fn test_section_ordering() {
    let spv = compile(
        Stage::Vertex,
        "layout(location=0) in vec4 pos;\n\
         out vec4 outPos = THSL_Position;\n\
         void main() { outPos = pos; }",
    );
    let mut rank = 0;
    for (op, operands) in instrs(&spv) {
        let r = match op {
            Op::Capability | Op::ExtInstImport | Op::MemoryModel | Op::EntryPoint
            | Op::ExecutionMode => 0,
            Op::Decorate | Op::MemberDecorate => 1,
            Op::Variable if operands[2] != StorageClass::Function as u32 => 2,
            op if format!("{:?}", op).starts_with("Type") => 2,
            Op::Constant | Op::ConstantTrue | Op::ConstantFalse | Op::ConstantComposite => 2,
            _ => 3,
        };
        assert!(r >= rank, "{:?} out of section order", op);
        rank = r;
    }
}

#[test]
fn test_deterministic_output() {
    let source = "layout(location=0) in vec4 pos;\n\
                  out vec4 outPos = THSL_Position;\n\
                  void main() { outPos = pos * 0.5; }";
    let a = compile(Stage::Vertex, source);
    let b = compile(Stage::Vertex, source);
    assert_eq!(a.words(), b.words());
}

#[test]
fn test_type_interning_across_declarations() {
    let spv = compile(
        Stage::Vertex,
        "void main() { vec2 a; vec2 b; float32 x; float32 y; }",
    );
    let instrs = instrs(&spv);
    // One OpTypeFloat(32) and one OpTypeVector of it.
    assert_eq!(
        instrs
            .iter()
            .filter(|(o, ops)| *o == Op::TypeFloat && ops[1] == 32)
            .count(),
        1
    );
    assert_eq!(count(&instrs, Op::TypeVector), 1);
}

#[test]
fn test_constant_interning() {
    let spv = compile(
        Stage::Vertex,
        "void main() { float32 a; float32 b; a = 1.5; b = 1.5; }",
    );
    let instrs = instrs(&spv);
    let pattern = 1.5f32.to_bits();
    assert_eq!(
        instrs
            .iter()
            .filter(|(o, ops)| *o == Op::Constant && ops[2] == pattern)
            .count(),
        1
    );
}

// ---- spec scenarios -------------------------------------------------------

#[test]
fn test_vertex_position_passthrough() {
    let spv = compile(
        Stage::Vertex,
        "layout(location=0) in vec4 pos;\n\
         out vec4 outPos = THSL_Position;\n\
         void main() { outPos = pos; }",
    );
    let instrs = instrs(&spv);

    let location = instrs
        .iter()
        .find(|(o, ops)| *o == Op::Decorate && ops[1] == Decoration::Location as u32)
        .expect("no Location decoration");
    assert_eq!(location.1[2], 0);
    let pos_id = location.1[0];

    let builtin = instrs
        .iter()
        .find(|(o, ops)| *o == Op::Decorate && ops[1] == Decoration::BuiltIn as u32)
        .expect("no BuiltIn decoration");
    assert_eq!(builtin.1[2], spirv::BuiltIn::Position as u32);
    let out_id = builtin.1[0];

    // Load from the input, store to the output.
    let load = find(&instrs, Op::Load);
    assert_eq!(load.1[2], pos_id);
    let store = find(&instrs, Op::Store);
    assert_eq!(store.1[0], out_id);
    assert_eq!(store.1[1], load.1[1]);

    // Interface lists the output first, then the input.
    let (_, ep) = find(&instrs, Op::EntryPoint);
    let (_, skip) = decode_str(&ep[2..]).unwrap();
    let interface = &ep[2 + skip..];
    assert_eq!(interface.to_vec(), vec![out_id, pos_id]);
}

#[test]
fn test_uniform_buffer_block() {
    let spv = compile(
        Stage::Vertex,
        "layout(binding=0, set=0) uniform UBO { mat4 mvp; };\nvoid main() { }",
    );
    let instrs = instrs(&spv);

    let (_, st) = find(&instrs, Op::TypeStruct);
    let struct_id = st[0];
    assert!(instrs
        .iter()
        .any(|(o, ops)| *o == Op::Decorate
            && ops[0] == struct_id
            && ops[1] == Decoration::Block as u32));
    assert!(instrs.iter().any(|(o, ops)| *o == Op::MemberDecorate
        && ops[0] == struct_id
        && ops[1] == 0
        && ops[2] == Decoration::Offset as u32
        && ops[3] == 0));

    let binding = instrs
        .iter()
        .find(|(o, ops)| *o == Op::Decorate && ops[1] == Decoration::Binding as u32)
        .expect("no Binding decoration");
    assert_eq!(binding.1[2], 0);
    assert!(instrs
        .iter()
        .any(|(o, ops)| *o == Op::Decorate && ops[1] == Decoration::DescriptorSet as u32));

    // The uniform variable lives in Uniform storage.
    let var = instrs
        .iter()
        .find(|(o, ops)| *o == Op::Variable && ops[2] == StorageClass::Uniform as u32)
        .expect("no uniform variable");
    assert_eq!(var.1[1], binding.1[0]);
}

#[test]
fn test_uniform_member_access() {
    let spv = compile(
        Stage::Vertex,
        "layout(binding=0, set=0) uniform UBO { mat4 mvp; };\n\
         layout(location=0) in vec4 pos;\n\
         out vec4 outPos = THSL_Position;\n\
         void main() { outPos = UBO.mvp * pos; }",
    );
    let instrs = instrs(&spv);
    assert_eq!(count(&instrs, Op::InBoundsAccessChain), 1);
    assert_eq!(count(&instrs, Op::MatrixTimesVector), 1);
}

#[test]
fn test_if_else_with_bool_coercion() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 x; int32 y; x = 3; if (x) y = 1; else y = 2; }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::INotEqual), 1);
    assert_eq!(count(&seq, Op::SelectionMerge), 1);
    assert_eq!(count(&seq, Op::BranchConditional), 1);

    // The conditional branch names the true, false and merge labels, which
    // are then emitted in that order.
    let at = seq
        .iter()
        .position(|(o, _)| *o == Op::SelectionMerge)
        .unwrap();
    let merge = seq[at].1[0];
    assert_eq!(seq[at + 1].0, Op::BranchConditional);
    let true_label = seq[at + 1].1[1];
    let false_label = seq[at + 1].1[2];
    let labels = seq[at..]
        .iter()
        .filter(|(o, _)| *o == Op::Label)
        .map(|(_, ops)| ops[0])
        .collect::<Vec<_>>();
    assert_eq!(labels, [true_label, false_label, merge]);
}

#[test]
fn test_swizzled_assignment_shuffle() {
    let spv = compile(Stage::Vertex, "void main() { vec4 a; vec2 b; a.xy = b; }");
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::VectorShuffle), 1);
    let (_, shuffle) = find(&seq, Op::VectorShuffle);
    // Lanes 0 and 1 come from the stored value, 2 and 3 are preserved.
    assert_eq!(shuffle[4..].to_vec(), vec![4, 5, 2, 3]);

    let at = seq
        .iter()
        .position(|(o, _)| *o == Op::VectorShuffle)
        .unwrap();
    assert_eq!(seq[at + 1].0, Op::Store);
    assert_eq!(seq[at + 1].1[1], shuffle[1]);
}

#[test]
fn test_single_lane_swizzle_uses_composite_insert() {
    let spv = compile(Stage::Vertex, "void main() { vec4 a; a.z = 1.0; }");
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::CompositeInsert), 1);
    assert_eq!(count(&seq, Op::VectorShuffle), 0);
    let (_, insert) = find(&seq, Op::CompositeInsert);
    assert_eq!(insert[4], 2);
}

#[test]
fn test_swizzle_read_is_self_shuffle() {
    let spv = compile(Stage::Vertex, "void main() { vec4 a; vec2 b; b = a.zw; }");
    let seq = instrs(&spv);
    let (_, shuffle) = find(&seq, Op::VectorShuffle);
    assert_eq!(shuffle[2], shuffle[3]);
    assert_eq!(shuffle[4..].to_vec(), vec![2, 3]);
}

#[test]
fn test_preprocessor_condition_selects_branch() {
    let spv = compile(
        Stage::Vertex,
        "#define N 3\n#if N*2 == 6\nvoid main() { }\n#else\n#error \"unreachable\"\n#endif",
    );
    assert_eq!(count(&instrs(&spv), Op::EntryPoint), 1);
}

#[test]
fn test_function_redefinition_is_fatal() {
    let err = compile_err(
        Stage::Vertex,
        "void f() { }\nvoid f() { }\nvoid main() { }",
    );
    assert!(err.contains("redefinition"), "unexpected error: {}", err);
}

// ---- language features ----------------------------------------------------

#[test]
fn test_missing_main_is_fatal() {
    let err = compile_err(Stage::Vertex, "void helper() { }");
    assert!(err.contains("main"), "unexpected error: {}", err);
}

#[test]
fn test_function_call_and_overloads() {
    let spv = compile(
        Stage::Vertex,
        "float32 pick(float32 a) { return a; }\n\
         float32 pick(float32 a, float32 b) { return a + b; }\n\
         void main() { float32 x; x = pick(1.0, 2.0); }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::FunctionCall), 1);
    assert_eq!(count(&seq, Op::Function), 3);
    assert_eq!(count(&seq, Op::FunctionEnd), 3);
}

#[test]
fn test_reference_parameter_receives_pointer() {
    let spv = compile(
        Stage::Vertex,
        "void fill(float32& slot) { slot = 4.0; }\n\
         void main() { float32 v; fill(v); }",
    );
    let seq = instrs(&spv);
    let local = seq
        .iter()
        .find(|(o, ops)| *o == Op::Variable && ops[2] == StorageClass::Function as u32)
        .expect("no local variable");
    let (_, call) = find(&seq, Op::FunctionCall);
    assert_eq!(call[3], local.1[1]);
    // The parameter's type is a pointer.
    let (_, fnty) = find(&seq, Op::TypeFunction);
    let param_ty = fnty[2];
    assert!(seq
        .iter()
        .any(|(o, ops)| *o == Op::TypePointer && ops[0] == param_ty));
}

#[test]
fn test_declaration_then_definition() {
    let spv = compile(
        Stage::Vertex,
        "float32 helper(float32 x);\n\
         void main() { float32 y; y = helper(1.0); }\n\
         float32 helper(float32 x) { return x * 2.0; }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::FunctionCall), 1);
    assert_eq!(count(&seq, Op::FunctionEnd), 2);
}

#[test]
fn test_undefined_main_declaration_is_fatal() {
    let err = compile_err(Stage::Vertex, "void main();");
    assert!(err.contains("not defined"), "unexpected error: {}", err);
}

#[test]
fn test_while_loop_structure() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 i; i = 0; while (i < 10) { i += 1; } }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::LoopMerge), 1);
    let at = seq.iter().position(|(o, _)| *o == Op::LoopMerge).unwrap();
    // The loop merge is attached right after the header label.
    assert_eq!(seq[at - 1].0, Op::Label);
    let header = seq[at - 1].1[0];
    let merge = seq[at].1[0];
    let cont = seq[at].1[1];
    // The continue block branches back to the header.
    let back = seq
        .iter()
        .position(|(o, ops)| *o == Op::Label && ops[0] == cont)
        .unwrap();
    assert_eq!(seq[back + 1].0, Op::Branch);
    assert_eq!(seq[back + 1].1[0], header);
    // The merge label exists and ends the loop.
    assert!(seq
        .iter()
        .any(|(o, ops)| *o == Op::Label && ops[0] == merge));
    assert_eq!(count(&seq, Op::SLessThan), 1);
}

#[test]
fn test_for_loop_with_break_and_continue() {
    let spv = compile(
        Stage::Vertex,
        "void main() {\n\
             int32 s;\n\
             s = 0;\n\
             for (int32 i = 0; i < 8; i++) {\n\
                 if (i == 3) continue;\n\
                 if (i == 6) break;\n\
                 s += i;\n\
             }\n\
         }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::LoopMerge), 1);
    let at = seq.iter().position(|(o, _)| *o == Op::LoopMerge).unwrap();
    let merge = seq[at].1[0];
    let cont = seq[at].1[1];
    // break and continue appear as plain branches to merge and continue.
    assert!(seq
        .iter()
        .any(|(o, ops)| *o == Op::Branch && ops[0] == merge));
    assert!(seq
        .iter()
        .filter(|(o, ops)| *o == Op::Branch && ops[0] == cont)
        .count()
        >= 2);
}

#[test]
fn test_break_outside_loop_is_fatal() {
    let err = compile_err(Stage::Vertex, "void main() { break; }");
    assert!(err.contains("outside of a loop"), "unexpected error: {}", err);
}

#[test]
fn test_intrinsic_emits_ext_inst() {
    let spv = compile(
        Stage::Vertex,
        "void main() { vec3 n; vec3 r; r = normalize(n); }",
    );
    let seq = instrs(&spv);
    let (_, import) = find(&seq, Op::ExtInstImport);
    let (name, _) = decode_str(&import[1..]).unwrap();
    assert_eq!(name, "GLSL.std.450");
    let (_, ext) = find(&seq, Op::ExtInst);
    assert_eq!(ext[2], import[0]);
    assert_eq!(ext[3], 69); // Normalize
}

#[test]
fn test_length_returns_scalar() {
    // length() collapses to the component type; storing it into a float
    // must not need a conversion.
    let spv = compile(
        Stage::Vertex,
        "void main() { vec3 v; float32 l; l = length(v); }",
    );
    let seq = instrs(&spv);
    let (_, ext) = find(&seq, Op::ExtInst);
    assert_eq!(ext[3], 66); // Length
    assert_eq!(count(&seq, Op::FConvert), 0);
}

#[test]
fn test_texture_sampling() {
    let spv = compile(
        Stage::Fragment,
        "layout(binding=0, set=0) uniform sampler2D tex;\n\
         layout(location=0) in vec2 uv;\n\
         layout(location=0) out vec4 color;\n\
         void main() { color = texture(tex, uv); }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::TypeImage), 1);
    assert_eq!(count(&seq, Op::TypeSampledImage), 1);
    assert_eq!(count(&seq, Op::ImageSampleImplicitLod), 1);
    // The sampler variable lives in UniformConstant storage.
    assert!(seq.iter().any(|(o, ops)| *o == Op::Variable
        && ops[2] == StorageClass::UniformConstant as u32));
}

#[test]
fn test_explicit_cast() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 i; float32 f; i = 3; f = (float32)i; }",
    );
    assert_eq!(count(&instrs(&spv), Op::ConvertSToF), 1);
}

#[test]
fn test_implicit_int_to_float() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 i; float32 f; i = 3; f = i; }",
    );
    assert_eq!(count(&instrs(&spv), Op::ConvertSToF), 1);
}

#[test]
fn test_disabled_implicit_conversions_are_fatal() {
    let mut opts = options(Stage::Vertex);
    opts.implicit_conversions = false;
    let err = Compiler::compile(
        "void main() { int32 i; float32 f; f = i; }",
        "test.thsl",
        &opts,
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("implicit conversions are disabled"));
}

#[test]
fn test_unsigned_boundary_constant() {
    let spv = compile(
        Stage::Vertex,
        "void main() { uint32 m; m = 0xFFFFFFFF; }",
    );
    let seq = instrs(&spv);
    assert!(seq
        .iter()
        .any(|(o, ops)| *o == Op::Constant && ops[2] == 0xFFFF_FFFF));
}

#[test]
fn test_signed_unsigned_share_type_instruction() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 a; uint32 b; a = 1; b = 2; }",
    );
    assert_eq!(count(&instrs(&spv), Op::TypeInt), 1);
}

#[test]
fn test_const_global_assignment_is_fatal() {
    let err = compile_err(
        Stage::Vertex,
        "const float32 PI = 3.14;\nvoid main() { PI = 1.0; }",
    );
    assert!(err.contains("constant"), "unexpected error: {}", err);
}

#[test]
fn test_const_global_is_readable() {
    let spv = compile(
        Stage::Vertex,
        "const float32 PI = 3.14;\nvoid main() { float32 x; x = PI * 2.0; }",
    );
    let seq = instrs(&spv);
    // The global carries its initializer on the OpVariable.
    let var = seq
        .iter()
        .find(|(o, ops)| *o == Op::Variable && ops[2] == StorageClass::Private as u32)
        .expect("no private global");
    assert_eq!(var.1.len(), 4);
}

#[test]
fn test_swizzle_with_repeated_lane_is_not_writable() {
    let err = compile_err(Stage::Vertex, "void main() { vec4 a; a.xx = a.yz; }");
    assert!(err.contains("lvalue"), "unexpected error: {}", err);
}

#[test]
fn test_invalid_swizzle_component_is_fatal() {
    let err = compile_err(Stage::Vertex, "void main() { vec2 a; float32 f; f = a.z; }");
    assert!(err.contains("out of range"), "unexpected error: {}", err);
}

#[test]
fn test_unknown_name_is_fatal() {
    let err = compile_err(Stage::Vertex, "void main() { x = 1; }");
    assert!(err.contains("\"x\""), "unexpected error: {}", err);
}

#[test]
fn test_stage_mismatch_builtin_is_fatal() {
    let err = compile_err(
        Stage::Fragment,
        "out vec4 outPos = THSL_Position;\nvoid main() { }",
    );
    assert!(err.contains("THSL_Position"), "unexpected error: {}", err);
}

#[test]
fn test_builtin_direction_mismatch_is_fatal() {
    let err = compile_err(
        Stage::Vertex,
        "in vec4 p = THSL_Position;\nvoid main() { }",
    );
    assert!(err.contains("output"), "unexpected error: {}", err);
}

#[test]
fn test_struct_member_chain() {
    let spv = compile(
        Stage::Vertex,
        "struct Light { vec3 dir; float32 power; };\n\
         void main() { Light l; l.power = 2.0; float32 p; p = l.power; }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::TypeStruct), 1);
    assert_eq!(count(&seq, Op::InBoundsAccessChain), 2);
    // Member offsets: dir at 0, power at 12.
    assert!(seq.iter().any(|(o, ops)| *o == Op::MemberDecorate
        && ops[1] == 1
        && ops[2] == Decoration::Offset as u32
        && ops[3] == 12));
}

#[test]
fn test_array_subscript() {
    let spv = compile(
        Stage::Vertex,
        "void main() { float32[4] values; int32 i; i = 2; values[i] = 1.0; }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::TypeArray), 1);
    assert_eq!(count(&seq, Op::InBoundsAccessChain), 1);
}

#[test]
fn test_vector_constructor_folds_constants() {
    let spv = compile(
        Stage::Vertex,
        "void main() { vec3 v; v = vec3(1.0, 2.0, 3.0); }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::ConstantComposite), 1);
    assert_eq!(count(&seq, Op::CompositeConstruct), 0);
}

#[test]
fn test_vector_constructor_with_runtime_parts() {
    let spv = compile(
        Stage::Vertex,
        "void main() { float32 x; vec3 v; x = 1.0; v = vec3(x, 0.0, 0.0); }",
    );
    let seq = instrs(&spv);
    assert_eq!(count(&seq, Op::CompositeConstruct), 1);
}

#[test]
fn test_constructor_arity_mismatch_is_fatal() {
    let err = compile_err(Stage::Vertex, "void main() { vec3 v; v = vec3(1.0, 2.0); }");
    assert!(err.contains("component count"), "unexpected error: {}", err);
}

#[test]
fn test_shadowing_warns_but_compiles() {
    let source = "float32 x;\nvoid main() { float32 x; x = 1.0; }";
    let out = Compiler::compile(source, "test.thsl", &options(Stage::Vertex)).unwrap();
    assert!(out.warnings > 0);
}

#[test]
fn test_local_redefinition_is_fatal() {
    let err = compile_err(
        Stage::Vertex,
        "void main() { float32 x; float32 x; }",
    );
    assert!(err.contains("redefinition"), "unexpected error: {}", err);
}

#[test]
fn test_postfix_increment_yields_old_value() {
    let spv = compile(
        Stage::Vertex,
        "void main() { int32 i; int32 j; i = 0; j = i++; }",
    );
    let seq = instrs(&spv);
    // j receives the loaded value, and i's store happens after it.
    let load = seq
        .iter()
        .position(|(o, _)| *o == Op::Load)
        .expect("no load");
    let loaded = seq[load].1[1];
    let stores = seq
        .iter()
        .enumerate()
        .filter(|(_, (o, _))| *o == Op::Store)
        .map(|(i, (_, ops))| (i, ops.clone()))
        .collect::<Vec<_>>();
    // i = 0, j = <old i>, i = <old i + 1> in that order.
    assert_eq!(stores.len(), 3);
    assert_eq!(stores[1].1[1], loaded);
}

#[test]
fn test_fp64_default_floats() {
    let mut opts = options(Stage::Vertex);
    opts.fp64_default = true;
    let out = Compiler::compile(
        "void main() { float x; x = 1.0; }",
        "test.thsl",
        &opts,
    )
    .unwrap();
    let seq = instrs(&out.spv);
    assert!(seq
        .iter()
        .any(|(o, ops)| *o == Op::TypeFloat && ops[1] == 64));
}

#[test]
fn test_debug_info_gating() {
    let source = "void main() { }";
    let without = compile(Stage::Vertex, source);
    assert_eq!(count(&instrs(&without), Op::Name), 0);

    let mut opts = options(Stage::Vertex);
    opts.debug_info = true;
    let with = Compiler::compile(source, "test.thsl", &opts).unwrap().spv;
    let seq = instrs(&with);
    assert!(count(&seq, Op::Name) >= 1);
    let (_, name) = find(&seq, Op::Name);
    let (text, _) = decode_str(&name[1..]).unwrap();
    assert_eq!(text, "main");
}

#[test]
fn test_preprocess_only_output() {
    let out = Compiler::preprocess(
        "#define COUNT 4\nint32 n = COUNT;\n",
        "test.thsl",
        &options(Stage::Vertex),
    )
    .unwrap();
    assert!(out.contains("int32 n = 4;"));
    assert!(!out.contains("#define"));
}

#[test]
fn test_ternary_is_reserved() {
    let err = compile_err(
        Stage::Vertex,
        "void main() { int32 x; x = 1 ? 2 : 3; }",
    );
    assert!(err.contains("not supported"), "unexpected error: {}", err);
}

#[test]
fn test_switch_is_reserved() {
    let err = compile_err(
        Stage::Vertex,
        "void main() { int32 x; switch (x) { } }",
    );
    assert!(err.contains("not supported"), "unexpected error: {}", err);
}

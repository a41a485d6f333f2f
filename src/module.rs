//! [`Module`]: the semantic view of one decoded SPIR-V module.
//!
//! Building is a single left-to-right pass over the instruction stream (the
//! SPIR-V section order guarantees debug names and decorations arrive before
//! the types and variables they describe), followed by a reference-resolution
//! pass that fails closed on any dangling id. After `build` returns, the
//! module never changes; emitters and the structurizer only read it.

use crate::spv::{self, HEADER_LEN, Id, Inst, Op, read::ModuleParser};
use crate::{
    Block, Constant, ConstValue, Context, Decoration, DecorationKind, Error, FxIndexMap,
    Function, ImageDim, BuiltIn, Stage, StorageClass, StructMember, Type, TypeKind, Variable,
};
use smallvec::SmallVec;
use std::rc::Rc;

/// Id-keyed tables for one shader module, plus the decoded instruction
/// sequence they index into. Insertion-ordered maps are used wherever the
/// declaration order is semantic (variables drive reflection and binding
/// assignment, functions must be emitted callee-first as decoded).
#[derive(Debug)]
pub struct Module {
    pub cx: Rc<Context>,
    /// The decoded header, kept verbatim for passthrough re-encoding.
    pub header: [u32; HEADER_LEN],
    /// Every decoded instruction, in stream order. [`Block`] ranges index
    /// into this.
    pub insts: Vec<Inst>,

    pub stage: Stage,
    pub entry_point: Id,
    pub entry_name: String,
    /// `OpExecutionMode LocalSize`, for compute targets that re-state it.
    pub local_size: Option<[u32; 3]>,
    /// Result id of `OpExtInstImport "GLSL.std.450"`, if imported.
    pub glsl_std_450: Option<Id>,
    pub ext_imports: FxIndexMap<Id, String>,

    pub types: FxIndexMap<Id, Type>,
    pub consts: FxIndexMap<Id, Constant>,
    /// Module-scope variables, in declaration order.
    pub vars: FxIndexMap<Id, Variable>,
    pub funcs: FxIndexMap<Id, Function>,

    pub names: FxIndexMap<Id, String>,
    pub member_names: FxIndexMap<(Id, u32), String>,
    pub decorations: FxIndexMap<Id, Vec<Decoration>>,
}

impl Module {
    pub fn read_from_spv_bytes(cx: Rc<Context>, spv_bytes: &[u8]) -> Result<Self, Error> {
        Self::build(cx, ModuleParser::read_from_spv_bytes(spv_bytes)?)
    }

    pub fn read_from_spv_words(cx: Rc<Context>, words: Vec<u32>) -> Result<Self, Error> {
        Self::build(cx, ModuleParser::read_from_spv_words(words)?)
    }

    pub fn build(cx: Rc<Context>, parser: ModuleParser) -> Result<Self, Error> {
        Builder::new(cx, parser.header).run(parser)
    }

    // Decoration accessors. All of these scan the (short) per-id record list;
    // emitters cache what they query in loops.

    pub fn decorations_of(&self, id: Id) -> &[Decoration] {
        self.decorations.get(&id).map_or(&[], Vec::as_slice)
    }

    fn u32_decoration(&self, id: Id, pick: impl Fn(&DecorationKind) -> Option<u32>) -> Option<u32> {
        self.decorations_of(id)
            .iter()
            .filter(|d| d.member.is_none())
            .find_map(|d| pick(&d.kind))
    }

    pub fn location(&self, id: Id) -> Option<u32> {
        self.u32_decoration(id, |k| match *k {
            DecorationKind::Location(n) => Some(n),
            _ => None,
        })
    }

    pub fn binding(&self, id: Id) -> Option<u32> {
        self.u32_decoration(id, |k| match *k {
            DecorationKind::Binding(n) => Some(n),
            _ => None,
        })
    }

    pub fn descriptor_set(&self, id: Id) -> Option<u32> {
        self.u32_decoration(id, |k| match *k {
            DecorationKind::DescriptorSet(n) => Some(n),
            _ => None,
        })
    }

    pub fn builtin(&self, id: Id) -> Option<BuiltIn> {
        self.decorations_of(id).iter().find_map(|d| match d.kind {
            DecorationKind::BuiltIn(b) if d.member.is_none() => Some(b),
            _ => None,
        })
    }

    /// `BuiltIn` decoration of member `member` of the struct type `id`
    /// (GLSL front ends wrap `gl_Position` etc. in a per-vertex block).
    pub fn member_builtin(&self, id: Id, member: u32) -> Option<BuiltIn> {
        self.decorations_of(id).iter().find_map(|d| match d.kind {
            DecorationKind::BuiltIn(b) if d.member == Some(member) => Some(b),
            _ => None,
        })
    }

    /// Byte offset of member `member` of the struct type `id`.
    pub fn member_offset(&self, id: Id, member: u32) -> Option<u32> {
        self.decorations_of(id).iter().find_map(|d| match d.kind {
            DecorationKind::Offset(n) if d.member == Some(member) => Some(n),
            _ => None,
        })
    }

    pub fn is_block(&self, id: Id) -> bool {
        self.decorations_of(id).iter().any(|d| {
            matches!(d.kind, DecorationKind::Block | DecorationKind::BufferBlock)
        })
    }

    pub fn name_of(&self, id: Id) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn type_of(&self, id: Id) -> Option<Type> {
        self.types.get(&id).copied()
    }

    /// For a pointer *type id*, the id of its pointee type (decorations and
    /// member names are keyed by id, not by interned handle).
    pub fn pointee_type_id(&self, ptr: Id) -> Option<Id> {
        self.insts
            .iter()
            .find(|i| i.opcode == Op::TYPE_POINTER && i.result_id == Some(ptr))
            .and_then(|i| i.operands.get(1).copied())
            .and_then(Id::new)
    }

    /// The interned type of any value id (variable, constant, or the result
    /// of a body instruction).
    pub fn value_type(&self, id: Id) -> Option<Type> {
        if let Some(v) = self.vars.get(&id) {
            return Some(v.ty);
        }
        if let Some(c) = self.consts.get(&id) {
            return Some(c.ty);
        }
        self.insts
            .iter()
            .find(|i| i.result_id == Some(id))
            .and_then(|i| self.result_type(i))
    }

    /// The value of a scalar integer constant, if `id` names one.
    pub fn const_u32(&self, id: Id) -> Option<u32> {
        match self.consts.get(&id)?.value {
            ConstValue::Uint(n) => u32::try_from(n).ok(),
            ConstValue::Int(n) => u32::try_from(n).ok(),
            _ => None,
        }
    }

    /// The interned result type of a value instruction.
    pub fn result_type(&self, inst: &Inst) -> Option<Type> {
        inst.result_type_id.and_then(|id| self.type_of(id))
    }
}

struct Builder {
    m: Module,
    cur_func: Option<Function>,
    /// `(label, first inst index)` of the block being collected.
    cur_block: Option<(Id, usize)>,
    /// Type instructions whose operands referred forward within the
    /// type/constant preamble; retried as later types land.
    pending_types: Vec<(Inst, usize)>,
    seen_entry_point: bool,
}

impl Builder {
    fn new(cx: Rc<Context>, header: [u32; HEADER_LEN]) -> Self {
        Self {
            m: Module {
                cx,
                header,
                insts: Vec::new(),
                // Placeholders until `OpEntryPoint`; `run` rejects modules
                // that never provide one.
                stage: Stage::Vertex,
                entry_point: Id::new(u32::MAX).unwrap(),
                entry_name: String::new(),
                local_size: None,
                glsl_std_450: None,
                ext_imports: FxIndexMap::default(),
                types: FxIndexMap::default(),
                consts: FxIndexMap::default(),
                vars: FxIndexMap::default(),
                funcs: FxIndexMap::default(),
                names: FxIndexMap::default(),
                member_names: FxIndexMap::default(),
                decorations: FxIndexMap::default(),
            },
            cur_func: None,
            cur_block: None,
            pending_types: Vec::new(),
            seen_entry_point: false,
        }
    }

    fn run(mut self, parser: ModuleParser) -> Result<Module, Error> {
        let bound = self.m.header[3];
        for inst in parser {
            let inst = inst?;
            let idx = self.m.insts.len();
            if let Some(id) = inst.result_id {
                if id.get() >= bound {
                    return Err(Error::malformed(format!(
                        "result id %{id} exceeds the declared bound {bound}"
                    )));
                }
            }
            self.inst(&inst, idx)?;
            self.m.insts.push(inst);
        }
        if self.cur_func.is_some() {
            return Err(Error::malformed("function body never ended"));
        }
        if !self.seen_entry_point {
            return Err(Error::malformed("module declares no entry point"));
        }
        // Anything still deferred points at an id the module never defines;
        // replaying it surfaces the original error with its stream index.
        for (inst, idx) in std::mem::take(&mut self.pending_types) {
            self.type_inst(&inst, idx)?;
        }
        self.resolve_references()?;
        Ok(self.m)
    }

    /// Retry deferred type instructions until no more resolve. Each retry
    /// round either registers at least one type or stops, so the loop is
    /// bounded by the number of deferred instructions.
    fn retry_pending_types(&mut self) {
        loop {
            let mut progressed = false;
            for (inst, idx) in std::mem::take(&mut self.pending_types) {
                match self.type_inst(&inst, idx) {
                    Ok(()) => progressed = true,
                    Err(_) => self.pending_types.push((inst, idx)),
                }
            }
            if !progressed || self.pending_types.is_empty() {
                return;
            }
        }
    }

    fn lookup_type(&self, id: Id, idx: usize) -> Result<Type, Error> {
        self.m
            .types
            .get(&id)
            .copied()
            .ok_or(Error::UnresolvedId { id: id.get(), inst_index: idx })
    }

    fn inst(&mut self, inst: &Inst, idx: usize) -> Result<(), Error> {
        match inst.opcode {
            Op::EXT_INST_IMPORT => {
                let name = spv::extract_literal_string(&inst.operands)?;
                let id = inst.result_id.unwrap();
                if name == "GLSL.std.450" {
                    self.m.glsl_std_450 = Some(id);
                }
                self.m.ext_imports.insert(id, name);
            }
            Op::ENTRY_POINT => {
                if self.seen_entry_point {
                    return Err(Error::malformed("multiple entry points"));
                }
                let model = *inst.operands.first().ok_or_else(|| {
                    Error::malformed("OpEntryPoint missing execution model")
                })?;
                self.m.stage = Stage::from_execution_model(model).ok_or_else(|| {
                    Error::malformed(format!("unknown execution model {model}"))
                })?;
                self.m.entry_point = inst.id_operand(1)?;
                self.m.entry_name = spv::extract_literal_string(&inst.operands[2..])?;
                self.seen_entry_point = true;
            }
            Op::EXECUTION_MODE => {
                // Mode 17 is LocalSize; everything else is advisory here.
                if inst.operands.get(1) == Some(&17) {
                    if let &[x, y, z] = &inst.operands[2..] {
                        self.m.local_size = Some([x, y, z]);
                    }
                }
            }
            Op::NAME => {
                let target = inst.id_operand(0)?;
                let name = spv::extract_literal_string(&inst.operands[1..])?;
                self.m.names.insert(target, name);
            }
            Op::MEMBER_NAME => {
                let target = inst.id_operand(0)?;
                let member = inst.operands[1];
                let name = spv::extract_literal_string(&inst.operands[2..])?;
                self.m.member_names.insert((target, member), name);
            }
            Op::DECORATE => {
                let target = inst.id_operand(0)?;
                let kind = decoration_kind(&inst.operands[1..])?;
                self.m
                    .decorations
                    .entry(target)
                    .or_default()
                    .push(Decoration { member: None, kind });
            }
            Op::MEMBER_DECORATE => {
                let target = inst.id_operand(0)?;
                let member = inst.operands[1];
                let kind = decoration_kind(&inst.operands[2..])?;
                self.m
                    .decorations
                    .entry(target)
                    .or_default()
                    .push(Decoration { member: Some(member), kind });
            }

            op if is_type_op(op) => match self.type_inst(inst, idx) {
                Ok(()) => self.retry_pending_types(),
                // A forward reference inside the preamble; a later type may
                // still satisfy it.
                Err(Error::UnresolvedId { .. }) => {
                    self.pending_types.push((inst.clone(), idx));
                }
                Err(other) => return Err(other),
            },
            // A constant can also unblock a deferred type (array lengths).
            op if is_const_op(op) => {
                self.const_inst(inst, idx)?;
                self.retry_pending_types();
            }

            Op::VARIABLE if self.cur_func.is_none() => {
                let id = inst.result_id.unwrap();
                let type_id = inst.result_type_id.unwrap();
                let ty = self.lookup_type(type_id, idx)?;
                let storage = StorageClass::from_word(inst.operands[0]);
                let initializer = inst.operands.get(1).copied().and_then(Id::new);
                self.m
                    .vars
                    .insert(id, Variable { id, type_id, ty, storage, initializer });
            }

            Op::FUNCTION => {
                if self.cur_func.is_some() {
                    return Err(Error::malformed("nested OpFunction"));
                }
                let id = inst.result_id.unwrap();
                let ret = self.lookup_type(inst.result_type_id.unwrap(), idx)?;
                self.cur_func = Some(Function {
                    id,
                    ret,
                    params: SmallVec::new(),
                    blocks: Vec::new(),
                });
            }
            Op::FUNCTION_PARAMETER => {
                let id = inst.result_id.unwrap();
                let ty = self.lookup_type(inst.result_type_id.unwrap(), idx)?;
                self.cur_func
                    .as_mut()
                    .ok_or_else(|| Error::malformed("OpFunctionParameter outside a function"))?
                    .params
                    .push((id, ty));
            }
            Op::LABEL => {
                if self.cur_func.is_none() {
                    return Err(Error::malformed("OpLabel outside a function"));
                }
                if self.cur_block.is_some() {
                    return Err(Error::malformed("OpLabel inside an unterminated block"));
                }
                // The block's range starts after the label itself.
                self.cur_block = Some((inst.result_id.unwrap(), idx + 1));
            }
            op if is_terminator_op(op) => {
                let (label, start) = self.cur_block.take().ok_or_else(|| {
                    Error::malformed(format!("{op:?} terminator outside a block"))
                })?;
                self.cur_func
                    .as_mut()
                    .unwrap()
                    .blocks
                    .push(Block { label, insts: start..idx + 1 });
            }
            Op::FUNCTION_END => {
                let func = self
                    .cur_func
                    .take()
                    .ok_or_else(|| Error::malformed("OpFunctionEnd outside a function"))?;
                if self.cur_block.is_some() {
                    return Err(Error::malformed("OpFunctionEnd inside an unterminated block"));
                }
                self.m.funcs.insert(func.id, func);
            }

            // Everything else either lives inside a block range (body
            // instructions, merge markers) or carries no semantics the
            // pipeline consumes (capabilities, execution modes, sources).
            _ => {}
        }
        Ok(())
    }

    fn type_inst(&mut self, inst: &Inst, idx: usize) -> Result<(), Error> {
        let id = inst.result_id.unwrap();
        let ops = &inst.operands;
        let kind = match inst.opcode {
            Op::TYPE_VOID => TypeKind::Void,
            Op::TYPE_BOOL => TypeKind::Bool,
            Op::TYPE_INT => TypeKind::Int { width: ops[0], signed: ops[1] != 0 },
            Op::TYPE_FLOAT => TypeKind::Float { width: ops[0] },
            Op::TYPE_VECTOR => TypeKind::Vector {
                elem: self.lookup_type(inst.id_operand(0)?, idx)?,
                count: ops[1],
            },
            Op::TYPE_MATRIX => TypeKind::Matrix {
                column: self.lookup_type(inst.id_operand(0)?, idx)?,
                count: ops[1],
            },
            Op::TYPE_ARRAY => {
                let length_id = inst.id_operand(1)?;
                let length = match self.m.consts.get(&length_id).map(|c| &c.value) {
                    Some(&ConstValue::Uint(n)) => u32::try_from(n).ok(),
                    Some(&ConstValue::Int(n)) => u32::try_from(n).ok(),
                    Some(_) => None,
                    None => {
                        return Err(Error::UnresolvedId {
                            id: length_id.get(),
                            inst_index: idx,
                        });
                    }
                }
                .ok_or_else(|| Error::malformed("array length is not a scalar integer"))?;
                TypeKind::Array {
                    elem: self.lookup_type(inst.id_operand(0)?, idx)?,
                    length: Some(length),
                }
            }
            Op::TYPE_RUNTIME_ARRAY => TypeKind::Array {
                elem: self.lookup_type(inst.id_operand(0)?, idx)?,
                length: None,
            },
            Op::TYPE_STRUCT => {
                let mut members = SmallVec::with_capacity(ops.len());
                for (i, _) in ops.iter().enumerate() {
                    let ty = self.lookup_type(inst.id_operand(i)?, idx)?;
                    let name = self
                        .m
                        .member_names
                        .get(&(id, i as u32))
                        .map(|n| self.m.cx.intern(n.as_str()));
                    members.push(StructMember { name, ty });
                }
                TypeKind::Struct { members }
            }
            Op::TYPE_POINTER => TypeKind::Pointer {
                storage: StorageClass::from_word(ops[0]),
                pointee: self.lookup_type(inst.id_operand(1)?, idx)?,
            },
            Op::TYPE_IMAGE => TypeKind::Image {
                sampled_elem: self.lookup_type(inst.id_operand(0)?, idx)?,
                dim: ImageDim::from_word(ops[1]).ok_or_else(|| {
                    Error::malformed(format!("unsupported image dimensionality {}", ops[1]))
                })?,
                depth: ops[2] == 1,
                arrayed: ops[3] != 0,
            },
            Op::TYPE_SAMPLER => TypeKind::Sampler,
            Op::TYPE_SAMPLED_IMAGE => TypeKind::SampledImage {
                image: self.lookup_type(inst.id_operand(0)?, idx)?,
            },
            Op::TYPE_FUNCTION => {
                let ret = self.lookup_type(inst.id_operand(0)?, idx)?;
                let mut params = SmallVec::with_capacity(ops.len() - 1);
                for i in 1..ops.len() {
                    params.push(self.lookup_type(inst.id_operand(i)?, idx)?);
                }
                TypeKind::Function { ret, params }
            }
            op => unreachable!("non-type opcode {op:?} routed to type_inst"),
        };
        let ty = self.m.cx.intern(kind);
        self.m.types.insert(id, ty);
        Ok(())
    }

    fn const_inst(&mut self, inst: &Inst, idx: usize) -> Result<(), Error> {
        let id = inst.result_id.unwrap();
        let ty = self.lookup_type(inst.result_type_id.unwrap(), idx)?;
        let value = match inst.opcode {
            Op::CONSTANT_TRUE => ConstValue::Bool(true),
            Op::CONSTANT_FALSE => ConstValue::Bool(false),
            Op::CONSTANT_NULL => ConstValue::Null,
            Op::CONSTANT_COMPOSITE => {
                let mut parts = SmallVec::with_capacity(inst.operands.len());
                for (i, _) in inst.operands.iter().enumerate() {
                    parts.push(inst.id_operand(i)?);
                }
                ConstValue::Composite(parts)
            }
            Op::CONSTANT => {
                let words = &inst.operands;
                let wide = |words: &[u32]| -> Result<u64, Error> {
                    match *words {
                        [lo] => Ok(u64::from(lo)),
                        [lo, hi] => Ok(u64::from(lo) | (u64::from(hi) << 32)),
                        _ => Err(Error::malformed("OpConstant literal of unexpected width")),
                    }
                };
                match self.m.cx[ty] {
                    TypeKind::Float { width: 32 } => {
                        ConstValue::Float(f64::from(f32::from_bits(words[0])))
                    }
                    TypeKind::Float { width: 64 } => {
                        ConstValue::Float(f64::from_bits(wide(words)?))
                    }
                    TypeKind::Int { signed: true, width } => {
                        let raw = wide(words)?;
                        ConstValue::Int(if width <= 32 {
                            i64::from(raw as u32 as i32)
                        } else {
                            raw as i64
                        })
                    }
                    TypeKind::Int { signed: false, .. } => ConstValue::Uint(wide(words)?),
                    _ => {
                        return Err(Error::malformed(
                            "OpConstant with a non-scalar result type",
                        ));
                    }
                }
            }
            op => unreachable!("non-constant opcode {op:?} routed to const_inst"),
        };
        self.m.consts.insert(id, Constant { ty, value });
        Ok(())
    }

    /// Second pass: every operand the pipeline will later interpret as an id
    /// must have a definition. Catching dangling references here, with the
    /// offending instruction index, beats a panic deep inside an emitter.
    fn resolve_references(&self) -> Result<(), Error> {
        let defined = |id: Id| -> bool {
            self.m.insts.iter().any(|i| i.result_id == Some(id))
        };
        if !self.m.funcs.contains_key(&self.m.entry_point) {
            return Err(Error::UnresolvedId {
                id: self.m.entry_point.get(),
                inst_index: 0,
            });
        }
        for (idx, inst) in self.m.insts.iter().enumerate() {
            for i in id_operand_range(inst) {
                let id = inst.id_operand(i)?;
                if !defined(id) {
                    return Err(Error::UnresolvedId { id: id.get(), inst_index: idx });
                }
            }
        }
        Ok(())
    }
}

/// Decoration words after the target id (and member index, for
/// `OpMemberDecorate`): the decoration number, then its literal operands.
fn decoration_kind(words: &[u32]) -> Result<DecorationKind, Error> {
    let (&dec, operands) = words
        .split_first()
        .ok_or_else(|| Error::malformed("decoration without a decoration number"))?;
    let literal = |i: usize| -> Result<u32, Error> {
        operands
            .get(i)
            .copied()
            .ok_or_else(|| Error::malformed(format!("decoration {dec} is missing an operand")))
    };
    Ok(match dec {
        spv::decoration::BLOCK => DecorationKind::Block,
        spv::decoration::BUFFER_BLOCK => DecorationKind::BufferBlock,
        spv::decoration::ROW_MAJOR => DecorationKind::RowMajor,
        spv::decoration::COL_MAJOR => DecorationKind::ColMajor,
        spv::decoration::ARRAY_STRIDE => DecorationKind::ArrayStride(literal(0)?),
        spv::decoration::MATRIX_STRIDE => DecorationKind::MatrixStride(literal(0)?),
        spv::decoration::BUILT_IN => DecorationKind::BuiltIn(BuiltIn::from_word(literal(0)?)),
        spv::decoration::NO_PERSPECTIVE => DecorationKind::NoPerspective,
        spv::decoration::FLAT => DecorationKind::Flat,
        spv::decoration::LOCATION => DecorationKind::Location(literal(0)?),
        spv::decoration::BINDING => DecorationKind::Binding(literal(0)?),
        spv::decoration::DESCRIPTOR_SET => DecorationKind::DescriptorSet(literal(0)?),
        spv::decoration::OFFSET => DecorationKind::Offset(literal(0)?),
        _ => DecorationKind::Other {
            decoration: dec,
            operands: operands.iter().copied().collect(),
        },
    })
}

fn is_type_op(op: Op) -> bool {
    matches!(
        op,
        Op::TYPE_VOID
            | Op::TYPE_BOOL
            | Op::TYPE_INT
            | Op::TYPE_FLOAT
            | Op::TYPE_VECTOR
            | Op::TYPE_MATRIX
            | Op::TYPE_ARRAY
            | Op::TYPE_RUNTIME_ARRAY
            | Op::TYPE_STRUCT
            | Op::TYPE_POINTER
            | Op::TYPE_IMAGE
            | Op::TYPE_SAMPLER
            | Op::TYPE_SAMPLED_IMAGE
            | Op::TYPE_FUNCTION
    )
}

fn is_const_op(op: Op) -> bool {
    matches!(
        op,
        Op::CONSTANT_TRUE
            | Op::CONSTANT_FALSE
            | Op::CONSTANT
            | Op::CONSTANT_COMPOSITE
            | Op::CONSTANT_NULL
    )
}

pub(crate) fn is_terminator_op(op: Op) -> bool {
    matches!(
        op,
        Op::BRANCH
            | Op::BRANCH_CONDITIONAL
            | Op::SWITCH
            | Op::KILL
            | Op::RETURN
            | Op::RETURN_VALUE
            | Op::UNREACHABLE
    )
}

/// Which leading operand words of `inst` are id references. Trailing literal
/// words (shuffle lanes, extract indices, memory-access masks, branch
/// weights) are excluded; for interleaved shapes (`OpSwitch`) the caller
/// interprets the tail itself and the leading ids cover the failure modes
/// worth validating.
fn id_operand_range(inst: &Inst) -> std::ops::Range<usize> {
    let all = inst.operands.len();
    let n = match inst.opcode {
        Op::LOAD | Op::RETURN_VALUE | Op::BRANCH | Op::S_NEGATE | Op::F_NEGATE
        | Op::LOGICAL_NOT | Op::COPY_OBJECT | Op::TRANSPOSE | Op::BITCAST
        | Op::CONVERT_F_TO_U | Op::CONVERT_F_TO_S | Op::CONVERT_S_TO_F
        | Op::CONVERT_U_TO_F | Op::COMPOSITE_EXTRACT | Op::IMAGE => 1,

        Op::STORE
        | Op::VECTOR_SHUFFLE
        | Op::COMPOSITE_INSERT
        | Op::SAMPLED_IMAGE
        | Op::IMAGE_SAMPLE_IMPLICIT_LOD
        | Op::IMAGE_SAMPLE_EXPLICIT_LOD
        | Op::SWITCH
        | Op::LOOP_MERGE => 2,

        Op::BRANCH_CONDITIONAL => 3,

        Op::ACCESS_CHAIN
        | Op::IN_BOUNDS_ACCESS_CHAIN
        | Op::FUNCTION_CALL
        | Op::COMPOSITE_CONSTRUCT
        | Op::SELECT
        | Op::PHI
        | Op::DOT => all,

        Op(o)
            if (Op::I_ADD.0..=Op::OUTER_PRODUCT.0).contains(&o)
                || (Op::LOGICAL_EQUAL.0..=Op::LOGICAL_AND.0).contains(&o)
                || (Op::I_EQUAL.0..=Op::F_ORD_GREATER_THAN_EQUAL.0).contains(&o) =>
        {
            2
        }

        Op::EXT_INST => return 2..all,

        _ => 0,
    };
    0..n.min(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::MAGIC;

    fn raw(op: Op, words: &[u32]) -> Vec<u32> {
        let mut v = vec![((words.len() as u32 + 1) << 16) | u32::from(op.0)];
        v.extend_from_slice(words);
        v
    }

    fn str_words(s: &str) -> Vec<u32> {
        spv::encode_literal_string(s).to_vec()
    }

    /// `OpEntryPoint Fragment %4 "main"` plus a trivial fragment body.
    fn minimal_fragment() -> Vec<u32> {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 16, 0];
        let mut ep = vec![4u32, 4];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        w.extend(raw(Op::TYPE_VOID, &[1]));
        w.extend(raw(Op::TYPE_FUNCTION, &[2, 1]));
        w.extend(raw(Op::FUNCTION, &[1, 4, 0, 2]));
        w.extend(raw(Op::LABEL, &[5]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));
        w
    }

    #[test]
    fn builds_a_minimal_module() {
        let cx = Rc::new(Context::new());
        let m = Module::read_from_spv_words(cx.clone(), minimal_fragment()).unwrap();
        assert_eq!(m.stage, Stage::Fragment);
        assert_eq!(m.entry_name, "main");
        let func = &m.funcs[&m.entry_point];
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(cx[func.ret], TypeKind::Void);
    }

    #[test]
    fn module_debug_dump_names_the_tables() {
        let m =
            Module::read_from_spv_words(Rc::new(Context::new()), minimal_fragment()).unwrap();
        let dump = format!("{m:?}");
        assert!(dump.contains("entry_name: \"main\""), "{dump}");
        assert!(dump.contains("Context"), "{dump}");
    }

    #[test]
    fn missing_entry_point_is_malformed() {
        let w = vec![MAGIC, 0x0001_0000, 0, 4, 0];
        let err = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap_err();
        assert!(matches!(err, Error::MalformedModule { .. }));
    }

    #[test]
    fn dangling_reference_is_unresolved() {
        let mut w = minimal_fragment();
        // A stray branch to a label that is never defined. Splice it in as
        // the block terminator (replacing OpReturn).
        let end = w.len();
        w.splice(end - 2..end - 1, raw(Op::BRANCH, &[13]));
        let err = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap_err();
        assert!(matches!(err, Error::UnresolvedId { id: 13, .. }));
    }

    #[test]
    fn structurally_equal_types_intern_once() {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
        let mut ep = vec![4u32, 20];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        w.extend(raw(Op::TYPE_FLOAT, &[1, 32]));
        w.extend(raw(Op::TYPE_VECTOR, &[2, 1, 4]));
        // Same shapes again under fresh ids, as two front-end passes might.
        w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
        w.extend(raw(Op::TYPE_VECTOR, &[4, 3, 4]));
        w.extend(raw(Op::TYPE_VOID, &[10]));
        w.extend(raw(Op::TYPE_FUNCTION, &[11, 10]));
        w.extend(raw(Op::FUNCTION, &[10, 20, 0, 11]));
        w.extend(raw(Op::LABEL, &[21]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));

        let m = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap();
        let vec_a = m.type_of(Id::new(2).unwrap()).unwrap();
        let vec_b = m.type_of(Id::new(4).unwrap()).unwrap();
        assert_eq!(vec_a, vec_b);
        assert_ne!(vec_a, m.type_of(Id::new(1).unwrap()).unwrap());
    }

    #[test]
    fn forward_type_reference_resolves_in_preamble() {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
        let mut ep = vec![4u32, 20];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        // The vector names its element type before the float is declared.
        w.extend(raw(Op::TYPE_VECTOR, &[5, 3, 4]));
        w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
        w.extend(raw(Op::TYPE_VOID, &[10]));
        w.extend(raw(Op::TYPE_FUNCTION, &[11, 10]));
        w.extend(raw(Op::FUNCTION, &[10, 20, 0, 11]));
        w.extend(raw(Op::LABEL, &[21]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));

        let cx = Rc::new(Context::new());
        let m = Module::read_from_spv_words(cx.clone(), w).unwrap();
        let vec4 = m.type_of(Id::new(5).unwrap()).unwrap();
        let float = m.type_of(Id::new(3).unwrap()).unwrap();
        assert_eq!(cx[vec4], TypeKind::Vector { elem: float, count: 4 });
    }

    #[test]
    fn unresolvable_forward_type_reference_still_fails() {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
        let mut ep = vec![4u32, 20];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        // %3 never arrives.
        w.extend(raw(Op::TYPE_VECTOR, &[5, 3, 4]));
        w.extend(raw(Op::TYPE_VOID, &[10]));
        w.extend(raw(Op::TYPE_FUNCTION, &[11, 10]));
        w.extend(raw(Op::FUNCTION, &[10, 20, 0, 11]));
        w.extend(raw(Op::LABEL, &[21]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));

        let err = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap_err();
        assert!(matches!(err, Error::UnresolvedId { id: 3, .. }));
    }

    #[test]
    fn decorations_land_in_the_tables() {
        use crate::spv::decoration;

        let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
        let mut ep = vec![4u32, 20];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        w.extend(raw(Op::DECORATE, &[7, decoration::BLOCK]));
        w.extend(raw(Op::DECORATE, &[9, decoration::LOCATION, 3]));
        w.extend(raw(Op::DECORATE, &[9, decoration::BINDING, 2]));
        w.extend(raw(Op::MEMBER_DECORATE, &[7, 0, decoration::OFFSET, 16]));
        w.extend(raw(Op::TYPE_FLOAT, &[3, 32]));
        w.extend(raw(Op::TYPE_STRUCT, &[7, 3]));
        w.extend(raw(Op::TYPE_POINTER, &[8, 1, 3]));
        w.extend(raw(Op::VARIABLE, &[8, 9, 1]));
        w.extend(raw(Op::TYPE_VOID, &[10]));
        w.extend(raw(Op::TYPE_FUNCTION, &[11, 10]));
        w.extend(raw(Op::FUNCTION, &[10, 20, 0, 11]));
        w.extend(raw(Op::LABEL, &[21]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));

        let m = Module::read_from_spv_words(Rc::new(Context::new()), w).unwrap();
        assert_eq!(m.location(Id::new(9).unwrap()), Some(3));
        assert_eq!(m.binding(Id::new(9).unwrap()), Some(2));
        assert!(m.is_block(Id::new(7).unwrap()));
        assert_eq!(m.member_offset(Id::new(7).unwrap(), 0), Some(16));
    }

    #[test]
    fn struct_member_names_join_the_type() {
        let mut w = vec![MAGIC, 0x0001_0000, 0, 32, 0];
        let mut ep = vec![0u32, 20];
        ep.extend(str_words("main"));
        w.extend(raw(Op::ENTRY_POINT, &ep));
        let mut mn = vec![3u32, 0];
        mn.extend(str_words("projection"));
        w.extend(raw(Op::MEMBER_NAME, &mn));
        w.extend(raw(Op::TYPE_FLOAT, &[1, 32]));
        w.extend(raw(Op::TYPE_VECTOR, &[2, 1, 4]));
        w.extend(raw(Op::TYPE_STRUCT, &[3, 2]));
        w.extend(raw(Op::TYPE_VOID, &[10]));
        w.extend(raw(Op::TYPE_FUNCTION, &[11, 10]));
        w.extend(raw(Op::FUNCTION, &[10, 20, 0, 11]));
        w.extend(raw(Op::LABEL, &[21]));
        w.extend(raw(Op::RETURN, &[]));
        w.extend(raw(Op::FUNCTION_END, &[]));

        let cx = Rc::new(Context::new());
        let m = Module::read_from_spv_words(cx.clone(), w).unwrap();
        let ty = m.type_of(Id::new(3).unwrap()).unwrap();
        match &cx[ty] {
            TypeKind::Struct { members } => {
                assert_eq!(&cx[members[0].name.unwrap()], "projection");
            }
            other => panic!("expected struct, got {other:?}"),
        }
    }
}

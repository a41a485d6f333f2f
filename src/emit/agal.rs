//! AGAL bytecode emission for Flash's Stage3D.
//!
//! AGAL has no branches at all, so this target only accepts modules whose
//! structured form is straight-line code plus `If` nodes that can be lowered
//! to arithmetic blends (both arms evaluated, results mixed by a 0/1 mask).
//! Any loop is a hard [`Error::UnsupportedFeature`].
//!
//! The container is the Stage3D upload format: a magic byte, a version word,
//! a shader-type marker, then 24-byte tokens of
//! `[opcode u32][dest u32][src1 u64][src2 u64]`, all little-endian.

use arrayvec::ArrayVec;

use super::{Emitted, Output, Target, block_body, fmt_float};
use crate::cf::{self, Node, Region};
use crate::spv::{Id, Inst, Op, glsl450};
use crate::{
    ConstValue, Diag, Error, Function, FxIndexMap, Module, Stage, StorageClass, Type, TypeKind,
};

pub fn emit(module: &Module, target: &Target) -> Result<Emitted, Error> {
    Emitter::new(module, target).run()
}

mod opcode {
    pub const MOV: u32 = 0;
    pub const ADD: u32 = 1;
    pub const SUB: u32 = 2;
    pub const MUL: u32 = 3;
    pub const DIV: u32 = 4;
    pub const MIN: u32 = 6;
    pub const MAX: u32 = 7;
    pub const FRC: u32 = 8;
    pub const SQT: u32 = 9;
    pub const RSQ: u32 = 10;
    pub const POW: u32 = 11;
    pub const LOG: u32 = 12;
    pub const EXP: u32 = 13;
    pub const NRM: u32 = 14;
    pub const SIN: u32 = 15;
    pub const COS: u32 = 16;
    pub const CRS: u32 = 17;
    pub const DP3: u32 = 18;
    pub const DP4: u32 = 19;
    pub const ABS: u32 = 20;
    pub const NEG: u32 = 21;
    pub const SAT: u32 = 22;
    pub const M33: u32 = 23;
    pub const M44: u32 = 24;
    pub const KIL: u32 = 39;
    pub const TEX: u32 = 40;
    pub const SGE: u32 = 41;
    pub const SLT: u32 = 42;
    pub const SEQ: u32 = 44;
    pub const SNE: u32 = 45;
}

/// AGAL register files. The numeric value is the type field of the token
/// encoding; vertex and fragment programs share the numbering (`va`/`v`,
/// `vc`/`fc`, `vt`/`ft`, `op`/`oc`).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum RegKind {
    Attribute = 0,
    Constant = 1,
    Temp = 2,
    Output = 3,
    Varying = 4,
    Sampler = 5,
}

const XYZW: [u8; 4] = [0, 1, 2, 3];

/// A value location: register plus read swizzle plus write mask. Scalars
/// live replicated (`swiz` all one lane); a `vecN` masks its low N lanes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct Val {
    kind: RegKind,
    index: u16,
    swiz: [u8; 4],
    mask: u8,
}

impl Val {
    fn reg(kind: RegKind, index: u16) -> Val {
        Val { kind, index, swiz: XYZW, mask: 0xf }
    }

    fn shaped(kind: RegKind, index: u16, width: u32) -> Val {
        let mut swiz = [0u8; 4];
        for (i, s) in swiz.iter_mut().enumerate() {
            *s = (i as u32).min(width.saturating_sub(1)) as u8;
        }
        Val { kind, index, swiz, mask: ((1u32 << width.min(4)) - 1) as u8 }
    }

    /// Read every lane as `lane` (scalar broadcast).
    fn lane(self, lane: u8) -> Val {
        Val { swiz: [lane; 4], mask: 1 << lane, ..self }
    }

    fn src_token(self) -> u64 {
        let s = u64::from(self.swiz[0])
            | u64::from(self.swiz[1]) << 2
            | u64::from(self.swiz[2]) << 4
            | u64::from(self.swiz[3]) << 6;
        u64::from(self.index) | s << 24 | (self.kind as u64) << 32
    }

    fn dest_token(self) -> u32 {
        u32::from(self.index) | u32::from(self.mask) << 16 | (self.kind as u32) << 24
    }
}

/// Sampler token: 2D, repeat wrapping, linear filtering, no mips.
fn sampler_token(index: u16) -> u64 {
    u64::from(index) | (RegKind::Sampler as u64) << 32 | 1 << 48 | 1 << 56
}

struct Emitter<'a> {
    m: &'a Module,
    t: &'a Target,
    diags: Vec<Diag>,
    code: Vec<u8>,
    bindings: FxIndexMap<String, u32>,
    vals: FxIndexMap<Id, Val>,
    /// Uniform block members, `(var, member)` to their first register.
    block_members: FxIndexMap<(Id, u32), Val>,
    literal_consts: FxIndexMap<[u32; 4], u16>,
    next_temp: u16,
    next_const: u16,
    next_varying: u16,
    next_attr: u16,
    next_sampler: u16,
}

impl<'a> Emitter<'a> {
    fn new(m: &'a Module, t: &'a Target) -> Self {
        Emitter {
            m,
            t,
            diags: Vec::new(),
            code: Vec::new(),
            bindings: FxIndexMap::default(),
            vals: FxIndexMap::default(),
            block_members: FxIndexMap::default(),
            literal_consts: FxIndexMap::default(),
            next_temp: 0,
            next_const: 0,
            next_varying: 0,
            next_attr: 0,
            next_sampler: 0,
        }
    }

    fn unsupported(&self, reason: impl Into<String>) -> Error {
        Error::unsupported(self.m.stage, self.t.name(), reason)
    }

    fn push_token(&mut self, opcode: u32, dest: u32, src1: u64, src2: u64) {
        let mut token = ArrayVec::<u8, 24>::new();
        token.extend(opcode.to_le_bytes());
        token.extend(dest.to_le_bytes());
        token.extend(src1.to_le_bytes());
        token.extend(src2.to_le_bytes());
        self.code.extend_from_slice(&token);
    }

    fn op2(&mut self, opcode: u32, dest: Val, a: Val) {
        self.push_token(opcode, dest.dest_token(), a.src_token(), 0);
    }

    fn op3(&mut self, opcode: u32, dest: Val, a: Val, b: Val) {
        self.push_token(opcode, dest.dest_token(), a.src_token(), b.src_token());
    }

    fn temp(&mut self, width: u32) -> Val {
        let index = self.next_temp;
        self.next_temp += 1;
        Val::shaped(RegKind::Temp, index, width)
    }

    fn type_width(&self, ty: Type) -> Result<u32, Error> {
        Ok(match &self.m.cx[ty] {
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } => 1,
            TypeKind::Vector { count, .. } => *count,
            other => return Err(self.unsupported(format!("{other:?} value in a register"))),
        })
    }

    fn result_temp(&mut self, inst: &Inst) -> Result<Val, Error> {
        let ty = self
            .m
            .result_type(inst)
            .ok_or_else(|| self.unsupported(format!("{:?} with unresolved type", inst.opcode)))?;
        let width = self.type_width(ty)?;
        let v = self.temp(width);
        self.vals.insert(inst.result_id.unwrap(), v);
        Ok(v)
    }

    fn literal(&mut self, lanes: [f32; 4], label: &str) -> Val {
        let key = lanes.map(f32::to_bits);
        if let Some(&index) = self.literal_consts.get(&key) {
            return Val::reg(RegKind::Constant, index);
        }
        let index = self.next_const;
        self.next_const += 1;
        self.literal_consts.insert(key, index);
        // Hosts upload literal pools by parsing the binding name.
        self.bindings.insert(
            format!(
                "{label}({}, {}, {}, {})",
                fmt_float(lanes[0].into()),
                fmt_float(lanes[1].into()),
                fmt_float(lanes[2].into()),
                fmt_float(lanes[3].into())
            ),
            u32::from(index),
        );
        Val::reg(RegKind::Constant, index)
    }

    fn const_val(&mut self, id: Id) -> Option<Val> {
        let c = self.m.consts.get(&id)?;
        match c.value.clone() {
            ConstValue::Float(v) => Some(self.literal([v as f32; 4], "literal").lane(0)),
            ConstValue::Int(v) => Some(self.literal([v as f32; 4], "literal").lane(0)),
            ConstValue::Uint(v) => Some(self.literal([v as f32; 4], "literal").lane(0)),
            ConstValue::Bool(b) => {
                Some(self.literal([if b { 1.0 } else { 0.0 }; 4], "literal").lane(0))
            }
            ConstValue::Null => Some(self.literal([0.0; 4], "literal")),
            ConstValue::Composite(parts) => {
                let mut lanes = [0.0f32; 4];
                for (lane, &p) in lanes.iter_mut().zip(&parts) {
                    *lane = match self.m.consts.get(&p)?.value {
                        ConstValue::Float(v) => v as f32,
                        ConstValue::Int(v) => v as f32,
                        ConstValue::Uint(v) => v as f32,
                        ConstValue::Bool(b) => {
                            if b {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        _ => return None,
                    };
                }
                let width = parts.len().min(4) as u32;
                let v = self.literal(lanes, "literal");
                Some(Val { swiz: Val::shaped(v.kind, v.index, width).swiz, ..v })
            }
        }
    }

    fn val(&mut self, id: Id) -> Result<Val, Error> {
        if let Some(&v) = self.vals.get(&id) {
            return Ok(v);
        }
        self.const_val(id)
            .ok_or_else(|| self.unsupported(format!("value %{id} has no register form")))
    }

    fn run(mut self) -> Result<Emitted, Error> {
        let shader_type: u8 = match self.m.stage {
            Stage::Vertex => 0,
            Stage::Fragment => 1,
            other => {
                return Err(self.unsupported(format!("{} stage", other.name())));
            }
        };
        self.globals()?;

        let func = self
            .m
            .funcs
            .get(&self.m.entry_point)
            .ok_or_else(|| Error::malformed("entry point is not a function"))?;
        let tree = cf::structurize(self.m, func)?;
        if tree.contains_loop() {
            return Err(self.unsupported("loops cannot be encoded in branch-free bytecode"));
        }
        self.region(func, &tree, None)?;

        if self.next_temp > 8 {
            self.diags.push(Diag::warn(format!(
                "{} temporaries used; Stage3D guarantees 8",
                self.next_temp
            )));
        }

        let mut bytes = Vec::with_capacity(7 + self.code.len());
        bytes.push(0xa0);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0xa1);
        bytes.push(shader_type);
        bytes.extend_from_slice(&self.code);
        Ok(Emitted {
            output: Output::Binary(bytes),
            bindings: self.bindings,
            diags: self.diags,
        })
    }

    /// Register count a uniform member occupies: one per vec4, one per
    /// matrix column.
    fn reg_count(&self, ty: Type) -> Result<u16, Error> {
        Ok(match self.m.cx[ty] {
            TypeKind::Bool
            | TypeKind::Int { .. }
            | TypeKind::Float { .. }
            | TypeKind::Vector { .. } => 1,
            TypeKind::Matrix { count, .. } => count as u16,
            TypeKind::Array { elem, length: Some(n) } => {
                self.reg_count(elem)? * n as u16
            }
            ref other => return Err(self.unsupported(format!("{other:?} uniform"))),
        })
    }

    fn globals(&mut self) -> Result<(), Error> {
        for (id, type_id, storage) in self
            .m
            .vars
            .values()
            .map(|v| (v.id, v.type_id, v.storage))
            .collect::<Vec<_>>()
        {
            let pointee_id = self.m.pointee_type_id(type_id).ok_or_else(|| {
                Error::malformed(format!("variable %{id} has a non-pointer type"))
            })?;
            let pointee = self
                .m
                .type_of(pointee_id)
                .ok_or(Error::UnresolvedId { id: pointee_id.get(), inst_index: 0 })?;

            match storage {
                StorageClass::Uniform | StorageClass::PushConstant => {
                    let TypeKind::Struct { members } = self.m.cx[pointee].clone() else {
                        return Err(self.unsupported("non-struct uniform variable"));
                    };
                    for (i, member) in members.iter().enumerate() {
                        let name = member
                            .name
                            .map(|n| self.m.cx[n].to_owned())
                            .unwrap_or_else(|| format!("u{i}"));
                        let index = self.next_const;
                        self.next_const += self.reg_count(member.ty)?;
                        self.bindings.insert(name, u32::from(index));
                        let width = match self.m.cx[member.ty] {
                            TypeKind::Vector { count, .. } => count,
                            TypeKind::Matrix { .. } => 4,
                            _ => 1,
                        };
                        self.block_members.insert(
                            (id, i as u32),
                            Val::shaped(RegKind::Constant, index, width),
                        );
                    }
                }
                StorageClass::UniformConstant => {
                    let name = self
                        .m
                        .name_of(id)
                        .filter(|n| !n.is_empty())
                        .unwrap_or("tex")
                        .to_owned();
                    let index = self.next_sampler;
                    self.next_sampler += 1;
                    self.bindings.insert(name, u32::from(index));
                    self.vals.insert(id, Val::reg(RegKind::Sampler, index));
                }
                StorageClass::Input => {
                    let (kind, index) = if self.m.stage == Stage::Vertex {
                        let index = self
                            .m
                            .location(id)
                            .map(|l| l as u16)
                            .unwrap_or(self.next_attr);
                        self.next_attr = self.next_attr.max(index + 1);
                        let name = self
                            .m
                            .name_of(id)
                            .filter(|n| !n.is_empty())
                            .unwrap_or("attr")
                            .to_owned();
                        self.bindings.insert(name, u32::from(index));
                        (RegKind::Attribute, index)
                    } else {
                        let index = self
                            .m
                            .location(id)
                            .map(|l| l as u16)
                            .unwrap_or(self.next_varying);
                        self.next_varying = self.next_varying.max(index + 1);
                        (RegKind::Varying, index)
                    };
                    let width = self.type_width(pointee)?;
                    self.vals.insert(id, Val::shaped(kind, index, width));
                }
                StorageClass::Output => {
                    self.output_var(id, pointee_id, pointee)?;
                }
                StorageClass::Private => {
                    let width = self.type_width(pointee)?;
                    let v = self.temp(width);
                    self.vals.insert(id, v);
                }
                other => {
                    return Err(self.unsupported(format!("{other:?} storage at module scope")));
                }
            }
        }
        Ok(())
    }

    fn output_var(&mut self, id: Id, pointee_id: Id, pointee: Type) -> Result<(), Error> {
        if matches!(self.m.cx[pointee], TypeKind::Struct { .. })
            && self.m.member_builtin(pointee_id, 0).is_some()
        {
            let TypeKind::Struct { members } = self.m.cx[pointee].clone() else { unreachable!() };
            for i in 0..members.len() as u32 {
                match self.m.member_builtin(pointee_id, i) {
                    Some(crate::BuiltIn::Position) => {
                        self.block_members.insert((id, i), Val::reg(RegKind::Output, 0));
                    }
                    Some(b) => {
                        return Err(self.unsupported(format!("built-in output {b:?}")));
                    }
                    None => {}
                }
            }
            return Ok(());
        }
        match self.m.builtin(id) {
            Some(crate::BuiltIn::Position) => {
                self.vals.insert(id, Val::reg(RegKind::Output, 0));
            }
            Some(b) => return Err(self.unsupported(format!("built-in output {b:?}"))),
            None => {
                if self.m.stage == Stage::Fragment {
                    self.vals.insert(id, Val::reg(RegKind::Output, 0));
                } else {
                    let index = self
                        .m
                        .location(id)
                        .map(|l| l as u16)
                        .unwrap_or(self.next_varying);
                    self.next_varying = self.next_varying.max(index + 1);
                    let width = self.type_width(pointee)?;
                    self.vals.insert(id, Val::shaped(RegKind::Varying, index, width));
                }
            }
        }
        Ok(())
    }

    fn region(&mut self, func: &Function, region: &Region, mask: Option<Val>) -> Result<(), Error> {
        for node in &region.nodes {
            match node {
                Node::Block { index } => {
                    let block = &func.blocks[*index];
                    let insts: Vec<Inst> = block_body(self.m, block).cloned().collect();
                    for inst in &insts {
                        self.stmt(inst, mask)?;
                    }
                }
                Node::If { cond, then_region, else_region } => {
                    let c = self.val(*cond)?;
                    let sel = c.lane(c.swiz[0]);
                    let then_mask = self.combine_mask(mask, sel);
                    self.region(func, then_region, Some(then_mask))?;
                    if !else_region.nodes.is_empty() {
                        let one = self.literal([1.0; 4], "literal");
                        let inverted = self.temp(1);
                        self.op3(opcode::SUB, inverted, one.lane(0), sel);
                        // Both masks scale by the enclosing one, so a store
                        // in a dead outer branch stays dead.
                        let else_mask = self.combine_mask(mask, inverted.lane(0));
                        self.region(func, else_region, Some(else_mask))?;
                    }
                }
                Node::Loop { .. } => {
                    return Err(self.unsupported("loops cannot be encoded in branch-free bytecode"));
                }
                Node::Switch { .. } | Node::Break | Node::Continue => {
                    return Err(self.unsupported("control flow beyond arithmetic selection"));
                }
                Node::Return { value: None } if mask.is_none() => {}
                Node::Return { .. } => {
                    return Err(self.unsupported("early or value-carrying return"));
                }
                Node::Discard => {
                    if mask.is_some() {
                        return Err(self.unsupported("discard under a condition mask"));
                    }
                    let neg = self.literal([-1.0; 4], "literal");
                    self.push_token(opcode::KIL, 0, neg.src_token(), 0);
                }
            }
        }
        Ok(())
    }

    fn combine_mask(&mut self, outer: Option<Val>, inner: Val) -> Val {
        match outer {
            None => inner,
            Some(outer) => {
                let combined = self.temp(1);
                self.op3(opcode::MUL, combined, outer, inner);
                combined.lane(0)
            }
        }
    }

    /// Store `value` into `dest`, blending against the previous contents when
    /// a selection mask is active: `dest = dest + mask * (value - dest)`.
    fn store(&mut self, dest: Val, value: Val, mask: Option<Val>) -> Result<(), Error> {
        if dest.kind == RegKind::Sampler || dest.kind == RegKind::Attribute {
            return Err(Error::malformed("store into a read-only register"));
        }
        match mask {
            None => self.op2(opcode::MOV, dest, value),
            Some(mask) => {
                let delta = self.temp(4);
                let delta = Val { mask: dest.mask, ..delta };
                let prev = Val { swiz: dest.swiz, ..dest };
                self.op3(opcode::SUB, delta, value, prev);
                self.op3(opcode::MUL, delta, Val { swiz: delta.swiz, ..delta }, mask);
                self.op3(opcode::ADD, dest, prev, Val { swiz: delta.swiz, ..delta });
            }
        }
        Ok(())
    }

    fn stmt(&mut self, inst: &Inst, mask: Option<Val>) -> Result<(), Error> {
        let op = inst.opcode;
        match op {
            Op::VARIABLE => {
                let pointee = self
                    .m
                    .result_type(inst)
                    .and_then(|t| match self.m.cx[t] {
                        TypeKind::Pointer { pointee, .. } => Some(pointee),
                        _ => None,
                    })
                    .ok_or_else(|| Error::malformed("OpVariable with a non-pointer type"))?;
                let width = self.type_width(pointee)?;
                let v = self.temp(width);
                self.vals.insert(inst.result_id.unwrap(), v);
                if let Some(init) = inst.operands.get(1).copied().and_then(Id::new) {
                    let value = self.val(init)?;
                    self.op2(opcode::MOV, v, value);
                }
            }
            Op::LOAD | Op::COPY_OBJECT | Op::IMAGE | Op::SAMPLED_IMAGE => {
                let v = self.val(inst.id_operand(0)?)?;
                self.vals.insert(inst.result_id.unwrap(), v);
            }
            Op::STORE => {
                let dest = self.val(inst.id_operand(0)?)?;
                let value = self.val(inst.id_operand(1)?)?;
                self.store(dest, value, mask)?;
            }
            Op::ACCESS_CHAIN | Op::IN_BOUNDS_ACCESS_CHAIN => self.access_chain(inst)?,
            Op::PHI => {
                return Err(self.unsupported("phi nodes in branch-free bytecode"));
            }

            Op::COMPOSITE_CONSTRUCT => {
                let dest = self.result_temp(inst)?;
                let mut lane = 0u8;
                for i in 0..inst.operands.len() {
                    let arg_id = inst.id_operand(i)?;
                    let arg = self.val(arg_id)?;
                    let width = self
                        .m
                        .value_type(arg_id)
                        .map(|t| self.type_width(t))
                        .transpose()?
                        .unwrap_or(1);
                    // Shift the source lanes up to the destination lanes.
                    let mut swiz = [0u8; 4];
                    for (j, s) in swiz.iter_mut().enumerate() {
                        let rel = (j as u8).saturating_sub(lane);
                        *s = arg.swiz[rel.min(3) as usize];
                    }
                    let part_mask = (((1u32 << width) - 1) << lane) as u8 & 0xf;
                    self.op2(
                        opcode::MOV,
                        Val { mask: part_mask, ..dest },
                        Val { swiz, ..arg },
                    );
                    lane += width as u8;
                }
            }
            Op::COMPOSITE_EXTRACT => {
                let base = self.val(inst.id_operand(0)?)?;
                let lane = *inst
                    .operands
                    .get(1)
                    .ok_or_else(|| Error::malformed("extract without an index"))? as u8;
                if lane > 3 || inst.operands.len() > 2 {
                    return Err(self.unsupported("extract beyond one vector lane"));
                }
                self.vals
                    .insert(inst.result_id.unwrap(), base.lane(base.swiz[lane as usize]));
            }
            Op::VECTOR_SHUFFLE => {
                let a = self.val(inst.id_operand(0)?)?;
                let b = self.val(inst.id_operand(1)?)?;
                let a_len = match self.m.value_type(inst.id_operand(0)?).map(|t| &self.m.cx[t]) {
                    Some(&TypeKind::Vector { count, .. }) => count,
                    _ => return Err(self.unsupported("shuffle of a non-vector")),
                };
                let comps = &inst.operands[2..];
                if comps.iter().all(|&c| c < a_len) {
                    let mut swiz = [0u8; 4];
                    for (i, s) in swiz.iter_mut().enumerate() {
                        let c = comps.get(i).or(comps.last()).copied().unwrap_or(0);
                        *s = a.swiz[c as usize];
                    }
                    let width = comps.len().min(4) as u8;
                    self.vals.insert(
                        inst.result_id.unwrap(),
                        Val { swiz, mask: (1 << width) - 1, ..a },
                    );
                } else {
                    let dest = self.result_temp(inst)?;
                    for (i, &c) in comps.iter().enumerate().take(4) {
                        let (src, lane) = if c < a_len { (a, c) } else { (b, c - a_len) };
                        self.op2(
                            opcode::MOV,
                            Val { mask: 1 << i, ..dest },
                            src.lane(src.swiz[lane as usize]),
                        );
                    }
                }
            }

            Op::IMAGE_SAMPLE_IMPLICIT_LOD | Op::IMAGE_SAMPLE_EXPLICIT_LOD => {
                let sampler = self.val(inst.id_operand(0)?)?;
                if sampler.kind != RegKind::Sampler {
                    return Err(self.unsupported("sampling a non-sampler register"));
                }
                if op == Op::IMAGE_SAMPLE_EXPLICIT_LOD {
                    self.diags
                        .push(Diag::warn("explicit lod ignored; sampling mip level 0"));
                }
                let coord = self.val(inst.id_operand(1)?)?;
                let dest = self.result_temp(inst)?;
                self.push_token(
                    opcode::TEX,
                    dest.dest_token(),
                    coord.src_token(),
                    sampler_token(sampler.index),
                );
            }

            Op::CONVERT_F_TO_S | Op::CONVERT_F_TO_U | Op::CONVERT_S_TO_F
            | Op::CONVERT_U_TO_F | Op::BITCAST => {
                // Every AGAL register lane is a float already.
                let v = self.val(inst.id_operand(0)?)?;
                self.vals.insert(inst.result_id.unwrap(), v);
            }

            Op::S_NEGATE | Op::F_NEGATE => {
                let a = self.val(inst.id_operand(0)?)?;
                let dest = self.result_temp(inst)?;
                self.op2(opcode::NEG, dest, a);
            }
            Op::LOGICAL_NOT => {
                let a = self.val(inst.id_operand(0)?)?;
                let one = self.literal([1.0; 4], "literal");
                let dest = self.result_temp(inst)?;
                self.op3(opcode::SUB, dest, one, a);
            }
            Op::SELECT => {
                let c = self.val(inst.id_operand(0)?)?;
                let a = self.val(inst.id_operand(1)?)?;
                let b = self.val(inst.id_operand(2)?)?;
                // b + c * (a - b)
                let dest = self.result_temp(inst)?;
                self.op3(opcode::SUB, dest, a, b);
                let d = Val { swiz: dest.swiz, ..dest };
                self.op3(opcode::MUL, dest, d, c.lane(c.swiz[0]));
                self.op3(opcode::ADD, dest, d, b);
            }
            Op::DOT => {
                let a = self.val(inst.id_operand(0)?)?;
                let b = self.val(inst.id_operand(1)?)?;
                let width = match self.m.value_type(inst.id_operand(0)?).map(|t| &self.m.cx[t]) {
                    Some(&TypeKind::Vector { count, .. }) => count,
                    _ => return Err(self.unsupported("dot of a non-vector")),
                };
                let dest = self.result_temp(inst)?;
                let code = if width == 3 { opcode::DP3 } else { opcode::DP4 };
                self.op3(code, dest, a, b);
            }
            Op::MATRIX_TIMES_VECTOR | Op::VECTOR_TIMES_MATRIX => {
                let (m_idx, v_idx) = if op == Op::MATRIX_TIMES_VECTOR { (0, 1) } else { (1, 0) };
                let matrix = self.val(inst.id_operand(m_idx)?)?;
                let vector = self.val(inst.id_operand(v_idx)?)?;
                if matrix.kind != RegKind::Constant {
                    return Err(self.unsupported("matrix products outside constant registers"));
                }
                let cols = match self.m.value_type(inst.id_operand(m_idx)?).map(|t| &self.m.cx[t])
                {
                    Some(&TypeKind::Matrix { count, .. }) => count,
                    _ => return Err(self.unsupported("matrix product of a non-matrix")),
                };
                let dest = self.result_temp(inst)?;
                let code = if cols == 3 { opcode::M33 } else { opcode::M44 };
                self.op3(code, dest, vector, Val::reg(RegKind::Constant, matrix.index));
            }

            Op::EXT_INST => self.ext_inst(inst)?,

            _ => {
                let code = match op {
                    Op::I_ADD | Op::F_ADD => opcode::ADD,
                    Op::I_SUB | Op::F_SUB => opcode::SUB,
                    Op::I_MUL | Op::F_MUL | Op::VECTOR_TIMES_SCALAR => opcode::MUL,
                    Op::U_DIV | Op::S_DIV | Op::F_DIV => opcode::DIV,
                    Op::F_ORD_LESS_THAN | Op::U_LESS_THAN | Op::S_LESS_THAN => opcode::SLT,
                    Op::F_ORD_GREATER_THAN_EQUAL
                    | Op::U_GREATER_THAN_EQUAL
                    | Op::S_GREATER_THAN_EQUAL => opcode::SGE,
                    Op::F_ORD_EQUAL | Op::I_EQUAL | Op::LOGICAL_EQUAL => opcode::SEQ,
                    Op::F_ORD_NOT_EQUAL | Op::I_NOT_EQUAL | Op::LOGICAL_NOT_EQUAL => opcode::SNE,
                    Op::LOGICAL_AND => opcode::MUL,
                    Op::F_ORD_GREATER_THAN | Op::U_GREATER_THAN | Op::S_GREATER_THAN => {
                        // a > b is b < a.
                        let a = self.val(inst.id_operand(0)?)?;
                        let b = self.val(inst.id_operand(1)?)?;
                        let dest = self.result_temp(inst)?;
                        self.op3(opcode::SLT, dest, b, a);
                        return Ok(());
                    }
                    Op::F_ORD_LESS_THAN_EQUAL | Op::U_LESS_THAN_EQUAL | Op::S_LESS_THAN_EQUAL => {
                        let a = self.val(inst.id_operand(0)?)?;
                        let b = self.val(inst.id_operand(1)?)?;
                        let dest = self.result_temp(inst)?;
                        self.op3(opcode::SGE, dest, b, a);
                        return Ok(());
                    }
                    Op::LOGICAL_OR => {
                        // sat(a + b)
                        let a = self.val(inst.id_operand(0)?)?;
                        let b = self.val(inst.id_operand(1)?)?;
                        let dest = self.result_temp(inst)?;
                        self.op3(opcode::ADD, dest, a, b);
                        self.op2(opcode::SAT, dest, Val { swiz: dest.swiz, ..dest });
                        return Ok(());
                    }
                    _ => return Err(self.unsupported(format!("instruction {op:?}"))),
                };
                let a = self.val(inst.id_operand(0)?)?;
                let b = self.val(inst.id_operand(1)?)?;
                let dest = self.result_temp(inst)?;
                self.op3(code, dest, a, b);
            }
        }
        Ok(())
    }

    fn access_chain(&mut self, inst: &Inst) -> Result<(), Error> {
        let base = inst.id_operand(0)?;
        let result = inst.result_id.unwrap();
        let mut next_index = 1;

        let mut v = if self.block_members.keys().any(|&(var, _)| var == base) {
            let member = inst
                .id_operand(1)
                .ok()
                .and_then(|id| self.m.const_u32(id))
                .ok_or_else(|| self.unsupported("dynamic index into a block"))?;
            next_index = 2;
            *self
                .block_members
                .get(&(base, member))
                .ok_or_else(|| Error::malformed("block member out of range"))?
        } else {
            self.val(base)?
        };

        for i in next_index..inst.operands.len() {
            let index_id = inst.id_operand(i)?;
            let index = self
                .m
                .const_u32(index_id)
                .ok_or_else(|| self.unsupported("dynamic indexing"))?;
            if v.kind == RegKind::Constant && v.mask == 0xf && index < 4 && v.swiz == XYZW {
                // Matrix column or array element: step whole registers.
                // A second index after that selects a lane.
                if i + 1 < inst.operands.len() || self.chain_steps_registers(base, inst, i) {
                    v = Val { index: v.index + index as u16, ..v };
                    continue;
                }
            }
            if index > 3 {
                return Err(self.unsupported("component index beyond w"));
            }
            v = v.lane(v.swiz[index as usize]);
        }

        self.vals.insert(result, v);
        Ok(())
    }

    /// Whether the index at position `i` of this chain walks a matrix or
    /// array (register-granular) rather than a vector lane.
    fn chain_steps_registers(&self, base: Id, inst: &Inst, i: usize) -> bool {
        let mut ty = match self.resolve_chain_base_type(base, inst) {
            Some(t) => t,
            None => return false,
        };
        for step in 1..=i {
            let granular = matches!(
                self.m.cx[ty],
                TypeKind::Matrix { .. } | TypeKind::Array { .. } | TypeKind::Struct { .. }
            );
            if step == i {
                return granular;
            }
            ty = match self.m.cx[ty].clone() {
                TypeKind::Struct { members } => {
                    let Some(index) = inst
                        .id_operand(step)
                        .ok()
                        .and_then(|id| self.m.const_u32(id))
                    else {
                        return false;
                    };
                    match members.get(index as usize) {
                        Some(m) => m.ty,
                        None => return false,
                    }
                }
                TypeKind::Matrix { column, .. } => column,
                TypeKind::Array { elem, .. } | TypeKind::Vector { elem, .. } => elem,
                _ => return false,
            };
        }
        false
    }

    fn resolve_chain_base_type(&self, base: Id, _inst: &Inst) -> Option<Type> {
        let var = self.m.vars.get(&base)?;
        let pointee_id = self.m.pointee_type_id(var.type_id)?;
        self.m.type_of(pointee_id)
    }

    fn ext_inst(&mut self, inst: &Inst) -> Result<(), Error> {
        let set = inst.id_operand(0)?;
        if Some(set) != self.m.glsl_std_450 {
            let name = self.m.ext_imports.get(&set).map_or("?", String::as_str);
            return Err(self.unsupported(format!("extended instruction set {name}")));
        }
        let number = inst.operands[1];
        let a = self.val(inst.id_operand(2)?)?;

        let unary = |n: u32| -> Option<u32> {
            Some(match n {
                glsl450::F_ABS => opcode::ABS,
                glsl450::FRACT => opcode::FRC,
                glsl450::SQRT => opcode::SQT,
                glsl450::INVERSE_SQRT => opcode::RSQ,
                glsl450::LOG2 => opcode::LOG,
                glsl450::EXP2 => opcode::EXP,
                glsl450::NORMALIZE => opcode::NRM,
                glsl450::SIN => opcode::SIN,
                glsl450::COS => opcode::COS,
                _ => return None,
            })
        };
        if let Some(code) = unary(number) {
            let dest = self.result_temp(inst)?;
            self.op2(code, dest, a);
            return Ok(());
        }

        match number {
            glsl450::POW | glsl450::F_MIN | glsl450::F_MAX | glsl450::CROSS => {
                let b = self.val(inst.id_operand(3)?)?;
                let code = match number {
                    glsl450::POW => opcode::POW,
                    glsl450::F_MIN => opcode::MIN,
                    glsl450::F_MAX => opcode::MAX,
                    _ => opcode::CRS,
                };
                let dest = self.result_temp(inst)?;
                self.op3(code, dest, a, b);
            }
            glsl450::FLOOR => {
                // x - frc(x)
                let dest = self.result_temp(inst)?;
                self.op2(opcode::FRC, dest, a);
                self.op3(opcode::SUB, dest, a, Val { swiz: dest.swiz, ..dest });
            }
            glsl450::F_CLAMP => {
                let lo = self.val(inst.id_operand(3)?)?;
                let hi = self.val(inst.id_operand(4)?)?;
                let dest = self.result_temp(inst)?;
                if self.is_zero(inst.id_operand(3)?) && self.is_one(inst.id_operand(4)?) {
                    self.op2(opcode::SAT, dest, a);
                } else {
                    self.op3(opcode::MAX, dest, a, lo);
                    self.op3(opcode::MIN, dest, Val { swiz: dest.swiz, ..dest }, hi);
                }
            }
            glsl450::F_MIX => {
                // a + t * (b - a)
                let b = self.val(inst.id_operand(3)?)?;
                let t = self.val(inst.id_operand(4)?)?;
                let dest = self.result_temp(inst)?;
                let d = Val { swiz: dest.swiz, ..dest };
                self.op3(opcode::SUB, dest, b, a);
                self.op3(opcode::MUL, dest, d, t);
                self.op3(opcode::ADD, dest, d, a);
            }
            glsl450::LENGTH => {
                let width = match self.m.value_type(inst.id_operand(2)?).map(|t| &self.m.cx[t]) {
                    Some(&TypeKind::Vector { count, .. }) => count,
                    _ => 4,
                };
                let dest = self.result_temp(inst)?;
                let code = if width == 3 { opcode::DP3 } else { opcode::DP4 };
                self.op3(code, dest, a, a);
                self.op2(opcode::SQT, dest, Val { swiz: dest.swiz, ..dest });
            }
            other => {
                return Err(self.unsupported(format!("GLSL.std.450 instruction {other}")));
            }
        }
        Ok(())
    }

    fn is_zero(&self, id: Id) -> bool {
        matches!(
            self.m.consts.get(&id).map(|c| &c.value),
            Some(ConstValue::Float(v)) if *v == 0.0
        )
    }

    fn is_one(&self, id: Id) -> bool {
        matches!(
            self.m.consts.get(&id).map(|c| &c.value),
            Some(ConstValue::Float(v)) if *v == 1.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_fields_land_in_their_bit_ranges() {
        let v = Val::reg(RegKind::Temp, 3);
        assert_eq!(v.dest_token(), 3 | 0xf << 16 | 2 << 24);
        // Identity swizzle is 0b11_10_01_00.
        assert_eq!(v.src_token(), 3 | 0xe4 << 24 | 2 << 32);

        let scalar = v.lane(2);
        assert_eq!(scalar.swiz, [2, 2, 2, 2]);
        assert_eq!(scalar.mask, 0b0100);
        assert_eq!(scalar.src_token() >> 24 & 0xff, 0b10_10_10_10);
    }

    #[test]
    fn shaped_registers_mask_their_width() {
        let v2 = Val::shaped(RegKind::Varying, 1, 2);
        assert_eq!(v2.mask, 0b0011);
        assert_eq!(v2.swiz, [0, 1, 1, 1]);
        let v4 = Val::shaped(RegKind::Constant, 0, 4);
        assert_eq!(v4.mask, 0xf);
        assert_eq!(v4.swiz, XYZW);
    }

    #[test]
    fn sampler_token_marks_linear_repeat_2d() {
        let t = sampler_token(2);
        assert_eq!(t & 0xffff, 2);
        assert_eq!(t >> 32 & 0xf, 5);
        assert_eq!(t >> 48 & 0xf, 1);
        assert_eq!(t >> 56 & 0xf, 1);
    }
}

//! Metal shading language emission.
//!
//! MSL passes everything through the entry point's argument list: inputs
//! arrive in a `[[stage_in]]` struct, uniform blocks as `constant` buffer
//! references, textures and samplers as their own arguments, and outputs
//! return as a struct. `main` is reserved, so the entry point is `main0`
//! and the host looks it up by that name.

use super::{
    Bindings, Emitted, Namer, Output, RegisterClass, Target, block_body, fmt_float,
    msl_builtin_attribute,
};
use crate::cf::{self, Node, Region};
use crate::spv::{Id, Inst, Op, glsl450};
use crate::{
    ConstValue, Context, Diag, Error, Function, FxIndexMap, Module, Stage, StorageClass, Type,
    TypeKind,
};

pub fn emit(module: &Module, target: &Target) -> Result<Emitted, Error> {
    Emitter::new(module, target).run()
}

fn type_name(cx: &Context, ty: Type) -> Option<String> {
    Some(match &cx[ty] {
        TypeKind::Void => "void".to_owned(),
        TypeKind::Bool => "bool".to_owned(),
        TypeKind::Int { signed: true, .. } => "int".to_owned(),
        TypeKind::Int { signed: false, .. } => "uint".to_owned(),
        TypeKind::Float { .. } => "float".to_owned(),
        TypeKind::Vector { elem, count } => match &cx[*elem] {
            TypeKind::Float { .. } => format!("float{count}"),
            TypeKind::Int { signed: true, .. } => format!("int{count}"),
            TypeKind::Int { signed: false, .. } => format!("uint{count}"),
            TypeKind::Bool => format!("bool{count}"),
            _ => return None,
        },
        TypeKind::Matrix { column, count } => {
            let TypeKind::Vector { count: rows, .. } = cx[*column] else {
                return None;
            };
            format!("float{count}x{rows}")
        }
        _ => return None,
    })
}

#[derive(Clone)]
struct Field {
    name: String,
    ty: Type,
    /// `[[...]]` attribute, without the brackets; empty for plain fields.
    attr: String,
}

/// One entry-point argument beyond `stage_in`.
struct EntryArg {
    decl: String,
}

struct Emitter<'a> {
    m: &'a Module,
    t: &'a Target,
    namer: Namer,
    bindings: Bindings,
    diags: Vec<Diag>,
    names: FxIndexMap<Id, String>,
    ptr_pointee: FxIndexMap<Id, Type>,
    block_members: FxIndexMap<(Id, u32), String>,
    samplers: FxIndexMap<String, String>,
    func_names: FxIndexMap<Id, String>,
    phi_assigns: FxIndexMap<Id, Vec<(Id, Id)>>,
    input_fields: Vec<Field>,
    output_fields: Vec<Field>,
    entry_args: Vec<EntryArg>,
    /// Private-storage globals, declared as locals at the entry open.
    private_vars: Vec<(Id, Type)>,
    /// Struct declarations emitted before the entry point.
    prelude: String,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(m: &'a Module, t: &'a Target) -> Self {
        Emitter {
            m,
            t,
            namer: Namer::new(t.dialect),
            bindings: Bindings::default(),
            diags: Vec::new(),
            names: FxIndexMap::default(),
            ptr_pointee: FxIndexMap::default(),
            block_members: FxIndexMap::default(),
            samplers: FxIndexMap::default(),
            func_names: FxIndexMap::default(),
            phi_assigns: FxIndexMap::default(),
            input_fields: Vec::new(),
            output_fields: Vec::new(),
            entry_args: Vec::new(),
            private_vars: Vec::new(),
            prelude: String::new(),
            out: String::new(),
            indent: 0,
        }
    }

    fn cx(&self) -> &Context {
        &self.m.cx
    }

    fn unsupported(&self, reason: impl Into<String>) -> Error {
        Error::unsupported(self.m.stage, self.t.name(), reason)
    }

    fn line(&mut self, s: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push('\t');
        }
        self.out.push_str(s.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, s: impl AsRef<str>) {
        self.line(s);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line("}");
    }

    fn ty(&self, ty: Type) -> Result<String, Error> {
        type_name(self.cx(), ty)
            .ok_or_else(|| self.unsupported(format!("type {:?} has no MSL spelling", self.cx()[ty])))
    }

    fn decl(&self, ty: Type, name: &str) -> Result<String, Error> {
        if let TypeKind::Array { elem, length: Some(n) } = self.cx()[ty] {
            return Ok(format!("{} {name}[{n}]", self.ty(elem)?));
        }
        Ok(format!("{} {name}", self.ty(ty)?))
    }

    fn claim_name(&mut self, id: Id, fallback: &str) -> String {
        let desired = self.m.name_of(id).filter(|n| !n.is_empty()).unwrap_or(fallback);
        let name = self.namer.claim(desired);
        self.names.insert(id, name.clone());
        name
    }

    fn val(&self, id: Id) -> Result<String, Error> {
        if let Some(name) = self.names.get(&id) {
            return Ok(name.clone());
        }
        self.const_expr(id)
            .ok_or_else(|| self.unsupported(format!("value %{id} has no expressible form")))
    }

    fn const_expr(&self, id: Id) -> Option<String> {
        let c = self.m.consts.get(&id)?;
        Some(match &c.value {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Uint(v) => format!("{v}u"),
            ConstValue::Float(v) => fmt_float(*v),
            ConstValue::Composite(parts) => {
                let args: Vec<String> =
                    parts.iter().map(|&p| self.val(p)).collect::<Result<_, _>>().ok()?;
                format!("{}({})", type_name(self.cx(), c.ty)?, args.join(", "))
            }
            ConstValue::Null => format!("{}(0)", type_name(self.cx(), c.ty)?),
        })
    }

    fn pointee(&self, ty: Type) -> Option<Type> {
        match self.cx()[ty] {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    fn run(mut self) -> Result<Emitted, Error> {
        self.globals()?;
        self.out.push_str("#include <metal_stdlib>\nusing namespace metal;\n\n");
        let prelude = std::mem::take(&mut self.prelude);
        self.out.push_str(&prelude);
        self.io_structs()?;
        self.functions()?;
        Ok(Emitted {
            output: Output::Text(self.out),
            bindings: self.bindings.into_map(),
            diags: self.diags,
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
            self.ptr_pointee.insert(id, pointee);

            match storage {
                StorageClass::Uniform | StorageClass::PushConstant => {
                    self.uniform_block(id, pointee_id, pointee)?;
                }
                StorageClass::UniformConstant => {
                    let name = self.claim_name(id, "tex");
                    let t = self.bindings.assign(RegisterClass::Texture, &name);
                    let sampler = self.namer.claim(&format!("{name}_sampler"));
                    let s = self.bindings.assign(RegisterClass::Sampler, &sampler);
                    self.entry_args.push(EntryArg {
                        decl: format!("texture2d<float> {name} [[texture({t})]]"),
                    });
                    self.entry_args.push(EntryArg {
                        decl: format!("sampler {sampler} [[sampler({s})]]"),
                    });
                    self.samplers.insert(name, sampler);
                }
                StorageClass::Input => self.input_var(id, pointee)?,
                StorageClass::Output => self.output_var(id, pointee_id, pointee)?,
                StorageClass::Private => {
                    // No module-scope mutable state in MSL entry points.
                    self.claim_name(id, "global");
                    self.private_vars.push((id, pointee));
                }
                other => {
                    return Err(self.unsupported(format!("{other:?} storage at module scope")));
                }
            }
        }
        Ok(())
    }

    fn uniform_block(&mut self, id: Id, pointee_id: Id, pointee: Type) -> Result<(), Error> {
        let TypeKind::Struct { members } = self.cx()[pointee].clone() else {
            return Err(self.unsupported("non-struct uniform variable"));
        };
        let struct_name = self
            .m
            .name_of(pointee_id)
            .filter(|n| !n.is_empty())
            .unwrap_or("Uniforms")
            .to_owned();
        let arg_name = self.namer.claim(&struct_name.to_lowercase());
        let slot = self.bindings.assign(RegisterClass::Uniform, &arg_name);

        let mut body = String::new();
        for (i, member) in members.iter().enumerate() {
            let mname = member
                .name
                .map(|n| self.cx()[n].to_owned())
                .unwrap_or_else(|| format!("u{i}"));
            body.push('\t');
            body.push_str(&self.decl(member.ty, &mname)?);
            body.push_str(";\n");
            self.block_members.insert((id, i as u32), format!("{arg_name}.{mname}"));
        }
        self.prelude.push_str(&format!("struct {struct_name}\n{{\n{body}}};\n\n"));
        self.entry_args.push(EntryArg {
            decl: format!("constant {struct_name}& {arg_name} [[buffer({slot})]]"),
        });
        Ok(())
    }

    fn input_var(&mut self, id: Id, pointee: Type) -> Result<(), Error> {
        if let Some(b) = self.m.builtin(id) {
            let attr = msl_builtin_attribute(self.m.stage, b)
                .ok_or_else(|| self.unsupported(format!("built-in {b:?} in this stage")))?;
            let name = self.namer.claim(&format!("{b:?}").to_lowercase());
            self.names.insert(id, format!("in.{name}"));
            self.input_fields.push(Field { name, ty: pointee, attr: attr.to_owned() });
            return Ok(());
        }
        let name = self.claim_name(id, "input_var");
        let attr = if self.m.stage == Stage::Vertex {
            let slot = self.bindings.assign(RegisterClass::Attribute, &name);
            format!("attribute({})", self.m.location(id).unwrap_or(slot))
        } else {
            String::new()
        };
        self.names.insert(id, format!("in.{name}"));
        self.input_fields.push(Field { name, ty: pointee, attr });
        Ok(())
    }

    fn output_var(&mut self, id: Id, pointee_id: Id, pointee: Type) -> Result<(), Error> {
        if matches!(self.cx()[pointee], TypeKind::Struct { .. })
            && self.m.member_builtin(pointee_id, 0).is_some()
        {
            let TypeKind::Struct { members } = self.cx()[pointee].clone() else {
                unreachable!()
            };
            for (i, member) in members.iter().enumerate() {
                let Some(b) = self.m.member_builtin(pointee_id, i as u32) else {
                    continue;
                };
                let attr = msl_builtin_attribute(self.m.stage, b)
                    .ok_or_else(|| self.unsupported(format!("built-in {b:?} in this stage")))?;
                let name = self.namer.claim(&format!("{b:?}").to_lowercase());
                self.block_members.insert((id, i as u32), format!("out.{name}"));
                self.output_fields.push(Field { name, ty: member.ty, attr: attr.to_owned() });
            }
            return Ok(());
        }
        if let Some(b) = self.m.builtin(id) {
            let attr = msl_builtin_attribute(self.m.stage, b)
                .ok_or_else(|| self.unsupported(format!("built-in {b:?} in this stage")))?;
            let name = self.namer.claim(&format!("{b:?}").to_lowercase());
            self.names.insert(id, format!("out.{name}"));
            self.output_fields.push(Field { name, ty: pointee, attr: attr.to_owned() });
            return Ok(());
        }
        let name = self.claim_name(id, "output_var");
        let attr = if self.m.stage == Stage::Fragment {
            let slot = self.bindings.assign(RegisterClass::Varying, &name);
            format!("color({slot})")
        } else {
            self.bindings.assign(RegisterClass::Varying, &name);
            String::new()
        };
        self.names.insert(id, format!("out.{name}"));
        self.output_fields.push(Field { name, ty: pointee, attr });
        Ok(())
    }

    fn input_struct_name(&self) -> &'static str {
        match self.m.stage {
            Stage::Vertex => "VertexIn",
            _ => "FragmentIn",
        }
    }

    fn io_structs(&mut self) -> Result<(), Error> {
        let groups = [
            (self.input_fields.clone(), self.input_struct_name()),
            (self.output_fields.clone(), "StageOut"),
        ];
        for (fields, struct_name) in groups {
            if fields.is_empty() {
                continue;
            }
            let mut body = String::new();
            for f in fields {
                body.push('\t');
                body.push_str(&self.decl(f.ty, &f.name)?);
                if !f.attr.is_empty() {
                    body.push_str(&format!(" [[{}]]", f.attr));
                }
                body.push_str(";\n");
            }
            self.out.push_str(&format!("struct {struct_name}\n{{\n{body}}};\n\n"));
        }
        Ok(())
    }

    fn functions(&mut self) -> Result<(), Error> {
        for (&id, _) in &self.m.funcs {
            let name = if id == self.m.entry_point {
                "main0".to_owned()
            } else {
                let desired = self.m.name_of(id).unwrap_or("fn").to_owned();
                self.namer.claim(&desired)
            };
            self.func_names.insert(id, name);
        }
        for func in self.m.funcs.values() {
            self.function(func)?;
        }
        Ok(())
    }

    fn function(&mut self, func: &Function) -> Result<(), Error> {
        let tree = cf::structurize(self.m, func)?;
        let is_entry = func.id == self.m.entry_point;

        let mut params = Vec::new();
        for &(id, ty) in &func.params {
            let name = self.claim_name(id, "arg");
            match self.pointee(ty) {
                Some(pointee) => {
                    self.ptr_pointee.insert(id, pointee);
                    params.push(format!("thread {}& {name}", self.ty(pointee)?));
                }
                None => params.push(self.decl(ty, &name)?),
            }
        }
        let signature = if is_entry {
            let kw = match self.m.stage {
                Stage::Vertex => "vertex",
                Stage::Fragment => "fragment",
                Stage::Compute => "kernel",
                other => {
                    return Err(self.unsupported(format!("{} stage", other.name())));
                }
            };
            let ret = if self.output_fields.is_empty() { "void" } else { "StageOut" };
            let mut args = Vec::new();
            if !self.input_fields.is_empty() {
                args.push(format!("{} in [[stage_in]]", self.input_struct_name()));
            }
            args.extend(self.entry_args.iter().map(|a| a.decl.clone()));
            format!("{kw} {ret} main0({})", args.join(", "))
        } else {
            let fname = &self.func_names[&func.id];
            format!("{} {fname}({})", self.ty(func.ret)?, params.join(", "))
        };
        self.open(format!("{signature} {{"));
        if is_entry {
            if !self.output_fields.is_empty() {
                self.line("StageOut out;");
            }
            for (id, ty) in self.private_vars.clone() {
                let name = self.names[&id].clone();
                let d = self.decl(ty, &name)?;
                self.line(format!("{d};"));
            }
        }
        self.hoist_phis(func)?;
        self.region(func, &tree, is_entry)?;
        self.close();
        self.line("");
        Ok(())
    }

    fn hoist_phis(&mut self, func: &Function) -> Result<(), Error> {
        self.phi_assigns.clear();
        for block in &func.blocks {
            for inst in self.m.insts[block.insts.clone()].iter() {
                if inst.opcode != Op::PHI {
                    continue;
                }
                let id = inst.result_id.unwrap();
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("phi with unresolved type"))?;
                let name = self.claim_name(id, &format!("phi{id}"));
                let d = self.decl(ty, &name)?;
                self.line(format!("{d};"));
                for pair in inst.operands.chunks(2) {
                    let &[value, pred] = pair else {
                        return Err(Error::malformed("odd OpPhi operand list"));
                    };
                    let value = Id::new(value).ok_or_else(|| Error::malformed("zero phi value"))?;
                    let pred = Id::new(pred).ok_or_else(|| Error::malformed("zero phi label"))?;
                    self.phi_assigns.entry(pred).or_default().push((id, value));
                }
            }
        }
        Ok(())
    }

    fn block_stmts(&mut self, func: &Function, index: usize) -> Result<(), Error> {
        let block = &func.blocks[index];
        let insts: Vec<Inst> = block_body(self.m, block).cloned().collect();
        for inst in &insts {
            self.stmt(inst)?;
        }
        if let Some(assigns) = self.phi_assigns.get(&block.label).cloned() {
            for (phi, value) in assigns {
                let lhs = self.val(phi)?;
                let rhs = self.val(value)?;
                self.line(format!("{lhs} = {rhs};"));
            }
        }
        Ok(())
    }

    fn region(&mut self, func: &Function, region: &Region, is_entry: bool) -> Result<(), Error> {
        for node in &region.nodes {
            match node {
                Node::Block { index } => self.block_stmts(func, *index)?,
                Node::If { cond, then_region, else_region } => {
                    let c = self.val(*cond)?;
                    self.open(format!("if ({c}) {{"));
                    self.region(func, then_region, is_entry)?;
                    if else_region.nodes.is_empty() {
                        self.close();
                    } else {
                        self.indent -= 1;
                        self.line("} else {");
                        self.indent += 1;
                        self.region(func, else_region, is_entry)?;
                        self.close();
                    }
                }
                Node::Switch { selector, cases, default } => {
                    if cases.is_empty() {
                        self.region(func, default, is_entry)?;
                        continue;
                    }
                    let sel = self.val(*selector)?;
                    for (i, (literal, case)) in cases.iter().enumerate() {
                        let kw = if i == 0 { "if" } else { "} else if" };
                        if i > 0 {
                            self.indent -= 1;
                        }
                        self.open(format!("{kw} ({sel} == {}) {{", *literal as i32));
                        self.region(func, case, is_entry)?;
                    }
                    self.indent -= 1;
                    self.line("} else {");
                    self.indent += 1;
                    self.region(func, default, is_entry)?;
                    self.close();
                }
                Node::Loop { pre, cond, body, post } => {
                    self.open("while (true) {");
                    for &index in pre {
                        self.block_stmts(func, index)?;
                    }
                    let c = self.val(*cond)?;
                    self.line(format!("if (!({c})) break;"));
                    self.region(func, body, is_entry)?;
                    if let Some(index) = post {
                        self.block_stmts(func, *index)?;
                    }
                    self.close();
                }
                Node::Break => self.line("break;"),
                Node::Continue => self.line("continue;"),
                Node::Return { value } => {
                    if is_entry && !self.output_fields.is_empty() {
                        self.line("return out;");
                    } else {
                        match value {
                            Some(v) => {
                                let e = self.val(*v)?;
                                self.line(format!("return {e};"));
                            }
                            None => {
                                if self.indent > 1 {
                                    self.line("return;");
                                }
                            }
                        }
                    }
                }
                Node::Discard => self.line("discard_fragment();"),
            }
        }
        Ok(())
    }

    fn temp(&mut self, inst: &Inst, expr: String) -> Result<(), Error> {
        let id = inst.result_id.unwrap();
        let ty = self
            .m
            .result_type(inst)
            .ok_or_else(|| self.unsupported(format!("{:?} with unresolved type", inst.opcode)))?;
        let fallback = format!("t{id}");
        let name = self.claim_name(id, &fallback);
        let d = self.decl(ty, &name)?;
        self.line(format!("{d} = {expr};"));
        Ok(())
    }

    fn stmt(&mut self, inst: &Inst) -> Result<(), Error> {
        let op = inst.opcode;
        match op {
            Op::VARIABLE => {
                let id = inst.result_id.unwrap();
                let pointee = self
                    .pointee(self.m.result_type(inst).ok_or_else(|| {
                        self.unsupported("local variable with unresolved type")
                    })?)
                    .ok_or_else(|| Error::malformed("OpVariable with a non-pointer type"))?;
                let name = self.claim_name(id, &format!("v{id}"));
                self.ptr_pointee.insert(id, pointee);
                let d = self.decl(pointee, &name)?;
                match inst.operands.get(1).copied().and_then(Id::new) {
                    Some(init) => {
                        let e = self.val(init)?;
                        self.line(format!("{d} = {e};"));
                    }
                    None => self.line(format!("{d};")),
                }
            }
            Op::LOAD | Op::COPY_OBJECT | Op::IMAGE | Op::SAMPLED_IMAGE => {
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::STORE => {
                let lhs = self.val(inst.id_operand(0)?)?;
                let rhs = self.val(inst.id_operand(1)?)?;
                self.line(format!("{lhs} = {rhs};"));
            }
            Op::ACCESS_CHAIN | Op::IN_BOUNDS_ACCESS_CHAIN => self.access_chain(inst)?,
            Op::PHI => {}

            Op::COMPOSITE_CONSTRUCT => {
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("construct with unresolved type"))?;
                let mut args = Vec::new();
                for i in 0..inst.operands.len() {
                    args.push(self.val(inst.id_operand(i)?)?);
                }
                let e = format!("{}({})", self.ty(ty)?, args.join(", "));
                self.temp(inst, e)?;
            }
            Op::COMPOSITE_EXTRACT => {
                let base = self.val(inst.id_operand(0)?)?;
                let base_ty = self
                    .m
                    .value_type(inst.id_operand(0)?)
                    .ok_or_else(|| self.unsupported("extract from unresolved type"))?;
                let expr = self.indexed(base, base_ty, &inst.operands[1..])?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::VECTOR_SHUFFLE => self.vector_shuffle(inst)?,

            Op::IMAGE_SAMPLE_IMPLICIT_LOD | Op::IMAGE_SAMPLE_EXPLICIT_LOD => {
                let tex = self.val(inst.id_operand(0)?)?;
                let coord = self.val(inst.id_operand(1)?)?;
                let sampler = self
                    .samplers
                    .get(&tex)
                    .cloned()
                    .unwrap_or_else(|| format!("{tex}_sampler"));
                let lod = if op == Op::IMAGE_SAMPLE_EXPLICIT_LOD {
                    match inst.operands.get(2) {
                        Some(&mask) if mask & 0x2 != 0 => Some(self.val(inst.id_operand(3)?)?),
                        _ => None,
                    }
                } else {
                    None
                };
                let e = match lod {
                    Some(lod) => format!("{tex}.sample({sampler}, {coord}, level({lod}))"),
                    None => format!("{tex}.sample({sampler}, {coord})"),
                };
                self.temp(inst, e)?;
            }

            Op::CONVERT_F_TO_S | Op::CONVERT_F_TO_U | Op::CONVERT_S_TO_F
            | Op::CONVERT_U_TO_F => {
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("conversion with unresolved type"))?;
                let x = self.val(inst.id_operand(0)?)?;
                let e = format!("{}({x})", self.ty(ty)?);
                self.temp(inst, e)?;
            }
            Op::BITCAST => {
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("bitcast with unresolved type"))?;
                let x = self.val(inst.id_operand(0)?)?;
                self.temp(inst, format!("as_type<{}>({x})", self.ty(ty)?))?;
            }

            Op::S_NEGATE | Op::F_NEGATE => {
                let x = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), format!("(-{x})"));
            }
            Op::LOGICAL_NOT => {
                let x = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), format!("(!{x})"));
            }
            Op::SELECT => {
                let c = self.val(inst.id_operand(0)?)?;
                let a = self.val(inst.id_operand(1)?)?;
                let b = self.val(inst.id_operand(2)?)?;
                self.temp(inst, format!("({c} ? {a} : {b})"))?;
            }
            Op::DOT => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("dot({a}, {b})"))?;
            }
            Op::F_REM | Op::F_MOD => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("fmod({a}, {b})"))?;
            }
            Op::TRANSPOSE => {
                let x = self.val(inst.id_operand(0)?)?;
                self.temp(inst, format!("transpose({x})"))?;
            }

            Op::FUNCTION_CALL => {
                let callee = inst.id_operand(0)?;
                let fname = self
                    .func_names
                    .get(&callee)
                    .cloned()
                    .ok_or(Error::UnresolvedId { id: callee.get(), inst_index: 0 })?;
                let mut args = Vec::new();
                for i in 1..inst.operands.len() {
                    args.push(self.val(inst.id_operand(i)?)?);
                }
                let call = format!("{fname}({})", args.join(", "));
                match self.m.result_type(inst).map(|t| &self.cx()[t]) {
                    Some(TypeKind::Void) => self.line(format!("{call};")),
                    _ => self.temp(inst, call)?,
                }
            }

            Op::EXT_INST => self.ext_inst(inst)?,

            _ => {
                if let Some(sym) = bin_op_symbol(op) {
                    let [a, b] = self.two(inst)?;
                    self.temp(inst, format!("{a} {sym} {b}"))?;
                } else {
                    return Err(self.unsupported(format!("instruction {op:?}")));
                }
            }
        }
        Ok(())
    }

    fn two(&self, inst: &Inst) -> Result<[String; 2], Error> {
        Ok([self.val(inst.id_operand(0)?)?, self.val(inst.id_operand(1)?)?])
    }

    fn indexed(&self, mut expr: String, mut ty: Type, indices: &[u32]) -> Result<String, Error> {
        for &i in indices {
            match self.cx()[ty].clone() {
                TypeKind::Vector { elem, .. } => {
                    let c = [".x", ".y", ".z", ".w"]
                        .get(i as usize)
                        .ok_or_else(|| Error::malformed("vector component out of range"))?;
                    expr.push_str(c);
                    ty = elem;
                }
                TypeKind::Matrix { column: next, .. } | TypeKind::Array { elem: next, .. } => {
                    expr.push_str(&format!("[{i}]"));
                    ty = next;
                }
                TypeKind::Struct { members } => {
                    let member = members
                        .get(i as usize)
                        .ok_or_else(|| Error::malformed("struct member out of range"))?;
                    let name = member
                        .name
                        .map(|n| self.cx()[n].to_owned())
                        .ok_or_else(|| self.unsupported("access into an unnamed struct member"))?;
                    expr.push('.');
                    expr.push_str(&name);
                    ty = member.ty;
                }
                other => return Err(self.unsupported(format!("indexing into {other:?}"))),
            }
        }
        Ok(expr)
    }

    fn access_chain(&mut self, inst: &Inst) -> Result<(), Error> {
        let base = inst.id_operand(0)?;
        let result = inst.result_id.unwrap();
        let mut next_index = 1;

        let (mut expr, mut ty): (String, Type);
        if self.block_members.keys().any(|&(v, _)| v == base) {
            let member = inst
                .id_operand(1)
                .ok()
                .and_then(|id| self.m.const_u32(id))
                .ok_or_else(|| self.unsupported("dynamic index into a block"))?;
            expr = self
                .block_members
                .get(&(base, member))
                .cloned()
                .ok_or_else(|| Error::malformed("block member out of range"))?;
            ty = self.member_type(base, member)?;
            next_index = 2;
        } else {
            expr = self.val(base)?;
            ty = self
                .ptr_pointee
                .get(&base)
                .copied()
                .ok_or_else(|| self.unsupported("access chain into a non-pointer value"))?;
        }

        for i in next_index..inst.operands.len() {
            let index_id = inst.id_operand(i)?;
            match self.cx()[ty].clone() {
                TypeKind::Struct { members } => {
                    let member = self
                        .m
                        .const_u32(index_id)
                        .ok_or_else(|| Error::malformed("dynamic struct index"))?;
                    let m = members
                        .get(member as usize)
                        .ok_or_else(|| Error::malformed("struct member out of range"))?;
                    let name = m
                        .name
                        .map(|n| self.cx()[n].to_owned())
                        .ok_or_else(|| self.unsupported("access into an unnamed struct member"))?;
                    expr.push('.');
                    expr.push_str(&name);
                    ty = m.ty;
                }
                TypeKind::Vector { elem, .. } => {
                    match self.m.const_u32(index_id) {
                        Some(c) if c < 4 => expr.push_str([".x", ".y", ".z", ".w"][c as usize]),
                        _ => {
                            let e = self.val(index_id)?;
                            expr.push_str(&format!("[{e}]"));
                        }
                    }
                    ty = elem;
                }
                TypeKind::Matrix { column: next, .. } | TypeKind::Array { elem: next, .. } => {
                    let e = self.val(index_id)?;
                    expr.push_str(&format!("[{e}]"));
                    ty = next;
                }
                other => return Err(self.unsupported(format!("indexing into {other:?}"))),
            }
        }

        self.names.insert(result, expr);
        self.ptr_pointee.insert(result, ty);
        Ok(())
    }

    fn member_type(&self, var: Id, member: u32) -> Result<Type, Error> {
        let pointee = self
            .ptr_pointee
            .get(&var)
            .copied()
            .ok_or_else(|| self.unsupported("member access into a non-pointer value"))?;
        match &self.cx()[pointee] {
            TypeKind::Struct { members } => members
                .get(member as usize)
                .map(|m| m.ty)
                .ok_or_else(|| Error::malformed("struct member out of range")),
            _ => Err(Error::malformed("member access into a non-struct")),
        }
    }

    fn vector_shuffle(&mut self, inst: &Inst) -> Result<(), Error> {
        let a_id = inst.id_operand(0)?;
        let a = self.val(a_id)?;
        let b = self.val(inst.id_operand(1)?)?;
        let a_len = match self.m.value_type(a_id).map(|t| self.cx()[t].clone()) {
            Some(TypeKind::Vector { count, .. }) => count,
            _ => return Err(self.unsupported("shuffle of a non-vector")),
        };
        let comps = &inst.operands[2..];
        let lane_char = |lane: u32| -> Result<char, Error> {
            b"xyzw"
                .get(lane as usize)
                .map(|&b| char::from(b))
                .ok_or_else(|| Error::malformed("shuffle lane out of range"))
        };
        let expr = if comps.iter().all(|&c| c < a_len) {
            let mut s = format!("{a}.");
            for &c in comps {
                s.push(lane_char(c)?);
            }
            s
        } else {
            let ty = self
                .m
                .result_type(inst)
                .ok_or_else(|| self.unsupported("shuffle with unresolved type"))?;
            let mut args = Vec::with_capacity(comps.len());
            for &c in comps {
                let (src, lane) = if c < a_len { (&a, c) } else { (&b, c - a_len) };
                args.push(format!("{src}.{}", lane_char(lane)?));
            }
            format!("{}({})", self.ty(ty)?, args.join(", "))
        };
        self.temp(inst, expr)
    }

    fn ext_inst(&mut self, inst: &Inst) -> Result<(), Error> {
        let set = inst.id_operand(0)?;
        if Some(set) != self.m.glsl_std_450 {
            let name = self.m.ext_imports.get(&set).map_or("?", String::as_str);
            return Err(self.unsupported(format!("extended instruction set {name}")));
        }
        let number = inst.operands[1];
        let mut args = Vec::new();
        for i in 2..inst.operands.len() {
            args.push(self.val(inst.id_operand(i)?)?);
        }
        let f = msl450_name(number)
            .ok_or_else(|| self.unsupported(format!("GLSL.std.450 instruction {number}")))?;
        self.temp(inst, format!("{f}({})", args.join(", ")))
    }
}

fn bin_op_symbol(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::I_ADD | Op::F_ADD => "+",
        Op::I_SUB | Op::F_SUB => "-",
        // simd types define `*` for the matrix products too.
        Op::I_MUL
        | Op::F_MUL
        | Op::VECTOR_TIMES_SCALAR
        | Op::MATRIX_TIMES_SCALAR
        | Op::VECTOR_TIMES_MATRIX
        | Op::MATRIX_TIMES_VECTOR
        | Op::MATRIX_TIMES_MATRIX => "*",
        Op::U_DIV | Op::S_DIV | Op::F_DIV => "/",
        Op::U_MOD | Op::S_REM | Op::S_MOD => "%",
        Op::LOGICAL_AND => "&&",
        Op::LOGICAL_OR => "||",
        Op::I_EQUAL | Op::F_ORD_EQUAL | Op::LOGICAL_EQUAL => "==",
        Op::I_NOT_EQUAL | Op::F_ORD_NOT_EQUAL | Op::LOGICAL_NOT_EQUAL => "!=",
        Op::U_LESS_THAN | Op::S_LESS_THAN | Op::F_ORD_LESS_THAN => "<",
        Op::U_LESS_THAN_EQUAL | Op::S_LESS_THAN_EQUAL | Op::F_ORD_LESS_THAN_EQUAL => "<=",
        Op::U_GREATER_THAN | Op::S_GREATER_THAN | Op::F_ORD_GREATER_THAN => ">",
        Op::U_GREATER_THAN_EQUAL | Op::S_GREATER_THAN_EQUAL | Op::F_ORD_GREATER_THAN_EQUAL => {
            ">="
        }
        _ => return None,
    })
}

fn msl450_name(number: u32) -> Option<&'static str> {
    Some(match number {
        glsl450::F_ABS => "abs",
        glsl450::FLOOR => "floor",
        glsl450::CEIL => "ceil",
        glsl450::FRACT => "fract",
        glsl450::SIN => "sin",
        glsl450::COS => "cos",
        glsl450::TAN => "tan",
        glsl450::POW => "pow",
        glsl450::EXP => "exp",
        glsl450::LOG => "log",
        glsl450::EXP2 => "exp2",
        glsl450::LOG2 => "log2",
        glsl450::SQRT => "sqrt",
        glsl450::INVERSE_SQRT => "rsqrt",
        glsl450::F_MIN => "min",
        glsl450::F_MAX => "max",
        glsl450::F_CLAMP => "clamp",
        glsl450::F_MIX => "mix",
        glsl450::STEP => "step",
        glsl450::SMOOTH_STEP => "smoothstep",
        glsl450::FMA => "fma",
        glsl450::LENGTH => "length",
        glsl450::DISTANCE => "distance",
        glsl450::CROSS => "cross",
        glsl450::NORMALIZE => "normalize",
        glsl450::REFLECT => "reflect",
        _ => return None,
    })
}

//! GLSL and GLSL ES source emission.
//!
//! One emitter serves both dialects; `Target::version`/`Target::es` pick the
//! legacy surface (`attribute`/`varying`, `gl_FragColor`, `texture2D`) or
//! the modern one (`in`/`out`, named outputs, `texture`). Uniform blocks are
//! flattened into loose uniforms, which is what GL hosts without UBO support
//! expect and what keeps the binding map uniform across targets.
//!
//! SSA values become named temporaries, one declaration per value
//! instruction; pure lvalue producers (loads, access chains, extracts) stay
//! inline expressions so the text reads like hand-written code.

use super::{
    Bindings, Emitted, Namer, Output, RegisterClass, Target, block_body, fmt_float,
    gl_builtin_spelling,
};
use crate::cf::{self, Node, Region};
use crate::spv::{Id, Inst, Op, glsl450};
use crate::{
    ConstValue, Context, Diag, Error, Function, FxIndexMap, ImageDim, Module, Stage,
    StorageClass, Type, TypeKind,
};

pub fn emit(module: &Module, target: &Target) -> Result<Emitted, Error> {
    Emitter::new(module, target).run()
}

/// GLSL spelling of a non-aggregate type. `None` for shapes GLSL cannot
/// spell in an expression position.
pub(crate) fn type_name(cx: &Context, ty: Type) -> Option<String> {
    Some(match &cx[ty] {
        TypeKind::Void => "void".to_owned(),
        TypeKind::Bool => "bool".to_owned(),
        TypeKind::Int { signed: true, .. } => "int".to_owned(),
        TypeKind::Int { signed: false, .. } => "uint".to_owned(),
        TypeKind::Float { .. } => "float".to_owned(),
        TypeKind::Vector { elem, count } => match &cx[*elem] {
            TypeKind::Float { .. } => format!("vec{count}"),
            TypeKind::Int { signed: true, .. } => format!("ivec{count}"),
            TypeKind::Int { signed: false, .. } => format!("uvec{count}"),
            TypeKind::Bool => format!("bvec{count}"),
            _ => return None,
        },
        TypeKind::Matrix { column, count } => {
            let TypeKind::Vector { count: rows, .. } = cx[*column] else {
                return None;
            };
            if rows == *count {
                format!("mat{count}")
            } else {
                format!("mat{count}x{rows}")
            }
        }
        TypeKind::Image { dim, .. } => sampler_name(*dim).to_owned(),
        TypeKind::SampledImage { image } => {
            let TypeKind::Image { dim, .. } = cx[*image] else {
                return None;
            };
            sampler_name(dim).to_owned()
        }
        TypeKind::Array { .. }
        | TypeKind::Struct { .. }
        | TypeKind::Pointer { .. }
        | TypeKind::Sampler
        | TypeKind::Function { .. } => return None,
    })
}

fn sampler_name(dim: ImageDim) -> &'static str {
    match dim {
        ImageDim::Dim1D => "sampler1D",
        ImageDim::Dim2D => "sampler2D",
        ImageDim::Dim3D => "sampler3D",
        ImageDim::Cube => "samplerCube",
    }
}

struct Emitter<'a> {
    m: &'a Module,
    t: &'a Target,
    /// Pre-130 desktop GLSL or ES 100: `attribute`/`varying` declarations,
    /// `gl_FragColor`, suffixed texture functions.
    legacy: bool,
    namer: Namer,
    bindings: Bindings,
    diags: Vec<Diag>,
    /// Value id -> expression or temporary name.
    names: FxIndexMap<Id, String>,
    /// Pointer id -> pointee type, for access-chain walking.
    ptr_pointee: FxIndexMap<Id, Type>,
    /// Flattened uniform-block member names, by (variable, member index).
    block_members: FxIndexMap<(Id, u32), String>,
    /// Variables whose struct members are built-ins (`gl_PerVertex`).
    builtin_blocks: FxIndexMap<Id, Id>,
    func_names: FxIndexMap<Id, String>,
    /// Predecessor label -> pending phi assignments `(phi, value)`.
    phi_assigns: FxIndexMap<Id, Vec<(Id, Id)>>,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(m: &'a Module, t: &'a Target) -> Self {
        Emitter {
            m,
            t,
            legacy: if t.es { t.version < 300 } else { t.version < 130 },
            namer: Namer::new(t.dialect),
            bindings: Bindings::default(),
            diags: Vec::new(),
            names: FxIndexMap::default(),
            ptr_pointee: FxIndexMap::default(),
            block_members: FxIndexMap::default(),
            builtin_blocks: FxIndexMap::default(),
            func_names: FxIndexMap::default(),
            phi_assigns: FxIndexMap::default(),
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
            .ok_or_else(|| self.unsupported(format!("type {:?} has no GLSL spelling", self.cx()[ty])))
    }

    /// `type name` declaration fragment, with array types in declarator form.
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
            ConstValue::Uint(v) => {
                if self.legacy { v.to_string() } else { format!("{v}u") }
            }
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
        self.header();
        self.globals()?;
        self.functions()?;
        Ok(Emitted {
            output: Output::Text(self.out),
            bindings: self.bindings.into_map(),
            diags: self.diags,
        })
    }

    fn header(&mut self) {
        let es = if self.t.es && self.t.version >= 300 { " es" } else { "" };
        self.line(format!("#version {}{es}", self.t.version));
        if self.t.es {
            let precision = match self.m.stage {
                Stage::Fragment => "mediump",
                _ => "highp",
            };
            self.line(format!("precision {precision} float;"));
        }
        self.line("");
    }

    fn globals(&mut self) -> Result<(), Error> {
        for (&id, var) in &self.m.vars {
            self.global_var(id, var.type_id, var.storage, var.initializer)?;
        }
        if !self.m.vars.is_empty() {
            self.line("");
        }
        Ok(())
    }

    fn global_var(
        &mut self,
        id: Id,
        type_id: Id,
        storage: StorageClass,
        initializer: Option<Id>,
    ) -> Result<(), Error> {
        let pointee_id = self
            .m
            .pointee_type_id(type_id)
            .ok_or_else(|| Error::malformed(format!("variable %{id} has a non-pointer type")))?;
        let pointee = self
            .m
            .type_of(pointee_id)
            .ok_or(Error::UnresolvedId { id: pointee_id.get(), inst_index: 0 })?;
        self.ptr_pointee.insert(id, pointee);

        // Built-in variables have fixed spellings and no declaration.
        if let Some(b) = self.m.builtin(id) {
            let spelling = gl_builtin_spelling(self.m.stage, b)
                .ok_or_else(|| self.unsupported(format!("built-in {b:?} in this stage")))?;
            self.names.insert(id, spelling.to_owned());
            return Ok(());
        }
        // A struct whose members are built-ins (`gl_PerVertex`): accesses
        // resolve per member, the variable itself is never spelled.
        if matches!(self.cx()[pointee], TypeKind::Struct { .. })
            && self.m.member_builtin(pointee_id, 0).is_some()
        {
            self.builtin_blocks.insert(id, pointee_id);
            return Ok(());
        }

        match storage {
            StorageClass::Input => {
                let name = self.claim_name(id, "input");
                let kw = match (self.legacy, self.m.stage) {
                    (true, Stage::Vertex) => "attribute",
                    (true, _) => "varying",
                    (false, _) => "in",
                };
                let d = self.decl(pointee, &name)?;
                self.line(format!("{kw} {d};"));
                let class = if self.m.stage == Stage::Vertex {
                    RegisterClass::Attribute
                } else {
                    RegisterClass::Varying
                };
                self.bindings.assign(class, &name);
            }
            StorageClass::Output => {
                if self.m.stage == Stage::Fragment && self.legacy {
                    self.names.insert(id, "gl_FragColor".to_owned());
                    return Ok(());
                }
                let name = self.claim_name(id, "output");
                let kw = if self.legacy { "varying" } else { "out" };
                let d = self.decl(pointee, &name)?;
                self.line(format!("{kw} {d};"));
                if self.m.stage == Stage::Vertex {
                    self.bindings.assign(RegisterClass::Varying, &name);
                }
            }
            StorageClass::Uniform | StorageClass::PushConstant => {
                if let TypeKind::Struct { members } = self.cx()[pointee].clone() {
                    for (i, member) in members.iter().enumerate() {
                        let fallback = format!("u{i}");
                        let desired = member
                            .name
                            .map(|n| self.cx()[n].to_owned())
                            .unwrap_or(fallback);
                        let name = self.namer.claim(&desired);
                        let d = self.decl(member.ty, &name)?;
                        self.line(format!("uniform {d};"));
                        self.bindings.assign(RegisterClass::Uniform, &name);
                        self.block_members.insert((id, i as u32), name);
                    }
                } else {
                    let name = self.claim_name(id, "uniform_value");
                    let d = self.decl(pointee, &name)?;
                    self.line(format!("uniform {d};"));
                    self.bindings.assign(RegisterClass::Uniform, &name);
                }
            }
            StorageClass::UniformConstant => {
                let name = self.claim_name(id, "tex");
                let d = self.decl(pointee, &name)?;
                self.line(format!("uniform {d};"));
                let class = match self.cx()[pointee] {
                    TypeKind::Image { .. } | TypeKind::SampledImage { .. } => {
                        RegisterClass::Texture
                    }
                    _ => RegisterClass::Uniform,
                };
                self.bindings.assign(class, &name);
            }
            StorageClass::Private => {
                let name = self.claim_name(id, "global");
                let d = self.decl(pointee, &name)?;
                match initializer {
                    Some(init) => {
                        let e = self.val(init)?;
                        self.line(format!("{d} = {e};"));
                    }
                    None => self.line(format!("{d};")),
                }
            }
            other => {
                return Err(self.unsupported(format!("{other:?} storage at module scope")));
            }
        }
        Ok(())
    }

    fn functions(&mut self) -> Result<(), Error> {
        for (&id, _) in &self.m.funcs {
            let name = if id == self.m.entry_point {
                "main".to_owned()
            } else {
                let desired = self.m.name_of(id).unwrap_or("fn").to_owned();
                self.namer.claim(&desired)
            };
            self.func_names.insert(id, name);
        }
        // Callees precede callers in the decoded order, so emitting in that
        // order needs no forward declarations.
        for func in self.m.funcs.values() {
            self.function(func)?;
        }
        Ok(())
    }

    fn function(&mut self, func: &Function) -> Result<(), Error> {
        let tree = cf::structurize(self.m, func)?;

        let mut params = Vec::new();
        for &(id, ty) in &func.params {
            let name = self.claim_name(id, "arg");
            match self.pointee(ty) {
                Some(pointee) => {
                    self.ptr_pointee.insert(id, pointee);
                    params.push(format!("inout {}", self.decl(pointee, &name)?));
                }
                None => params.push(self.decl(ty, &name)?),
            }
        }
        let fname = self.func_names[&func.id].clone();
        let signature = if func.id == self.m.entry_point {
            "void main()".to_owned()
        } else {
            format!("{} {fname}({})", self.ty(func.ret)?, params.join(", "))
        };
        self.open(format!("{signature} {{"));
        self.hoist_phis(func)?;
        self.region(func, &tree)?;
        self.close();
        self.line("");
        Ok(())
    }

    /// Phi results become plain variables assigned at the end of each
    /// predecessor block, declared up front.
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

    fn region(&mut self, func: &Function, region: &Region) -> Result<(), Error> {
        for node in &region.nodes {
            match node {
                Node::Block { index } => self.block_stmts(func, *index)?,
                Node::If { cond, then_region, else_region } => {
                    let c = self.val(*cond)?;
                    self.open(format!("if ({c}) {{"));
                    self.region(func, then_region)?;
                    if else_region.nodes.is_empty() {
                        self.close();
                    } else {
                        self.indent -= 1;
                        self.line("} else {");
                        self.indent += 1;
                        self.region(func, else_region)?;
                        self.close();
                    }
                }
                Node::Switch { selector, cases, default } => {
                    // Chained selection; no native switch in the versions
                    // this emitter spans.
                    if cases.is_empty() {
                        self.region(func, default)?;
                        continue;
                    }
                    let sel = self.val(*selector)?;
                    for (i, (literal, case)) in cases.iter().enumerate() {
                        let kw = if i == 0 { "if" } else { "} else if" };
                        if i > 0 {
                            self.indent -= 1;
                        }
                        self.open(format!("{kw} ({sel} == {}) {{", *literal as i32));
                        self.region(func, case)?;
                    }
                    self.indent -= 1;
                    self.line("} else {");
                    self.indent += 1;
                    self.region(func, default)?;
                    self.close();
                }
                Node::Loop { pre, cond, body, post } => {
                    self.open("while (true) {");
                    for &index in pre {
                        self.block_stmts(func, index)?;
                    }
                    let c = self.val(*cond)?;
                    self.line(format!("if (!({c})) break;"));
                    self.region(func, body)?;
                    if let Some(index) = post {
                        self.block_stmts(func, *index)?;
                    }
                    self.close();
                }
                Node::Break => self.line("break;"),
                Node::Continue => self.line("continue;"),
                Node::Return { value } => match value {
                    Some(v) => {
                        let e = self.val(*v)?;
                        self.line(format!("return {e};"));
                    }
                    None => {
                        if self.indent > 1 {
                            self.line("return;");
                        }
                    }
                },
                Node::Discard => self.line("discard;"),
            }
        }
        Ok(())
    }

    /// Declare a fresh temporary holding `expr`.
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
            Op::LOAD => {
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::STORE => {
                let lhs = self.val(inst.id_operand(0)?)?;
                let rhs = self.val(inst.id_operand(1)?)?;
                self.line(format!("{lhs} = {rhs};"));
            }
            Op::ACCESS_CHAIN | Op::IN_BOUNDS_ACCESS_CHAIN => self.access_chain(inst)?,
            Op::COPY_OBJECT => {
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::UNDEF => {
                let id = inst.result_id.unwrap();
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("undef with unresolved type"))?;
                let name = self.claim_name(id, &format!("t{id}"));
                let d = self.decl(ty, &name)?;
                self.line(format!("{d};"));
            }
            Op::PHI => {} // named and assigned via `hoist_phis`

            Op::COMPOSITE_CONSTRUCT => {
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("construct with unresolved type"))?;
                let args = self.all_operands(inst)?.join(", ");
                let e = format!("{}({args})", self.ty(ty)?);
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
            Op::COMPOSITE_INSERT => {
                let object = self.val(inst.id_operand(0)?)?;
                let composite = self.val(inst.id_operand(1)?)?;
                let ty = self
                    .m
                    .result_type(inst)
                    .ok_or_else(|| self.unsupported("insert with unresolved type"))?;
                let id = inst.result_id.unwrap();
                let name = self.claim_name(id, &format!("t{id}"));
                let d = self.decl(ty, &name)?;
                self.line(format!("{d} = {composite};"));
                let place = self.indexed(name, ty, &inst.operands[2..])?;
                self.line(format!("{place} = {object};"));
            }
            Op::VECTOR_SHUFFLE => self.vector_shuffle(inst)?,

            Op::SAMPLED_IMAGE => {
                // GLSL's samplers are already combined; the image operand's
                // expression stands for the pair.
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::IMAGE => {
                let expr = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), expr);
            }
            Op::IMAGE_SAMPLE_IMPLICIT_LOD | Op::IMAGE_SAMPLE_EXPLICIT_LOD => {
                self.image_sample(inst)?;
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
            Op::BITCAST => self.bitcast(inst)?,

            Op::S_NEGATE | Op::F_NEGATE => {
                let x = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), format!("(-{x})"));
            }
            Op::LOGICAL_NOT => {
                let x = self.val(inst.id_operand(0)?)?;
                self.names.insert(inst.result_id.unwrap(), format!("(!{x})"));
            }
            Op::SELECT => {
                let [c, a, b] = self.three(inst)?;
                self.temp(inst, format!("({c} ? {a} : {b})"))?;
            }
            Op::DOT => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("dot({a}, {b})"))?;
            }
            Op::F_REM | Op::F_MOD => {
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("mod({a}, {b})"))?;
            }
            Op::OUTER_PRODUCT => {
                if self.legacy {
                    self.diags
                        .push(Diag::warn("outerProduct needs GLSL 120, output may not compile"));
                }
                let [a, b] = self.two(inst)?;
                self.temp(inst, format!("outerProduct({a}, {b})"))?;
            }
            Op::TRANSPOSE => {
                if self.legacy {
                    self.diags
                        .push(Diag::warn("transpose needs GLSL 120, output may not compile"));
                }
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
                for (i, _) in inst.operands.iter().enumerate().skip(1) {
                    args.push(self.val(inst.id_operand(i)?)?);
                }
                let call = format!("{fname}({})", args.join(", "));
                let ret = self.m.result_type(inst);
                match ret.map(|t| &self.cx()[t]) {
                    Some(TypeKind::Void) => self.line(format!("{call};")),
                    _ => self.temp(inst, call)?,
                }
            }

            Op::EXT_INST => self.ext_inst(inst)?,

            _ => {
                if let Some(sym) = bin_op_symbol(op) {
                    let [a, b] = self.two(inst)?;
                    self.temp(inst, format!("{a} {sym} {b}"))?;
                } else if let Some((sym, vec_fn)) = compare_op(op) {
                    let [a, b] = self.two(inst)?;
                    let vector_result = matches!(
                        self.m.result_type(inst).map(|t| &self.cx()[t]),
                        Some(TypeKind::Vector { .. })
                    );
                    let e = if vector_result {
                        format!("{vec_fn}({a}, {b})")
                    } else {
                        format!("{a} {sym} {b}")
                    };
                    self.temp(inst, e)?;
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

    fn three(&self, inst: &Inst) -> Result<[String; 3], Error> {
        Ok([
            self.val(inst.id_operand(0)?)?,
            self.val(inst.id_operand(1)?)?,
            self.val(inst.id_operand(2)?)?,
        ])
    }

    fn all_operands(&self, inst: &Inst) -> Result<Vec<String>, Error> {
        (0..inst.operands.len()).map(|i| self.val(inst.id_operand(i)?)).collect()
    }

    /// Apply literal indices to an expression of aggregate type.
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
                TypeKind::Matrix { column, .. } => {
                    expr.push_str(&format!("[{i}]"));
                    ty = column;
                }
                TypeKind::Array { elem, .. } => {
                    expr.push_str(&format!("[{i}]"));
                    ty = elem;
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
                other => {
                    return Err(self.unsupported(format!("indexing into {other:?}")));
                }
            }
        }
        Ok(expr)
    }

    fn access_chain(&mut self, inst: &Inst) -> Result<(), Error> {
        let base = inst.id_operand(0)?;
        let result = inst.result_id.unwrap();
        let mut next_index = 1;

        let (mut expr, mut ty): (String, Type);
        if self.block_members.contains_key(&(base, 0))
            || self.block_members.keys().any(|&(v, _)| v == base)
        {
            // Flattened uniform block: the leading constant index picks the
            // loose uniform.
            let member = inst
                .id_operand(1)
                .ok()
                .and_then(|id| self.m.const_u32(id))
                .ok_or_else(|| self.unsupported("dynamic index into a uniform block"))?;
            expr = self
                .block_members
                .get(&(base, member))
                .cloned()
                .ok_or_else(|| Error::malformed("uniform block member out of range"))?;
            ty = self.member_type(base, member)?;
            next_index = 2;
        } else if let Some(&struct_id) = self.builtin_blocks.get(&base) {
            let member = inst
                .id_operand(1)
                .ok()
                .and_then(|id| self.m.const_u32(id))
                .ok_or_else(|| self.unsupported("dynamic index into a built-in block"))?;
            let b = self
                .m
                .member_builtin(struct_id, member)
                .ok_or_else(|| self.unsupported("non-built-in member of a built-in block"))?;
            expr = gl_builtin_spelling(self.m.stage, b)
                .ok_or_else(|| self.unsupported(format!("built-in {b:?} in this stage")))?
                .to_owned();
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
                        Some(c) if c < 4 => {
                            expr.push_str([".x", ".y", ".z", ".w"][c as usize]);
                        }
                        _ => {
                            let e = self.val(index_id)?;
                            expr.push_str(&format!("[{e}]"));
                        }
                    }
                    ty = elem;
                }
                TypeKind::Matrix { column, .. } => {
                    let e = self.val(index_id)?;
                    expr.push_str(&format!("[{e}]"));
                    ty = column;
                }
                TypeKind::Array { elem, .. } => {
                    let e = self.val(index_id)?;
                    expr.push_str(&format!("[{e}]"));
                    ty = elem;
                }
                other => {
                    return Err(self.unsupported(format!("indexing into {other:?}")));
                }
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
        let b_id = inst.id_operand(1)?;
        let a = self.val(a_id)?;
        let b = self.val(b_id)?;
        let a_len = match self.m.value_type(a_id).map(|t| self.cx()[t].clone()) {
            Some(TypeKind::Vector { count, .. }) => count,
            _ => return Err(self.unsupported("shuffle of a non-vector")),
        };
        let comps = &inst.operands[2..];
        let swizzle = |base: &str, lanes: &[u32]| -> Option<String> {
            let mut s = format!("{base}.");
            for &lane in lanes {
                s.push(char::from(*b"xyzw".get(lane as usize)?));
            }
            Some(s)
        };
        // Single-source shuffles collapse to a swizzle.
        let expr = if comps.iter().all(|&c| c < a_len) {
            swizzle(&a, comps).ok_or_else(|| Error::malformed("shuffle lane out of range"))?
        } else if comps.iter().all(|&c| c >= a_len) {
            let lanes: Vec<u32> = comps.iter().map(|&c| c - a_len).collect();
            swizzle(&b, &lanes).ok_or_else(|| Error::malformed("shuffle lane out of range"))?
        } else {
            let ty = self
                .m
                .result_type(inst)
                .ok_or_else(|| self.unsupported("shuffle with unresolved type"))?;
            let mut args = Vec::with_capacity(comps.len());
            for &c in comps {
                let (src, lane) = if c < a_len { (&a, c) } else { (&b, c - a_len) };
                args.push(
                    swizzle(src, &[lane])
                        .ok_or_else(|| Error::malformed("shuffle lane out of range"))?,
                );
            }
            format!("{}({})", self.ty(ty)?, args.join(", "))
        };
        self.temp(inst, expr)
    }

    fn image_sample(&mut self, inst: &Inst) -> Result<(), Error> {
        let sampled = inst.id_operand(0)?;
        let tex = self.val(sampled)?;
        let coord = self.val(inst.id_operand(1)?)?;
        let dim = self.image_dim(sampled)?;
        let explicit_lod = inst.opcode == Op::IMAGE_SAMPLE_EXPLICIT_LOD;
        // Image-operands mask; only `Lod` (0x2) is consumed.
        let lod = if explicit_lod {
            match inst.operands.get(2) {
                Some(&mask) if mask & 0x2 != 0 => Some(self.val(inst.id_operand(3)?)?),
                _ => None,
            }
        } else {
            None
        };
        let expr = if self.legacy {
            let base = match dim {
                ImageDim::Cube => "textureCube",
                ImageDim::Dim3D => "texture3D",
                _ => "texture2D",
            };
            match lod {
                Some(lod) => format!("{base}Lod({tex}, {coord}, {lod})"),
                None => format!("{base}({tex}, {coord})"),
            }
        } else {
            match lod {
                Some(lod) => format!("textureLod({tex}, {coord}, {lod})"),
                None => format!("texture({tex}, {coord})"),
            }
        };
        self.temp(inst, expr)
    }

    fn image_dim(&self, sampled: Id) -> Result<ImageDim, Error> {
        let ty = self
            .m
            .value_type(sampled)
            .ok_or_else(|| self.unsupported("sample of an untyped image"))?;
        match self.cx()[ty].clone() {
            TypeKind::SampledImage { image } | TypeKind::Pointer { pointee: image, .. } => {
                match self.cx()[image] {
                    TypeKind::Image { dim, .. } => Ok(dim),
                    _ => Err(self.unsupported("sample of a non-image")),
                }
            }
            TypeKind::Image { dim, .. } => Ok(dim),
            _ => Err(self.unsupported("sample of a non-image")),
        }
    }

    fn bitcast(&mut self, inst: &Inst) -> Result<(), Error> {
        if self.legacy {
            return Err(self.unsupported("bitcast needs GLSL 330 / ES 300"));
        }
        let ty = self
            .m
            .result_type(inst)
            .ok_or_else(|| self.unsupported("bitcast with unresolved type"))?;
        let x = self.val(inst.id_operand(0)?)?;
        let scalar = |t: Type| match &self.cx()[t] {
            TypeKind::Vector { elem, .. } => self.cx()[*elem].clone(),
            other => other.clone(),
        };
        let f = match scalar(ty) {
            TypeKind::Float { .. } => {
                let src = self
                    .m
                    .value_type(inst.id_operand(0)?)
                    .ok_or_else(|| self.unsupported("bitcast of an untyped value"))?;
                match scalar(src) {
                    TypeKind::Int { signed: false, .. } => "uintBitsToFloat",
                    _ => "intBitsToFloat",
                }
            }
            TypeKind::Int { signed: false, .. } => "floatBitsToUint",
            TypeKind::Int { signed: true, .. } => "floatBitsToInt",
            _ => return Err(self.unsupported("bitcast between these types")),
        };
        self.temp(inst, format!("{f}({x})"))
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
        if number == glsl450::FMA {
            let [a, b, c] = <[String; 3]>::try_from(args)
                .map_err(|_| Error::malformed("fma needs three operands"))?;
            return self.temp(inst, format!("{a} * {b} + {c}"));
        }
        let f = glsl450_name(number)
            .ok_or_else(|| self.unsupported(format!("GLSL.std.450 instruction {number}")))?;
        self.temp(inst, format!("{f}({})", args.join(", ")))
    }
}

fn bin_op_symbol(op: Op) -> Option<&'static str> {
    Some(match op {
        Op::I_ADD | Op::F_ADD => "+",
        Op::I_SUB | Op::F_SUB => "-",
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
        _ => return None,
    })
}

/// Scalar operator and vector function for a comparison opcode.
fn compare_op(op: Op) -> Option<(&'static str, &'static str)> {
    Some(match op {
        Op::I_EQUAL | Op::F_ORD_EQUAL | Op::LOGICAL_EQUAL => ("==", "equal"),
        Op::I_NOT_EQUAL | Op::F_ORD_NOT_EQUAL | Op::LOGICAL_NOT_EQUAL => ("!=", "notEqual"),
        Op::U_LESS_THAN | Op::S_LESS_THAN | Op::F_ORD_LESS_THAN => ("<", "lessThan"),
        Op::U_LESS_THAN_EQUAL | Op::S_LESS_THAN_EQUAL | Op::F_ORD_LESS_THAN_EQUAL => {
            ("<=", "lessThanEqual")
        }
        Op::U_GREATER_THAN | Op::S_GREATER_THAN | Op::F_ORD_GREATER_THAN => (">", "greaterThan"),
        Op::U_GREATER_THAN_EQUAL | Op::S_GREATER_THAN_EQUAL | Op::F_ORD_GREATER_THAN_EQUAL => {
            (">=", "greaterThanEqual")
        }
        _ => return None,
    })
}

fn glsl450_name(number: u32) -> Option<&'static str> {
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
        glsl450::INVERSE_SQRT => "inversesqrt",
        glsl450::F_MIN => "min",
        glsl450::F_MAX => "max",
        glsl450::F_CLAMP => "clamp",
        glsl450::F_MIX => "mix",
        glsl450::STEP => "step",
        glsl450::SMOOTH_STEP => "smoothstep",
        glsl450::LENGTH => "length",
        glsl450::DISTANCE => "distance",
        glsl450::CROSS => "cross",
        glsl450::NORMALIZE => "normalize",
        glsl450::REFLECT => "reflect",
        _ => return None,
    })
}

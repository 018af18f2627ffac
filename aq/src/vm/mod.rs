//! Dispatch loop over a loaded [`Program`].
//!
//! Calls push an [`Activation`] with a fresh frame arena; the loop runs until
//! the stack drops back to where the outermost call started. Every fault is
//! fatal: the stack is unwound, its frame arenas released, and the error
//! returned to the embedder.

mod activation;
pub mod operators;

use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use log::{debug, trace, warn};

pub use activation::{Activation, ActivationStack};

use crate::builtin::{BuiltinContext, BuiltinRegistry};
use crate::class::{CONSTRUCTOR, ClassRegistry};
use crate::error::{VmError, VmResult};
use crate::function::Function;
use crate::instruction::{Instruction, Slot};
use crate::memory::{ArenaId, ArenaKind, DEFAULT_MAX_ELEMENTS, ObjectStore};
use crate::object::{Object, ObjectReference, Payload, Type, TypeTag};
use crate::op::{Op, Relation};
use crate::program::Program;

#[derive(Debug, Clone)]
pub struct VMCreateInfo {
    /// Activations allowed on the stack before a call faults.
    pub max_depth: usize,
    /// Slots a single array may hold, whether allocated by NEW or grown by
    /// indexing.
    pub max_elements: usize,
}

impl Default for VMCreateInfo {
    fn default() -> Self {
        Self {
            max_depth: 1024,
            max_elements: DEFAULT_MAX_ELEMENTS,
        }
    }
}

pub struct Vm {
    functions: HashMap<String, Rc<Function>>,
    /// Class name to method name to method.
    methods: HashMap<String, HashMap<String, Rc<Function>>>,
    classes: ClassRegistry,
    builtins: BuiltinRegistry,
    store: ObjectStore,
    global: ArenaId,
    entry: String,
    activations: ActivationStack,
    max_depth: usize,
    out: Box<dyn Write>,
}

fn locate(global: ArenaId, frame: ArenaId, raw: u64) -> ObjectReference {
    match Slot::decode(raw) {
        Slot::Frame(index) => ObjectReference::new(frame, index),
        Slot::Global(index) => ObjectReference::new(global, index),
    }
}

fn check_arity(op: Op, found: usize) -> VmResult<()> {
    let (min, max) = match op.arity() {
        Some(count) => (count, count),
        None => match op {
            Op::New => (2, 3),
            Op::Invoke => (2, usize::MAX),
            Op::InvokeMethod => (3, usize::MAX),
            _ => (0, usize::MAX),
        },
    };
    if found < min || found > max {
        return Err(VmError::BadOperands {
            op,
            expected: min,
            found,
        });
    }
    Ok(())
}

impl Vm {
    /// Loads `program`: lays out the global arena, fills its constant pool
    /// and indexes functions and methods by name.
    pub fn new(program: Program, builtins: BuiltinRegistry, info: VMCreateInfo) -> VmResult<Self> {
        let mut store = ObjectStore::with_limit(info.max_elements);
        let global = store.create(ArenaKind::Global);
        for decl in &program.globals {
            store.push(global, decl.instantiate())?;
        }
        for constant in program.constants {
            store.add_constant(global, Object::with_payload(constant).constant())?;
        }

        let functions = program
            .functions
            .into_iter()
            .map(|function| (function.name.clone(), Rc::new(function)))
            .collect();
        let methods = program
            .classes
            .iter()
            .map(|class| {
                let table = class
                    .methods()
                    .iter()
                    .map(|method| (method.name.clone(), Rc::new(method.clone())))
                    .collect();
                (class.name.clone(), table)
            })
            .collect();

        debug!(
            "loaded program: {} globals, {} classes, entry `{}`",
            program.globals.len(),
            program.classes.len(),
            program.entry
        );
        Ok(Self {
            functions,
            methods,
            classes: program.classes,
            builtins,
            store,
            global,
            entry: program.entry,
            activations: ActivationStack::new(),
            max_depth: info.max_depth,
            out: Box::new(io::stdout()),
        })
    }

    /// Redirects what builtins print.
    pub fn with_output(mut self, out: impl Write + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn global(&self) -> ArenaId {
        self.global
    }

    /// Current value of global slot `index`, after one reference hop.
    pub fn global_value(&self, index: usize) -> VmResult<&Payload> {
        self.store.payload(ObjectReference::new(self.global, index))
    }

    /// Runs the entry function to completion.
    pub fn run(&mut self) -> VmResult<()> {
        let entry = self.entry.clone();
        self.call(&entry, None, &[])
    }

    /// Runs `name` to completion, copying its return value into `result`.
    pub fn call(
        &mut self,
        name: &str,
        result: Option<ObjectReference>,
        args: &[ObjectReference],
    ) -> VmResult<()> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::UnknownFunction(name.to_owned()))?;
        let base = self.activations.depth();
        let outcome = self
            .enter(function, result, None, args)
            .and_then(|()| self.execute(base));
        if let Err(err) = &outcome {
            debug!("unwinding after fault: {err}");
            self.unwind(base);
        }
        outcome
    }

    fn unwind(&mut self, base: usize) {
        while self.activations.depth() > base {
            let Some(activation) = self.activations.pop() else {
                break;
            };
            if let Err(err) = self.store.release(activation.arena) {
                warn!("releasing frame of `{}`: {err}", activation.function.name);
            }
        }
    }

    fn execute(&mut self, base: usize) -> VmResult<()> {
        while self.activations.depth() > base {
            let Some(activation) = self.activations.current_mut() else {
                break;
            };
            if activation.is_finished() {
                self.leave()?;
                continue;
            }
            let function = Rc::clone(&activation.function);
            let frame = activation.arena;
            let pc = activation.pc;
            activation.pc += 1;

            let instruction = &function.code[pc];
            trace!("{}:{pc:>4}  {instruction}", function.name);
            self.step(instruction, frame, &function)?;
        }
        Ok(())
    }

    // ── activations ────────────────────────────────────────────────

    /// Pushes an activation of `function` with its arguments bound.
    fn enter(
        &mut self,
        function: Rc<Function>,
        result: Option<ObjectReference>,
        this: Option<ObjectReference>,
        args: &[ObjectReference],
    ) -> VmResult<()> {
        let depth = self.activations.depth();
        if depth >= self.max_depth {
            return Err(VmError::CallDepthExceeded(self.max_depth));
        }
        let arena = self.store.create(ArenaKind::Frame);
        if let Err(err) = self.bind_frame(&function, arena, this, args) {
            self.store.release(arena)?;
            return Err(err);
        }
        debug!("enter `{}` at depth {depth}", function.name);
        self.activations.push(Activation {
            function,
            arena,
            pc: 0,
            result,
        });
        Ok(())
    }

    fn bind_frame(
        &mut self,
        function: &Function,
        arena: ArenaId,
        this: Option<ObjectReference>,
        args: &[ObjectReference],
    ) -> VmResult<()> {
        for decl in &function.frame {
            self.store.push(arena, decl.instantiate())?;
        }
        let mut params = function.parameters.iter().skip(1).copied();
        if let Some(this) = this {
            let slot = params.next().ok_or_else(|| VmError::ArgumentCount {
                function: function.name.clone(),
                expected: 0,
                found: args.len(),
            })?;
            self.store
                .bind_reference(ObjectReference::new(arena, slot), this)?;
        }
        let params: Vec<usize> = params.collect();

        let fixed = if function.variadic {
            params.len().saturating_sub(1)
        } else {
            params.len()
        };
        if args.len() > fixed && !function.variadic {
            return Err(VmError::ArgumentCount {
                function: function.name.clone(),
                expected: fixed,
                found: args.len(),
            });
        }
        for (&param, &arg) in params.iter().zip(args).take(fixed) {
            self.bind_argument(ObjectReference::new(arena, param), arg)?;
        }

        if function.variadic {
            if let Some(&pack) = params.last() {
                let pack = ObjectReference::new(arena, pack);
                let rest = args.get(fixed..).unwrap_or_default();
                let array = self.store.new_array(&Object::auto(), 0)?;
                self.write_owned(pack, array)?;
                for (index, &arg) in rest.iter().enumerate() {
                    let element = self.store.element(pack, index)?;
                    self.store.assign(element, arg)?;
                }
            }
        }
        Ok(())
    }

    /// Reference parameters alias the caller's slot; everything else is
    /// copied in.
    fn bind_argument(&mut self, param: ObjectReference, arg: ObjectReference) -> VmResult<()> {
        if self.store.get(param)?.ty.primary() == TypeTag::Reference {
            let target = self.store.resolve(arg)?;
            self.store.bind_reference(param, target)
        } else {
            self.store.assign(param, arg)
        }
    }

    /// Pops the current activation, handing its return slot to the caller.
    fn leave(&mut self) -> VmResult<()> {
        let Some(activation) = self.activations.pop() else {
            return Ok(());
        };
        debug!("leave `{}`", activation.function.name);
        let returned = match (activation.result, activation.function.parameters.first()) {
            (Some(result), Some(&slot)) => {
                let slot = ObjectReference::new(activation.arena, slot);
                match self.store.payload(slot) {
                    Ok(Payload::Absent) => Ok(()),
                    Ok(_) => self.store.assign(result, slot),
                    Err(err) => Err(err),
                }
            }
            _ => Ok(()),
        };
        self.store.release(activation.arena)?;
        returned
    }

    fn jump(&mut self, function: &Function, target: u64) -> VmResult<()> {
        let bad = || VmError::BadBranchTarget {
            function: function.name.clone(),
            target,
        };
        let target = usize::try_from(target).map_err(|_| bad())?;
        if target > function.code.len() {
            return Err(bad());
        }
        if let Some(activation) = self.activations.current_mut() {
            activation.pc = target;
        }
        Ok(())
    }

    // ── dispatch ───────────────────────────────────────────────────

    fn step(&mut self, instruction: &Instruction, frame: ArenaId, function: &Function) -> VmResult<()> {
        let op = instruction.op;
        let operands = instruction.operands.as_slice();
        check_arity(op, operands.len())?;
        let global = self.global;
        let at = move |position: usize| locate(global, frame, operands[position]);

        match op {
            Op::Nop | Op::Wide => {}
            Op::Load | Op::Store | Op::Ptr => warn!("deprecated operator {op} ignored"),
            Op::New => {
                let size = (operands.len() == 3).then(|| at(2));
                self.new_object(at(0), at(1), size)?;
            }
            Op::Array => {
                let index = self.index(at(2))?;
                let element = self.store.element(at(1), index)?;
                self.store.bind_reference(at(0), element)?;
            }
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::Shl
            | Op::Shr
            | Op::And
            | Op::Or
            | Op::Xor => {
                let value =
                    operators::binary(op, self.store.payload(at(1))?, self.store.payload(at(2))?)?;
                self.store.write(at(0), value)?;
            }
            Op::Neg => {
                let value = operators::negate(self.store.payload(at(1))?)?;
                self.store.write(at(0), value)?;
            }
            Op::Refer => {
                let target = self.store.resolve(at(1))?;
                self.store.bind_reference(at(0), target)?;
            }
            Op::If => {
                let target = if operators::truthy(self.store.payload(at(0))?)? {
                    operands[1]
                } else {
                    operands[2]
                };
                self.jump(function, target)?;
            }
            Op::Cmp => {
                let relation = Relation::try_from(operands[1]).map_err(VmError::BadComparison)?;
                let ordering =
                    operators::compare(self.store.payload(at(2))?, self.store.payload(at(3))?)?;
                self.store
                    .write(at(0), Payload::Byte(relation.holds(ordering) as i8))?;
            }
            Op::Invoke => {
                let name = self.name(at(0))?;
                let slots: Vec<ObjectReference> = (1..operands.len()).map(at).collect();
                self.invoke(&name, &slots)?;
            }
            Op::Equal => self.store.assign(at(0), at(1))?,
            Op::Goto => self.jump(function, operands[0])?,
            Op::LoadConst => {
                let value = self.store.constant(global, operands[1] as usize)?.payload.clone();
                self.store.write(at(0), value)?;
            }
            Op::Convert => {
                let dst = self.store.resolve(at(0))?;
                let ty = self.store.get(dst)?.ty.clone();
                let value = operators::convert(self.store.payload(at(1))?, &ty)?;
                let value = self.store.duplicate(&value)?;
                self.write_owned(dst, value)?;
            }
            // Each execution of a declaration binds afresh; plain writes to
            // the sealed slot still fault.
            Op::Const => {
                let dst = self.store.resolve(at(0))?;
                self.store.unseal(dst)?;
                self.store.assign(dst, at(1))?;
                self.store.seal(dst)?;
            }
            Op::InvokeMethod => {
                let object = self.store.resolve(at(0))?;
                let name = self.name(at(1))?;
                let slots: Vec<ObjectReference> = (2..operands.len()).map(at).collect();
                self.invoke_method(object, &name, &slots)?;
            }
            Op::LoadMember => {
                let member = self.member(at(1), at(2))?;
                self.store.bind_reference(at(0), member)?;
            }
        }
        Ok(())
    }

    /// String held by a name operand.
    fn name(&self, at: ObjectReference) -> VmResult<String> {
        match self.store.payload(at)? {
            Payload::String(name) => Ok(name.clone()),
            other => Err(VmError::TypeMismatch {
                expected: TypeTag::String,
                found: other.tag(),
            }),
        }
    }

    fn index(&self, at: ObjectReference) -> VmResult<usize> {
        let value = self.store.payload(at)?;
        let number = value.as_number().ok_or(VmError::TypeMismatch {
            expected: TypeTag::Long,
            found: value.tag(),
        })?;
        let index = number.as_i64();
        usize::try_from(index).map_err(|_| VmError::InvalidIndex(index))
    }

    /// Writes a freshly built aggregate, releasing it if the write faults.
    fn write_owned(&mut self, at: ObjectReference, payload: Payload) -> VmResult<()> {
        let owned = payload.owned_arena();
        if let Err(err) = self.store.write(at, payload) {
            if let Some(id) = owned {
                self.store.release(id)?;
            }
            return Err(err);
        }
        Ok(())
    }

    fn invoke(&mut self, name: &str, slots: &[ObjectReference]) -> VmResult<()> {
        if let Some(function) = self.functions.get(name).cloned() {
            return self.enter(function, Some(slots[0]), None, &slots[1..]);
        }
        let builtin = self
            .builtins
            .get(name)
            .ok_or_else(|| VmError::UnknownFunction(name.to_owned()))?;
        trace!("builtin `{name}` with {} arguments", slots.len() - 1);
        let status = builtin(&mut BuiltinContext {
            store: &mut self.store,
            slots,
            out: &mut *self.out,
        });
        if status != 0 {
            return Err(VmError::BuiltinFailed {
                name: name.to_owned(),
                status,
            });
        }
        Ok(())
    }

    fn invoke_method(
        &mut self,
        object: ObjectReference,
        name: &str,
        slots: &[ObjectReference],
    ) -> VmResult<()> {
        let class = match &self.store.get(object)?.payload {
            Payload::Instance { class, .. } => class.clone(),
            other => {
                return Err(VmError::TypeMismatch {
                    expected: TypeTag::Class,
                    found: other.tag(),
                });
            }
        };
        let method = self
            .methods
            .get(&class)
            .and_then(|methods| methods.get(name))
            .cloned()
            .ok_or_else(|| VmError::UnknownMethod {
                class,
                method: name.to_owned(),
            })?;
        self.enter(method, Some(slots[0]), Some(object), &slots[1..])
    }

    /// Member slot named by `name` in the instance held by `object`.
    fn member(&self, object: ObjectReference, name: ObjectReference) -> VmResult<ObjectReference> {
        let (class, members) = match &self.store.read(object)?.payload {
            Payload::Instance { class, members } => (class.clone(), *members),
            other => {
                return Err(VmError::TypeMismatch {
                    expected: TypeTag::Class,
                    found: other.tag(),
                });
            }
        };
        let member = self.name(name)?;
        let slot = self
            .classes
            .get(&class)
            .ok_or_else(|| VmError::UnknownClass(class.clone()))?
            .member_slot(&member);
        match slot {
            Some(slot) => Ok(ObjectReference::new(members, slot)),
            None => Err(VmError::UnknownMember { class, member }),
        }
    }

    // ── allocation ─────────────────────────────────────────────────

    fn new_object(
        &mut self,
        dst: ObjectReference,
        ty: ObjectReference,
        size: Option<ObjectReference>,
    ) -> VmResult<()> {
        let count = match size {
            Some(size) => self.index(size)?,
            None => 0,
        };
        let prototype = self.store.read(ty)?;
        let class = match &prototype.payload {
            Payload::String(name) if prototype.assigned => Some(name.clone()),
            _ => None,
        };
        let Some(class) = class else {
            let tag = prototype.ty.primary();
            let value = if count == 0 {
                Payload::default_for(tag)
            } else {
                self.store
                    .new_array(&Object::typed(Type::scalar(tag)), count)?
            };
            return self.write_owned(dst, value);
        };

        let template = self
            .classes
            .get(&class)
            .ok_or_else(|| VmError::UnknownClass(class.clone()))?
            .template();
        if count == 0 {
            let instance = self.store.new_instance(&class, &template)?;
            self.write_owned(dst, instance)?;
            let this = self.store.resolve(dst)?;
            return self.construct(&class, this);
        }

        self.store.check_elements(count)?;
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.store.new_instance(&class, &template)?;
            elements.push(Object::with_payload(payload));
        }
        let array = self.store.array_of(elements)?;
        self.write_owned(dst, array)?;
        // Pushed last to first so the constructors run in element order.
        for index in (0..count).rev() {
            let this = self.store.element(dst, index)?;
            self.construct(&class, this)?;
        }
        Ok(())
    }

    fn construct(&mut self, class: &str, this: ObjectReference) -> VmResult<()> {
        let constructor = self
            .methods
            .get(class)
            .and_then(|methods| methods.get(CONSTRUCTOR))
            .cloned();
        match constructor {
            Some(constructor) => self.enter(constructor, None, Some(this), &[]),
            None => Ok(()),
        }
    }
}

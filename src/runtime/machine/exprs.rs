use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::bytecode::op_code::FOp;
use crate::error::RuntimeError;
use crate::runtime::machine::Machine;
use crate::runtime::store::{ConstantPools, Store};
use crate::runtime::value::{Obj, SetKey, StructInst, Value};

impl Machine {
    /// Evaluate one expression block starting at `*pc`, leaving `*pc` just
    /// past the terminating `FReturn` and returning the single result.
    ///
    /// Expressions run on the machine's dedicated expression stack, so
    /// arithmetic never perturbs unification cells.
    pub(crate) fn run_expr(
        &mut self,
        store: &Store,
        code: &[u8],
        pc: &mut usize,
        env_base: usize,
        pools: &Rc<RefCell<ConstantPools>>,
    ) -> Result<Value, RuntimeError> {
        let fbase = self.fstack.len();
        let result = self.run_expr_inner(store, code, pc, env_base, pools);
        if result.is_err() {
            self.fstack.truncate(fbase);
        }
        result
    }

    fn run_expr_inner(
        &mut self,
        store: &Store,
        code: &[u8],
        pc: &mut usize,
        env_base: usize,
        pools: &Rc<RefCell<ConstantPools>>,
    ) -> Result<Value, RuntimeError> {
        loop {
            let byte = *code.get(*pc).ok_or_else(|| {
                RuntimeError::InvalidOperation("expression block ran past end of clause".into())
            })?;
            let op = FOp::from_byte(byte).ok_or_else(|| {
                RuntimeError::InvalidOperation(format!("unknown expression opcode {}", byte))
            })?;
            *pc += 1;

            match op {
                FOp::FReturn => {
                    return self.fpop();
                }
                FOp::FSmallInt => {
                    let value = code[*pc] as i8;
                    *pc += 1;
                    self.fstack.push(Value::Int(value as i64));
                }
                FOp::FInt => {
                    let index = code[*pc] as usize;
                    *pc += 1;
                    let int = pools.borrow().ints.get(index).copied().ok_or_else(|| {
                        RuntimeError::InvalidOperation(format!(
                            "int pool index {} out of range",
                            index
                        ))
                    })?;
                    self.fstack.push(Value::Int(int));
                }
                FOp::FFloat => {
                    let index = code[*pc] as usize;
                    *pc += 1;
                    let float = pools.borrow().floats.get(index).copied().ok_or_else(|| {
                        RuntimeError::InvalidOperation(format!(
                            "float pool index {} out of range",
                            index
                        ))
                    })?;
                    self.fstack.push(Value::Float(float));
                }
                FOp::FBool => {
                    let flag = code[*pc] != 0;
                    *pc += 1;
                    self.fstack.push(Value::Bool(flag));
                }
                FOp::FObject => {
                    let object = self.fetch_pool_object(pools, code[*pc])?;
                    *pc += 1;
                    self.fstack.push(Value::Ref(object));
                }
                FOp::FLoad => {
                    let slot = code[*pc] as usize;
                    *pc += 1;
                    match self.value_at(env_base + slot) {
                        Value::Unbound => {
                            return Err(RuntimeError::Instantiation {
                                context: "unbound variable in functional expression",
                            })
                        }
                        value => self.fstack.push(value),
                    }
                }
                FOp::FLoadUnchecked => {
                    let slot = code[*pc] as usize;
                    *pc += 1;
                    let terminal = self.deref(env_base + slot);
                    let value = match &self.stack[terminal] {
                        Value::Unbound => Value::StackRef(terminal),
                        other => other.clone(),
                    };
                    self.fstack.push(value);
                }
                FOp::FLoadGlobal => {
                    let object = self.fetch_pool_object(pools, code[*pc])?;
                    *pc += 1;
                    let Obj::Symbol(name) = object else {
                        return Err(RuntimeError::InvalidOperation(
                            "global load operand is not a name".into(),
                        ));
                    };
                    let value = store.find_global(&name).cloned().ok_or_else(|| {
                        RuntimeError::UndefinedGlobal(name.to_string())
                    })?;
                    self.fstack.push(value);
                }
                FOp::FAdd | FOp::FSub | FOp::FMul => {
                    let right = self.fpop_resolved()?;
                    let left = self.fpop_resolved()?;
                    let result = match (&left, &right) {
                        // Integer-by-integer stays integral for these ops.
                        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
                            FOp::FAdd => a + b,
                            FOp::FSub => a - b,
                            _ => a * b,
                        }),
                        _ => {
                            let (a, b) = Self::both_floats(&left, &right)?;
                            Value::Float(match op {
                                FOp::FAdd => a + b,
                                FOp::FSub => a - b,
                                _ => a * b,
                            })
                        }
                    };
                    self.fstack.push(result);
                }
                FOp::FDiv => {
                    let right = self.fpop_resolved()?;
                    let left = self.fpop_resolved()?;
                    // Division always promotes to float.
                    let (a, b) = Self::both_floats(&left, &right)?;
                    self.fstack.push(Value::Float(a / b));
                }
                FOp::FNeg => {
                    let value = self.fpop_resolved()?;
                    let negated = match value {
                        Value::Int(i) => Value::Int(-i),
                        Value::Float(x) => Value::Float(-x),
                        other => {
                            return Err(RuntimeError::Type {
                                expected: "number",
                                actual: other.type_name().to_string(),
                            })
                        }
                    };
                    self.fstack.push(negated);
                }
                FOp::FFieldRef => {
                    let name = self.fpop_symbol()?;
                    let target = self.fpop_resolved()?;
                    let value = self.field_reference(store, &target, &name)?;
                    self.fstack.push(value);
                }
                FOp::FMethodCall => {
                    let argc = code[*pc] as usize;
                    *pc += 1;
                    let args = self.fpop_args(argc)?;
                    let name = self.fpop_symbol()?;
                    let target = self.fpop_resolved()?;
                    let value = match &target {
                        Value::Ref(Obj::Opaque(object)) => object.invoke(name.name(), &args)?,
                        other => {
                            return Err(RuntimeError::Type {
                                expected: "host object",
                                actual: other.type_name().to_string(),
                            })
                        }
                    };
                    self.fstack.push(value);
                }
                FOp::FConstructor => {
                    let argc = code[*pc] as usize;
                    *pc += 1;
                    let args = self.fpop_raw_args(argc)?;
                    let name = self.fpop_symbol()?;
                    if let Some(def) = store.struct_def(&name) {
                        if def.fields.len() != argc {
                            return Err(RuntimeError::InvalidOperation(format!(
                                "struct {} takes {} fields, got {}",
                                name,
                                def.fields.len(),
                                argc
                            )));
                        }
                        self.fstack.push(Value::Ref(Obj::Struct(Rc::new(StructInst {
                            type_name: name,
                            fields: args,
                        }))));
                    } else if let Some(ctor) = store.host_constructor(&name) {
                        let concrete = self.resolve_all(args)?;
                        self.fstack.push(ctor(&concrete)?);
                    } else {
                        return Err(RuntimeError::UnknownFunction(format!("new {}", name)));
                    }
                }
                FOp::FComponentLookup => {
                    let name = self.fpop_symbol()?;
                    let target = self.fpop_resolved()?;
                    let value = match &target {
                        Value::Ref(Obj::Opaque(object)) => object.component(name.name())?,
                        other => {
                            return Err(RuntimeError::Type {
                                expected: "host object",
                                actual: other.type_name().to_string(),
                            })
                        }
                    };
                    self.fstack.push(value);
                }
                FOp::FArray => {
                    let count = code[*pc] as usize;
                    *pc += 1;
                    let items = self.fpop_raw_args(count)?;
                    self.fstack.push(Value::Ref(Obj::Array(Rc::new(items))));
                }
                FOp::FArrayList => {
                    let count = code[*pc] as usize;
                    *pc += 1;
                    let items = self.fpop_raw_args(count)?;
                    self.fstack
                        .push(Value::Ref(Obj::List(Rc::new(RefCell::new(items)))));
                }
                FOp::FHashset => {
                    let count = code[*pc] as usize;
                    *pc += 1;
                    let items = self.fpop_args(count)?;
                    let mut set = HashSet::with_capacity(count);
                    for item in &items {
                        let key = SetKey::from_value(item).ok_or_else(|| RuntimeError::Type {
                            expected: "hashable value",
                            actual: item.type_name().to_string(),
                        })?;
                        set.insert(key);
                    }
                    self.fstack.push(Value::Ref(Obj::Set(Rc::new(set))));
                }
                FOp::FNonFalse => {
                    let value = self.fpop_resolved()?;
                    let coerced = !matches!(value, Value::Bool(false));
                    self.fstack.push(Value::Bool(coerced));
                }
                FOp::FFormat => {
                    let count = code[*pc] as usize;
                    *pc += 1;
                    let items = self.fpop_args(count)?;
                    let mut text = String::new();
                    for item in &items {
                        text.push_str(&display_for_format(item));
                    }
                    self.fstack.push(Value::Ref(Obj::Str(text.into())));
                }
                FOp::FUserFunction => {
                    let subop = code[*pc];
                    *pc += 1;
                    let hook = store.user_op(subop).ok_or_else(|| {
                        RuntimeError::InvalidOperation(format!(
                            "user function {} is not installed",
                            subop
                        ))
                    })?;
                    self.fstack.push(hook(&[])?);
                }
                FOp::FCallFunction => {
                    let argc = code[*pc] as usize;
                    *pc += 1;
                    let args = self.fpop_args(argc)?;
                    let name = self.fpop_symbol()?;
                    let body = store
                        .host_function(&name)
                        .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
                    self.fstack.push(body(&args)?);
                }
            }
        }
    }

    fn fetch_pool_object(
        &self,
        pools: &Rc<RefCell<ConstantPools>>,
        index: u8,
    ) -> Result<Obj, RuntimeError> {
        pools
            .borrow()
            .objects
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::InvalidOperation(format!("object pool index {} out of range", index))
            })
    }

    fn fpop(&mut self) -> Result<Value, RuntimeError> {
        self.fstack
            .pop()
            .ok_or_else(|| RuntimeError::InvalidOperation("expression stack underflow".into()))
    }

    /// Pop and resolve to a concrete value; unbound is an instantiation
    /// error.
    fn fpop_resolved(&mut self) -> Result<Value, RuntimeError> {
        let value = self.fpop()?;
        match self.resolve(value) {
            Value::Unbound => Err(RuntimeError::Instantiation {
                context: "unbound operand in functional expression",
            }),
            resolved => Ok(resolved),
        }
    }

    fn fpop_symbol(&mut self) -> Result<crate::runtime::symbol::Symbol, RuntimeError> {
        match self.fpop_resolved()? {
            Value::Ref(Obj::Symbol(symbol)) => Ok(symbol),
            other => Err(RuntimeError::Type {
                expected: "symbol",
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Pop `count` concrete arguments, restoring push order.
    fn fpop_args(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.fpop_resolved()?);
        }
        args.reverse();
        Ok(args)
    }

    /// Pop `count` arguments keeping cell references intact, for aggregate
    /// and struct construction.
    fn fpop_raw_args(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.fpop()?);
        }
        args.reverse();
        Ok(args)
    }

    fn resolve_all(&self, values: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        values
            .into_iter()
            .map(|value| match self.resolve(value) {
                Value::Unbound => Err(RuntimeError::Instantiation {
                    context: "unbound constructor argument",
                }),
                resolved => Ok(resolved),
            })
            .collect()
    }

    fn both_floats(left: &Value, right: &Value) -> Result<(f32, f32), RuntimeError> {
        let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
            let offender = if left.is_numeric() { right } else { left };
            return Err(RuntimeError::Type {
                expected: "number",
                actual: offender.type_name().to_string(),
            });
        };
        Ok((a, b))
    }

    fn field_reference(
        &self,
        store: &Store,
        target: &Value,
        name: &crate::runtime::symbol::Symbol,
    ) -> Result<Value, RuntimeError> {
        match target {
            Value::Ref(Obj::Struct(inst)) => {
                let def = store.struct_def(&inst.type_name).ok_or_else(|| {
                    RuntimeError::InvalidOperation(format!(
                        "struct {} has no declaration",
                        inst.type_name
                    ))
                })?;
                let position = def
                    .fields
                    .iter()
                    .position(|field| field == name)
                    .ok_or_else(|| {
                        RuntimeError::UnknownFunction(format!("{}.{}", inst.type_name, name))
                    })?;
                match self.resolve(inst.fields[position].clone()) {
                    Value::Unbound => Err(RuntimeError::Instantiation {
                        context: "unbound struct field",
                    }),
                    value => Ok(value),
                }
            }
            Value::Ref(Obj::Opaque(object)) => object.field(name.name()),
            other => Err(RuntimeError::Type {
                expected: "struct or host object",
                actual: other.type_name().to_string(),
            }),
        }
    }
}

fn display_for_format(value: &Value) -> String {
    match value {
        Value::Ref(Obj::Str(s)) => s.to_string(),
        other => other.to_string(),
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;

use crate::bytecode::clause::CompiledClause;
use crate::bytecode::op_code::{CmpKind, ConstKind, OpCode, TypeKind};
use crate::error::RuntimeError;
use crate::runtime::machine::{Flow, Machine, Pending};
use crate::runtime::store::{ConstantPools, Indicator, Store};
use crate::runtime::value::{Obj, Value};

impl Machine {
    /// Execute one instruction of the current activation.
    pub(crate) fn step(&mut self, store: &Store) -> Result<Flow, RuntimeError> {
        let (clause, pc) = {
            let act = self
                .goals
                .last()
                .ok_or_else(|| RuntimeError::InvalidOperation("step with no goals".into()))?;
            (act.clause.clone(), act.pc)
        };
        if pc >= clause.code.len() {
            return Err(RuntimeError::InvalidOperation(format!(
                "instruction pointer {} past end of clause",
                pc
            )));
        }
        let byte = clause.code[pc];
        let op = OpCode::from_byte(byte)
            .ok_or_else(|| RuntimeError::InvalidOperation(format!("unknown opcode {}", byte)))?;
        self.dispatch(store, &clause, op, pc + 1)
    }

    fn set_pc(&mut self, pc: usize) {
        if let Some(act) = self.goals.last_mut() {
            act.pc = pc;
        }
    }

    fn env_base(&self) -> usize {
        self.goals.last().map_or(0, |act| act.env_base)
    }

    fn current_pools(&self) -> Rc<RefCell<ConstantPools>> {
        self.goals
            .last()
            .map(|act| act.pred.pools.clone())
            .unwrap_or_default()
    }

    /// Address of the next caller argument cell during head matching.
    fn next_arg_addr(&mut self) -> Result<usize, RuntimeError> {
        let act = self.goals.last_mut().ok_or_else(|| {
            RuntimeError::InvalidOperation("head matching with no goals".into())
        })?;
        let addr = act.arg_cursor;
        act.arg_cursor += 1;
        Ok(addr)
    }

    fn pool_object(
        pools: &Rc<RefCell<ConstantPools>>,
        index: usize,
    ) -> Result<Obj, RuntimeError> {
        pools.borrow().objects.get(index).cloned().ok_or_else(|| {
            RuntimeError::InvalidOperation(format!("object pool index {} out of range", index))
        })
    }

    /// Decode a constant operand. For expression constants this runs the
    /// expression VM, advancing `pc` past the block.
    fn const_operand(
        &mut self,
        store: &Store,
        code: &[u8],
        pc: &mut usize,
        env_base: usize,
        pools: &Rc<RefCell<ConstantPools>>,
    ) -> Result<Value, RuntimeError> {
        let kind = ConstKind::from_byte(code[*pc]).ok_or_else(|| {
            RuntimeError::InvalidOperation(format!("unknown constant kind {}", code[*pc]))
        })?;
        *pc += 1;
        let value = match kind {
            ConstKind::Int => {
                let index = code[*pc] as usize;
                *pc += 1;
                let int = pools.borrow().ints.get(index).copied().ok_or_else(|| {
                    RuntimeError::InvalidOperation(format!("int pool index {} out of range", index))
                })?;
                Value::Int(int)
            }
            ConstKind::Float => {
                let index = code[*pc] as usize;
                *pc += 1;
                let float = pools.borrow().floats.get(index).copied().ok_or_else(|| {
                    RuntimeError::InvalidOperation(format!(
                        "float pool index {} out of range",
                        index
                    ))
                })?;
                Value::Float(float)
            }
            ConstKind::Bool => {
                let flag = code[*pc] != 0;
                *pc += 1;
                Value::Bool(flag)
            }
            ConstKind::Object | ConstKind::Pred => {
                let index = code[*pc] as usize;
                *pc += 1;
                Value::Ref(Self::pool_object(pools, index)?)
            }
            ConstKind::Expr => self.run_expr(store, code, pc, env_base, pools)?,
        };
        Ok(value)
    }

    fn dispatch(
        &mut self,
        store: &Store,
        clause: &Rc<CompiledClause>,
        op: OpCode,
        mut pc: usize,
    ) -> Result<Flow, RuntimeError> {
        let code = &clause.code;
        let env_base = self.env_base();

        match op {
            OpCode::CNoGoal => {
                if let Some(act) = self.goals.last() {
                    if act.pred.is_traced.get() {
                        self.trace_exit(store);
                    }
                }
                self.goals.pop();
                Ok(Flow::Continue)
            }
            OpCode::CFail => Ok(Flow::Fail),
            OpCode::CCut => {
                let barrier = self.goals.last().map_or(0, |act| act.cut_barrier);
                self.choice_points.truncate(barrier);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::CGoal => {
                let index = code[pc] as usize;
                pc += 1;
                let pools = self.current_pools();
                let Obj::Pred(indicator) = Self::pool_object(&pools, index)? else {
                    return Err(RuntimeError::InvalidOperation(
                        "CGoal operand is not a predicate handle".into(),
                    ));
                };
                let pred = store.lookup_predicate(&indicator).ok_or_else(|| {
                    RuntimeError::UnknownPredicate {
                        name: indicator.name.to_string(),
                        arity: indicator.arity,
                    }
                })?;
                self.pending = Some(Pending {
                    arity: indicator.arity,
                    pred,
                });
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::CMetaGoal => {
                let argc = code[pc] as usize;
                pc += 1;
                let target = self.stack.pop().ok_or_else(|| {
                    RuntimeError::InvalidOperation("meta-call with empty stack".into())
                })?;
                let resolved = self.resolve(target);
                let name = match resolved {
                    Value::Ref(Obj::Pred(indicator)) => indicator.name,
                    Value::Ref(Obj::Symbol(symbol)) => symbol,
                    other => {
                        return Err(RuntimeError::Type {
                            expected: "predicate",
                            actual: other.type_name().to_string(),
                        })
                    }
                };
                let indicator = Indicator::new(name, argc);
                let pred = store.lookup_predicate(&indicator).ok_or_else(|| {
                    RuntimeError::UnknownPredicate {
                        name: indicator.name.to_string(),
                        arity: indicator.arity,
                    }
                })?;
                self.pending = Some(Pending { arity: argc, pred });
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::CCall => {
                self.check_step_limit()?;
                let Pending { pred, arity } = self.pending.take().ok_or_else(|| {
                    RuntimeError::InvalidOperation("CCall without a pending goal".into())
                })?;
                self.set_pc(pc);
                let arg_base = self.stack.len() - arity;
                self.call_predicate(store, pred, arg_base, arity)
            }
            OpCode::CLastCall => {
                self.check_step_limit()?;
                let Pending { pred, arity } = self.pending.take().ok_or_else(|| {
                    RuntimeError::InvalidOperation("CLastCall without a pending goal".into())
                })?;
                // Last-call optimisation: the current clause's continuation
                // collapses to its caller's.
                self.goals.pop();
                let arg_base = self.stack.len() - arity;
                self.call_predicate(store, pred, arg_base, arity)
            }

            // Head family: match caller argument cells.
            OpCode::HeadVoid => {
                self.next_arg_addr()?;
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::HeadVarFirst => {
                let slot = code[pc] as usize;
                pc += 1;
                let addr = self.next_arg_addr()?;
                let cell = match &self.stack[addr] {
                    Value::Unbound => Value::StackRef(addr),
                    other => other.clone(),
                };
                self.stack[env_base + slot] = cell;
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::HeadVarMatch => {
                let slot = code[pc] as usize;
                pc += 1;
                let addr = self.next_arg_addr()?;
                self.set_pc(pc);
                if self.unify_addrs(addr, env_base + slot) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }
            OpCode::HeadConst => {
                let pools = self.current_pools();
                let value = self.const_operand(store, code, &mut pc, env_base, &pools)?;
                let addr = self.next_arg_addr()?;
                self.set_pc(pc);
                if self.unify_ref_value(addr, &value) {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }

            // Goal family: push the next goal's argument cells.
            OpCode::GoalVoid => {
                self.stack.push(Value::Unbound);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::GoalVarFirst => {
                let slot = code[pc] as usize;
                pc += 1;
                self.stack.push(Value::StackRef(env_base + slot));
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::GoalVarMatch => {
                let slot = code[pc] as usize;
                pc += 1;
                self.push_deref(env_base + slot);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::GoalConst => {
                let pools = self.current_pools();
                let value = self.const_operand(store, code, &mut pc, env_base, &pools)?;
                self.stack.push(value);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }

            // Inline builtins.
            OpCode::BVar => {
                let slot = code[pc] as usize;
                pc += 1;
                self.set_pc(pc);
                match self.value_at(env_base + slot) {
                    Value::Unbound => Ok(Flow::Continue),
                    _ => Ok(Flow::Fail),
                }
            }
            OpCode::BNonvar => {
                let slot = code[pc] as usize;
                pc += 1;
                self.set_pc(pc);
                match self.value_at(env_base + slot) {
                    Value::Unbound => Ok(Flow::Fail),
                    _ => Ok(Flow::Continue),
                }
            }
            OpCode::BCompare => {
                let kind = CmpKind::from_byte(code[pc]).ok_or_else(|| {
                    RuntimeError::InvalidOperation("unknown comparison kind".into())
                })?;
                pc += 1;
                let pools = self.current_pools();
                let left = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                let right = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                self.set_pc(pc);
                if numeric_compare(kind, &self.resolve(left), &self.resolve(right))? {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }
            OpCode::BTypeTest => {
                let kind = TypeKind::from_byte(code[pc]).ok_or_else(|| {
                    RuntimeError::InvalidOperation("unknown type-test kind".into())
                })?;
                let slot = code[pc + 1] as usize;
                pc += 2;
                self.set_pc(pc);
                let value = self.value_at(env_base + slot);
                let holds = match kind {
                    TypeKind::Integer => matches!(value, Value::Int(_)),
                    TypeKind::Float => matches!(value, Value::Float(_)),
                    TypeKind::Number => value.is_numeric(),
                    TypeKind::String => matches!(value, Value::Ref(Obj::Str(_))),
                    TypeKind::Symbol => matches!(value, Value::Ref(Obj::Symbol(_))),
                    TypeKind::Missing => matches!(value, Value::Ref(Obj::Null)),
                };
                if holds {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Fail)
                }
            }
            OpCode::BUnsafeSet => {
                let slot = code[pc] as usize;
                pc += 1;
                let pools = self.current_pools();
                let value = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                let value = self.resolve(value);
                // Accumulator writes land on the terminal cell of the
                // slot's reference chain and are untrailed, so they
                // survive backtracking within the driving loop.
                let target = self.deref(env_base + slot);
                self.stack[target] = value;
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::BUnsafeInit => {
                let slot = code[pc] as usize;
                pc += 1;
                let target = self.deref(env_base + slot);
                self.stack[target] = Value::Unbound;
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::BUnsafeInitZero => {
                let slot = code[pc] as usize;
                pc += 1;
                let target = self.deref(env_base + slot);
                self.stack[target] = Value::Float(0.0);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::BUnsafeInitZeroInt => {
                let slot = code[pc] as usize;
                pc += 1;
                let target = self.deref(env_base + slot);
                self.stack[target] = Value::Int(0);
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::BMaximize | OpCode::BMinimize => {
                let slot = code[pc] as usize;
                pc += 1;
                let pools = self.current_pools();
                let value = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                let value = self.resolve(value);
                let candidate = value.as_float().ok_or_else(|| RuntimeError::Type {
                    expected: "number",
                    actual: value.type_name().to_string(),
                })?;
                let target = self.deref(env_base + slot);
                let keep_candidate = match &self.stack[target] {
                    Value::Unbound => true,
                    current => {
                        let current = current.as_float().ok_or_else(|| RuntimeError::Type {
                            expected: "number",
                            actual: current.type_name().to_string(),
                        })?;
                        if op == OpCode::BMaximize {
                            candidate > current
                        } else {
                            candidate < current
                        }
                    }
                };
                if keep_candidate {
                    self.stack[target] = value;
                }
                self.set_pc(pc);
                Ok(Flow::Continue)
            }
            OpCode::BSumRepeat => {
                let slot = code[pc] as usize;
                pc += 1;
                let pools = self.current_pools();
                let value = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                let value = self.resolve(value);
                let target = self.deref(env_base + slot);
                let updated = match (&self.stack[target], &value) {
                    (Value::Unbound, v) => v.clone(),
                    (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                    (current, addend) => {
                        let (Some(a), Some(b)) = (current.as_float(), addend.as_float()) else {
                            return Err(RuntimeError::Type {
                                expected: "number",
                                actual: addend.type_name().to_string(),
                            });
                        };
                        Value::Float(a + b)
                    }
                };
                self.stack[target] = updated;
                self.set_pc(pc);
                Ok(self.repeat_flow())
            }
            OpCode::BIncRepeat => {
                let slot = code[pc] as usize;
                pc += 1;
                let target = self.deref(env_base + slot);
                let updated = match &self.stack[target] {
                    Value::Unbound => Value::Int(1),
                    Value::Int(i) => Value::Int(i + 1),
                    Value::Float(x) => Value::Float(x + 1.0),
                    other => {
                        return Err(RuntimeError::Type {
                            expected: "number",
                            actual: other.type_name().to_string(),
                        })
                    }
                };
                self.stack[target] = updated;
                self.set_pc(pc);
                Ok(self.repeat_flow())
            }
            OpCode::BThrow => {
                let pools = self.current_pools();
                let value = self.run_expr(store, code, &mut pc, env_base, &pools)?;
                let payload = self.readback(store, &value);
                Err(RuntimeError::UserThrow(payload))
            }
            OpCode::BCallFailed => {
                let index = code[pc] as usize;
                pc += 1;
                let pools = self.current_pools();
                let goal = Self::pool_object(&pools, index)?;
                warn!(target: "horn::vm", "call failed: {}", goal);
                self.set_pc(pc);
                Ok(Flow::Fail)
            }
        }
    }
}

impl Machine {
    /// The `*_and_repeat` discipline: after updating the accumulator, fail
    /// back into any choice point created since this clause was entered so
    /// the enumeration continues; once the generator is exhausted, fall
    /// through and let the clause finish.
    fn repeat_flow(&self) -> Flow {
        let barrier = self.goals.last().map_or(0, |act| act.cut_barrier);
        if self.choice_points.len() > barrier {
            Flow::Fail
        } else {
            Flow::Continue
        }
    }
}

fn numeric_compare(kind: CmpKind, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        return Ok(match kind {
            CmpKind::Less => a < b,
            CmpKind::Greater => a > b,
            CmpKind::LessEq => a <= b,
            CmpKind::GreaterEq => a >= b,
        });
    }
    let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
        let offender = if left.is_numeric() { right } else { left };
        return Err(RuntimeError::Type {
            expected: "number",
            actual: offender.type_name().to_string(),
        });
    };
    Ok(match kind {
        CmpKind::Less => a < b,
        CmpKind::Greater => a > b,
        CmpKind::LessEq => a <= b,
        CmpKind::GreaterEq => a >= b,
    })
}

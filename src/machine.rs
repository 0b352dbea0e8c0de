use crate::error::{MachineState, SecdError, SecdResult};
use crate::globals::{env_lookup, env_set, env_tail};
use crate::heap::Heap;
use crate::opcode::Opcode;
use crate::primitives;
use crate::symbol::SymbolTable;
use crate::value::{SymbolId, Value};

/// The SECD machine.
///
/// All four registers are cons lists on the shared heap:
///   S  the operand stack
///   E  the environment, a list of frames
///   C  the code list still to execute
///   D  the dump, holding saved registers across calls and branches
///
/// A closure is the pair `(code . env)`. A call saves `s e c` on the dump as
/// three consecutive entries; a branch saves only `c`.
pub struct Machine<'a> {
    heap: &'a mut Heap,
    symbols: &'a SymbolTable,
    global_env: Value,
    s: Value,
    e: Value,
    c: Value,
    d: Value,
}

impl<'a> Machine<'a> {
    pub fn new(heap: &'a mut Heap, symbols: &'a SymbolTable, global_env: Value) -> Self {
        Machine {
            heap,
            symbols,
            global_env,
            s: Value::Nil,
            e: global_env,
            c: Value::Nil,
            d: Value::Nil,
        }
    }

    /// Run a compiled code list to `HALT` and return the top of the stack
    /// (nil if the stack is empty).
    ///
    /// Stack, code and dump start empty and the environment starts at the
    /// global environment, so a machine can be re-entered for a nested run.
    /// Nothing but the global environment survives between runs.
    pub fn eval(&mut self, code: Value) -> SecdResult<Value> {
        self.s = Value::Nil;
        self.e = self.global_env;
        self.c = code;
        self.d = Value::Nil;
        self.run()
    }

    /// Current register contents.
    pub fn state(&self) -> MachineState {
        MachineState {
            stack: self.s,
            env: self.e,
            code: self.c,
            dump: self.d,
        }
    }

    // ========================================================================
    // Fetch-execute loop
    // ========================================================================

    fn run(&mut self) -> SecdResult<Value> {
        loop {
            // Registers as of the start of the instruction, for error reports.
            let state = self.state();
            let instr = self.fetch().map_err(|e| e.at(state))?;

            if log::log_enabled!(log::Level::Trace) {
                log::trace!(
                    "{:<6} depth={}",
                    self.instruction_name(instr),
                    self.stack_depth()
                );
            }

            let halted = match instr {
                Value::Op(op) => self.step(op),
                Value::Ident(name) => self.builtin(name).map(|()| false),
                other => Err(SecdError::runtime(format!(
                    "not an instruction: {}",
                    other.type_name()
                ))),
            }
            .map_err(|e| e.at(state))?;

            if halted {
                break;
            }
        }
        Ok(self.heap.car_of(self.s).unwrap_or(Value::Nil))
    }

    /// Execute one opcode. Returns true on `HALT`.
    fn step(&mut self, op: Opcode) -> SecdResult<bool> {
        match op {
            Opcode::Nil => self.push(Value::Nil)?,
            Opcode::Ldc => {
                let x = self.fetch()?;
                self.push(x)?;
            }
            Opcode::Ld => {
                let (depth, index) = self.fetch_address()?;
                let val = env_lookup(self.heap, self.e, depth, index)
                    .ok_or_else(|| unbound(depth, index))?;
                self.push(val)?;
            }
            Opcode::Ldr => {
                let (depth, index) = self.fetch_address()?;
                let tail = env_tail(self.heap, self.e, depth, index)
                    .ok_or_else(|| unbound(depth, index))?;
                self.push(tail)?;
            }
            Opcode::St => {
                let (depth, index) = self.fetch_address()?;
                let val = self
                    .heap
                    .car_of(self.s)
                    .ok_or_else(|| SecdError::runtime("store from an empty stack"))?;
                if !env_set(self.heap, self.e, depth, index, val)? {
                    return Err(SecdError::runtime(format!(
                        "no frame at address ({} . {})",
                        depth, index
                    )));
                }
            }
            Opcode::Cons => {
                let car = self.pop()?;
                let cdr = self.pop()?;
                let pair = self.heap.cons(car, cdr)?;
                self.push(pair)?;
            }
            Opcode::Sel => {
                let cond = self.pop()?;
                let then_code = self.fetch()?;
                let else_code = self.fetch()?;
                self.d = self.heap.cons(self.c, self.d)?;
                self.c = if cond.is_truthy() { then_code } else { else_code };
            }
            Opcode::Join => {
                self.c = self.pop_dump()?;
            }
            Opcode::Ldf => {
                let body = self.fetch()?;
                let closure = self.heap.cons(body, self.e)?;
                self.push(closure)?;
            }
            Opcode::Ap => {
                let (body, closure_env) = self.pop_closure()?;
                let args = self.pop()?;
                self.d = self.heap.list_with_tail(&[self.s, self.e, self.c], self.d)?;
                self.s = Value::Nil;
                self.e = self.heap.cons(args, closure_env)?;
                self.c = body;
            }
            Opcode::Rtn => {
                let result = self.pop()?;
                self.s = self.pop_dump()?;
                self.e = self.pop_dump()?;
                self.c = self.pop_dump()?;
                self.push(result)?;
            }
            Opcode::Dum => {
                self.e = self.heap.cons(Value::Nil, self.e)?;
            }
            Opcode::Rap => {
                let (body, closure_env) = self.pop_closure()?;
                let args = self.pop()?;
                // The closures being bound captured the placeholder frame, so
                // it is filled in place rather than replaced.
                let placeholder = closure_env
                    .as_pair()
                    .ok_or_else(|| SecdError::runtime("recursive apply without a placeholder frame"))?;
                self.heap.set_car(placeholder, args);
                let outer = self.heap.cdr(placeholder);
                self.d = self.heap.list_with_tail(&[self.s, outer, self.c], self.d)?;
                self.s = Value::Nil;
                self.e = closure_env;
                self.c = body;
            }
            Opcode::Halt => return Ok(true),
        }
        Ok(false)
    }

    /// Apply a builtin, popping its operands (first argument on top).
    fn builtin(&mut self, name: SymbolId) -> SecdResult<()> {
        let arity = primitives::builtin_arity(name).ok_or_else(|| {
            SecdError::runtime(format!("not a builtin: {}", self.symbols.name(name)))
        })?;
        let s1 = self.pop()?;
        let s2 = if arity == 2 { self.pop()? } else { Value::Nil };
        let result = primitives::call_builtin(name, s1, s2, self.heap, self.symbols)?;
        self.push(result)
    }

    // ========================================================================
    // Register helpers
    // ========================================================================

    fn fetch(&mut self) -> SecdResult<Value> {
        match self.c {
            Value::Pair(id) => {
                self.c = self.heap.cdr(id);
                Ok(self.heap.car(id))
            }
            Value::Nil => Err(SecdError::runtime("code ended without HALT")),
            other => Err(SecdError::runtime(format!(
                "malformed code list: {}",
                other.type_name()
            ))),
        }
    }

    /// Fetch a `(depth . index)` operand.
    fn fetch_address(&mut self) -> SecdResult<(usize, usize)> {
        let addr = self.fetch()?;
        let depth = self.heap.car_of(addr).and_then(Value::as_int);
        let index = self.heap.cdr_of(addr).and_then(Value::as_int);
        match (depth, index) {
            (Some(depth), Some(index)) if depth > 0 && index > 0 => {
                Ok((depth as usize, index as usize))
            }
            _ => Err(SecdError::runtime("malformed address operand")),
        }
    }

    fn push(&mut self, val: Value) -> SecdResult<()> {
        self.s = self.heap.cons(val, self.s)?;
        Ok(())
    }

    fn pop(&mut self) -> SecdResult<Value> {
        let id = self
            .s
            .as_pair()
            .ok_or_else(|| SecdError::runtime("stack underflow"))?;
        self.s = self.heap.cdr(id);
        Ok(self.heap.car(id))
    }

    fn pop_dump(&mut self) -> SecdResult<Value> {
        let id = self
            .d
            .as_pair()
            .ok_or_else(|| SecdError::runtime("dump underflow"))?;
        self.d = self.heap.cdr(id);
        Ok(self.heap.car(id))
    }

    /// Pop a closure and split it into body and captured environment.
    fn pop_closure(&mut self) -> SecdResult<(Value, Value)> {
        let f = self.pop()?;
        match f.as_pair() {
            Some(id) if self.heap.car(id).is_pair() => Ok((self.heap.car(id), self.heap.cdr(id))),
            _ => Err(SecdError::runtime(format!(
                "cannot apply a non-closure: {}",
                f.type_name()
            ))),
        }
    }

    fn stack_depth(&self) -> usize {
        let mut n = 0;
        let mut current = self.s;
        while let Some(id) = current.as_pair() {
            n += 1;
            current = self.heap.cdr(id);
        }
        n
    }

    fn instruction_name(&self, instr: Value) -> &str {
        match instr {
            Value::Op(op) => op.name(),
            Value::Ident(id) => self.symbols.name(id),
            _ => "?",
        }
    }
}

fn unbound(depth: usize, index: usize) -> SecdError {
    SecdError::runtime(format!("unbound variable at ({} . {})", depth, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::globals::Globals;
    use crate::symbol::sym;

    struct Fixture {
        heap: Heap,
        symbols: SymbolTable,
        globals: Globals,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::new(4096);
            let globals = Globals::new(&mut heap).unwrap();
            Fixture {
                heap,
                symbols: SymbolTable::new(),
                globals,
            }
        }

        fn addr(&mut self, depth: i64, index: i64) -> Value {
            self.heap.cons(Value::Int(depth), Value::Int(index)).unwrap()
        }

        fn run(&mut self, code: &[Value]) -> SecdResult<Value> {
            let code = self.heap.list(code).unwrap();
            Machine::new(&mut self.heap, &self.symbols, self.globals.env).eval(code)
        }
    }

    use Opcode::*;
    fn op(o: Opcode) -> Value {
        Value::Op(o)
    }

    #[test]
    fn builtin_pops_first_argument_first() {
        let mut fx = Fixture::new();
        // (- 10 3)
        let code = [
            op(Ldc),
            Value::Int(3),
            op(Ldc),
            Value::Int(10),
            Value::Ident(sym::MINUS),
            op(Halt),
        ];
        assert_eq!(fx.run(&code).unwrap(), Value::Int(7));
    }

    #[test]
    fn select_and_join() {
        let mut fx = Fixture::new();
        let then_code = fx.heap.list(&[op(Ldc), Value::Int(1), op(Join)]).unwrap();
        let else_code = fx.heap.list(&[op(Ldc), Value::Int(2), op(Join)]).unwrap();
        let code = [op(Nil), op(Sel), then_code, else_code, op(Halt)];
        assert_eq!(fx.run(&code).unwrap(), Value::Int(2));
    }

    #[test]
    fn apply_and_return() {
        let mut fx = Fixture::new();
        // ((fn (x) (+ x x)) 21)
        let x1 = fx.addr(1, 1);
        let x2 = fx.addr(1, 1);
        let body = fx
            .heap
            .list(&[op(Ld), x1, op(Ld), x2, Value::Ident(sym::PLUS), op(Rtn)])
            .unwrap();
        let code = [
            op(Nil),
            op(Ldc),
            Value::Int(21),
            op(Cons),
            op(Ldf),
            body,
            op(Ap),
            op(Halt),
        ];
        assert_eq!(fx.run(&code).unwrap(), Value::Int(42));
    }

    #[test]
    fn store_extends_global_frame_and_keeps_value() {
        let mut fx = Fixture::new();
        let target = fx.addr(1, 2);
        let code = [op(Ldc), Value::Int(9), op(St), target, op(Halt)];
        assert_eq!(fx.run(&code).unwrap(), Value::Int(9));
        assert_eq!(env_lookup(&fx.heap, fx.globals.env, 1, 2), Some(Value::Int(9)));
    }

    #[test]
    fn runtime_errors_carry_registers() {
        let mut fx = Fixture::new();
        let missing = fx.addr(1, 5);
        let err = fx.run(&[op(Ld), missing, op(Halt)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        let state = err.machine_state().unwrap();
        assert_eq!(state.env, fx.globals.env);
        assert!(state.code.is_pair());

        let err = fx
            .run(&[op(Ldc), Value::Nil, Value::Ident(sym::CAR), op(Halt)])
            .unwrap_err();
        assert!(err.to_string().contains("car"));

        let err = fx.run(&[op(Ldc), Value::Int(3), op(Nil), op(Ap), op(Halt)]).unwrap_err();
        assert!(err.to_string().contains("non-closure"));
    }
}

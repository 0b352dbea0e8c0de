use crate::error::{SecdError, SecdResult};
use crate::globals::{Globals, FUNCTION_DEPTH, MACRO_DEPTH};
use crate::heap::Heap;
use crate::machine::Machine;
use crate::opcode::Opcode;
use crate::primitives;
use crate::symbol::{sym, SymbolTable};
use crate::value::{SymbolId, Value};

/// Nested macro expansions allowed within one form before giving up.
const MAX_EXPANSION_DEPTH: usize = 256;
/// Nested subexpressions the compiler descends into before giving up.
const MAX_NESTING: usize = 1024;

/// One formal parameter of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Formal {
    Plain(SymbolId),
    /// Binds the frame tail starting at its own slot.
    Rest(SymbolId),
}

impl Formal {
    fn name(self) -> SymbolId {
        match self {
            Formal::Plain(name) | Formal::Rest(name) => name,
        }
    }
}

type Frame = Vec<Formal>;

/// Compiles expression trees into SECD code lists.
///
/// Compilation threads a continuation: every `comp_*` function receives the
/// already-compiled code that runs after it and returns its own code consed
/// onto the front. A top-level form ends in `HALT`.
///
/// `scopes` holds the lexical frames of the form being compiled, innermost
/// last. Below them sit the global function frame and the macro frame, so a
/// global lives at depth `scopes.len() + 1` and a macro at `scopes.len() + 2`.
pub struct Compiler<'a> {
    heap: &'a mut Heap,
    symbols: &'a SymbolTable,
    globals: &'a mut Globals,
    scopes: Vec<Frame>,
    expansion_depth: usize,
    nesting: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(heap: &'a mut Heap, symbols: &'a SymbolTable, globals: &'a mut Globals) -> Self {
        Compiler {
            heap,
            symbols,
            globals,
            scopes: Vec::new(),
            expansion_depth: 0,
            nesting: 0,
        }
    }

    /// Compile a top-level form.
    ///
    /// A form that fails to compile leaves both name tables as they were:
    /// names it appended are dropped again, since no code can refer to them.
    pub fn compile(&mut self, expr: Value) -> SecdResult<Value> {
        let (functions, macros) = (self.globals.functions.len(), self.globals.macros.len());
        let result = self
            .heap
            .list(&[Value::Op(Opcode::Halt)])
            .and_then(|halt| self.comp(expr, halt));
        if result.is_err() {
            self.globals.functions.truncate(functions);
            self.globals.macros.truncate(macros);
        }
        result
    }

    fn comp(&mut self, expr: Value, cont: Value) -> SecdResult<Value> {
        if self.nesting >= MAX_NESTING {
            return Err(SecdError::malformed("expression", "nested too deeply"));
        }
        self.nesting += 1;
        let result = self.comp_expr(expr, cont);
        self.nesting -= 1;
        result
    }

    fn comp_expr(&mut self, expr: Value, cont: Value) -> SecdResult<Value> {
        match expr {
            Value::Nil => self.emit(&[Value::Op(Opcode::Nil)], cont),
            Value::True | Value::Int(_) | Value::Op(_) => {
                self.emit(&[Value::Op(Opcode::Ldc), expr], cont)
            }
            Value::Ident(name) => self.comp_ident(name, cont),
            Value::Pair(id) => {
                let head = self.heap.car(id);
                let args = self
                    .heap
                    .list_to_vec(self.heap.cdr(id))
                    .ok_or_else(|| SecdError::malformed("application", "improper argument list"))?;
                self.comp_form(head, &args, cont)
            }
        }
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    fn comp_ident(&mut self, name: SymbolId, cont: Value) -> SecdResult<Value> {
        if let Some((depth, index, formal)) = self.lookup_local(name) {
            let op = match formal {
                Formal::Plain(_) => Opcode::Ld,
                Formal::Rest(_) => Opcode::Ldr,
            };
            let addr = self.address(depth, index)?;
            return self.emit(&[Value::Op(op), addr], cont);
        }
        if let Some(index) = self.globals.function_index(name) {
            let addr = self.address(self.global_depth(FUNCTION_DEPTH), index)?;
            return self.emit(&[Value::Op(Opcode::Ld), addr], cont);
        }
        Err(SecdError::UnknownIdentifier(self.name(name)))
    }

    /// Search the lexical frames, innermost first. Returns the 1-based
    /// (depth, index) address and the matching formal.
    fn lookup_local(&self, name: SymbolId) -> Option<(usize, usize, Formal)> {
        self.scopes.iter().rev().enumerate().find_map(|(depth, frame)| {
            frame
                .iter()
                .position(|formal| formal.name() == name)
                .map(|index| (depth + 1, index + 1, frame[index]))
        })
    }

    fn global_depth(&self, table_depth: usize) -> usize {
        self.scopes.len() + table_depth
    }

    // ========================================================================
    // Forms
    // ========================================================================

    fn comp_form(&mut self, head: Value, args: &[Value], cont: Value) -> SecdResult<Value> {
        let name = match head {
            Value::Ident(name) => name,
            Value::Pair(_) => return self.comp_application(head, args, cont),
            other => {
                return Err(SecdError::malformed(
                    "application",
                    format!("cannot call {}", other.type_name()),
                ))
            }
        };

        if name == sym::FN || name == sym::LAMBDA {
            self.comp_fn(args, cont)
        } else if name == sym::IF {
            self.comp_if(args, cont)
        } else if name == sym::LET {
            self.comp_let(args, cont)
        } else if name == sym::LETREC {
            self.comp_letrec(args, cont)
        } else if name == sym::QUOTE {
            self.comp_quote(args, cont)
        } else if name == sym::SET {
            self.comp_set(args, cont)
        } else if name == sym::DEFM {
            self.comp_defm(args, cont)
        } else if name == sym::LIST {
            self.comp_args(args, cont)
        } else if primitives::is_builtin(name) {
            self.comp_builtin(name, args, cont)
        } else if self.lookup_local(name).is_none() && self.globals.is_macro(name) {
            self.comp_macro_call(name, args, cont)
        } else {
            self.comp_application(head, args, cont)
        }
    }

    /// `NIL a_n CONS ... a_1 CONS`: builds the argument frame `(a_1 ... a_n)`.
    /// Also the whole expansion of `list`.
    fn comp_args(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let mut code = cont;
        for &arg in args {
            let consed = self.emit(&[Value::Op(Opcode::Cons)], code)?;
            code = self.comp(arg, consed)?;
        }
        self.emit(&[Value::Op(Opcode::Nil)], code)
    }

    /// `a_n ... a_1 op`: the first argument ends up on top of the stack.
    fn comp_builtin(&mut self, name: SymbolId, args: &[Value], cont: Value) -> SecdResult<Value> {
        let arity = primitives::builtin_arity(name).unwrap_or(0);
        if args.len() != arity {
            return Err(SecdError::malformed(
                self.symbols.name(name),
                format!("expected {} argument(s), got {}", arity, args.len()),
            ));
        }
        let mut code = self.emit(&[Value::Ident(name)], cont)?;
        for &arg in args {
            code = self.comp(arg, code)?;
        }
        Ok(code)
    }

    /// `NIL args <operator> AP`
    fn comp_application(&mut self, head: Value, args: &[Value], cont: Value) -> SecdResult<Value> {
        let apply = self.emit(&[Value::Op(Opcode::Ap)], cont)?;
        let code = self.comp(head, apply)?;
        self.comp_args(args, code)
    }

    /// `(fn params body)` => `LDF (body RTN)`
    fn comp_fn(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let [params, body] = *args else {
            return Err(SecdError::malformed("fn", "expected a parameter list and one body"));
        };
        let frame = self.parse_formals(params, "fn")?;
        let body = self.comp_body(frame, body)?;
        self.emit(&[Value::Op(Opcode::Ldf), body], cont)
    }

    /// `(if test then [else])` => `test SEL (then JOIN) (else JOIN)`
    fn comp_if(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let (test, then_branch, else_branch) = match *args {
            [test, then_branch] => (test, then_branch, Value::Nil),
            [test, then_branch, else_branch] => (test, then_branch, else_branch),
            _ => return Err(SecdError::malformed("if", "expected a test and one or two branches")),
        };
        let join = self.emit(&[Value::Op(Opcode::Join)], Value::Nil)?;
        let then_code = self.comp(then_branch, join)?;
        let join = self.emit(&[Value::Op(Opcode::Join)], Value::Nil)?;
        let else_code = self.comp(else_branch, join)?;
        let select = self.emit(&[Value::Op(Opcode::Sel), then_code, else_code], cont)?;
        self.comp(test, select)
    }

    /// `(let (names) (values) body)` => `NIL values LDF (body RTN) AP`
    fn comp_let(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let (frame, values, body) = self.parse_bindings(args, "let")?;
        let body = self.comp_body(frame, body)?;
        let code = self.emit(&[Value::Op(Opcode::Ldf), body, Value::Op(Opcode::Ap)], cont)?;
        self.comp_args(&values, code)
    }

    /// `(letrec (names) (values) body)` => `DUM NIL values LDF (body RTN) RAP`
    ///
    /// The values are compiled inside the new frame so they can refer to each
    /// other. `RAP` fills the frame that `DUM` pushed and runs the body in it.
    fn comp_letrec(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let (frame, values, body) = self.parse_bindings(args, "letrec")?;
        self.scopes.push(frame);
        let result = self.comp_letrec_inner(&values, body, cont);
        self.scopes.pop();
        let code = result?;
        self.emit(&[Value::Op(Opcode::Dum)], code)
    }

    fn comp_letrec_inner(&mut self, values: &[Value], body: Value, cont: Value) -> SecdResult<Value> {
        let rtn = self.emit(&[Value::Op(Opcode::Rtn)], Value::Nil)?;
        let body = self.comp(body, rtn)?;
        let code = self.emit(&[Value::Op(Opcode::Ldf), body, Value::Op(Opcode::Rap)], cont)?;
        self.comp_args(values, code)
    }

    /// `(quote x)` => `LDC x`
    fn comp_quote(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let [literal] = *args else {
            return Err(SecdError::malformed("quote", "expected exactly one argument"));
        };
        self.emit(&[Value::Op(Opcode::Ldc), literal], cont)
    }

    /// `(set name value)` => `value ST (depth . index)`
    ///
    /// A local binding is updated in place. Anything else is a global, added
    /// to the function table before the value is compiled so the value can
    /// refer to it recursively. Rest parameters cannot be assigned: their
    /// slot holds only the first element of the tail they stand for.
    fn comp_set(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let [target, value] = *args else {
            return Err(SecdError::malformed("set", "expected a name and a value"));
        };
        let name = self.definable_name(target, "set")?;
        let addr = match self.lookup_local(name) {
            Some((_, _, Formal::Rest(_))) => {
                return Err(SecdError::malformed(
                    "set",
                    format!("cannot assign rest parameter '{}'", self.symbols.name(name)),
                ))
            }
            Some((depth, index, Formal::Plain(_))) => self.address(depth, index)?,
            None => {
                let index = self.globals.define_function(name);
                log::debug!("global '{}' at slot {}", self.symbols.name(name), index);
                self.address(self.global_depth(FUNCTION_DEPTH), index)?
            }
        };
        let store = self.emit(&[Value::Op(Opcode::St), addr], cont)?;
        self.comp(value, store)
    }

    /// `(defm name params body)` => `LDF (body RTN) ST (depth . index)`
    ///
    /// The name joins the macro table only once the body has compiled, so
    /// the body never expands a call to the macro being defined.
    fn comp_defm(&mut self, args: &[Value], cont: Value) -> SecdResult<Value> {
        let [target, params, body] = *args else {
            return Err(SecdError::malformed("defm", "expected a name, a parameter list and one body"));
        };
        let name = self.definable_name(target, "defm")?;
        let frame = self.parse_formals(params, "defm")?;
        let body = self.comp_body(frame, body)?;

        let index = self.globals.define_macro(name);
        log::debug!("macro '{}' at slot {}", self.symbols.name(name), index);
        let addr = self.address(self.global_depth(MACRO_DEPTH), index)?;
        self.emit(&[Value::Op(Opcode::Ldf), body, Value::Op(Opcode::St), addr], cont)
    }

    /// Expand a macro call by running the macro on the unevaluated argument
    /// list, then compile the expansion in place of the call.
    ///
    /// The expansion runs in the global environment, so the macro is loaded
    /// by its address relative to that environment, not the current scopes.
    fn comp_macro_call(&mut self, name: SymbolId, args: &[Value], cont: Value) -> SecdResult<Value> {
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            return Err(SecdError::malformed(
                self.symbols.name(name),
                "macro expansion nested too deeply",
            ));
        }
        let index = self
            .globals
            .macro_index(name)
            .ok_or_else(|| SecdError::UnknownIdentifier(self.name(name)))?;

        let arg_list = self.heap.list(args)?;
        let addr = self.address(MACRO_DEPTH, index)?;
        let bootstrap = self.heap.list(&[
            Value::Op(Opcode::Ldc),
            arg_list,
            Value::Op(Opcode::Ld),
            addr,
            Value::Op(Opcode::Ap),
            Value::Op(Opcode::Halt),
        ])?;

        let expansion = Machine::new(self.heap, self.symbols, self.globals.env).eval(bootstrap)?;
        log::debug!("expanded macro '{}'", self.symbols.name(name));

        self.expansion_depth += 1;
        let result = self.comp(expansion, cont);
        self.expansion_depth -= 1;
        result
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Compile a closure body under a new frame, ending in `RTN`.
    fn comp_body(&mut self, frame: Frame, body: Value) -> SecdResult<Value> {
        let rtn = self.emit(&[Value::Op(Opcode::Rtn)], Value::Nil)?;
        self.scopes.push(frame);
        let result = self.comp(body, rtn);
        self.scopes.pop();
        result
    }

    /// Parse a parameter list. Accepts plain names, the annotated rest form
    /// `(name &rest)` and the sugar `&rest name` in final position.
    fn parse_formals(&self, params: Value, form: &str) -> SecdResult<Frame> {
        let items = self
            .heap
            .list_to_vec(params)
            .ok_or_else(|| SecdError::malformed(form, "parameter list must be a list"))?;

        let mut frame = Frame::with_capacity(items.len());
        let mut i = 0;
        while i < items.len() {
            let formal = match items[i] {
                Value::Ident(marker) if marker == sym::REST => match items[i + 1..] {
                    [Value::Ident(name)] => {
                        i += 1;
                        Formal::Rest(name)
                    }
                    _ => {
                        return Err(SecdError::malformed(
                            form,
                            "&rest must be followed by exactly one name",
                        ))
                    }
                },
                Value::Ident(name) => Formal::Plain(name),
                annotated @ Value::Pair(_) => self.parse_annotated(annotated, form)?,
                other => {
                    return Err(SecdError::malformed(
                        form,
                        format!("parameter must be a name, got {}", other.type_name()),
                    ))
                }
            };
            if matches!(formal, Formal::Rest(_)) && i + 1 != items.len() {
                return Err(SecdError::malformed(form, "rest parameter must be last"));
            }
            frame.push(formal);
            i += 1;
        }
        Ok(frame)
    }

    /// `(name marker)`, where the only valid marker is `&rest`.
    fn parse_annotated(&self, formal: Value, form: &str) -> SecdResult<Formal> {
        match self.heap.list_to_vec(formal).as_deref() {
            Some(&[Value::Ident(name), Value::Ident(marker)]) if marker == sym::REST => {
                Ok(Formal::Rest(name))
            }
            Some(&[Value::Ident(name), Value::Ident(marker)]) => Err(SecdError::InvalidFormal {
                name: self.name(name),
                marker: self.name(marker),
            }),
            _ => Err(SecdError::malformed(form, "annotated parameter must be (name &rest)")),
        }
    }

    /// Parse `(names) (values) body` for `let` and `letrec`.
    fn parse_bindings(&self, args: &[Value], form: &str) -> SecdResult<(Frame, Vec<Value>, Value)> {
        let [names, values, body] = *args else {
            return Err(SecdError::malformed(form, "expected (names) (values) body"));
        };
        let names = self
            .heap
            .list_to_vec(names)
            .ok_or_else(|| SecdError::malformed(form, "binding names must be a list"))?;
        let values = self
            .heap
            .list_to_vec(values)
            .ok_or_else(|| SecdError::malformed(form, "binding values must be a list"))?;
        if names.len() != values.len() {
            return Err(SecdError::malformed(
                form,
                format!("{} name(s) but {} value(s)", names.len(), values.len()),
            ));
        }
        let frame = names
            .into_iter()
            .map(|name| match name {
                Value::Ident(id) => Ok(Formal::Plain(id)),
                other => Err(SecdError::malformed(
                    form,
                    format!("binding name must be an identifier, got {}", other.type_name()),
                )),
            })
            .collect::<SecdResult<Frame>>()?;
        Ok((frame, values, body))
    }

    /// The target of `set`/`defm`: an identifier that is not reserved.
    fn definable_name(&self, target: Value, form: &str) -> SecdResult<SymbolId> {
        match target {
            Value::Ident(name) if is_reserved(name) => Err(SecdError::malformed(
                form,
                format!("cannot redefine '{}'", self.symbols.name(name)),
            )),
            Value::Ident(name) => Ok(name),
            other => Err(SecdError::malformed(
                form,
                format!("target must be an identifier, got {}", other.type_name()),
            )),
        }
    }

    fn address(&mut self, depth: usize, index: usize) -> SecdResult<Value> {
        self.heap.cons(Value::Int(depth as i64), Value::Int(index as i64))
    }

    fn emit(&mut self, items: &[Value], cont: Value) -> SecdResult<Value> {
        self.heap.list_with_tail(items, cont)
    }

    fn name(&self, id: SymbolId) -> String {
        self.symbols.name(id).to_string()
    }
}

/// Special form keywords, builtins and the rest marker.
fn is_reserved(name: SymbolId) -> bool {
    name.0 <= sym::REST.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::printer::print_val;
    use crate::reader::read_str;

    struct Fixture {
        heap: Heap,
        symbols: SymbolTable,
        globals: Globals,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::new(100_000);
            let globals = Globals::new(&mut heap).unwrap();
            Fixture {
                heap,
                symbols: SymbolTable::new(),
                globals,
            }
        }

        fn compile(&mut self, src: &str) -> SecdResult<String> {
            let expr = read_str(src, &mut self.heap, &mut self.symbols).unwrap();
            let code = Compiler::new(&mut self.heap, &self.symbols, &mut self.globals).compile(expr)?;
            Ok(print_val(code, &self.heap, &self.symbols))
        }

        fn run(&mut self, src: &str) -> Value {
            let expr = read_str(src, &mut self.heap, &mut self.symbols).unwrap();
            let code = Compiler::new(&mut self.heap, &self.symbols, &mut self.globals)
                .compile(expr)
                .unwrap();
            Machine::new(&mut self.heap, &self.symbols, self.globals.env)
                .eval(code)
                .unwrap()
        }
    }

    #[test]
    fn atoms() {
        let mut fx = Fixture::new();
        assert_eq!(fx.compile("nil").unwrap(), "([IS:NIL] [IS:HALT])");
        assert_eq!(fx.compile("42").unwrap(), "([IS:LDC] 42 [IS:HALT])");
        assert_eq!(fx.compile("'(1 2)").unwrap(), "([IS:LDC] (1 2) [IS:HALT])");
    }

    #[test]
    fn builtins_push_first_argument_last() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.compile("(+ 1 2)").unwrap(),
            "([IS:LDC] 2 [IS:LDC] 1 + [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(list 1 2)").unwrap(),
            "([IS:NIL] [IS:LDC] 2 [IS:CONS] [IS:LDC] 1 [IS:CONS] [IS:HALT])"
        );
    }

    #[test]
    fn lambda_and_lexical_addresses() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.compile("(fn (x y) y)").unwrap(),
            "([IS:LDF] ([IS:LD] (1 . 2) [IS:RTN]) [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(fn (x) (fn (y) x))").unwrap(),
            "([IS:LDF] ([IS:LDF] ([IS:LD] (2 . 1) [IS:RTN]) [IS:RTN]) [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(fn (a &rest b) b)").unwrap(),
            "([IS:LDF] ([IS:LDR] (1 . 2) [IS:RTN]) [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(fn (a (b &rest)) b)").unwrap(),
            "([IS:LDF] ([IS:LDR] (1 . 2) [IS:RTN]) [IS:HALT])"
        );
    }

    #[test]
    fn conditional_and_let_shapes() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.compile("(if nil 1 2)").unwrap(),
            "([IS:NIL] [IS:SEL] ([IS:LDC] 1 [IS:JOIN]) ([IS:LDC] 2 [IS:JOIN]) [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(let (x) (5) x)").unwrap(),
            "([IS:NIL] [IS:LDC] 5 [IS:CONS] [IS:LDF] ([IS:LD] (1 . 1) [IS:RTN]) [IS:AP] [IS:HALT])"
        );
        let letrec = fx.compile("(letrec (f) ((fn (n) (f n))) (f 1))").unwrap();
        assert!(letrec.starts_with("([IS:DUM] [IS:NIL]"));
        assert!(letrec.ends_with("[IS:RAP] [IS:HALT])"));
    }

    #[test]
    fn set_allocates_global_slots_in_order() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.compile("(set x 10)").unwrap(),
            "([IS:LDC] 10 [IS:ST] (1 . 1) [IS:HALT])"
        );
        assert_eq!(
            fx.compile("(set y x)").unwrap(),
            "([IS:LD] (1 . 1) [IS:ST] (1 . 2) [IS:HALT])"
        );
        // Inside one frame the global table is one level further out.
        assert_eq!(
            fx.compile("(fn (a) x)").unwrap(),
            "([IS:LDF] ([IS:LD] (2 . 1) [IS:RTN]) [IS:HALT])"
        );
    }

    #[test]
    fn macros_expand_at_compile_time() {
        let mut fx = Fixture::new();
        fx.run("(defm twice (e) (list '+ e e))");
        assert_eq!(
            fx.compile("(twice 3)").unwrap(),
            "([IS:LDC] 3 [IS:LDC] 3 + [IS:HALT])"
        );
        // Expansion inside a nested scope still finds the macro.
        assert_eq!(fx.run("(let (y) (4) (twice y))"), Value::Int(8));
    }

    #[test]
    fn compile_errors() {
        let mut fx = Fixture::new();
        let err = fx.compile("frob").unwrap_err();
        assert!(matches!(err, SecdError::UnknownIdentifier(ref n) if n == "frob"));

        let err = fx.compile("(fn (a (b &opt)) a)").unwrap_err();
        assert!(matches!(err, SecdError::InvalidFormal { ref marker, .. } if marker == "&opt"));

        for src in [
            "(if 1)",
            "(let (a b) (1) a)",
            "(set 1 2)",
            "(set car 2)",
            "(fn (a &rest) a)",
            "(fn ((a &rest) b) a)",
            "(car 1 2)",
            "(quote)",
            "(1 2)",
        ] {
            assert_eq!(fx.compile(src).unwrap_err().kind(), ErrorKind::Compile, "{}", src);
        }
    }

    #[test]
    fn rest_parameters_cannot_be_assigned() {
        let mut fx = Fixture::new();
        let err = fx.compile("(fn (a &rest b) (set b 9))").unwrap_err();
        assert!(matches!(err, SecdError::Malformed { ref form, .. } if form == "set"));
        assert!(fx.compile("(fn (a &rest b) (set a 9))").is_ok());
    }

    #[test]
    fn failed_forms_leave_name_tables_untouched() {
        let mut fx = Fixture::new();
        fx.run("(set keep 1)");
        assert!(fx.compile("(set q (frob))").is_err());
        assert!(fx.compile("(let (x y) ((set inner 1) (frob)) x)").is_err());
        assert!(fx.compile("(defm m (x) (frob x))").is_err());
        assert_eq!(fx.globals.functions.len(), 1);
        assert!(fx.globals.macros.is_empty());
        assert!(matches!(fx.compile("q").unwrap_err(), SecdError::UnknownIdentifier(_)));
    }

    #[test]
    fn deeply_nested_expressions_are_rejected() {
        // Run on a roomy stack so the check, not the host, stops the descent.
        let handle = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                let mut fx = Fixture::new();
                let mut expr = Value::Int(1);
                for _ in 0..10_000 {
                    expr = fx.heap.list(&[Value::Ident(sym::CAR), expr]).unwrap();
                }
                Compiler::new(&mut fx.heap, &fx.symbols, &mut fx.globals)
                    .compile(expr)
                    .unwrap_err()
            })
            .unwrap();
        let err = handle.join().unwrap();
        assert!(matches!(err, SecdError::Malformed { ref reason, .. } if reason.contains("too deeply")));
    }
}

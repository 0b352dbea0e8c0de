use crate::compiler::Compiler;
use crate::error::{SecdError, SecdResult};
use crate::globals::Globals;
use crate::heap::{Heap, DEFAULT_CAPACITY};
use crate::image::Image;
use crate::machine::Machine;
use crate::printer;
use crate::reader;
use crate::symbol::SymbolTable;
use crate::value::Value;

/// One independent interpreter: heap, interned names and global state.
///
/// The global environment is created with the session, grows through `set`
/// and `defm`, and is replaced wholesale by `restore_image`. Sessions share
/// nothing, so any number may coexist.
pub struct Session {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub globals: Globals,
}

impl Session {
    pub fn new() -> SecdResult<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A session whose heap holds at most `cells` cons cells.
    pub fn with_capacity(cells: usize) -> SecdResult<Self> {
        let mut heap = Heap::new(cells);
        let globals = Globals::new(&mut heap)?;
        Ok(Session {
            heap,
            symbols: SymbolTable::new(),
            globals,
        })
    }

    /// Read the first form of `input`.
    pub fn read(&mut self, input: &str) -> SecdResult<Value> {
        reader::read_str(input, &mut self.heap, &mut self.symbols)
    }

    /// Compile a form into a code list ending in `HALT`. Macro calls are
    /// expanded, which runs code.
    pub fn compile(&mut self, expr: Value) -> SecdResult<Value> {
        Compiler::new(&mut self.heap, &self.symbols, &mut self.globals).compile(expr)
    }

    /// Run a compiled code list in the global environment.
    pub fn run(&mut self, code: Value) -> SecdResult<Value> {
        Machine::new(&mut self.heap, &self.symbols, self.globals.env).eval(code)
    }

    /// Compile and run one form.
    pub fn eval(&mut self, expr: Value) -> SecdResult<Value> {
        let code = self.compile(expr)?;
        let result = self.run(code)?;
        log::debug!("evaluated form, heap at {} cells", self.heap.total_cells());
        Ok(result)
    }

    /// Evaluate every form in `input` in order, stopping at the first error.
    /// Returns the value of the last form (nil for empty input).
    pub fn eval_str(&mut self, input: &str) -> SecdResult<Value> {
        let mut pos = 0;
        let mut last = Value::Nil;
        while let Some((expr, next)) = reader::read_one_at(input, pos, &mut self.heap, &mut self.symbols)? {
            pos = next;
            last = self.eval(expr)?;
        }
        Ok(last)
    }

    /// Evaluate every form in `input` independently: a failing form is
    /// reported in its slot and later forms still run. A parse error ends the
    /// input, since the reader cannot resynchronize mid-form.
    pub fn eval_str_each(&mut self, input: &str) -> Vec<SecdResult<Value>> {
        let mut results = Vec::new();
        self.eval_str_with(input, |_, _| {}, |_, result| results.push(result));
        results
    }

    /// The streaming form of `eval_str_each`. `on_code` sees each form's
    /// compiled code before it runs and `report` receives each outcome as
    /// soon as it is known.
    pub fn eval_str_with(
        &mut self,
        input: &str,
        mut on_code: impl FnMut(&Session, Value),
        mut report: impl FnMut(&Session, SecdResult<Value>),
    ) {
        let mut pos = 0;
        loop {
            match reader::read_one_at(input, pos, &mut self.heap, &mut self.symbols) {
                Ok(Some((expr, next))) => {
                    pos = next;
                    let result = match self.compile(expr) {
                        Ok(code) => {
                            on_code(self, code);
                            self.run(code)
                        }
                        Err(e) => Err(e),
                    };
                    report(self, result);
                }
                Ok(None) => break,
                Err(e) => {
                    report(self, Err(e));
                    break;
                }
            }
        }
    }

    /// Render a value with the session's names.
    pub fn print(&self, val: Value) -> String {
        printer::print_val(val, &self.heap, &self.symbols)
    }

    /// Render an error, including the machine registers of a runtime error.
    pub fn describe_error(&self, err: &SecdError) -> String {
        match err.machine_state() {
            Some(state) => format!(
                "{}\n  S: {}\n  C: {}\n  D: {}",
                err,
                self.print(state.stack),
                self.print(state.code),
                self.print(state.dump)
            ),
            None => err.to_string(),
        }
    }

    /// Snapshot the global environment and both name tables.
    pub fn capture_image(&self) -> SecdResult<Image> {
        Image::capture(self)
    }

    /// Replace the global environment and both name tables with a snapshot.
    pub fn restore_image(&mut self, image: &Image) -> SecdResult<()> {
        image.restore(self)
    }
}

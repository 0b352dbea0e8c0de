use crate::error::{SecdError, SecdResult};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::Value;

/// Nested subexpressions the reader descends into before giving up.
const MAX_NESTING: usize = 1024;

/// A lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Quote,
    Backquote,
    Comma,
    At,
    Int(i64),
    Ident(String),
}

// ============================================================================
// Scanner
// ============================================================================

/// Splits source text into tokens. Cheap to copy, which is how the reader
/// peeks ahead.
#[derive(Clone, Copy)]
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos < self.input.len() && self.input[self.pos] == b';' {
                while self.pos < self.input.len() && self.input[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Returns true once only whitespace and comments remain.
    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace_and_comments();
        self.pos >= self.input.len()
    }

    /// Scan the next token, or None at end of input.
    pub fn next_token(&mut self) -> SecdResult<Option<Token>> {
        self.skip_whitespace_and_comments();
        let Some(&ch) = self.input.get(self.pos) else {
            return Ok(None);
        };

        let single = match ch {
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'\'' => Some(Token::Quote),
            b'`' => Some(Token::Backquote),
            b',' => Some(Token::Comma),
            b'@' => Some(Token::At),
            _ => None,
        };
        if let Some(tok) = single {
            self.pos += 1;
            return Ok(Some(tok));
        }

        self.read_word().map(Some)
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&self) -> SecdResult<Option<Token>> {
        let mut ahead = *self;
        ahead.next_token()
    }

    fn is_delimiter(ch: u8) -> bool {
        ch.is_ascii_whitespace()
            || matches!(ch, b'(' | b')' | b'\'' | b'`' | b',' | b'@' | b';')
    }

    /// Scan an atom. The first character picks the state: a digit means
    /// number, a leading minus means "number if a digit follows", anything
    /// else means identifier. Any non-digit later demotes a number to an
    /// identifier.
    fn read_word(&mut self) -> SecdResult<Token> {
        #[derive(PartialEq)]
        enum Scan {
            Start,
            Number,
            Minus,
            Ident,
        }

        let start = self.pos;
        let mut state = Scan::Start;
        while self.pos < self.input.len() && !Self::is_delimiter(self.input[self.pos]) {
            let ch = self.input[self.pos];
            state = match state {
                Scan::Start if ch == b'-' => Scan::Minus,
                Scan::Start | Scan::Number | Scan::Minus if ch.is_ascii_digit() => Scan::Number,
                _ => Scan::Ident,
            };
            self.pos += 1;
        }

        let word = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| SecdError::Parse("invalid UTF-8".into()))?;

        if state == Scan::Number {
            return word
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| SecdError::Parse(format!("integer out of range: {}", word)));
        }
        Ok(Token::Ident(word.to_string()))
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses source text into expression trees on the heap.
pub struct Reader<'a> {
    lexer: Lexer<'a>,
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
    /// Nesting depth of backquotes around the current position.
    quasi_depth: usize,
    nesting: usize,
    failed: bool,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap, symbols: &'a mut SymbolTable) -> Self {
        Reader {
            lexer: Lexer::new(input),
            heap,
            symbols,
            quasi_depth: 0,
            nesting: 0,
            failed: false,
        }
    }

    /// Read one top-level expression. Returns None at EOF.
    pub fn read(&mut self) -> SecdResult<Option<Value>> {
        if self.lexer.at_end() {
            return Ok(None);
        }
        self.quasi_depth = 0;
        self.nesting = 0;
        let val = self.read_expr()?;
        Ok(Some(val))
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    /// Read all expressions from input.
    pub fn read_all(&mut self) -> SecdResult<Vec<Value>> {
        let mut results = Vec::new();
        while let Some(val) = self.read()? {
            results.push(val);
        }
        Ok(results)
    }

    fn next_required(&mut self) -> SecdResult<Token> {
        self.lexer
            .next_token()?
            .ok_or_else(|| SecdError::Parse("unexpected end of input".into()))
    }

    fn read_expr(&mut self) -> SecdResult<Value> {
        let tok = self.next_required()?;
        self.read_from(tok)
    }

    fn read_from(&mut self, tok: Token) -> SecdResult<Value> {
        if self.nesting >= MAX_NESTING {
            return Err(SecdError::Parse("expression nested too deeply".into()));
        }
        self.nesting += 1;
        let result = self.read_datum(tok);
        self.nesting -= 1;
        result
    }

    fn read_datum(&mut self, tok: Token) -> SecdResult<Value> {
        match tok {
            Token::LParen => self.read_list(),
            Token::RParen => Err(SecdError::Parse("unexpected ')'".into())),
            Token::Quote => self.read_quote(),
            Token::Backquote => self.read_backquote(),
            Token::Comma => self.read_comma(),
            Token::At => Err(SecdError::Parse("unexpected '@'".into())),
            Token::Int(n) => Ok(Value::Int(n)),
            Token::Ident(name) => Ok(match name.as_str() {
                "nil" => Value::Nil,
                "t" => Value::True,
                _ => Value::Ident(self.symbols.intern(&name)),
            }),
        }
    }

    /// Read a list after its '('. Elements are collected first so that an
    /// unterminated list leaves no partial tree behind.
    fn read_list(&mut self) -> SecdResult<Value> {
        let mut elements = Vec::new();
        loop {
            match self.lexer.next_token()? {
                None => return Err(SecdError::Parse("unterminated list".into())),
                Some(Token::RParen) => break,
                Some(tok) => elements.push(self.read_from(tok)?),
            }
        }
        self.heap.list(&elements)
    }

    /// Read quote: 'expr -> (quote expr)
    fn read_quote(&mut self) -> SecdResult<Value> {
        let expr = self.read_expr()?;
        self.make_quoted(expr)
    }

    /// Read backquote: `expr -> expand at read time
    fn read_backquote(&mut self) -> SecdResult<Value> {
        self.quasi_depth += 1;
        let expr = self.read_expr();
        self.quasi_depth -= 1;
        self.expand_backquote(expr?)
    }

    /// Read comma: ,expr -> internal unquote marker, only valid under a backquote.
    fn read_comma(&mut self) -> SecdResult<Value> {
        if self.quasi_depth == 0 {
            return Err(SecdError::Parse("unquote outside backquote".into()));
        }
        if self.lexer.peek_token()? == Some(Token::At) {
            return Err(SecdError::Parse("unquote-splicing is not supported".into()));
        }
        self.quasi_depth -= 1;
        let expr = self.read_expr();
        self.quasi_depth += 1;
        let inner = self.heap.cons(expr?, Value::Nil)?;
        self.heap.cons(Value::Ident(sym::UNQUOTE), inner)
    }

    /// Expand backquote at read time.
    ///   `x         -> (quote x)
    ///   `,x        -> x
    ///   `(a b ...) -> (cons `a (cons `b ... nil))
    fn expand_backquote(&mut self, expr: Value) -> SecdResult<Value> {
        let Value::Pair(id) = expr else {
            return self.make_quoted(expr);
        };

        if self.heap.car(id) == Value::Ident(sym::UNQUOTE) {
            return self
                .heap
                .car_of(self.heap.cdr(id))
                .ok_or_else(|| SecdError::Parse("malformed unquote".into()));
        }

        let elements = self
            .heap
            .list_to_vec(expr)
            .ok_or_else(|| SecdError::Parse("improper list under backquote".into()))?;

        let mut result = Value::Nil;
        for element in elements.into_iter().rev() {
            let expanded = self.expand_backquote(element)?;
            result = self.heap.list(&[Value::Ident(sym::CONS), expanded, result])?;
        }
        Ok(result)
    }

    /// Make (quote val)
    fn make_quoted(&mut self, val: Value) -> SecdResult<Value> {
        self.heap.list(&[Value::Ident(sym::QUOTE), val])
    }
}

/// Top-level forms as a lazy sequence. Stops after the first error.
impl Iterator for Reader<'_> {
    type Item = SecdResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read() {
            Ok(Some(val)) => Some(Ok(val)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read a single expression from a string.
pub fn read_str(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> SecdResult<Value> {
    let mut reader = Reader::new(input, heap, symbols);
    reader
        .read()?
        .ok_or_else(|| SecdError::Parse("empty input".into()))
}

/// Read all expressions from a string.
pub fn read_all(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> SecdResult<Vec<Value>> {
    let mut reader = Reader::new(input, heap, symbols);
    reader.read_all()
}

/// Read one expression starting at byte offset `pos`.
/// Returns `Ok(Some((value, new_pos)))` or `Ok(None)` if only whitespace/comments remain.
pub fn read_one_at(
    input: &str,
    pos: usize,
    heap: &mut Heap,
    symbols: &mut SymbolTable,
) -> SecdResult<Option<(Value, usize)>> {
    let rest = input
        .get(pos..)
        .ok_or_else(|| SecdError::Parse(format!("offset {} is not a character boundary in the input", pos)))?;
    let mut reader = Reader::new(rest, heap, symbols);
    match reader.read()? {
        Some(val) => Ok(Some((val, pos + reader.position()))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_val;

    fn read_print(src: &str) -> String {
        let mut heap = Heap::new(1024);
        let mut symbols = SymbolTable::new();
        let val = read_str(src, &mut heap, &mut symbols).unwrap();
        print_val(val, &heap, &symbols)
    }

    fn read_err(src: &str) -> String {
        let mut heap = Heap::new(1024);
        let mut symbols = SymbolTable::new();
        match read_all(src, &mut heap, &mut symbols) {
            Err(SecdError::Parse(msg)) => msg,
            other => panic!("expected parse error, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn tokens() {
        let mut lexer = Lexer::new("(a -12 - -x 3b) ' ` , @ ; comment\n nil");
        let mut toks = Vec::new();
        while let Some(tok) = lexer.next_token().unwrap() {
            toks.push(tok);
        }
        assert_eq!(
            toks,
            vec![
                Token::LParen,
                Token::Ident("a".into()),
                Token::Int(-12),
                Token::Ident("-".into()),
                Token::Ident("-x".into()),
                Token::Ident("3b".into()),
                Token::RParen,
                Token::Quote,
                Token::Backquote,
                Token::Comma,
                Token::At,
                Token::Ident("nil".into()),
            ]
        );
    }

    #[test]
    fn atoms_and_lists() {
        assert_eq!(read_print("42"), "42");
        assert_eq!(read_print("nil"), "nil");
        assert_eq!(read_print("()"), "nil");
        assert_eq!(read_print("(a (b nil) 3)"), "(a (b nil) 3)");
    }

    #[test]
    fn t_reads_as_the_true_atom() {
        let mut heap = Heap::new(64);
        let mut symbols = SymbolTable::new();
        assert_eq!(read_str("t", &mut heap, &mut symbols).unwrap(), Value::True);
        let list = read_str("(t tt)", &mut heap, &mut symbols).unwrap();
        let items = heap.list_to_vec(list).unwrap();
        assert_eq!(items[0], Value::True);
        assert!(matches!(items[1], Value::Ident(_)));
    }

    #[test]
    fn quote_sugar() {
        assert_eq!(read_print("'x"), "(quote x)");
        assert_eq!(read_print("'(1 2)"), "(quote (1 2))");
    }

    #[test]
    fn backquote_expands_to_cons_chain() {
        assert_eq!(read_print("`x"), "(quote x)");
        assert_eq!(
            read_print("`(a ,b)"),
            "(cons (quote a) (cons b nil))"
        );
        assert_eq!(
            read_print("`(+ (f ,e) 1)"),
            "(cons (quote +) (cons (cons (quote f) (cons e nil)) (cons (quote 1) nil)))"
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(read_err("(1 2"), "unterminated list");
        assert_eq!(read_err(")"), "unexpected ')'");
        assert_eq!(read_err(",x"), "unquote outside backquote");
        assert_eq!(read_err("`(a ,@b)"), "unquote-splicing is not supported");
        assert_eq!(read_err("'"), "unexpected end of input");
        assert!(read_err("99999999999999999999").contains("out of range"));
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        // Run on a roomy stack so the check, not the host, stops the descent.
        let handle = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                let depth = 200_000;
                let parens = format!("'{}{}", "(".repeat(depth), ")".repeat(depth));
                let quotes = format!("{}x", "'".repeat(depth));
                (read_err(&parens), read_err(&quotes))
            })
            .unwrap();
        let (parens, quotes) = handle.join().unwrap();
        assert_eq!(parens, "expression nested too deeply");
        assert_eq!(quotes, "expression nested too deeply");
    }

    #[test]
    fn read_one_at_rejects_bad_offsets() {
        let mut heap = Heap::new(64);
        let mut symbols = SymbolTable::new();
        for pos in [99, 2] {
            let result = read_one_at("(é)", pos, &mut heap, &mut symbols);
            assert!(matches!(result, Err(SecdError::Parse(_))), "offset {}", pos);
        }
        assert!(read_one_at("(a)", 3, &mut heap, &mut symbols).unwrap().is_none());
    }

    #[test]
    fn read_one_at_restarts_per_form() {
        let mut heap = Heap::new(1024);
        let mut symbols = SymbolTable::new();
        let src = "(a b) 7 ; done\n";
        let (first, pos) = read_one_at(src, 0, &mut heap, &mut symbols)
            .unwrap()
            .unwrap();
        assert_eq!(print_val(first, &heap, &symbols), "(a b)");
        let (second, pos) = read_one_at(src, pos, &mut heap, &mut symbols)
            .unwrap()
            .unwrap();
        assert_eq!(second, Value::Int(7));
        assert!(read_one_at(src, pos, &mut heap, &mut symbols)
            .unwrap()
            .is_none());
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut heap = Heap::new(1024);
        let mut symbols = SymbolTable::new();
        let reader = Reader::new("1 ) 2", &mut heap, &mut symbols);
        let results: Vec<_> = reader.collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}

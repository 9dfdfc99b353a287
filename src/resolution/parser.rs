//! Recursive-descent parser for resolution logic
//!
//! Accepts exactly one callable (arrow function or `function` expression,
//! optionally `async`) and nothing else. Nested functions are rejected so
//! every program is a straight-line body over finite `for...of` loops.

use std::collections::HashSet;

use super::ast::*;
use super::error::ResolveError;
use super::lexer::{tokenize, Token, TokenKind};

const RESERVED: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "return", "throw", "break", "continue",
    "function", "await", "new", "typeof", "true", "false", "null", "undefined", "in",
    "while", "do", "class", "import", "export", "try", "catch", "finally", "this", "delete",
    "void", "yield", "switch", "case", "default", "instanceof", "with", "super",
];

/// Deepest syntax tree the parser will build. Keeps both parsing and
/// evaluation recursion well inside a worker thread's stack.
pub const MAX_NESTING: usize = 128;

/// Compile source text into a callable's syntax tree
pub fn parse_function(source: &str) -> Result<Function, ResolveError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        in_async: false,
        loop_depth: 0,
        depth: 0,
    };
    let function = parser.function()?;
    parser.eat_punct(";");
    if !matches!(parser.peek().kind, TokenKind::Eof) {
        return Err(parser.error("unexpected input after function body"));
    }
    Ok(function)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    in_async: bool,
    loop_depth: usize,
    depth: usize,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ResolveError {
        let token = self.peek();
        ResolveError::compilation(message, token.line, token.column)
    }

    /// One level deeper in the tree; callers undo it with `leave`
    fn enter(&mut self) -> Result<(), ResolveError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ResolveError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}' but found {}", p, describe(&self.peek().kind))))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(w) if w == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> Result<String, ResolveError> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier but found {}", describe(other)))),
        }
    }

    /// Property names may be reserved words (`err.default`, `{ new: 1 }`)
    fn property_name(&mut self) -> Result<String, ResolveError> {
        match &self.peek().kind {
            TokenKind::Ident(name) | TokenKind::Str(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Num(n) => {
                let name = format_number_key(*n);
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected property name but found {}", describe(other)))),
        }
    }

    // ------------------------------------------------------------------
    // Function
    // ------------------------------------------------------------------

    fn function(&mut self) -> Result<Function, ResolveError> {
        // `async => ...` is a plain parameter named async
        let is_async =
            self.is_keyword("async") && !matches!(self.peek_at(1).kind, TokenKind::Punct("=>"));
        if is_async {
            self.advance();
        }
        self.in_async = is_async;

        if self.eat_keyword("function") {
            let name = if matches!(self.peek().kind, TokenKind::Ident(_)) {
                Some(self.identifier()?)
            } else {
                None
            };
            let (params, rest) = self.params()?;
            let body = Body::Block(self.block()?);
            return Ok(Function { name, is_async, params, rest, body });
        }

        let (params, rest) = if self.is_punct("(") {
            self.params()?
        } else if matches!(self.peek().kind, TokenKind::Ident(_)) {
            (vec![self.identifier()?], None)
        } else {
            return Err(self.error("expected a function"));
        };
        self.expect_punct("=>")?;

        let body = if self.is_punct("{") {
            Body::Block(self.block()?)
        } else {
            Body::Expr(self.expression()?)
        };
        Ok(Function { name: None, is_async, params, rest, body })
    }

    fn params(&mut self) -> Result<(Vec<String>, Option<String>), ResolveError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        let mut rest = None;
        let mut seen = HashSet::new();

        while !self.is_punct(")") {
            let is_rest = self.eat_punct("...");
            let name = self.identifier()?;
            if !seen.insert(name.clone()) {
                return Err(self.error(format!("duplicate parameter '{}'", name)));
            }
            if is_rest {
                rest = Some(name);
                if !self.is_punct(")") {
                    return Err(self.error("rest parameter must be last"));
                }
                break;
            }
            params.push(name);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok((params, rest))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self) -> Result<Vec<Stmt>, ResolveError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.is_punct("}") {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            stmts.push(self.statement()?);
        }
        self.expect_punct("}")?;
        Ok(stmts)
    }

    /// Body of `if`/`for`: a block or a single statement
    fn branch(&mut self) -> Result<Vec<Stmt>, ResolveError> {
        if self.is_punct("{") {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn decl_kind(&mut self) -> Option<DeclKind> {
        if self.eat_keyword("let") {
            Some(DeclKind::Let)
        } else if self.eat_keyword("const") {
            Some(DeclKind::Const)
        } else if self.eat_keyword("var") {
            Some(DeclKind::Var)
        } else {
            None
        }
    }

    fn pattern(&mut self) -> Result<Pattern, ResolveError> {
        if !self.eat_punct("[") {
            return Ok(Pattern::Name(self.identifier()?));
        }
        let mut names = Vec::new();
        while !self.is_punct("]") {
            if self.eat_punct(",") {
                names.push(None);
                continue;
            }
            names.push(Some(self.identifier()?));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("]")?;
        Ok(Pattern::Array(names))
    }

    fn statement(&mut self) -> Result<Stmt, ResolveError> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave(1);
        stmt
    }

    fn statement_inner(&mut self) -> Result<Stmt, ResolveError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Block(Vec::new()));
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }

        if let Some(kind) = self.decl_kind() {
            let target = self.pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.expression()?)
            } else {
                None
            };
            if init.is_none() && (kind == DeclKind::Const || matches!(target, Pattern::Array(_))) {
                return Err(self.error("missing initializer in declaration"));
            }
            if self.is_punct(",") {
                return Err(self.error("declare one binding per statement"));
            }
            self.eat_punct(";");
            return Ok(Stmt::Decl { kind, target, init });
        }

        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let then = self.branch()?;
            let otherwise = if self.eat_keyword("else") {
                Some(self.branch()?)
            } else {
                None
            };
            return Ok(Stmt::If { cond, then, otherwise });
        }

        if self.eat_keyword("for") {
            self.expect_punct("(")?;
            let kind = self
                .decl_kind()
                .ok_or_else(|| self.error("only 'for (const x of items)' loops are supported"))?;
            let target = self.pattern()?;
            if !self.eat_keyword("of") {
                return Err(self.error("only 'for (const x of items)' loops are supported"));
            }
            let iterable = self.expression()?;
            self.expect_punct(")")?;
            self.loop_depth += 1;
            let body = self.branch();
            self.loop_depth -= 1;
            return Ok(Stmt::ForOf { kind, target, iterable, body: body? });
        }

        if self.is_keyword("return") {
            let line = self.advance().line;
            let ends = self.is_punct(";")
                || self.is_punct("}")
                || matches!(self.peek().kind, TokenKind::Eof)
                || self.peek().line > line;
            let value = if ends { None } else { Some(self.expression()?) };
            self.eat_punct(";");
            return Ok(Stmt::Return(value));
        }

        if self.eat_keyword("throw") {
            let value = self.expression()?;
            self.eat_punct(";");
            return Ok(Stmt::Throw(value));
        }

        if self.is_keyword("break") || self.is_keyword("continue") {
            if self.loop_depth == 0 {
                return Err(self.error("break/continue outside of a loop"));
            }
            let stmt = if self.eat_keyword("break") {
                Stmt::Break
            } else {
                self.advance();
                Stmt::Continue
            };
            self.eat_punct(";");
            return Ok(stmt);
        }

        for word in ["while", "do", "try", "class", "import", "export", "switch", "function"] {
            if self.is_keyword(word) {
                return Err(self.error(format!("'{}' is not supported in resolution logic", word)));
            }
        }

        if let TokenKind::Ident(name) = &self.peek().kind {
            if !RESERVED.contains(&name.as_str()) {
                let op = match &self.peek_at(1).kind {
                    TokenKind::Punct("=") => Some(AssignOp::Set),
                    TokenKind::Punct("+=") => Some(AssignOp::Add),
                    TokenKind::Punct("-=") => Some(AssignOp::Sub),
                    _ => None,
                };
                if let Some(op) = op {
                    let name = self.identifier()?;
                    self.advance();
                    let value = self.expression()?;
                    self.eat_punct(";");
                    return Ok(Stmt::Assign { name, op, value });
                }
            }
        }

        let expr = self.expression()?;
        if self.is_punct("=") || self.is_punct("+=") || self.is_punct("-=") {
            return Err(self.error("only plain variables can be assigned"));
        }
        self.eat_punct(";");
        Ok(Stmt::Expr(expr))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ResolveError> {
        self.enter()?;
        let expr = self.conditional();
        self.leave(1);
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ResolveError> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect_punct(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ResolveError> {
        let mut left = self.logical_and()?;
        let mut wraps = 0;
        loop {
            let op = if self.eat_punct("||") {
                LogicalOp::Or
            } else if self.eat_punct("??") {
                LogicalOp::Nullish
            } else {
                self.leave(wraps);
                return Ok(left);
            };
            self.enter()?;
            wraps += 1;
            let right = self.logical_and()?;
            left = Expr::Logical { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn logical_and(&mut self) -> Result<Expr, ResolveError> {
        let mut left = self.equality()?;
        let mut wraps = 0;
        while self.eat_punct("&&") {
            self.enter()?;
            wraps += 1;
            let right = self.equality()?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
        }
        self.leave(wraps);
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ResolveError>,
    ) -> Result<Expr, ResolveError> {
        let mut left = next(self)?;
        let mut wraps = 0;
        'outer: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    self.enter()?;
                    wraps += 1;
                    let right = next(self)?;
                    left = Expr::Binary { op: *op, left: Box::new(left), right: Box::new(right) };
                    continue 'outer;
                }
            }
            self.leave(wraps);
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ResolveError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNe),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ResolveError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ResolveError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ResolveError> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ResolveError> {
        let op = if self.eat_punct("!") {
            Some(UnaryOp::Not)
        } else if self.eat_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Plus)
        } else if self.eat_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };
        if let Some(op) = op {
            self.enter()?;
            let operand = self.unary()?;
            self.leave(1);
            return Ok(Expr::Unary { op, operand: Box::new(operand) });
        }

        if self.is_keyword("await") {
            if !self.in_async {
                return Err(self.error("await is only valid in async functions"));
            }
            self.advance();
            self.enter()?;
            let operand = self.unary()?;
            self.leave(1);
            return Ok(Expr::Await(Box::new(operand)));
        }

        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ResolveError> {
        let mut expr = self.primary()?;
        let mut wraps = 0;
        loop {
            if self.is_punct(".") || self.is_punct("[") || self.is_punct("(") {
                self.enter()?;
                wraps += 1;
            }
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member { object: Box::new(expr), property };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call { callee: Box::new(expr), args };
            } else {
                self.leave(wraps);
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ResolveError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.is_punct(")") {
            args.push(self.expression()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ResolveError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Num(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                if self.is_punct("=>") {
                    return Err(self.error("nested functions are not supported"));
                }
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    items.push(self.expression()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => {
                self.advance();
                let mut fields = Vec::new();
                while !self.is_punct("}") {
                    let shorthand = matches!(self.peek_at(1).kind, TokenKind::Punct(",") | TokenKind::Punct("}"));
                    if shorthand {
                        let name = self.identifier()?;
                        fields.push((name.clone(), Expr::Ident(name)));
                    } else {
                        let key = self.property_name()?;
                        self.expect_punct(":")?;
                        fields.push((key, self.expression()?));
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(fields))
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::Bool(word == "true")))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::Null))
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Literal(Literal::Undefined))
                }
                "new" => {
                    self.advance();
                    let constructor = self.identifier()?;
                    let args = if self.is_punct("(") { self.arguments()? } else { Vec::new() };
                    Ok(Expr::New { constructor, args })
                }
                "function" => Err(self.error("nested functions are not supported")),
                "async" if matches!(self.peek_at(1).kind, TokenKind::Punct("(") | TokenKind::Ident(_)) => {
                    Err(self.error("nested functions are not supported"))
                }
                _ => {
                    let name = self.identifier()?;
                    if self.is_punct("=>") {
                        return Err(self.error("nested functions are not supported"));
                    }
                    Ok(Expr::Ident(name))
                }
            },
            other => Err(self.error(format!("unexpected {}", describe(&other)))),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Num(n) => format!("number {}", n),
        TokenKind::Punct(p) => format!("'{}'", p),
        TokenKind::Eof => "end of input".to_string(),
    }
}

fn format_number_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_error(src: &str) -> String {
        match parse_function(src) {
            Err(ResolveError::Compilation { message, .. }) => message,
            other => panic!("expected compilation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_literal_arrow() {
        let f = parse_function("() => \"true\"").unwrap();
        assert!(!f.is_async);
        assert!(f.params.is_empty());
        assert_eq!(f.body, Body::Expr(Expr::Literal(Literal::Str("true".into()))));
    }

    #[test]
    fn test_parse_async_and_rest_params() {
        let f = parse_function("async (picks, ...rest) => { return rest; }").unwrap();
        assert!(f.is_async);
        assert_eq!(f.params, vec!["picks".to_string()]);
        assert_eq!(f.rest.as_deref(), Some("rest"));
    }

    #[test]
    fn test_parse_function_keyword_form() {
        let f = parse_function("async function resolve(picks, data) { return data; };").unwrap();
        assert_eq!(f.name.as_deref(), Some("resolve"));
        assert_eq!(f.params.len(), 2);
    }

    #[test]
    fn test_parse_single_bare_param() {
        let f = parse_function("picks => Object.keys(picks)[0]").unwrap();
        assert_eq!(f.params, vec!["picks".to_string()]);
        assert!(matches!(f.body, Body::Expr(Expr::Index { .. })));
    }

    #[test]
    fn test_precedence() {
        let f = parse_function("() => 1 + 2 * 3 === 7 && !false").unwrap();
        let Body::Expr(Expr::Logical { op: LogicalOp::And, left, .. }) = f.body else {
            panic!("expected && at the top");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::StrictEq, .. }));
    }

    #[test]
    fn test_return_on_next_line_returns_nothing() {
        let f = parse_function("() => { return\n 5 }").unwrap();
        let Body::Block(stmts) = f.body else { panic!() };
        assert_eq!(stmts[0], Stmt::Return(None));
    }

    #[test]
    fn test_await_requires_async() {
        assert_eq!(
            compile_error("(p, d, s, c) => await c.dao.verify(d, s)"),
            "await is only valid in async functions"
        );
    }

    #[test]
    fn test_rejected_programs() {
        assert!(compile_error("").contains("expected a function"));
        assert!(compile_error("\"just a string\"").contains("expected a function"));
        assert!(compile_error("() => { while (true) {} }").contains("not supported"));
        assert!(compile_error("() => { const f = x => x; }").contains("nested functions"));
        assert!(compile_error("() => { const a; }").contains("missing initializer"));
        assert!(compile_error("(a, a) => a").contains("duplicate parameter"));
        assert!(compile_error("() => { break; }").contains("outside of a loop"));
        assert!(compile_error("() => { a.b = 1; }").contains("assigned"));
        assert!(compile_error("() => 1; extra").contains("after function body"));
        assert!(compile_error("() => { return 1;").contains("expected '}'"));
    }

    #[test]
    fn test_deep_nesting_is_a_compilation_error() {
        let parens = format!("() => {}1{}", "(".repeat(20000), ")".repeat(20000));
        assert_eq!(compile_error(&parens), "expression nested too deeply");

        let nots = format!("() => {}true", "!".repeat(20000));
        assert_eq!(compile_error(&nots), "expression nested too deeply");

        let blocks = format!("() => {}{}", "{".repeat(20000), "}".repeat(20000));
        assert_eq!(compile_error(&blocks), "expression nested too deeply");

        let chain = format!("() => 1{}", " + 1".repeat(20000));
        assert_eq!(compile_error(&chain), "expression nested too deeply");

        let arrays = format!("() => {}{}", "[".repeat(20000), "]".repeat(20000));
        assert_eq!(compile_error(&arrays), "expression nested too deeply");
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let parens = format!("() => {}1{}", "(".repeat(30), ")".repeat(30));
        assert!(parse_function(&parens).is_ok());

        let chain = format!("(a) => a{}", " + a".repeat(40));
        assert!(parse_function(&chain).is_ok());
    }

    #[test]
    fn test_async_as_bare_parameter_name() {
        let f = parse_function("async => async").unwrap();
        assert!(!f.is_async);
        assert_eq!(f.params, vec!["async".to_string()]);
        assert_eq!(f.body, Body::Expr(Expr::Ident("async".into())));
    }

    #[test]
    fn test_error_position() {
        match parse_function("() => {\n  let = 3;\n}") {
            Err(ResolveError::Compilation { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}

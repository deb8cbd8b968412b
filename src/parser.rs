//! Recursive-descent parser producing the program AST.
//!
//! Statements are dispatched on their leading keyword; expressions use
//! precedence climbing over a fixed table (`* %` bind tightest, then `+ -`,
//! then the comparisons, all left-associative). Two context-sensitive rules
//! are enforced while parsing: functions must be defined before they are
//! called, checked against a set spanning the whole parse, and variables
//! must be declared (`let` or parameter) before use, with visibility
//! bracketed per function: a body sees only its own parameters and `let`s,
//! matching the per-function stack frame the generator builds. A function's
//! name is registered before its body so it can call itself.

use indexmap::IndexSet;

use crate::ast::{
  Assignment, BinaryOp, Block, Expression, FunctionCall, LetBinding, Program, Statement,
};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};

/// Whether the block being parsed produces a value. A value-producing block
/// (a function body or a block in expression position) admits `return`,
/// and the admission is inherited by blocks nested inside it so early
/// returns under `if`/`while` stay legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockContext {
  Plain,
  Value,
}

/// Parse a token sequence into a `Program`.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut parser = Parser::new(tokens, source);
  let mut statements = Vec::new();
  while parser.stream.peek().is_some() {
    let statement = if parser.stream.peek_kind() == Some(TokenKind::Define) {
      parser.parse_function_definition()?
    } else {
      parser.parse_statement(BlockContext::Plain)?
    };
    statements.push(statement);
  }
  Ok(Program { statements })
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  declared_vars: IndexSet<String>,
  declared_fns: IndexSet<String>,
}

impl<'a> Parser<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      stream: TokenStream::new(tokens, source),
      declared_vars: IndexSet::new(),
      declared_fns: IndexSet::new(),
    }
  }

  fn parse_statement(&mut self, context: BlockContext) -> CompileResult<Statement> {
    match self.stream.peek_kind() {
      Some(TokenKind::Exit) => self.parse_exit(),
      Some(TokenKind::Let) => Ok(Statement::Let(self.parse_let_binding()?)),
      Some(TokenKind::If) => self.parse_if(context),
      Some(TokenKind::While) => self.parse_while(context),
      Some(TokenKind::For) => self.parse_for(context),
      Some(TokenKind::OpenBrace) => Ok(Statement::Block(self.parse_block(context)?)),
      Some(TokenKind::Return) => {
        if context == BlockContext::Value {
          self.parse_return()
        } else {
          Err(self.stream.error_at_current(
            "\"return\" is only allowed inside a function body or a block expression",
          ))
        }
      }
      Some(TokenKind::Define) => Err(
        self
          .stream
          .error_at_current("function definitions are only allowed at the top level"),
      ),
      Some(TokenKind::Identifier) => {
        // An identifier starts a call statement when `(` follows, and an
        // assignment otherwise.
        if self.stream.nth_kind(1) == Some(TokenKind::OpenParen) {
          let call = self.parse_call()?;
          self
            .stream
            .expect(TokenKind::EndOfStatement, "call statement")?;
          Ok(Statement::Call(call))
        } else {
          Ok(Statement::Assign(self.parse_assignment(true)?))
        }
      }
      Some(_) => Err(self.stream.error_at_current("expected a statement")),
      None => Err(self.stream.eof("statement")),
    }
  }

  fn parse_exit(&mut self) -> CompileResult<Statement> {
    self.stream.expect(TokenKind::Exit, "exit statement")?;
    let value = self.parse_expression()?;
    self
      .stream
      .expect(TokenKind::EndOfStatement, "exit statement")?;
    Ok(Statement::Exit { value })
  }

  fn parse_return(&mut self) -> CompileResult<Statement> {
    self.stream.expect(TokenKind::Return, "return statement")?;
    let value = self.parse_expression()?;
    self
      .stream
      .expect(TokenKind::EndOfStatement, "return statement")?;
    Ok(Statement::Return { value })
  }

  /// `let name = value;` — also the `for` initialiser. The name becomes
  /// declared only after its initialiser has been parsed, so `let x = x;`
  /// is rejected.
  fn parse_let_binding(&mut self) -> CompileResult<LetBinding> {
    self.stream.expect(TokenKind::Let, "let statement")?;
    let name_token = self.stream.expect(TokenKind::Identifier, "let statement")?;
    let name = identifier_name(&name_token)?;
    self.stream.expect(TokenKind::Assign, "let statement")?;
    let value = self.parse_expression()?;
    self
      .stream
      .expect(TokenKind::EndOfStatement, "let statement")?;
    self.declared_vars.insert(name.clone());
    Ok(LetBinding { name, value })
  }

  /// `name = value` — `terminated` controls the trailing `;` (the step of a
  /// `for` header is terminated by the closing parenthesis instead).
  fn parse_assignment(&mut self, terminated: bool) -> CompileResult<Assignment> {
    let name_token = self.stream.expect(TokenKind::Identifier, "assignment")?;
    let name = identifier_name(&name_token)?;
    if !self.declared_vars.contains(&name) {
      return Err(CompileError::parse_at(
        self.stream.source,
        name_token.loc,
        format!("undeclared variable \"{name}\""),
      ));
    }
    self.stream.expect(TokenKind::Assign, "assignment")?;
    let value = self.parse_expression()?;
    if terminated {
      self.stream.expect(TokenKind::EndOfStatement, "assignment")?;
    }
    Ok(Assignment { name, value })
  }

  fn parse_if(&mut self, context: BlockContext) -> CompileResult<Statement> {
    self.stream.expect(TokenKind::If, "if statement")?;
    self.stream.expect(TokenKind::OpenParen, "if statement")?;
    let condition = self.parse_expression()?;
    self.stream.expect(TokenKind::CloseParen, "if statement")?;
    let then_block = self.parse_block(context)?;
    let else_block = if self.stream.peek_kind() == Some(TokenKind::Else) {
      self.stream.advance();
      Some(self.parse_block(context)?)
    } else {
      None
    };
    Ok(Statement::If {
      condition,
      then_block,
      else_block,
    })
  }

  fn parse_while(&mut self, context: BlockContext) -> CompileResult<Statement> {
    self.stream.expect(TokenKind::While, "while statement")?;
    self.stream.expect(TokenKind::OpenParen, "while statement")?;
    let condition = self.parse_expression()?;
    self.stream.expect(TokenKind::CloseParen, "while statement")?;
    let body = self.parse_block(context)?;
    Ok(Statement::While { condition, body })
  }

  /// `for ( let-init condition ; step ) block`
  fn parse_for(&mut self, context: BlockContext) -> CompileResult<Statement> {
    self.stream.expect(TokenKind::For, "for statement")?;
    self.stream.expect(TokenKind::OpenParen, "for statement")?;
    let init = self.parse_let_binding()?;
    let condition = self.parse_expression()?;
    self
      .stream
      .expect(TokenKind::EndOfStatement, "for statement")?;
    let step = self.parse_assignment(false)?;
    // The step may carry its own `;` before the closing parenthesis.
    if self.stream.peek_kind() == Some(TokenKind::EndOfStatement) {
      self.stream.advance();
    }
    self.stream.expect(TokenKind::CloseParen, "for statement")?;
    let body = self.parse_block(context)?;
    Ok(Statement::For {
      init,
      condition,
      step,
      body,
    })
  }

  fn parse_function_definition(&mut self) -> CompileResult<Statement> {
    self
      .stream
      .expect(TokenKind::Define, "function definition")?;
    let name_token = self
      .stream
      .expect(TokenKind::Identifier, "function definition")?;
    let name = identifier_name(&name_token)?;
    if name == "main" {
      return Err(CompileError::parse_at(
        self.stream.source,
        name_token.loc,
        "function name \"main\" is reserved for the entry point",
      ));
    }
    // Registered before the body is parsed so the function can call itself.
    self.declared_fns.insert(name.clone());

    self
      .stream
      .expect(TokenKind::OpenParen, "function parameters")?;
    // The body sees only its own parameters and `let`s; the surrounding
    // declarations are set aside and restored once the body is parsed, so a
    // parameter may shadow a top-level name without erasing it.
    let outer_vars = std::mem::take(&mut self.declared_vars);
    let mut params: Vec<String> = Vec::new();
    loop {
      match self.stream.peek_kind() {
        Some(TokenKind::CloseParen) => {
          self.stream.advance();
          break;
        }
        Some(TokenKind::Identifier) => {
          let param_token = self
            .stream
            .expect(TokenKind::Identifier, "function parameters")?;
          let param = identifier_name(&param_token)?;
          if params.contains(&param) {
            return Err(CompileError::parse_at(
              self.stream.source,
              param_token.loc,
              format!("duplicate parameter \"{param}\""),
            ));
          }
          self.declared_vars.insert(param.clone());
          params.push(param);
          // `,` never reaches the parser; `;` between parameters is accepted.
          if self.stream.peek_kind() == Some(TokenKind::EndOfStatement) {
            self.stream.advance();
          }
        }
        Some(_) => {
          return Err(
            self
              .stream
              .error_at_current("expected a parameter name or \")\""),
          );
        }
        None => return Err(self.stream.eof("function parameters")),
      }
    }

    let body = self.parse_block(BlockContext::Value)?;
    self.declared_vars = outer_vars;
    Ok(Statement::FunctionDef { name, params, body })
  }

  fn parse_block(&mut self, context: BlockContext) -> CompileResult<Block> {
    self.stream.expect(TokenKind::OpenBrace, "block")?;
    let mut statements = Vec::new();
    loop {
      match self.stream.peek_kind() {
        Some(TokenKind::CloseBrace) => {
          self.stream.advance();
          break;
        }
        Some(_) => statements.push(self.parse_statement(context)?),
        None => return Err(self.stream.eof("block")),
      }
    }
    Ok(Block { statements })
  }

  fn parse_expression(&mut self) -> CompileResult<Expression> {
    self.parse_binary(0)
  }

  /// Precedence climbing: recursing into the right operand with
  /// `precedence + 1` makes every operator left-associative, and the loop
  /// picks up weaker operators at the current level.
  fn parse_binary(&mut self, min_precedence: u8) -> CompileResult<Expression> {
    let mut left = self.parse_primary()?;
    while let Some(op) = self.stream.peek_kind().and_then(binary_op_of) {
      let prec = precedence(op);
      if prec < min_precedence {
        break;
      }
      self.stream.advance();
      let right = self.parse_binary(prec + 1)?;
      left = Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
      };
    }
    Ok(left)
  }

  fn parse_primary(&mut self) -> CompileResult<Expression> {
    match self.stream.peek_kind() {
      Some(TokenKind::Int) => {
        let token = self.stream.expect(TokenKind::Int, "expression")?;
        let text = token
          .text
          .as_deref()
          .ok_or_else(|| CompileError::fault("integer token missing its text"))?;
        let value = text.parse::<i64>().map_err(|_| {
          CompileError::parse_at(
            self.stream.source,
            token.loc,
            format!("integer literal \"{text}\" out of range"),
          )
        })?;
        Ok(Expression::IntLiteral(value))
      }
      Some(TokenKind::Identifier) => {
        if self.stream.nth_kind(1) == Some(TokenKind::OpenParen) {
          return Ok(Expression::Call(self.parse_call()?));
        }
        let token = self.stream.expect(TokenKind::Identifier, "expression")?;
        let name = identifier_name(&token)?;
        if !self.declared_vars.contains(&name) {
          return Err(CompileError::parse_at(
            self.stream.source,
            token.loc,
            format!("undeclared variable \"{name}\""),
          ));
        }
        Ok(Expression::Identifier(name))
      }
      Some(TokenKind::OpenParen) => {
        self.stream.advance();
        let inner = self.parse_expression()?;
        self
          .stream
          .expect(TokenKind::CloseParen, "parenthesized expression")?;
        Ok(inner)
      }
      Some(TokenKind::OpenBrace) => {
        let brace_loc = self.stream.current_loc();
        let block = self.parse_block(BlockContext::Value)?;
        if !contains_return(&block) {
          return Err(CompileError::parse_at(
            self.stream.source,
            brace_loc,
            "block expression has no \"return\" to supply its value",
          ));
        }
        Ok(Expression::BlockExpr(block))
      }
      Some(_) => Err(self.stream.error_at_current("expected an expression")),
      None => Err(self.stream.eof("expression")),
    }
  }

  /// `name(arg ...)` — arguments are expressions parsed until the closing
  /// parenthesis; the lexer swallows `,` so expressions delimit themselves.
  fn parse_call(&mut self) -> CompileResult<FunctionCall> {
    let name_token = self.stream.expect(TokenKind::Identifier, "call")?;
    let name = identifier_name(&name_token)?;
    if !self.declared_fns.contains(&name) {
      return Err(CompileError::parse_at(
        self.stream.source,
        name_token.loc,
        format!("call to undefined function \"{name}\""),
      ));
    }
    self.stream.expect(TokenKind::OpenParen, "call")?;
    let mut args = Vec::new();
    loop {
      match self.stream.peek_kind() {
        Some(TokenKind::CloseParen) => {
          self.stream.advance();
          break;
        }
        Some(_) => args.push(self.parse_expression()?),
        None => return Err(self.stream.eof("call arguments")),
      }
    }
    Ok(FunctionCall { name, args })
  }
}

fn identifier_name(token: &Token) -> CompileResult<String> {
  match token.text {
    Some(ref text) => Ok(text.clone()),
    None => Err(CompileError::fault("identifier token missing its text")),
  }
}

fn binary_op_of(kind: TokenKind) -> Option<BinaryOp> {
  match kind {
    TokenKind::Plus => Some(BinaryOp::Add),
    TokenKind::Minus => Some(BinaryOp::Sub),
    TokenKind::Multiply => Some(BinaryOp::Mul),
    TokenKind::Percent => Some(BinaryOp::Mod),
    TokenKind::Equal => Some(BinaryOp::Equal),
    TokenKind::LessThan => Some(BinaryOp::LessThan),
    TokenKind::GreaterThan => Some(BinaryOp::GreaterThan),
    _ => None,
  }
}

fn precedence(op: BinaryOp) -> u8 {
  match op {
    BinaryOp::Mul | BinaryOp::Mod => 5,
    BinaryOp::Add | BinaryOp::Sub => 4,
    BinaryOp::Equal | BinaryOp::LessThan | BinaryOp::GreaterThan => 3,
  }
}

/// A value-producing block needs at least one `return` somewhere under it.
/// Only statement nesting is searched; a `return` belonging to some inner
/// block expression supplies that inner block's value, not this one's.
fn contains_return(block: &Block) -> bool {
  block.statements.iter().any(|statement| match statement {
    Statement::Return { .. } => true,
    Statement::If {
      then_block,
      else_block,
      ..
    } => contains_return(then_block) || else_block.as_ref().is_some_and(contains_return),
    Statement::While { body, .. } => contains_return(body),
    Statement::For { body, .. } => contains_return(body),
    Statement::Block(inner) => contains_return(inner),
    _ => false,
  })
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self) -> Option<TokenKind> {
    self.peek().map(|token| token.kind)
  }

  /// Lookahead without consuming; `nth_kind(1)` is the token after next.
  fn nth_kind(&self, n: usize) -> Option<TokenKind> {
    self.tokens.get(self.pos + n).map(|token| token.kind)
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    if token.is_some() {
      self.pos += 1;
    }
    token
  }

  fn current_loc(&self) -> usize {
    self
      .peek()
      .map_or_else(|| self.source.len(), |token| token.loc)
  }

  /// Consume the next token if it has the expected kind, or fail with an
  /// expected-versus-actual diagnostic anchored at the offending token.
  fn expect(&mut self, kind: TokenKind, during: &str) -> CompileResult<Token> {
    match self.tokens.get(self.pos) {
      Some(token) if token.kind == kind => {
        let token = token.clone();
        self.pos += 1;
        Ok(token)
      }
      Some(token) => Err(CompileError::parse_at(
        self.source,
        token.loc,
        format!(
          "expected \"{}\", but got \"{}\" while parsing {}",
          kind.spelling(),
          token.describe(),
          during
        ),
      )),
      None => Err(CompileError::parse_at(
        self.source,
        self.source.len(),
        format!(
          "expected \"{}\", but reached end of input while parsing {}",
          kind.spelling(),
          during
        ),
      )),
    }
  }

  fn error_at_current(&self, message: impl Into<String>) -> CompileError {
    let message = match self.peek() {
      Some(token) => format!("{}, but got \"{}\"", message.into(), token.describe()),
      None => message.into(),
    };
    CompileError::parse_at(self.source, self.current_loc(), message)
  }

  fn eof(&self, during: &str) -> CompileError {
    CompileError::parse_at(
      self.source,
      self.source.len(),
      format!("unexpected end of input while parsing {during}"),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_source(source: &str) -> CompileResult<Program> {
    parse(tokenize(source)?, source)
  }

  fn int(value: i64) -> Expression {
    Expression::IntLiteral(value)
  }

  fn binary(left: Expression, op: BinaryOp, right: Expression) -> Expression {
    Expression::Binary {
      left: Box::new(left),
      op,
      right: Box::new(right),
    }
  }

  #[test]
  fn multiplication_binds_tighter_than_addition() {
    let program = parse_source("exit 2 + 3 * 4;").unwrap();
    let expected = Statement::Exit {
      value: binary(int(2), BinaryOp::Add, binary(int(3), BinaryOp::Mul, int(4))),
    };
    assert_eq!(program.statements, vec![expected]);
  }

  #[test]
  fn subtraction_is_left_associative() {
    let program = parse_source("exit 10 - 3 - 2;").unwrap();
    let expected = Statement::Exit {
      value: binary(binary(int(10), BinaryOp::Sub, int(3)), BinaryOp::Sub, int(2)),
    };
    assert_eq!(program.statements, vec![expected]);
  }

  #[test]
  fn comparison_binds_loosest() {
    let program = parse_source("exit 1 + 2 < 3 * 4;").unwrap();
    let expected = Statement::Exit {
      value: binary(
        binary(int(1), BinaryOp::Add, int(2)),
        BinaryOp::LessThan,
        binary(int(3), BinaryOp::Mul, int(4)),
      ),
    };
    assert_eq!(program.statements, vec![expected]);
  }

  #[test]
  fn parentheses_override_precedence() {
    let program = parse_source("exit (2 + 3) * 4;").unwrap();
    let expected = Statement::Exit {
      value: binary(binary(int(2), BinaryOp::Add, int(3)), BinaryOp::Mul, int(4)),
    };
    assert_eq!(program.statements, vec![expected]);
  }

  #[test]
  fn assignment_before_declaration_fails() {
    let err = parse_source("x = 1;").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"x\""));
  }

  #[test]
  fn assignment_after_declaration_parses() {
    parse_source("let x = 1; x = 2;").unwrap();
  }

  #[test]
  fn use_before_declaration_in_expression_fails() {
    let err = parse_source("let x = y + 1;").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"y\""));
  }

  #[test]
  fn let_initialiser_cannot_reference_its_own_name() {
    let err = parse_source("let x = x;").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"x\""));
  }

  #[test]
  fn call_before_definition_fails() {
    let err = parse_source("exit f();").unwrap_err();
    assert!(format!("{err}").contains("call to undefined function \"f\""));
  }

  #[test]
  fn call_after_definition_parses() {
    parse_source("define f() { return 1; } exit f();").unwrap();
  }

  #[test]
  fn self_recursive_call_parses() {
    parse_source("define f(n) { return f(n - 1); } exit f(3);").unwrap();
  }

  #[test]
  fn parameters_go_out_of_scope_after_the_body() {
    let err = parse_source("define f(a) { return a; } exit a;").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"a\""));
  }

  #[test]
  fn parameter_names_reusable_across_functions() {
    parse_source("define f(a) { return a; } define g(a) { return a + 1; } exit g(f(1));")
      .unwrap();
  }

  #[test]
  fn parameter_may_shadow_a_top_level_let() {
    parse_source("let a = 1; define f(a) { return a; } exit a;").unwrap();
  }

  #[test]
  fn function_body_cannot_reference_outer_variables() {
    let err = parse_source("let x = 1; define g() { return x; } exit g();").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"x\""));
  }

  #[test]
  fn body_lets_do_not_leak_out_of_the_function() {
    let err = parse_source("define f() { let t = 1; return t; } exit t;").unwrap_err();
    assert!(format!("{err}").contains("undeclared variable \"t\""));
  }

  #[test]
  fn duplicate_parameter_fails() {
    let err = parse_source("define f(a, a) { return a; }").unwrap_err();
    assert!(format!("{err}").contains("duplicate parameter \"a\""));
  }

  #[test]
  fn block_expression_requires_a_return() {
    let err = parse_source("let y = { exit 1; };").unwrap_err();
    assert!(format!("{err}").contains("no \"return\""));
  }

  #[test]
  fn block_expression_with_return_parses() {
    parse_source("let y = { return 5; }; exit y;").unwrap();
  }

  #[test]
  fn block_expression_return_may_be_nested_in_control_flow() {
    parse_source("let a = 1; let y = { if (a < 2) { return 1; } return 2; }; exit y;").unwrap();
  }

  #[test]
  fn return_outside_value_context_fails() {
    let err = parse_source("return 1;").unwrap_err();
    assert!(format!("{err}").contains("block expression"));
  }

  #[test]
  fn return_in_plain_statement_block_fails() {
    let err = parse_source("{ return 1; }").unwrap_err();
    assert!(format!("{err}").contains("block expression"));
  }

  #[test]
  fn early_return_under_if_inside_function_parses() {
    parse_source("define f(n) { if (n < 1) { return 0; } return n; } exit f(2);").unwrap();
  }

  #[test]
  fn nested_function_definition_fails() {
    let err = parse_source("define f() { define g() { return 1; } return 1; }").unwrap_err();
    assert!(format!("{err}").contains("top level"));
  }

  #[test]
  fn for_statement_keeps_init_and_step_structure() {
    let program = parse_source("for (let i = 0; i < 3; i = i + 1) { exit i; }").unwrap();
    match &program.statements[0] {
      Statement::For {
        init, step, body, ..
      } => {
        assert_eq!(init.name, "i");
        assert_eq!(step.name, "i");
        assert_eq!(body.statements.len(), 1);
      }
      other => panic!("expected a for statement, got {other:?}"),
    }
  }

  #[test]
  fn missing_semicolon_reports_expected_token() {
    let err = parse_source("exit 1").unwrap_err();
    let rendered = format!("{err}");
    assert!(rendered.contains("expected \";\""), "got: {rendered}");
  }

  #[test]
  fn stray_token_reports_actual_spelling() {
    let err = parse_source("let 5 = 1;").unwrap_err();
    let rendered = format!("{err}");
    assert!(rendered.contains("expected \"identifier\""), "got: {rendered}");
    assert!(rendered.contains("\"5\""), "got: {rendered}");
  }

  #[test]
  fn main_is_a_reserved_function_name() {
    let err = parse_source("define main() { return 0; }").unwrap_err();
    assert!(format!("{err}").contains("reserved for the entry point"));
  }

  #[test]
  fn call_arguments_parse_without_separator_tokens() {
    let program = parse_source("define add(a, b) { return a + b; } exit add(2, 3);").unwrap();
    match &program.statements[1] {
      Statement::Exit {
        value: Expression::Call(call),
      } => {
        assert_eq!(call.name, "add");
        assert_eq!(call.args, vec![int(2), int(3)]);
      }
      other => panic!("expected an exit with a call, got {other:?}"),
    }
  }
}

//! AST definitions shared by the parser and the code generator.
//!
//! Statements and expressions are closed enums matched exhaustively in the
//! generator, so adding a node kind is a compile error until every consumer
//! handles it. Nodes are exclusively owned by their parent (`Box`/`Vec`,
//! no sharing) and are never mutated once attached.

/// Root of the tree: the ordered top-level statements of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  pub statements: Vec<Statement>,
}

/// A brace-delimited ordered sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub statements: Vec<Statement>,
}

/// `let name = value;` — declares and initialises a new local.
#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
  pub name: String,
  pub value: Expression,
}

/// `name = value;` — stores into an already-declared local.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
  pub name: String,
  pub value: Expression,
}

/// `name(arg, ...)` — usable both as an expression and as a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
  pub name: String,
  pub args: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
  Let(LetBinding),
  Assign(Assignment),
  /// `exit value;` — terminates the process with `value` as exit status.
  Exit { value: Expression },
  /// `return value;` — early return from the enclosing function, or the
  /// value of the enclosing block-expression.
  Return { value: Expression },
  If {
    condition: Expression,
    then_block: Block,
    else_block: Option<Block>,
  },
  While {
    condition: Expression,
    body: Block,
  },
  /// `for (init cond; step) body` — sugar for `init; while (cond) { body; step; }`.
  For {
    init: LetBinding,
    condition: Expression,
    step: Assignment,
    body: Block,
  },
  FunctionDef {
    name: String,
    params: Vec<String>,
    body: Block,
  },
  Block(Block),
  Call(FunctionCall),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
  IntLiteral(i64),
  Identifier(String),
  Binary {
    left: Box<Expression>,
    op: BinaryOp,
    right: Box<Expression>,
  },
  Call(FunctionCall),
  /// A block used where an expression is expected; its internal `return`
  /// supplies the value.
  BlockExpr(Block),
}

/// The closed operator set. Precedence lives in the parser, instruction
/// selection in the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Mod,
  Equal,
  LessThan,
  GreaterThan,
}

impl BinaryOp {
  pub fn spelling(self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Mod => "%",
      BinaryOp::Equal => "==",
      BinaryOp::LessThan => "<",
      BinaryOp::GreaterThan => ">",
    }
  }
}

impl Program {
  /// Render the tree as indented text, one node per line. Only used for
  /// `trace!` dumps in the driver, so legibility beats compactness.
  pub fn visualize(&self) -> String {
    let mut out = String::from("Program:\n");
    for stmt in &self.statements {
      stmt.visualize(2, &mut out);
    }
    out
  }
}

impl Block {
  fn visualize(&self, indent: usize, out: &mut String) {
    push_line(out, indent, "Block:");
    for stmt in &self.statements {
      stmt.visualize(indent + 2, out);
    }
  }
}

impl Statement {
  fn visualize(&self, indent: usize, out: &mut String) {
    match self {
      Statement::Let(binding) => {
        push_line(out, indent, &format!("Let: {}", binding.name));
        binding.value.visualize(indent + 2, out);
      }
      Statement::Assign(assignment) => {
        push_line(out, indent, &format!("Assign: {}", assignment.name));
        assignment.value.visualize(indent + 2, out);
      }
      Statement::Exit { value } => {
        push_line(out, indent, "Exit:");
        value.visualize(indent + 2, out);
      }
      Statement::Return { value } => {
        push_line(out, indent, "Return:");
        value.visualize(indent + 2, out);
      }
      Statement::If {
        condition,
        then_block,
        else_block,
      } => {
        push_line(out, indent, "If:");
        condition.visualize(indent + 2, out);
        then_block.visualize(indent + 2, out);
        if let Some(else_block) = else_block {
          push_line(out, indent, "Else:");
          else_block.visualize(indent + 2, out);
        }
      }
      Statement::While { condition, body } => {
        push_line(out, indent, "While:");
        condition.visualize(indent + 2, out);
        body.visualize(indent + 2, out);
      }
      Statement::For {
        init,
        condition,
        step,
        body,
      } => {
        push_line(out, indent, "For:");
        push_line(out, indent + 2, &format!("Init: {}", init.name));
        init.value.visualize(indent + 4, out);
        condition.visualize(indent + 2, out);
        push_line(out, indent + 2, &format!("Step: {}", step.name));
        step.value.visualize(indent + 4, out);
        body.visualize(indent + 2, out);
      }
      Statement::FunctionDef { name, params, body } => {
        push_line(
          out,
          indent,
          &format!("FunctionDef: {}({})", name, params.join(", ")),
        );
        body.visualize(indent + 2, out);
      }
      Statement::Block(block) => block.visualize(indent, out),
      Statement::Call(call) => call.visualize(indent, out),
    }
  }
}

impl Expression {
  fn visualize(&self, indent: usize, out: &mut String) {
    match self {
      Expression::IntLiteral(value) => push_line(out, indent, &format!("Int: {value}")),
      Expression::Identifier(name) => push_line(out, indent, &format!("Identifier: {name}")),
      Expression::Binary { left, op, right } => {
        push_line(out, indent, &format!("Binary: {}", op.spelling()));
        left.visualize(indent + 2, out);
        right.visualize(indent + 2, out);
      }
      Expression::Call(call) => call.visualize(indent, out),
      Expression::BlockExpr(block) => {
        push_line(out, indent, "BlockExpr:");
        block.visualize(indent + 2, out);
      }
    }
  }
}

impl FunctionCall {
  fn visualize(&self, indent: usize, out: &mut String) {
    push_line(out, indent, &format!("Call: {}", self.name));
    for arg in &self.args {
      arg.visualize(indent + 2, out);
    }
  }
}

fn push_line(out: &mut String, indent: usize, text: &str) {
  for _ in 0..indent {
    out.push(' ');
  }
  out.push_str(text);
  out.push('\n');
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn visualize_nests_by_two_spaces() {
    let program = Program {
      statements: vec![Statement::Exit {
        value: Expression::Binary {
          left: Box::new(Expression::IntLiteral(2)),
          op: BinaryOp::Add,
          right: Box::new(Expression::IntLiteral(3)),
        },
      }],
    };
    let expected = "Program:\n  Exit:\n    Binary: +\n      Int: 2\n      Int: 3\n";
    assert_eq!(program.visualize(), expected);
  }
}

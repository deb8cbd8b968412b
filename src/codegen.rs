//! Code generation: lower the AST into AT&T x86-64 assembly.
//!
//! Every expression materialises its result in `%rax`. Binary operations
//! evaluate their right operand first, park it on the machine stack, then
//! evaluate the left operand and combine. Locals live in 8-byte slots below
//! `%rbp`; the frame is sized up front for the parameters plus every `let`
//! reachable in the body, including those nested inside control flow, so no
//! store can ever land outside the reservation.
//!
//! The walk emits each `define`d function in source order, then a
//! synthesised `main` holding the program's top-level statements, then a
//! `_start` entry point that calls `main` and exits with its return value.
//! Control-flow labels come from a generator-owned monotonic counter, so
//! every label is unique within one compilation.

use indexmap::IndexMap;
use log::debug;

use crate::ast::{Assignment, BinaryOp, Block, Expression, FunctionCall, Program, Statement};
use crate::error::{CompileError, CompileResult};

/// Integer argument registers in argument-position order (System V AMD64).
const ARG_REGISTERS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// The distinguished start symbol called by the entry point.
const START_FUNCTION: &str = "main";

/// Emit assembly for a whole program. The only failures are internal
/// faults: an undeclared symbol or a malformed tree reaching this stage
/// means the parser's checks were bypassed.
pub fn generate(program: &Program) -> CompileResult<String> {
  let mut generator = Generator::new();
  let mut top_level = Vec::new();

  for statement in &program.statements {
    match statement {
      Statement::FunctionDef { name, params, body } => {
        generator.emit_function(name, params, body)?;
      }
      other => top_level.push(other.clone()),
    }
  }

  let main_body = Block {
    statements: top_level,
  };
  generator.emit_function(START_FUNCTION, &[], &main_body)?;
  generator.emit_entry();
  Ok(generator.asm)
}

struct Generator {
  asm: String,
  /// Monotonic label counter; one fresh id per control-flow construct.
  labels: u64,
  /// Current function's locals: name to `%rbp`-relative slot offset.
  frame: IndexMap<String, i64>,
  /// End labels of the block expressions currently being emitted;
  /// `return` jumps to the innermost one instead of leaving the function.
  block_end: Vec<String>,
}

impl Generator {
  fn new() -> Self {
    Self {
      asm: String::new(),
      labels: 0,
      frame: IndexMap::new(),
      block_end: Vec::new(),
    }
  }

  fn next_label(&mut self) -> u64 {
    let id = self.labels;
    self.labels += 1;
    id
  }

  /// Assign the next free slot to `name`, or return its existing slot when
  /// a `let` rebinds a name. Offsets are strictly negative and unique.
  fn bind_slot(&mut self, name: &str) -> i64 {
    if let Some(&offset) = self.frame.get(name) {
      return offset;
    }
    let offset = -8 * (self.frame.len() as i64 + 1);
    self.frame.insert(name.to_string(), offset);
    offset
  }

  fn lookup_slot(&self, name: &str) -> CompileResult<i64> {
    match self.frame.get(name) {
      Some(&offset) => Ok(offset),
      None => Err(CompileError::fault(format!(
        "undeclared symbol \"{name}\" reached the code generator"
      ))),
    }
  }

  fn emit_function(&mut self, name: &str, params: &[String], body: &Block) -> CompileResult<()> {
    self.frame.clear();
    let slots = params.len() + count_lets_in_block(body);
    debug!(
      "emitting function {name} ({} parameters, {slots} stack slots)",
      params.len()
    );

    self.asm.push_str(&format!("{name}:\n"));
    self.asm.push_str("    push %rbp\n");
    self.asm.push_str("    mov %rsp, %rbp\n");
    if slots > 0 {
      self.asm.push_str(&format!("    sub ${}, %rsp\n", 8 * slots));
    }

    // Spill incoming arguments into their slots: the first six arrive in
    // registers, the rest sit above the saved frame pointer.
    for (i, param) in params.iter().enumerate() {
      let offset = self.bind_slot(param);
      if i < ARG_REGISTERS.len() {
        self
          .asm
          .push_str(&format!("    mov {}, {offset}(%rbp)\n", ARG_REGISTERS[i]));
      } else {
        let incoming = 16 + 8 * (i - ARG_REGISTERS.len());
        self.asm.push_str(&format!("    mov {incoming}(%rbp), %rax\n"));
        self.asm.push_str(&format!("    mov %rax, {offset}(%rbp)\n"));
      }
    }

    for statement in &body.statements {
      self.emit_statement(statement)?;
    }

    // Falling off the end of a function returns 0.
    self.asm.push_str("    mov $0, %rax\n");
    self.emit_epilogue();
    Ok(())
  }

  fn emit_epilogue(&mut self) {
    self.asm.push_str("    mov %rbp, %rsp\n");
    self.asm.push_str("    pop %rbp\n");
    self.asm.push_str("    ret\n");
  }

  /// The process entry point: run `main`, then exit with its return value.
  fn emit_entry(&mut self) {
    self.asm.push_str(".global _start\n");
    self.asm.push_str("_start:\n");
    self.asm.push_str(&format!("    call {START_FUNCTION}\n"));
    self.asm.push_str("    mov %rax, %rdi\n");
    self.asm.push_str("    mov $60, %rax\n");
    self.asm.push_str("    syscall\n");
  }

  fn emit_statement(&mut self, statement: &Statement) -> CompileResult<()> {
    match statement {
      Statement::Let(binding) => {
        self.emit_expression(&binding.value)?;
        let offset = self.bind_slot(&binding.name);
        self.asm.push_str(&format!("    mov %rax, {offset}(%rbp)\n"));
      }
      Statement::Assign(assignment) => self.emit_assignment(assignment)?,
      Statement::Exit { value } => {
        self.emit_expression(value)?;
        self.asm.push_str("    mov %rax, %rdi\n");
        self.asm.push_str("    mov $60, %rax\n");
        self.asm.push_str("    syscall\n");
      }
      Statement::Return { value } => {
        self.emit_expression(value)?;
        match self.block_end.last().cloned() {
          // Inside a block expression the value stays in %rax and control
          // resumes after the block.
          Some(label) => self.asm.push_str(&format!("    jmp {label}\n")),
          None => self.emit_epilogue(),
        }
      }
      Statement::If {
        condition,
        then_block,
        else_block,
      } => {
        let id = self.next_label();
        self.emit_expression(condition)?;
        self.asm.push_str("    cmp $0, %rax\n");
        self.asm.push_str(&format!("    je else_{id}\n"));
        self.emit_block(then_block)?;
        self.asm.push_str(&format!("    jmp endif_{id}\n"));
        self.asm.push_str(&format!("else_{id}:\n"));
        if let Some(else_block) = else_block {
          self.emit_block(else_block)?;
        }
        self.asm.push_str(&format!("endif_{id}:\n"));
      }
      Statement::While { condition, body } => {
        let id = self.next_label();
        self.asm.push_str(&format!("while_{id}:\n"));
        self.emit_expression(condition)?;
        self.asm.push_str("    cmp $0, %rax\n");
        self.asm.push_str(&format!("    je endwhile_{id}\n"));
        self.emit_block(body)?;
        self.asm.push_str(&format!("    jmp while_{id}\n"));
        self.asm.push_str(&format!("endwhile_{id}:\n"));
      }
      Statement::For {
        init,
        condition,
        step,
        body,
      } => {
        // `for` desugars to `let init; while (cond) { body; step; }` and
        // shares the while label scheme.
        self.emit_expression(&init.value)?;
        let offset = self.bind_slot(&init.name);
        self.asm.push_str(&format!("    mov %rax, {offset}(%rbp)\n"));
        let id = self.next_label();
        self.asm.push_str(&format!("while_{id}:\n"));
        self.emit_expression(condition)?;
        self.asm.push_str("    cmp $0, %rax\n");
        self.asm.push_str(&format!("    je endwhile_{id}\n"));
        self.emit_block(body)?;
        self.emit_assignment(step)?;
        self.asm.push_str(&format!("    jmp while_{id}\n"));
        self.asm.push_str(&format!("endwhile_{id}:\n"));
      }
      Statement::FunctionDef { .. } => {
        return Err(CompileError::fault(
          "nested function definition reached the code generator",
        ));
      }
      Statement::Block(block) => self.emit_block(block)?,
      Statement::Call(call) => self.emit_call(call)?,
    }
    Ok(())
  }

  fn emit_block(&mut self, block: &Block) -> CompileResult<()> {
    for statement in &block.statements {
      self.emit_statement(statement)?;
    }
    Ok(())
  }

  fn emit_assignment(&mut self, assignment: &Assignment) -> CompileResult<()> {
    let offset = self.lookup_slot(&assignment.name)?;
    self.emit_expression(&assignment.value)?;
    self.asm.push_str(&format!("    mov %rax, {offset}(%rbp)\n"));
    Ok(())
  }

  fn emit_expression(&mut self, expression: &Expression) -> CompileResult<()> {
    match expression {
      Expression::IntLiteral(value) => {
        self.asm.push_str(&format!("    mov ${value}, %rax\n"));
      }
      Expression::Identifier(name) => {
        let offset = self.lookup_slot(name)?;
        self.asm.push_str(&format!("    mov {offset}(%rbp), %rax\n"));
      }
      Expression::Binary { left, op, right } => {
        self.emit_expression(right)?;
        self.asm.push_str("    push %rax\n");
        self.emit_expression(left)?;
        self.asm.push_str("    pop %rdi\n");
        match op {
          BinaryOp::Add => self.asm.push_str("    add %rdi, %rax\n"),
          BinaryOp::Sub => self.asm.push_str("    sub %rdi, %rax\n"),
          BinaryOp::Mul => self.asm.push_str("    imul %rdi, %rax\n"),
          BinaryOp::Mod => {
            self.asm.push_str("    cqo\n");
            self.asm.push_str("    idiv %rdi\n");
            self.asm.push_str("    mov %rdx, %rax\n");
          }
          BinaryOp::Equal => {
            self.asm.push_str("    cmp %rdi, %rax\n");
            self.asm.push_str("    sete %al\n");
            self.asm.push_str("    movzbl %al, %eax\n");
          }
          BinaryOp::LessThan => {
            self.asm.push_str("    cmp %rdi, %rax\n");
            self.asm.push_str("    setl %al\n");
            self.asm.push_str("    movzbl %al, %eax\n");
          }
          BinaryOp::GreaterThan => {
            self.asm.push_str("    cmp %rdi, %rax\n");
            self.asm.push_str("    setg %al\n");
            self.asm.push_str("    movzbl %al, %eax\n");
          }
        }
      }
      Expression::Call(call) => self.emit_call(call)?,
      Expression::BlockExpr(block) => {
        let id = self.next_label();
        let label = format!("blockend_{id}");
        self.block_end.push(label.clone());
        self.emit_block(block)?;
        self.block_end.pop();
        self.asm.push_str(&format!("{label}:\n"));
      }
    }
    Ok(())
  }

  /// Call sequencing, strictly nested: save the six argument registers,
  /// evaluate every argument left to right into a staging area, place the
  /// first six into registers by position and push any extras so argument
  /// seven ends up on top of the stack, call, then unwind in reverse.
  fn emit_call(&mut self, call: &FunctionCall) -> CompileResult<()> {
    let n = call.args.len();
    for reg in ARG_REGISTERS {
      self.asm.push_str(&format!("    push {reg}\n"));
    }
    if n > 0 {
      self.asm.push_str(&format!("    sub ${}, %rsp\n", 8 * n));
    }
    for (i, arg) in call.args.iter().enumerate() {
      self.emit_expression(arg)?;
      self.asm.push_str(&format!("    mov %rax, {}(%rsp)\n", 8 * i));
    }
    for (i, reg) in ARG_REGISTERS.iter().enumerate().take(n) {
      self.asm.push_str(&format!("    mov {}(%rsp), {reg}\n", 8 * i));
    }
    let extra = n.saturating_sub(ARG_REGISTERS.len());
    for (pushed, j) in (ARG_REGISTERS.len()..n).rev().enumerate() {
      self
        .asm
        .push_str(&format!("    mov {}(%rsp), %rax\n", 8 * j + 8 * pushed));
      self.asm.push_str("    push %rax\n");
    }
    self.asm.push_str(&format!("    call {}\n", call.name));
    if n > 0 {
      self
        .asm
        .push_str(&format!("    add ${}, %rsp\n", 8 * (n + extra)));
    }
    for reg in ARG_REGISTERS.iter().rev() {
      self.asm.push_str(&format!("    pop {reg}\n"));
    }
    Ok(())
  }
}

/// Frame sizing counts every `let` the body can reach, nested blocks and
/// block expressions included. The symbol table hands all of them slots, so
/// counting only the top level would under-allocate the frame.
fn count_lets_in_block(block: &Block) -> usize {
  block.statements.iter().map(count_lets_in_statement).sum()
}

fn count_lets_in_statement(statement: &Statement) -> usize {
  match statement {
    Statement::Let(binding) => 1 + count_lets_in_expression(&binding.value),
    Statement::Assign(assignment) => count_lets_in_expression(&assignment.value),
    Statement::Exit { value } | Statement::Return { value } => count_lets_in_expression(value),
    Statement::If {
      condition,
      then_block,
      else_block,
    } => {
      count_lets_in_expression(condition)
        + count_lets_in_block(then_block)
        + else_block.as_ref().map_or(0, count_lets_in_block)
    }
    Statement::While { condition, body } => {
      count_lets_in_expression(condition) + count_lets_in_block(body)
    }
    Statement::For {
      init,
      condition,
      step,
      body,
    } => {
      1 + count_lets_in_expression(&init.value)
        + count_lets_in_expression(condition)
        + count_lets_in_expression(&step.value)
        + count_lets_in_block(body)
    }
    Statement::FunctionDef { .. } => 0,
    Statement::Block(block) => count_lets_in_block(block),
    Statement::Call(call) => call.args.iter().map(count_lets_in_expression).sum(),
  }
}

fn count_lets_in_expression(expression: &Expression) -> usize {
  match expression {
    Expression::Binary { left, right, .. } => {
      count_lets_in_expression(left) + count_lets_in_expression(right)
    }
    Expression::Call(call) => call.args.iter().map(count_lets_in_expression).sum(),
    Expression::BlockExpr(block) => count_lets_in_block(block),
    Expression::IntLiteral(_) | Expression::Identifier(_) => 0,
  }
}

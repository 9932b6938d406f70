//! Builds a [`Module`] from tokenized lines.
//!
//! Globals are collected in a first sweep so kernels may reference them
//! regardless of declaration order. Inside a kernel, every label is turned
//! into a block before any instruction is read, so branch targets and phi
//! incoming blocks resolve immediately. Values referenced before their
//! definition are inserted as `undef` and patched once the kernel is closed.

use std::collections::HashMap;

use thrud_ir::{
    AddressSpace, BinaryOp, Block, CastOp, CmpPredicate, GlobalVariable, Handle, Instruction,
    Kernel, Module, Opcode, Type, Value,
};

use crate::ParseError;
use crate::lexer::{Token, tokenize};

struct Line {
    number: usize,
    tokens: Vec<Token>,
}

/// Token cursor over a single line.
struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a Line) -> Self {
        Self {
            tokens: &line.tokens,
            pos: 0,
            line: line.number,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::Unexpected {
            line: self.line,
            found: self
                .tokens
                .get(self.pos)
                .map_or_else(|| "end of line".to_string(), Token::describe),
            expected: expected.to_string(),
        }
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{c}'")))
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w == word => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    fn word(&mut self) -> Result<&'a str, ParseError> {
        match self.peek() {
            Some(Token::Word(w)) => {
                self.pos += 1;
                Ok(w.as_str())
            }
            _ => Err(self.unexpected("a keyword")),
        }
    }

    fn local(&mut self) -> Result<&'a str, ParseError> {
        match self.peek() {
            Some(Token::Local(n)) => {
                self.pos += 1;
                Ok(n.as_str())
            }
            _ => Err(self.unexpected("a '%' name")),
        }
    }

    fn global(&mut self) -> Result<&'a str, ParseError> {
        match self.peek() {
            Some(Token::Global(n)) => {
                self.pos += 1;
                Ok(n.as_str())
            }
            _ => Err(self.unexpected("a '@' name")),
        }
    }

    fn int(&mut self) -> Result<i64, ParseError> {
        match self.peek() {
            Some(Token::Int(v)) => {
                self.pos += 1;
                Ok(*v)
            }
            _ => Err(self.unexpected("an integer")),
        }
    }

    fn unsigned(&mut self) -> Result<u32, ParseError> {
        let line = self.line;
        let value = self.int()?;
        u32::try_from(value).map_err(|_| ParseError::BadInteger {
            line,
            text: value.to_string(),
        })
    }

    fn space(&mut self) -> Result<AddressSpace, ParseError> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let space = AddressSpace::from_keyword(w)
                    .ok_or_else(|| self.unexpected("an address space"))?;
                self.pos += 1;
                Ok(space)
            }
            _ => Err(self.unexpected("an address space")),
        }
    }

    fn ty(&mut self) -> Result<Type, ParseError> {
        let line = self.line;
        let word = self.word()?;
        if word == "void" {
            return Ok(Type::Void);
        }
        if word == "ptr" {
            return Ok(Type::Ptr(self.space()?));
        }
        let bits = |rest: &str| rest.parse::<u16>().ok().filter(|&b| b > 0);
        let ty = match word.split_at(1) {
            ("i", rest) => bits(rest).map(Type::Int),
            ("f", rest) => bits(rest).map(Type::Float),
            _ => None,
        };
        ty.ok_or_else(|| ParseError::UnknownType {
            line,
            name: word.to_string(),
        })
    }

    fn end(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }
}

/// An operand slot whose value is defined later in the kernel.
struct Fixup {
    inst: Handle<Instruction>,
    index: usize,
    name: String,
    line: usize,
}

/// Per-kernel name tables.
struct KernelScope<'m> {
    globals: &'m HashMap<String, Handle<GlobalVariable>>,
    blocks: HashMap<String, Handle<Block>>,
    values: HashMap<String, Value>,
    fixups: Vec<Fixup>,
}

/// A parsed operand: either resolved or pending a later definition.
enum Operand {
    Ready(Value),
    Forward(String),
}

impl KernelScope<'_> {
    fn operand(&self, cur: &mut Cursor<'_>) -> Result<Operand, ParseError> {
        let line = cur.line;
        match cur.next() {
            Some(Token::Int(v)) => Ok(Operand::Ready(Value::Const(*v))),
            Some(Token::Word(w)) if w == "undef" => Ok(Operand::Ready(Value::Undef)),
            Some(Token::Local(name)) => Ok(match self.values.get(name) {
                Some(&value) => Operand::Ready(value),
                None => Operand::Forward(name.clone()),
            }),
            Some(Token::Global(name)) => self
                .globals
                .get(name)
                .map(|&g| Operand::Ready(Value::Global(g)))
                .ok_or_else(|| ParseError::UndefinedGlobal {
                    line,
                    name: name.clone(),
                }),
            _ => {
                cur.pos -= 1;
                Err(cur.unexpected("an operand"))
            }
        }
    }

    fn operands(&self, cur: &mut Cursor<'_>, count: usize) -> Result<Vec<Operand>, ParseError> {
        let mut list = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                cur.expect_punct(',')?;
            }
            list.push(self.operand(cur)?);
        }
        Ok(list)
    }

    fn block(&self, cur: &mut Cursor<'_>) -> Result<Handle<Block>, ParseError> {
        let line = cur.line;
        let name = cur.local()?;
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::UndefinedBlock {
                line,
                name: name.to_string(),
            })
    }

    fn define(&mut self, name: &str, value: Value, line: usize) -> Result<(), ParseError> {
        if self.values.insert(name.to_string(), value).is_some() {
            return Err(ParseError::Redefinition {
                line,
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// A parsed but not yet placed instruction.
struct Pending {
    opcode: Opcode,
    ty: Type,
    operands: Vec<Operand>,
}

impl Pending {
    fn new(opcode: Opcode, ty: Type, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            ty,
            operands,
        }
    }
}

fn parse_instruction(scope: &KernelScope<'_>, cur: &mut Cursor<'_>) -> Result<Pending, ParseError> {
    let mnemonic = cur.word()?;
    let pending = match mnemonic {
        "icmp" => {
            let line = cur.line;
            let word = cur.word()?;
            let pred = CmpPredicate::from_keyword(word).ok_or_else(|| ParseError::Unexpected {
                line,
                found: format!("'{word}'"),
                expected: "a comparison predicate".to_string(),
            })?;
            cur.ty()?;
            Pending::new(Opcode::ICmp(pred), Type::BOOL, scope.operands(cur, 2)?)
        }
        "select" => {
            let ty = cur.ty()?;
            Pending::new(Opcode::Select, ty, scope.operands(cur, 3)?)
        }
        "phi" => {
            let ty = cur.ty()?;
            let mut incoming = Vec::new();
            let mut values = Vec::new();
            loop {
                cur.expect_punct('[')?;
                values.push(scope.operand(cur)?);
                cur.expect_punct(',')?;
                incoming.push(scope.block(cur)?);
                cur.expect_punct(']')?;
                if !cur.eat_punct(',') {
                    break;
                }
            }
            Pending::new(Opcode::Phi { incoming }, ty, values)
        }
        "load" => {
            let ty = cur.ty()?;
            cur.expect_punct(',')?;
            let pointer = scope.operand(cur)?;
            cur.expect_punct(',')?;
            cur.expect_word("align")?;
            let align = cur.unsigned()?;
            Pending::new(Opcode::Load { align }, ty, vec![pointer])
        }
        "store" => {
            let volatile = cur.eat_word("volatile");
            cur.ty()?;
            let operands = scope.operands(cur, 2)?;
            cur.expect_punct(',')?;
            cur.expect_word("align")?;
            let align = cur.unsigned()?;
            Pending::new(Opcode::Store { align, volatile }, Type::Void, operands)
        }
        "gep" => {
            let ty = cur.ty()?;
            Pending::new(Opcode::GetElementPtr, ty, scope.operands(cur, 2)?)
        }
        "call" => {
            let ty = cur.ty()?;
            let callee = cur.global()?.to_string();
            cur.expect_punct('(')?;
            let mut args = Vec::new();
            if !cur.eat_punct(')') {
                loop {
                    args.push(scope.operand(cur)?);
                    if cur.eat_punct(')') {
                        break;
                    }
                    cur.expect_punct(',')?;
                }
            }
            Pending::new(Opcode::Call { callee }, ty, args)
        }
        "br" => {
            let target = scope.block(cur)?;
            Pending::new(Opcode::Br { target }, Type::Void, Vec::new())
        }
        "condbr" => {
            let cond = scope.operand(cur)?;
            cur.expect_punct(',')?;
            let accept = scope.block(cur)?;
            cur.expect_punct(',')?;
            let reject = scope.block(cur)?;
            Pending::new(Opcode::CondBr { accept, reject }, Type::Void, vec![cond])
        }
        "ret" => {
            let operands = if cur.at_end() {
                Vec::new()
            } else {
                vec![scope.operand(cur)?]
            };
            Pending::new(Opcode::Ret, Type::Void, operands)
        }
        other => {
            if let Some(op) = BinaryOp::from_keyword(other) {
                let ty = cur.ty()?;
                Pending::new(Opcode::Binary(op), ty, scope.operands(cur, 2)?)
            } else if let Some(op) = CastOp::from_keyword(other) {
                let ty = cur.ty()?;
                Pending::new(Opcode::Cast(op), ty, scope.operands(cur, 1)?)
            } else {
                let ty = cur.ty()?;
                let mut operands = Vec::new();
                while !cur.at_end() {
                    if !operands.is_empty() {
                        cur.expect_punct(',')?;
                    }
                    operands.push(scope.operand(cur)?);
                }
                Pending::new(Opcode::Other(other.to_string()), ty, operands)
            }
        }
    };
    cur.end()?;
    Ok(pending)
}

fn parse_global(line: &Line) -> Result<(String, GlobalVariable), ParseError> {
    let mut cur = Cursor::new(line);
    let name = cur.global()?.to_string();
    cur.expect_punct('=')?;
    let constant = cur.eat_word("constant");
    let space = cur.space()?;
    cur.expect_punct('[')?;
    let count = cur.unsigned()?;
    cur.expect_word("x")?;
    let elem = cur.ty()?;
    cur.expect_punct(']')?;
    cur.end()?;
    let mut gv = GlobalVariable::new(name.clone(), space, elem, count);
    gv.constant = constant;
    Ok((name, gv))
}

/// Parses a kernel starting at `lines[0]` (the header). Returns the kernel
/// and the number of lines consumed.
fn parse_kernel(
    lines: &[Line],
    globals: &HashMap<String, Handle<GlobalVariable>>,
) -> Result<(Kernel, usize), ParseError> {
    let header = &lines[0];
    let mut cur = Cursor::new(header);
    cur.expect_word("kernel")?;
    let mut kernel = Kernel::new(cur.global()?);
    let mut scope = KernelScope {
        globals,
        blocks: HashMap::new(),
        values: HashMap::new(),
        fixups: Vec::new(),
    };

    cur.expect_punct('(')?;
    if !cur.eat_punct(')') {
        loop {
            let ty = cur.ty()?;
            let noalias = cur.eat_word("noalias");
            let name = cur.local()?;
            let value = kernel.add_param(name, ty);
            if let Some(param) = kernel.params.last_mut() {
                param.noalias = noalias;
            }
            scope.define(name, value, header.number)?;
            if cur.eat_punct(')') {
                break;
            }
            cur.expect_punct(',')?;
        }
    }
    cur.expect_punct('{')?;
    cur.end()?;

    let close = lines
        .iter()
        .position(|l| l.tokens == [Token::Punct('}')])
        .ok_or_else(|| ParseError::Unterminated(kernel.name.clone()))?;
    let body = &lines[1..close];

    // Labels first, so that every block reference resolves on sight.
    for line in body {
        if let [Token::Word(label), Token::Punct(':')] = line.tokens.as_slice() {
            if scope.blocks.contains_key(label) {
                return Err(ParseError::Redefinition {
                    line: line.number,
                    name: label.clone(),
                });
            }
            let block = kernel.add_block(label.as_str());
            scope.blocks.insert(label.clone(), block);
        }
    }

    let mut current = None;
    for line in body {
        if let [Token::Word(label), Token::Punct(':')] = line.tokens.as_slice() {
            current = scope.blocks.get(label).copied();
            continue;
        }
        let block = current.ok_or_else(|| ParseError::Unexpected {
            line: line.number,
            found: "an instruction".to_string(),
            expected: "a block label".to_string(),
        })?;

        let mut cur = Cursor::new(line);
        let mut name = None;
        if let Some(Token::Local(n)) = cur.peek() {
            if cur.tokens.get(1) == Some(&Token::Punct('=')) {
                name = Some(n.as_str());
                cur.pos = 2;
            }
        }
        let pending = parse_instruction(&scope, &mut cur)?;

        let mut forward = Vec::new();
        let operands = pending
            .operands
            .into_iter()
            .enumerate()
            .map(|(index, operand)| match operand {
                Operand::Ready(value) => value,
                Operand::Forward(name) => {
                    forward.push((index, name));
                    Value::Undef
                }
            })
            .collect();
        let mut inst = Instruction::new(pending.opcode, pending.ty, operands);
        if let Some(name) = name {
            inst = inst.with_name(name);
        }
        let handle = kernel.append(block, inst);
        if let Some(name) = name {
            scope.define(name, Value::Inst(handle), line.number)?;
        }
        scope
            .fixups
            .extend(forward.into_iter().map(|(index, name)| Fixup {
                inst: handle,
                index,
                name,
                line: line.number,
            }));
    }

    for fixup in std::mem::take(&mut scope.fixups) {
        let value = scope
            .values
            .get(&fixup.name)
            .copied()
            .ok_or(ParseError::UndefinedValue {
                line: fixup.line,
                name: fixup.name,
            })?;
        kernel.set_operand(fixup.inst, fixup.index, value)?;
    }

    Ok((kernel, close + 1))
}

pub(crate) fn parse_module(source: &str) -> Result<Module, ParseError> {
    let mut lines = Vec::new();
    for (i, text) in source.lines().enumerate() {
        let tokens = tokenize(text, i + 1)?;
        if !tokens.is_empty() {
            lines.push(Line {
                number: i + 1,
                tokens,
            });
        }
    }

    let mut module = Module::default();
    let mut globals = HashMap::new();
    let mut kernel_lines = Vec::new();
    for line in lines {
        if matches!(line.tokens.first(), Some(Token::Global(_))) {
            let (name, gv) = parse_global(&line)?;
            let handle = module.globals.append(gv);
            if globals.insert(name.clone(), handle).is_some() {
                return Err(ParseError::Redefinition {
                    line: line.number,
                    name,
                });
            }
        } else {
            kernel_lines.push(line);
        }
    }

    let mut pos = 0;
    while pos < kernel_lines.len() {
        let (kernel, consumed) = parse_kernel(&kernel_lines[pos..], &globals)?;
        if module.kernel(&kernel.name).is_some() {
            return Err(ParseError::Redefinition {
                line: kernel_lines[pos].number,
                name: kernel.name,
            });
        }
        module.kernels.push(kernel);
        pos += consumed;
    }
    Ok(module)
}

//! Intermediate language on which approximability analysis is performed.
//!
//! A small SSA-style IL modelled on typical compiler IRs: every instruction produces at most one
//! value, refers to its inputs through an ordered operand list (its def edges), and, once its
//! function has been built, knows the instructions that consume its result (its use edges).
//!
//! The analyses never mutate a [`Function`]; all per-run state lives in the analysis results.

use crate::log::*;
use strum::{EnumIter, EnumString, IntoStaticStr};

/// A stable identifier of an [`Instruction`] inside its [`Function`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(pub(crate) usize);

impl InsnId {
    /// Position of the instruction in its function's instruction table
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Debug for InsnId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// A stable identifier of a [`BasicBlock`] inside its [`Function`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Position of the block in its function's block list
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// The semantic type of a value. Only ever compared for equality; never interpreted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Type {
    Void,
    /// An integer of the given bit-width
    Int(u32),
    Float,
    Double,
    Label,
    /// A named aggregate, written `%Name`
    Named(String),
    /// A fixed-length array, written `[N x T]`
    Array(u64, Box<Type>),
    /// A typed pointer, written `T*`
    Pointer(Box<Type>),
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Label => write!(f, "label"),
            Type::Named(name) => write!(f, "%{}", name),
            Type::Array(n, elem) => write!(f, "[{} x {}]", n, elem),
            Type::Pointer(pointee) => write!(f, "{}*", pointee),
        }
    }
}

/// The kind of operation an [`Instruction`] performs. Its lowercase label (see [`Op::label`]) is
/// the key used in approximability reports.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, EnumString, IntoStaticStr, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Op {
    /// Stack-slot allocation; `input0` is the element count
    Alloca,
    /// Load from the address `input0`
    Load,
    /// Store `input0` to the address `input1`
    Store,
    /// Address computation from a base pointer `input0` and indices
    GetElementPtr,
    /// Memory ordering fence
    Fence,
    /// Branch; either unconditional (`input0` is the target) or conditional (`input0` is the
    /// condition, `input1`/`input2` the targets)
    Br,
    /// Multi-way branch on `input0`
    Switch,
    /// Return, optionally with the value `input0`
    Ret,
    Unreachable,
    /// Call; the arguments come first, the callee is the last operand
    Call,
    Add,
    FAdd,
    Sub,
    FSub,
    Mul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    URem,
    SRem,
    FRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    PtrToInt,
    IntToPtr,
    BitCast,
    /// Integer comparison; the predicate is held in [`Instruction::predicate`]
    ICmp,
    /// Floating comparison; the predicate is held in [`Instruction::predicate`]
    FCmp,
    /// SSA phi node; incoming blocks are held in [`Instruction::incoming_blocks`]
    Phi,
    /// `input0 ? input1 : input2`
    Select,
}

impl Op {
    /// The stable lowercase label of this opcode
    pub fn label(self) -> &'static str {
        self.into()
    }

    /// Whether executing this operation may read or write memory
    pub fn may_read_or_write_memory(self) -> bool {
        matches!(self, Op::Load | Op::Store | Op::Call | Op::Fence)
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Op::Br | Op::Switch)
    }

    pub fn is_terminator(self) -> bool {
        matches!(self, Op::Br | Op::Switch | Op::Ret | Op::Unreachable)
    }

    fn is_binary(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::FAdd
                | Op::Sub
                | Op::FSub
                | Op::Mul
                | Op::FMul
                | Op::UDiv
                | Op::SDiv
                | Op::FDiv
                | Op::URem
                | Op::SRem
                | Op::FRem
                | Op::Shl
                | Op::LShr
                | Op::AShr
                | Op::And
                | Op::Or
                | Op::Xor
        )
    }

    pub(crate) fn is_cast(self) -> bool {
        matches!(
            self,
            Op::Trunc
                | Op::ZExt
                | Op::SExt
                | Op::FPTrunc
                | Op::FPExt
                | Op::FPToUI
                | Op::FPToSI
                | Op::UIToFP
                | Op::SIToFP
                | Op::PtrToInt
                | Op::IntToPtr
                | Op::BitCast
        )
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Predicate of an [`Op::ICmp`] or [`Op::FCmp`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
    Oeq,
    One,
    Ogt,
    Oge,
    Olt,
    Ole,
    Ord,
    Uno,
    Ueq,
    Une,
}

/// The payload of a constant [`Value`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Literal {
    Int(i128),
    /// Bit pattern of an `f64`, so that constants stay hashable and totally ordered
    Float(u64),
    Null,
    Undef,
}

impl std::fmt::Debug for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Literal::Null => write!(f, "null"),
            Literal::Undef => write!(f, "undef"),
        }
    }
}

/// Anything that may appear as an operand.
///
/// Only [`Value::Instruction`]s carry a mark and a user list. Constants are uniqued by their
/// contents: two constants of the same type and literal are the same value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Instruction(InsnId),
    /// The function parameter at the given position
    Argument(usize),
    /// A global variable or function, by name
    Global(String),
    /// A basic block, as used by branch targets
    Block(BlockId),
    Constant { ty: Type, literal: Literal },
}

impl Value {
    pub fn as_instruction(&self) -> Option<InsnId> {
        match self {
            Value::Instruction(id) => Some(*id),
            _ => None,
        }
    }

    pub fn int(ty: Type, v: i128) -> Self {
        Value::Constant {
            ty,
            literal: Literal::Int(v),
        }
    }
}

impl From<InsnId> for Value {
    fn from(id: InsnId) -> Self {
        Value::Instruction(id)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Instruction(id) => write!(f, "{:?}", id),
            Value::Argument(n) => write!(f, "arg{}", n),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Block(b) => write!(f, "{:?}", b),
            Value::Constant { ty, literal } => write!(f, "{} {:?}", ty, literal),
        }
    }
}

/// An IL instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    /// The operation performed. Dictates the expected shape of `operands`.
    pub op: Op,
    /// Type of the produced value; [`Type::Void`] if no value is produced.
    pub ty: Type,
    /// Comparison predicate. Only used by [`Op::ICmp`] and [`Op::FCmp`].
    pub predicate: Option<CmpPredicate>,
    /// Source-level name of the result, if any. Purely cosmetic.
    pub name: Option<String>,
    /// The ordered inputs of the instruction.
    pub operands: Vec<Value>,
    /// For [`Op::Phi`], the block each operand flows in from (same length as `operands`).
    pub incoming_blocks: Vec<BlockId>,
}

impl Instruction {
    pub fn new(op: Op, ty: Type, operands: Vec<Value>) -> Self {
        Self {
            op,
            ty,
            predicate: None,
            name: None,
            operands,
            incoming_blocks: vec![],
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_predicate(mut self, predicate: CmpPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// The address operand of a memory access: `input0` of a load, `input1` of a store. `None`
    /// for other opcodes, or when the operand is missing.
    pub fn address_operand(&self) -> Option<&Value> {
        match self.op {
            Op::Load => self.operands.first(),
            Op::Store => self.operands.get(1),
            _ => None,
        }
    }

    /// Confirms that the operand list has a sensible shape for the opcode.
    pub fn try_confirm_valid(&self) -> Result<(), String> {
        let n = self.operands.len();
        let ok = match self.op {
            Op::Alloca | Op::Load => n == 1,
            Op::Store => n == 2,
            Op::Fence | Op::Unreachable => n == 0,
            Op::Br => n == 1 || n == 3,
            Op::Switch => n >= 2,
            Op::Ret => n <= 1,
            Op::Call | Op::GetElementPtr => n >= 1,
            Op::ICmp | Op::FCmp => n == 2,
            Op::Phi => n >= 1,
            Op::Select => n == 3,
            op if op.is_binary() => n == 2,
            op if op.is_cast() => n == 1,
            _ => unreachable!("every opcode is covered above"),
        };
        if !ok {
            return Err(format!(
                "Got {} operands for operation {}. Operands: {:?}",
                n, self.op, self.operands
            ));
        }
        match self.op {
            Op::ICmp | Op::FCmp if self.predicate.is_none() => {
                return Err(format!("Missing predicate for {}", self.op));
            }
            Op::ICmp | Op::FCmp => {}
            _ if self.predicate.is_some() => {
                return Err(format!(
                    "Unexpected predicate {:?} for {}",
                    self.predicate, self.op
                ));
            }
            _ => {}
        }
        if self.op == Op::Phi && self.incoming_blocks.len() != n {
            return Err(format!(
                "Phi has {} incoming values but {} incoming blocks",
                n,
                self.incoming_blocks.len()
            ));
        }
        if (self.op.is_terminator() || matches!(self.op, Op::Store | Op::Fence))
            && self.ty != Type::Void
        {
            return Err(format!("Operation {} cannot produce a {}", self.op, self.ty));
        }
        Ok(())
    }
}

/// A function parameter
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A labelled, ordered sequence of instructions.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<InsnId>,
}

/// A function: the unit of analysis. Built through a [`FunctionBuilder`].
#[derive(Debug)]
pub struct Function {
    name: String,
    return_type: Type,
    params: Vec<Param>,
    blocks: Vec<BasicBlock>,
    instructions: Vec<Instruction>,
    /// Use edges; `users[i]` holds each instruction using instruction `i`, in program order,
    /// without duplicates.
    users: Vec<Vec<InsnId>>,
    /// Program-order listing of all instruction ids
    program_order: Vec<InsnId>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Number of instructions in the function
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Whether this is a declaration only (no body)
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Get the instruction `id`. A dangling id is an internal invariant violation, and panics.
    pub fn instruction(&self, id: InsnId) -> &Instruction {
        self.instructions.get(id.0).unwrap_or_else(|| {
            panic!(
                "Dangling instruction reference {:?} in function {} ({} instructions)",
                id,
                self.name,
                self.instructions.len()
            )
        })
    }

    /// Get the instruction behind `v`, if `v` is an instruction
    pub fn as_instruction(&self, v: &Value) -> Option<(InsnId, &Instruction)> {
        v.as_instruction().map(|id| (id, self.instruction(id)))
    }

    /// The instructions consuming the result of `id`
    pub fn users(&self, id: InsnId) -> &[InsnId] {
        self.users.get(id.0).map(|u| &u[..]).unwrap_or_else(|| {
            panic!(
                "Dangling instruction reference {:?} while looking up users in function {}",
                id, self.name
            )
        })
    }

    /// All instruction ids, in program order
    pub fn instruction_ids(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.program_order.iter().cloned()
    }

    /// All instructions, in program order
    pub fn instructions(&self) -> impl Iterator<Item = (InsnId, &Instruction)> + '_ {
        self.instruction_ids().map(move |id| (id, self.instruction(id)))
    }

    /// A short printable name for `v`, preferring source names
    pub fn value_name(&self, v: &Value) -> String {
        match v {
            Value::Instruction(id) => match &self.instruction(*id).name {
                Some(n) => format!("%{}", n),
                None => format!("%{}", id.0),
            },
            Value::Argument(n) => match self.params.get(*n) {
                Some(p) => format!("%{}", p.name),
                None => format!("%arg{}", n),
            },
            Value::Global(name) => format!("@{}", name),
            Value::Block(b) => match self.blocks.get(b.0) {
                Some(bb) => format!("%{}", bb.label),
                None => format!("{:?}", b),
            },
            Value::Constant { literal, .. } => format!("{:?}", literal),
        }
    }

    /// A printable view of the instruction `id`
    pub fn display_instruction(&self, id: InsnId) -> DisplayInstruction<'_> {
        DisplayInstruction { func: self, id }
    }

    /// Confirms that every reference in the function points at an existing entity, and that every
    /// instruction is well-formed.
    pub fn try_confirm_valid(&self) -> Result<(), String> {
        for bb in &self.blocks {
            if bb.instructions.is_empty() {
                return Err(format!(
                    "Block {} in function {} has no instructions",
                    bb.label, self.name
                ));
            }
        }
        for (id, ins) in self.instructions() {
            ins.try_confirm_valid()
                .map_err(|e| format!("{} (at {} in {})", e, self.display_instruction(id), self.name))?;
            for v in &ins.operands {
                let in_bounds = match v {
                    Value::Instruction(i) => i.0 < self.instructions.len(),
                    Value::Argument(a) => *a < self.params.len(),
                    Value::Block(b) => b.0 < self.blocks.len(),
                    Value::Global(_) | Value::Constant { .. } => true,
                };
                if !in_bounds {
                    return Err(format!(
                        "Operand {:?} of instruction {:?} in {} refers to nothing",
                        v, id, self.name
                    ));
                }
            }
            if let Some(b) = ins.incoming_blocks.iter().find(|b| b.0 >= self.blocks.len()) {
                return Err(format!(
                    "Incoming block {:?} of instruction {:?} in {} refers to nothing",
                    b, id, self.name
                ));
            }
        }
        Ok(())
    }
}

/// See [`Function::display_instruction`]
pub struct DisplayInstruction<'a> {
    func: &'a Function,
    id: InsnId,
}

impl std::fmt::Display for DisplayInstruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ins = self.func.instruction(self.id);
        if ins.ty != Type::Void {
            write!(f, "{} = ", self.func.value_name(&Value::Instruction(self.id)))?;
        }
        write!(f, "{}", ins.op)?;
        if let Some(p) = ins.predicate {
            write!(f, " {}", <&'static str>::from(p))?;
        }
        if ins.ty != Type::Void {
            write!(f, " {}", ins.ty)?;
        }
        for (i, v) in ins.operands.iter().enumerate() {
            write!(f, "{}", if i == 0 { " " } else { ", " })?;
            match ins.incoming_blocks.get(i) {
                Some(b) if ins.op == Op::Phi => write!(
                    f,
                    "[{}, {}]",
                    self.func.value_name(v),
                    self.func.value_name(&Value::Block(*b))
                )?,
                _ => write!(f, "{}", self.func.value_name(v))?,
            }
        }
        Ok(())
    }
}

/// Incrementally builds a [`Function`], block by block.
pub struct FunctionBuilder {
    name: String,
    return_type: Type,
    params: Vec<Param>,
    blocks: Vec<BasicBlock>,
    instructions: Vec<Instruction>,
}

impl FunctionBuilder {
    /// Begin a new function named `name`
    pub fn new(name: impl Into<String>, return_type: Type, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
            blocks: vec![],
            instructions: vec![],
        }
    }

    /// Start a new basic block. Subsequent instructions are appended to it.
    pub fn begin_block(&mut self, label: impl Into<String>) -> BlockId {
        let b = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            label: label.into(),
            instructions: vec![],
        });
        b
    }

    /// Append `ins` to the current block. Must be preceded by [`Self::begin_block`].
    pub fn add_instruction(&mut self, ins: Instruction) -> InsnId {
        let id = InsnId(self.instructions.len());
        let bb = self
            .blocks
            .last_mut()
            .expect("Should have called `begin_block` before adding instructions");
        bb.instructions.push(id);
        self.instructions.push(ins);
        id
    }

    /// Finish the function, computing its use edges.
    ///
    /// Panics if an operand refers to an instruction that was never added, since use edges
    /// cannot be built for it.
    pub fn build(self) -> Function {
        let program_order: Vec<InsnId> = self
            .blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter().cloned())
            .collect();
        let mut users: Vec<Vec<InsnId>> = vec![vec![]; self.instructions.len()];
        for &id in &program_order {
            for v in &self.instructions[id.0].operands {
                if let Value::Instruction(def) = v {
                    let u = users.get_mut(def.0).unwrap_or_else(|| {
                        panic!(
                            "Instruction {:?} in {} uses undefined instruction {:?}",
                            id, self.name, def
                        )
                    });
                    if !u.contains(&id) {
                        u.push(id);
                    }
                }
            }
        }
        trace!(
            "Built function";
            "name" => &self.name,
            "blocks" => self.blocks.len(),
            "instructions" => self.instructions.len(),
        );
        Function {
            name: self.name,
            return_type: self.return_type,
            params: self.params,
            blocks: self.blocks,
            instructions: self.instructions,
            users,
            program_order,
        }
    }
}

/// The whole program: a sequence of independently analysable functions.
#[derive(Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

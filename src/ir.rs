//! The intermediate representation the checker executes.
//!
//! Programs reach the core already lowered to this small SSA dialect (the
//! source front-end and the transformation passes are separate
//! components). A [`Module`] holds globals and functions; functions hold
//! basic blocks of [`Inst`]s, the last of which is a terminator.
//! [`ModuleBuilder`] provides a convenient way to construct modules by
//! hand, which is how the test suite writes its litmus programs.

use crate::label::{Annot, MemOrdering, RmwOp};
use crate::value::{ASize, SVal};
use rustc_hash::FxHashMap;

/// An SSA value identifier, unique within a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ValueId(pub u32);

/// A function identifier: the function's index in its module.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FuncId(pub u32);

/// A basic-block identifier, unique within a function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

/// The stable identifier of one instruction, used by [`ModuleInfo`] to
/// attach side information.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct InstPos {
    /// The enclosing function.
    pub func: FuncId,
    /// The enclosing block.
    pub block: BlockId,
    /// The instruction's index within the block.
    pub inst: u32,
}

/// An instruction operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    /// An SSA value.
    Value(ValueId),
    /// An immediate constant.
    Const(SVal),
    /// The address of the global with the given index.
    Global(u32),
    /// A function pointer.
    Fn(FuncId),
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Operand {
        Operand::Value(v)
    }
}

impl From<u64> for Operand {
    fn from(v: u64) -> Operand {
        Operand::Const(SVal::UInt(v))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Operand {
        Operand::Const(SVal::Int(v))
    }
}

impl From<SVal> for Operand {
    fn from(v: SVal) -> Operand {
        Operand::Const(v)
    }
}

/// Pure binary operators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// Integer comparison predicates.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

/// Value-cast kinds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum CastKind {
    ZExt,
    SExt,
    Trunc,
    PtrToInt,
    IntToPtr,
}

/// The callee of a call instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Callee {
    /// A function of the module, by id.
    Func(FuncId),
    /// A function by name: resolved to a module function if one exists,
    /// otherwise dispatched to the internal-operation table, otherwise
    /// treated as an external pure function.
    Named(String),
}

/// One instruction.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub enum Inst {
    Bin {
        dst: ValueId,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Cmp {
        dst: ValueId,
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
    },
    Cast {
        dst: ValueId,
        kind: CastKind,
        src: Operand,
        size: ASize,
    },
    Select {
        dst: ValueId,
        cond: Operand,
        tval: Operand,
        fval: Operand,
    },
    Phi {
        dst: ValueId,
        incoming: Vec<(BlockId, Operand)>,
    },
    /// Address arithmetic: `dst = base + offset * scale`.
    Gep {
        dst: ValueId,
        base: Operand,
        offset: Operand,
        scale: u64,
    },
    Alloca {
        dst: ValueId,
        size: u64,
        align: u64,
    },
    Load {
        dst: ValueId,
        addr: Operand,
        ord: MemOrdering,
        size: ASize,
    },
    Store {
        addr: Operand,
        val: Operand,
        ord: MemOrdering,
        size: ASize,
    },
    AtomicRmw {
        dst: ValueId,
        op: RmwOp,
        addr: Operand,
        val: Operand,
        ord: MemOrdering,
        size: ASize,
    },
    /// Compare-and-exchange; `dst` receives the old value.
    CmpXchg {
        dst: ValueId,
        addr: Operand,
        expected: Operand,
        swap: Operand,
        ord: MemOrdering,
        size: ASize,
    },
    Fence {
        ord: MemOrdering,
    },
    Call {
        dst: Option<ValueId>,
        callee: Callee,
        args: Vec<Operand>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        then_b: BlockId,
        else_b: BlockId,
    },
    Switch {
        cond: Operand,
        cases: Vec<(u64, BlockId)>,
        default: BlockId,
    },
    Ret {
        val: Option<Operand>,
    },
    Unreachable,
}

impl Inst {
    /// Whether the instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br { .. }
                | Inst::CondBr { .. }
                | Inst::Switch { .. }
                | Inst::Ret { .. }
                | Inst::Unreachable
        )
    }
}

/// A basic block: a sequence of instructions ending in a terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    /// The block's instructions.
    pub insts: Vec<Inst>,
}

/// A function of the module.
#[derive(Clone, Debug)]
pub struct Function {
    /// The function's name.
    pub name: String,
    /// SSA values bound to the arguments on entry.
    pub params: Vec<ValueId>,
    /// The function's blocks; block 0 is the entry.
    pub blocks: Vec<Block>,
    /// Number of SSA values the function uses.
    pub num_values: u32,
}

/// A global variable. Its address is assigned from the static pool when
/// the interpreter starts up.
#[derive(Clone, Debug)]
pub struct GlobalVar {
    /// Source-level name, used in diagnostics.
    pub name: String,
    /// Size of the variable in bytes.
    pub size: u64,
    /// Initial value.
    pub init: SVal,
}

/// Side information about a module: annotation predicates for loads and
/// source locations for diagnostics. Produced by the (external)
/// transformation pipeline; instruction positions are the stable ids.
#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    /// Annotation predicates attached to loads whose observed value is
    /// constrained by a following `assume`.
    pub annots: FxHashMap<InstPos, Annot>,
    /// Optional source locations per instruction.
    pub locations: FxHashMap<InstPos, String>,
}

/// A complete program in the internal representation.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Global variables.
    pub globals: Vec<GlobalVar>,
    /// Functions; the entry point is the one named `main`.
    pub functions: Vec<Function>,
    /// Side information.
    pub info: ModuleInfo,
}

impl Module {
    /// Looks a function up by name.
    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    /// The function with the given id.
    pub fn func(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// The instruction at `pos`, if it exists.
    pub fn inst(&self, pos: InstPos) -> Option<&Inst> {
        self.functions
            .get(pos.func.0 as usize)
            .and_then(|f| f.blocks.get(pos.block.0 as usize))
            .and_then(|b| b.insts.get(pos.inst as usize))
    }
}

/// Builds a [`Module`] programmatically.
///
/// ```
/// use weft::ir::ModuleBuilder;
/// use weft::MemOrdering;
///
/// let mut m = ModuleBuilder::new();
/// let x = m.global("x", 4, 0);
/// {
///     let mut f = m.function("main");
///     f.store_ord(x, 1u64, MemOrdering::Relaxed);
///     let v = f.load_ord(x, MemOrdering::Relaxed);
///     f.ret(Some(v.into()));
/// }
/// let module = m.build();
/// assert_eq!(module.functions.len(), 1);
/// ```
#[derive(Default)]
pub struct ModuleBuilder {
    globals: Vec<GlobalVar>,
    functions: Vec<Function>,
    info: ModuleInfo,
}

impl ModuleBuilder {
    /// Creates an empty builder.
    pub fn new() -> ModuleBuilder {
        ModuleBuilder::default()
    }

    /// Declares a global variable and returns an operand addressing it.
    pub fn global(&mut self, name: &str, size: u64, init: u64) -> Operand {
        self.globals.push(GlobalVar {
            name: name.to_string(),
            size,
            init: SVal::UInt(init),
        });
        Operand::Global(self.globals.len() as u32 - 1)
    }

    /// Starts building a function; the function is committed to the
    /// module when the returned builder is dropped.
    pub fn function<'a>(&'a mut self, name: &str) -> FunctionBuilder<'a> {
        self.function_with_params(name, 0).0
    }

    /// Starts building a function with `nparams` parameters; also returns
    /// the SSA values its arguments are bound to.
    pub fn function_with_params<'a>(
        &'a mut self,
        name: &str,
        nparams: u32,
    ) -> (FunctionBuilder<'a>, Vec<ValueId>) {
        let params: Vec<ValueId> = (0..nparams).map(ValueId).collect();
        let id = FuncId(self.functions.len() as u32);
        let fb = FunctionBuilder {
            module: self,
            id,
            func: Function {
                name: name.to_string(),
                params: params.clone(),
                blocks: vec![Block::default()],
                num_values: nparams,
            },
            cur_block: BlockId(0),
        };
        (fb, params)
    }

    /// The id the next-built function will receive.
    pub fn next_func_id(&self) -> FuncId {
        FuncId(self.functions.len() as u32)
    }

    /// Finishes the module.
    pub fn build(self) -> Module {
        Module {
            globals: self.globals,
            functions: self.functions,
            info: self.info,
        }
    }
}

/// Builds one function; created via [`ModuleBuilder::function`].
pub struct FunctionBuilder<'a> {
    module: &'a mut ModuleBuilder,
    id: FuncId,
    func: Function,
    cur_block: BlockId,
}

impl Drop for FunctionBuilder<'_> {
    fn drop(&mut self) {
        // An unterminated final block returns 0.
        let cur = &mut self.func.blocks[self.cur_block.0 as usize];
        if cur.insts.last().map_or(true, |i| !i.is_terminator()) {
            cur.insts.push(Inst::Ret { val: None });
        }
        self.module.functions.push(std::mem::replace(
            &mut self.func,
            Function {
                name: String::new(),
                params: Vec::new(),
                blocks: Vec::new(),
                num_values: 0,
            },
        ));
    }
}

impl FunctionBuilder<'_> {
    /// This function's id.
    pub fn id(&self) -> FuncId {
        self.id
    }

    fn fresh(&mut self) -> ValueId {
        let v = ValueId(self.func.num_values);
        self.func.num_values += 1;
        v
    }

    fn push(&mut self, inst: Inst) -> InstPos {
        let b = &mut self.func.blocks[self.cur_block.0 as usize];
        b.insts.push(inst);
        InstPos {
            func: self.id,
            block: self.cur_block,
            inst: b.insts.len() as u32 - 1,
        }
    }

    /// Creates a new (empty) block.
    pub fn block(&mut self) -> BlockId {
        self.func.blocks.push(Block::default());
        BlockId(self.func.blocks.len() as u32 - 1)
    }

    /// Makes `b` the block subsequent instructions are appended to.
    pub fn switch_to(&mut self, b: BlockId) {
        self.cur_block = b;
    }

    /// A non-atomic 4-byte load.
    pub fn load(&mut self, addr: impl Into<Operand>) -> ValueId {
        self.load_sized(addr, MemOrdering::NotAtomic, ASize::new(4))
    }

    /// A 4-byte load with the given ordering.
    pub fn load_ord(&mut self, addr: impl Into<Operand>, ord: MemOrdering) -> ValueId {
        self.load_sized(addr, ord, ASize::new(4))
    }

    /// A load with explicit ordering and width.
    pub fn load_sized(&mut self, addr: impl Into<Operand>, ord: MemOrdering, size: ASize) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Load {
            dst,
            addr: addr.into(),
            ord,
            size,
        });
        dst
    }

    /// Attaches an annotation predicate to the most recent instruction
    /// (which should be a load).
    pub fn annotate(&mut self, annot: Annot) {
        let b = &self.func.blocks[self.cur_block.0 as usize];
        assert!(!b.insts.is_empty());
        let pos = InstPos {
            func: self.id,
            block: self.cur_block,
            inst: b.insts.len() as u32 - 1,
        };
        self.module.info.annots.insert(pos, annot);
    }

    /// A non-atomic 4-byte store.
    pub fn store(&mut self, addr: impl Into<Operand>, val: impl Into<Operand>) {
        self.store_sized(addr, val, MemOrdering::NotAtomic, ASize::new(4));
    }

    /// A 4-byte store with the given ordering.
    pub fn store_ord(
        &mut self,
        addr: impl Into<Operand>,
        val: impl Into<Operand>,
        ord: MemOrdering,
    ) {
        self.store_sized(addr, val, ord, ASize::new(4));
    }

    /// A store with explicit ordering and width.
    pub fn store_sized(
        &mut self,
        addr: impl Into<Operand>,
        val: impl Into<Operand>,
        ord: MemOrdering,
        size: ASize,
    ) {
        self.push(Inst::Store {
            addr: addr.into(),
            val: val.into(),
            ord,
            size,
        });
    }

    /// An atomic fetch-and-op; returns the old value.
    pub fn rmw(
        &mut self,
        op: RmwOp,
        addr: impl Into<Operand>,
        val: impl Into<Operand>,
        ord: MemOrdering,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::AtomicRmw {
            dst,
            op,
            addr: addr.into(),
            val: val.into(),
            ord,
            size: ASize::new(4),
        });
        dst
    }

    /// A compare-and-exchange; returns the old value.
    pub fn cas(
        &mut self,
        addr: impl Into<Operand>,
        expected: impl Into<Operand>,
        swap: impl Into<Operand>,
        ord: MemOrdering,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::CmpXchg {
            dst,
            addr: addr.into(),
            expected: expected.into(),
            swap: swap.into(),
            ord,
            size: ASize::new(4),
        });
        dst
    }

    /// A memory fence.
    pub fn fence(&mut self, ord: MemOrdering) {
        self.push(Inst::Fence { ord });
    }

    /// A pure binary operation.
    pub fn bin(&mut self, op: BinOp, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Bin {
            dst,
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    /// An integer comparison producing 0 or 1.
    pub fn cmp(&mut self, op: CmpOp, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Cmp {
            dst,
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    /// Address arithmetic: `base + offset * scale`.
    pub fn gep(
        &mut self,
        base: impl Into<Operand>,
        offset: impl Into<Operand>,
        scale: u64,
    ) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Gep {
            dst,
            base: base.into(),
            offset: offset.into(),
            scale,
        });
        dst
    }

    /// A stack allocation.
    pub fn alloca(&mut self, size: u64) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Alloca {
            dst,
            size,
            align: 8,
        });
        dst
    }

    /// A phi node.
    pub fn phi(&mut self, incoming: Vec<(BlockId, Operand)>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Phi { dst, incoming });
        dst
    }

    /// A call by name; returns the destination value.
    pub fn call(&mut self, name: &str, args: Vec<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Call {
            dst: Some(dst),
            callee: Callee::Named(name.to_string()),
            args,
        });
        dst
    }

    /// A call by name discarding the result.
    pub fn call_void(&mut self, name: &str, args: Vec<Operand>) {
        self.push(Inst::Call {
            dst: None,
            callee: Callee::Named(name.to_string()),
            args,
        });
    }

    /// Spawns a thread running `func` with `arg`; returns the thread id.
    pub fn spawn(&mut self, func: FuncId, arg: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Call {
            dst: Some(dst),
            callee: Callee::Named("thread_create".to_string()),
            args: vec![Operand::Fn(func), arg.into()],
        });
        dst
    }

    /// Joins the thread identified by `tid`; returns its result.
    pub fn join(&mut self, tid: impl Into<Operand>) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Call {
            dst: Some(dst),
            callee: Callee::Named("thread_join".to_string()),
            args: vec![tid.into()],
        });
        dst
    }

    /// `assume(cond)`: blocks the thread forever when `cond` is zero.
    pub fn assume(&mut self, cond: impl Into<Operand>) {
        self.call_void("assume", vec![cond.into()]);
    }

    /// `assert(cond)`: reports a safety violation when `cond` is zero.
    pub fn assert(&mut self, cond: impl Into<Operand>) {
        let c = cond.into();
        let fail = self.block();
        let cont = self.block();
        self.push(Inst::CondBr {
            cond: c,
            then_b: cont,
            else_b: fail,
        });
        self.switch_to(fail);
        self.call_void("assert_fail", vec![]);
        self.push(Inst::Unreachable);
        self.switch_to(cont);
    }

    /// An unconditional branch.
    pub fn br(&mut self, target: BlockId) {
        self.push(Inst::Br { target });
    }

    /// A conditional branch.
    pub fn cond_br(&mut self, cond: impl Into<Operand>, then_b: BlockId, else_b: BlockId) {
        self.push(Inst::CondBr {
            cond: cond.into(),
            then_b,
            else_b,
        });
    }

    /// A return.
    pub fn ret(&mut self, val: Option<Operand>) {
        self.push(Inst::Ret { val });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assembles_blocks() {
        let mut m = ModuleBuilder::new();
        let x = m.global("x", 4, 0);
        {
            let mut f = m.function("main");
            let header = f.block();
            let exit = f.block();
            f.br(header);
            f.switch_to(header);
            let v = f.load(x);
            let c = f.cmp(CmpOp::Eq, v, 0u64);
            f.cond_br(c, exit, header);
            f.switch_to(exit);
            f.ret(Some(0u64.into()));
        }
        let module = m.build();
        let main = module.func(module.function_named("main").unwrap());
        assert_eq!(main.blocks.len(), 3);
        assert!(main.blocks[0].insts.last().unwrap().is_terminator());
    }

    #[test]
    fn unterminated_functions_get_a_ret() {
        let mut m = ModuleBuilder::new();
        let x = m.global("x", 4, 0);
        {
            let mut f = m.function("main");
            f.store(x, 1u64);
        }
        let module = m.build();
        let main = module.func(FuncId(0));
        assert!(matches!(
            main.blocks[0].insts.last(),
            Some(Inst::Ret { val: None })
        ));
    }
}

//! Natural-loop detection.
//!
//! Dominators are computed with the classic iterative set intersection over
//! blocks reachable from the entry. Every edge `latch -> header` where the
//! header dominates the latch is a back edge; back edges sharing a header
//! form one natural loop.

use std::collections::{BTreeSet, HashMap, HashSet};

use thrud_ir::{BinaryOp, Block, Handle, Instruction, Kernel, Opcode, Value};

/// Index of a loop in a [`LoopInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(usize);

/// A natural loop.
#[derive(Clone, Debug)]
pub struct Loop {
    pub header: Handle<Block>,
    /// Sources of back edges into the header.
    pub latches: Vec<Handle<Block>>,
    /// All blocks of the loop, header included.
    pub blocks: BTreeSet<Handle<Block>>,
    /// Innermost enclosing loop.
    pub parent: Option<LoopId>,
    /// Nesting depth, 1 for outermost loops.
    pub depth: usize,
}

impl Loop {
    pub fn contains(&self, block: Handle<Block>) -> bool {
        self.blocks.contains(&block)
    }
}

/// Dominator sets of the reachable blocks of a kernel.
#[derive(Clone, Debug, Default)]
pub struct Dominators {
    sets: HashMap<Handle<Block>, HashSet<Handle<Block>>>,
}

impl Dominators {
    pub fn compute(kernel: &Kernel) -> Self {
        let Some(entry) = kernel.entry() else {
            return Self::default();
        };

        // Reachable blocks in layout order.
        let mut reachable = HashSet::from([entry]);
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            for succ in kernel.successors(block) {
                if reachable.insert(succ) {
                    stack.push(succ);
                }
            }
        }
        let blocks: Vec<_> = kernel
            .layout()
            .iter()
            .copied()
            .filter(|b| reachable.contains(b))
            .collect();
        let preds: HashMap<_, Vec<_>> = blocks
            .iter()
            .map(|&b| {
                let p = kernel
                    .predecessors(b)
                    .into_iter()
                    .filter(|p| reachable.contains(p))
                    .collect();
                (b, p)
            })
            .collect();

        let all: HashSet<_> = blocks.iter().copied().collect();
        let mut sets: HashMap<_, HashSet<_>> = blocks
            .iter()
            .map(|&b| (b, if b == entry { HashSet::from([entry]) } else { all.clone() }))
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &blocks {
                if block == entry {
                    continue;
                }
                let mut new: Option<HashSet<_>> = None;
                for pred in &preds[&block] {
                    let pred_set = &sets[pred];
                    new = Some(match new {
                        None => pred_set.clone(),
                        Some(acc) => acc.intersection(pred_set).copied().collect(),
                    });
                }
                let mut new = new.unwrap_or_default();
                new.insert(block);
                if sets[&block] != new {
                    sets.insert(block, new);
                    changed = true;
                }
            }
        }
        Self { sets }
    }

    /// `a` dominates `b`. Unreachable blocks dominate nothing and are
    /// dominated by nothing.
    pub fn dominates(&self, a: Handle<Block>, b: Handle<Block>) -> bool {
        self.sets.get(&b).is_some_and(|set| set.contains(&a))
    }

    pub fn is_reachable(&self, block: Handle<Block>) -> bool {
        self.sets.contains_key(&block)
    }
}

/// The natural loops of a kernel and their nesting.
#[derive(Clone, Debug, Default)]
pub struct LoopInfo {
    loops: Vec<Loop>,
    /// Innermost loop of each block inside a loop.
    innermost: HashMap<Handle<Block>, LoopId>,
}

impl LoopInfo {
    pub fn analyze(kernel: &Kernel) -> Self {
        let doms = Dominators::compute(kernel);

        // Back edges grouped by header, in layout order of the header.
        let mut latches: Vec<(Handle<Block>, Vec<Handle<Block>>)> = Vec::new();
        for &block in kernel.layout() {
            if !doms.is_reachable(block) {
                continue;
            }
            for succ in kernel.successors(block) {
                if doms.dominates(succ, block) {
                    match latches.iter_mut().find(|(h, _)| *h == succ) {
                        Some((_, list)) => list.push(block),
                        None => latches.push((succ, vec![block])),
                    }
                }
            }
        }

        let mut loops: Vec<Loop> = latches
            .into_iter()
            .map(|(header, latches)| {
                let mut blocks = BTreeSet::from([header]);
                let mut work: Vec<_> = latches.clone();
                while let Some(block) = work.pop() {
                    if blocks.insert(block) {
                        work.extend(
                            kernel
                                .predecessors(block)
                                .into_iter()
                                .filter(|&p| doms.is_reachable(p)),
                        );
                    }
                }
                Loop {
                    header,
                    latches,
                    blocks,
                    parent: None,
                    depth: 1,
                }
            })
            .collect();

        // Parent: the smallest other loop containing this loop's header.
        for i in 0..loops.len() {
            let header = loops[i].header;
            let parent = (0..loops.len())
                .filter(|&j| j != i && loops[j].contains(header) && loops[j].blocks.len() > loops[i].blocks.len())
                .min_by_key(|&j| loops[j].blocks.len());
            loops[i].parent = parent.map(LoopId);
        }
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut cur = loops[i].parent;
            while let Some(LoopId(p)) = cur {
                depth += 1;
                cur = loops[p].parent;
            }
            loops[i].depth = depth;
        }

        let mut innermost = HashMap::new();
        for &block in kernel.layout() {
            let best = (0..loops.len())
                .filter(|&i| loops[i].contains(block))
                .max_by_key(|&i| loops[i].depth);
            if let Some(i) = best {
                innermost.insert(block, LoopId(i));
            }
        }

        Self { loops, innermost }
    }

    pub fn loops(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.loops.iter().enumerate().map(|(i, l)| (LoopId(i), l))
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.0]
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Innermost loop containing `block`.
    pub fn loop_for(&self, block: Handle<Block>) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    pub fn is_header(&self, block: Handle<Block>) -> bool {
        self.loop_for(block)
            .is_some_and(|id| self.get(id).header == block)
    }

    /// Loop depth of `block`, 0 outside loops.
    pub fn depth(&self, block: Handle<Block>) -> usize {
        self.loop_for(block).map_or(0, |id| self.get(id).depth)
    }

    /// The canonical induction variable of a loop.
    ///
    /// The header must have exactly two predecessors, one outside the loop
    /// and one back edge, and a phi whose back-edge value is `phi + const`.
    pub fn induction_variable(&self, kernel: &Kernel, id: LoopId) -> Option<Handle<Instruction>> {
        let lp = self.get(id);
        let preds = kernel.predecessors(lp.header);
        let [a, b] = preds.as_slice() else {
            return None;
        };
        let backedge = match (lp.contains(*a), lp.contains(*b)) {
            (true, false) => *a,
            (false, true) => *b,
            _ => return None,
        };

        kernel.block(lp.header).instructions().iter().copied()
            .take_while(|&h| kernel[h].is_phi())
            .find(|&phi| {
                let Some(Value::Inst(step)) = kernel[phi].incoming_value_for(backedge) else {
                    return false;
                };
                let step = &kernel[step];
                matches!(step.opcode, Opcode::Binary(BinaryOp::Add))
                    && matches!(
                        step.operands(),
                        [Value::Inst(lhs), Value::Const(_)] if *lhs == phi
                    )
            })
    }
}

#[cfg(test)]
mod tests {
    use thrud_ir::{CmpPredicate, KernelBuilder, Type};

    use super::*;

    /// entry -> outer{ inner{ } } -> exit, with canonical counters.
    fn nested() -> Kernel {
        let mut k = Kernel::new("nest");
        let entry = k.add_block("entry");
        let outer = k.add_block("outer");
        let inner = k.add_block("inner");
        let latch = k.add_block("latch");
        let exit = k.add_block("exit");

        let mut b = KernelBuilder::new(&mut k, entry);
        b.br(outer);
        b.position_at_end(outer);
        let i = b.phi(Type::I32, &[(Value::Const(0), entry)], "i");
        b.br(inner);
        b.position_at_end(inner);
        let j = b.phi(Type::I32, &[(Value::Const(0), outer)], "j");
        let j_next = b.add(j, Value::Const(1), "j.next");
        let jc = b.icmp(CmpPredicate::Ult, j_next, Value::Const(8), "jc");
        b.cond_br(jc, inner, latch);
        b.position_at_end(latch);
        let i_next = b.add(i, Value::Const(2), "i.next");
        let ic = b.icmp(CmpPredicate::Ult, i_next, Value::Const(8), "ic");
        b.cond_br(ic, outer, exit);
        b.position_at_end(exit);
        b.ret();

        k.add_incoming(i.as_inst().unwrap(), i_next, latch).unwrap();
        k.add_incoming(j.as_inst().unwrap(), j_next, inner).unwrap();
        k
    }

    #[test]
    fn dominators_of_nested_loops() {
        let k = nested();
        let doms = Dominators::compute(&k);
        let outer = k.find_block("outer").unwrap();
        let latch = k.find_block("latch").unwrap();
        let exit = k.find_block("exit").unwrap();
        assert!(doms.dominates(outer, latch));
        assert!(doms.dominates(latch, exit));
        assert!(!doms.dominates(exit, outer));
    }

    #[test]
    fn nesting_and_membership() {
        let k = nested();
        let info = LoopInfo::analyze(&k);
        assert_eq!(info.len(), 2);
        let outer = k.find_block("outer").unwrap();
        let inner = k.find_block("inner").unwrap();
        let latch = k.find_block("latch").unwrap();
        let exit = k.find_block("exit").unwrap();

        let inner_loop = info.loop_for(inner).unwrap();
        let outer_loop = info.loop_for(outer).unwrap();
        assert_ne!(inner_loop, outer_loop);
        assert_eq!(info.get(inner_loop).parent, Some(outer_loop));
        assert_eq!(info.depth(inner), 2);
        assert_eq!(info.depth(latch), 1);
        assert_eq!(info.depth(exit), 0);
        assert!(info.is_header(outer) && info.is_header(inner) && !info.is_header(latch));
        assert_eq!(info.get(outer_loop).blocks.len(), 3);
    }

    #[test]
    fn canonical_induction_variables() {
        let k = nested();
        let info = LoopInfo::analyze(&k);
        let outer = info.loop_for(k.find_block("outer").unwrap()).unwrap();
        let inner = info.loop_for(k.find_block("inner").unwrap()).unwrap();
        assert_eq!(info.induction_variable(&k, outer), k.find("i"));
        assert_eq!(info.induction_variable(&k, inner), k.find("j"));
    }

    #[test]
    fn multiplicative_counter_is_not_canonical() {
        let mut k = Kernel::new("k");
        let entry = k.add_block("entry");
        let body = k.add_block("body");
        let exit = k.add_block("exit");
        let mut b = KernelBuilder::new(&mut k, entry);
        b.br(body);
        b.position_at_end(body);
        let i = b.phi(Type::I32, &[(Value::Const(1), entry)], "i");
        let next = b.mul(i, Value::Const(2), "next");
        let c = b.icmp(CmpPredicate::Ult, next, Value::Const(64), "c");
        b.cond_br(c, body, exit);
        b.position_at_end(exit);
        b.ret();
        k.add_incoming(i.as_inst().unwrap(), next, body).unwrap();

        let info = LoopInfo::analyze(&k);
        let lp = info.loop_for(k.find_block("body").unwrap()).unwrap();
        assert_eq!(info.induction_variable(&k, lp), None);
    }
}

//! Replication of divergent regions.
//!
//! Each copy of a region is a fresh set of blocks laid out after the
//! previous link. Copies are chained: the original region's exiting block
//! continues into the first copy, each copy into the next, and the last copy
//! into the original exit.

use std::collections::HashMap;

use thrud_analysis::DivergentRegion;
use thrud_ir::{Block, Handle, IrError};

use super::{Coarsener, copy_name};

impl Coarsener<'_> {
    pub(super) fn replicate_region(&mut self, region: &DivergentRegion) -> Result<(), IrError> {
        let Some(exit) = region.exit(self.kernel) else {
            log::warn!(
                "{}: region at '{}' has no exit, not replicated",
                self.kernel.name,
                self.kernel[region.header].name
            );
            return Ok(());
        };
        let mut previous = region.exiting;
        let mut anchor = region.blocks.last().copied().unwrap_or(region.exiting);

        for index in 0..self.copies() {
            let mut blocks: HashMap<Handle<Block>, Handle<Block>> = HashMap::new();
            for &block in &region.blocks {
                let name = copy_name(&self.kernel[block].name, index);
                let copy = self.kernel.insert_block_after(anchor, name)?;
                blocks.insert(block, copy);
                anchor = copy;
            }

            // Clone every body first so intra-region operands have a copy to
            // be remapped to.
            let mut cloned = Vec::new();
            for &block in &region.blocks {
                for inst in self.kernel[block].instructions().to_vec() {
                    let mut copy = self.kernel.clone_instruction(inst);
                    copy.name = copy.name.map(|name| copy_name(&name, index));
                    for (&from, &to) in &blocks {
                        copy.retarget(from, to);
                    }
                    let clone = self.kernel.append(blocks[&block], copy);
                    self.result.clones.entry(inst).or_default().push(clone);
                    cloned.push(clone);
                }
            }
            for &clone in &cloned {
                self.remap(clone, index)?;
            }

            let header = blocks[&region.header];
            if let Some(term) = self.kernel.terminator(previous) {
                self.kernel.inst_mut(term).retarget(exit, header);
            }
            // Header phis enter from the previous link.
            for inst in self.kernel[header].instructions().to_vec() {
                if !self.kernel[inst].is_phi() {
                    break;
                }
                let outside: Vec<_> = self.kernel[inst]
                    .incoming()
                    .into_iter()
                    .map(|(from, _)| from)
                    .filter(|from| !blocks.values().any(|b| b == from))
                    .collect();
                for from in outside {
                    self.kernel.inst_mut(inst).retarget(from, previous);
                }
            }
            previous = blocks[&region.exiting];
        }

        for inst in self.kernel[exit].instructions().to_vec() {
            if !self.kernel[inst].is_phi() {
                break;
            }
            self.kernel.inst_mut(inst).retarget(region.exiting, previous);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use indexmap::IndexSet;
    use thrud_analysis::{CoarseningMode, DivergenceInfo, PrecomputedDivergence};
    use thrud_ir::{Module, Opcode, Value, block_name};

    use super::*;
    use crate::coarsening::{CoarseningOptions, coarsen};

    const GUARDED: &str = r#"
kernel @guard(ptr global %out, i64 %n) {
entry:
  %gid = call i64 @get_global_id(0)
  br %head
head:
  %c = icmp ult i64 %gid, %n
  condbr %c, %then, %join
then:
  %p = gep ptr global %out, %gid
  store i32 1, %p, align 4
  br %join
join:
  br %exit
exit:
  ret
}
"#;

    fn guarded(factor: u32) -> Module {
        let mut module = thrud_parser::parse(GUARDED).unwrap();
        let k = &module.kernels[0];
        let block = |name| k.find_block(name).unwrap();
        let region = DivergentRegion {
            header: block("head"),
            exiting: block("join"),
            blocks: vec![block("head"), block("then"), block("join")],
        };
        let divergent: IndexSet<_> = region
            .blocks
            .iter()
            .flat_map(|&b| k.block(b).instructions().to_vec())
            .chain(k.find("gid"))
            .collect();
        let info = DivergenceInfo {
            divergent,
            outermost_instructions: Vec::new(),
            outermost_regions: vec![region],
        };
        let provider = PrecomputedDivergence(HashMap::from([("guard".to_string(), info)]));
        let options = CoarseningOptions {
            factor,
            mode: CoarseningMode::ThreadLevel,
            ..CoarseningOptions::default()
        };
        coarsen(&mut module, 0, &options, &provider).unwrap();
        module
    }

    fn target(module: &Module, block: &str) -> Vec<String> {
        let k = &module.kernels[0];
        k.successors(k.find_block(block).unwrap())
            .into_iter()
            .map(|b| block_name(k, b))
            .collect()
    }

    #[test]
    fn copies_are_laid_out_after_the_region() {
        let module = guarded(3);
        let k = &module.kernels[0];
        let names: Vec<_> = k.layout().iter().map(|&b| block_name(k, b)).collect();
        assert_eq!(
            names,
            [
                "entry", "head", "then", "join", "head..cf2", "then..cf2", "join..cf2", "head..cf3",
                "then..cf3", "join..cf3", "exit"
            ]
        );
    }

    #[test]
    fn copies_are_chained() {
        let module = guarded(3);
        assert_eq!(target(&module, "join"), ["head..cf2"]);
        assert_eq!(target(&module, "join..cf2"), ["head..cf3"]);
        assert_eq!(target(&module, "join..cf3"), ["exit"]);
        assert_eq!(target(&module, "head..cf2"), ["then..cf2", "join..cf2"]);
        assert_eq!(target(&module, "then..cf3"), ["join..cf3"]);
    }

    #[test]
    fn region_bodies_use_their_own_ids() {
        let module = guarded(3);
        let k = &module.kernels[0];
        let c3 = k.find("c..cf3").unwrap();
        assert_eq!(k[c3].operand(0), Some(Value::Inst(k.find("gid..cf3").unwrap())));
        let then3 = k.find_block("then..cf3").unwrap();
        let store = k.block(then3).instructions()[1];
        assert!(matches!(k[store].opcode, Opcode::Store { .. }));
        assert_eq!(k[store].operand(1), Some(Value::Inst(k.find("p..cf3").unwrap())));
        // The branch of the copy tests the copy's condition.
        let head2 = k.find_block("head..cf2").unwrap();
        let branch = k.terminator(head2).unwrap();
        assert_eq!(k[branch].operand(0), Some(Value::Inst(k.find("c..cf2").unwrap())));
    }

    #[test]
    fn exit_phis_merge_from_the_last_copy() {
        let src = r#"
kernel @k(ptr global %out) {
entry:
  %gid = call i64 @get_global_id(0)
  br %head
head:
  %c = icmp ult i64 %gid, 4
  condbr %c, %join, %join
join:
  br %exit
exit:
  %m = phi i64 [0, %join]
  ret
}
"#;
        let mut module = thrud_parser::parse(src).unwrap();
        let k = &module.kernels[0];
        let head = k.find_block("head").unwrap();
        let join = k.find_block("join").unwrap();
        let info = DivergenceInfo {
            divergent: IndexSet::from([k.find("gid").unwrap(), k.find("c").unwrap()]),
            outermost_instructions: Vec::new(),
            outermost_regions: vec![DivergentRegion {
                header: head,
                exiting: join,
                blocks: vec![head, join],
            }],
        };
        let provider = PrecomputedDivergence(HashMap::from([("k".to_string(), info)]));
        let options = CoarseningOptions {
            factor: 2,
            ..CoarseningOptions::default()
        };
        coarsen(&mut module, 0, &options, &provider).unwrap();

        let k = &module.kernels[0];
        let m = k.find("m").unwrap();
        let join2 = k.find_block("join..cf2").unwrap();
        assert_eq!(k[m].incoming_value_for(join2), Some(Value::Const(0)));
        assert_eq!(k.predecessors(k.find_block("exit").unwrap()), [join2]);
    }
}

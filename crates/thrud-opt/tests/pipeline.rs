use thrud_ir::{Module, Value, block_name, dump_module};
use thrud_opt::{
    AssumeRestrict, CoarseningOptions, IrValidation, KernelSelection, OccupancyReduction,
    PassManager, ReplaceGlobalIds, ThreadCoarsening, coarsen, validate_module,
};

fn parse(source: &str) -> Module {
    thrud_parser::parse(source).unwrap()
}

fn inst(module: &Module, name: &str) -> Value {
    Value::Inst(module.kernels[0].find(name).unwrap())
}

#[test]
fn loop_carried_values_resolve_through_placeholders() {
    let mut module = parse(include_str!("../../../kernels/mm.tir"));
    let options = CoarseningOptions {
        factor: 2,
        ..CoarseningOptions::default()
    };
    let result = coarsen(&mut module, 0, &options, &thrud_analysis::TaintDivergence).unwrap();
    assert_eq!(result.unresolved, 0);

    let text = dump_module(&module);
    assert!(!text.contains(".place.holder"), "{text}");
    assert!(validate_module(&module).is_empty(), "{text}");

    let k = &module.kernels[0];
    let body = k.find_block("body").unwrap();
    let acc2 = k.find("acc..cf2").unwrap();
    assert!(k[acc2].is_phi());
    assert_eq!(k[acc2].incoming_value_for(body), Some(inst(&module, "acc.next..cf2")));
    assert_eq!(k[k.find("bi..cf2").unwrap()].operand(1), Some(inst(&module, "col..cf2")));
    // Row indexing does not vary along direction 0.
    assert!(k.find("ai..cf2").is_none());
}

#[test]
fn block_level_pipeline_keeps_the_module_well_formed() {
    let mut module = parse(include_str!("../../../kernels/vadd.tir"));
    let all = KernelSelection::all();
    let mut pm = PassManager::new();
    pm.add_pass(Box::new(AssumeRestrict::new(all.clone())));
    pm.add_pass(Box::new(ReplaceGlobalIds::new(all.clone(), 0)));
    pm.add_pass(Box::new(ThreadCoarsening::new(
        all.clone(),
        CoarseningOptions {
            factor: 2,
            mode: thrud_analysis::CoarseningMode::BlockLevel,
            ..CoarseningOptions::default()
        },
    )));
    pm.add_pass(Box::new(OccupancyReduction::new(all, 1024)));
    pm.add_pass(Box::new(IrValidation));
    assert!(pm.run(&mut module));

    let text = dump_module(&module);
    assert!(validate_module(&module).is_empty(), "{text}");
    let k = &module.kernels[0];
    assert!(k.params.iter().filter(|p| p.ty.address_space().is_some()).all(|p| p.noalias));
    assert!(k.find("gid.grp..base").is_some(), "{text}");
    assert!(k.find("gid..cf2").is_some(), "{text}");
    assert!(k.find("sum..cf2").is_some(), "{text}");
    assert_eq!(block_name(k, k.entry().unwrap()), "ored..entry");
    assert!(module.find_global("vadd..ored").is_some());
}

#[test]
fn unselected_kernels_are_untouched() {
    let mut module = parse(include_str!("../../../kernels/vadd.tir"));
    let before = dump_module(&module);
    let pass = ThreadCoarsening::new(
        KernelSelection::named("other"),
        CoarseningOptions {
            factor: 4,
            ..CoarseningOptions::default()
        },
    );
    let mut pm = PassManager::new();
    pm.add_pass(Box::new(pass));
    assert!(!pm.run(&mut module));
    assert_eq!(dump_module(&module), before);
}

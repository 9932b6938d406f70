mod common;

use thrud_analysis::{DivergenceError, TaintDivergence};
use thrud_ir::dump_module;
use thrud_opt::{
    CoarseningError, CoarseningOptions, KernelSelection, Pass, ThreadCoarsening, coarsen,
};

const DIVERGENT_BRANCH: &str = r#"
kernel @guard(ptr global %out, i64 %n) {
entry:
  %gid = call i64 @get_global_id(0)
  %c = icmp ult i64 %gid, %n
  condbr %c, %then, %exit
then:
  %p = gep ptr global %out, %gid
  store i32 1, %p, align 4
  br %exit
exit:
  ret
}
"#;

#[test]
fn syntax_error_reports_its_line() {
    let err = thrud_parser::parse("kernel @k() {\nentry:\n  %x = add i32 1, $\n  ret\n}\n").unwrap_err();
    assert_eq!(err.line(), Some(3));
    assert!(err.to_string().starts_with("line "));
}

#[test]
fn divergent_branch_leaves_the_kernel_untouched() {
    let mut module = thrud_parser::parse(DIVERGENT_BRANCH).unwrap();
    let before = dump_module(&module);
    let err = coarsen(&mut module, 0, &common::thread_level(2), &TaintDivergence).unwrap_err();
    assert!(matches!(
        err,
        CoarseningError::Divergence(DivergenceError::DivergentBranch { .. })
    ));
    assert_eq!(dump_module(&module), before);

    let pass = ThreadCoarsening::new(KernelSelection::all(), common::thread_level(2));
    assert!(!pass.run(&mut module));
    assert_eq!(dump_module(&module), before);
}

#[test]
fn invalid_options_are_rejected_before_rewriting() {
    let mut module = common::load("vadd");
    let before = dump_module(&module);
    let options = CoarseningOptions {
        direction: 5,
        ..common::thread_level(2)
    };
    assert!(matches!(
        coarsen(&mut module, 0, &options, &TaintDivergence),
        Err(CoarseningError::InvalidDirection(5))
    ));
    assert_eq!(dump_module(&module), before);
}

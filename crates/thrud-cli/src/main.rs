use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use miette::{Context, IntoDiagnostic};

use thrud_analysis::{CoarseningMode, ReuseOptions};
use thrud_ir::Module;
use thrud_opt::{
    AssumeRestrict, CoarseningOptions, IrValidation, KernelSelection, OccupancyReduction, Pass,
    ReplaceGlobalIds, ThreadCoarsening, check_reuse,
};

/// thrud: thread coarsening for GPU compute kernels
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input kernel file
    input: PathBuf,

    /// Output path for the transformed IR (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Passes to run, in order
    #[arg(long = "pass", value_enum, value_delimiter = ',', default_values = ["clr", "coarsen"])]
    passes: Vec<PassName>,

    /// Only process the kernel with this name (default: every kernel)
    #[arg(long, default_value = "")]
    kernel_name: String,

    /// Logical work items folded into one
    #[arg(long, default_value_t = 1)]
    coarsening_factor: u32,

    /// Index-space direction to coarsen along (0, 1 or 2)
    #[arg(long, default_value_t = 0)]
    coarsening_direction: u32,

    /// Distance between the ids handled by one work item
    #[arg(long, default_value_t = 1)]
    coarsening_stride: u32,

    /// Fold work items instead of work groups
    #[arg(long)]
    thread_level: bool,

    /// Lanes per warp, for the reuse check
    #[arg(long, default_value_t = 32)]
    warp_size: u32,

    /// Cache line size in bytes, for the reuse check
    #[arg(long, default_value_t = 32)]
    cache_line_size: u32,

    /// Bytes of shared memory reserved by the `ored` pass
    #[arg(long, default_value_t = 0)]
    shmem: u32,

    /// Skip coarsening kernels the reuse check found reuse in
    #[arg(long)]
    gate_on_reuse: bool,

    /// Check the pipeline without printing the IR
    #[arg(long)]
    dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PassName {
    AssumeRestrict,
    ReplaceGids,
    Clr,
    Coarsen,
    Ored,
    Validate,
}

impl Cli {
    fn selection(&self) -> KernelSelection {
        KernelSelection::named(self.kernel_name.clone())
    }

    fn coarsening_options(&self) -> CoarseningOptions {
        CoarseningOptions {
            factor: self.coarsening_factor,
            direction: self.coarsening_direction,
            mode: if self.thread_level {
                CoarseningMode::ThreadLevel
            } else {
                CoarseningMode::BlockLevel
            },
            stride: self.coarsening_stride,
        }
    }

    fn reuse_options(&self) -> ReuseOptions {
        ReuseOptions {
            direction: self.coarsening_direction,
            warp_size: self.warp_size as usize,
            cache_line_size: self.cache_line_size,
            ..ReuseOptions::default()
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let options = cli.coarsening_options();
    if cli.passes.contains(&PassName::Coarsen) {
        options
            .validate()
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("invalid coarsening options")?;
    }

    // 1. Read source file.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 2. Parse kernels.
    let mut module = thrud_parser::parse(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("kernel parse failed")?;
    if module.kernels.is_empty() {
        return Err(miette::miette!("{} defines no kernels", cli.input.display()));
    }

    // 3. Run the pipeline.
    let mut refused = HashSet::new();
    for &name in &cli.passes {
        match name {
            PassName::Clr => {
                for (kernel, outcome) in check_reuse(&module, &cli.selection(), &cli.reuse_options()) {
                    eprintln!("{kernel}: {outcome}");
                    if cli.gate_on_reuse && !outcome.permits_coarsening() {
                        refused.insert(kernel);
                    }
                }
            }
            PassName::Coarsen => coarsen_selected(&cli, &mut module, &refused),
            _ => {
                if let Some(pass) = build_pass(&cli, name) {
                    let changed = pass.run(&mut module);
                    log::debug!("pass '{}' modified module: {changed}", pass.name());
                }
            }
        }
    }

    // 4. Write output.
    if cli.dry_run {
        return Ok(());
    }
    let text = thrud_ir::dump_module(&module);
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

/// The module-wide passes; `clr` and `coarsen` are driven per kernel.
fn build_pass(cli: &Cli, name: PassName) -> Option<Box<dyn Pass>> {
    let pass: Box<dyn Pass> = match name {
        PassName::AssumeRestrict => Box::new(AssumeRestrict::new(cli.selection())),
        PassName::ReplaceGids => {
            Box::new(ReplaceGlobalIds::new(cli.selection(), cli.coarsening_direction))
        }
        PassName::Ored => Box::new(OccupancyReduction::new(cli.selection(), cli.shmem)),
        PassName::Validate => Box::new(IrValidation),
        PassName::Clr | PassName::Coarsen => return None,
    };
    Some(pass)
}

fn coarsen_selected(cli: &Cli, module: &mut Module, refused: &HashSet<String>) {
    let selection = cli.selection();
    let names: Vec<_> = module
        .kernels
        .iter()
        .filter(|k| selection.matches(k))
        .map(|k| k.name.clone())
        .collect();
    for name in names {
        if refused.contains(&name) {
            eprintln!("{name}: not coarsened, cache lines are reused");
            continue;
        }
        let pass = ThreadCoarsening::new(KernelSelection::named(name), cli.coarsening_options());
        pass.run(module);
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: cudrv.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cudrv::compiler::{self, CodeType, CompiledCode};
use cudrv::{Driver, JitInputType, MockDriver, MockNvrtc, Nvrtc, PrimaryContext};

#[derive(Parser)]
#[command(author, version, about = "CUDA driver utilities")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    /// Use the in-process mock driver instead of libcuda
    #[arg(long, global = true)]
    mock: bool,
    /// Device ordinal whose primary context is used
    #[arg(long, global = true, default_value_t = 0)]
    device: i32,
}

#[derive(Subcommand)]
enum Cmd {
    /// List devices and their compute capability
    Devices,
    /// Link PTX/cubin/fatbin/object/library inputs into one cubin
    Link {
        inputs: Vec<PathBuf>,
        #[arg(short = 'o')]
        out: PathBuf,
        /// Input kind for files whose extension does not say
        #[arg(long)]
        kind: Option<JitInputType>,
    },
    /// Load a module and resolve kernels and globals in it
    Symbols {
        module: PathBuf,
        #[arg(long = "function")]
        functions: Vec<String>,
        #[arg(long = "global")]
        globals: Vec<String>,
    },
    /// Compile CUDA source with nvcc, or with NVRTC to PTX
    Compile {
        source: PathBuf,
        #[arg(short = 'o')]
        out: PathBuf,
        /// Ignored with --nvrtc, which always emits PTX
        #[arg(long, default_value = "cubin")]
        code_type: String,
        /// Compile in process through NVRTC instead of running nvcc
        #[arg(long)]
        nvrtc: bool,
        /// Target architecture such as 86; queried from the device when omitted
        #[arg(long)]
        arch: Option<String>,
        #[arg(last = true)]
        options: Vec<String>,
    },
}

fn open_driver(mock: bool) -> anyhow::Result<Driver> {
    if mock {
        let driver = Driver::with_api(Arc::new(MockDriver::new()));
        driver.init(0)?;
        return Ok(driver);
    }
    Ok(Driver::load()?)
}

fn bind_primary(driver: &Driver, ordinal: i32) -> anyhow::Result<PrimaryContext> {
    let device = driver.device(ordinal)?;
    let ctx = driver.retain_primary_context(device)?;
    ctx.set_current()?;
    Ok(ctx)
}

fn open_nvrtc(mock: bool) -> anyhow::Result<Nvrtc> {
    if mock {
        return Ok(Nvrtc::with_api(Arc::new(MockNvrtc::new())));
    }
    Ok(Nvrtc::load()?)
}

fn input_kind(path: &Path, fallback: Option<JitInputType>) -> anyhow::Result<JitInputType> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(JitInputType::from_extension)
        .or(fallback)
        .ok_or_else(|| {
            anyhow::anyhow!("cannot infer input kind of {}; pass --kind", path.display())
        })
}

fn cmd_devices(driver: &Driver) -> anyhow::Result<()> {
    println!("driver {}", driver.version()?);
    for device in driver.devices()? {
        let (major, minor) = driver.compute_capability(device)?;
        println!("{device}: compute capability {major}.{minor}");
    }
    Ok(())
}

fn cmd_link(
    driver: &Driver,
    ordinal: i32,
    inputs: &[PathBuf],
    out: &Path,
    kind: Option<JitInputType>,
) -> anyhow::Result<()> {
    if inputs.is_empty() {
        anyhow::bail!("no inputs to link");
    }
    let _ctx = bind_primary(driver, ordinal)?;
    let mut link = driver.link()?;
    for path in inputs {
        let kind = input_kind(path, kind)?;
        let data = fs::read(path)?;
        link.add_data(kind, &data, &path.display().to_string())?;
    }
    let image = link.complete()?;
    fs::write(out, &image)?;
    link.destroy()?;
    println!(
        "linked {} inputs -> {} ({} bytes)",
        inputs.len(),
        out.display(),
        image.len()
    );
    Ok(())
}

fn cmd_symbols(
    driver: &Driver,
    ordinal: i32,
    module: &Path,
    functions: &[String],
    globals: &[String],
) -> anyhow::Result<()> {
    let _ctx = bind_primary(driver, ordinal)?;
    let module = driver.load_module(module)?;
    let mut missing = 0;
    for name in functions {
        match module.function(name) {
            Ok(f) => println!("function {name}: {:#x}", f.as_raw()),
            Err(e) => {
                missing += 1;
                println!("function {name}: {e}");
            }
        }
    }
    for name in globals {
        match module.global(name) {
            Ok(g) => println!("global {name}: {:#x} ({} bytes)", g.ptr, g.bytes),
            Err(e) => {
                missing += 1;
                println!("global {name}: {e}");
            }
        }
    }
    if missing > 0 {
        anyhow::bail!("{missing} symbol(s) not resolved");
    }
    Ok(())
}

struct CompileArgs<'a> {
    source: &'a Path,
    out: &'a Path,
    code_type: &'a str,
    nvrtc: bool,
    arch: Option<String>,
    options: &'a [String],
}

fn cmd_compile(mock: bool, ordinal: i32, args: CompileArgs<'_>) -> anyhow::Result<()> {
    let nvrtc = if args.nvrtc { Some(open_nvrtc(mock)?) } else { None };
    let arch = match args.arch {
        Some(a) => a,
        None => {
            let driver = open_driver(mock)?;
            let _ctx = bind_primary(&driver, ordinal)?;
            compiler::default_arch(&driver, nvrtc.as_ref())?
        }
    };
    let text = fs::read_to_string(args.source)?;
    let filename = args
        .source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kern.cu".into());
    let code = match &nvrtc {
        Some(nvrtc) => CompiledCode::Ptx(compiler::compile_using_nvrtc(
            nvrtc,
            &text,
            args.options,
            &arch,
            &filename,
        )?),
        None => {
            let code_type: CodeType = args.code_type.parse()?;
            compiler::compile_using_nvcc(&text, args.options, &arch, &filename, code_type)?
        }
    };
    match &code {
        CompiledCode::Ptx(ptx) => fs::write(args.out, ptx)?,
        CompiledCode::Cubin(bin) => fs::write(args.out, bin)?,
    }
    println!(
        "compiled {} -> {} (sm_{arch}, {})",
        args.source.display(),
        args.out.display(),
        code.kind()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Devices => cmd_devices(&open_driver(cli.mock)?)?,
        Cmd::Link { inputs, out, kind } => {
            cmd_link(&open_driver(cli.mock)?, cli.device, &inputs, &out, kind)?
        }
        Cmd::Symbols {
            module,
            functions,
            globals,
        } => cmd_symbols(&open_driver(cli.mock)?, cli.device, &module, &functions, &globals)?,
        Cmd::Compile {
            source,
            out,
            code_type,
            nvrtc,
            arch,
            options,
        } => {
            let args = CompileArgs {
                source: &source,
                out: &out,
                code_type: &code_type,
                nvrtc,
                arch,
                options: &options,
            };
            cmd_compile(cli.mock, cli.device, args)?
        }
    }
    Ok(())
}

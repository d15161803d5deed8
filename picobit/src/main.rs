use clap::{Parser as ClapParser, ValueEnum};
use log::{error, info, warn};
use std::{fs, path::Path, process};

use picobit::{HeapSettings, Image, Terminal, VM, VmError, VmSettings, disassemble};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Intel HEX text
    Hex,
    /// Raw image bytes
    Bin,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OnFault {
    Exit,
    Restart,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program image to run
    #[arg(help = "The .hex or binary image to run")]
    image: String,

    /// Image format; guessed from the extension when omitted
    #[arg(long, value_enum)]
    format: Option<Format>,

    #[arg(long, default_value_t = HeapSettings::default().ram_cells)]
    ram_cells: usize,

    #[arg(long, default_value_t = HeapSettings::default().vector_units)]
    vector_units: usize,

    /// Check heap invariants after every collection
    #[arg(long)]
    debug: bool,

    /// Log collector statistics at exit
    #[arg(long)]
    stats: bool,

    /// Print the decoded program instead of running it
    #[arg(long)]
    disassemble: bool,

    #[arg(long, value_enum, default_value_t = OnFault::Exit)]
    on_fault: OnFault,

    /// Restarts allowed with `--on-fault restart`
    #[arg(long, default_value_t = 3)]
    max_restarts: u32,

    /// Log every instruction at trace level
    #[cfg(debug_assertions)]
    #[arg(long)]
    trace: bool,
}

fn load_image(cli: &Cli) -> Result<Image, String> {
    let path = Path::new(&cli.image);
    let format = cli.format.unwrap_or_else(|| {
        match path.extension().and_then(|e| e.to_str()) {
            Some("hex" | "ihx") => Format::Hex,
            _ => Format::Bin,
        }
    });
    let loaded = match format {
        Format::Hex => {
            let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
            Image::from_hex(&text)
        }
        Format::Bin => {
            let bytes = fs::read(path).map_err(|e| e.to_string())?;
            Image::from_bytes(bytes)
        }
    };
    loaded.map_err(|e| e.to_string())
}

fn run_once(
    image: &Image,
    settings: &VmSettings,
    terminal: &Terminal,
    stats: bool,
) -> Result<(), VmError> {
    let mut vm = VM::new(image.clone(), settings.clone(), Box::new(terminal.clone()))?;
    let result = vm.run();
    if stats {
        let s = vm.heap.stats();
        info!(
            "gc: {} collections, last marked {}, last freed {}, total pause {:?}, max pause {:?}",
            s.collections, s.last_marked, s.last_freed, s.total_pause, s.max_pause
        );
    }
    result
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.stats {
        "info"
    } else {
        "warn"
    }))
    .init();

    let image = match load_image(&cli) {
        Ok(image) => image,
        Err(err) => {
            error!("error loading '{}': {}", cli.image, err);
            process::exit(1);
        }
    };

    if cli.disassemble {
        print!("{}", disassemble(&image));
        return;
    }

    let settings = VmSettings {
        heap: HeapSettings {
            ram_cells: cli.ram_cells,
            vector_units: cli.vector_units,
        },
        debug: cli.debug,
        #[cfg(debug_assertions)]
        trace: cli.trace,
        #[cfg(not(debug_assertions))]
        trace: false,
    };
    if let Err(reason) = settings.heap.validate() {
        error!("invalid heap settings: {reason}");
        process::exit(1);
    }

    let terminal = match Terminal::new() {
        Ok(terminal) => terminal,
        Err(err) => {
            error!("cannot attach to the terminal: {err}");
            process::exit(1);
        }
    };

    let mut restarts = 0;
    loop {
        match run_once(&image, &settings, &terminal, cli.stats) {
            Ok(()) => return,
            Err(err) => {
                error!("fault: {err}");
                if cli.on_fault == OnFault::Exit || restarts >= cli.max_restarts {
                    process::exit(1);
                }
                restarts += 1;
                warn!("restarting ({restarts} of {})", cli.max_restarts);
            }
        }
    }
}

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gr32_asm::parser::parse_int;
use gr32_asm::{assemble, ListingStyle, Options, SourceFile};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Assembler for the GR32 32-bit register machine"
)]
struct Opts {
    /// Input files
    #[arg(value_name = "file", required = true)]
    inputs: Vec<PathBuf>,

    /// Do not prepend the 4-byte size header
    #[arg(short = 'c')]
    no_header: bool,

    /// Entry point address
    #[arg(short = 'e', value_name = "integer")]
    entry: Option<String>,

    /// Define <label> at the end of the program
    #[arg(short = 'f', value_name = "label")]
    end_label: Option<String>,

    /// Treat <file> as a library; may be repeated
    #[arg(short = 'l', value_name = "file")]
    library: Vec<PathBuf>,

    /// Output file
    #[arg(short = 'o', value_name = "file", default_value = "a.out")]
    output: PathBuf,

    /// Maximum number of optimization passes
    #[arg(short = 'O', value_name = "integer", default_value_t = 2)]
    opt_level: u32,

    /// Do not insert the start label jump
    #[arg(short = 'r')]
    no_start_jump: bool,

    /// Write the preprocessed assembly to <output>.s
    #[arg(short = 's')]
    listing: bool,

    /// Start execution from <label>
    #[arg(short = 't', value_name = "label", default_value = "main")]
    start: String,

    /// Like -s, with encoded words and source text
    #[arg(short = 'v')]
    verbose_listing: bool,

    /// Export defined labels as JSON
    #[arg(long, value_name = "file")]
    symbols: Option<PathBuf>,

    /// Disable the unused label warning
    #[arg(long = "Wno-unused-label")]
    no_unused_label: bool,

    /// Warn whenever r29 appears in an operand
    #[arg(long = "Wr29")]
    warn_r29: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut options = Options {
        start_label: opts.start.clone(),
        opt_level: opts.opt_level,
        end_label: opts.end_label.clone(),
        start_jump: !opts.no_start_jump,
        warn_unused_label: !opts.no_unused_label,
        warn_scratch: opts.warn_r29,
        ..Options::default()
    };
    if opts.verbose_listing {
        options.listing = Some(ListingStyle::Verbose);
    } else if opts.listing {
        options.listing = Some(ListingStyle::Plain);
    }
    if let Some(e) = &opts.entry {
        let Some(entry) = parse_int(e) else {
            bail!("argument -e: expected integer: {e}");
        };
        if entry & 3 != 0 {
            bail!("argument -e: entry address must be a multiple of 4");
        }
        if entry < 0 {
            bail!("argument -e: entry address must be zero or positive");
        }
        options.entry = entry;
    }

    let mut files = Vec::new();
    for (path, library) in opts
        .library
        .iter()
        .map(|p| (p, true))
        .chain(opts.inputs.iter().map(|p| (p, false)))
    {
        if !path.is_file() {
            bail!("file does not exist: {}", path.display());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        files.push(SourceFile {
            name: path.display().to_string(),
            text,
            library,
        });
    }

    let output = assemble(&files, &options)?;
    for warning in &output.warnings {
        eprintln!("{warning}");
    }

    let mut bytes = Vec::with_capacity(output.image.len() + 4);
    if !opts.no_header {
        bytes.extend_from_slice(&(output.image.len() as u32).to_le_bytes());
    }
    bytes.extend_from_slice(&output.image);
    std::fs::write(&opts.output, bytes)
        .with_context(|| format!("cannot write {}", opts.output.display()))?;

    if let Some(listing) = &output.listing {
        let path = format!("{}.s", opts.output.display());
        std::fs::write(&path, listing).with_context(|| format!("cannot write {path}"))?;
    }
    if let Some(path) = &opts.symbols {
        let json = serde_json::to_string_pretty(&output.symbols)?;
        std::fs::write(path, json)
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}

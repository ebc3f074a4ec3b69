use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use pe_inspector::error::Error;
use pe_inspector::imports::{self, Limits};
use pe_inspector::optional::directory_index;
use pe_inspector::pe::{decode_bytes, PeImage};
use pe_inspector::region::ByteRegion;

/// Inspects a Windows PE/COFF image and reports its structural metadata.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the image to inspect.
    path: PathBuf,

    /// Also list the libraries this image imports directly or via delay-load.
    #[arg(long)]
    dependencies: bool,
}

fn run(args: Args) -> Result<(), Error> {
    let region = ByteRegion::map_file(&args.path)?;
    let bytes = region.bytes();
    let image = decode_bytes(bytes)?;

    print!("{image}");

    if args.dependencies {
        match &image {
            PeImage::FullImage { opt, sections, .. } => {
                let import_rva = opt.directory(directory_index::IMPORT).virtual_address;
                let delay_rva = opt.directory(directory_index::DELAY_IMPORT).virtual_address;
                let names = imports::extract_dependencies(
                    bytes,
                    sections,
                    pe_inspector::directory::AddressMode::OnDisk,
                    import_rva,
                    delay_rva,
                    Limits::default(),
                )?;
                println!("Dependencies");
                println!("------------");
                for name in names {
                    println!("{name}");
                }
            }
            PeImage::CoffOnly { .. } => {
                println!("Dependencies: none (COFF object files carry no import table)");
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

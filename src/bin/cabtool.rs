//! Command-line front-end for the `mscab` cabinet decompressor.

use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mscab::{CabDecompressor, Cabinet, Md5Sink, Parameter, StdoutSink};

#[derive(Parser)]
#[command(name = "cabtool", version, about = "Lists and extracts the \
contents of Microsoft cabinet (.cab) files")]
struct Args {
    /// Downgrade MSZIP checksum and decoding errors to warnings.
    #[arg(long, global = true)]
    fix_mszip: bool,
    /// Keep what can be salvaged from malformed cabinets.
    #[arg(long, global = true)]
    salvage: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the files in a cabinet.
    List {
        /// Cabinet file to read.
        cab: PathBuf,
        /// Long format: attributes, compression, size and date.
        #[arg(short, long)]
        long: bool,
    },
    /// Write files from the cabinet to standard output.
    Cat {
        /// Cabinet file to read.
        cab: PathBuf,
        /// Names of the files to print.
        files: Vec<String>,
    },
    /// Extract files from a cabinet (and any continuation cabinets named
    /// after it).
    Extract {
        /// Cabinet file(s) forming a set, in order.
        cabs: Vec<PathBuf>,
        /// Directory to extract into.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Scan an arbitrary file for embedded cabinets.
    Search {
        /// Container file to scan.
        file: PathBuf,
    },
    /// Print the MD5 digest of every file without writing anything.
    Md5 {
        /// Cabinet file to read.
        cab: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cabd = CabDecompressor::new();
    if args.fix_mszip {
        cabd.set_param(Parameter::FixMsZip, 1).unwrap();
    }
    if args.salvage {
        cabd.set_param(Parameter::Salvage, 1).unwrap();
    }

    let failures = match run(&mut cabd, args.command) {
        Ok(failures) => failures,
        Err(error) => {
            eprintln!("cabtool: {}", error);
            return ExitCode::FAILURE;
        }
    };
    if failures > 0 {
        eprintln!("cabtool: {} file(s) failed", failures);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(
    cabd: &mut CabDecompressor,
    command: Command,
) -> mscab::Result<u32> {
    match command {
        Command::List { cab, long } => {
            let cabinet = cabd.open(&cab.to_string_lossy())?;
            for file in cabinet.file_entries() {
                list_file(&cabinet, file, long);
            }
            Ok(0)
        }
        Command::Cat { cab, files } => {
            let cabinet = cabd.open(&cab.to_string_lossy())?;
            let mut failures = 0;
            for name in files {
                match cabinet.get_file_entry(&name) {
                    Some(file) => {
                        let mut sink = StdoutSink::new();
                        if let Err(error) =
                            cabd.extract_to(&cabinet, file, &mut sink)
                        {
                            eprintln!("{}: {}", name, error);
                            failures += 1;
                        }
                    }
                    None => {
                        eprintln!("{}: not found in cabinet", name);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        }
        Command::Extract { cabs, output } => {
            let mut parts = cabs.iter();
            let first = match parts.next() {
                Some(first) => first,
                None => return Ok(0),
            };
            let mut cabinet = cabd.open(&first.to_string_lossy())?;
            for part in parts {
                let next = cabd.open(&part.to_string_lossy())?;
                if let Err(merge_error) = cabd.append(&mut cabinet, next) {
                    eprintln!(
                        "{}: cannot join set: {}",
                        part.display(),
                        merge_error.error
                    );
                    cabd.close(merge_error.cabinet);
                }
            }
            let mut failures = 0;
            for file in cabinet.file_entries() {
                let target = output.join(sanitize_name(file.name()));
                if let Some(parent) = target.parent() {
                    if let Err(error) = std::fs::create_dir_all(parent) {
                        eprintln!("{}: {}", parent.display(), error);
                        failures += 1;
                        continue;
                    }
                }
                match cabd.extract(
                    &cabinet,
                    file,
                    &target.to_string_lossy(),
                ) {
                    Ok(()) => println!("{}", target.display()),
                    Err(error) => {
                        eprintln!("{}: {}", file.name(), error);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        }
        Command::Search { file } => {
            let cabinets = cabd.search(&file.to_string_lossy())?;
            println!("{} cabinet(s) found", cabinets.len());
            for cabinet in &cabinets {
                let part = &cabinet.parts()[0];
                println!(
                    "  offset {:#x}: {} bytes, {} folder(s), {} file(s)",
                    part.base_offset(),
                    part.length(),
                    cabinet.folder_entries().len(),
                    cabinet.file_entries().len()
                );
            }
            Ok(0)
        }
        Command::Md5 { cab } => {
            let cabinet = cabd.open(&cab.to_string_lossy())?;
            let mut failures = 0;
            for file in cabinet.file_entries() {
                let mut sink = Md5Sink::new();
                match cabd.extract_to(&cabinet, file, &mut sink) {
                    Ok(()) => {
                        let digest = sink.finish();
                        let hex: String = digest
                            .iter()
                            .map(|byte| format!("{:02x}", byte))
                            .collect();
                        println!("{}  {}", hex, file.name());
                    }
                    Err(error) => {
                        eprintln!("{}: {}", file.name(), error);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        }
    }
}

fn list_file(cabinet: &Cabinet, file: &mscab::FileEntry, long: bool) {
    if !long {
        println!("{}", file.name());
        return;
    }
    let compression = cabinet
        .folder_entries()
        .nth(file.folder_index())
        .and_then(|folder| folder.compression_type().ok())
        .map(|ctype| ctype.to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{}{}{}{}{}{} {:<10} {:>10} {} {}",
        if file.is_read_only() { 'R' } else { '-' },
        if file.is_hidden() { 'H' } else { '-' },
        if file.is_system() { 'S' } else { '-' },
        if file.is_archive() { 'A' } else { '-' },
        if file.is_exec() { 'E' } else { '-' },
        if file.is_name_utf() { 'U' } else { '-' },
        compression,
        file.uncompressed_size(),
        file.datetime()
            .map(|dt| dt.to_string())
            .unwrap_or_else(|| "invalid datetime".to_string()),
        file.name()
    );
}

/// Keep extraction inside the output directory: convert DOS separators,
/// drop drive prefixes, leading slashes and `..` components.
fn sanitize_name(name: &str) -> PathBuf {
    let name = name.replace('\\', "/");
    let mut path = PathBuf::new();
    for component in Path::new(&name).components() {
        if let Component::Normal(part) = component {
            if part != ".." {
                path.push(part);
            }
        }
    }
    if path.as_os_str().is_empty() {
        path.push("unnamed");
    }
    path
}

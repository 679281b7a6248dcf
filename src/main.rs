mod abbrev;
mod elf;
mod error;
mod info;
mod line;
mod loc;
mod stream;

use memmap::Mmap;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let path = {
        let mut args: Vec<String> = std::env::args().collect();
        if args.len() != 2 {
            usage(args);
            std::process::exit(1);
        }
        args.swap_remove(1)
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&path) {
        eprintln!("{}: {}", path, err);
        std::process::exit(1);
    }
}

fn usage(args: Vec<String>) {
    println!("usage: {} FILENAME", args[0]);
}

fn run(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    // Safety: the mapping is read-only and the decoder never outlives it.
    let mmap = unsafe { Mmap::map(&file)? };
    let bytes: &[u8] = &mmap;

    let elf = elf::ElfFile::parse(bytes)?;
    print!("{}", elf);
    let sections = elf.debug_sections()?;
    debug!(
        lines = sections.lines.len(),
        has_str = sections.strings.is_some(),
        has_loc = sections.loc.is_some(),
        "located debug sections"
    );

    // The abbreviation tables come first; every compilation unit refers
    // into them.
    let abbrevs = abbrev::parse_section(sections.abbrev)?;
    println!(".debug_abbrev contents:");
    for (offset, table) in &abbrevs {
        println!("abbreviation table at offset {:#x}:", offset);
        print!("{}", table);
    }

    println!(".debug_info contents:");
    let debug_info = info::DebugInfo::new(
        sections.info,
        elf.width,
        sections.strings,
        sections.loc.map(loc::DebugLoc::new),
    );
    for unit in debug_info.parse_units(&abbrevs)? {
        print!("{}", unit);
    }

    for line_bytes in &sections.lines {
        println!(".debug_line contents:");
        let unit = line::LineUnit::parse(line_bytes)?;
        print!("{}", unit);
        for step in unit.execute(elf.width) {
            println!("  {}", step?);
        }
    }

    Ok(())
}

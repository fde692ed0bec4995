use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use skyrim_save_editor::{RefId, Result, SaveFile};

/// Inspect and clean Skyrim / Fallout 4 save files
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print header fields and section counts
    Info(FileArgs),

    /// List the plugins the save depends on
    Plugins(FileArgs),

    /// Read the save, write it back and compare the bytes
    Verify(FileArgs),

    /// Decode and print one change form
    Show(ShowArgs),

    /// Remove null entries from form lists
    CleanseFlst(EditArgs),

    /// Zero out stored havok movement data
    ResetHavok(EditArgs),
}

#[derive(Args)]
struct FileArgs {
    /// Path to the save file (.ess, .fos or .sav0)
    file: PathBuf,
}

#[derive(Args)]
struct ShowArgs {
    /// Path to the save file (.ess, .fos or .sav0)
    file: PathBuf,

    /// Packed ref-id as six hex digits, e.g. 40A2C1
    refid: String,
}

#[derive(Args)]
struct EditArgs {
    /// Path to the save file (.ess, .fos or .sav0)
    file: PathBuf,

    /// Where to write the edited save
    #[arg(short, long)]
    output: PathBuf,
}

fn load(path: &Path) -> Result<SaveFile> {
    let buffer = fs::read(path)?;
    let filename = path.file_name().and_then(|name| name.to_str());
    let save = SaveFile::read(&buffer, filename)?;
    if save.broken() {
        log::warn!(
            "{}: some sections did not parse; editing is disabled",
            path.display()
        );
    }
    Ok(save)
}

fn info(args: &FileArgs) -> Result<()> {
    let save = load(&args.file)?;
    let header = &save.header;
    println!("game:      {:?} (save version {})", save.game(), header.version);
    println!(
        "character: {} (level {})",
        header.player_name, header.player_level
    );
    println!("location:  {}", header.player_location);
    println!("game date: {}", header.game_date);
    println!("save #:    {}", header.save_number);
    println!("form version: {}", save.form_version);
    if let Some(ref version) = save.version_string {
        println!("patch:     {version}");
    }
    println!(
        "plugins:   {} full, {} light",
        save.plugins.full().len(),
        save.plugins.lite().map_or(0, <[_]>::len)
    );
    println!(
        "sections:  {} + {} + {} global data blocks, {} change forms",
        save.table1.len(),
        save.table2.len(),
        save.table3.len(),
        save.change_forms.len()
    );
    println!("form ids:  {}", save.form_ids.len());
    println!("digest:    {:016x}", save.digest());

    let counts = save.change_form_counts();
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    println!("change forms by kind:");
    for (kind, count) in counts.into_iter().take(10) {
        println!("  {kind}: {count}");
    }
    Ok(())
}

fn plugins(args: &FileArgs) -> Result<()> {
    let save = load(&args.file)?;
    for plugin in save.plugins.full() {
        println!("{}", plugin.index_name());
    }
    for plugin in save.plugins.lite().unwrap_or(&[]) {
        println!("{}", plugin.index_name());
    }
    Ok(())
}

fn verify(args: &FileArgs) -> Result<()> {
    let buffer = fs::read(&args.file)?;
    let filename = args.file.file_name().and_then(|name| name.to_str());
    let save = SaveFile::read(&buffer, filename)?;
    if save.broken() {
        log::error!("save is broken, nothing to verify against");
        return Ok(());
    }

    let written = save.write()?;
    if save.header.compression_type().is_compressed() {
        // The compressor may pick a different encoding than the game did,
        // so compare the decompressed bodies by reading our output back.
        let reread = SaveFile::read(&written, filename)?;
        if reread.digest() == save.digest() {
            println!(
                "ok: decompressed round trip matches ({} bytes)",
                written.len()
            );
        } else {
            println!("MISMATCH: decompressed bodies differ");
        }
    } else if written == buffer {
        println!("ok: byte-identical round trip ({} bytes)", written.len());
    } else {
        println!(
            "MISMATCH: wrote {} bytes, original was {}",
            written.len(),
            buffer.len()
        );
    }
    Ok(())
}

fn show(args: &ShowArgs) -> Result<()> {
    let save = load(&args.file)?;
    let raw = u32::from_str_radix(args.refid.trim_start_matches("0x"), 16)
        .ok()
        .and_then(RefId::from_raw);
    let Some(refid) = raw else {
        eprintln!("'{}' is not a packed 24-bit ref-id", args.refid);
        return Ok(());
    };
    let Some(form) = save.find_change_form(refid) else {
        println!("no change form with ref-id {refid}");
        return Ok(());
    };

    println!("ref-id:  {refid} ({:?})", refid.kind());
    match refid.resolve(&save.plugins, &save.form_ids) {
        Some((plugin, local)) => println!("form:    {:06X} in [{}]", local, plugin.index_name()),
        None => println!("form:    unresolved"),
    }
    println!("kind:    {} (version {})", form.kind, form.version);
    println!("flags:   {}", form.change_flags);
    println!(
        "payload: {} bytes{}",
        form.raw().len(),
        if form.compressed() { ", zlib" } else { "" }
    );
    match form.parse_body(true) {
        Ok(body) => println!("body:    {body}"),
        Err(err) => println!("body:    unreadable ({err})"),
    }
    Ok(())
}

fn cleanse_flst(args: &EditArgs) -> Result<()> {
    let mut save = load(&args.file)?;
    let (entries, forms) = save.cleanse_form_lists();
    log::info!("removed {entries} null entries across {forms} form lists");
    if forms > 0 {
        fs::write(&args.output, save.write()?)?;
        println!(
            "removed {entries} entries from {forms} form lists -> {}",
            args.output.display()
        );
    } else {
        println!("nothing to cleanse");
    }
    Ok(())
}

fn reset_havok(args: &EditArgs) -> Result<()> {
    let mut save = load(&args.file)?;
    let (successes, failures) = save.reset_havok();
    log::info!("reset havok on {successes} references, {failures} failed");
    if successes > 0 {
        fs::write(&args.output, save.write()?)?;
        println!(
            "reset {successes} references ({failures} skipped) -> {}",
            args.output.display()
        );
    } else {
        println!("no havok data to reset ({failures} records skipped)");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Info(args) => info(args),
        Commands::Plugins(args) => plugins(args),
        Commands::Verify(args) => verify(args),
        Commands::Show(args) => show(args),
        Commands::CleanseFlst(args) => cleanse_flst(args),
        Commands::ResetHavok(args) => reset_havok(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

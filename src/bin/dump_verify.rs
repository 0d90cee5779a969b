//! dump_verify - check a framebridged dump file
//!
//! Reads packed frame-pair records until end of file and reports each
//! record's dimensions and centre depth. Fails on the first malformed or
//! truncated record.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;

use framebridge::wire;

#[derive(Parser, Debug)]
#[command(
    name = "dump_verify",
    about = "Verify a framebridged dump file (packed depth + color records)"
)]
struct Args {
    /// Path to the dump file
    #[arg(value_name = "PATH")]
    path: String,

    /// Only print the summary line
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let file = File::open(&args.path).with_context(|| format!("failed to open {}", args.path))?;
    let mut reader = BufReader::new(file);

    let mut records: u64 = 0;
    let mut bytes: usize = 0;
    loop {
        let pair = wire::read_pair(&mut reader, records + 1)
            .with_context(|| format!("record {} is malformed", records + 1))?;
        let Some(pair) = pair else {
            break;
        };
        records += 1;
        bytes += wire::record_len(&pair);
        if !args.quiet {
            let depth = pair.depth();
            let color = pair.color();
            let centre = depth.depth_at(depth.width() / 2, depth.height() / 2);
            println!(
                "#{:<6} depth {}x{} color {}x{} centre={}",
                pair.sequence,
                depth.width(),
                depth.height(),
                color.width(),
                color.height(),
                centre.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
            );
        }
    }

    println!("OK: {} records, {} bytes in {}", records, bytes, args.path);
    Ok(())
}

//! pdftext - Extract positioned text from PDF files
//!
//! Outputs either plain text (content-stream order) or a JSON array of
//! positioned runs per page.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use vellum_core::error::Result;
use vellum_core::high_level::{extract_page_text, open_document};

/// Extract text from PDF files.
#[derive(Parser, Debug)]
#[command(name = "pdftext")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// One or more paths to PDF files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to file where output is written, or "-" for stdout
    #[arg(short = 'o', long, default_value = "-")]
    outfile: String,

    /// A comma-separated list of page numbers to extract (1-indexed)
    #[arg(short = 'p', long = "pages")]
    pages: Option<String>,

    /// The maximum number of pages to extract (0 = no limit)
    #[arg(short = 'm', long, default_value = "0")]
    maxpages: usize,

    /// Emit positioned runs as JSON instead of plain text
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
}

#[derive(Serialize)]
struct RunRecord {
    text: String,
    dir: &'static str,
    x: f64,
    y: f64,
    angle: f64,
    size: f64,
}

#[derive(Serialize)]
struct PageRecord {
    page: usize,
    runs: Vec<RunRecord>,
}

fn parse_pages(spec: Option<&str>) -> Option<Vec<usize>> {
    let nums: Vec<usize> = spec?
        .split(',')
        .filter_map(|s| s.trim().parse::<usize>().ok())
        .map(|n| n.saturating_sub(1))
        .collect();
    if nums.is_empty() { None } else { Some(nums) }
}

fn selected_pages(num_pages: usize, args: &Args) -> Vec<usize> {
    let mut pages: Vec<usize> = match parse_pages(args.pages.as_deref()) {
        Some(nums) => nums.into_iter().filter(|&n| n < num_pages).collect(),
        None => (0..num_pages).collect(),
    };
    if args.maxpages > 0 {
        pages.truncate(args.maxpages);
    }
    pages
}

fn process_file<W: Write>(path: &PathBuf, writer: &mut W, args: &Args) -> Result<()> {
    let file = File::open(path)?;
    // Safety: the mapping is read-only and lives for the duration of the
    // extraction; concurrent truncation of the input is not supported.
    let mmap = unsafe { Mmap::map(&file)? };

    let doc = open_document(&mmap[..])?;
    let pages = selected_pages(doc.num_pages(), args);

    // Pages are independent once the document is open.
    let extracted: Vec<(usize, Result<_>)> = pages
        .par_iter()
        .map(|&index| (index, extract_page_text(&doc, index)))
        .collect();

    if args.json {
        let mut records = Vec::new();
        for (index, items) in extracted {
            let runs = items?
                .into_iter()
                .map(|item| RunRecord {
                    text: item.text,
                    dir: item.dir.as_str(),
                    x: item.x,
                    y: item.y,
                    angle: item.angle,
                    size: item.size,
                })
                .collect();
            records.push(PageRecord {
                page: index + 1,
                runs,
            });
        }
        serde_json::to_writer_pretty(&mut *writer, &records).map_err(io::Error::other)?;
        writeln!(writer)?;
    } else {
        for (_, items) in extracted {
            for item in items? {
                writer.write_all(item.text.as_bytes())?;
            }
            writeln!(writer)?;
        }
    }
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut output: Box<dyn Write> = if args.outfile == "-" {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        let file = File::create(&args.outfile)
            .map_err(|e| format!("Failed to create output file {}: {}", args.outfile, e))?;
        Box::new(BufWriter::new(file))
    };

    for path in &args.files {
        if !path.exists() {
            eprintln!("Error: File not found: {}", path.display());
            std::process::exit(1);
        }
        if let Err(e) = process_file(path, &mut output, &args) {
            eprintln!("Error processing {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    output.flush()?;
    Ok(())
}

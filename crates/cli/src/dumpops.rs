//! dumpops - Dump page operator lists
//!
//! Runs content interpretation over each requested page and prints the
//! normalized operator stream, either as readable lines or as JSON.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{ArgAction, Parser, ValueEnum};
use memmap2::Mmap;
use serde::Serialize;
use vellum_core::error::Result;
use vellum_core::high_level::{open_document, page_operator_list};
use vellum_core::interp::{
    EvaluatorOptions, ObjPayload, Operand, OperatorChunk, RenderIntent, RenderSink,
};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Intent {
    /// On-screen rendering (default)
    #[default]
    Display,
    /// Print rendering
    Print,
}

impl From<Intent> for RenderIntent {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Display => RenderIntent::Display,
            Intent::Print => RenderIntent::Print,
        }
    }
}

/// Dump the operator lists of PDF pages.
#[derive(Parser, Debug)]
#[command(name = "dumpops")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// One or more paths to PDF files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to file where output is written, or "-" for stdout
    #[arg(short = 'o', long, default_value = "-")]
    outfile: String,

    /// A comma-separated list of page numbers to dump (1-indexed)
    #[arg(short = 'p', long = "pages")]
    pages: Option<String>,

    /// Rendering intent
    #[arg(short = 'i', long, value_enum, default_value = "display")]
    intent: Intent,

    /// Keep per-operation parse errors fatal instead of skipping
    #[arg(long = "strict", action = ArgAction::SetTrue)]
    strict: bool,

    /// Emit JSON instead of readable lines
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
}

/// Collects everything the evaluation streams out, for printing after
/// the page completes.
#[derive(Default)]
struct CollectSink {
    chunks: Mutex<Vec<OperatorChunk>>,
    objects: Mutex<Vec<(String, String)>>,
}

impl RenderSink for CollectSink {
    fn start_render_page(&self, _page_index: usize, _intent: RenderIntent, _blend: bool) {}

    fn render_chunk(&self, chunk: OperatorChunk) {
        self.chunks.lock().unwrap().push(chunk);
    }

    fn send_object(&self, obj_id: &str, payload: ObjPayload) {
        let kind = match payload {
            ObjPayload::Font { base_font, .. } => format!("font {base_font}"),
            ObjPayload::ImageStream { width, height, .. } => format!("image {width}x{height}"),
            ObjPayload::JpegStream(data) => format!("jpeg {} bytes", data.len()),
        };
        self.objects.lock().unwrap().push((obj_id.to_string(), kind));
    }
}

#[derive(Serialize)]
struct OpRecord {
    op: &'static str,
    args: Vec<String>,
}

#[derive(Serialize)]
struct PageDump {
    page: usize,
    total_ops: usize,
    objects: BTreeMap<String, String>,
    ops: Vec<OpRecord>,
}

/// One-line rendering of an operand, with bulk payloads summarized.
fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Null => "null".to_string(),
        Operand::Bool(b) => b.to_string(),
        Operand::Int(i) => i.to_string(),
        Operand::Real(r) => format!("{r:.4}"),
        Operand::Name(n) => format!("/{n}"),
        Operand::Str(s) => format!("({} bytes)", s.len()),
        Operand::Array(items) => {
            let inner: Vec<String> = items.iter().map(describe).collect();
            format!("[{}]", inner.join(" "))
        }
        Operand::Dict(entries) => format!("<<{} entries>>", entries.len()),
        Operand::Id(id) => id.clone(),
        Operand::Image(img) => format!("image {}x{} {:?}", img.width, img.height, img.kind),
        Operand::Positions(p) => format!("{} positions", p.len() / 2),
        Operand::Placements(p) => format!("{} placements", p.len()),
        Operand::Masks(m) => format!("{} masks", m.len()),
        Operand::Group(g) => format!(
            "group isolated={} knockout={} smask={}",
            g.isolated, g.knockout, g.smask
        ),
        Operand::Tiling(t) => format!(
            "tiling {} ops xstep={} ystep={}",
            t.operator_list.ops.len(),
            t.xstep,
            t.ystep
        ),
    }
}

fn parse_pages(spec: Option<&str>, num_pages: usize) -> Vec<usize> {
    match spec {
        Some(spec) => spec
            .split(',')
            .filter_map(|s| s.trim().parse::<usize>().ok())
            .map(|n| n.saturating_sub(1))
            .filter(|&n| n < num_pages)
            .collect(),
        None => (0..num_pages).collect(),
    }
}

fn process_file<W: Write>(path: &PathBuf, writer: &mut W, args: &Args) -> Result<()> {
    let file = File::open(path)?;
    // Safety: read-only mapping held for the duration of the dump.
    let mmap = unsafe { Mmap::map(&file)? };

    let doc = open_document(&mmap[..])?;
    let options = EvaluatorOptions {
        ignore_errors: !args.strict,
        ..EvaluatorOptions::default()
    };

    if !args.json {
        writeln!(
            writer,
            "{}: version {}, {} pages",
            path.display(),
            doc.version(),
            doc.num_pages()
        )?;
    }

    let mut dumps = Vec::new();
    for index in parse_pages(args.pages.as_deref(), doc.num_pages()) {
        let sink = CollectSink::default();
        let total = page_operator_list(&doc, index, Some(&sink), args.intent.into(), options, None)?;

        let chunks = sink.chunks.into_inner().unwrap();
        let objects: BTreeMap<String, String> = sink.objects.into_inner().unwrap().into_iter().collect();
        let mut ops = Vec::new();
        for chunk in chunks {
            for (op, operands) in chunk.ops.iter().zip(&chunk.args) {
                ops.push(OpRecord {
                    op: op.name(),
                    args: operands.iter().map(describe).collect(),
                });
            }
        }

        if args.json {
            dumps.push(PageDump {
                page: index + 1,
                total_ops: total,
                objects,
                ops,
            });
        } else {
            writeln!(writer, "page {} ({} ops)", index + 1, total)?;
            for (id, kind) in &objects {
                writeln!(writer, "  obj {id}: {kind}")?;
            }
            for record in &ops {
                writeln!(writer, "  {} {}", record.op, record.args.join(" "))?;
            }
        }
    }

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, &dumps).map_err(io::Error::other)?;
        writeln!(writer)?;
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

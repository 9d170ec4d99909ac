use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use peek_core::{decode_image, machine_name, DecodedImage, Field, Fields, Header};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Simple PE header introspection CLI
#[derive(Parser)]
#[command(
    name = "peek",
    about = "Inspect the DOS and NT headers of PE executables",
    version,
    author
)]
struct Cli {
    /// Path to binary file
    #[arg(required = true)]
    path: std::path::PathBuf,

    /// Print the decoded headers as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Show a one-line summary of the image
    Summary,
    /// Show the DOS header
    Dos,
    /// Show the NT headers (signature, file header, optional header)
    Nt,
    /// Show every decoded header
    All,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "PARAMETER")]
    name: &'static str,
    #[tabled(rename = "VALUE(DEC)")]
    dec: u64,
    #[tabled(rename = "VALUE(HEX)")]
    hex: String,
    #[tabled(rename = "ASCII")]
    ascii: String,
}

impl From<&Field> for FieldRow {
    fn from(field: &Field) -> Self {
        let ascii = field
            .value
            .to_le_bytes()
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        FieldRow {
            name: field.name,
            dec: field.value.as_u64(),
            hex: format!(
                "{:0width$x}",
                field.value.as_u64(),
                width = field.value.width() * 2
            ),
            ascii,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    path: String,
    format: &'static str,
    image: &'a DecodedImage,
}

fn print_table(title: &str, fields: &[Field]) {
    println!("{}", title.bold().cyan());
    let rows: Vec<FieldRow> = fields.iter().map(FieldRow::from).collect();
    println!("{}", Table::new(rows).with(Style::psql()));
    println!();
}

fn print_summary(image: &DecodedImage) {
    let machine = image.machine();
    let name = machine_name(machine).unwrap_or("unknown");
    println!(
        "{} {} machine {:#06x} ({}), entry 0x{:x}, image base 0x{:x}, subsystem {}, optional header {} bytes{}",
        "Format:".bold(),
        image.format_name(),
        machine,
        name,
        image.entry_point(),
        image.optional_header.image_base(),
        image.optional_header.subsystem(),
        image.optional_header.size(),
        if image.is_executable() { ", executable" } else { "" }
    );
    if !image.nt_header.has_pe_signature() {
        println!(
            "{} NT signature {:#010x} is not PE\\0\\0",
            "warning:".yellow().bold(),
            image.nt_header.signature
        );
    }
}

fn print_dos(image: &DecodedImage) {
    print_table("---DOS Header---", &image.dos_header.fields());
}

fn print_nt(image: &DecodedImage) {
    print_table(
        "---NT Header---",
        &[Field::new("Signature", image.nt_header.signature)],
    );
    print_table("-File Header-", &image.nt_header.file_header.fields());
    let title = if image.is_64() {
        "-Optional Header(64-bit)-"
    } else {
        "-Optional Header(32-bit)-"
    };
    print_table(title, &image.optional_header.fields());
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        err.print().ok();
        std::process::exit(if err.use_stderr() { 1 } else { 0 })
    });

    let image = decode_image(&cli.path)
        .with_context(|| format!("failed to decode {}", cli.path.display()))?;
    log::info!("Decoded {} image", image.format_name());

    if cli.json {
        let report = JsonReport {
            path: cli.path.display().to_string(),
            format: image.format_name(),
            image: &image,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match cli.command.unwrap_or(Command::All) {
        Command::Summary => print_summary(&image),
        Command::Dos => print_dos(&image),
        Command::Nt => print_nt(&image),
        Command::All => {
            print_dos(&image);
            print_nt(&image);
        }
    }

    Ok(())
}

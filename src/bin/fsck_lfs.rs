// src/bin/fsck_lfs.rs
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use lfs::fsck::run_fsck;
use lfs::{config, BlockDevice, FileDevice, Lfs};

#[derive(Parser)]
#[command(name = "fsck.lfs", about = "Verifica una imagen de sistema de archivos log-structured")]
struct Cli {
    /// Archivo INI que indica la imagen
    #[arg(short, long, conflicts_with = "image")]
    config: Option<String>,

    /// Imagen a verificar directamente
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Mostrar también las advertencias
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    // 1. Resolver la ruta de la imagen
    let image = match (&cli.config, &cli.image) {
        (Some(path), _) => {
            config::load_config(path)
                .with_context(|| format!("No se pudo leer la configuración {}", path))?
                .image_path
        }
        (None, Some(image)) => image.clone(),
        (None, None) => anyhow::bail!("Uso: fsck.lfs --config lfs.ini | --image disk.img"),
    };

    // 2. Montar; fsck nunca hace checkpoint, la imagen queda intacta
    let device: Arc<dyn BlockDevice> = Arc::new(
        FileDevice::open(&image).with_context(|| format!("No se pudo abrir la imagen {:?}", image))?,
    );
    let lfs = Lfs::mount(device).with_context(|| format!("No se pudo montar {:?}", image))?;

    let rep = run_fsck(&lfs);

    println!("\n{}", " LFS FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());
    println!(
        "  imagen {:?}, {} inodos, {} bloques vivos, log en {}/{}",
        image,
        rep.inodes_checked,
        rep.blocks_referenced,
        lfs.segments().cursor(),
        lfs.superblock().log_end()
    );

    // ——————————————————————————————————————————
    //       RESULTADOS POR SECCIÓN
    // ——————————————————————————————————————————
    section("Superbloque", rep.superblock_ok);
    section("Inodos", rep.inodes_ok);
    section("Bloques", rep.blocks_ok);

    // ——————————————————————————————————————————
    //       ERRORES DETALLADOS
    // ——————————————————————————————————————————
    println!("\n{}", "Errores detectados".bold().underline());
    if rep.errors.is_empty() {
        println!("  {} No se encontraron errores", "✓".green());
    } else {
        for err in &rep.errors {
            println!("  {} {}", "•".red(), err.red());
        }
    }

    if cli.verbose && !rep.warnings.is_empty() {
        println!("\n{}", "Advertencias".bold().underline());
        for w in &rep.warnings {
            println!("  {} {}", "•".yellow(), w.yellow());
        }
    }

    // ——————————————————————————————————————————
    //       RESUMEN FINAL
    // ——————————————————————————————————————————
    println!("\n{}", "Resumen".bold().underline());
    if rep.is_clean() {
        println!(
            "{} Sistema de archivos limpio ({} advertencias).\n",
            "✓ OK".green().bold(),
            rep.warnings.len()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "{} {} errores encontrados.\n",
            "✗ FSCK completado con errores:".red().bold(),
            rep.errors.len().to_string().yellow()
        );
        Ok(ExitCode::FAILURE)
    }
}

fn section(title: &str, ok: bool) {
    println!("\n{}", title.bold().underline());
    if ok {
        println!("  {} {} OK", "✓".green(), title);
    } else {
        println!("  {} Errores en {}", "✗".red(), title.to_lowercase());
    }
}

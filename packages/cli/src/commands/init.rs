use anyhow::Result;
use clap::Args;
use colored::Colorize;
use folio_store::{FolioConfig, IdGeneratorKind, DEFAULT_CONFIG_NAME};
use std::path::Path;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Name of the top-level block map
    #[arg(short, long, default_value = "blocks")]
    pub blocks_key: String,

    /// Use deterministic `<seed>-<n>` ids instead of UUIDs
    #[arg(short, long)]
    pub sequential: bool,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &Path) -> Result<()> {
    let config_path = cwd.join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    let mut config = FolioConfig::default();
    config.store.blocks_key = args.blocks_key;
    if args.sequential {
        config.store.id_generator = IdGeneratorKind::Sequential;
    }

    config.save(cwd)?;

    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("An empty \"schema\" list uses the built-in page/note/paragraph flavours.");
    println!("Next: folio apply <script.json> --out doc.bin");

    Ok(())
}

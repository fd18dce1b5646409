use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use folio_store::{Block, Doc, FolioConfig, PropValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Update file written by `folio apply --out`
    pub state: PathBuf,

    /// Document id
    #[arg(short, long, default_value = "doc")]
    pub doc_id: String,

    /// Print the blocks as JSON instead of a tree
    #[arg(long)]
    pub json: bool,
}

pub fn inspect(args: InspectArgs, cwd: &Path) -> Result<()> {
    let doc = open_document(cwd, &args.doc_id, Some(&args.state))?;

    if args.json {
        let blocks: Vec<&Block> = doc.get_blocks();
        println!("{}", serde_json::to_string_pretty(&blocks)?);
    } else {
        print_tree(&doc);
    }
    Ok(())
}

/// Build and load a document from the config in `cwd`, seeded with `state`
pub(crate) fn open_document(cwd: &Path, doc_id: &str, state: Option<&Path>) -> Result<Doc> {
    let config = FolioConfig::load(cwd)?;
    let schema = Arc::new(config.schema.to_schema());
    let mut doc = Doc::new(doc_id, yrs::Doc::new(), schema, config.store);

    if let Some(state) = state {
        let path = cwd.join(state);
        let update = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        tracing::debug!(bytes = update.len(), path = %path.display(), "applying saved state");
        doc.apply_update(&update)?;
    }

    doc.load()?;
    Ok(doc)
}

pub(crate) fn print_tree(doc: &Doc) {
    let Some(root) = doc.root() else {
        println!("{}", "(empty document)".dimmed());
        return;
    };

    let mut stack = vec![(root, 0usize)];
    while let Some((block, depth)) = stack.pop() {
        println!("{}{}", "  ".repeat(depth), format_block(block));
        for child in doc.children(&block.id).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    println!();
    println!("{} blocks", doc.block_count());
}

fn format_block(block: &Block) -> String {
    let props: Vec<String> = block
        .props
        .iter()
        .map(|(name, value)| format!("{}={}", name, format_prop(value)))
        .collect();

    format!(
        "{} {} {}",
        block.flavour.bright_blue().bold(),
        block.id.dimmed(),
        props.join(" ")
    )
}

fn format_prop(value: &PropValue) -> String {
    match value {
        PropValue::Text(text) => format!("{:?}", text).green().to_string(),
        other => serde_json::Value::from(other.clone()).to_string(),
    }
}

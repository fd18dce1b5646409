use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use folio_store::{Doc, Mutation, MutationResult};
use std::path::{Path, PathBuf};

use super::inspect::{open_document, print_tree};

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// JSON file holding an array of mutations
    pub script: PathBuf,

    /// Start from this update file instead of an empty document
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    /// Write the resulting state to this file
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Document id
    #[arg(short, long, default_value = "doc")]
    pub doc_id: String,

    /// Don't print the resulting tree
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn apply(args: ApplyArgs, cwd: &Path) -> Result<()> {
    let script_path = cwd.join(&args.script);
    let script = std::fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read {}", script_path.display()))?;
    let mutations: Vec<Mutation> = serde_json::from_str(&script)
        .with_context(|| format!("invalid mutation script {}", script_path.display()))?;
    tracing::debug!(count = mutations.len(), script = %script_path.display(), "loaded mutation script");

    let mut doc = open_document(cwd, &args.doc_id, args.state.as_deref())?;
    run_script(&mut doc, mutations)?;

    if !args.quiet {
        println!();
        print_tree(&doc);
    }

    if let Some(out) = &args.out {
        let path = cwd.join(out);
        std::fs::write(&path, doc.encode_state())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{} Wrote {}", "✓".green(), path.display());
    }

    Ok(())
}

/// Apply every mutation in order, stopping at the first failure
pub(crate) fn run_script(doc: &mut Doc, mutations: Vec<Mutation>) -> Result<Vec<MutationResult>> {
    let mut results = Vec::with_capacity(mutations.len());

    for (index, mutation) in mutations.into_iter().enumerate() {
        let name = mutation.name();
        match doc.apply(mutation) {
            Ok(result) => {
                let detail = match &result {
                    MutationResult::Added(ids) => ids.join(", "),
                    MutationResult::Applied => String::new(),
                    MutationResult::Skipped => "skipped".yellow().to_string(),
                };
                println!("  {} {} {}", "✓".green(), name, detail);
                results.push(result);
            }
            Err(err) => {
                println!("  {} {}", "✗".red(), name);
                return Err(err).with_context(|| format!("mutation #{} ({}) failed", index, name));
            }
        }
    }

    Ok(results)
}

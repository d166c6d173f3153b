//! Collaborative Notebook Example
//!
//! Two replicas of one notebook edit cells concurrently, exchange their
//! updates and end up with the same document. Also shows the change feed
//! and undo, which only ever reverts the local user's own edits.
//!
//! Run with: cargo run --example notebook_collab

use serde_json::json;
use tokio::sync::broadcast;
use ynb_doc::{
    CodeCell, DocConfig, MarkdownCell, NotebookModel, Result, SharedCell, Update,
};

/// Forward every pending update from one replica's feed to another replica.
fn pump(feed: &mut broadcast::Receiver<Update>, to: &NotebookModel) -> Result<usize> {
    let mut forwarded = 0;
    while let Ok(update) = feed.try_recv() {
        to.apply_update(&update)?;
        forwarded += 1;
    }
    Ok(forwarded)
}

fn print_cells(name: &str, notebook: &NotebookModel) -> Result<()> {
    println!("{}'s notebook:", name);
    for (idx, cell) in notebook.cells().iter().enumerate() {
        println!("  [{}] {:<8} {:?}", idx, cell.cell_type().to_string(), cell.source()?);
    }
    Ok(())
}

fn main() -> Result<()> {
    println!("=== Collaborative Notebook Demo ===\n");

    let alice = NotebookModel::with_config(&DocConfig::builder().client_id(1).build());
    let bob = NotebookModel::with_config(&DocConfig::builder().client_id(2).build());

    let mut alice_feed = alice.subscribe_updates();
    let mut bob_feed = bob.subscribe_updates();
    let mut bob_changes = bob.subscribe();

    // Alice writes the first two cells
    let title = MarkdownCell::create(None)?;
    title.set_source("# Analysis")?;
    alice.insert_cell(0, title)?;

    let code = CodeCell::create(None)?;
    code.set_source("import pandas as pd")?;
    alice.insert_cell(1, code)?;

    println!("Alice -> Bob: {} update(s)", pump(&mut alice_feed, &bob)?);
    while let Ok(change) = bob_changes.try_recv() {
        if let Some(ids) = change.cell_ids_change() {
            println!("  Bob saw cell list change: {:?}", ids);
        }
    }
    println!();

    // Concurrent edits: Alice appends, Bob edits the code cell and adds a cell on top
    let plot = CodeCell::create(None)?;
    plot.set_source("df.plot()")?;
    alice.insert_cell(2, plot)?;

    if let Some(cell) = bob.get_cell(1) {
        let end = cell.source()?.chars().count();
        cell.update_source(end, end, "\ndf = pd.read_csv('data.csv')")?;
    }
    let intro = MarkdownCell::create(None)?;
    intro.set_source("Notes from Bob")?;
    bob.insert_cell(0, intro)?;

    pump(&mut alice_feed, &bob)?;
    pump(&mut bob_feed, &alice)?;

    print_cells("Alice", &alice)?;
    print_cells("Bob", &bob)?;
    println!("Converged: {}\n", alice.to_json()? == bob.to_json()?);

    // Alice runs the plot cell; outputs bypass the undo history
    if let Some(cell) = alice.get_cell(2) {
        if let Some(code) = cell.as_code() {
            code.set_execution_count(Some(1))?;
            code.set_outputs(vec![json!({"output_type": "stream", "name": "stdout", "text": "ok\n"})])?;
        }
    }

    // Bob rolls back his own edits; Alice's work is kept
    bob.stop_capturing();
    while bob.can_undo() {
        bob.undo()?;
    }
    pump(&mut alice_feed, &bob)?;
    pump(&mut bob_feed, &alice)?;

    println!("After Bob undid his edits:");
    print_cells("Alice", &alice)?;
    println!("Converged: {}\n", alice.to_json()? == bob.to_json()?);

    // A new participant loads the whole state at once
    let carol = NotebookModel::with_config(&DocConfig::builder().client_id(3).build());
    let bytes = alice.encode_state_as_update()?.encode()?;
    carol.apply_update(&Update::decode(&bytes)?)?;
    println!("Carol joined with {} cells ({} bytes of state)", carol.len(), bytes.len());

    println!("\nNotebook JSON:");
    println!("{}", serde_json::to_string_pretty(&carol.to_json()?)?);

    Ok(())
}

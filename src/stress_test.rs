use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use ynb_doc::{
    Cell, CodeCell, DocConfig, MarkdownCell, NotebookModel, RawCell, Result, SharedCell, Update,
};

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_replicas: usize,
    pub operations_per_replica: usize,
    pub updates_delivered: usize,
    pub failed_operations: usize,
    pub final_cells: usize,
    pub converged: bool,
    pub total_time: Duration,
    pub avg_apply_time: Duration,
    pub ops_per_second: f64,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Operations per Replica:    {:>30} ║", self.operations_per_replica);
        println!("║  Updates Delivered:         {:>30} ║", self.updates_delivered);
        println!("║  Rejected Operations:       {:>30} ║", self.failed_operations);
        println!("║  Cells After Sync:          {:>30} ║", self.final_cells);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Apply Time:        {:>28}µs ║", format!("{:.2}", self.avg_apply_time.as_secs_f64() * 1e6));
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Generator that yields `(source, target, update)` deliveries in random order.
///
/// Every update of every replica is delivered once to every other replica,
/// so each target sees remote updates out of causal order.
fn update_delivery_generator(batch_sizes: Vec<usize>) -> impl Stream<Item = (usize, usize, usize)> {
    stream! {
        let mut rng = StdRng::from_entropy();
        let num_replicas = batch_sizes.len();
        let mut deliveries = Vec::new();
        for (source, &size) in batch_sizes.iter().enumerate() {
            for target in (0..num_replicas).filter(|t| *t != source) {
                deliveries.extend((0..size).map(|idx| (source, target, idx)));
            }
        }
        deliveries.shuffle(&mut rng);
        for delivery in deliveries {
            yield delivery;
        }
    }
}

fn new_cell(rng: &mut StdRng, id: String) -> Result<Cell> {
    Ok(match rng.gen_range(0..10) {
        0..=5 => CodeCell::create(Some(id))?.into(),
        6..=8 => MarkdownCell::create(Some(id))?.into(),
        _ => RawCell::create(Some(id))?.into(),
    })
}

/// One random local edit: insert, delete, move or a source splice.
fn random_edit(notebook: &NotebookModel, rng: &mut StdRng, replica: usize, step: usize) -> Result<()> {
    let len = notebook.len();
    let roll = rng.gen_range(0..100);

    if len == 0 || roll < 30 {
        let cell = new_cell(rng, format!("r{}-{}", replica, step))?;
        notebook.insert_cell(rng.gen_range(0..=len), cell)
    } else if roll < 45 {
        notebook.delete_cell(rng.gen_range(0..len))
    } else if roll < 55 {
        notebook.move_cell(rng.gen_range(0..len), rng.gen_range(0..len))
    } else {
        let Some(cell) = notebook.get_cell(rng.gen_range(0..len)) else {
            return Ok(());
        };
        let source_len = cell.source()?.chars().count();
        let start = rng.gen_range(0..=source_len);
        let end = (start + rng.gen_range(0..4)).min(source_len);
        let text: String = (0..rng.gen_range(0..6))
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        cell.update_source(start, end, &text)
    }
}

/// Multi-replica notebook stress test.
///
/// Phase 1 edits every replica concurrently in its own task, recording the
/// updates it emits. Phase 2 cross-delivers all updates in random order.
/// Phase 3 checks that every replica serializes to the same notebook.
pub async fn stress_test_notebook(num_replicas: usize, ops_per_replica: usize) -> StressTestStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Notebook Convergence Stress Test (Async)            ║");
    println!("║  Replicas: {:<4} | Ops/Replica: {:<6}                      ║",
             num_replicas, ops_per_replica);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();

    let replicas: Vec<NotebookModel> = (0..num_replicas)
        .map(|idx| {
            let config = DocConfig::builder().client_id(idx as u64 + 1).build();
            NotebookModel::with_config(&config)
        })
        .collect();

    println!("\n[Phase 1/3] Editing replicas concurrently...");

    let mut handles = vec![];
    for (idx, replica) in replicas.iter().enumerate() {
        let notebook = replica.clone();
        let handle = tokio::spawn(async move {
            let mut updates_rx = notebook.subscribe_updates();
            let mut rng = StdRng::from_entropy();
            let mut emitted: Vec<Update> = Vec::with_capacity(ops_per_replica);
            let mut failed = 0;

            for i in 0..ops_per_replica {
                if let Err(err) = random_edit(&notebook, &mut rng, idx, i) {
                    tracing::debug!(replica = idx, step = i, %err, "Edit rejected");
                    failed += 1;
                }
                while let Ok(update) = updates_rx.try_recv() {
                    emitted.push(update);
                }

                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            (emitted, failed)
        });
        handles.push(handle);
    }

    let mut batches: Vec<Vec<Update>> = Vec::with_capacity(num_replicas);
    let mut failed_operations = 0;
    for handle in handles {
        match handle.await {
            Ok((emitted, failed)) => {
                batches.push(emitted);
                failed_operations += failed;
            }
            Err(err) => {
                tracing::error!(%err, "Replica task failed");
                batches.push(Vec::new());
            }
        }
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Exchanging updates in random order...");

    let mut apply_times = vec![];
    let mut updates_delivered = 0;
    let mut deliveries = Box::pin(update_delivery_generator(batches.iter().map(Vec::len).collect()));

    while let Some((source, target, idx)) = deliveries.next().await {
        let apply_start = Instant::now();
        if let Err(err) = replicas[target].apply_update(&batches[source][idx]) {
            tracing::warn!(source, target, idx, %err, "Update rejected");
            continue;
        }
        apply_times.push(apply_start.elapsed());
        updates_delivered += 1;

        if updates_delivered % 1000 == 0 {
            println!("  Updates delivered: {}", updates_delivered);
        }
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Verifying convergence...");

    let snapshots: Vec<_> = replicas.iter().map(|r| r.to_json().ok()).collect();
    let converged = snapshots.iter().all(|s| s.is_some() && *s == snapshots[0]);
    if !converged {
        tracing::error!("Replicas diverged after full exchange");
    }
    let final_cells = replicas.first().map(NotebookModel::len).unwrap_or(0);

    let total_time = start.elapsed();

    let avg_apply_time = if !apply_times.is_empty() {
        apply_times.iter().sum::<Duration>() / apply_times.len() as u32
    } else {
        Duration::ZERO
    };

    let total_operations = (num_replicas * ops_per_replica) + updates_delivered;
    let ops_per_second = total_operations as f64 / total_time.as_secs_f64();

    println!("[Phase 3/3] ✓ Completed");

    for replica in &replicas {
        replica.dispose();
    }

    StressTestStats {
        num_replicas,
        operations_per_replica: ops_per_replica,
        updates_delivered,
        failed_operations,
        final_cells,
        converged,
        total_time,
        avg_apply_time,
        ops_per_second,
    }
}

/// Late-joiner check: a fresh replica loading the full state of an edited
/// one must serialize identically.
pub async fn stress_test_late_joiner(ops: usize) -> bool {
    let source = NotebookModel::with_config(&DocConfig::builder().client_id(1).build());
    let mut rng = StdRng::from_entropy();
    for i in 0..ops {
        if let Err(err) = random_edit(&source, &mut rng, 0, i) {
            tracing::debug!(step = i, %err, "Edit rejected");
        }
    }

    let joiner = NotebookModel::with_config(&DocConfig::builder().client_id(2).build());
    let state = source.encode_state_as_update().and_then(|u| u.encode());
    let applied = state
        .and_then(|bytes| Update::decode(&bytes))
        .and_then(|update| joiner.apply_update(&update));
    if let Err(err) = applied {
        tracing::error!(%err, "Late joiner failed to load state");
        return false;
    }

    let matches = matches!((source.to_json(), joiner.to_json()), (Ok(a), Ok(b)) if a == b);
    println!("  Late joiner with {} cells: {}", joiner.len(), if matches { "✓ identical" } else { "✗ diverged" });
    matches
}

/// Scaling analysis: fixed work per replica, growing replica counts
pub async fn stress_test_scaling(max_replicas: usize, step: usize) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║              Scaling Analysis (Notebook)                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!("\n  Replicas | Updates  | Time (ms) | Converged");
    println!("  ---------+----------+-----------+----------");

    let mut num_replicas = step.max(2);
    while num_replicas <= max_replicas {
        let stats = stress_test_notebook_quiet(num_replicas, 60).await;
        println!(
            "  {:>8} | {:>8} | {:>9.1} | {}",
            num_replicas,
            stats.updates_delivered,
            stats.total_time.as_secs_f64() * 1000.0,
            if stats.converged { "✓" } else { "✗" }
        );
        num_replicas += step.max(1);
    }
}

/// Same as [`stress_test_notebook`] but without the phase banners.
async fn stress_test_notebook_quiet(num_replicas: usize, ops_per_replica: usize) -> StressTestStats {
    let start = Instant::now();
    let replicas: Vec<NotebookModel> = (0..num_replicas)
        .map(|idx| NotebookModel::with_config(&DocConfig::builder().client_id(idx as u64 + 1).build()))
        .collect();

    let mut batches = Vec::with_capacity(num_replicas);
    let mut failed_operations = 0;
    let mut rng = StdRng::from_entropy();
    for (idx, notebook) in replicas.iter().enumerate() {
        let mut updates_rx = notebook.subscribe_updates();
        let mut emitted = Vec::new();
        for i in 0..ops_per_replica {
            if random_edit(notebook, &mut rng, idx, i).is_err() {
                failed_operations += 1;
            }
            while let Ok(update) = updates_rx.try_recv() {
                emitted.push(update);
            }
        }
        batches.push(emitted);
    }

    let mut updates_delivered = 0;
    let mut deliveries = Box::pin(update_delivery_generator(batches.iter().map(Vec::len).collect()));
    while let Some((source, target, idx)) = deliveries.next().await {
        if replicas[target].apply_update(&batches[source][idx]).is_ok() {
            updates_delivered += 1;
        }
    }

    let snapshots: Vec<_> = replicas.iter().map(|r| r.to_json().ok()).collect();
    let converged = snapshots.iter().all(|s| s.is_some() && *s == snapshots[0]);
    let final_cells = replicas.first().map(NotebookModel::len).unwrap_or(0);
    let total_time = start.elapsed();

    StressTestStats {
        num_replicas,
        operations_per_replica: ops_per_replica,
        updates_delivered,
        failed_operations,
        final_cells,
        converged,
        total_time,
        avg_apply_time: Duration::ZERO,
        ops_per_second: (num_replicas * ops_per_replica + updates_delivered) as f64 / total_time.as_secs_f64(),
    }
}

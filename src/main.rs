use stress_test::{stress_test_late_joiner, stress_test_notebook, stress_test_scaling};
use tracing_subscriber::{prelude::*, registry::Registry, EnvFilter};
pub mod stress_test;

fn main() {
    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::Layer::default())
        .init();

    let rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let converged = rt.block_on(async_main());
    if !converged {
        std::process::exit(1);
    }
}

async fn async_main() -> bool {
    println!("Run started at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            NOTEBOOK CONVERGENCE TESTS                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut converged = true;

    // Test 1: small scale
    let stats = stress_test_notebook(3, 100).await;
    stats.print();
    converged &= stats.converged;

    // Test 2: medium scale
    let stats = stress_test_notebook(8, 300).await;
    stats.print();
    converged &= stats.converged;

    // Test 3: full state transfer
    println!("\n[Late Joiner] Loading a full state into a fresh replica...");
    converged &= stress_test_late_joiner(500).await;

    // Test 4: scaling analysis
    stress_test_scaling(12, 2).await;

    if converged {
        println!("\n✓ All stress tests completed successfully!");
    } else {
        println!("\n✗ Some replicas diverged");
    }
    converged
}

//! Prints the experiment A/B summary for the "default" experiment.
//!
//! Variant outcomes only live in the running server's in-memory
//! `RagCore` (there is no on-disk query log), so this reports whatever
//! this process has observed since it started. It's mainly useful for
//! sanity-checking experiment config and the significance math against
//! a handful of local queries.

use ragcore::core;
use ragcore::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load()?;
    let rag_core = core::build(&config)?;
    let report = rag_core.experiment_stats("default").await;

    println!("\n=== Experiment Stats: default ===\n");

    if report.per_variant.is_empty() {
        println!("No queries recorded yet in this process.");
        println!("Run `search` a few times against the same experiment to populate this.");
        return Ok(());
    }

    println!(
        "{:<12} {:>8} {:>10} {:>12} {:>10} {:>10} {:>22} {:>10} {:>8}",
        "Variant", "N", "Success%", "Avg Lat(ms)", "Avg $", "Avg Score", "95% CI", "p-value", "Sig?"
    );
    println!("{:-<120}", "");

    for v in &report.per_variant {
        println!(
            "{:<12} {:>8} {:>9.1}% {:>12.1} {:>10.6} {:>10.3} [{:>8.3}, {:>8.3}] {:>10.4} {:>8}",
            v.variant,
            v.sample_size,
            v.success_rate * 100.0,
            v.avg_latency_ms,
            v.avg_cost_usd,
            v.avg_overall_score,
            v.ci95_lower,
            v.ci95_upper,
            v.p_value,
            if v.significant { "yes" } else { "no" },
        );
    }

    match &report.winning_variant {
        Some(variant) => println!("\nWinning variant: {}", variant),
        None => println!("\nNo variant is significantly ahead yet."),
    }

    Ok(())
}

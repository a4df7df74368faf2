mod config;
mod workload;

use color_eyre::eyre;

fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    color_eyre::install()?;
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish())?;

    let config: config::Config = envy::prefixed("ENTITY_LOCKER_").from_env()?;
    config.validate()?;
    tracing::info!(
        workers = config.workers,
        accounts = config.accounts,
        transfers = config.transfers,
        "Starting ledger workload with timeout {:?}",
        config.timeout,
    );

    let ledger = workload::Ledger::new(config.accounts, config.initial_balance);
    let report = ledger.run(&config)?;
    tracing::info!(
        completed = report.completed,
        timed_out = report.timed_out,
        total = report.total,
        "Workload finished, ledger balanced"
    );
    Ok(())
}

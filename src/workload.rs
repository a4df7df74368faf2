use std::{
    sync::atomic::{AtomicI64, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use color_eyre::eyre::{self, WrapErr as _};
use entity_locker::{EntityLocker, LockError, LockResult};

use crate::config::Config;

/// Accounts keyed by id. Balances are read and written with plain loads and
/// stores, so they only stay consistent because every update holds the
/// account's entity lock.
#[derive(Debug)]
pub struct Ledger {
    locker: EntityLocker<u32>,
    balances: Vec<AtomicI64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub completed: usize,
    pub timed_out: usize,
    pub total: i64,
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    from: u32,
    to: u32,
    amount: i64,
}

impl Transfer {
    /// Deterministic pair of distinct accounts for the `round`th transfer of `worker`.
    fn nth(worker: usize, round: usize, accounts: u32) -> Self {
        let accounts = accounts as usize;
        let from = (worker * 7 + round * 13) % accounts;
        let to = (from + 1 + (round * 31 + worker) % (accounts - 1)) % accounts;
        Self {
            from: from as u32,
            to: to as u32,
            amount: (round % 50 + 1) as i64,
        }
    }
}

impl Ledger {
    pub fn new(accounts: u32, initial_balance: i64) -> Self {
        Self {
            locker: EntityLocker::new(),
            balances: (0..accounts).map(|_| AtomicI64::new(initial_balance)).collect(),
        }
    }

    pub fn total(&self) -> i64 {
        self.balances.iter().map(|b| b.load(Ordering::SeqCst)).sum()
    }

    fn acquire<T, F>(&self, id: u32, timeout: Option<Duration>, f: F) -> LockResult<T, u32>
    where
        F: FnOnce() -> T,
    {
        match timeout {
            Some(timeout) => self.locker.with_lock_timeout(id, timeout, f),
            None => self.locker.with_lock(id, f),
        }
    }

    fn apply(&self, transfer: Transfer, timeout: Option<Duration>) -> LockResult<(), u32> {
        let (low, high) = if transfer.from < transfer.to {
            (transfer.from, transfer.to)
        } else {
            (transfer.to, transfer.from)
        };

        self.acquire(low, timeout, || {
            self.acquire(high, timeout, || {
                let from = &self.balances[transfer.from as usize];
                let to = &self.balances[transfer.to as usize];
                let debited = from.load(Ordering::Relaxed) - transfer.amount;
                thread::yield_now();
                from.store(debited, Ordering::Relaxed);
                to.store(to.load(Ordering::Relaxed) + transfer.amount, Ordering::Relaxed);
                tracing::trace!(
                    from = transfer.from,
                    to = transfer.to,
                    amount = transfer.amount,
                    "Applied transfer"
                );
            })
        })
        .and_then(|inner| inner)
    }

    fn run_worker(&self, worker: usize, config: &Config, counters: &Counters) -> eyre::Result<()> {
        let span = tracing::info_span!("worker", worker = worker);
        let _guard = span.enter();

        for round in 0..config.transfers {
            let transfer = Transfer::nth(worker, round, config.accounts);
            match self.apply(transfer, config.timeout) {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(LockError::TimedOut { .. }) => {
                    counters.timed_out.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    return Err(err).wrap_err_with(|| {
                        format!("Transfer {} -> {} failed", transfer.from, transfer.to)
                    })
                }
            }
        }
        tracing::info!("Finished {} transfers", config.transfers);
        Ok(())
    }

    pub fn run(&self, config: &Config) -> eyre::Result<Report> {
        let expected = self.total();
        let counters = Counters::default();

        thread::scope(|s| -> eyre::Result<()> {
            let handles: Vec<_> = (0..config.workers)
                .map(|worker| {
                    let counters = &counters;
                    s.spawn(move || self.run_worker(worker, config, counters))
                })
                .collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| eyre::eyre!("Worker panicked"))??;
            }
            Ok(())
        })?;

        let report = Report {
            completed: counters.completed.load(Ordering::SeqCst),
            timed_out: counters.timed_out.load(Ordering::SeqCst),
            total: self.total(),
        };
        if report.total != expected {
            eyre::bail!(
                "Ledger total changed from {} to {}: lock was not exclusive",
                expected,
                report.total
            );
        }
        if !self.locker.is_empty() {
            eyre::bail!("{} lock records left after all workers finished", self.locker.len());
        }
        Ok(report)
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    timed_out: AtomicUsize,
}

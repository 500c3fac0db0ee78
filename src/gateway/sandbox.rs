use crate::analysis::{Execution, Interpreter};
use crate::error::{ExpenseError, Result};
use crate::schema::TransactionRecord;
use chrono::NaiveDate;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// The local interpreter together with the one dataset it currently holds.
///
/// Loading replaces the dataset wholesale; a running snippet keeps the
/// snapshot it started with.
#[derive(Debug)]
pub struct Sandbox {
    interpreter: RwLock<Arc<Interpreter>>,
}

impl Sandbox {
    fn empty(today: NaiveDate) -> Self {
        Self {
            interpreter: RwLock::new(Arc::new(Interpreter::new(Vec::new(), today))),
        }
    }

    /// Replaces the dataset and returns the snapshot that now holds it.
    pub async fn load(
        &self,
        records: Vec<TransactionRecord>,
        currency: &str,
        today: NaiveDate,
    ) -> Arc<Interpreter> {
        info!("Loading {} records into the sandbox", records.len());
        let fresh = Arc::new(Interpreter::new(records, today).with_currency(currency));
        *self.interpreter.write().await = Arc::clone(&fresh);
        fresh
    }

    pub async fn record_count(&self) -> usize {
        self.interpreter.read().await.records().len()
    }

    /// Runs `code` against whatever dataset is loaded right now.
    pub async fn execute(&self, code: &str) -> Result<Execution> {
        let interpreter = Arc::clone(&*self.interpreter.read().await);
        execute_on(interpreter, code).await
    }
}

/// Runs `code` on a blocking thread against one fixed snapshot.
pub async fn execute_on(interpreter: Arc<Interpreter>, code: &str) -> Result<Execution> {
    let code = code.to_string();
    debug!("Executing snippet:\n{}", code);
    tokio::task::spawn_blocking(move || interpreter.execute(&code))
        .await
        .map_err(|e| ExpenseError::Sandbox(e.to_string()))?
}

/// Single slot for the lazily created sandbox.
#[derive(Debug, Default)]
pub struct SandboxSlot {
    cell: OnceCell<Arc<Sandbox>>,
}

impl SandboxSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the sandbox on first use; later calls return the same instance.
    pub async fn init(&self, today: NaiveDate) -> Arc<Sandbox> {
        let sandbox = self
            .cell
            .get_or_init(|| async move {
                info!("Initializing local analysis sandbox");
                Arc::new(Sandbox::empty(today))
            })
            .await;
        Arc::clone(sandbox)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub fn get(&self) -> Option<Arc<Sandbox>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn record(amount: f64) -> TransactionRecord {
        TransactionRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            amount,
            "grocery",
            "Food",
        )
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let slot = SandboxSlot::new();
        assert!(!slot.is_initialized());

        let first = slot.init(today()).await;
        let second = slot.init(today()).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(slot.is_initialized());
    }

    #[tokio::test]
    async fn test_load_replaces_dataset() {
        let slot = SandboxSlot::new();
        let sandbox = slot.init(today()).await;

        sandbox.load(vec![record(100.0), record(200.0)], "JPY", today()).await;
        assert_eq!(sandbox.record_count().await, 2);

        let snapshot = sandbox.load(vec![record(50.0)], "JPY", today()).await;
        assert_eq!(sandbox.record_count().await, 1);

        // A held snapshot survives the next load.
        sandbox.load(vec![record(900.0)], "JPY", today()).await;
        let pinned = execute_on(snapshot, "result = calculate_sum(df)").await.unwrap();
        assert_eq!(pinned.result.as_deref(), Some("Total Total in all time: 50.0"));
        sandbox.load(vec![record(50.0)], "JPY", today()).await;

        let execution = sandbox.execute("result = calculate_sum(df)").await.unwrap();
        assert_eq!(execution.result.as_deref(), Some("Total Total in all time: 50.0"));
    }
}

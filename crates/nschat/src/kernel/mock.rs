use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{KernelBackend, KernelFactory};
use crate::errors::{SessionError, SessionResult};
use crate::models::output::OutputItem;

/// Counts lifecycle calls across every kernel sharing it
#[derive(Clone, Default)]
pub struct KernelCounters {
    connects: Arc<AtomicUsize>,
    executions: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl KernelCounters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// A kernel that replays pre-configured output items
#[derive(Clone)]
pub struct ScriptedKernel {
    items: Vec<OutputItem>,
    item_delay: Duration,
    run_time: Duration,
    unreachable: bool,
    failure: Option<SessionError>,
    counters: KernelCounters,
}

impl ScriptedKernel {
    pub fn new(items: Vec<OutputItem>) -> Self {
        Self {
            items,
            item_delay: Duration::ZERO,
            run_time: Duration::ZERO,
            unreachable: false,
            failure: None,
            counters: KernelCounters::default(),
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Keep the execution running this long after the last item
    pub fn with_run_time(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn failing_with(mut self, error: SessionError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_counters(mut self, counters: KernelCounters) -> Self {
        self.counters = counters;
        self
    }
}

#[async_trait]
impl KernelBackend for ScriptedKernel {
    async fn connect(&mut self) -> SessionResult<()> {
        if self.unreachable {
            return Err(SessionError::Unreachable("mock kernel offline".into()));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(
        &mut self,
        _script: &str,
        output: mpsc::UnboundedSender<OutputItem>,
    ) -> SessionResult<()> {
        self.counters.executions.fetch_add(1, Ordering::SeqCst);
        for item in &self.items {
            if !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
            let _ = output.send(item.clone());
        }
        if !self.run_time.is_zero() {
            tokio::time::sleep(self.run_time).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl KernelFactory for ScriptedKernel {
    fn create(&self) -> Box<dyn KernelBackend> {
        Box::new(self.clone())
    }
}

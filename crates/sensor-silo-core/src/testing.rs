//! Test doubles for streams and operators.

use crate::operator::Operator;
use crate::stream::Stream;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Stream that cycles through a fixed list of millivolt readings.
pub struct ReplayStream {
    values: Vec<f64>,
    index: usize,
    raw: f64,
    address: Option<String>,
    updates: Arc<AtomicUsize>,
    update_times: Arc<Mutex<Vec<Instant>>>,
    slow_update: Option<(usize, Duration)>,
}

impl ReplayStream {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            index: 0,
            raw: 0.0,
            address: None,
            updates: Arc::new(AtomicUsize::new(0)),
            update_times: Arc::new(Mutex::new(Vec::new())),
            slow_update: None,
        }
    }

    /// Makes the update with the given index take `conversion` to complete.
    pub fn with_slow_update(mut self, index: usize, conversion: Duration) -> Self {
        self.slow_update = Some((index, conversion));
        self
    }

    /// Shared log of the instants each `update` started.
    pub fn update_times(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.update_times.clone()
    }

    /// Shared counter of `update` calls.
    pub fn update_counter(&self) -> Arc<AtomicUsize> {
        self.updates.clone()
    }
}

#[async_trait]
impl Stream for ReplayStream {
    fn stream_type(&self) -> &str {
        "Replay"
    }

    fn connect(&mut self, address: &str) -> Result<()> {
        self.validate_address(address)?;
        self.address = Some(address.to_string());
        Ok(())
    }

    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    async fn update(&mut self) -> Result<()> {
        if self.values.is_empty() {
            return Err(Error::Stream("nothing to replay".to_string()));
        }
        if let Ok(mut times) = self.update_times.lock() {
            times.push(Instant::now());
        }
        if let Some((index, conversion)) = self.slow_update {
            if index == self.index {
                tokio::time::sleep(conversion).await;
            }
        }
        self.raw = self.values[self.index % self.values.len()];
        self.index += 1;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn raw_value(&self) -> f64 {
        self.raw
    }

    fn raw_units(&self) -> &str {
        "mV"
    }
}

/// Operator that answers from a scripted list of key presses.
#[derive(Default)]
pub struct ScriptedOperator {
    keys: VecDeque<char>,
    pub lines: Vec<String>,
    pub progress: Vec<f64>,
}

impl ScriptedOperator {
    pub fn new(keys: &str) -> Self {
        Self {
            keys: keys.chars().collect(),
            ..Default::default()
        }
    }

    /// Keys not consumed yet.
    pub fn remaining(&self) -> usize {
        self.keys.len()
    }

    pub fn saw(&self, text: &str) -> bool {
        self.lines.iter().any(|line| line.contains(text))
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn read_key(&mut self) -> Result<char> {
        self.keys.pop_front().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "script exhausted",
            ))
        })
    }

    fn display(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    fn progress(&mut self, raw_value: f64) {
        self.progress.push(raw_value);
    }
}

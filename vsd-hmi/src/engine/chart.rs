//! Chart sampling: the per-variable series buffers, the shared time axis,
//! and the periodic sampler task that feeds them.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use vsd_gateway::BatchValues;

use crate::engine::connection::Command;
use crate::engine::watchdog::Watchdog;
use crate::gateway::GatewayHandle;
use crate::shutdown::Shutdown;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Left,
    Right,
}

impl Axis {
    pub fn toggled(self) -> Self {
        match self {
            Axis::Left => Axis::Right,
            Axis::Right => Axis::Left,
        }
    }
}

/// Time-ordered sample history for one charted variable.
///
/// Samples are stored as `Option<f64>` so the buffer advances in lockstep
/// with the shared time axis: a value the backend could not deliver becomes
/// a `None` placeholder instead of shifting later samples out of alignment.
#[derive(Clone, Debug)]
pub struct SeriesBuffer {
    pub name: String,
    pub key: String,
    pub unit: String,
    pub axis: Axis,
    samples: VecDeque<Option<f64>>,
}

impl SeriesBuffer {
    fn new(name: String, key: String, unit: String, axis: Axis, pad_to: usize) -> Self {
        SeriesBuffer {
            name,
            key,
            unit,
            axis,
            // A buffer added mid-run starts aligned with the existing axis.
            samples: std::iter::repeat(None).take(pad_to).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.samples.get(index).copied().flatten()
    }

    /// CSV column header: `name [unit]`, or just the name when unitless.
    pub fn label(&self) -> String {
        if self.unit.is_empty() {
            self.name.clone()
        } else {
            format!("{} [{}]", self.name, self.unit)
        }
    }
}

/// One successful sampler tick, applied by the supervisor. The generation
/// lets results from an already-stopped run be discarded instead of merged.
#[derive(Debug)]
pub(crate) struct Sample {
    pub generation: u64,
    pub stamp: String,
    pub values: BatchValues,
}

/// Selection, buffers and shared axis for one chart session. Owned and
/// mutated only by the supervisor task.
#[derive(Debug)]
pub(crate) struct ChartState {
    buffers: Vec<SeriesBuffer>,
    axis: VecDeque<String>,
    capacity: usize,
    sampling_interval: Duration,
    pub generation: u64,
}

impl ChartState {
    pub fn new(capacity: usize, sampling_interval: Duration) -> Self {
        ChartState {
            buffers: Vec::new(),
            axis: VecDeque::new(),
            capacity,
            sampling_interval,
            generation: 0,
        }
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        key: &str,
        unit: &str,
        axis: Axis,
    ) -> crate::Result<()> {
        if self.buffers.iter().any(|b| b.name == name) {
            return Err(Error::DuplicateVariable(name.to_owned()));
        }
        self.buffers.push(SeriesBuffer::new(
            name.to_owned(),
            key.to_owned(),
            unit.to_owned(),
            axis,
            self.axis.len(),
        ));
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) {
        self.buffers.retain(|b| b.name != name);
    }

    /// Destroys every buffer and resets the shared axis for a fresh session.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.axis.clear();
    }

    pub fn swap_axis(&mut self, name: &str) -> crate::Result<()> {
        match self.buffers.iter_mut().find(|b| b.name == name) {
            Some(buffer) => {
                buffer.axis = buffer.axis.toggled();
                Ok(())
            }
            None => Err(Error::UnknownTag(name.to_owned())),
        }
    }

    /// Rate changes are only permitted while no variables are selected, so
    /// all buffers of a session stay time-aligned.
    pub fn set_sampling_interval(&mut self, interval: Duration) -> crate::Result<()> {
        if !self.buffers.is_empty() {
            return Err(Error::SamplingRateLocked);
        }
        self.sampling_interval = interval;
        Ok(())
    }

    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn selected_keys(&self) -> Vec<String> {
        self.buffers.iter().map(|b| b.key.clone()).collect()
    }

    pub fn axis(&self) -> &VecDeque<String> {
        &self.axis
    }

    pub fn buffers(&self) -> &[SeriesBuffer] {
        &self.buffers
    }

    /// Apply one successful tick: advance the shared axis once and append to
    /// every buffer in lockstep. A missing or null value appends a `None`
    /// placeholder, so index `i` refers to the same instant in all buffers.
    pub fn append(&mut self, stamp: &str, values: &BatchValues) {
        self.axis.push_back(stamp.to_owned());
        for buffer in &mut self.buffers {
            buffer
                .samples
                .push_back(values.get(&buffer.key).copied().flatten());
        }

        while self.axis.len() > self.capacity {
            self.axis.pop_front();
            for buffer in &mut self.buffers {
                buffer.samples.pop_front();
            }
        }
    }
}

/// Periodic batch read of the selected backend keys, at the cadence fixed
/// when the run started. Runs only between `start()` and `stop()` and only
/// while connected.
pub(crate) struct ChartSampler {
    pub gateway: GatewayHandle,
    pub watchdog: Watchdog,
    pub supervisor: mpsc::Sender<Command>,
    pub keys: watch::Receiver<Vec<String>>,
    pub interval: Duration,
    pub generation: u64,
}

impl ChartSampler {
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let keys = self.keys.borrow().clone();
                    if keys.is_empty() {
                        continue;
                    }

                    tokio::select! {
                        result = self.gateway.read_batch(keys) => self.apply(result).await,
                        _ = shutdown.recv() => return,
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn apply(&self, result: crate::Result<BatchValues>) {
        match result {
            Ok(values) => {
                self.watchdog.record_success();
                let stamp = chrono::Utc::now().format("%H:%M:%S").to_string();
                let _ = self
                    .supervisor
                    .send(Command::ChartSample(Sample {
                        generation: self.generation,
                        stamp,
                        values,
                    }))
                    .await;
            }
            Err(error) => {
                debug!(%error, "chart read failed");
                if self.watchdog.record_failure() {
                    let _ = self.supervisor.send(Command::ForceDisconnect).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(pairs: &[(&str, Option<f64>)]) -> BatchValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    fn state() -> ChartState {
        ChartState::new(60, Duration::from_secs(1))
    }

    #[test]
    fn adding_the_same_variable_twice_is_rejected() {
        let mut chart = state();
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        let err = chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateVariable(ref n) if n == "temperature"));
        assert_eq!(chart.buffers().len(), 1);
    }

    #[test]
    fn sampling_rate_is_locked_while_variables_are_selected() {
        let mut chart = state();
        chart.set_sampling_interval(Duration::from_millis(500)).unwrap();

        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        assert!(matches!(
            chart.set_sampling_interval(Duration::from_millis(250)),
            Err(Error::SamplingRateLocked)
        ));

        chart.remove_variable("temperature");
        chart.set_sampling_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(chart.sampling_interval(), Duration::from_millis(250));
    }

    #[test]
    fn missing_values_become_placeholders_in_lockstep_with_the_axis() {
        let mut chart = state();
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        chart
            .add_variable("pressure", "dht_intake_pressure", "psi", Axis::Right)
            .unwrap();

        chart.append("10:00:00", &values(&[("vsd_temperature", Some(21.0)), ("dht_intake_pressure", Some(100.0))]));
        // Pressure null on the second pass; temperature absent on the third.
        chart.append("10:00:01", &values(&[("vsd_temperature", Some(21.5)), ("dht_intake_pressure", None)]));
        chart.append("10:00:02", &values(&[("dht_intake_pressure", Some(101.0))]));

        assert_eq!(chart.axis().len(), 3);
        for buffer in chart.buffers() {
            assert_eq!(buffer.len(), 3);
        }

        let temperature = &chart.buffers()[0];
        assert_eq!(temperature.get(1), Some(21.5));
        assert_eq!(temperature.get(2), None);

        let pressure = &chart.buffers()[1];
        assert_eq!(pressure.get(1), None);
        assert_eq!(pressure.get(2), Some(101.0));
    }

    #[test]
    fn a_buffer_added_mid_run_is_padded_to_the_axis() {
        let mut chart = state();
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        chart.append("10:00:00", &values(&[("vsd_temperature", Some(21.0))]));
        chart.append("10:00:01", &values(&[("vsd_temperature", Some(22.0))]));

        chart
            .add_variable("pressure", "dht_intake_pressure", "psi", Axis::Left)
            .unwrap();
        assert_eq!(chart.buffers()[1].len(), 2);
        assert_eq!(chart.buffers()[1].get(0), None);
    }

    #[test]
    fn history_is_bounded_and_shifts_all_buffers_together() {
        let mut chart = ChartState::new(3, Duration::from_secs(1));
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();

        for i in 0..5 {
            chart.append(
                &format!("10:00:0{i}"),
                &values(&[("vsd_temperature", Some(i as f64))]),
            );
        }

        assert_eq!(chart.axis().len(), 3);
        assert_eq!(chart.axis()[0], "10:00:02");
        assert_eq!(chart.buffers()[0].len(), 3);
        assert_eq!(chart.buffers()[0].get(0), Some(2.0));
        assert_eq!(chart.buffers()[0].get(2), Some(4.0));
    }

    #[test]
    fn swap_axis_toggles_without_touching_data() {
        let mut chart = state();
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        chart.append("10:00:00", &values(&[("vsd_temperature", Some(21.0))]));

        chart.swap_axis("temperature").unwrap();
        assert_eq!(chart.buffers()[0].axis, Axis::Right);
        assert_eq!(chart.buffers()[0].get(0), Some(21.0));

        chart.swap_axis("temperature").unwrap();
        assert_eq!(chart.buffers()[0].axis, Axis::Left);

        assert!(matches!(
            chart.swap_axis("nonexistent"),
            Err(Error::UnknownTag(_))
        ));
    }

    #[test]
    fn clearing_resets_the_session() {
        let mut chart = state();
        chart
            .add_variable("temperature", "vsd_temperature", "°C", Axis::Left)
            .unwrap();
        chart.append("10:00:00", &values(&[("vsd_temperature", Some(21.0))]));

        chart.clear();
        assert!(chart.is_empty());
        assert!(chart.axis().is_empty());
        // The rate unlocks once the selection is empty.
        chart.set_sampling_interval(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn labels_include_the_unit_when_present() {
        let buffer = SeriesBuffer::new(
            "temperature".into(),
            "vsd_temperature".into(),
            "°C".into(),
            Axis::Left,
            0,
        );
        assert_eq!(buffer.label(), "temperature [°C]");

        let unitless =
            SeriesBuffer::new("status".into(), "vsd_status".into(), String::new(), Axis::Left, 0);
        assert_eq!(unitless.label(), "status");
    }
}

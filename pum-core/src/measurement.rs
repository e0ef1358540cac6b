//! Measurement acquisition: two interchangeable sources of a
//! volume/flow/EC reading, behind one trait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Common interface both acquisition variants implement. `update()` is
/// non-blocking and meant to be polled periodically by the Client pipeline's
/// bounded measuring loop.
pub trait MeasurementSource: Send {
    fn reset(&mut self);
    /// Advances internal state from the hardware. Must not be called more
    /// often than every 500 ms for the pulse-counter variant.
    fn update(&mut self, elapsed_ms: u32);
    fn volume_l(&self) -> f32;
    fn flow_lps(&self) -> f32;
    fn ec(&self) -> f32;
}

/// A lock-free pulse counter fed by a rising-edge interrupt. The ISR itself
/// is out of this crate's scope and is modeled as an atomic counter; this
/// type is the acquisition-side reader of that counter.
#[derive(Clone)]
pub struct PulseCounterHandle(Arc<AtomicU32>);

impl PulseCounterHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    /// Called from the interrupt context (or its simulation) on each pulse.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn sample(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for PulseCounterHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulse-counter acquisition: accumulates volume from a shared pulse count
/// and reports instantaneous flow, with EC read from a linearly-scaled ADC
/// channel (or 0 if none is configured).
pub struct PulseCounterSource {
    counter: PulseCounterHandle,
    litres_per_pulse: f32,
    last_count: u32,
    volume_l: f32,
    flow_lps: f32,
    ec_reader: Option<Box<dyn Fn() -> f32 + Send>>,
}

impl PulseCounterSource {
    pub fn new(counter: PulseCounterHandle, litres_per_pulse: f32) -> Self {
        Self {
            counter,
            litres_per_pulse,
            last_count: 0,
            volume_l: 0.0,
            flow_lps: 0.0,
            ec_reader: None,
        }
    }

    /// Configures a linear-scaled ADC channel for conductivity. Without one,
    /// `ec()` reports 0.
    pub fn with_ec_reader(mut self, reader: impl Fn() -> f32 + Send + 'static) -> Self {
        self.ec_reader = Some(Box::new(reader));
        self
    }
}

impl MeasurementSource for PulseCounterSource {
    fn reset(&mut self) {
        self.last_count = self.counter.sample();
        self.volume_l = 0.0;
        self.flow_lps = 0.0;
    }

    fn update(&mut self, elapsed_ms: u32) {
        let now = self.counter.sample();
        let delta_pulses = now.wrapping_sub(self.last_count);
        self.last_count = now;
        let delta_litres = delta_pulses as f32 * self.litres_per_pulse;
        self.volume_l += delta_litres;
        self.flow_lps = if elapsed_ms > 0 {
            (delta_litres * 1000.0) / elapsed_ms as f32
        } else {
            0.0
        };
    }

    fn volume_l(&self) -> f32 {
        self.volume_l
    }

    fn flow_lps(&self) -> f32 {
        self.flow_lps
    }

    fn ec(&self) -> f32 {
        self.ec_reader.as_ref().map(|f| f()).unwrap_or(0.0)
    }
}

/// Maximum length of one line from the external controller before it is
/// dropped as noise.
pub const MAX_LINE_LEN: usize = 100;

/// External-UART acquisition: parses newline-terminated lines of shape
/// `V:<float>,F:<float>,E:<float>`. Fields absent from a line leave the
/// previous value unchanged.
#[derive(Default)]
pub struct ExternalUartSource {
    volume_l: f32,
    flow_lps: f32,
    ec: f32,
}

impl ExternalUartSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one already-delimited line (without its terminator) into the
    /// parser. Lines over [`MAX_LINE_LEN`] are dropped as noise.
    pub fn feed_line(&mut self, line: &str) {
        if line.len() > MAX_LINE_LEN {
            return;
        }
        for field in line.split(',') {
            let mut parts = field.splitn(2, ':');
            let (Some(tag), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(value) = value.trim().parse::<f32>() else {
                continue;
            };
            match tag.trim() {
                "V" => self.volume_l = value,
                "F" => self.flow_lps = value,
                "E" => self.ec = value,
                _ => {}
            }
        }
    }
}

impl MeasurementSource for ExternalUartSource {
    fn reset(&mut self) {
        self.volume_l = 0.0;
        self.flow_lps = 0.0;
        self.ec = 0.0;
    }

    fn update(&mut self, _elapsed_ms: u32) {
        // Lines are fed asynchronously via `feed_line`; nothing to advance
        // here beyond what has already arrived.
    }

    fn volume_l(&self) -> f32 {
        self.volume_l
    }

    fn flow_lps(&self) -> f32 {
        self.flow_lps
    }

    fn ec(&self) -> f32 {
        self.ec
    }
}

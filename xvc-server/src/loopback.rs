//! In-process loopback driver.
//!
//! [`LoopbackDriver`] answers every shift with TDO equal to TDI, or replays a golden
//! [`Trace`] and checks each request against it. It is used to validate the session's
//! chunking and framing without hardware. [`RecordingDriver`] wraps any driver and
//! captures the exchanges it performs as a trace.
//!
//! A trace file is a sequence of records, one per driver exchange: the bit count as a
//! little-endian `u32`, followed by ⌈bits / 8⌉ bytes each of TMS, TDI and TDO.
use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use xvc_protocol::vector_bytes;

use crate::{Driver, Error, IoContext, Result};

/// One recorded driver exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceRecord {
    pub num_bits: u32,
    pub tms: Vec<u8>,
    pub tdi: Vec<u8>,
    pub tdo: Vec<u8>,
}

impl TraceRecord {
    /// A record whose TDO echoes TDI.
    pub fn loopback(num_bits: u32, tms: &[u8], tdi: &[u8]) -> TraceRecord {
        TraceRecord {
            num_bits,
            tms: tms.to_vec(),
            tdi: tdi.to_vec(),
            tdo: tdi.to_vec(),
        }
    }
}

/// A sequence of golden exchanges.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trace {
    records: Vec<TraceRecord>,
}

impl Trace {
    pub fn new(records: Vec<TraceRecord>) -> Trace {
        Trace { records }
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Trace> {
        let path = path.as_ref();
        let data = fs::read(path).context(format!("Reading trace {}", path.display()))?;
        let trace = Trace::parse(&data)?;
        log::info!(
            "Loaded {} trace records from {}",
            trace.records.len(),
            path.display()
        );
        Ok(trace)
    }

    pub fn parse(mut data: &[u8]) -> Result<Trace> {
        let mut records = Vec::new();
        while !data.is_empty() {
            let truncated =
                || Error::Config(format!("trace record {} is truncated", records.len()));
            let (len, rest) = data.split_first_chunk::<4>().ok_or_else(truncated)?;
            let num_bits = u32::from_le_bytes(*len);
            let num_bytes = vector_bytes(num_bits);
            if rest.len() < 3 * num_bytes {
                return Err(truncated());
            }
            let (tms, rest) = rest.split_at(num_bytes);
            let (tdi, rest) = rest.split_at(num_bytes);
            let (tdo, rest) = rest.split_at(num_bytes);
            records.push(TraceRecord {
                num_bits,
                tms: tms.to_vec(),
                tdi: tdi.to_vec(),
                tdo: tdo.to_vec(),
            });
            data = rest;
        }
        Ok(Trace { records })
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for record in &self.records {
            writer.write_all(&record.num_bits.to_le_bytes())?;
            writer.write_all(&record.tms)?;
            writer.write_all(&record.tdi)?;
            writer.write_all(&record.tdo)?;
        }
        Ok(())
    }
}

fn check_lengths(num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &[u8]) -> Result<usize> {
    let num_bytes = vector_bytes(num_bits);
    if tms.len() != num_bytes || tdi.len() != num_bytes || tdo.len() != num_bytes {
        return Err(Error::Protocol(format!(
            "vectors of {}/{}/{} bytes do not carry {} bits",
            tms.len(),
            tdi.len(),
            tdo.len(),
            num_bits
        )));
    }
    Ok(num_bytes)
}

/// Driver that loops TDI back to TDO or replays a [`Trace`].
#[derive(Debug)]
pub struct LoopbackDriver {
    max_vector_size: u32,
    target_vector_size: u32,
    period_step_ns: u32,
    period_ns: u32,
    trace: Option<Trace>,
    position: usize,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        LoopbackDriver::new()
    }
}

impl LoopbackDriver {
    /// An unbounded loopback with 1 ns clock granularity.
    pub fn new() -> LoopbackDriver {
        LoopbackDriver {
            max_vector_size: 0,
            target_vector_size: 0,
            period_step_ns: 1,
            period_ns: 0,
            trace: None,
            position: 0,
        }
    }

    /// Limit single exchanges to `size` bytes, as a transport buffer would.
    pub fn with_max_vector_size(mut self, size: u32) -> Self {
        self.max_vector_size = size;
        self
    }

    /// The limit reported by [`Driver::query`], as a target FIFO depth would.
    pub fn with_target_vector_size(mut self, size: u32) -> Self {
        self.target_vector_size = size;
        self
    }

    /// Only periods that are multiples of `step` can be produced.
    pub fn with_period_step_ns(mut self, step: u32) -> Self {
        self.period_step_ns = step.max(1);
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self.position = 0;
        self
    }

    /// The TCK period last configured.
    pub fn period_ns(&self) -> u32 {
        self.period_ns
    }

    /// Number of trace records replayed so far.
    pub fn replayed(&self) -> usize {
        self.position
    }
}

impl Driver for LoopbackDriver {
    fn query(&mut self) -> Result<u32> {
        log::debug!("Loopback query: target_vector_size={}", self.target_vector_size);
        Ok(self.target_vector_size)
    }

    fn max_vector_size(&self) -> u32 {
        self.max_vector_size
    }

    fn set_period_ns(&mut self, period_ns: u32) -> u32 {
        let step = self.period_step_ns;
        self.period_ns = period_ns.div_ceil(step).max(1).saturating_mul(step);
        log::debug!(
            "Loopback set_period_ns: requested={}, actual={}",
            period_ns,
            self.period_ns
        );
        self.period_ns
    }

    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> Result<()> {
        let num_bytes = check_lengths(num_bits, tms, tdi, tdo)?;
        if self.max_vector_size != 0 && num_bytes > self.max_vector_size as usize {
            return Err(Error::Protocol(format!(
                "vector of {} bytes exceeds the loopback limit of {}",
                num_bytes, self.max_vector_size
            )));
        }

        let Some(trace) = &self.trace else {
            tdo.copy_from_slice(tdi);
            return Ok(());
        };
        let index = self.position;
        let record = trace.records.get(index).ok_or_else(|| {
            Error::Protocol(format!("trace exhausted after {} records", index))
        })?;
        if record.num_bits != num_bits || record.tms != tms || record.tdi != tdi {
            log::trace!("Expected TMS {:02x?}, TDI {:02x?}", record.tms, record.tdi);
            return Err(Error::Protocol(format!(
                "shift of {} bits does not match trace record {} ({} bits)",
                num_bits, index, record.num_bits
            )));
        }
        tdo.copy_from_slice(&record.tdo);
        self.position += 1;
        Ok(())
    }
}

/// Wraps a driver and records every successful exchange.
#[derive(Debug)]
pub struct RecordingDriver<D> {
    inner: D,
    trace: Trace,
}

impl<D: Driver> RecordingDriver<D> {
    pub fn new(inner: D) -> Self {
        RecordingDriver {
            inner,
            trace: Trace::default(),
        }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn into_trace(self) -> Trace {
        self.trace
    }
}

impl<D: Driver> Driver for RecordingDriver<D> {
    fn query(&mut self) -> Result<u32> {
        self.inner.query()
    }

    fn max_vector_size(&self) -> u32 {
        self.inner.max_vector_size()
    }

    fn set_period_ns(&mut self, period_ns: u32) -> u32 {
        self.inner.set_period_ns(period_ns)
    }

    fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8], tdo: &mut [u8]) -> Result<()> {
        self.inner.shift(num_bits, tms, tdi, tdo)?;
        self.trace.records.push(TraceRecord {
            num_bits,
            tms: tms.to_vec(),
            tdi: tdi.to_vec(),
            tdo: tdo.to_vec(),
        });
        Ok(())
    }
}

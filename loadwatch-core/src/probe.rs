//! Assembles complete load messages from a counter source

use tracing::debug;

use crate::error::Result;
use crate::message::LoadMessage;
use crate::normalizer::{CounterSource, RateNormalizer};

/// Owns a counter source and the normalizer window fed from it.
///
/// Not meant to be shared: one sender loop drives one prober.
pub struct Prober<S> {
    source: S,
    normalizer: RateNormalizer,
    interval: u16,
}

impl<S: CounterSource> Prober<S> {
    pub fn new(source: S, interval: u16) -> Self {
        Self {
            source,
            normalizer: RateNormalizer::new(),
            interval,
        }
    }

    pub fn interval(&self) -> u16 {
        self.interval
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn is_primed(&self) -> bool {
        self.normalizer.is_primed()
    }

    /// Take the baseline snapshot for rate computation
    pub fn init(&mut self) -> Result<()> {
        self.normalizer.probe_init(&mut self.source)
    }

    /// Sample every domain and build a fully populated message
    pub fn sample(&mut self, timestamp: u32) -> Result<LoadMessage> {
        let proc_load = self.source.proc_load()?;
        let memory_load = self.source.memory_load()?;
        let rates = self.normalizer.probe(&mut self.source)?;

        debug!(
            "sampled {} cores, {} disks, {} interfaces",
            rates.cpu.items.len(),
            rates.io.items.len(),
            rates.network.items.len()
        );

        Ok(LoadMessage {
            timestamp,
            interval: self.interval,
            proc_load: Some(proc_load),
            cpu_load: Some(rates.cpu),
            memory_load: Some(memory_load),
            io_load: Some(rates.io),
            network_load: Some(rates.network),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{MemoryLoad, ProcLoad, SubpacketKind};
    use crate::normalizer::{Counters, NamedCounters};

    /// Counters that grow by a fixed step on every read
    #[derive(Default)]
    struct SteppingSource {
        ticks: u64,
        fail_proc: bool,
    }

    impl CounterSource for SteppingSource {
        fn proc_load(&mut self) -> Result<ProcLoad> {
            if self.fail_proc {
                return Err(Error::Source("/proc/uptime unavailable".to_string()));
            }
            Ok(ProcLoad {
                uptime_total: 100.0,
                procs_all: 42,
                ..Default::default()
            })
        }

        fn memory_load(&mut self) -> Result<MemoryLoad> {
            Ok(MemoryLoad {
                free: 2048,
                ..Default::default()
            })
        }

        fn cpu_counters(&mut self) -> Result<Vec<Counters>> {
            self.ticks += 100;
            Ok(vec![[self.ticks / 4, self.ticks / 4, 0, self.ticks / 2]; 2])
        }

        fn disk_counters(&mut self) -> Result<Vec<NamedCounters>> {
            Ok(vec![NamedCounters::new("sda", [self.ticks, 0, 0, 0])])
        }

        fn network_counters(&mut self) -> Result<Vec<NamedCounters>> {
            Ok(vec![NamedCounters::new("lo", [0, 0, self.ticks, self.ticks])])
        }
    }

    #[test]
    fn test_sample_populates_every_kind() {
        let mut prober = Prober::new(SteppingSource::default(), 10);
        assert_eq!(prober.interval(), 10);
        prober.init().unwrap();
        let message = prober.sample(1234).unwrap();

        assert_eq!(message.timestamp, 1234);
        assert_eq!(message.interval, 10);
        assert_eq!(message.kinds(), SubpacketKind::ALL.to_vec());
        assert_eq!(message.proc_load.as_ref().unwrap().procs_all, 42);

        let cpu = message.cpu_load.as_ref().unwrap();
        assert_eq!(cpu.items.len(), 2);
        assert_eq!(cpu.items[0].idle, 128); // 50 of 100 ticks
        assert_eq!(message.io_load.as_ref().unwrap().items[0].reads, 100);

        let bytes = message.encode().unwrap();
        assert_eq!(LoadMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_sample_before_init_fails() {
        let mut prober = Prober::new(SteppingSource::default(), 10);
        assert!(!prober.is_primed());
        assert!(matches!(prober.sample(1), Err(Error::Unprimed)));
        prober.init().unwrap();
        assert!(prober.is_primed());
    }

    #[test]
    fn test_source_failure_aborts_cycle() {
        let mut prober = Prober::new(
            SteppingSource {
                fail_proc: true,
                ..Default::default()
            },
            5,
        );
        prober.init().unwrap();
        assert!(matches!(prober.sample(1), Err(Error::Source(_))));
    }
}

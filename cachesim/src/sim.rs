use std::io::BufRead;

use crate::{
    addr::Addr,
    cache::{AccessOutcome, Cache, CacheError, Statistics},
    config::CacheConfig,
    trace::{AccessKind, AccessRecord, ReplayError, TraceReader},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[derive(Default, Debug, Clone, Copy)]
pub struct ReplayOption {
    /// print every record and the outcome of each access it issues
    pub verbose: bool,
}

/// The cache accesses one record turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replayed {
    Skipped,
    Single(AccessOutcome),
    /// read then write of the same address
    Double(AccessOutcome, AccessOutcome),
}

impl Replayed {
    pub fn outcomes(&self) -> impl Iterator<Item = &AccessOutcome> {
        match self {
            Replayed::Skipped => [None, None],
            Replayed::Single(a) => [Some(a), None],
            Replayed::Double(a, b) => [Some(a), Some(b)],
        }
        .into_iter()
        .flatten()
    }
}

/// Owns one cache for the lifetime of a run and replays records against it.
pub struct Simulator {
    config: CacheConfig,
    cache: Cache,
    records: usize,
    issued: u64,
    #[cfg(feature = "stat")]
    stat_builder: stat::ReplayStatBuilder,
}

impl Simulator {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let cache = Cache::new(&config)?;
        log::info!("cache allocated: {config}");
        Ok(Self {
            config,
            cache,
            records: 0,
            issued: 0,
            #[cfg(feature = "stat")]
            stat_builder: stat::ReplayStatBuilder::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn access(&mut self, addr: Addr) -> AccessOutcome {
        self.cache.access(addr)
    }

    pub fn apply(&mut self, record: &AccessRecord) -> Replayed {
        self.records += 1;
        self.issued += record.kind.accesses() as u64;
        match record.kind {
            AccessKind::Instruction => Replayed::Skipped,
            AccessKind::Load | AccessKind::Store => Replayed::Single(self.access(record.addr)),
            AccessKind::Modify => {
                let read = self.access(record.addr);
                let write = self.access(record.addr);
                Replayed::Double(read, write)
            }
        }
    }

    fn step(&mut self, record: &AccessRecord, opt: &ReplayOption) {
        let replayed = self.apply(record);
        log::debug!("#{:08} {record}", self.records);
        if opt.verbose {
            print_trace(record, &replayed);
        }
    }

    /// Replays a trace to its end. The first unreadable or malformed line
    /// aborts the run.
    pub fn replay<R: BufRead>(
        &mut self,
        reader: R,
        opt: &ReplayOption,
    ) -> Result<Statistics, ReplayError> {
        let mut reader = TraceReader::new(reader);
        for record in reader.by_ref() {
            self.step(&record?, opt);
        }
        log::info!("{} trace lines read", reader.line_no());
        self.finish();
        Ok(self.statistics())
    }

    pub fn replay_records<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a AccessRecord>,
        opt: &ReplayOption,
    ) -> Statistics {
        for record in records {
            self.step(record, opt);
        }
        self.finish();
        self.statistics()
    }

    fn finish(&mut self) {
        let Statistics {
            hits,
            misses,
            evictions,
        } = self.statistics();
        log::info!(
            "replayed {} records: {hits} hits, {misses} misses, {evictions} evictions",
            self.records
        );
        #[cfg(feature = "stat")]
        {
            self.stat_builder.records(self.records);
            self.stat_builder.accesses(self.issued);
            self.stat_builder.stop_timer();
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.cache.statistics()
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// cache accesses issued so far; a modify counts twice
    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

#[inline]
fn print_trace(record: &AccessRecord, replayed: &Replayed) {
    println!("{record}");
    for outcome in replayed.outcomes() {
        println!("  {outcome}");
    }
}

#[cfg(feature = "stat")]
impl Simulator {
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish()));
        self.cache.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use crate::stat::*;
    use std::{fmt, time};

    pub struct ReplayStatBuilder {
        begin: time::Instant,
        records: Option<usize>,
        accesses: Option<u64>,
        elapsed: Option<time::Duration>,
    }

    impl ReplayStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                records: None,
                accesses: None,
                elapsed: None,
            }
        }
        pub fn records(&mut self, records: usize) {
            self.records = Some(records)
        }
        pub fn accesses(&mut self, accesses: u64) {
            self.accesses = Some(accesses)
        }
        pub fn stop_timer(&mut self) {
            self.elapsed = Some(time::Instant::now() - self.begin)
        }
        /// fields still unset read as zero when the replay has not finished.
        pub fn finish(&self) -> ReplayStat {
            ReplayStat {
                records: self.records.unwrap_or_default(),
                accesses: self.accesses.unwrap_or_default(),
                elapsed: self.elapsed.unwrap_or_default(),
            }
        }
    }

    impl Default for ReplayStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct ReplayStat {
        records: usize,
        accesses: u64,
        elapsed: time::Duration,
    }

    impl Stat for ReplayStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ ReplayStat {
        fn header(&self) -> &'static str {
            "replay stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ ReplayStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>9}")?;
            let records = format!("#{}", self.records);
            writeln!(f, "  records total: {records:>9}")?;
            let accesses = format!("#{}", self.accesses);
            writeln!(f, "  accesses total: {accesses:>8}")
        }
    }
}

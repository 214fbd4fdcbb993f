use anyhow::{ensure, Result};
use serde::Serialize;

use crate::{
    addr::Addr,
    cache::Statistics,
    config::CacheConfig,
    sim::{ReplayOption, Simulator},
    trace::AccessRecord,
    transpose::{is_transpose, Matrix, Strategy, TraceSink},
};

/// The reference cache transposes are graded on: 1 KiB, direct mapped,
/// 32-byte blocks.
pub const REFERENCE_SET_BITS: u32 = 5;
pub const REFERENCE_LINES: usize = 1;
pub const REFERENCE_BLOCK_BITS: u32 = 5;

/// Largest side length. Both matrices are laid out as if declared
/// `int A[256][256]; int B[256][256];` back to back.
pub const MAX_DIM: usize = 256;
pub const A_BASE: u64 = 0x0010_0000;
pub const B_BASE: u64 = A_BASE + (MAX_DIM * MAX_DIM * 4) as u64;

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub label: &'static str,
    pub rows: usize,
    pub cols: usize,
    pub correct: bool,
    #[serde(flatten)]
    pub statistics: Statistics,
}

/// Output of running one strategy on traced matrices.
pub struct Recorded {
    pub a: Matrix,
    pub b: Matrix,
    pub trace: Vec<AccessRecord>,
}

pub fn reference_config() -> CacheConfig {
    // the constants are a valid geometry
    match CacheConfig::new(REFERENCE_SET_BITS, REFERENCE_LINES, REFERENCE_BLOCK_BITS) {
        Ok(c) => c,
        Err(e) => unreachable!("{e}"),
    }
}

fn fill(rows: usize, cols: usize) -> Matrix {
    Matrix::from_fn(rows, cols, |i, j| (i * cols + j) as i32)
}

/// Runs `strategy` on an `rows x cols` source, recording every element access.
pub fn record(strategy: &Strategy, rows: usize, cols: usize) -> Result<Recorded> {
    ensure!(
        rows <= MAX_DIM && cols <= MAX_DIM,
        "{rows}x{cols} exceeds the {MAX_DIM}x{MAX_DIM} evaluation arrays"
    );
    let sink = TraceSink::default();
    let a = fill(rows, cols).traced(Addr::new(A_BASE), sink.clone());
    let mut b = Matrix::zeroed(cols, rows).traced(Addr::new(B_BASE), sink.clone());
    strategy.transpose_into(&a, &mut b)?;
    let trace = sink.take();
    log::info!(
        "{}: {} accesses recorded on {rows}x{cols}",
        strategy.label,
        trace.len()
    );
    Ok(Recorded {
        a: a.untraced(),
        b: b.untraced(),
        trace,
    })
}

/// Checks `strategy` for correctness and counts its misses on the reference
/// cache.
pub fn evaluate(strategy: &Strategy, rows: usize, cols: usize) -> Result<Evaluation> {
    let Recorded { a, b, trace } = record(strategy, rows, cols)?;
    let correct = is_transpose(&a, &b);
    if !correct {
        log::warn!("{}: result is not the transpose", strategy.label);
    }
    let mut sim = Simulator::new(reference_config())?;
    let statistics = sim.replay_records(&trace, &ReplayOption::default());
    Ok(Evaluation {
        label: strategy.label,
        rows,
        cols,
        correct,
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpose::{registered, ROW_SCAN, SUBMISSION};

    #[test]
    fn test_all_correct() {
        for (rows, cols) in [(32, 32), (64, 64), (67, 61)] {
            for s in registered() {
                let e = evaluate(s, rows, cols).unwrap();
                assert!(e.correct, "{} on {rows}x{cols}", e.label);
                // one load and one store per element at the very least
                assert!(e.statistics.accesses() >= (2 * rows * cols) as u64);
            }
            let naive = evaluate(&ROW_SCAN, rows, cols).unwrap();
            assert_eq!((2 * rows * cols) as u64, naive.statistics.accesses());
        }
    }

    #[test]
    fn test_split_blocks_reuse_destination() {
        // the 64x64 routine round-trips a quarter of each block through B
        let e = evaluate(&SUBMISSION, 64, 64).unwrap();
        assert!(e.correct);
        assert_eq!(64 * 64 * 5 / 2, e.statistics.accesses());
    }

    #[test]
    fn test_blocking_beats_row_scan() {
        let blocked = evaluate(&SUBMISSION, 32, 32).unwrap().statistics;
        let naive = evaluate(&ROW_SCAN, 32, 32).unwrap().statistics;
        assert!(blocked.misses < 300, "{blocked}");
        assert!(naive.misses > 1000, "{naive}");

        let blocked = evaluate(&SUBMISSION, 64, 64).unwrap().statistics;
        let naive = evaluate(&ROW_SCAN, 64, 64).unwrap().statistics;
        assert!(blocked.misses < 1300, "{blocked}");
        assert!(blocked.misses < naive.misses);

        let blocked = evaluate(&SUBMISSION, 67, 61).unwrap().statistics;
        let naive = evaluate(&ROW_SCAN, 67, 61).unwrap().statistics;
        assert!(blocked.misses < naive.misses, "{blocked} vs {naive}");
    }

    #[test]
    fn test_record_trace_layout() {
        let r = record(&ROW_SCAN, 2, 2).unwrap();
        let addrs: Vec<_> = r.trace.iter().map(|r| r.addr.inner()).collect();
        assert_eq!(
            vec![
                A_BASE,
                B_BASE,
                A_BASE + 4,
                B_BASE + 8,
                A_BASE + 8,
                B_BASE + 4,
                A_BASE + 12,
                B_BASE + 12
            ],
            addrs
        );
    }

    #[test]
    fn test_rejects_oversized() {
        assert!(record(&SUBMISSION, 257, 1).is_err());
    }
}

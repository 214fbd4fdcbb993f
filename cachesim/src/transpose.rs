use std::{cell::RefCell, fmt, mem, rc::Rc};

use thiserror::Error;

use crate::{
    addr::Addr,
    trace::{AccessKind, AccessRecord},
};

/// Collects the accesses made through traced matrices, in program order.
pub type TraceSink = Rc<RefCell<Vec<AccessRecord>>>;

const ELEM_SIZE: u64 = mem::size_of::<i32>() as u64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransposeError {
    #[error("destination is {got_rows}x{got_cols}, expected {rows}x{cols}")]
    Shape {
        rows: usize,
        cols: usize,
        got_rows: usize,
        got_cols: usize,
    },
}

#[derive(Clone)]
struct Tracer {
    base: Addr,
    sink: TraceSink,
}

/// Row-major `i32` matrix.
///
/// A traced matrix behaves as if it lived at `base` in memory: every `get`
/// records a load and every `set` a store of the element's address.
#[derive(Clone)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
    tracer: Option<Tracer>,
}

impl Matrix {
    pub fn zeroed(rows: usize, cols: usize) -> Self {
        Self::from_fn(rows, cols, |_, _| 0)
    }
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> i32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self {
            rows,
            cols,
            data,
            tracer: None,
        }
    }
    pub fn traced(mut self, base: Addr, sink: TraceSink) -> Self {
        self.tracer = Some(Tracer { base, sink });
        self
    }
    pub fn untraced(mut self) -> Self {
        self.tracer = None;
        self
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        assert!(
            i < self.rows && j < self.cols,
            "index ({i}, {j}) out of bounds for {}x{} matrix",
            self.rows,
            self.cols
        );
        i * self.cols + j
    }
    fn record(&self, kind: AccessKind, index: usize) {
        if let Some(Tracer { base, sink }) = &self.tracer {
            let addr = base.disp(index as u64 * ELEM_SIZE);
            sink.borrow_mut().push(AccessRecord {
                kind,
                addr,
                size: ELEM_SIZE as u32,
            });
        }
    }
    pub fn get(&self, i: usize, j: usize) -> i32 {
        let index = self.index(i, j);
        self.record(AccessKind::Load, index);
        self.data[index]
    }
    pub fn set(&mut self, i: usize, j: usize, val: i32) {
        let index = self.index(i, j);
        self.record(AccessKind::Store, index);
        self.data[index] = val;
    }
    /// reads without recording an access
    pub fn peek(&self, i: usize, j: usize) -> i32 {
        self.data[self.index(i, j)]
    }
}

impl PartialEq for Matrix {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.cols == other.cols && self.data == other.data
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix {}x{} ", self.rows, self.cols)?;
        f.debug_list().entries(self.data.chunks(self.cols.max(1))).finish()
    }
}

/// `true` iff `b` is `a` transposed, element for element.
pub fn is_transpose(a: &Matrix, b: &Matrix) -> bool {
    if a.rows != b.cols || a.cols != b.rows {
        return false;
    }
    (0..a.rows).all(|i| (0..a.cols).all(|j| a.peek(i, j) == b.peek(j, i)))
}

pub type TransposeFn = fn(&Matrix, &mut Matrix);

/// A transpose routine and the label it is reported under.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub label: &'static str,
    pub func: TransposeFn,
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Strategy").field(&self.label).finish()
    }
}

impl Strategy {
    pub fn transpose_into(&self, a: &Matrix, b: &mut Matrix) -> Result<(), TransposeError> {
        if b.rows != a.cols || b.cols != a.rows {
            return Err(TransposeError::Shape {
                rows: a.cols,
                cols: a.rows,
                got_rows: b.rows,
                got_cols: b.cols,
            });
        }
        (self.func)(a, b);
        Ok(())
    }
    pub fn transpose(&self, a: &Matrix) -> Matrix {
        let mut b = Matrix::zeroed(a.cols, a.rows);
        (self.func)(a, &mut b);
        b
    }
}

pub const SUBMISSION: Strategy = Strategy {
    label: "Transpose submission",
    func: transpose_submit,
};

pub const ROW_SCAN: Strategy = Strategy {
    label: "Simple row-wise scan transpose",
    func: transpose_row_scan,
};

pub fn registered() -> &'static [Strategy] {
    &[SUBMISSION, ROW_SCAN]
}

/// Blocking tuned for a 1 KiB direct-mapped cache with 32-byte lines.
fn transpose_submit(a: &Matrix, b: &mut Matrix) {
    match (a.rows, a.cols) {
        (32, 32) => transpose_8x8_diagonal(a, b),
        (64, 64) => transpose_8x8_split(a, b),
        (67, 61) => transpose_blocked(a, b, 17),
        _ => transpose_blocked(a, b, 8),
    }
}

fn transpose_row_scan(a: &Matrix, b: &mut Matrix) {
    for i in 0..a.rows {
        for j in 0..a.cols {
            let tmp = a.get(i, j);
            b.set(j, i, tmp);
        }
    }
}

fn transpose_blocked(a: &Matrix, b: &mut Matrix, bs: usize) {
    for row in (0..a.rows).step_by(bs) {
        for col in (0..a.cols).step_by(bs) {
            for i in row..(row + bs).min(a.rows) {
                for j in col..(col + bs).min(a.cols) {
                    b.set(j, i, a.get(i, j));
                }
            }
        }
    }
}

/// 8x8 blocks. On diagonal blocks the source row is read in full before
/// any write, since the matching destination row maps to the same set.
fn transpose_8x8_diagonal(a: &Matrix, b: &mut Matrix) {
    for row in (0..a.rows).step_by(8) {
        for col in (0..a.cols).step_by(8) {
            for i in row..row + 8 {
                if row == col {
                    let v: [i32; 8] = std::array::from_fn(|k| a.get(i, col + k));
                    for (k, v) in v.into_iter().enumerate() {
                        b.set(col + k, i, v);
                    }
                } else {
                    for j in col..col + 8 {
                        b.set(j, i, a.get(i, j));
                    }
                }
            }
        }
    }
}

/// 8x8 blocks handled as four 4x4 quadrants. The top-right quadrant of the
/// source is parked in the destination's top-right and moved down to the
/// bottom-left while the bottom-left comes in, so each destination row is
/// only brought into the cache once per block.
fn transpose_8x8_split(a: &Matrix, b: &mut Matrix) {
    for row in (0..a.rows).step_by(8) {
        for col in (0..a.cols).step_by(8) {
            for i in row..row + 4 {
                let v: [i32; 8] = std::array::from_fn(|k| a.get(i, col + k));
                for (k, &v) in v[..4].iter().enumerate() {
                    b.set(col + k, i, v);
                }
                for (k, &v) in v[4..].iter().enumerate() {
                    b.set(col + k, i + 4, v);
                }
            }
            for j in col..col + 4 {
                let lower: [i32; 4] = std::array::from_fn(|k| a.get(row + 4 + k, j));
                let parked: [i32; 4] = std::array::from_fn(|k| b.get(j, row + 4 + k));
                for (k, v) in lower.into_iter().enumerate() {
                    b.set(j, row + 4 + k, v);
                }
                for (k, v) in parked.into_iter().enumerate() {
                    b.set(j + 4, row + k, v);
                }
            }
            for i in row + 4..row + 8 {
                let v: [i32; 4] = std::array::from_fn(|k| a.get(i, col + 4 + k));
                for (k, v) in v.into_iter().enumerate() {
                    b.set(col + 4 + k, i, v);
                }
            }
        }
    }
}

use std::{fmt, io};

use nom::{
    character::complete::{char, hex_digit1, one_of, space0, space1, u32},
    combinator::{all_consuming, map_res},
    IResult,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::addr::Addr;

/// Operation letter of a trace line. The discriminant is the letter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum AccessKind {
    Instruction = b'I',
    Load = b'L',
    Store = b'S',
    Modify = b'M',
}

impl AccessKind {
    /// number of cache accesses issued for one record of this kind
    pub fn accesses(self) -> usize {
        match self {
            AccessKind::Instruction => 0,
            AccessKind::Load | AccessKind::Store => 1,
            AccessKind::Modify => 2,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(u8::from(*self)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub addr: Addr,
    pub size: u32,
}

impl AccessRecord {
    pub fn new(kind: AccessKind, addr: u64, size: u32) -> Self {
        Self {
            kind,
            addr: Addr::new(addr),
            size,
        }
    }
}

/// Formats the record as a trace line, e.g. `L 7ff000398,8`.
impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:x},{}", self.kind, self.addr.inner(), self.size)
    }
}

#[derive(Error, Debug)]
#[error("malformed trace line {line}: `{content}` ({reason})")]
pub struct TraceParseError {
    /// 1-based
    pub line: usize,
    pub content: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] TraceParseError),
}

fn record(input: &str) -> IResult<&str, AccessRecord> {
    let (input, _) = space0(input)?;
    let (input, kind) = map_res(one_of("ILSM"), |c: char| AccessKind::try_from(c as u8))(input)?;
    let (input, _) = space1(input)?;
    let (input, addr) = map_res(hex_digit1, |h| u64::from_str_radix(h, 16))(input)?;
    let (input, _) = char(',')(input)?;
    let (input, size) = u32(input)?;
    let (input, _) = space0(input)?;
    Ok((input, AccessRecord::new(kind, addr, size)))
}

/// Parses one trace line. Blank lines yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<AccessRecord>, TraceParseError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    match all_consuming(record)(line) {
        Ok((_, r)) => Ok(Some(r)),
        Err(e) => Err(TraceParseError {
            line: line_no,
            content: line.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Streams data records out of a trace, one line at a time.
///
/// Blank lines and instruction fetches (`I`) are dropped here, so consumers
/// only ever see loads, stores and modifies.
pub struct TraceReader<R> {
    lines: io::Lines<R>,
    line_no: usize,
}

impl<R: io::BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
    /// number of lines consumed so far
    pub fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: io::BufRead> Iterator for TraceReader<R> {
    type Item = Result<AccessRecord, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            match parse_line(self.line_no, &line) {
                Ok(Some(r)) if r.kind != AccessKind::Instruction => return Some(Ok(r)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Parses a whole in-memory trace, dropping instruction fetches.
pub fn parse_trace(trace: &str) -> Result<Vec<AccessRecord>, TraceParseError> {
    let mut records = Vec::new();
    for (i, line) in trace.lines().enumerate() {
        match parse_line(i + 1, line)? {
            Some(r) if r.kind != AccessKind::Instruction => records.push(r),
            _ => {}
        }
    }
    Ok(records)
}

//! Removal of terminal control sequences that must not reach the host terminal.
//!
//! Stripped: cursor position reports and queries (`CSI ... R`, `CSI ... n`),
//! DEC private mode toggles (`CSI ? ... h|l`, covering the alternate screen,
//! mouse tracking, bracketed paste and cursor visibility), SGR mouse reports
//! (`CSI < ... M|m`), cursor save/restore (`CSI s`, `CSI u`, `ESC 7`, `ESC 8`)
//! and window title OSCs (`OSC 0;`, `OSC 1;`, `OSC 2;`).
//!
//! Kept: SGR styling (`CSI ... m`), line and screen clears and every other
//! sequence.

use std::io::{self, Write};

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Longest incomplete sequence held back between writes. Beyond this a
/// title OSC is dropped up to its terminator; anything else is forwarded.
const MAX_PENDING: usize = 256;

/// Progress through the remainder of an overlong title OSC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discard {
    Off,
    Title,
    /// Inside the title, right after an ESC.
    TitleEsc,
}

/// A writer that strips unsafe control sequences before forwarding.
///
/// One instance per stream; not synchronized. Sequences split across writes
/// are reassembled. `write` always reports the full input length as written.
pub struct AnsiFilter<W: Write> {
    inner: W,
    pending: Vec<u8>,
    discard: Discard,
}

impl<W: Write> AnsiFilter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            discard: Discard::Off,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Forward any held partial sequence unchanged and return the writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.finish()?;
        Ok(self.inner)
    }

    /// Forward any held partial sequence unchanged.
    pub fn finish(&mut self) -> io::Result<()> {
        self.discard = Discard::Off;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.inner.write_all(&rest)?;
        }
        self.inner.flush()
    }

    fn filter_chunk(&mut self, input: &[u8]) -> Vec<u8> {
        let input = match self.discard {
            Discard::Off => input,
            _ => self.skip_title(input),
        };
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(input);

        // Removing a sequence can splice its neighbours into a new one, so
        // repeat until nothing is removed.
        loop {
            let (out, tail) = scan(&data);
            if out.len() + tail.len() == data.len() {
                self.pending = tail;
                if self.pending.len() > MAX_PENDING {
                    if is_title_osc(&self.pending) {
                        self.discard = match self.pending.last() {
                            Some(&ESC) => Discard::TitleEsc,
                            _ => Discard::Title,
                        };
                        self.pending.clear();
                        return out;
                    }
                    let mut out = out;
                    out.append(&mut self.pending);
                    return out;
                }
                return out;
            }
            data = out;
            data.extend_from_slice(&tail);
        }
    }

    /// Drop input up to the end of the title being discarded and return
    /// what follows it.
    fn skip_title<'a>(&mut self, input: &'a [u8]) -> &'a [u8] {
        for (i, &b) in input.iter().enumerate() {
            let after_esc = self.discard == Discard::TitleEsc;
            self.discard = Discard::Title;
            match b {
                BEL => {
                    self.discard = Discard::Off;
                    return &input[i + 1..];
                }
                b'\\' if after_esc => {
                    self.discard = Discard::Off;
                    return &input[i + 1..];
                }
                ESC => self.discard = Discard::TitleEsc,
                _ if after_esc => {
                    // Another sequence cuts the title short.
                    self.discard = Discard::Off;
                    self.pending.push(ESC);
                    return &input[i..];
                }
                _ => {}
            }
        }
        &[]
    }
}

impl<W: Write> Write for AnsiFilter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let out = self.filter_chunk(buf);
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Filter a complete buffer.
pub fn filter_bytes(input: &[u8]) -> Vec<u8> {
    let mut filter = AnsiFilter::new(Vec::with_capacity(input.len()));
    let _ = filter.write(input);
    filter.into_inner().unwrap_or_default()
}

/// Filter a complete string.
pub fn strip_unsafe(input: &str) -> String {
    String::from_utf8_lossy(&filter_bytes(input.as_bytes())).into_owned()
}

enum Scan {
    /// Sequence of this length to drop.
    Drop(usize),
    /// Sequence of this length to keep.
    Keep(usize),
    /// Input ends mid-sequence.
    Incomplete,
}

/// One pass: returns the filtered bytes and any incomplete trailing sequence.
fn scan(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != ESC {
            let next = data[i..]
                .iter()
                .position(|&b| b == ESC)
                .map_or(data.len(), |p| i + p);
            out.extend_from_slice(&data[i..next]);
            i = next;
            continue;
        }
        match classify(&data[i..]) {
            Scan::Drop(n) => i += n,
            Scan::Keep(n) => {
                out.extend_from_slice(&data[i..i + n]);
                i += n;
            }
            Scan::Incomplete => return (out, data[i..].to_vec()),
        }
    }
    (out, Vec::new())
}

/// Classify the escape sequence at the start of `seq` (which begins with ESC).
fn classify(seq: &[u8]) -> Scan {
    let Some(&intro) = seq.get(1) else {
        return Scan::Incomplete;
    };
    match intro {
        b'[' => classify_csi(seq),
        b']' => classify_osc(seq),
        b'7' | b'8' => Scan::Drop(2),
        _ => Scan::Keep(1),
    }
}

fn classify_csi(seq: &[u8]) -> Scan {
    let mut i = 2;
    while i < seq.len() && (0x30..=0x3f).contains(&seq[i]) {
        i += 1;
    }
    let params = &seq[2..i];
    while i < seq.len() && (0x20..=0x2f).contains(&seq[i]) {
        i += 1;
    }
    let Some(&final_byte) = seq.get(i) else {
        return Scan::Incomplete;
    };
    if !(0x40..=0x7e).contains(&final_byte) {
        // Malformed; pass the ESC through and resume after it.
        return Scan::Keep(1);
    }
    let len = i + 1;
    let private = params.first() == Some(&b'?');
    let mouse = params.first() == Some(&b'<');
    let strip = match final_byte {
        b'R' | b'n' => true,
        b'h' | b'l' => private,
        b'M' | b'm' => mouse,
        b's' | b'u' => params.is_empty(),
        _ => false,
    };
    if strip { Scan::Drop(len) } else { Scan::Keep(len) }
}

fn is_title_osc(seq: &[u8]) -> bool {
    seq.starts_with(b"\x1b]")
        && [b"0;", b"1;", b"2;"].iter().any(|p| seq[2..].starts_with(*p))
}

fn classify_osc(seq: &[u8]) -> Scan {
    let mut i = 2;
    let end = loop {
        match seq.get(i) {
            None => return Scan::Incomplete,
            Some(&BEL) => break i + 1,
            Some(&ESC) => match seq.get(i + 1) {
                None => return Scan::Incomplete,
                Some(b'\\') => break i + 2,
                // Unterminated; a title is still dropped up to the next sequence.
                Some(_) if is_title_osc(seq) => return Scan::Drop(i),
                Some(_) => return Scan::Keep(i),
            },
            Some(_) => i += 1,
        }
    };
    if is_title_osc(seq) { Scan::Drop(end) } else { Scan::Keep(end) }
}

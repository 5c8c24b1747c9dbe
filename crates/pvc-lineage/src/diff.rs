//! Line diff of prompt payloads
//!
//! Myers' O(ND) diff over `str::lines()`, in its linear-space form: each step
//! finds the middle snake of the remaining block and recurses on both halves.
//! Memory stays proportional to the input, and two payloads with no line in
//! common skip the search entirely.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::ops::{Index, IndexMut};

/// Kind of a diff span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Lines present only in the new content
    Added,
    /// Lines present only in the old content
    Removed,
    /// Lines present in both
    Unchanged,
}

impl SpanKind {
    /// Prefix used when rendering lines of this kind
    #[inline]
    #[must_use]
    pub const fn marker(&self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Unchanged => ' ',
        }
    }
}

/// Run of consecutive lines with the same kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSpan {
    /// Kind of the run
    pub kind: SpanKind,
    /// Zero-based line in the old content where the run starts
    pub old_start: usize,
    /// Zero-based line in the new content where the run starts
    pub new_start: usize,
    /// The lines themselves
    pub lines: Vec<String>,
}

/// Single edit operation, indices into the old and new line slices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Equal { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

/// Furthest x reached on each diagonal `k = x - y`
struct Frontier {
    offset: isize,
    xs: Vec<isize>,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            xs: vec![0; 2 * max_d + 1],
        }
    }
}

impl Index<isize> for Frontier {
    type Output = isize;

    fn index(&self, k: isize) -> &isize {
        &self.xs[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for Frontier {
    fn index_mut(&mut self, k: isize) -> &mut isize {
        &mut self.xs[(k + self.offset) as usize]
    }
}

fn max_d(n: usize, m: usize) -> usize {
    (n + m).div_ceil(2) + 1
}

fn common_prefix(a: &[&str], b: &[&str]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[&str], b: &[&str]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Interior split point of an `n` by `m` block, if `(x, y)` is one
fn split(x: isize, y: isize, n: isize, m: isize) -> Option<(usize, usize)> {
    let inside = (0..=n).contains(&x) && (0..=m).contains(&y);
    let interior = (x, y) != (0, 0) && (x, y) != (n, m);
    (inside && interior).then(|| (x as usize, y as usize))
}

/// Where the forward and backward searches of `a` against `b` meet.
///
/// Both slices are non-empty and differ in their first and last lines.
/// `None` means the block has no common line worth splitting on.
fn middle_snake(
    a: &[&str],
    b: &[&str],
    vf: &mut Frontier,
    vb: &mut Frontier,
) -> Option<(usize, usize)> {
    let (n, m) = (a.len() as isize, b.len() as isize);
    let delta = n - m;
    let odd = delta & 1 == 1;
    vf[1] = 0;
    vb[1] = 0;

    for d in 0..max_d(a.len(), b.len()) as isize {
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vf[k - 1] < vf[k + 1]) {
                vf[k + 1]
            } else {
                vf[k - 1] + 1
            };
            let (x0, y0) = (x, x - k);
            if (0..n).contains(&x) && (0..m).contains(&y0) {
                x += common_prefix(&a[x as usize..], &b[y0 as usize..]) as isize;
            }
            vf[k] = x;
            if odd && (k - delta).abs() < d && vf[k] + vb[delta - k] >= n {
                return split(x0, y0, n, m);
            }
        }

        // backward x and y count from the end of the block
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vb[k - 1] < vb[k + 1]) {
                vb[k + 1]
            } else {
                vb[k - 1] + 1
            };
            let mut y = x - k;
            if (0..n).contains(&x) && (0..m).contains(&y) {
                let run = common_suffix(&a[..(n - x) as usize], &b[..(m - y) as usize]) as isize;
                x += run;
                y += run;
            }
            vb[k] = x;
            if !odd && (k - delta).abs() <= d && vb[k] + vf[delta - k] >= n {
                return split(n - x, m - y, n, m);
            }
        }
    }
    None
}

/// Push the matched line pairs of `a` and `b`, offset by `(a0, b0)`, in order
fn collect_matches(
    a: &[&str],
    b: &[&str],
    (a0, b0): (usize, usize),
    frontiers: &mut (Frontier, Frontier),
    out: &mut Vec<(usize, usize)>,
) {
    let prefix = common_prefix(a, b);
    out.extend((0..prefix).map(|i| (a0 + i, b0 + i)));
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a, b);
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);
    let (a0, b0) = (a0 + prefix, b0 + prefix);

    if !a.is_empty() && !b.is_empty() {
        if let Some((x, y)) = middle_snake(a, b, &mut frontiers.0, &mut frontiers.1) {
            collect_matches(&a[..x], &b[..y], (a0, b0), frontiers, out);
            collect_matches(&a[x..], &b[y..], (a0 + x, b0 + y), frontiers, out);
        }
    }

    let (a_end, b_end) = (a0 + a.len(), b0 + b.len());
    out.extend((0..suffix).map(|i| (a_end + i, b_end + i)));
}

/// Edit script turning `old` into `new`.
///
/// The script is a shortest one. Within each changed block deletions come
/// before insertions.
pub(crate) fn diff_ops(old: &[&str], new: &[&str]) -> Vec<Op> {
    let mut matches = Vec::new();
    let old_lines: HashSet<&str> = old.iter().copied().collect();
    if new.iter().any(|line| old_lines.contains(line)) {
        let d = max_d(old.len(), new.len());
        let mut frontiers = (Frontier::new(d), Frontier::new(d));
        collect_matches(old, new, (0, 0), &mut frontiers, &mut matches);
    }

    let mut ops = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);
    for (old_at, new_at) in matches {
        ops.extend((i..old_at).map(|old| Op::Delete { old }));
        ops.extend((j..new_at).map(|new| Op::Insert { new }));
        ops.push(Op::Equal {
            old: old_at,
            new: new_at,
        });
        (i, j) = (old_at + 1, new_at + 1);
    }
    ops.extend((i..old.len()).map(|old| Op::Delete { old }));
    ops.extend((j..new.len()).map(|new| Op::Insert { new }));
    ops
}

/// Line diff of two prompt payloads, spans in display order.
///
/// Total for any input: `diff_prompt_content(x, x)` is a single unchanged
/// span (none for empty `x`) and `diff_prompt_content("", y)` a single added
/// span.
#[must_use]
pub fn diff_prompt_content(old: &str, new: &str) -> Vec<DiffSpan> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut spans: Vec<DiffSpan> = Vec::new();
    let (mut old_pos, mut new_pos) = (0, 0);
    for op in diff_ops(&old_lines, &new_lines) {
        let (kind, line, at_old, at_new) = match op {
            Op::Equal { old, new } => (SpanKind::Unchanged, old_lines[old], old, new),
            Op::Delete { old } => (SpanKind::Removed, old_lines[old], old, new_pos),
            Op::Insert { new } => (SpanKind::Added, new_lines[new], old_pos, new),
        };

        match spans.last_mut() {
            Some(span) if span.kind == kind => span.lines.push(line.to_string()),
            _ => spans.push(DiffSpan {
                kind,
                old_start: at_old,
                new_start: at_new,
                lines: vec![line.to_string()],
            }),
        }

        match kind {
            SpanKind::Unchanged => {
                old_pos = at_old + 1;
                new_pos = at_new + 1;
            }
            SpanKind::Removed => old_pos = at_old + 1,
            SpanKind::Added => new_pos = at_new + 1,
        }
    }
    spans
}

/// Render spans one line each with `+`, `-` or space markers
#[must_use]
pub fn render_diff(spans: &[DiffSpan]) -> String {
    let mut out = String::new();
    for span in spans {
        for line in &span.lines {
            let _ = writeln!(out, "{}{}", span.kind.marker(), line);
        }
    }
    out
}

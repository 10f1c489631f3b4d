use std::fmt;
use std::ops::Range;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;

use crate::backtrack::BacktrackEngine;
use crate::error::Error;
use crate::input::Input;
use crate::lockstep::LockstepEngine;
use crate::parser::compile;
use crate::prog::Program;

/// One saved capture offset. There are two slots per capture group, one for
/// each end; `None` means the group did not participate in the match.
pub type Slot = Option<usize>;

/// The interface shared by both matching engines.
///
/// `read_captures_at` is the primitive: it fills whatever slots the caller
/// provides (slots beyond what the caller asks for are simply not recorded)
/// and reports the overall match span. Everything else is derived. Engines
/// take `&self` because their mutable scratch lives in per-program pools,
/// so one engine value can serve any number of concurrent searches.
pub trait Engine {
    /// The program this engine executes.
    fn program(&self) -> &Program;

    /// Search from `start` (a byte offset on a character boundary). On a
    /// match, capture offsets are written into `slots` and the whole-match
    /// span is returned.
    fn read_captures_at(
        &self,
        slots: &mut [Slot],
        text: &str,
        start: usize,
    ) -> Option<(usize, usize)>;

    /// Search from `start`, returning a heap-backed match with every
    /// capture group recorded.
    fn match_at<'t>(&self, text: &'t str, start: usize) -> Option<Match<'t>> {
        let mut slots = vec![None; self.program().slots_len()];
        let (start, end) = self.read_captures_at(&mut slots, text, start)?;
        Some(Match { text, start, end, slots })
    }

    /// Search from `start` without heap allocation, recording up to `N / 2`
    /// capture groups inline. Groups beyond the inline capacity are not
    /// recorded; `N` must be at least 2 to hold the whole-match pair.
    fn match_at_fixed<'t, const N: usize>(
        &self,
        text: &'t str,
        start: usize,
    ) -> Option<FixedMatch<'t, N>> {
        let mut slots = [None; N];
        let (start, end) = self.read_captures_at(&mut slots, text, start)?;
        let groups = (N / 2).min(self.program().captures);
        Some(FixedMatch { text, start, end, slots, groups })
    }

    /// True if a match exists at or after `start`.
    fn is_match_at(&self, text: &str, start: usize) -> bool {
        let mut slots = [None, None];
        self.read_captures_at(&mut slots, text, start).is_some()
    }
}

impl<'a, E: Engine> Engine for &'a E {
    fn program(&self) -> &Program {
        (**self).program()
    }

    fn read_captures_at(
        &self,
        slots: &mut [Slot],
        text: &str,
        start: usize,
    ) -> Option<(usize, usize)> {
        (**self).read_captures_at(slots, text, start)
    }
}

fn group_of<'t>(text: &'t str, slots: &[Slot], i: usize) -> Option<&'t str> {
    let s = (*slots.get(2 * i)?)?;
    let e = (*slots.get(2 * i + 1)?)?;
    Some(&text[s..e])
}

/// A successful match: a view of the searched text plus the capture offsets
/// recorded along the winning path.
#[derive(Clone, Debug)]
pub struct Match<'t> {
    text: &'t str,
    start: usize,
    end: usize,
    slots: Vec<Slot>,
}

impl<'t> Match<'t> {
    /// Byte offset where the match begins.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset just past the end of the match.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The match as a byte range.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The matched text.
    pub fn as_str(&self) -> &'t str {
        &self.text[self.start..self.end]
    }

    /// The text before the match.
    pub fn pre(&self) -> &'t str {
        &self.text[..self.start]
    }

    /// The text after the match.
    pub fn post(&self) -> &'t str {
        &self.text[self.end..]
    }

    /// The text of capture group `i`, if the group participated in the
    /// match. Group 0 is the whole match.
    pub fn group(&self, i: usize) -> Option<&'t str> {
        group_of(self.text, &self.slots, i)
    }

    /// Number of capture groups recorded, including group 0.
    pub fn group_count(&self) -> usize {
        self.slots.len() / 2
    }

    /// Iterate over all capture groups in order. Groups that did not
    /// participate yield the empty string.
    pub fn captures(&self) -> SubCaptures<'_, 't> {
        SubCaptures { text: self.text, slots: &self.slots, idx: 0, len: self.group_count() }
    }
}

/// A match with its capture slots stored inline.
///
/// The capacity `N` counts slots, two per group, and is chosen at the call
/// site; matching allocates nothing when the engine scratch is warm.
#[derive(Clone, Debug)]
pub struct FixedMatch<'t, const N: usize> {
    text: &'t str,
    start: usize,
    end: usize,
    slots: [Slot; N],
    groups: usize,
}

impl<'t, const N: usize> FixedMatch<'t, N> {
    /// Byte offset where the match begins.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset just past the end of the match.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The match as a byte range.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The matched text.
    pub fn as_str(&self) -> &'t str {
        &self.text[self.start..self.end]
    }

    /// The text before the match.
    pub fn pre(&self) -> &'t str {
        &self.text[..self.start]
    }

    /// The text after the match.
    pub fn post(&self) -> &'t str {
        &self.text[self.end..]
    }

    /// The text of capture group `i`, if recorded.
    pub fn group(&self, i: usize) -> Option<&'t str> {
        if i >= self.groups {
            return None;
        }
        group_of(self.text, &self.slots, i)
    }

    /// Number of capture groups recorded, including group 0.
    pub fn group_count(&self) -> usize {
        self.groups
    }

    /// Iterate over the recorded capture groups in order. Groups that did
    /// not participate yield the empty string.
    pub fn captures(&self) -> SubCaptures<'_, 't> {
        SubCaptures { text: self.text, slots: &self.slots, idx: 0, len: self.groups }
    }
}

/// Iterator over the capture groups of a match, in slot order.
#[derive(Clone, Debug)]
pub struct SubCaptures<'m, 't> {
    text: &'t str,
    slots: &'m [Slot],
    idx: usize,
    len: usize,
}

impl<'m, 't> Iterator for SubCaptures<'m, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<&'t str> {
        if self.idx >= self.len {
            return None;
        }
        let s = group_of(self.text, self.slots, self.idx).unwrap_or("");
        self.idx += 1;
        Some(s)
    }
}

/// Enumerate every non-overlapping match of `engine` in `text`, leftmost
/// first.
pub fn match_all<'e, 't, E: Engine>(
    engine: &'e E,
    text: &'t str,
) -> Matches<'t, &'e E> {
    let slot_count = engine.program().slots_len();
    Matches { engine, text, slot_count, last_end: 0, last_match: None }
}

/// Iterator over successive non-overlapping matches.
///
/// After an empty match the search resumes one character later, and an
/// empty match abutting the previous match is discarded, so the iterator
/// always makes progress and never yields overlapping ranges.
#[derive(Debug)]
pub struct Matches<'t, E> {
    engine: E,
    text: &'t str,
    slot_count: usize,
    last_end: usize,
    last_match: Option<usize>,
}

impl<'t, E: Engine> Iterator for Matches<'t, E> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        let input = Input::new(self.text);
        loop {
            if self.last_end > self.text.len() {
                return None;
            }
            let mut slots = vec![None; self.slot_count];
            let (s, e) =
                self.engine.read_captures_at(&mut slots, self.text, self.last_end)?;
            if s == e {
                self.last_end = input.next_after(e);
                if Some(e) == self.last_match {
                    continue;
                }
            } else {
                self.last_end = e;
            }
            self.last_match = Some(e);
            return Some(Match { text: self.text, start: s, end: e, slots });
        }
    }
}

/// Picks the engine a program calls for: the backtracker when look-around
/// is present, the lockstep simulation otherwise.
#[derive(Clone, Copy, Debug)]
enum EngineKind<'r> {
    Lockstep(LockstepEngine<'r>),
    Backtrack(BacktrackEngine<'r>),
}

impl<'r> Engine for EngineKind<'r> {
    fn program(&self) -> &Program {
        match self {
            EngineKind::Lockstep(e) => e.program(),
            EngineKind::Backtrack(e) => e.program(),
        }
    }

    fn read_captures_at(
        &self,
        slots: &mut [Slot],
        text: &str,
        start: usize,
    ) -> Option<(usize, usize)> {
        match self {
            EngineKind::Lockstep(e) => e.read_captures_at(slots, text, start),
            EngineKind::Backtrack(e) => e.read_captures_at(slots, text, start),
        }
    }
}

/// A compiled pattern bundled with automatic engine selection.
///
/// Patterns without look-around run on the lockstep engine and enjoy its
/// linear-time guarantee; patterns with look-around fall back to the
/// backtracker.
#[derive(Clone)]
pub struct Regex {
    prog: Program,
}

impl Regex {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Regex, Error> {
        let prog = compile(pattern)?;
        if prog.has_look {
            debug!(
                "pattern /{}/ uses look-around; matching will backtrack",
                pattern
            );
        }
        Ok(Regex { prog })
    }

    /// The pattern this regex was compiled from.
    pub fn as_str(&self) -> &str {
        &self.prog.pattern
    }

    /// The compiled program.
    pub fn program(&self) -> &Program {
        &self.prog
    }

    /// Number of capture groups, including the implicit group 0.
    pub fn group_count(&self) -> usize {
        self.prog.captures
    }

    fn engine(&self) -> EngineKind<'_> {
        if self.prog.has_look {
            EngineKind::Backtrack(BacktrackEngine::new(&self.prog))
        } else {
            EngineKind::Lockstep(LockstepEngine::new_unchecked(&self.prog))
        }
    }

    /// True if the pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.engine().is_match_at(text, 0)
    }

    /// The leftmost-first match, tracking only the whole-match span.
    pub fn find<'t>(&self, text: &'t str) -> Option<Match<'t>> {
        let mut slots = vec![None; 2];
        let (s, e) = self.engine().read_captures_at(&mut slots, text, 0)?;
        Some(Match { text, start: s, end: e, slots })
    }

    /// The leftmost-first match starting at or after `start`, with every
    /// capture group recorded.
    pub fn match_at<'t>(&self, text: &'t str, start: usize) -> Option<Match<'t>> {
        self.engine().match_at(text, start)
    }

    /// The leftmost-first match with every capture group recorded.
    pub fn captures<'t>(&self, text: &'t str) -> Option<Match<'t>> {
        self.engine().match_at(text, 0)
    }

    /// Iterate over every non-overlapping match, tracking only whole-match
    /// spans.
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> RegexMatches<'r, 't> {
        RegexMatches {
            it: Matches {
                engine: self.engine(),
                text,
                slot_count: 2,
                last_end: 0,
                last_match: None,
            },
        }
    }

    /// Iterate over every non-overlapping match with captures recorded.
    pub fn captures_iter<'r, 't>(&'r self, text: &'t str) -> RegexMatches<'r, 't> {
        RegexMatches {
            it: Matches {
                engine: self.engine(),
                text,
                slot_count: self.prog.slots_len(),
                last_end: 0,
                last_match: None,
            },
        }
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Regex({:?})", self.prog.pattern)
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.prog.pattern)
    }
}

/// Iterator returned by [`Regex::find_iter`] and [`Regex::captures_iter`].
#[derive(Debug)]
pub struct RegexMatches<'r, 't> {
    it: Matches<'t, EngineKind<'r>>,
}

impl<'r, 't> Iterator for RegexMatches<'r, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        self.it.next()
    }
}

lazy_static! {
    /// The most recently compiled program, keyed by its literal pattern.
    static ref LAST_COMPILED: Mutex<Option<(String, Program)>> =
        Mutex::new(None);
}

fn compile_cached(pattern: &str) -> Result<Program, Error> {
    let mut memo = LAST_COMPILED.lock().unwrap();
    if let Some((cached, prog)) = memo.as_ref() {
        if cached == pattern {
            return Ok(prog.clone());
        }
    }
    let prog = compile(pattern)?;
    *memo = Some((pattern.to_string(), prog.clone()));
    Ok(prog)
}

/// Compile `pattern` (consulting a last-compiled memo) and test it against
/// `text`.
pub fn is_match(pattern: &str, text: &str) -> Result<bool, Error> {
    let prog = compile_cached(pattern)?;
    Ok(Regex { prog }.is_match(text))
}

use memchr::memchr;

use crate::error::Error;
use crate::input::{is_word_char, Input};
use crate::prog::{Inst, InstPtr, Program};
use crate::re::{Engine, Slot};

/// Generation value meaning "never enqueued".
const GEN_NONE: usize = usize::MAX;

/// The lockstep NFA engine.
///
/// All live paths through the program advance together, one input character
/// at a time, so matching is `O(num_states · input length)` no matter how
/// pathological the pattern is. A state can only join a generation once
/// (`state_gen` tracks the last generation each state was enqueued at), which
/// also bounds the thread pools at `num_states` entries.
///
/// Look-around is the backtracking engine's department; construction fails
/// on programs that contain it.
#[derive(Clone, Copy, Debug)]
pub struct LockstepEngine<'r> {
    prog: &'r Program,
}

impl<'r> LockstepEngine<'r> {
    /// Create a lockstep engine for the given program.
    ///
    /// Returns `Error::UnsupportedLookAround` if the program contains
    /// look-around assertions.
    pub fn new(prog: &'r Program) -> Result<LockstepEngine<'r>, Error> {
        if prog.has_look {
            return Err(Error::UnsupportedLookAround);
        }
        Ok(LockstepEngine { prog })
    }

    pub(crate) fn new_unchecked(prog: &'r Program) -> LockstepEngine<'r> {
        debug_assert!(!prog.has_look);
        LockstepEngine { prog }
    }
}

impl<'r> Engine for LockstepEngine<'r> {
    fn program(&self) -> &Program {
        self.prog
    }

    fn read_captures_at(
        &self,
        slots: &mut [Slot],
        text: &str,
        start: usize,
    ) -> Option<(usize, usize)> {
        let mut cache = self.prog.cache_lockstep();
        let matched = Simulation {
            prog: self.prog,
            input: Input::new(text),
            cache: &mut cache,
        }
        .exec(slots, start);
        if matched {
            match (slots.first().copied().flatten(), slots.get(1).copied().flatten()) {
                (Some(s), Some(e)) => Some((s, e)),
                _ => None,
            }
        } else {
            None
        }
    }
}

/// One live path: its position in the program and the capture offsets it has
/// recorded so far.
#[derive(Clone, Debug)]
struct Thread {
    pc: InstPtr,
    slots: Vec<Slot>,
}

/// Scratch for one lockstep run, recycled through the program's pool.
///
/// `current` holds the threads scheduled for this generation, `executing` is
/// the stack the epsilon closure works through, and `consuming` collects
/// threads parked at character-consuming instructions, in priority order.
#[derive(Debug, Default)]
pub struct LockstepCache {
    current: Vec<Thread>,
    executing: Vec<Thread>,
    consuming: Vec<Thread>,
    state_gen: Vec<usize>,
}

struct Simulation<'r, 'c, 't> {
    prog: &'r Program,
    input: Input<'t>,
    cache: &'c mut LockstepCache,
}

impl<'r, 'c, 't> Simulation<'r, 'c, 't> {
    fn exec(mut self, slots: &mut [Slot], start: usize) -> bool {
        if start > self.input.len() {
            return false;
        }
        let mut at = start;
        if !self.prog.is_anchored_start {
            if let Some(b) = self.prog.prefix_byte {
                // Every match starts with this byte, so fast-forward to its
                // first occurrence before spinning up any threads.
                match memchr(b, &self.input.as_bytes()[at..]) {
                    Some(i) => at += i,
                    None => return false,
                }
            }
        }

        for s in slots.iter_mut() {
            *s = None;
        }
        self.cache.state_gen.clear();
        self.cache.state_gen.resize(self.prog.num_states, GEN_NONE);
        self.cache.current.clear();
        self.cache.executing.clear();
        self.cache.consuming.clear();

        let mut matched = false;
        self.cache.current.push(Thread {
            pc: self.prog.start,
            slots: vec![None; slots.len()],
        });
        loop {
            self.closure(slots, at, &mut matched);
            if self.cache.consuming.is_empty() {
                break;
            }
            let c = match self.input.char_at(at) {
                Some(c) => c,
                None => break,
            };
            // Feed the decoded character to every parked thread; survivors
            // seed the next generation, keeping their priority order.
            for mut t in self.cache.consuming.drain(..) {
                if self.prog.insts[t.pc].matches_char(c) {
                    t.pc += 1;
                    self.cache.current.push(t);
                }
            }
            at += c.len_utf8();
        }
        matched
    }

    /// Advance every thread in `current` through non-consuming instructions,
    /// parking consumers in `consuming`. `at` is the generation: the byte
    /// index of the character about to be consumed.
    fn closure(&mut self, slots: &mut [Slot], at: usize, matched: &mut bool) {
        let prev = self.input.prev_char(at);
        let next = self.input.char_at(at);
        // `current` is in priority order; reversing it onto the work stack
        // puts the highest-priority thread on top.
        while let Some(t) = self.cache.current.pop() {
            self.cache.executing.push(t);
        }
        'threads: while let Some(mut t) = self.cache.executing.pop() {
            loop {
                // A state enters a generation at most once; later arrivals
                // are lower priority and add nothing.
                if self.cache.state_gen[t.pc] == at {
                    continue 'threads;
                }
                self.cache.state_gen[t.pc] = at;
                match self.prog.insts[t.pc] {
                    Inst::Save { slot } => {
                        if slot < t.slots.len() {
                            t.slots[slot] = Some(at);
                        }
                        t.pc += 1;
                    }
                    Inst::Jump { loc } => t.pc = loc,
                    Inst::Split { pref, sec } => {
                        let mut u = t.clone();
                        u.pc = sec;
                        self.cache.executing.push(u);
                        t.pc = pref;
                    }
                    Inst::Bot => {
                        if at == 0 {
                            t.pc += 1;
                        } else {
                            continue 'threads;
                        }
                    }
                    Inst::Eot => {
                        if at == self.input.len() {
                            t.pc += 1;
                        } else {
                            continue 'threads;
                        }
                    }
                    Inst::Bol => {
                        if at == 0 || matches!(prev, Some('\n') | Some('\r')) {
                            t.pc += 1;
                        } else {
                            continue 'threads;
                        }
                    }
                    Inst::Eol => {
                        if next.is_none()
                            || matches!(next, Some('\n') | Some('\r'))
                        {
                            t.pc += 1;
                        } else {
                            continue 'threads;
                        }
                    }
                    Inst::WordBoundary { positive } => {
                        let b = is_word_char(prev) != is_word_char(next);
                        if b == positive {
                            t.pc += 1;
                        } else {
                            continue 'threads;
                        }
                    }
                    Inst::Match => {
                        // Record this match and cut every lower-priority
                        // thread. Higher-priority threads already parked in
                        // `consuming` keep running: if one of them reaches
                        // `Match` in a later generation it overwrites this
                        // result with the longer, preferred match.
                        for (o, v) in slots.iter_mut().zip(t.slots.iter()) {
                            *o = *v;
                        }
                        *matched = true;
                        self.cache.executing.clear();
                        self.cache.current.clear();
                        break 'threads;
                    }
                    Inst::LookAround { .. } => {
                        // Construction refuses such programs.
                        debug_assert!(
                            false,
                            "look-around reached the lockstep engine"
                        );
                        continue 'threads;
                    }
                    _ => {
                        debug_assert!(self.prog.insts[t.pc].is_consuming());
                        self.cache.consuming.push(t);
                        continue 'threads;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;
    use crate::re::Engine;

    fn find(pattern: &str, text: &str) -> Option<(usize, usize)> {
        let prog = compile(pattern).unwrap();
        let engine = LockstepEngine::new(&prog).unwrap();
        let mut slots = [None, None];
        engine.read_captures_at(&mut slots, text, 0)
    }

    #[test]
    fn rejects_lookaround_programs() {
        let prog = compile("q(?=u)").unwrap();
        assert_eq!(
            LockstepEngine::new(&prog).unwrap_err(),
            Error::UnsupportedLookAround
        );
    }

    #[test]
    fn unanchored_search_finds_leftmost() {
        assert_eq!(find("b+", "aabbbc"), Some((2, 5)));
    }

    #[test]
    fn greedy_takes_longest() {
        assert_eq!(find("a*", "aaab"), Some((0, 3)));
    }

    #[test]
    fn lazy_takes_shortest() {
        assert_eq!(find("a+?", "aaab"), Some((0, 1)));
    }

    #[test]
    fn anchors_respect_start_offset() {
        let prog = compile("^b").unwrap();
        let engine = LockstepEngine::new(&prog).unwrap();
        let mut slots = [None, None];
        // `^` outside multiline mode means byte offset 0, not "wherever the
        // search began".
        assert_eq!(engine.read_captures_at(&mut slots, "ab", 1), None);
        assert_eq!(engine.read_captures_at(&mut slots, "ba", 0), Some((0, 1)));
    }

    #[test]
    fn word_boundary_at_interior_start() {
        let prog = compile(r"\bb").unwrap();
        let engine = LockstepEngine::new(&prog).unwrap();
        let mut slots = [None, None];
        // Searching from offset 1 of "ab" still sees 'a' before 'b'.
        assert_eq!(engine.read_captures_at(&mut slots, "ab", 1), None);
        assert_eq!(engine.read_captures_at(&mut slots, " b", 1), Some((1, 2)));
    }

    #[test]
    fn empty_width_loops_terminate() {
        assert_eq!(find("(a?)*", "b"), Some((0, 0)));
        assert_eq!(find("(?:a*)*", "aab"), Some((0, 2)));
    }

    #[test]
    fn captures_are_reported_per_thread() {
        let prog = compile("(a+)(b+)").unwrap();
        let engine = LockstepEngine::new(&prog).unwrap();
        let mut slots = vec![None; prog.slots_len()];
        let (s, e) = engine.read_captures_at(&mut slots, "xaabby", 0).unwrap();
        assert_eq!((s, e), (1, 5));
        assert_eq!(slots, vec![Some(1), Some(5), Some(1), Some(3), Some(3), Some(5)]);
    }

    #[test]
    fn prefix_byte_skip_does_not_miss() {
        assert_eq!(find("b.d", "aaabcd"), Some((3, 6)));
        assert_eq!(find("zq", "aaabcd"), None);
    }

    #[test]
    fn match_at_end_of_input() {
        assert_eq!(find("a$", "bba"), Some((2, 3)));
        assert_eq!(find("c$", "bba"), None);
    }
}

use memchr::memchr;

use crate::input::{is_word_char, Input};
use crate::prog::{Inst, InstPtr, Program};
use crate::re::{Engine, Slot};

/// The backtracking engine.
///
/// A depth-first search over the program, run on an explicit job stack
/// rather than the call stack so that pattern-controlled recursion cannot
/// overflow. This is the only engine that executes look-around assertions.
/// Worst-case time is exponential on adversarial patterns; the lockstep
/// engine is the safe default when look-around is not needed.
///
/// Programs flagged as containing repetitions that can iterate without
/// consuming input additionally run with a duplicate-state guard: a
/// `(state, position)` pair is explored at most once per search, which both
/// guarantees termination and bounds the search at `O(states · input)`.
#[derive(Clone, Copy, Debug)]
pub struct BacktrackEngine<'r> {
    prog: &'r Program,
    step_limit: Option<u64>,
}

impl<'r> BacktrackEngine<'r> {
    /// Create a backtracking engine for the given program.
    pub fn new(prog: &'r Program) -> BacktrackEngine<'r> {
        BacktrackEngine { prog, step_limit: None }
    }

    /// Bound the number of instructions executed per `match_at` call.
    ///
    /// When the budget runs out the search stops and reports no match from
    /// that starting position. Unlimited by default.
    pub fn step_limit(mut self, limit: u64) -> BacktrackEngine<'r> {
        self.step_limit = Some(limit);
        self
    }
}

impl<'r> Engine for BacktrackEngine<'r> {
    fn program(&self) -> &Program {
        self.prog
    }

    fn read_captures_at(
        &self,
        slots: &mut [Slot],
        text: &str,
        start: usize,
    ) -> Option<(usize, usize)> {
        let mut cache = self.prog.cache_backtrack();
        let matched = Backtracker {
            prog: self.prog,
            input: Input::new(text),
            slots: &mut *slots,
            cache: &mut cache,
            scope: 0,
            steps_left: self.step_limit.unwrap_or(u64::MAX),
        }
        .exec(start);
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

/// One unit of pending work.
///
/// `Inst` resumes the search at a program position; `SaveRestore` rewinds a
/// capture slot when the search backtracks past the `Save` that wrote it,
/// so capture state always reflects the path currently being explored.
#[derive(Clone, Copy, Debug)]
enum Job {
    Inst { pc: InstPtr, at: usize },
    SaveRestore { slot: usize, old: Slot },
}

/// Scratch for one backtracking run, recycled through the program's pool.
#[derive(Debug, Default)]
pub struct BacktrackCache {
    jobs: Vec<Job>,
    /// Scope stamps for the duplicate-state guard, indexed by
    /// `pc * (input_len + 1) + at`. Sized lazily and only for programs that
    /// need the guard.
    visited: Vec<u32>,
    next_scope: u32,
}

struct Backtracker<'r, 'c, 's, 't> {
    prog: &'r Program,
    input: Input<'t>,
    slots: &'s mut [Slot],
    cache: &'c mut BacktrackCache,
    /// Stamp identifying the current (sub-)search in `visited`; zero when
    /// the guard is off.
    scope: u32,
    steps_left: u64,
}

impl<'r, 'c, 's, 't> Backtracker<'r, 'c, 's, 't> {
    fn exec(mut self, start: usize) -> bool {
        if start > self.input.len() {
            return false;
        }
        let mut at = start;
        if !self.prog.is_anchored_start {
            if let Some(b) = self.prog.prefix_byte {
                match memchr(b, &self.input.as_bytes()[at..]) {
                    Some(i) => at += i,
                    None => return false,
                }
            }
        }
        for s in self.slots.iter_mut() {
            *s = None;
        }
        self.cache.jobs.clear();
        if self.prog.needs_empty_guard {
            let needed = self.prog.num_states * (self.input.len() + 1);
            if self.cache.visited.len() < needed {
                self.cache.visited.resize(needed, 0);
            }
            self.scope = self.fresh_scope();
        }
        self.drain(self.prog.start, at)
    }

    /// Run the search rooted at `(pc, at)` until it matches or the job stack
    /// empties.
    fn drain(&mut self, pc: InstPtr, at: usize) -> bool {
        let base = self.cache.jobs.len();
        self.cache.jobs.push(Job::Inst { pc, at });
        while self.cache.jobs.len() > base {
            match self.cache.jobs.pop().unwrap() {
                Job::Inst { pc, at } => {
                    if self.step(pc, at) {
                        return true;
                    }
                }
                Job::SaveRestore { slot, old } => self.slots[slot] = old,
            }
        }
        false
    }

    /// Execute one path until it matches, fails, or branches. Branching
    /// pushes the fallback and continues in place, which keeps the hot loop
    /// free of stack traffic.
    fn step(&mut self, mut pc: InstPtr, mut at: usize) -> bool {
        loop {
            if self.steps_left == 0 {
                return false;
            }
            self.steps_left -= 1;
            match self.prog.insts[pc] {
                Inst::Match => return true,
                Inst::Save { slot } => {
                    if slot < self.slots.len() {
                        let old = self.slots[slot];
                        self.cache.jobs.push(Job::SaveRestore { slot, old });
                        self.slots[slot] = Some(at);
                    }
                    pc += 1;
                }
                Inst::Jump { loc } => pc = loc,
                Inst::Split { pref, sec } => {
                    self.cache.jobs.push(Job::Inst { pc: sec, at });
                    pc = pref;
                }
                Inst::Bot => {
                    if at != 0 {
                        return false;
                    }
                    pc += 1;
                }
                Inst::Eot => {
                    if at != self.input.len() {
                        return false;
                    }
                    pc += 1;
                }
                Inst::Bol => {
                    let prev = self.input.prev_char(at);
                    if !(at == 0 || matches!(prev, Some('\n') | Some('\r'))) {
                        return false;
                    }
                    pc += 1;
                }
                Inst::Eol => {
                    let next = self.input.char_at(at);
                    if !(next.is_none()
                        || matches!(next, Some('\n') | Some('\r')))
                    {
                        return false;
                    }
                    pc += 1;
                }
                Inst::WordBoundary { positive } => {
                    let prev = is_word_char(self.input.prev_char(at));
                    let next = is_word_char(self.input.char_at(at));
                    if (prev != next) != positive {
                        return false;
                    }
                    pc += 1;
                }
                Inst::LookAround { ahead, positive, distance, jump } => {
                    if self.assert_look(pc, ahead, distance, at) != positive {
                        return false;
                    }
                    pc = jump;
                }
                ref inst => {
                    debug_assert!(inst.is_consuming());
                    match self.input.char_at(at) {
                        Some(c) if inst.matches_char(c) => {
                            at += c.len_utf8();
                            pc += 1;
                        }
                        _ => return false,
                    }
                }
            }
            if self.scope != 0 && self.visit(pc, at) {
                return false;
            }
        }
    }

    /// Evaluate a look-around body as a nested search over the same job
    /// stack, bounded by a base marker.
    ///
    /// On body success the untried branches above the base are discarded
    /// (the assertion result is settled) but its capture rewind jobs are
    /// kept, so backtracking past the assertion later still unwinds any
    /// captures its body wrote. On body failure the nested drain itself has
    /// already rewound them.
    fn assert_look(
        &mut self,
        la: InstPtr,
        ahead: bool,
        distance: usize,
        at: usize,
    ) -> bool {
        let body_at = if ahead {
            Some(at)
        } else {
            self.input.step_back(at, distance)
        };
        let body_at = match body_at {
            Some(p) => p,
            None => return false,
        };
        let base = self.cache.jobs.len();
        let saved_scope = self.scope;
        if self.scope != 0 {
            self.scope = self.fresh_scope();
        }
        self.cache.jobs.push(Job::Inst { pc: la + 1, at: body_at });
        let mut matched = false;
        while self.cache.jobs.len() > base {
            match self.cache.jobs.pop().unwrap() {
                Job::Inst { pc, at } => {
                    if self.step(pc, at) {
                        matched = true;
                        break;
                    }
                }
                Job::SaveRestore { slot, old } => self.slots[slot] = old,
            }
        }
        if matched {
            let tail: Vec<Job> = self.cache.jobs.split_off(base);
            self.cache
                .jobs
                .extend(tail.into_iter().filter(|j| matches!(j, Job::SaveRestore { .. })));
        }
        self.scope = saved_scope;
        matched
    }

    /// Mark `(pc, at)` as explored in the current scope; true if it already
    /// was. First arrival is the highest-priority path, so cutting every
    /// revisit preserves leftmost-first semantics.
    fn visit(&mut self, pc: InstPtr, at: usize) -> bool {
        let k = pc * (self.input.len() + 1) + at;
        if self.cache.visited[k] == self.scope {
            true
        } else {
            self.cache.visited[k] = self.scope;
            false
        }
    }

    fn fresh_scope(&mut self) -> u32 {
        self.cache.next_scope = match self.cache.next_scope.checked_add(1) {
            Some(n) => n,
            None => {
                // Stamp space exhausted; clear and start over.
                for v in self.cache.visited.iter_mut() {
                    *v = 0;
                }
                1
            }
        };
        self.cache.next_scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;
    use crate::re::Engine;

    fn find(pattern: &str, text: &str) -> Option<(usize, usize)> {
        let prog = compile(pattern).unwrap();
        let engine = BacktrackEngine::new(&prog);
        let mut slots = [None, None];
        engine.read_captures_at(&mut slots, text, 0)
    }

    #[test]
    fn leftmost_first_search() {
        assert_eq!(find("b+", "aabbbc"), Some((2, 5)));
        assert_eq!(find("a|ab", "ab"), Some((0, 1)));
    }

    #[test]
    fn greedy_and_lazy() {
        assert_eq!(find("a+", "aaab"), Some((0, 3)));
        assert_eq!(find("a+?", "aaab"), Some((0, 1)));
    }

    #[test]
    fn captures_rewind_on_backtrack() {
        let prog = compile("(a+)(ab)").unwrap();
        let engine = BacktrackEngine::new(&prog);
        let mut slots = vec![None; prog.slots_len()];
        // The greedy first group must give back an 'a' for the second group
        // to match, and its recorded end must reflect that.
        let (s, e) = engine.read_captures_at(&mut slots, "aaab", 0).unwrap();
        assert_eq!((s, e), (0, 4));
        assert_eq!(&slots[2..], &[Some(0), Some(2), Some(2), Some(4)]);
    }

    #[test]
    fn lookahead() {
        assert_eq!(find("q(?=u)", "qu"), Some((0, 1)));
        assert_eq!(find("q(?=u)", "qo"), None);
        assert_eq!(find("q(?!u)", "qo"), Some((0, 1)));
        assert_eq!(find("q(?!u)", "qu"), None);
    }

    #[test]
    fn lookbehind() {
        assert_eq!(find("(?<=q)u", "qu"), Some((1, 2)));
        assert_eq!(find("(?<=q)u", "!u"), None);
        assert_eq!(find("(?<!q)u", "qu"), None);
        assert_eq!(find("(?<!q)u", "!u"), Some((1, 2)));
        // At the very start there is nothing behind, so the body cannot
        // match and the negative form holds.
        assert_eq!(find("(?<!q)u", "u"), Some((0, 1)));
        assert_eq!(find("(?<=q)u", "u"), None);
    }

    #[test]
    fn lookbehind_steps_over_multibyte() {
        assert_eq!(find("(?<=こ)ん", "こんにちは"), Some((3, 6)));
    }

    #[test]
    fn lookaround_with_alternation_body() {
        assert_eq!(find("x(?=a|b)", "xb"), Some((0, 1)));
        assert_eq!(find("x(?=a|b)", "xc"), None);
    }

    #[test]
    fn empty_width_loops_terminate() {
        assert_eq!(find("(a?)*", "b"), Some((0, 0)));
        assert_eq!(find("(a*)*c", "aab"), None);
        assert_eq!(find("(?:a|)+x", "aax"), Some((0, 3)));
    }

    #[test]
    fn step_limit_gives_up_cleanly() {
        let prog = compile("a?a?a?aaa").unwrap();
        let engine = BacktrackEngine::new(&prog).step_limit(2);
        let mut slots = [None, None];
        assert_eq!(engine.read_captures_at(&mut slots, "aaa", 0), None);
        let engine = BacktrackEngine::new(&prog);
        assert_eq!(engine.read_captures_at(&mut slots, "aaa", 0), Some((0, 3)));
    }

    #[test]
    fn anchored_fail_backtracks_out() {
        assert_eq!(find("^a{2,3}b", "aaaab"), None);
        assert_eq!(find("^a{2,3}b", "aaab"), Some((0, 4)));
    }
}

use std::fmt;
use std::ops::Deref;
use std::slice;

use crate::backtrack::BacktrackCache;
use crate::lockstep::LockstepCache;
use crate::pool::{Pool, PoolGuard};

/// The index of an instruction in a program.
///
/// Distinct program positions double as the automaton states of the lockstep
/// engine, so an `InstPtr` is also a state id: state ids are dense in
/// `[0, num_states)` and follow instruction order.
pub type InstPtr = usize;

/// A single instruction of a compiled program.
///
/// Consuming instructions (everything matching one character) fall through
/// to `pc + 1` on success; control flow is explicit via `Split` and `Jump`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Inst {
    /// Match one code point equal to `c`.
    Char {
        /// The code point to match.
        c: char,
    },
    /// Match one code point whose ASCII lowercase form equals `c`.
    /// `c` is lowercased when the program is built.
    IChar {
        /// The lowercased code point to match.
        c: char,
    },
    /// Match any one code point, newlines included.
    AnyChar,
    /// Match one code point in the inclusive range `lo..=hi`.
    CharRange {
        /// First code point of the range.
        lo: u32,
        /// Last code point of the range.
        hi: u32,
    },
    /// Match one code point whose ASCII lowercase form lies in `lo..=hi`.
    /// The endpoints are lowercased when the program is built.
    ICharRange {
        /// First (lowered) code point of the range.
        lo: u32,
        /// Last (lowered) code point of the range.
        hi: u32,
    },
    /// Match one code point below 128 whose bit is set in the bitmap.
    CharBitmap {
        /// One bit per ASCII code point.
        bits: u128,
    },
    /// Record the current input offset in a capture slot.
    Save {
        /// Slot index; slots `2k`/`2k+1` bracket group `k`.
        slot: usize,
    },
    /// Branch: try `pref` first, then `sec`.
    Split {
        /// The preferred branch. A match found through it outranks any
        /// match found through `sec`.
        pref: InstPtr,
        /// The fallback branch.
        sec: InstPtr,
    },
    /// Continue at `loc`.
    Jump {
        /// Target instruction.
        loc: InstPtr,
    },
    /// Accept.
    Match,
    /// Match at the start of the input or just after a line terminator.
    Bol,
    /// Match at the end of the input or just before a line terminator.
    Eol,
    /// Match only at byte offset 0.
    Bot,
    /// Match only at the end of the input.
    Eot,
    /// Match at a word boundary (`positive`) or anywhere but one.
    WordBoundary {
        /// True for `\b`, false for `\B`.
        positive: bool,
    },
    /// Header of a look-around subprogram. The body starts at the next
    /// instruction and is terminated by its own `Match`; `jump` points just
    /// past that terminator.
    LookAround {
        /// True for look-ahead, false for look-behind.
        ahead: bool,
        /// True for `(?=`/`(?<=`, false for `(?!`/`(?<!`.
        positive: bool,
        /// For look-behind: the fixed number of characters the body spans.
        distance: usize,
        /// Where the surrounding program continues.
        jump: InstPtr,
    },
}

impl Inst {
    /// True if this instruction consumes one character when it succeeds.
    pub fn is_consuming(&self) -> bool {
        matches!(
            *self,
            Inst::Char { .. }
                | Inst::IChar { .. }
                | Inst::AnyChar
                | Inst::CharRange { .. }
                | Inst::ICharRange { .. }
                | Inst::CharBitmap { .. }
        )
    }

    /// Test a consuming instruction against one character. Returns false for
    /// non-consuming instructions.
    #[inline]
    pub fn matches_char(&self, c: char) -> bool {
        match *self {
            Inst::Char { c: want } => c == want,
            Inst::IChar { c: want } => c.to_ascii_lowercase() == want,
            Inst::AnyChar => true,
            Inst::CharRange { lo, hi } => {
                let cp = c as u32;
                lo <= cp && cp <= hi
            }
            Inst::ICharRange { lo, hi } => {
                let cp = c.to_ascii_lowercase() as u32;
                lo <= cp && cp <= hi
            }
            Inst::CharBitmap { bits } => {
                let cp = c as u32;
                cp < 128 && bits >> cp & 1 == 1
            }
            _ => false,
        }
    }
}

/// A compiled program: the linear instruction stream plus the facts about it
/// that engines and the match API need.
///
/// A program is immutable once built. It may be shared freely; the mutable
/// scratch each engine family needs lives in pooled caches keyed to this
/// program, so concurrent matchers never step on each other.
#[derive(Clone)]
pub struct Program {
    /// The pattern this program was compiled from.
    pub pattern: String,
    /// The instruction sequence.
    pub insts: Vec<Inst>,
    /// Index of the first instruction to execute.
    pub start: InstPtr,
    /// Number of capture groups, counting the implicit group 0.
    pub captures: usize,
    /// Number of automaton states; equals `insts.len()`.
    pub num_states: usize,
    /// True if every match must begin at byte offset 0, i.e. the pattern
    /// opens with a start-of-text anchor. Such programs carry no search
    /// prefix.
    pub is_anchored_start: bool,
    /// True if the program contains look-around instructions, which only
    /// the backtracking engine can execute.
    pub has_look: bool,
    /// True if some unbounded repetition could iterate without consuming
    /// input; the backtracking engine then runs with its duplicate-state
    /// guard enabled.
    pub needs_empty_guard: bool,
    /// If every match begins with this literal byte, engines may skip ahead
    /// to its next occurrence before simulating anything.
    pub prefix_byte: Option<u8>,
    /// Pooled scratch for the matching engines.
    pub cache: EngineCache,
}

impl Program {
    /// Total number of capture slots (two per group).
    pub fn slots_len(&self) -> usize {
        2 * self.captures
    }

    /// If `pc` points at a `Save`, return the next position that is not a
    /// `Save`.
    pub fn skip(&self, mut pc: usize) -> usize {
        while let Inst::Save { .. } = self.insts[pc] {
            pc += 1;
        }
        pc
    }

    /// Fetch pooled scratch for the lockstep engine.
    pub fn cache_lockstep(&self) -> PoolGuard<'_, Box<LockstepCache>> {
        self.cache.lockstep.get()
    }

    /// Fetch pooled scratch for the backtracking engine.
    pub fn cache_backtrack(&self) -> PoolGuard<'_, Box<BacktrackCache>> {
        self.cache.backtrack.get()
    }
}

impl Deref for Program {
    type Target = [Inst];

    fn deref(&self) -> &[Inst] {
        &self.insts
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Inst;
    type IntoIter = slice::Iter<'a, Inst>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--------------------------------")?;
        writeln!(f, "pattern: {:?}", self.pattern)?;
        for (pc, inst) in self.iter().enumerate() {
            match *inst {
                Inst::Char { c } => writeln!(f, "{:04} Char({:?})", pc, c)?,
                Inst::IChar { c } => writeln!(f, "{:04} IChar({:?})", pc, c)?,
                Inst::AnyChar => writeln!(f, "{:04} AnyChar", pc)?,
                Inst::CharRange { lo, hi } => {
                    writeln!(f, "{:04} CharRange({:04X}-{:04X})", pc, lo, hi)?
                }
                Inst::ICharRange { lo, hi } => {
                    writeln!(f, "{:04} ICharRange({:04X}-{:04X})", pc, lo, hi)?
                }
                Inst::CharBitmap { bits } => {
                    writeln!(f, "{:04} CharBitmap({:032x})", pc, bits)?
                }
                Inst::Save { slot } => writeln!(f, "{:04} Save({})", pc, slot)?,
                Inst::Split { pref, sec } => {
                    writeln!(f, "{:04} Split({}, {})", pc, pref, sec)?
                }
                Inst::Jump { loc } => writeln!(f, "{:04} Jump({})", pc, loc)?,
                Inst::Match => writeln!(f, "{:04} Match", pc)?,
                Inst::Bol => writeln!(f, "{:04} Bol", pc)?,
                Inst::Eol => writeln!(f, "{:04} Eol", pc)?,
                Inst::Bot => writeln!(f, "{:04} Bot", pc)?,
                Inst::Eot => writeln!(f, "{:04} Eot", pc)?,
                Inst::WordBoundary { positive } => {
                    writeln!(f, "{:04} WordBoundary({})", pc, positive)?
                }
                Inst::LookAround { ahead, positive, distance, jump } => {
                    writeln!(
                        f,
                        "{:04} LookAround(ahead={}, positive={}, distance={}, jump={})",
                        pc, ahead, positive, distance, jump
                    )?
                }
            }
        }
        writeln!(f, "--------------------------------")?;
        Ok(())
    }
}

/// Reusable allocations for each matching engine available to a program.
///
/// Caches are created lazily, so a program only pays for the engine families
/// actually used on it.
#[derive(Debug, Default)]
pub struct EngineCache {
    lockstep: Pool<Box<LockstepCache>>,
    backtrack: Pool<Box<BacktrackCache>>,
}

impl EngineCache {
    /// Create empty pools.
    pub fn new() -> EngineCache {
        EngineCache::default()
    }
}

impl Clone for EngineCache {
    fn clone(&self) -> EngineCache {
        EngineCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile;

    #[test]
    fn skip_walks_past_saves() {
        // Program shape: Save(0), Bot, Save(2), Char, Save(3), Save(1), Match.
        let p = compile("^(a)").unwrap();
        assert_eq!(p.skip(0), 1);
        assert_eq!(p.skip(2), 3);
        assert!(matches!(p.insts[p.skip(2)], Inst::Char { c: 'a' }));
    }

    #[test]
    fn slots_count_two_per_group() {
        let p = compile("(a)(b)").unwrap();
        assert_eq!(p.captures, 3);
        assert_eq!(p.slots_len(), 6);
    }

    #[test]
    fn consuming_instructions_match_chars() {
        assert!(Inst::Char { c: 'x' }.matches_char('x'));
        assert!(!Inst::Char { c: 'x' }.matches_char('y'));
        assert!(Inst::IChar { c: 'x' }.matches_char('X'));
        assert!(Inst::AnyChar.matches_char('\n'));
        assert!(Inst::CharRange { lo: 0x61, hi: 0x7A }.matches_char('q'));
        assert!(Inst::ICharRange { lo: 0x61, hi: 0x7A }.matches_char('Q'));
        assert!(Inst::CharBitmap { bits: 1 << 0x61 }.matches_char('a'));
        assert!(!Inst::CharBitmap { bits: 1 << 0x61 }.matches_char('é'));
        assert!(!Inst::Match.matches_char('a'));
        assert!(!Inst::Save { slot: 0 }.is_consuming());
        assert!(Inst::AnyChar.is_consuming());
    }

    #[test]
    fn debug_listing_shows_every_instruction() {
        let p = compile("^(a|b)c").unwrap();
        let listing = format!("{:?}", p);
        for (pc, _) in p.insts.iter().enumerate() {
            assert!(listing.contains(&format!("{:04} ", pc)));
        }
    }
}

use log::trace;

use crate::error::{Error, ParseErrorKind};
use crate::prog::{EngineCache, Inst, Program};
use crate::span::{Span, SpanSet};

/// Maximum group nesting depth before parsing gives up.
const NEST_LIMIT: u32 = 250;

/// Largest bound accepted in a counted repetition.
const MAX_REPEAT: usize = 65_535;

/// Compile a pattern into an executable program.
///
/// The parser is a single recursive-descent pass that emits instructions
/// directly into the growing program. Quantifiers and alternations need a
/// branch in front of code that has already been emitted, so the parser
/// splices instructions in and relocates every downstream jump target; see
/// `shift_region`.
pub fn compile(pattern: &str) -> Result<Program, Error> {
    let mut p = Parser {
        pattern,
        pos: 0,
        insts: Vec::new(),
        flags: Flags::default(),
        groups: 0,
        depth: 0,
        needs_empty_guard: false,
    };
    p.push(Inst::Save { slot: 0 });
    p.parse_alternation()?;
    if p.pos < pattern.len() {
        // The only way the top level stops early is a stray ')'.
        return Err(p.err(ParseErrorKind::UnopenedGroup));
    }
    p.push(Inst::Save { slot: 1 });
    p.push(Inst::Match);

    let mut body = 0;
    while let Inst::Save { .. } = p.insts[body] {
        body += 1;
    }
    let anchored = matches!(p.insts[body], Inst::Bot);
    let prefix_byte = if anchored { None } else { p.first_literal_byte() };
    if !anchored {
        // Unanchored programs get a lazy dot-star in front so that matching
        // at `start` searches forward from there.
        p.shift_region(0, 3);
        p.insts.splice(
            0..0,
            [
                Inst::Split { pref: 3, sec: 1 },
                Inst::AnyChar,
                Inst::Jump { loc: 0 },
            ],
        );
    }

    let num_states = p.insts.len();
    for inst in &p.insts {
        match *inst {
            Inst::Split { pref, sec } => {
                debug_assert!(pref < num_states && sec < num_states);
            }
            Inst::Jump { loc } => debug_assert!(loc < num_states),
            Inst::LookAround { jump, .. } => debug_assert!(jump < num_states),
            _ => {}
        }
    }
    let has_look =
        p.insts.iter().any(|i| matches!(i, Inst::LookAround { .. }));
    trace!(
        "compiled /{}/: {} instructions, {} capture groups",
        pattern,
        num_states,
        p.groups + 1
    );
    Ok(Program {
        pattern: pattern.to_string(),
        insts: p.insts,
        start: 0,
        captures: p.groups + 1,
        num_states,
        is_anchored_start: anchored,
        has_look,
        needs_empty_guard: p.needs_empty_guard,
        prefix_byte,
        cache: EngineCache::new(),
    })
}

/// How many characters a subexpression consumes, tracked so look-behind can
/// measure its body and reject the unmeasurable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FixedLen {
    /// Every path through the subexpression consumes exactly this many
    /// characters.
    Fixed(usize),
    /// Paths consume differing amounts (quantifiers).
    Variable,
    /// Alternatives are individually fixed but disagree with each other.
    Mixed,
}

impl FixedLen {
    fn add(self, other: FixedLen) -> FixedLen {
        match (self, other) {
            (FixedLen::Fixed(a), FixedLen::Fixed(b)) => FixedLen::Fixed(a + b),
            _ => FixedLen::Variable,
        }
    }

    fn alt(self, other: FixedLen) -> FixedLen {
        match (self, other) {
            (FixedLen::Fixed(a), FixedLen::Fixed(b)) if a == b => {
                FixedLen::Fixed(a)
            }
            (FixedLen::Fixed(_), FixedLen::Fixed(_)) => FixedLen::Mixed,
            _ => FixedLen::Variable,
        }
    }

    fn repeat(self, n: usize) -> FixedLen {
        match self {
            FixedLen::Fixed(a) => FixedLen::Fixed(a * n),
            other if n == 1 => other,
            _ => FixedLen::Variable,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Flags {
    casei: bool,
    multi: bool,
}

/// A literal or a class produced by an escape sequence.
enum Escaped {
    Literal(char),
    Class(SpanSet),
}

struct Parser<'p> {
    pattern: &'p str,
    pos: usize,
    insts: Vec<Inst>,
    flags: Flags,
    groups: usize,
    depth: u32,
    needs_empty_guard: bool,
}

impl<'p> Parser<'p> {
    fn peek(&self) -> Option<char> {
        self.pattern[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn err(&self, kind: ParseErrorKind) -> Error {
        Error::Parse { kind, pos: self.pos }
    }

    fn err_at(&self, kind: ParseErrorKind, pos: usize) -> Error {
        Error::Parse { kind, pos }
    }

    fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    /// Relocate every jump target at or past `from` by `by`, in the
    /// instructions from `from` to the end of the program. Called before
    /// splicing `by` new instructions in at `from`. Targets are `usize::MAX`
    /// while they are unresolved holes; those are left alone.
    fn shift_region(&mut self, from: usize, by: usize) {
        fn shift(t: &mut usize, from: usize, by: usize) {
            if *t != usize::MAX && *t >= from {
                *t += by;
            }
        }
        for i in from..self.insts.len() {
            match &mut self.insts[i] {
                Inst::Split { pref, sec } => {
                    shift(pref, from, by);
                    shift(sec, from, by);
                }
                Inst::Jump { loc } => shift(loc, from, by),
                Inst::LookAround { jump, .. } => shift(jump, from, by),
                _ => {}
            }
        }
    }

    /// Append a copy of a completed fragment originally located at
    /// `orig_start`, rebasing its internal targets to the new location.
    fn append_fragment(&mut self, frag: &[Inst], orig_start: usize) {
        let base = self.insts.len();
        let orig_end = orig_start + frag.len();
        fn rebase(t: &mut usize, orig_start: usize, orig_end: usize, base: usize) {
            debug_assert!(*t >= orig_start && *t <= orig_end);
            *t = *t - orig_start + base;
        }
        for inst in frag {
            let mut inst = inst.clone();
            match &mut inst {
                Inst::Split { pref, sec } => {
                    rebase(pref, orig_start, orig_end, base);
                    rebase(sec, orig_start, orig_end, base);
                }
                Inst::Jump { loc } => rebase(loc, orig_start, orig_end, base),
                Inst::LookAround { jump, .. } => {
                    rebase(jump, orig_start, orig_end, base)
                }
                _ => {}
            }
            self.insts.push(inst);
        }
    }

    /// An unbounded repetition whose body might consume nothing can spin
    /// without advancing; the backtracking engine enables its duplicate
    /// guard for such programs.
    fn note_loop(&mut self, atom_len: FixedLen) {
        if !matches!(atom_len, FixedLen::Fixed(n) if n > 0) {
            self.needs_empty_guard = true;
        }
    }

    /// If every match must begin with one specific ASCII byte, return it.
    fn first_literal_byte(&self) -> Option<u8> {
        let mut pc = 0;
        loop {
            match self.insts[pc] {
                Inst::Save { .. }
                | Inst::Bol
                | Inst::Eol
                | Inst::Eot
                | Inst::WordBoundary { .. } => pc += 1,
                Inst::Char { c } if c.is_ascii() => return Some(c as u8),
                _ => return None,
            }
        }
    }

    fn parse_alternation(&mut self) -> Result<FixedLen, Error> {
        let start = self.insts.len();
        let mut len = self.parse_concat()?;
        let mut jumps: Vec<usize> = vec![];
        while self.eat('|') {
            // Wrap everything parsed so far in a branch preferring it, with
            // an exit jump patched once the whole alternation is known.
            self.shift_region(start, 1);
            for j in &mut jumps {
                *j += 1;
            }
            self.insts
                .insert(start, Inst::Split { pref: start + 1, sec: usize::MAX });
            let jmp = self.insts.len();
            self.push(Inst::Jump { loc: usize::MAX });
            jumps.push(jmp);
            let sec = self.insts.len();
            if let Inst::Split { sec: s, .. } = &mut self.insts[start] {
                *s = sec;
            }
            let rlen = self.parse_concat()?;
            len = len.alt(rlen);
        }
        let end = self.insts.len();
        for j in jumps {
            self.insts[j] = Inst::Jump { loc: end };
        }
        Ok(len)
    }

    fn parse_concat(&mut self) -> Result<FixedLen, Error> {
        let mut len = FixedLen::Fixed(0);
        loop {
            match self.peek() {
                None | Some('|') | Some(')') => return Ok(len),
                Some(_) => {}
            }
            let l = self.parse_rep()?;
            len = len.add(l);
        }
    }

    fn parse_rep(&mut self) -> Result<FixedLen, Error> {
        let start = self.insts.len();
        let atom_len = self.parse_atom()?;
        let quant = match self.peek() {
            Some(c @ ('*' | '+' | '?' | '{')) => c,
            _ => return Ok(atom_len),
        };
        let quant_pos = self.pos;
        if self.insts.len() == start {
            // Nothing repeatable was emitted, e.g. `(?i)*`.
            return Err(self.err_at(ParseErrorKind::DanglingQuantifier, quant_pos));
        }
        self.bump();
        match quant {
            '*' => {
                let lazy = self.eat('?');
                self.note_loop(atom_len);
                self.wrap_star(start, lazy);
                Ok(FixedLen::Variable)
            }
            '+' => {
                let lazy = self.eat('?');
                self.note_loop(atom_len);
                self.wrap_plus(start, lazy);
                Ok(FixedLen::Variable)
            }
            '?' => {
                let lazy = self.eat('?');
                self.wrap_question(start, lazy);
                Ok(FixedLen::Variable)
            }
            '{' => self.parse_counted(start, atom_len, quant_pos),
            _ => unreachable!(),
        }
    }

    /// `atom*` becomes `L1: Split L2,L3; L2: atom; Jump L1; L3:`, with the
    /// split targets swapped for the lazy form.
    fn wrap_star(&mut self, start: usize, lazy: bool) {
        let end = self.insts.len();
        self.shift_region(start, 1);
        let (pref, sec) = if lazy {
            (end + 2, start + 1)
        } else {
            (start + 1, end + 2)
        };
        self.insts.insert(start, Inst::Split { pref, sec });
        self.push(Inst::Jump { loc: start });
    }

    /// `atom+` becomes `L1: atom; Split L1,next`.
    fn wrap_plus(&mut self, start: usize, lazy: bool) {
        let end = self.insts.len();
        let (pref, sec) = if lazy { (end + 1, start) } else { (start, end + 1) };
        self.push(Inst::Split { pref, sec });
    }

    /// `atom?` becomes `Split atom,after`.
    fn wrap_question(&mut self, start: usize, lazy: bool) {
        let end = self.insts.len();
        self.shift_region(start, 1);
        let (pref, sec) = if lazy {
            (end + 1, start + 1)
        } else {
            (start + 1, end + 1)
        };
        self.insts.insert(start, Inst::Split { pref, sec });
    }

    fn parse_counted(
        &mut self,
        start: usize,
        atom_len: FixedLen,
        brace_pos: usize,
    ) -> Result<FixedLen, Error> {
        let min = match self.parse_decimal()? {
            Some(n) => n,
            None => {
                return Err(
                    self.err_at(ParseErrorKind::MissingRepetitionMin, brace_pos)
                )
            }
        };
        let max = if self.eat(',') { self.parse_decimal()? } else { Some(min) };
        if !self.eat('}') {
            return Err(self.err_at(ParseErrorKind::UnclosedRepetition, brace_pos));
        }
        if let Some(mx) = max {
            if min > mx {
                return Err(
                    self.err_at(ParseErrorKind::InvalidRepetitionRange, brace_pos)
                );
            }
        }
        let lazy = self.eat('?');
        let frag: Vec<Inst> = self.insts[start..].to_vec();
        match max {
            Some(mx) if mx == min => {
                if min == 0 {
                    self.insts.truncate(start);
                    return Ok(FixedLen::Fixed(0));
                }
                for _ in 1..min {
                    self.append_fragment(&frag, start);
                }
                Ok(atom_len.repeat(min))
            }
            Some(mx) => {
                if min == 0 {
                    self.insts.truncate(start);
                } else {
                    for _ in 1..min {
                        self.append_fragment(&frag, start);
                    }
                }
                // Optional copies all skip straight to the shared end, so
                // the epsilon closure of each split stays small instead of
                // walking a chain of splits.
                let mut skips = Vec::new();
                for _ in min..mx {
                    let sp = self.insts.len();
                    let inst = if lazy {
                        Inst::Split { pref: usize::MAX, sec: sp + 1 }
                    } else {
                        Inst::Split { pref: sp + 1, sec: usize::MAX }
                    };
                    self.push(inst);
                    skips.push(sp);
                    self.append_fragment(&frag, start);
                }
                let end = self.insts.len();
                for sp in skips {
                    if let Inst::Split { pref, sec } = &mut self.insts[sp] {
                        if lazy {
                            *pref = end;
                        } else {
                            *sec = end;
                        }
                    }
                }
                Ok(FixedLen::Variable)
            }
            None => {
                self.note_loop(atom_len);
                if min == 0 {
                    self.wrap_star(start, lazy);
                } else {
                    for _ in 1..min {
                        self.append_fragment(&frag, start);
                    }
                    let cs = self.insts.len();
                    self.append_fragment(&frag, start);
                    self.wrap_star(cs, lazy);
                }
                Ok(FixedLen::Variable)
            }
        }
    }

    fn parse_decimal(&mut self) -> Result<Option<usize>, Error> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == start {
            return Ok(None);
        }
        match self.pattern[start..self.pos].parse::<usize>() {
            Ok(n) if n <= MAX_REPEAT => Ok(Some(n)),
            _ => Err(self.err_at(ParseErrorKind::InvalidRepetitionCount, start)),
        }
    }

    fn parse_atom(&mut self) -> Result<FixedLen, Error> {
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(FixedLen::Fixed(0)),
        };
        match c {
            '(' => {
                self.bump();
                self.parse_group()
            }
            '[' => {
                self.bump();
                self.parse_class()
            }
            '.' => {
                self.bump();
                self.push(Inst::AnyChar);
                Ok(FixedLen::Fixed(1))
            }
            '\\' => {
                self.bump();
                self.parse_escape()
            }
            '^' => {
                self.bump();
                self.push(if self.flags.multi { Inst::Bol } else { Inst::Bot });
                Ok(FixedLen::Fixed(0))
            }
            '$' => {
                self.bump();
                self.push(if self.flags.multi { Inst::Eol } else { Inst::Eot });
                Ok(FixedLen::Fixed(0))
            }
            '*' | '+' | '?' | '{' => Err(self.err(ParseErrorKind::DanglingQuantifier)),
            _ => {
                self.bump();
                self.push_literal(c);
                Ok(FixedLen::Fixed(1))
            }
        }
    }

    fn push_literal(&mut self, c: char) {
        if self.flags.casei {
            self.push(Inst::IChar { c: c.to_ascii_lowercase() });
        } else {
            self.push(Inst::Char { c });
        }
    }

    fn parse_group(&mut self) -> Result<FixedLen, Error> {
        let open_pos = self.pos - 1;
        if self.depth >= NEST_LIMIT {
            return Err(self.err_at(ParseErrorKind::ExcessiveNesting, open_pos));
        }
        self.depth += 1;
        let result = self.parse_group_body(open_pos);
        self.depth -= 1;
        result
    }

    fn parse_group_body(&mut self, open_pos: usize) -> Result<FixedLen, Error> {
        if !self.eat('?') {
            let saved = self.flags;
            self.groups += 1;
            let idx = self.groups;
            self.push(Inst::Save { slot: 2 * idx });
            let len = self.parse_alternation()?;
            self.expect_group_close(open_pos)?;
            self.push(Inst::Save { slot: 2 * idx + 1 });
            self.flags = saved;
            return Ok(len);
        }
        match self.peek() {
            Some('=') => {
                self.bump();
                self.parse_look(true, true, open_pos)
            }
            Some('!') => {
                self.bump();
                self.parse_look(true, false, open_pos)
            }
            Some('<') => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        self.parse_look(false, true, open_pos)
                    }
                    Some('!') => {
                        self.bump();
                        self.parse_look(false, false, open_pos)
                    }
                    _ => Err(self.err_at(ParseErrorKind::InvalidLookAround, open_pos)),
                }
            }
            Some(':') => {
                self.bump();
                let saved = self.flags;
                let len = self.parse_alternation()?;
                self.expect_group_close(open_pos)?;
                self.flags = saved;
                Ok(len)
            }
            Some('i') | Some('m') | Some('-') => self.parse_flags_group(open_pos),
            _ => Err(self.err(ParseErrorKind::UnknownGroupFlag)),
        }
    }

    /// Parse the flags of `(?flags)` or `(?flags:...)`. The bare form leaves
    /// the new flags in place for the rest of the enclosing body; the scoped
    /// form restores them at its `)`.
    fn parse_flags_group(&mut self, open_pos: usize) -> Result<FixedLen, Error> {
        let saved = self.flags;
        let mut negate = false;
        let mut dangling_negate = false;
        loop {
            let pos = self.pos;
            match self.bump() {
                Some('i') => {
                    self.flags.casei = !negate;
                    dangling_negate = false;
                }
                Some('m') => {
                    self.flags.multi = !negate;
                    dangling_negate = false;
                }
                Some('-') => {
                    if negate {
                        return Err(self.err_at(ParseErrorKind::UnknownGroupFlag, pos));
                    }
                    negate = true;
                    dangling_negate = true;
                }
                Some(':') => {
                    if dangling_negate {
                        return Err(self.err_at(ParseErrorKind::UnknownGroupFlag, pos));
                    }
                    let len = self.parse_alternation()?;
                    self.expect_group_close(open_pos)?;
                    self.flags = saved;
                    return Ok(len);
                }
                Some(')') => {
                    if dangling_negate {
                        return Err(self.err_at(ParseErrorKind::UnknownGroupFlag, pos));
                    }
                    return Ok(FixedLen::Fixed(0));
                }
                _ => return Err(self.err_at(ParseErrorKind::UnknownGroupFlag, pos)),
            }
        }
    }

    fn parse_look(
        &mut self,
        ahead: bool,
        positive: bool,
        open_pos: usize,
    ) -> Result<FixedLen, Error> {
        let saved = self.flags;
        let la = self.insts.len();
        self.push(Inst::LookAround {
            ahead,
            positive,
            distance: 0,
            jump: usize::MAX,
        });
        let len = self.parse_alternation()?;
        self.expect_group_close(open_pos)?;
        self.flags = saved;
        self.push(Inst::Match);
        let jump = self.insts.len();
        let distance = if ahead {
            0
        } else {
            match len {
                FixedLen::Fixed(n) => n,
                FixedLen::Mixed => {
                    return Err(self.err_at(
                        ParseErrorKind::UnequalLookBehindAlternatives,
                        open_pos,
                    ))
                }
                FixedLen::Variable => {
                    return Err(
                        self.err_at(ParseErrorKind::VariableLookBehind, open_pos)
                    )
                }
            }
        };
        if let Inst::LookAround { distance: d, jump: j, .. } = &mut self.insts[la]
        {
            *d = distance;
            *j = jump;
        }
        Ok(FixedLen::Fixed(0))
    }

    fn expect_group_close(&mut self, open_pos: usize) -> Result<(), Error> {
        if self.eat(')') {
            Ok(())
        } else {
            Err(self.err_at(ParseErrorKind::UnclosedGroup, open_pos))
        }
    }

    fn parse_escape(&mut self) -> Result<FixedLen, Error> {
        match self.peek() {
            Some('b') => {
                self.bump();
                self.push(Inst::WordBoundary { positive: true });
                Ok(FixedLen::Fixed(0))
            }
            Some('B') => {
                self.bump();
                self.push(Inst::WordBoundary { positive: false });
                Ok(FixedLen::Fixed(0))
            }
            _ => match self.class_escape()? {
                Escaped::Class(set) => {
                    self.emit_set(&set);
                    Ok(FixedLen::Fixed(1))
                }
                Escaped::Literal(c) => {
                    self.push_literal(c);
                    Ok(FixedLen::Fixed(1))
                }
            },
        }
    }

    /// The escape alphabet shared between atoms and classes. `\b` is not
    /// handled here since it means a word boundary outside a class and a
    /// literal inside one.
    fn class_escape(&mut self) -> Result<Escaped, Error> {
        let c = match self.bump() {
            Some(c) => c,
            None => return Err(self.err(ParseErrorKind::IncompleteEscape)),
        };
        Ok(match c {
            'd' => Escaped::Class(digit_set()),
            'D' => Escaped::Class(digit_set().complement()),
            'w' => Escaped::Class(word_set()),
            'W' => Escaped::Class(word_set().complement()),
            's' => Escaped::Class(space_set()),
            'S' => Escaped::Class(space_set().complement()),
            'a' => Escaped::Literal('\x07'),
            'f' => Escaped::Literal('\x0C'),
            't' => Escaped::Literal('\t'),
            'n' => Escaped::Literal('\n'),
            'r' => Escaped::Literal('\r'),
            'v' => Escaped::Literal('\x0B'),
            c => Escaped::Literal(c),
        })
    }

    fn parse_class(&mut self) -> Result<FixedLen, Error> {
        let class_pos = self.pos - 1;
        let negated = self.eat('^');
        let mut set = SpanSet::new();
        let mut first = true;
        loop {
            let c = match self.peek() {
                None => {
                    return Err(
                        self.err_at(ParseErrorKind::UnclosedClass, class_pos)
                    )
                }
                Some(c) => c,
            };
            if c == ']' && !first {
                self.bump();
                break;
            }
            first = false;
            if c == '\\' {
                self.bump();
                match self.class_escape()? {
                    Escaped::Literal(lo) => self.parse_class_range(&mut set, lo)?,
                    Escaped::Class(s) => set.add_set(&s),
                }
            } else {
                self.bump();
                self.parse_class_range(&mut set, c)?;
            }
        }
        let set = if negated { set.complement() } else { set };
        self.emit_set(&set);
        Ok(FixedLen::Fixed(1))
    }

    /// Having read one class item character, either record it alone or as
    /// the start of a `c-c` range.
    fn parse_class_range(
        &mut self,
        set: &mut SpanSet,
        lo: char,
    ) -> Result<(), Error> {
        if self.peek() != Some('-') {
            set.add(Span::single(lo));
            return Ok(());
        }
        let dash_pos = self.pos;
        self.bump();
        let hi = match self.peek() {
            // A trailing dash is a literal; rewind and let the main loop
            // pick it up.
            None | Some(']') => {
                self.pos = dash_pos;
                set.add(Span::single(lo));
                return Ok(());
            }
            Some('\\') => {
                self.bump();
                match self.class_escape()? {
                    Escaped::Literal(c) => c,
                    Escaped::Class(_) => {
                        return Err(self.err_at(
                            ParseErrorKind::InvalidClassRange,
                            dash_pos,
                        ))
                    }
                }
            }
            Some(c) => {
                self.bump();
                c
            }
        };
        if (hi as u32) < (lo as u32) {
            return Err(self.err_at(ParseErrorKind::InvalidClassRange, dash_pos));
        }
        set.add(Span::new(lo as u32, hi as u32));
        Ok(())
    }

    /// Emit the instructions matching one character from `set`. All-ASCII
    /// sets become a single bitmap test; anything else becomes one range
    /// instruction, or a split chain over several with every exit patched
    /// to the shared end.
    fn emit_set(&mut self, set: &SpanSet) {
        if set.is_empty() {
            // Matches nothing at all.
            self.push(Inst::CharBitmap { bits: 0 });
            return;
        }
        if set.max().map_or(false, |m| m < 128) {
            let mut bits: u128 = 0;
            for sp in set.iter() {
                for cp in sp.lo..=sp.hi {
                    bits |= 1 << cp;
                }
            }
            if self.flags.casei {
                for upper in 0x41u32..=0x5A {
                    let lower = upper + 0x20;
                    if bits >> upper & 1 == 1 {
                        bits |= 1 << lower;
                    }
                    if bits >> lower & 1 == 1 {
                        bits |= 1 << upper;
                    }
                }
            }
            self.push(Inst::CharBitmap { bits });
            return;
        }
        let spans: Vec<Span> = set.iter().copied().collect();
        if spans.len() == 1 {
            self.push_span(spans[0]);
            return;
        }
        let mut exits = Vec::new();
        for (i, &sp) in spans.iter().enumerate() {
            if i + 1 < spans.len() {
                let split = self.insts.len();
                self.push(Inst::Split { pref: split + 1, sec: usize::MAX });
                self.push_span(sp);
                let jmp = self.insts.len();
                self.push(Inst::Jump { loc: usize::MAX });
                exits.push(jmp);
                let next = self.insts.len();
                if let Inst::Split { sec, .. } = &mut self.insts[split] {
                    *sec = next;
                }
            } else {
                self.push_span(sp);
            }
        }
        let end = self.insts.len();
        for jmp in exits {
            self.insts[jmp] = Inst::Jump { loc: end };
        }
    }

    fn push_span(&mut self, sp: Span) {
        if sp.lo == sp.hi {
            if let Some(c) = char::from_u32(sp.lo) {
                self.push_literal(c);
                return;
            }
        }
        if self.flags.casei {
            self.push(Inst::ICharRange {
                lo: lower_codepoint(sp.lo),
                hi: lower_codepoint(sp.hi),
            });
        } else {
            self.push(Inst::CharRange { lo: sp.lo, hi: sp.hi });
        }
    }
}

fn lower_codepoint(cp: u32) -> u32 {
    if (0x41..=0x5A).contains(&cp) {
        cp + 0x20
    } else {
        cp
    }
}

fn digit_set() -> SpanSet {
    let mut s = SpanSet::new();
    s.add(Span::new('0' as u32, '9' as u32));
    s
}

fn word_set() -> SpanSet {
    let mut s = SpanSet::new();
    s.add(Span::new('0' as u32, '9' as u32));
    s.add(Span::new('A' as u32, 'Z' as u32));
    s.add(Span::single('_'));
    s.add(Span::new('a' as u32, 'z' as u32));
    s
}

fn space_set() -> SpanSet {
    let mut s = SpanSet::new();
    s.add(Span::new(0x09, 0x0D));
    s.add(Span::single(' '));
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ParseErrorKind};
    use crate::prog::Inst;

    fn kind_of(err: Error) -> ParseErrorKind {
        match err {
            Error::Parse { kind, .. } => kind,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn unanchored_gets_dotstar_prefix() {
        let p = compile("a").unwrap();
        assert!(!p.is_anchored_start);
        assert_eq!(
            p.insts,
            vec![
                Inst::Split { pref: 3, sec: 1 },
                Inst::AnyChar,
                Inst::Jump { loc: 0 },
                Inst::Save { slot: 0 },
                Inst::Char { c: 'a' },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn anchored_has_no_prefix() {
        let p = compile("^a").unwrap();
        assert!(p.is_anchored_start);
        assert_eq!(
            p.insts,
            vec![
                Inst::Save { slot: 0 },
                Inst::Bot,
                Inst::Char { c: 'a' },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn greedy_star_shape() {
        let p = compile("^a*").unwrap();
        assert_eq!(
            p.insts,
            vec![
                Inst::Save { slot: 0 },
                Inst::Bot,
                Inst::Split { pref: 3, sec: 5 },
                Inst::Char { c: 'a' },
                Inst::Jump { loc: 2 },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn lazy_star_swaps_split() {
        let p = compile("^a*?").unwrap();
        assert_eq!(p.insts[2], Inst::Split { pref: 5, sec: 3 });
    }

    #[test]
    fn plus_splits_backwards() {
        let p = compile("^a+").unwrap();
        assert_eq!(
            p.insts,
            vec![
                Inst::Save { slot: 0 },
                Inst::Bot,
                Inst::Char { c: 'a' },
                Inst::Split { pref: 2, sec: 4 },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn alternation_prefers_left() {
        let p = compile("^(?:ab|cd)").unwrap();
        assert_eq!(
            p.insts,
            vec![
                Inst::Save { slot: 0 },
                Inst::Bot,
                Inst::Split { pref: 3, sec: 6 },
                Inst::Char { c: 'a' },
                Inst::Char { c: 'b' },
                Inst::Jump { loc: 8 },
                Inst::Char { c: 'c' },
                Inst::Char { c: 'd' },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn counted_repetition_unrolls() {
        let p = compile("^a{2,4}").unwrap();
        assert_eq!(
            p.insts,
            vec![
                Inst::Save { slot: 0 },
                Inst::Bot,
                Inst::Char { c: 'a' },
                Inst::Char { c: 'a' },
                Inst::Split { pref: 5, sec: 8 },
                Inst::Char { c: 'a' },
                Inst::Split { pref: 7, sec: 8 },
                Inst::Char { c: 'a' },
                Inst::Save { slot: 1 },
                Inst::Match,
            ]
        );
    }

    #[test]
    fn exact_repetition_is_fixed_for_lookbehind() {
        assert!(compile("(?<=a{3})b").is_ok());
        assert_eq!(
            kind_of(compile("(?<=a{2,3})b").unwrap_err()),
            ParseErrorKind::VariableLookBehind
        );
    }

    #[test]
    fn lookbehind_alternatives_must_agree() {
        assert!(compile("(?<=ab|cd)e").is_ok());
        assert_eq!(
            kind_of(compile("(?<=a|bc)e").unwrap_err()),
            ParseErrorKind::UnequalLookBehindAlternatives
        );
        assert_eq!(
            kind_of(compile("(?<=a*)e").unwrap_err()),
            ParseErrorKind::VariableLookBehind
        );
    }

    #[test]
    fn lookbehind_distance_counts_chars() {
        let p = compile("(?<=ab)c").unwrap();
        let look = p
            .insts
            .iter()
            .find(|i| matches!(i, Inst::LookAround { .. }))
            .unwrap();
        match *look {
            Inst::LookAround { ahead, positive, distance, .. } => {
                assert!(!ahead);
                assert!(positive);
                assert_eq!(distance, 2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn ascii_class_becomes_bitmap() {
        let p = compile("^[a-c]").unwrap();
        let bits = (1u128 << 'a' as u32) | (1 << 'b' as u32) | (1 << 'c' as u32);
        assert_eq!(p.insts[2], Inst::CharBitmap { bits });
    }

    #[test]
    fn negated_class_is_complemented() {
        let p = compile("^[^a]").unwrap();
        assert_eq!(
            &p.insts[2..7],
            &[
                Inst::Split { pref: 3, sec: 5 },
                Inst::CharRange { lo: 0, hi: 'a' as u32 - 1 },
                Inst::Jump { loc: 6 },
                Inst::CharRange { lo: 'a' as u32 + 1, hi: 0x10FFFF },
                Inst::Save { slot: 1 },
            ]
        );
    }

    #[test]
    fn negated_digit_is_true_complement() {
        let p = compile("^\\D").unwrap();
        assert_eq!(
            &p.insts[2..6],
            &[
                Inst::Split { pref: 3, sec: 5 },
                Inst::CharRange { lo: 0, hi: 0x2F },
                Inst::Jump { loc: 6 },
                Inst::CharRange { lo: 0x3A, hi: 0x10FFFF },
            ]
        );
    }

    #[test]
    fn case_insensitive_literal_lowers() {
        let p = compile("^(?i)A").unwrap();
        assert_eq!(p.insts[2], Inst::IChar { c: 'a' });
    }

    #[test]
    fn case_insensitive_bitmap_sets_both_cases() {
        let p = compile("^(?i)[a-b]").unwrap();
        let bits = (1u128 << 'a' as u32)
            | (1 << 'b' as u32)
            | (1 << 'A' as u32)
            | (1 << 'B' as u32);
        assert_eq!(p.insts[2], Inst::CharBitmap { bits });
    }

    #[test]
    fn scoped_flags_are_restored() {
        let p = compile("^(?i:a)a").unwrap();
        assert_eq!(p.insts[2], Inst::IChar { c: 'a' });
        assert_eq!(p.insts[3], Inst::Char { c: 'a' });
    }

    #[test]
    fn multiline_flag_switches_anchors() {
        let p = compile("(?m)^a$").unwrap();
        assert!(!p.is_anchored_start);
        assert!(p.insts.contains(&Inst::Bol));
        assert!(p.insts.contains(&Inst::Eol));
    }

    #[test]
    fn group_numbering_follows_open_parens() {
        let p = compile("((a)(b))").unwrap();
        assert_eq!(p.captures, 4);
        let slots: Vec<usize> = p
            .insts
            .iter()
            .filter_map(|i| match *i {
                Inst::Save { slot } => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots, vec![0, 2, 4, 5, 6, 7, 3, 1]);
    }

    #[test]
    fn literal_prefix_byte_is_detected() {
        assert_eq!(compile("abc").unwrap().prefix_byte, Some(b'a'));
        assert_eq!(compile("[ab]c").unwrap().prefix_byte, None);
        assert_eq!(compile("^abc").unwrap().prefix_byte, None);
        assert_eq!(compile("(a)b").unwrap().prefix_byte, Some(b'a'));
    }

    #[test]
    fn empty_loop_guard_flag() {
        assert!(!compile("a*").unwrap().needs_empty_guard);
        assert!(!compile("(ab)+").unwrap().needs_empty_guard);
        assert!(compile("(a*)*").unwrap().needs_empty_guard);
        assert!(compile("(a?)+").unwrap().needs_empty_guard);
        assert!(compile("(a|)+").unwrap().needs_empty_guard);
    }

    #[test]
    fn parse_errors_carry_kinds() {
        assert_eq!(
            kind_of(compile("a{2").unwrap_err()),
            ParseErrorKind::UnclosedRepetition
        );
        assert_eq!(
            kind_of(compile("a{2,3").unwrap_err()),
            ParseErrorKind::UnclosedRepetition
        );
        assert_eq!(
            kind_of(compile("a{").unwrap_err()),
            ParseErrorKind::MissingRepetitionMin
        );
        assert_eq!(
            kind_of(compile("a{,3}").unwrap_err()),
            ParseErrorKind::MissingRepetitionMin
        );
        assert_eq!(
            kind_of(compile("a{3,2}").unwrap_err()),
            ParseErrorKind::InvalidRepetitionRange
        );
        assert_eq!(
            kind_of(compile("[ab").unwrap_err()),
            ParseErrorKind::UnclosedClass
        );
        assert_eq!(
            kind_of(compile("[z-a]").unwrap_err()),
            ParseErrorKind::InvalidClassRange
        );
        assert_eq!(
            kind_of(compile("(?x)a").unwrap_err()),
            ParseErrorKind::UnknownGroupFlag
        );
        assert_eq!(
            kind_of(compile("(a").unwrap_err()),
            ParseErrorKind::UnclosedGroup
        );
        assert_eq!(
            kind_of(compile("a)").unwrap_err()),
            ParseErrorKind::UnopenedGroup
        );
        assert_eq!(
            kind_of(compile("(?<a)").unwrap_err()),
            ParseErrorKind::InvalidLookAround
        );
        assert_eq!(
            kind_of(compile("*a").unwrap_err()),
            ParseErrorKind::DanglingQuantifier
        );
        assert_eq!(
            kind_of(compile("(?)").unwrap_err()),
            ParseErrorKind::UnknownGroupFlag
        );
        assert_eq!(
            kind_of(compile("(?i-)a").unwrap_err()),
            ParseErrorKind::UnknownGroupFlag
        );
        assert_eq!(
            kind_of(compile("\\").unwrap_err()),
            ParseErrorKind::IncompleteEscape
        );
    }

    #[test]
    fn error_positions_point_at_the_culprit() {
        match compile("ab[cd").unwrap_err() {
            Error::Parse { pos, .. } => assert_eq!(pos, 2),
            _ => unreachable!(),
        }
        match compile("a(b").unwrap_err() {
            Error::Parse { pos, .. } => assert_eq!(pos, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut pat = String::new();
        for _ in 0..300 {
            pat.push('(');
        }
        pat.push('a');
        for _ in 0..300 {
            pat.push(')');
        }
        assert_eq!(
            kind_of(compile(&pat).unwrap_err()),
            ParseErrorKind::ExcessiveNesting
        );
    }

    #[test]
    fn compilation_is_idempotent() {
        let a = compile("(a|b)*c{2,3}[x-z]").unwrap();
        let b = compile("(a|b)*c{2,3}[x-z]").unwrap();
        assert_eq!(a.insts, b.insts);
        assert_eq!(a.captures, b.captures);
    }

    #[test]
    fn state_ids_are_dense_and_ordered() {
        let p = compile("a(b|c)*d").unwrap();
        assert_eq!(p.num_states, p.insts.len());
        for (id, _) in p.insts.iter().enumerate() {
            assert!(id < p.num_states);
        }
    }
}

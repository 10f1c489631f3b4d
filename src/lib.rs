/*!
A regular expression library built as a small virtual machine with two
cooperating execution engines over one compiled program.

A pattern is lowered by a recursive-descent parser directly into a linear
instruction stream. That program can then be run by either engine:

- the **lockstep engine** advances every live path through the program in
  step with the input, one character at a time. Time is
  `O(states · input length)` for any pattern, so it is the default.
- the **backtracking engine** explores paths depth-first on an explicit job
  stack. It is the only engine that supports look-ahead and (fixed-length)
  look-behind assertions.

The [`Regex`] facade compiles a pattern and picks the right engine for it:

```
use rxvm::Regex;

let re = Regex::new(r"(\w+)@(\w+)\.com").unwrap();
let m = re.captures("mail me at someone@example.com").unwrap();
assert_eq!(m.as_str(), "someone@example.com");
assert_eq!(m.group(1), Some("someone"));
assert_eq!(m.group(2), Some("example"));
```

Iteration over every match is non-overlapping and always makes progress,
even through empty matches:

```
use rxvm::Regex;

let re = Regex::new(r"\d+").unwrap();
let nums: Vec<&str> = re.find_iter("10 apples, 5 pears").map(|m| m.as_str()).collect();
assert_eq!(nums, vec!["10", "5"]);
```

The engines can also be driven directly when engine choice matters, for
example to keep a service on the linear-time engine only:

```
use rxvm::{compile, LockstepEngine, Engine};

let prog = compile("ab+").unwrap();
let engine = LockstepEngine::new(&prog).unwrap();
assert!(engine.is_match_at("xabbb", 0));
```

All offsets reported anywhere in the API are byte offsets into the searched
string.

# Syntax

Concatenation, alternation `|`, quantifiers `*` `+` `?` `{m}` `{m,}` `{m,n}`
(each with a lazy `?` form), grouping `(…)` and `(?:…)`, character classes
`[…]`/`[^…]` with ranges, the class escapes `\d \D \w \W \s \S` (ASCII),
anchors `^`/`$` (start/end of text, or of line under `(?m)`), word
boundaries `\b`/`\B`, look-around `(?=…) (?!…) (?<=…) (?<!…)`, and the
inline flags `i` (ASCII case-insensitive) and `m` (multiline), scoped as
`(?flags)` or `(?flags:…)`. Any other escaped character matches itself.

Backreferences, named groups and Unicode character classes are not
supported.
*/

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

pub use crate::error::{Error, ParseErrorKind};
pub use crate::parser::compile;
pub use crate::prog::{Inst, InstPtr, Program};
pub use crate::re::{
    is_match, match_all, Engine, FixedMatch, Match, Matches, Regex,
    RegexMatches, Slot, SubCaptures,
};

pub use crate::backtrack::BacktrackEngine;
pub use crate::lockstep::LockstepEngine;

mod backtrack;
mod error;
mod input;
mod lockstep;
mod parser;
mod pool;
mod prog;
mod re;
mod span;

use thiserror::Error;

/// An error produced while compiling a pattern or constructing an engine.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// The pattern could not be parsed. Carries the kind of failure and the
    /// byte offset in the pattern at which it was detected.
    #[error("error parsing pattern at byte {pos}: {kind}")]
    Parse {
        /// What went wrong.
        kind: ParseErrorKind,
        /// Byte offset into the pattern string.
        pos: usize,
    },
    /// The lockstep engine was asked to run a program containing look-around
    /// assertions, which only the backtracking engine supports.
    #[error("look-around assertions require the backtracking engine")]
    UnsupportedLookAround,
}

/// The different ways parsing a pattern can fail.
///
/// Each variant is reported from exactly one place in the parser, so a kind
/// pins down the code path that rejected the pattern.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ParseErrorKind {
    /// A `{` counted repetition was never closed with `}`.
    #[error("unclosed counted repetition")]
    UnclosedRepetition,
    /// A counted repetition had no minimum, e.g. `a{,3}` or `a{}`.
    #[error("counted repetition is missing its minimum")]
    MissingRepetitionMin,
    /// A counted repetition with `min > max`, e.g. `a{3,2}`.
    #[error("counted repetition minimum exceeds its maximum")]
    InvalidRepetitionRange,
    /// A repetition count that does not fit in a machine word.
    #[error("counted repetition bound is too large")]
    InvalidRepetitionCount,
    /// A quantifier with nothing to repeat, e.g. `*a` or `(?i)+`.
    #[error("quantifier is not preceded by a repeatable atom")]
    DanglingQuantifier,
    /// A `[` character class was never closed with `]`.
    #[error("unclosed character class")]
    UnclosedClass,
    /// A class range whose end precedes its start, or whose endpoint is a
    /// class escape, e.g. `[z-a]` or `[a-\d]`.
    #[error("invalid range in character class")]
    InvalidClassRange,
    /// An unrecognized flag inside `(?...)`.
    #[error("unrecognized group flag")]
    UnknownGroupFlag,
    /// A `(` group was never closed with `)`.
    #[error("unclosed group")]
    UnclosedGroup,
    /// A `)` with no matching `(`.
    #[error("unmatched closing parenthesis")]
    UnopenedGroup,
    /// A `(?<` introducer followed by something other than `=` or `!`.
    #[error("invalid look-around introducer")]
    InvalidLookAround,
    /// A look-behind whose body cannot match a fixed number of characters.
    #[error("look-behind requires a fixed-length body")]
    VariableLookBehind,
    /// A look-behind whose alternatives match differing fixed lengths.
    #[error("look-behind alternatives must agree on length")]
    UnequalLookBehindAlternatives,
    /// A backslash at the very end of the pattern.
    #[error("incomplete escape sequence")]
    IncompleteEscape,
    /// Groups nested beyond the supported depth.
    #[error("pattern has too much nesting")]
    ExcessiveNesting,
}

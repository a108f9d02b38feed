/*!

This is the long-form manual for `ranked_tabulation`.

## Input model

The engine consumes [`ParsedBallot`](crate::ParsedBallot) values, normally
produced by an external cast vote record reader. Each ballot carries:

* `choices`: the raw mark strings per rank position, in ascending rank
  order. An empty cell is a skipped rank; a cell with several marks is an
  overvote. [`assemble_ranks`](crate::assemble_ranks) builds this shape from
  `(mark, rank)` pairs when the source data is sparse.
* `count`: the ballot multiplicity (defaults to 1).
* `id`, `precinct`, `ballot_style`: opaque source identifiers, carried for
  report writers.

Marks are matched case-sensitively against the candidate codes and display
names declared in the contest, and against the configured sentinel labels
(`overvoteLabel`, `undervoteLabel`, `undeclaredWriteInLabel`). A mark that
resolves to nothing rejects the whole tabulation with
[`TabulationError::UnrecognizedCandidate`](crate::TabulationError), unless
the rules map unrecognized marks to the undeclared write-in.

## Rules

[`TabulationRules`](crate::TabulationRules) follows the vocabulary of the
RCTab contest configuration format. The significant axes:

* `winner_election_mode`: `singleWinner`, `standardSTV`, `sequential`,
  `bottomsUp`, or `continueUntilTwoRemain`.
* `overvote_rule`: `exhaustImmediately`, `alwaysSkipToNextRank`, or
  `exhaustIfMultipleContinuing`.
* `tie_break_mode`: `interactive`, `random`,
  `previousRoundCountsThenRandom`, `usePermutationInConfig`,
  `generatePermutation`, or `stopCountingAndAsk`. The random modes require
  `random_seed`; the interactive modes require a
  [`TieBreakOracle`](crate::TieBreakOracle).
* `decimal_places_for_vote_arithmetic`: the fixed scale (1 to 20) used for
  every tally, threshold, and transfer. Multiplication and division truncate
  toward zero at this scale; the truncation residue of surplus transfers is
  tracked in a dedicated bucket, never lost.

String-keyed configuration is resolved through the `parse_label`
constructors on each enumeration; unknown labels are configuration errors,
never a runtime fallback.

## Output

A completed run yields a [`TabulationRecord`](crate::TabulationRecord): the
winner list in election order, the audit permutation and random seed when
they apply, and one [`RoundSnapshot`](crate::RoundSnapshot) per round with
the tally, threshold, elections, eliminations, per-candidate transfer
details, and the exhaustion breakdown by reason. The record serializes with
`serde`; weights serialize as decimal strings.

A failure inside the round loop (a cancelled interactive tie-break, a round
that can make no progress) freezes the partial record and marks it with an
[`AbnormalTermination`](crate::AbnormalTermination) carrying the failing
round. Configuration and input errors are returned as `Err` before round 1
instead.

*/

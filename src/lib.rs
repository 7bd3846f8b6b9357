use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};

use bit_set::BitSet;
use instant::{Duration, Instant};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given slot, based on its index in the Puzzle's `slots` field.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the Vocabulary's `words` field.
pub type WordId = usize;

/// Zero-indexed (row, col) coords for a cell in the grid, where row = 0 in the top row.
type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// Error raised when a structure template can't be turned into a puzzle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedStructureError {
    #[error("structure row {row} is {found} cells wide, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown cell marker {marker:?} at row {row}, column {col}")]
    UnknownMarker { row: usize, col: usize, marker: char },
}

/// A maximal run of open cells in one direction. A slot's identity is the
/// whole (start, direction, length) tuple; two slots are equal iff every
/// field matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub start: GridCoord,
    pub direction: Direction,
    pub length: usize,
}

impl Slot {
    /// Generate the coords for each cell of this slot.
    fn cell_coords(&self) -> impl Iterator<Item = GridCoord> {
        let (row, col) = self.start;
        let direction = self.direction;
        (0..self.length).map(move |cell_idx| match direction {
            Direction::Across => (row, col + cell_idx),
            Direction::Down => (row + cell_idx, col),
        })
    }
}

/// A crossing between one slot and another, referencing the other slot's id
/// and the location of the shared cell within the other slot.
#[derive(Debug, Clone)]
pub struct Crossing {
    pub other_slot_id: SlotId,
    pub other_slot_cell: usize,
}

/// An immutable description of a grid: dimensions, the open-cell mask, the
/// derived slots, and a precomputed cell-indexed crossing table per slot.
pub struct Puzzle {
    pub height: usize,
    pub width: usize,
    open: Vec<bool>,
    pub slots: Vec<Slot>,
    crossings: Vec<SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]>>,
}

impl Debug for Puzzle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puzzle")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("slots", &self.slots)
            .finish()
    }
}

impl Puzzle {
    /// Build a puzzle from a string template, with `.` representing open
    /// cells and `#` representing blocks. Blank lines and surrounding
    /// whitespace are ignored. Slots are derived by scanning rows (Across)
    /// and then columns (Down) for runs of open cells, keeping only runs of
    /// length >= 2.
    pub fn from_template(template: &str) -> Result<Puzzle, MalformedStructureError> {
        let rows: Vec<&str> = template
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let height = rows.len();
        let width = rows.first().map(|row| row.chars().count()).unwrap_or(0);

        let mut open = Vec::with_capacity(height * width);
        for (row_idx, line) in rows.iter().enumerate() {
            let markers: Vec<char> = line.chars().collect();
            if markers.len() != width {
                return Err(MalformedStructureError::RaggedRow {
                    row: row_idx,
                    expected: width,
                    found: markers.len(),
                });
            }
            for (col_idx, &marker) in markers.iter().enumerate() {
                match marker {
                    '.' => open.push(true),
                    '#' => open.push(false),
                    other => {
                        return Err(MalformedStructureError::UnknownMarker {
                            row: row_idx,
                            col: col_idx,
                            marker: other,
                        })
                    }
                }
            }
        }

        let mut slots: Vec<Slot> = vec![];

        // Across slots, row by row. The `col == width` iteration acts as a
        // sentinel that closes any run still open at the end of the row.
        for row in 0..height {
            let mut run_start: Option<usize> = None;
            for col in 0..=width {
                let open_cell = col < width && open[row * width + col];
                if open_cell {
                    run_start.get_or_insert(col);
                } else if let Some(start_col) = run_start.take() {
                    if col - start_col >= 2 {
                        slots.push(Slot {
                            start: (row, start_col),
                            direction: Direction::Across,
                            length: col - start_col,
                        });
                    }
                }
            }
        }

        // Down slots, column by column.
        for col in 0..width {
            let mut run_start: Option<usize> = None;
            for row in 0..=height {
                let open_cell = row < height && open[row * width + col];
                if open_cell {
                    run_start.get_or_insert(row);
                } else if let Some(start_row) = run_start.take() {
                    if row - start_row >= 2 {
                        slots.push(Slot {
                            start: (start_row, col),
                            direction: Direction::Down,
                            length: row - start_row,
                        });
                    }
                }
            }
        }

        // Build a map from cell location to the slots covering it, then turn
        // it into each slot's crossing table. A cell is covered by at most
        // one slot per direction, so each cell carries at most one crossing.
        let mut slots_by_cell: HashMap<GridCoord, SmallVec<[(SlotId, usize); 2]>> = HashMap::new();
        for (slot_id, slot) in slots.iter().enumerate() {
            for (cell_idx, coord) in slot.cell_coords().enumerate() {
                slots_by_cell.entry(coord).or_default().push((slot_id, cell_idx));
            }
        }

        let crossings = slots
            .iter()
            .enumerate()
            .map(|(slot_id, slot)| {
                slot.cell_coords()
                    .map(|coord| {
                        slots_by_cell[&coord]
                            .iter()
                            .find(|&&(other, _)| other != slot_id)
                            .map(|&(other_slot_id, other_slot_cell)| Crossing {
                                other_slot_id,
                                other_slot_cell,
                            })
                    })
                    .collect()
            })
            .collect();

        Ok(Puzzle {
            height,
            width,
            open,
            slots,
            crossings,
        })
    }

    /// Whether the cell at the given coords is open (fillable).
    pub fn is_open(&self, row: usize, col: usize) -> bool {
        self.open[row * self.width + col]
    }

    /// The crossing table for a slot, indexed by cell.
    pub fn crossings(&self, slot_id: SlotId) -> &[Option<Crossing>] {
        &self.crossings[slot_id]
    }

    /// If slots `a` and `b` share a cell, the character index each slot
    /// occupies at that cell; `None` if they don't intersect. Two slots of
    /// the same direction never overlap by construction.
    pub fn overlap(&self, a: SlotId, b: SlotId) -> Option<(usize, usize)> {
        if a == b {
            return None;
        }
        self.crossings[a]
            .iter()
            .enumerate()
            .find_map(|(cell_idx, crossing_opt)| {
                crossing_opt
                    .as_ref()
                    .filter(|crossing| crossing.other_slot_id == b)
                    .map(|crossing| (cell_idx, crossing.other_slot_cell))
            })
    }

    /// The ids of all slots that cross the given slot.
    pub fn neighbors(&self, slot_id: SlotId) -> SmallVec<[SlotId; MAX_SLOT_LENGTH]> {
        self.crossings[slot_id]
            .iter()
            .filter_map(|crossing_opt| {
                crossing_opt.as_ref().map(|crossing| crossing.other_slot_id)
            })
            .collect()
    }
}

/// The candidate word list shared by every slot. Words are deduplicated,
/// keep their input order, and are indexed by `WordId`. Letters are compared
/// as raw bytes, so callers should normalize case before building this.
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(words: I) -> Vocabulary
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut result = vec![];
        for word in words {
            let word = word.into();
            if seen.insert(word.clone()) {
                result.push(word);
            }
        }
        Vocabulary { words: result }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, word_id: WordId) -> &str {
        &self.words[word_id]
    }

    /// The letter of `word_id` at `cell_idx`. Indexing past the end of the
    /// word panics; that means domain maintenance let a word of the wrong
    /// length survive, which is a programming error rather than bad input.
    fn letter(&self, word_id: WordId, cell_idx: usize) -> u8 {
        self.words[word_id].as_bytes()[cell_idx]
    }
}

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A struct recording a slot assignment made during the filling process.
#[derive(Debug, Clone)]
pub struct Choice {
    pub slot_id: SlotId,
    pub word_id: WordId,
}

/// A struct representing the results of a successful fill.
#[derive(Debug)]
pub struct FillSuccess {
    pub statistics: Statistics,
    pub choices: Vec<Choice>,
}

/// The partial assignment built up during search, indexed by slot id.
struct Assignment {
    words_by_slot: Vec<Option<WordId>>,
    assigned_count: usize,
}

impl Assignment {
    fn new(slot_count: usize) -> Assignment {
        Assignment {
            words_by_slot: vec![None; slot_count],
            assigned_count: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.assigned_count == self.words_by_slot.len()
    }

    fn get(&self, slot_id: SlotId) -> Option<WordId> {
        self.words_by_slot[slot_id]
    }

    fn set(&mut self, slot_id: SlotId, word_id: WordId) {
        debug_assert!(self.words_by_slot[slot_id].is_none());
        self.words_by_slot[slot_id] = Some(word_id);
        self.assigned_count += 1;
    }

    fn unset(&mut self, slot_id: SlotId) {
        debug_assert!(self.words_by_slot[slot_id].is_some());
        self.words_by_slot[slot_id] = None;
        self.assigned_count -= 1;
    }

    fn iter(&self) -> impl Iterator<Item = (SlotId, WordId)> + '_ {
        self.words_by_slot
            .iter()
            .enumerate()
            .filter_map(|(slot_id, word)| word.map(|word_id| (slot_id, word_id)))
    }
}

/// The solver context: a puzzle, a vocabulary, and the mutable per-slot
/// domains that propagation and search narrow. Created once per fill; the
/// puzzle itself is never mutated.
pub struct Filler<'a> {
    puzzle: &'a Puzzle,
    vocabulary: &'a Vocabulary,
    domains: Vec<BitSet>,
    statistics: Statistics,
}

impl<'a> Filler<'a> {
    /// Create a filler with every slot's domain seeded with the entire
    /// vocabulary. No length filtering happens here; that is
    /// `enforce_node_consistency`'s job.
    pub fn new(puzzle: &'a Puzzle, vocabulary: &'a Vocabulary) -> Filler<'a> {
        let full_domain: BitSet = (0..vocabulary.len()).collect();
        Filler {
            puzzle,
            vocabulary,
            domains: vec![full_domain; puzzle.slots.len()],
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    /// Iterate over the remaining candidate word ids for a slot.
    pub fn domain(&self, slot_id: SlotId) -> impl Iterator<Item = WordId> + '_ {
        self.domains[slot_id].iter()
    }

    /// How many candidate words are still available for a slot?
    pub fn domain_size(&self, slot_id: SlotId) -> usize {
        self.domains[slot_id].len()
    }

    fn has_empty_domain(&self) -> bool {
        self.domains.iter().any(|domain| domain.is_empty())
    }

    fn snapshot(&self) -> Vec<BitSet> {
        self.domains.clone()
    }

    fn restore(&mut self, snapshot: Vec<BitSet>) {
        self.domains = snapshot;
    }

    fn singleton(&self, word_id: WordId) -> BitSet {
        let mut domain = BitSet::with_capacity(self.vocabulary.len());
        domain.insert(word_id);
        domain
    }

    /// Remove from every slot's domain the words whose length doesn't match
    /// the slot. Idempotent.
    pub fn enforce_node_consistency(&mut self) {
        for (slot_id, slot) in self.puzzle.slots.iter().enumerate() {
            let wrong_length: Vec<WordId> = self.domains[slot_id]
                .iter()
                .filter(|&word_id| self.vocabulary.word(word_id).len() != slot.length)
                .collect();
            for word_id in wrong_length {
                self.domains[slot_id].remove(word_id);
            }
        }
    }

    /// Which letters appear at `cell_idx` across a slot's remaining
    /// candidates. Checking support against this table instead of scanning
    /// the other domain once per word keeps `revise` linear in the two
    /// domain sizes.
    fn letters_at(&self, slot_id: SlotId, cell_idx: usize) -> [bool; 256] {
        let mut seen = [false; 256];
        for word_id in self.domains[slot_id].iter() {
            seen[self.vocabulary.letter(word_id, cell_idx) as usize] = true;
        }
        seen
    }

    /// Make slot `x` arc-consistent with slot `y`: remove from domain(x)
    /// every word with no possible corresponding word in domain(y) at their
    /// shared cell. Returns whether domain(x) shrank. A no-op returning
    /// `false` when the slots don't overlap.
    pub fn revise(&mut self, x: SlotId, y: SlotId) -> bool {
        let (x_cell, y_cell) = match self.puzzle.overlap(x, y) {
            Some(overlap) => overlap,
            None => return false,
        };

        let supported = self.letters_at(y, y_cell);
        let unsupported: Vec<WordId> = self.domains[x]
            .iter()
            .filter(|&word_id| !supported[self.vocabulary.letter(word_id, x_cell) as usize])
            .collect();

        let changed = !unsupported.is_empty();
        for word_id in unsupported {
            self.domains[x].remove(word_id);
        }
        changed
    }

    fn all_arcs(&self) -> VecDeque<(SlotId, SlotId)> {
        let mut arcs = VecDeque::new();
        for slot_id in 0..self.puzzle.slots.len() {
            for neighbor in self.puzzle.neighbors(slot_id) {
                arcs.push_back((slot_id, neighbor));
            }
        }
        arcs
    }

    /// AC-3 fixpoint. If no initial arc queue is given, seed it with every
    /// ordered pair of crossing slots. Each revision that shrinks domain(x)
    /// requeues the arc (z, x) for every neighbor z other than y, so the
    /// reduced domain gets re-checked against the rest of its crossings.
    /// Returns `false` as soon as any domain empties (no solution is
    /// reachable from this domain state), `true` otherwise.
    pub fn enforce_arc_consistency(
        &mut self,
        initial_arcs: Option<VecDeque<(SlotId, SlotId)>>,
    ) -> bool {
        let mut queue = initial_arcs.unwrap_or_else(|| self.all_arcs());

        while let Some((x, y)) = queue.pop_front() {
            if self.revise(x, y) {
                if self.domains[x].is_empty() {
                    return false;
                }
                for z in self.puzzle.neighbors(x) {
                    if z != y {
                        queue.push_back((z, x));
                    }
                }
            }
        }
        true
    }

    /// Whether the partial assignment is consistent: no word is used twice,
    /// and forcing every assigned slot's domain down to its chosen word
    /// still leaves every slot with at least one candidate after node and
    /// full arc consistency. The live domains are restored before returning,
    /// whatever the outcome.
    fn consistent(&mut self, assignment: &Assignment) -> bool {
        let mut used = BitSet::with_capacity(self.vocabulary.len());
        for (_, word_id) in assignment.iter() {
            if !used.insert(word_id) {
                return false;
            }
        }

        let snapshot = self.snapshot();
        for (slot_id, word_id) in assignment.iter() {
            let singleton = self.singleton(word_id);
            self.domains[slot_id] = singleton;
        }
        self.enforce_node_consistency();
        let ok = !self.has_empty_domain() && self.enforce_arc_consistency(None);
        self.restore(snapshot);
        ok
    }

    /// Minimum-remaining-values slot selection: the unassigned slot with the
    /// smallest domain, ties broken by the highest crossing count (degree),
    /// remaining ties by the lowest slot id.
    fn select_unassigned_slot(&self, assignment: &Assignment) -> SlotId {
        (0..self.puzzle.slots.len())
            .filter(|&slot_id| assignment.get(slot_id).is_none())
            .min_by_key(|&slot_id| {
                (
                    self.domains[slot_id].len(),
                    Reverse(self.puzzle.neighbors(slot_id).len()),
                    slot_id,
                )
            })
            .expect("select_unassigned_slot called with a complete assignment")
    }

    /// Least-constraining-value ordering: sort the slot's candidates
    /// ascending by how many words they would eliminate from unassigned
    /// crossing slots' domains at the shared cell. Ties keep ascending word
    /// id order, so the ordering is deterministic.
    fn order_domain_words(&self, slot_id: SlotId, assignment: &Assignment) -> Vec<WordId> {
        let neighbor_letter_counts: Vec<(usize, u64, [u32; 256])> = self
            .puzzle
            .neighbors(slot_id)
            .iter()
            .filter(|&&neighbor| assignment.get(neighbor).is_none())
            .map(|&neighbor| {
                let (own_cell, neighbor_cell) = self
                    .puzzle
                    .overlap(slot_id, neighbor)
                    .expect("crossing slot without a recorded overlap");

                let mut counts = [0u32; 256];
                for word_id in self.domains[neighbor].iter() {
                    counts[self.vocabulary.letter(word_id, neighbor_cell) as usize] += 1;
                }
                (own_cell, self.domains[neighbor].len() as u64, counts)
            })
            .collect();

        let mut candidates: Vec<WordId> = self.domains[slot_id].iter().collect();
        candidates.sort_by_key(|&word_id| {
            neighbor_letter_counts
                .iter()
                .map(|(own_cell, neighbor_domain_len, counts)| {
                    let letter = self.vocabulary.letter(word_id, *own_cell) as usize;
                    neighbor_domain_len - counts[letter] as u64
                })
                .sum::<u64>()
        });
        candidates
    }

    /// Recursive backtracking over partial assignments. Each tentative
    /// extension is checked with `consistent`; committed extensions shrink
    /// the slot's domain to the chosen word and re-propagate before
    /// recursing. Dead ends restore the domain snapshot, so a failed branch
    /// leaves no residue.
    fn backtrack(&mut self, assignment: &mut Assignment) -> bool {
        if assignment.is_complete() {
            return true;
        }

        let slot_id = self.select_unassigned_slot(assignment);
        for word_id in self.order_domain_words(slot_id, assignment) {
            self.statistics.states += 1;
            assignment.set(slot_id, word_id);

            if self.consistent(assignment) {
                let snapshot = self.snapshot();
                let singleton = self.singleton(word_id);
                self.domains[slot_id] = singleton;
                self.enforce_node_consistency();

                if self.enforce_arc_consistency(None) && self.backtrack(assignment) {
                    return true;
                }

                self.restore(snapshot);
                self.statistics.backtracks += 1;
            }

            assignment.unset(slot_id);
        }
        false
    }

    /// Fill the puzzle, returning a complete assignment plus statistics, or
    /// `None` if no consistent assignment exists. Unsatisfiability is an
    /// expected outcome, not an error.
    pub fn fill(mut self) -> Option<FillSuccess> {
        let start = Instant::now();
        debug!(
            slots = self.puzzle.slots.len(),
            words = self.vocabulary.len(),
            "starting fill"
        );

        self.enforce_node_consistency();
        if !self.enforce_arc_consistency(None) || self.has_empty_domain() {
            debug!("propagation emptied a domain before search");
            return None;
        }

        let mut assignment = Assignment::new(self.puzzle.slots.len());
        if !self.backtrack(&mut assignment) {
            self.statistics.duration = start.elapsed();
            debug!(
                states = self.statistics.states,
                backtracks = self.statistics.backtracks,
                "search exhausted without finding a fill"
            );
            return None;
        }

        self.statistics.duration = start.elapsed();
        debug!(
            states = self.statistics.states,
            backtracks = self.statistics.backtracks,
            "fill complete"
        );

        let choices = assignment
            .iter()
            .map(|(slot_id, word_id)| Choice { slot_id, word_id })
            .collect();

        Some(FillSuccess {
            statistics: self.statistics,
            choices,
        })
    }
}

/// Turn the given puzzle and fill choices into a rendered string: the chosen
/// letter where a slot covers a cell, `.` for an uncovered open cell, and
/// `#` for a block.
pub fn render_grid(puzzle: &Puzzle, vocabulary: &Vocabulary, choices: &[Choice]) -> String {
    let mut grid: Vec<Vec<char>> = (0..puzzle.height)
        .map(|row| {
            (0..puzzle.width)
                .map(|col| if puzzle.is_open(row, col) { '.' } else { '#' })
                .collect()
        })
        .collect();

    for choice in choices {
        let slot = puzzle.slots[choice.slot_id];
        let word = vocabulary.word(choice.word_id);

        for (cell_idx, (row, col)) in slot.cell_coords().enumerate() {
            grid[row][col] = word.as_bytes()[cell_idx] as char;
        }
    }

    grid.into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{
        render_grid, Choice, Direction, FillSuccess, Filler, MalformedStructureError, Puzzle,
        Slot, Vocabulary,
    };

    fn vocabulary(words: &[&str]) -> Vocabulary {
        Vocabulary::new(words.iter().copied())
    }

    /// One 3-cell Across slot at (0, 0) crossing one 3-cell Down slot at
    /// (0, 0), sharing their first characters.
    fn crossing_puzzle() -> Puzzle {
        Puzzle::from_template(
            "
            ...
            .##
            .##
            ",
        )
        .unwrap()
    }

    /// Check everything the fill contract promises: every slot assigned
    /// exactly once, every word the right length, no word reused, and
    /// agreement at every recorded overlap.
    fn assert_valid_fill(puzzle: &Puzzle, vocabulary: &Vocabulary, result: &FillSuccess) {
        assert_eq!(result.choices.len(), puzzle.slots.len());

        let mut words_by_slot: Vec<Option<&str>> = vec![None; puzzle.slots.len()];
        for choice in &result.choices {
            assert!(
                words_by_slot[choice.slot_id].is_none(),
                "slot assigned twice"
            );
            let word = vocabulary.word(choice.word_id);
            assert_eq!(word.len(), puzzle.slots[choice.slot_id].length);
            words_by_slot[choice.slot_id] = Some(word);
        }

        let mut used = HashSet::new();
        for word in words_by_slot.iter().flatten() {
            assert!(used.insert(*word), "word {} used twice", word);
        }

        for a in 0..puzzle.slots.len() {
            for b in 0..puzzle.slots.len() {
                if let Some((a_cell, b_cell)) = puzzle.overlap(a, b) {
                    assert_eq!(
                        words_by_slot[a].unwrap().as_bytes()[a_cell],
                        words_by_slot[b].unwrap().as_bytes()[b_cell],
                        "overlap disagreement between slots {} and {}",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn template_parsing_derives_slots() {
        let puzzle = Puzzle::from_template(
            "
            ...#
            ...#
            ....
            ",
        )
        .unwrap();

        assert_eq!(puzzle.height, 3);
        assert_eq!(puzzle.width, 4);
        assert_eq!(puzzle.slots.len(), 6);

        assert!(puzzle.slots.contains(&Slot {
            start: (0, 0),
            direction: Direction::Across,
            length: 3,
        }));
        assert!(puzzle.slots.contains(&Slot {
            start: (2, 0),
            direction: Direction::Across,
            length: 4,
        }));
        assert!(puzzle.slots.contains(&Slot {
            start: (0, 2),
            direction: Direction::Down,
            length: 3,
        }));
        // The lone open cell at (2, 3) is a run of length 1 in both
        // directions and must not become a slot.
        assert!(!puzzle
            .slots
            .iter()
            .any(|slot| slot.start == (2, 3) || slot.start == (0, 3)));
    }

    #[test]
    fn ragged_template_is_rejected() {
        let result = Puzzle::from_template(
            "
            ...
            ....
            ",
        );
        assert_eq!(
            result.err(),
            Some(MalformedStructureError::RaggedRow {
                row: 1,
                expected: 3,
                found: 4,
            })
        );
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let result = Puzzle::from_template(
            "
            ...
            .x.
            ",
        );
        assert_eq!(
            result.err(),
            Some(MalformedStructureError::UnknownMarker {
                row: 1,
                col: 1,
                marker: 'x',
            })
        );
    }

    #[test]
    fn overlap_index_records_crossings() {
        let puzzle = crossing_puzzle();
        assert_eq!(puzzle.slots.len(), 2);

        let across = puzzle
            .slots
            .iter()
            .position(|slot| slot.direction == Direction::Across)
            .unwrap();
        let down = puzzle
            .slots
            .iter()
            .position(|slot| slot.direction == Direction::Down)
            .unwrap();

        assert_eq!(puzzle.overlap(across, down), Some((0, 0)));
        assert_eq!(puzzle.overlap(down, across), Some((0, 0)));
        assert_eq!(puzzle.overlap(across, across), None);
        assert_eq!(puzzle.neighbors(across).as_slice(), &[down][..]);
        assert_eq!(puzzle.neighbors(down).as_slice(), &[across][..]);
    }

    #[test]
    fn parallel_slots_never_overlap() {
        let puzzle = Puzzle::from_template(
            "
            ...
            ###
            ...
            ",
        )
        .unwrap();

        assert_eq!(puzzle.slots.len(), 2);
        assert_eq!(puzzle.overlap(0, 1), None);
        assert_eq!(puzzle.overlap(1, 0), None);
        assert!(puzzle.neighbors(0).is_empty());
        assert!(puzzle.neighbors(1).is_empty());
    }

    #[test]
    fn node_consistency_filters_lengths_and_is_idempotent() {
        let puzzle = crossing_puzzle();
        let vocab = vocabulary(&["AB", "CAT", "DOG", "WXYZ"]);
        let mut filler = Filler::new(&puzzle, &vocab);

        filler.enforce_node_consistency();
        for slot_id in 0..puzzle.slots.len() {
            for word_id in filler.domain(slot_id).collect::<Vec<_>>() {
                assert_eq!(vocab.word(word_id).len(), puzzle.slots[slot_id].length);
            }
        }

        let before: Vec<Vec<_>> = (0..puzzle.slots.len())
            .map(|slot_id| filler.domain(slot_id).collect())
            .collect();
        filler.enforce_node_consistency();
        let after: Vec<Vec<_>> = (0..puzzle.slots.len())
            .map(|slot_id| filler.domain(slot_id).collect())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn arc_consistency_leaves_every_word_supported() {
        let puzzle = Puzzle::from_template(
            "
            ...
            ...
            ...
            ",
        )
        .unwrap();
        let vocab = vocabulary(&["ABC", "DEF", "GHI", "ADG", "BEH", "CFI", "XYZ", "QQQ"]);
        let mut filler = Filler::new(&puzzle, &vocab);

        filler.enforce_node_consistency();
        assert!(filler.enforce_arc_consistency(None));

        for x in 0..puzzle.slots.len() {
            assert!(filler.domain_size(x) > 0);
            for y in 0..puzzle.slots.len() {
                if let Some((x_cell, y_cell)) = puzzle.overlap(x, y) {
                    for x_word in filler.domain(x).collect::<Vec<_>>() {
                        let supported = filler.domain(y).any(|y_word| {
                            vocab.word(x_word).as_bytes()[x_cell]
                                == vocab.word(y_word).as_bytes()[y_cell]
                        });
                        assert!(
                            supported,
                            "{} has no support in slot {}",
                            vocab.word(x_word),
                            y
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn arc_consistency_fails_on_emptied_domain() {
        // The Across slot's only candidate needs a Down word starting with
        // the same letter, and none exists.
        let puzzle = Puzzle::from_template(
            "
            ...
            .#.
            .#.
            .#.
            ",
        )
        .unwrap();
        let vocab = vocabulary(&["CAT", "DOGS", "RATS"]);
        let mut filler = Filler::new(&puzzle, &vocab);

        filler.enforce_node_consistency();
        assert!(!filler.enforce_arc_consistency(None));
        assert!((0..puzzle.slots.len()).any(|slot_id| filler.domain_size(slot_id) == 0));
    }

    #[test]
    fn revise_is_a_noop_for_non_crossing_slots() {
        let puzzle = Puzzle::from_template(
            "
            ...
            ###
            ...
            ",
        )
        .unwrap();
        let vocab = vocabulary(&["CAT", "DOG"]);
        let mut filler = Filler::new(&puzzle, &vocab);

        filler.enforce_node_consistency();
        assert!(!filler.revise(0, 1));
        assert_eq!(filler.domain_size(0), 2);
    }

    #[test]
    fn crossing_scenario_without_a_sharing_pair_is_unsatisfiable() {
        // CAT, DOG and ACE all start with different letters, so no pair can
        // agree at the shared first cell.
        let puzzle = crossing_puzzle();
        let vocab = vocabulary(&["CAT", "DOG", "ACE"]);

        assert!(Filler::new(&puzzle, &vocab).fill().is_none());
    }

    #[test]
    fn crossing_scenario_with_a_sharing_pair_is_solved() {
        // CAT and CAR share their first letter, so the crossing can be
        // filled with two distinct words.
        let puzzle = crossing_puzzle();
        let vocab = vocabulary(&["CAT", "DOG", "CAR"]);

        let result = Filler::new(&puzzle, &vocab).fill().unwrap();
        assert_valid_fill(&puzzle, &vocab, &result);

        let chosen: HashSet<&str> = result
            .choices
            .iter()
            .map(|choice| vocab.word(choice.word_id))
            .collect();
        assert_eq!(chosen, HashSet::from(["CAT", "CAR"]));
    }

    #[test]
    fn wrong_length_vocabulary_returns_no_solution() {
        let puzzle = crossing_puzzle();
        let vocab = vocabulary(&["AB", "WXYZ"]);

        // Node consistency empties every domain; the solver must report
        // "no solution" instead of looping in the search.
        assert!(Filler::new(&puzzle, &vocab).fill().is_none());
    }

    #[test]
    fn full_grid_with_exact_vocabulary_is_solved() {
        let puzzle = Puzzle::from_template(
            "
            ...
            ...
            ...
            ",
        )
        .unwrap();
        let vocab = vocabulary(&["ABC", "DEF", "GHI", "ADG", "BEH", "CFI"]);

        let result = Filler::new(&puzzle, &vocab).fill().unwrap();
        assert_valid_fill(&puzzle, &vocab, &result);

        // Either orientation of the word square is a valid fill.
        let rendered = render_grid(&puzzle, &vocab, &result.choices);
        assert!(
            rendered == "ABC\nDEF\nGHI" || rendered == "ADG\nBEH\nCFI",
            "unexpected fill:\n{}",
            rendered
        );
        assert!(result.statistics.states >= puzzle.slots.len() as u64);
    }

    #[test]
    fn duplicate_words_are_never_reused() {
        let puzzle = Puzzle::from_template(
            "
            ...
            ###
            ...
            ",
        )
        .unwrap();

        // One 3-letter word can't fill two slots.
        let single = vocabulary(&["CAT"]);
        assert!(Filler::new(&puzzle, &single).fill().is_none());

        let pair = vocabulary(&["CAT", "DOG"]);
        let result = Filler::new(&puzzle, &pair).fill().unwrap();
        assert_valid_fill(&puzzle, &pair, &result);
    }

    #[test]
    fn render_grid_marks_blocks_and_uncovered_cells() {
        let puzzle = crossing_puzzle();
        let vocab = vocabulary(&["CAT", "CAR"]);

        let across = puzzle
            .slots
            .iter()
            .position(|slot| slot.direction == Direction::Across)
            .unwrap();
        let down = puzzle
            .slots
            .iter()
            .position(|slot| slot.direction == Direction::Down)
            .unwrap();

        // No choices yet: open cells render as dots.
        assert_eq!(render_grid(&puzzle, &vocab, &[]), "...\n.##\n.##");

        let choices = vec![
            Choice {
                slot_id: across,
                word_id: 0,
            },
            Choice {
                slot_id: down,
                word_id: 1,
            },
        ];
        assert_eq!(render_grid(&puzzle, &vocab, &choices), "CAT\nA##\nR##");
    }

    #[test]
    fn ring_puzzle_fills_consistently() {
        let puzzle = Puzzle::from_template(
            "
            ....#
            .##.#
            .##.#
            ....#
            #####
            ",
        )
        .unwrap();

        // TOON / NOPE / PALE / TARP close the ring; the distractors don't.
        // The test only asserts validity, not which arrangement wins.
        let vocab = vocabulary(&[
            "SAILS", "TOON", "NOPE", "PALE", "TARP", "TANK", "KELP", "TAKE", "POOL", "TINT",
        ]);

        match Filler::new(&puzzle, &vocab).fill() {
            Some(result) => assert_valid_fill(&puzzle, &vocab, &result),
            None => panic!("expected the ring puzzle to be fillable"),
        }
    }
}

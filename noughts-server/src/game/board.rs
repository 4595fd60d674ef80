//! Board and Win Detection
//!
//! Fixed 3x3 board, row-major, indices 0-8.
//! Terminal status is evaluated by scanning the eight winning lines
//! in declaration order (rows, columns, diagonals).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of cells on the board.
pub const BOARD_CELLS: usize = 9;

/// The eight winning index-triples: rows, then columns, then diagonals.
pub const WINNING_LINES: [[usize; 3]; 8] = [
    // Rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // Columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // Diagonals
    [0, 4, 8],
    [2, 4, 6],
];

// =============================================================================
// SYMBOL
// =============================================================================

/// Mark placed by a participant. Assigned at pairing, never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// Moves first.
    #[serde(rename = "X")]
    First,
    /// Moves second.
    #[serde(rename = "O")]
    Second,
}

impl Symbol {
    /// The other symbol.
    pub fn opponent(self) -> Self {
        match self {
            Symbol::First => Symbol::Second,
            Symbol::Second => Symbol::First,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::First => f.write_str("X"),
            Symbol::Second => f.write_str("O"),
        }
    }
}

/// A board cell: `None` when empty.
pub type Cell = Option<Symbol>;

// =============================================================================
// CELL INDEX
// =============================================================================

/// A board index already checked to be in `0..9`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CellIndex(u8);

impl CellIndex {
    /// Create from a raw index, `None` if out of range.
    pub fn new(index: usize) -> Option<Self> {
        (index < BOARD_CELLS).then_some(Self(index as u8))
    }

    /// Raw index.
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// All nine indices in row-major order.
    pub fn all() -> impl Iterator<Item = CellIndex> {
        (0..BOARD_CELLS as u8).map(CellIndex)
    }
}

impl TryFrom<i64> for CellIndex {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(CellIndex::new)
            .ok_or(value)
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Terminal evaluation of a board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    /// A winning line is held by this symbol.
    Won(Symbol),
    /// Full board, no winning line.
    Drawn,
    /// Empty cells remain and no line matched.
    Open,
}

/// 3x3 board, row-major.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    cells: [Cell; BOARD_CELLS],
}

impl Board {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell contents at `index`.
    pub fn get(&self, index: CellIndex) -> Cell {
        self.cells[index.get()]
    }

    /// Whether the cell at `index` is empty.
    pub fn is_empty_at(&self, index: CellIndex) -> bool {
        self.get(index).is_none()
    }

    /// Place a symbol. Callers check emptiness first.
    pub(crate) fn place(&mut self, index: CellIndex, symbol: Symbol) {
        self.cells[index.get()] = Some(symbol);
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[Cell; BOARD_CELLS] {
        &self.cells
    }

    /// Whether every cell is occupied.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    /// Number of occupied cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// First winning line found in declaration order, with its symbol.
    pub fn winning_line(&self) -> Option<([usize; 3], Symbol)> {
        WINNING_LINES.iter().find_map(|&[a, b, c]| {
            let symbol = self.cells[a]?;
            (self.cells[b] == Some(symbol) && self.cells[c] == Some(symbol))
                .then_some(([a, b, c], symbol))
        })
    }

    /// Evaluate the board: a win takes precedence over a full board.
    pub fn status(&self) -> BoardStatus {
        if let Some((_, symbol)) = self.winning_line() {
            BoardStatus::Won(symbol)
        } else if self.is_full() {
            BoardStatus::Drawn
        } else {
            BoardStatus::Open
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..3 {
            for col in 0..3 {
                match self.cells[row * 3 + col] {
                    Some(symbol) => write!(f, "{}", symbol)?,
                    None => f.write_str(".")?,
                }
            }
            if row < 2 {
                f.write_str("/")?;
            }
        }
        Ok(())
    }
}

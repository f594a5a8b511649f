use std::fmt;

use serde::{Deserialize, Serialize};

/// Side to move, and owner of stones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

/// Contents of one intersection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    #[default]
    Empty,
    Black,
    White,
}

impl Cell {
    pub fn color(self) -> Option<Color> {
        match self {
            Cell::Empty => None,
            Cell::Black => Some(Color::Black),
            Cell::White => Some(Color::White),
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

impl From<Color> for Cell {
    fn from(color: Color) -> Self {
        match color {
            Color::Black => Cell::Black,
            Color::White => Cell::White,
        }
    }
}

/// `(row, column)`, zero based.
pub type Point = (usize, usize);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub size: usize,
    cells: Vec<Cell>,
}

impl Board {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![Cell::Empty; size * size],
        }
    }

    fn idx(&self, (row, col): Point) -> usize {
        row * self.size + col
    }

    pub fn contains(&self, (row, col): Point) -> bool {
        row < self.size && col < self.size
    }

    /// Off-board points read as empty.
    pub fn get(&self, pt: Point) -> Cell {
        if !self.contains(pt) {
            return Cell::Empty;
        }
        self.cells[self.idx(pt)]
    }

    pub fn set(&mut self, pt: Point, cell: Cell) {
        assert!(self.contains(pt), "point {pt:?} is off a {0}x{0} board", self.size);
        let i = self.idx(pt);
        self.cells[i] = cell;
    }

    /// Orthogonal neighbors that lie on the board.
    pub fn neighbors(&self, (row, col): Point) -> impl Iterator<Item = Point> + use<> {
        let s = self.size;
        let mut v = Vec::with_capacity(4);
        if row > 0 {
            v.push((row - 1, col));
        }
        if col + 1 < s {
            v.push((row, col + 1));
        }
        if row + 1 < s {
            v.push((row + 1, col));
        }
        if col > 0 {
            v.push((row, col - 1));
        }
        v.into_iter()
    }

    /// Every point on the board, row-major.
    pub fn points(&self) -> impl Iterator<Item = Point> + use<> {
        let s = self.size;
        (0..s).flat_map(move |row| (0..s).map(move |col| (row, col)))
    }

    pub fn stone_count(&self, color: Color) -> usize {
        self.cells
            .iter()
            .filter(|c| c.color() == Some(color))
            .count()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.size {
            for col in 0..self.size {
                let ch = match self.get((row, col)) {
                    Cell::Black => 'X',
                    Cell::White => 'O',
                    Cell::Empty => '.',
                };
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

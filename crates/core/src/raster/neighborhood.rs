//! Pixel adjacency used by clumping, border detection and elimination

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which pixels count as adjacent.
///
/// `Four` is the rook neighbourhood (edge sharing), `Eight` the queen
/// neighbourhood (edge or corner sharing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

const ROOK: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
const QUEEN: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

impl Connectivity {
    /// Relative (row, col) offsets of the neighbours, excluding the centre
    pub fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &ROOK,
            Connectivity::Eight => &QUEEN,
        }
    }

    /// In-bounds neighbours of (row, col) in a `rows` x `cols` grid
    pub fn neighbours(self, row: usize, col: usize, rows: usize, cols: usize) -> Neighbours {
        Neighbours {
            offsets: self.offsets(),
            index: 0,
            row,
            col,
            rows,
            cols,
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Four => f.write_str("4"),
            Connectivity::Eight => f.write_str("8"),
        }
    }
}

impl FromStr for Connectivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "4" | "four" | "rook" => Ok(Connectivity::Four),
            "8" | "eight" | "queen" => Ok(Connectivity::Eight),
            other => Err(format!("unknown connectivity '{}', expected 4 or 8", other)),
        }
    }
}

/// Iterator over the in-bounds neighbours of a cell
pub struct Neighbours {
    offsets: &'static [(isize, isize)],
    index: usize,
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
}

impl Iterator for Neighbours {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.offsets.len() {
            let (dr, dc) = self.offsets[self.index];
            self.index += 1;

            let r = self.row as isize + dr;
            let c = self.col as isize + dc;
            if r >= 0 && c >= 0 && (r as usize) < self.rows && (c as usize) < self.cols {
                return Some((r as usize, c as usize));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(Connectivity::Four.offsets().len(), 4);
        assert_eq!(Connectivity::Eight.offsets().len(), 8);
    }

    #[test]
    fn test_neighbours_clip_at_edges() {
        let corner: Vec<_> = Connectivity::Four.neighbours(0, 0, 3, 3).collect();
        assert_eq!(corner, vec![(0, 1), (1, 0)]);

        let centre = Connectivity::Eight.neighbours(1, 1, 3, 3).count();
        assert_eq!(centre, 8);
    }

    #[test]
    fn test_parse() {
        assert_eq!("8".parse::<Connectivity>().unwrap(), Connectivity::Eight);
        assert_eq!("Four".parse::<Connectivity>().unwrap(), Connectivity::Four);
        assert!("6".parse::<Connectivity>().is_err());
    }
}

use std::fmt::{Display, Formatter};

/// The number of values stored per cell of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CellValNum {
    /// Exactly one value per cell.
    #[default]
    Single,
    /// A fixed number of values per cell (e.g. fixed-width strings).
    Fixed(u32),
    /// A variable number of values per cell; the column carries an offsets
    /// file alongside its data file.
    Var,
}

impl CellValNum {
    /// Returns `true` iff cells are variable-length.
    pub const fn is_var(&self) -> bool {
        matches!(self, Self::Var)
    }

    /// The fixed value count, or `None` for variable-length cells.
    pub const fn fixed(&self) -> Option<u32> {
        match self {
            Self::Single => Some(1),
            Self::Fixed(n) => Some(*n),
            Self::Var => None,
        }
    }
}

impl Display for CellValNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "1"),
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Var => write!(f, "var"),
        }
    }
}

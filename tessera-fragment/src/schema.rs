use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_dtype::{CellValNum, Datatype, Nullability};
use tessera_error::{tessera_err, TesseraResult};

use crate::{
    Domain, CELL_VAR_OFFSET_SIZE, COORDS, DELETE_CONDITION_INDEX, DELETE_TIMESTAMPS,
    FORMAT_VERSION, TIMESTAMPS,
};

/// A named attribute of an array schema.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    cell_val_num: CellValNum,
    nullability: Nullability,
}

impl Attribute {
    /// Create a single-value, non-nullable attribute.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            cell_val_num: CellValNum::Single,
            nullability: Nullability::NonNullable,
        }
    }

    /// Replace the cell value count.
    pub fn with_cell_val_num(mut self, cell_val_num: CellValNum) -> Self {
        self.cell_val_num = cell_val_num;
        self
    }

    /// Mark the attribute nullable.
    pub fn nullable(mut self) -> Self {
        self.nullability = Nullability::Nullable;
        self
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// The number of values per cell.
    pub fn cell_val_num(&self) -> CellValNum {
        self.cell_val_num
    }

    /// Whether cells may be null.
    pub fn nullability(&self) -> Nullability {
        self.nullability
    }

    /// Whether cells are variable-length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }
}

/// Everything the fragment layer needs to know about one named column,
/// whether it is an attribute, a dimension, or one of the special columns.
#[derive(Debug, Clone, Copy)]
pub struct ColumnInfo {
    /// The column datatype.
    pub datatype: Datatype,
    /// Values per cell.
    pub cell_val_num: CellValNum,
    /// Whether cells may be null.
    pub nullability: Nullability,
    /// Whether the column is a dimension.
    pub is_dim: bool,
}

impl ColumnInfo {
    /// Whether cells are variable-length.
    pub fn var_size(&self) -> bool {
        self.cell_val_num.is_var()
    }

    /// Size in bytes of one fixed-length cell; `u64::MAX` sentinel for
    /// variable-length columns.
    pub fn cell_size(&self) -> u64 {
        match self.cell_val_num.fixed() {
            Some(n) => n as u64 * self.datatype.size(),
            None => u64::MAX,
        }
    }

    /// Whether the column maintains per-tile and per-fragment null counts.
    pub fn nullable(&self) -> bool {
        self.nullability.into()
    }
}

/// The array schema, referenced by name from every fragment.
///
/// The schema surface here is the narrow contract the fragment layer
/// depends on; schema construction, evolution and persistence live
/// upstream.
#[derive(Debug)]
pub struct ArraySchema {
    name: String,
    dense: bool,
    domain: Arc<Domain>,
    attributes: Vec<Attribute>,
    capacity: u64,
    write_version: u32,
}

/// All schemas of an array keyed by their name, as loaded by the array
/// directory.
pub type SchemaMap = FxHashMap<String, Arc<ArraySchema>>;

impl ArraySchema {
    /// Create a schema.
    pub fn new(
        name: impl Into<String>,
        dense: bool,
        domain: Arc<Domain>,
        attributes: Vec<Attribute>,
    ) -> TesseraResult<Self> {
        let name = name.into();
        if dense {
            if !domain.all_dims_fixed() {
                return Err(tessera_err!(
                    Invalid: "dense array '{}' cannot have var-sized dimensions", name
                ));
            }
            if !domain.all_dims_have_extents() {
                return Err(tessera_err!(
                    Invalid: "dense array '{}' requires a tile extent on every dimension", name
                ));
            }
        }
        for (i, attr) in attributes.iter().enumerate() {
            let clash = attributes[..i].iter().any(|a| a.name() == attr.name())
                || domain.dim_index(attr.name()).is_some()
                || [COORDS, TIMESTAMPS, DELETE_TIMESTAMPS, DELETE_CONDITION_INDEX]
                    .contains(&attr.name());
            if clash {
                return Err(tessera_err!(
                    Invalid: "attribute name '{}' is duplicated or reserved", attr.name()
                ));
            }
        }
        Ok(Self {
            name,
            dense,
            domain,
            attributes,
            capacity: 10_000,
            write_version: FORMAT_VERSION,
        })
    }

    /// Replace the sparse tile capacity.
    pub fn with_capacity(mut self, capacity: u64) -> TesseraResult<Self> {
        if capacity == 0 {
            return Err(tessera_err!(Invalid: "capacity must be greater than 0"));
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Replace the format version new fragments are written at.
    pub fn with_write_version(mut self, version: u32) -> Self {
        self.write_version = version;
        self
    }

    /// The schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the array is dense.
    pub fn dense(&self) -> bool {
        self.dense
    }

    /// The domain.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Number of dimensions.
    pub fn dim_num(&self) -> usize {
        self.domain.dim_num()
    }

    /// The attributes in order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Number of attributes.
    pub fn attribute_num(&self) -> usize {
        self.attributes.len()
    }

    /// The sparse tile capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The format version new fragments are written at.
    pub fn write_version(&self) -> u32 {
        self.write_version
    }

    /// Whether `name` names a dimension.
    pub fn is_dim(&self, name: &str) -> bool {
        self.domain.dim_index(name).is_some()
    }

    /// Resolve a column name to its description. Fails with `Invalid` for
    /// names the schema does not know.
    pub fn column(&self, name: &str) -> TesseraResult<ColumnInfo> {
        if let Some(attr) = self.attributes.iter().find(|a| a.name() == name) {
            return Ok(ColumnInfo {
                datatype: attr.datatype(),
                cell_val_num: attr.cell_val_num(),
                nullability: attr.nullability(),
                is_dim: false,
            });
        }
        if let Some(d) = self.domain.dim_index(name) {
            let dim = self.domain.dimension(d);
            return Ok(ColumnInfo {
                datatype: dim.datatype(),
                cell_val_num: dim.cell_val_num(),
                nullability: Nullability::NonNullable,
                is_dim: true,
            });
        }
        match name {
            COORDS => Ok(ColumnInfo {
                // The zipped-coordinates pseudo-attribute of legacy
                // fragments; one cell packs one value per dimension.
                datatype: Datatype::UInt8,
                cell_val_num: CellValNum::Fixed(self.coords_cell_size_bytes()),
                nullability: Nullability::NonNullable,
                is_dim: false,
            }),
            TIMESTAMPS | DELETE_TIMESTAMPS | DELETE_CONDITION_INDEX => Ok(ColumnInfo {
                datatype: Datatype::UInt64,
                cell_val_num: CellValNum::Single,
                nullability: Nullability::NonNullable,
                is_dim: false,
            }),
            _ => Err(tessera_err!(Invalid: "unknown column '{}' in schema '{}'", name, self.name)),
        }
    }

    /// Size in bytes of one cell of the named column; `u64::MAX` sentinel
    /// for variable-length columns.
    pub fn cell_size(&self, name: &str) -> TesseraResult<u64> {
        Ok(self.column(name)?.cell_size())
    }

    fn coords_cell_size_bytes(&self) -> u32 {
        let total: u64 = self
            .domain
            .dimensions()
            .iter()
            .map(|d| d.coord_size())
            .sum();
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

/// Whether a column of the given shape maintains per-tile and per-fragment
/// min/max statistics.
pub fn has_min_max_metadata(
    datatype: Datatype,
    is_dim: bool,
    var_size: bool,
    cell_val_num: CellValNum,
) -> bool {
    // Var-sized dimension bounds come from the MBRs instead.
    if is_dim && var_size {
        return false;
    }
    match datatype {
        Datatype::StringAscii => true,
        _ => !var_size && cell_val_num == CellValNum::Single,
    }
}

/// Whether a column of the given shape maintains per-tile and per-fragment
/// sums.
pub fn has_sum_metadata(datatype: Datatype, var_size: bool, cell_val_num: CellValNum) -> bool {
    !var_size
        && cell_val_num == CellValNum::Single
        && (datatype.is_integer() || datatype.is_real())
}

/// The size of one cell-offset entry in a var column's offsets file.
pub const fn cell_var_offset_size() -> u64 {
    CELL_VAR_OFFSET_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dimension, Layout};

    fn domain_1d() -> Arc<Domain> {
        Arc::new(
            Domain::new(
                vec![Dimension::new("d", 0i32, 9i32, Some(2i32)).unwrap()],
                Layout::RowMajor,
                Layout::RowMajor,
            )
            .unwrap(),
        )
    }

    #[test]
    fn column_lookups() {
        let schema = ArraySchema::new(
            "s1",
            true,
            domain_1d(),
            vec![
                Attribute::new("a", Datatype::Int32),
                Attribute::new("s", Datatype::StringAscii)
                    .with_cell_val_num(CellValNum::Var)
                    .nullable(),
            ],
        )
        .unwrap();

        let a = schema.column("a").unwrap();
        assert!(!a.is_dim && !a.var_size());
        assert_eq!(a.cell_size(), 4);

        let s = schema.column("s").unwrap();
        assert!(s.var_size() && s.nullable());
        assert_eq!(s.cell_size(), u64::MAX);

        let d = schema.column("d").unwrap();
        assert!(d.is_dim);

        assert!(schema.column("missing").is_err());
    }

    #[test]
    fn dense_requires_fixed_dims_with_extents() {
        let no_extent = Arc::new(
            Domain::new(
                vec![Dimension::new("d", 0i32, 9i32, None).unwrap()],
                Layout::RowMajor,
                Layout::RowMajor,
            )
            .unwrap(),
        );
        assert!(ArraySchema::new("s", true, no_extent.clone(), vec![]).is_err());
        assert!(ArraySchema::new("s", false, no_extent, vec![]).is_ok());
    }

    #[test]
    fn reserved_and_duplicate_attribute_names() {
        assert!(ArraySchema::new(
            "s",
            false,
            domain_1d(),
            vec![Attribute::new(COORDS, Datatype::Int32)],
        )
        .is_err());
        assert!(ArraySchema::new(
            "s",
            false,
            domain_1d(),
            vec![
                Attribute::new("a", Datatype::Int32),
                Attribute::new("a", Datatype::Int64),
            ],
        )
        .is_err());
        assert!(ArraySchema::new(
            "s",
            false,
            domain_1d(),
            vec![Attribute::new("d", Datatype::Int32)],
        )
        .is_err());
    }

    #[test]
    fn statistics_applicability() {
        use Datatype::*;
        assert!(has_min_max_metadata(Int32, false, false, CellValNum::Single));
        assert!(has_min_max_metadata(StringAscii, false, true, CellValNum::Var));
        assert!(has_min_max_metadata(StringAscii, false, false, CellValNum::Fixed(5)));
        assert!(!has_min_max_metadata(Int32, false, false, CellValNum::Fixed(2)));
        assert!(!has_min_max_metadata(StringAscii, true, true, CellValNum::Var));

        assert!(has_sum_metadata(Int64, false, CellValNum::Single));
        assert!(has_sum_metadata(Float64, false, CellValNum::Single));
        assert!(!has_sum_metadata(StringAscii, false, CellValNum::Single));
        assert!(!has_sum_metadata(Int64, true, CellValNum::Var));
        assert!(!has_sum_metadata(Int64, false, CellValNum::Fixed(3)));
    }

    #[test]
    fn capacity_must_be_positive() {
        let schema = ArraySchema::new("s", false, domain_1d(), vec![]).unwrap();
        assert!(schema.with_capacity(0).is_err());
    }
}

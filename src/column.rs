// ABOUTME: Column type classification from the engine's declared type strings
// ABOUTME: Decides numeric / blob / virtual-generated handling for each column

/// Type prefixes whose values are written unquoted.
const NUMERIC_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "mediumint",
    "int",
    "integer",
    "bigint",
    "real",
    "double",
    "float",
    "decimal",
    "numeric",
    "bit",
];

/// Type prefixes whose values are written as hex literals.
///
/// `bit` is in both lists; callers check blob-ness first.
const BLOB_TYPES: &[&str] = &[
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
    "binary",
    "varbinary",
    "bit",
    "geometry",
    "point",
    "linestring",
    "polygon",
    "multipoint",
    "multilinestring",
    "multipolygon",
    "geometrycollection",
];

/// Raw column metadata as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared type, e.g. `varchar(255)` or `int(10) unsigned`.
    pub column_type: String,
    /// Extra flags, e.g. `auto_increment` or `VIRTUAL GENERATED`.
    pub extra: String,
}

impl ColumnMeta {
    pub fn new(
        name: impl Into<String>,
        column_type: impl Into<String>,
        extra: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            extra: extra.into(),
        }
    }
}

/// Classification of a single column, recomputed for every dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    /// Lower-cased type name without length or attributes (`varchar`).
    pub type_name: String,
    /// Declared length/precision between the parentheses, if any (`10,2`).
    pub declared_length: Option<String>,
    /// Trailing attributes after the parentheses (`unsigned zerofill`).
    pub attributes: Option<String>,
    pub is_numeric: bool,
    pub is_blob: bool,
    pub is_virtual: bool,
}

impl ColumnType {
    /// Classify a column from its catalog metadata.
    ///
    /// Malformed type strings classify as a plain string column.
    pub fn classify(meta: &ColumnMeta) -> Self {
        let declared = meta.column_type.trim();
        let (prefix, rest) = match declared.split_once('(') {
            Some((prefix, rest)) => (prefix, Some(rest)),
            None => (declared, None),
        };

        // Types without parentheses can still carry attributes ("int unsigned")
        let mut words = prefix.split_whitespace();
        let type_name = words.next().unwrap_or("").to_lowercase();
        let bare_attributes: Vec<&str> = words.collect();

        let (declared_length, attributes) = match rest.and_then(|r| r.split_once(')')) {
            Some((length, tail)) => (
                Some(length.trim().to_string()).filter(|l| !l.is_empty()),
                Some(tail.trim().to_lowercase()).filter(|t| !t.is_empty()),
            ),
            None => (
                None,
                Some(bare_attributes.join(" ").to_lowercase()).filter(|t| !t.is_empty()),
            ),
        };

        let extra = meta.extra.to_uppercase();
        let is_virtual = extra.contains("STORED GENERATED") || extra.contains("VIRTUAL GENERATED");

        Self {
            name: meta.name.clone(),
            is_numeric: NUMERIC_TYPES.contains(&type_name.as_str()),
            is_blob: BLOB_TYPES.contains(&type_name.as_str()),
            type_name,
            declared_length,
            attributes,
            is_virtual,
        }
    }
}

/// Classify every column of a table, preserving catalog order.
pub fn classify_columns(columns: &[ColumnMeta]) -> Vec<ColumnType> {
    columns.iter().map(ColumnType::classify).collect()
}

/// Name of the workbook sheet holding the LaserChron summary table
pub const DATA_SHEET: &str = "datatable";

/// Column count of the standard LaserChron export
pub const EXPECTED_COLUMNS: usize = 19;

/// Characters treated as separators around analysis labels
pub const DELIMITERS: &[char] = &['.', ':', '_', '-', ' '];

/// Error metric attached to every imported datum (two standard deviations)
pub const ERROR_METRIC: &str = "2s";

/// Column holding the laboratory-designated preferred age
pub const BEST_AGE_COLUMN: &str = "best_age";

/// Suffix marking a column as the uncertainty of its neighbour
pub const ERROR_SUFFIX: &str = "_error";

/// Prefix shared by every age column key
pub const AGE_PREFIX: &str = "age_";

/// File name markers for conventions we recognize but do not import
pub const AGE_PICK_MARKER: &str = "AGE PICK";
pub const NUPM_MON_MARKER: &str = "NUPM-MON";

/// Workbook extensions picked up during discovery
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm"];

/// Project used when a storage path has no directory component
pub const DEFAULT_PROJECT: &str = "LaserChron";

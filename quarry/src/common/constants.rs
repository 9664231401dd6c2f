// doc constants
pub const DOC_ID: &str = "_id";
pub const FIELD_SEPARATOR: char = '.';
pub const OPERATOR_SIGIL: char = '$';

// variable constants
pub const VAR_ROOT: &str = "ROOT";
pub const VAR_CURRENT: &str = "CURRENT";
pub const VAR_REMOVE: &str = "REMOVE";

// raw file document constants
pub const CONTENT_KEY: &str = "content";
pub const PATH_KEY: &str = "path";
pub const STAT_SIZE: &str = "size";
pub const STAT_MTIME: &str = "mtime";
pub const STAT_CTIME: &str = "ctime";
pub const STAT_FIELDS: [&str; 3] = [STAT_SIZE, STAT_MTIME, STAT_CTIME];

// most null slots a single path write may pad into an array
pub const MAX_ARRAY_PADDING: usize = 1500;

// front matter delimiter
pub const FRONT_MATTER_DELIMITER: &str = "---";

// bridge constants
pub const WILDCARD_DATABASE: &str = "*";

// cursor constants
pub const DEFAULT_BATCH_SIZE: usize = 101;
pub const DEFAULT_MAX_SORT_DOCUMENTS: usize = 1_000_000;

// event constants
pub const QUARRY_EVENT: &str = "quarry_event";

use std::fmt;

#[derive(Debug, Clone)]
pub struct ColumnNotFound(Box<String>);

impl ColumnNotFound {
    pub fn new(column: &str) -> Self {
        ColumnNotFound(Box::new(column.to_string()))
    }
}

#[derive(Debug)]
pub enum MrpError {
    ColumnNotFound(ColumnNotFound),
    CsvError(csv::Error),
    InvalidMapFile(String),
    InvalidValue { column: String, value: String },
}

impl std::error::Error for MrpError {}

impl fmt::Display for MrpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MrpError::ColumnNotFound(ref e) => write!(f, "{}", e),
            MrpError::CsvError(ref e) => write!(f, "CSV error: {}", e),
            MrpError::InvalidMapFile(ref reason) => write!(f, "Invalid map file: {}", reason),
            MrpError::InvalidValue {
                ref column,
                ref value,
            } => write!(f, "Invalid value '{}' in column '{}'", value, column),
        }
    }
}

impl fmt::Display for ColumnNotFound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Column: '{}' not found in header", self.0)
    }
}

impl From<csv::Error> for MrpError {
    fn from(e: csv::Error) -> Self {
        MrpError::CsvError(e)
    }
}

impl From<ColumnNotFound> for MrpError {
    fn from(e: ColumnNotFound) -> MrpError {
        MrpError::ColumnNotFound(e)
    }
}
